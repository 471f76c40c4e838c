use crate::types::{AggregatorError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use tracing::debug;

/// One feed entry reduced to the fields a candidate post needs.
///
/// `published`/`updated` are the timestamps feed-rs could parse with its
/// standard (RFC 2822 / RFC 3339) rules. The `_text` variants come from a
/// lenient ISO-8601-like reading of the same elements and are only consulted
/// when neither structured timestamp is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub published_text: Option<DateTime<Utc>>,
    pub updated_text: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// Publication time in priority order, falling back to `now`.
    pub fn resolve_published(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.published
            .or(self.updated)
            .or(self.published_text)
            .or(self.updated_text)
            .unwrap_or(now)
    }

    fn has_structured_time(&self) -> bool {
        self.published.is_some() || self.updated.is_some()
    }
}

/// Parse an RSS/Atom document and keep the first `limit` entries.
pub fn parse_feed_items(content: &str, limit: usize) -> Result<Vec<FeedItem>> {
    debug!("Parsing feed content ({} bytes)", content.len());

    let feed = parser::parse(content.as_bytes())
        .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

    let mut items: Vec<FeedItem> = feed.entries.iter().take(limit).map(to_item).collect();

    // Second pass only when some entry has no standard timestamp at all.
    if items.iter().any(|item| !item.has_structured_time()) {
        let lenient = parser::Builder::new()
            .timestamp_parser(parse_free_text_timestamp)
            .build()
            .parse(content.as_bytes())
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        for (item, entry) in items.iter_mut().zip(lenient.entries.iter()) {
            item.published_text = entry.published;
            item.updated_text = entry.updated;
        }
    }

    debug!("Parsed feed with {} entries (kept {})", feed.entries.len(), items.len());
    Ok(items)
}

fn to_item(entry: &Entry) -> FeedItem {
    FeedItem {
        title: entry.title.as_ref().map(|t| t.content.clone()),
        link: primary_link(&entry.links).map(|l| l.href.clone()),
        published: entry.published,
        updated: entry.updated,
        published_text: None,
        updated_text: None,
    }
}

// The alternate link is the article itself; other rels point at comments,
// enclosures and the like.
fn primary_link(links: &[Link]) -> Option<&Link> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
}

/// Lenient ISO-8601-like timestamp reading. Any timezone designator is
/// dropped and the wall-clock time kept, then treated as UTC.
pub fn parse_free_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local().and_utc());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.naive_local().and_utc());
        }
    }

    let naive = text.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
