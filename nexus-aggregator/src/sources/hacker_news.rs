use crate::fetcher::HttpFetcher;
use crate::traits::{FetchOutcome, Provider};
use crate::types::{AggregatorError, CandidatePost, ProviderKind, Result};
use async_trait::async_trait;
use chrono::DateTime;
use futures::future::join_all;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_API_URL: &str = "https://hacker-news.firebaseio.com/v0";
pub const DEFAULT_ITEM_PAGE_URL: &str = "https://news.ycombinator.com/item?id=";

/// Upper bound on simultaneous item-detail requests.
pub const MAX_CONCURRENT_ITEM_FETCHES: usize = 10;

#[derive(Debug, Deserialize)]
struct HnItem {
    id: Option<u64>,
    title: Option<String>,
    time: Option<i64>,
    url: Option<String>,
}

/// Ranked-API provider backed by the Hacker News Firebase API.
pub struct HackerNewsProvider {
    source_name: String,
    api_url: String,
    item_page_url: String,
    fetcher: HttpFetcher,
}

impl HackerNewsProvider {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            source_name: "hackernews".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            item_page_url: DEFAULT_ITEM_PAGE_URL.to_string(),
            fetcher,
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_item_page_url(mut self, item_page_url: &str) -> Self {
        self.item_page_url = item_page_url.to_string();
        self
    }

    pub fn with_source_name(mut self, source_name: &str) -> Self {
        self.source_name = source_name.to_string();
        self
    }

    fn top_stories_url(&self) -> String {
        format!("{}/topstories.json", self.api_url)
    }

    fn item_url(&self, id: u64) -> String {
        format!("{}/item/{}.json", self.api_url, id)
    }

    /// Link to the item's own discussion page, used for self posts.
    pub fn discussion_url(&self, id: u64) -> String {
        format!("{}{}", self.item_page_url, id)
    }

    async fn fetch_item(&self, id: u64) -> Option<CandidatePost> {
        // Deleted items come back as a JSON `null`.
        let item = match self.fetcher.get_json::<Option<HnItem>>(&self.item_url(id)).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!("Item {} is empty, skipping", id);
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch item {}: {}", id, e);
                return None;
            }
        };

        match self.parse_item(id, item) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!("Dropping item {}: {}", id, e);
                None
            }
        }
    }

    fn parse_item(&self, requested_id: u64, item: HnItem) -> Result<CandidatePost> {
        let title = item
            .title
            .ok_or_else(|| AggregatorError::Parse("missing title".to_string()))?;
        let time = item
            .time
            .ok_or_else(|| AggregatorError::Parse("missing time".to_string()))?;
        let published_at = DateTime::from_timestamp(time, 0)
            .ok_or_else(|| AggregatorError::Parse(format!("timestamp out of range: {}", time)))?;

        let url = match item.url {
            Some(url) if !url.trim().is_empty() => url,
            _ => self.discussion_url(item.id.unwrap_or(requested_id)),
        };

        CandidatePost::new(&title, &url, &self.source_name, published_at)
    }
}

#[async_trait]
impl Provider for HackerNewsProvider {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::RankedApi
    }

    fn endpoint(&self) -> &str {
        &self.api_url
    }

    async fn fetch(&self, limit: usize) -> FetchOutcome {
        if limit == 0 {
            return FetchOutcome::Fetched(Vec::new());
        }

        let ids: Vec<u64> = match self.fetcher.get_json_with_retry(&self.top_stories_url()).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to fetch top stories from {}: {}", self.api_url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        let requested: Vec<u64> = ids.into_iter().take(limit).collect();
        let requested_count = requested.len();
        let posts = fetch_bounded(requested, MAX_CONCURRENT_ITEM_FETCHES, |id| self.fetch_item(id)).await;

        info!("Fetched {} of {} items from {}", posts.len(), requested_count, self.source_name);
        FetchOutcome::Fetched(posts)
    }

    async fn is_available(&self) -> bool {
        self.fetcher.get_ok(&self.top_stories_url()).await
    }
}

/// Run `fetch_one` for every id with at most `max_in_flight` running at once.
/// Results keep the order of `ids`; ids that produce nothing are skipped.
pub(crate) async fn fetch_bounded<T, F, Fut>(ids: Vec<u64>, max_in_flight: usize, fetch_one: F) -> Vec<T>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let gate = Arc::new(Semaphore::new(max_in_flight.max(1)));

    let tasks = ids.into_iter().map(|id| {
        let gate = Arc::clone(&gate);
        let request = fetch_one(id);
        async move {
            let _permit = gate.acquire().await.ok()?;
            request.await
        }
    });

    join_all(tasks).await.into_iter().flatten().collect()
}
