use crate::fetcher::HttpFetcher;
use crate::parser::{parse_feed_items, FeedItem};
use crate::traits::{FetchOutcome, Provider};
use crate::types::{AggregatorError, CandidatePost, ProviderKind, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

/// Syndicated-feed provider for any RSS or Atom document.
pub struct RssFeedProvider {
    source_name: String,
    feed_url: String,
    fetcher: HttpFetcher,
}

impl RssFeedProvider {
    /// When `source_name` is `None` the feed's domain is used, without a
    /// leading `www.`.
    pub fn new(feed_url: &str, source_name: Option<&str>, fetcher: HttpFetcher) -> Result<Self> {
        let feed_url = feed_url.trim();
        let source_name = match source_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name.to_string(),
            None => source_name_from_url(feed_url)?,
        };

        Ok(Self {
            source_name,
            feed_url: feed_url.to_string(),
            fetcher,
        })
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    fn to_candidate(&self, item: FeedItem, now: DateTime<Utc>) -> Option<CandidatePost> {
        let published_at = item.resolve_published(now);

        let title = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let link = item.link.as_deref().map(str::trim).filter(|l| !l.is_empty());
        let (title, link) = match (title, link) {
            (Some(title), Some(link)) => (title, link),
            _ => {
                debug!("Skipping entry without title or link in {}", self.feed_url);
                return None;
            }
        };

        match CandidatePost::new(title, link, &self.source_name, published_at) {
            Ok(post) => Some(post),
            Err(e) => {
                warn!("Dropping entry {} from {}: {}", link, self.source_name, e);
                None
            }
        }
    }
}

#[async_trait]
impl Provider for RssFeedProvider {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::SyndicatedFeed
    }

    fn endpoint(&self) -> &str {
        &self.feed_url
    }

    async fn fetch(&self, limit: usize) -> FetchOutcome {
        let content = match self.fetcher.get_text(&self.feed_url).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to fetch feed {}: {}", self.feed_url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        let items = match parse_feed_items(&content, limit) {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to parse feed {}: {}", self.feed_url, e);
                return FetchOutcome::Failed(e.to_string());
            }
        };

        let now = Utc::now();
        let posts: Vec<CandidatePost> = items
            .into_iter()
            .filter_map(|item| self.to_candidate(item, now))
            .collect();

        info!("Fetched {} posts from feed {}", posts.len(), self.source_name);
        FetchOutcome::Fetched(posts)
    }

    async fn is_available(&self) -> bool {
        self.fetcher.probe(&self.feed_url).await
    }
}

/// Domain of `feed_url` with a leading `www.` removed.
pub fn source_name_from_url(feed_url: &str) -> Result<String> {
    let parsed = Url::parse(feed_url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AggregatorError::InvalidConfig(format!("feed url has no host: {}", feed_url)))?;

    Ok(host.strip_prefix("www.").unwrap_or(host).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchConfig;
    use chrono::{Duration, TimeZone};
    use mockito::Server;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetchConfig {
            max_retries: 0,
            timeout_seconds: 5,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Python Jobs</title>
    <link>https://www.python.org/jobs/</link>
    <description>Jobs</description>
    <item>
      <title>  Senior Developer  </title>
      <link> https://www.python.org/jobs/1/ </link>
      <pubDate>Tue, 02 Jan 2024 09:00:00 GMT</pubDate>
    </item>
    <item>
      <title>   </title>
      <link>https://www.python.org/jobs/2/</link>
    </item>
    <item>
      <title>No link here</title>
    </item>
    <item>
      <title>Undated</title>
      <link>https://www.python.org/jobs/4/</link>
    </item>
    <item>
      <title>Beyond the limit</title>
      <link>https://www.python.org/jobs/5/</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn derives_source_name_from_domain() {
        assert_eq!(source_name_from_url("https://www.python.org/jobs/feed/rss/").unwrap(), "python.org");
        assert_eq!(source_name_from_url("https://realpython.com/atom.xml").unwrap(), "realpython.com");
        assert_eq!(source_name_from_url("https://blog.example.com/rss").unwrap(), "blog.example.com");
        assert!(source_name_from_url("not a url").is_err());
    }

    #[test]
    fn explicit_source_name_wins() {
        let provider = RssFeedProvider::new("https://www.python.org/jobs/feed/rss/", Some("python-jobs"), fetcher()).unwrap();
        assert_eq!(provider.source_name(), "python-jobs");

        let derived = RssFeedProvider::new("https://www.python.org/jobs/feed/rss/", Some("  "), fetcher()).unwrap();
        assert_eq!(derived.source_name(), "python.org");
    }

    #[tokio::test]
    async fn fetch_validates_entries_and_trims_to_limit() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/feed.xml")
            .with_header("content-type", "application/rss+xml")
            .with_body(FEED)
            .create_async()
            .await;

        let provider = RssFeedProvider::new(&format!("{}/feed.xml", server.url()), Some("python-jobs"), fetcher()).unwrap();

        let before = Utc::now();
        let posts = provider.fetch(4).await.into_posts();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Senior Developer");
        assert_eq!(posts[0].url, "https://www.python.org/jobs/1/");
        assert_eq!(posts[0].source, "python-jobs");
        assert_eq!(posts[0].published_at, Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap());

        assert_eq!(posts[1].title, "Undated");
        assert!(posts[1].published_at >= before);
        assert!(posts[1].published_at - before < Duration::seconds(10));
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_not_raised() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/feed.xml").with_status(404).create_async().await;

        let provider = RssFeedProvider::new(&format!("{}/feed.xml", server.url()), None, fetcher()).unwrap();
        let outcome = provider.fetch(10).await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn unparseable_document_yields_failure() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/feed.xml").with_body("<html>not a feed</html>").create_async().await;

        let provider = RssFeedProvider::new(&format!("{}/feed.xml", server.url()), None, fetcher()).unwrap();
        assert!(provider.fetch(10).await.into_posts().is_empty());
    }

    #[tokio::test]
    async fn availability_uses_get_when_head_not_allowed() {
        let mut server = Server::new_async().await;
        server.mock("HEAD", "/feed.xml").with_status(405).create_async().await;
        server.mock("GET", "/feed.xml").with_body(FEED).create_async().await;

        let provider = RssFeedProvider::new(&format!("{}/feed.xml", server.url()), None, fetcher()).unwrap();
        assert!(provider.is_available().await);
    }
}
