use crate::fetcher::HttpFetcher;
use crate::registry::ProviderRegistry;
use crate::sources::hacker_news::{DEFAULT_API_URL, DEFAULT_ITEM_PAGE_URL};
use crate::sources::{HackerNewsProvider, RssFeedProvider};
use crate::traits::Provider;
use crate::types::{AggregatorError, Result};
use chrono::{Duration, Utc};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://nexus.db";

/// Feed configured by url, with an optional explicit source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub url: String,
    pub name: Option<String>,
}

impl FeedSpec {
    pub fn new(url: &str, name: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            name: name.map(str::to_string),
        }
    }
}

pub fn default_feeds() -> Vec<FeedSpec> {
    vec![
        FeedSpec::new("https://www.python.org/jobs/feed/rss/", Some("python-jobs")),
        FeedSpec::new("https://realpython.com/atom.xml", Some("realpython")),
        FeedSpec::new("https://planetpython.org/rss20.xml", Some("planet-python")),
    ]
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub hackernews_api_url: String,
    pub hackernews_item_url: String,
    pub feeds: Vec<FeedSpec>,
    pub limit_per_provider: usize,
    pub aggregate_interval_secs: u64,
    pub retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            hackernews_api_url: DEFAULT_API_URL.to_string(),
            hackernews_item_url: DEFAULT_ITEM_PAGE_URL.to_string(),
            feeds: default_feeds(),
            limit_per_provider: 20,
            aggregate_interval_secs: 1800,
            retention_days: 30,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Settings::default();

        let feeds = match get("NEXUS_FEEDS") {
            Some(raw) => parse_feeds(&raw)?,
            None => defaults.feeds,
        };

        let settings = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            hackernews_api_url: get("HACKERNEWS_API_URL").unwrap_or(defaults.hackernews_api_url),
            hackernews_item_url: get("HACKERNEWS_ITEM_URL").unwrap_or(defaults.hackernews_item_url),
            feeds,
            limit_per_provider: parse_number("NEXUS_LIMIT_PER_PROVIDER", get("NEXUS_LIMIT_PER_PROVIDER"), defaults.limit_per_provider)?,
            aggregate_interval_secs: parse_number(
                "NEXUS_AGGREGATE_INTERVAL_SECS",
                get("NEXUS_AGGREGATE_INTERVAL_SECS"),
                defaults.aggregate_interval_secs,
            )?,
            retention_days: parse_number("NEXUS_RETENTION_DAYS", get("NEXUS_RETENTION_DAYS"), defaults.retention_days)?,
        };

        if settings.aggregate_interval_secs == 0 {
            return Err(AggregatorError::InvalidConfig(
                "NEXUS_AGGREGATE_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if settings.retention_days < 0 {
            return Err(AggregatorError::InvalidConfig(
                "NEXUS_RETENTION_DAYS must not be negative".to_string(),
            ));
        }
        let cutoff = Duration::try_days(settings.retention_days).and_then(|age| Utc::now().checked_sub_signed(age));
        if cutoff.is_none() {
            return Err(AggregatorError::InvalidConfig(format!(
                "NEXUS_RETENTION_DAYS is out of range: {}",
                settings.retention_days
            )));
        }

        Ok(settings)
    }

    /// The ranked-API provider first, then every configured feed.
    pub fn build_registry(&self, fetcher: &HttpFetcher) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();

        let hacker_news = HackerNewsProvider::new(fetcher.clone())
            .with_api_url(&self.hackernews_api_url)
            .with_item_page_url(&self.hackernews_item_url);
        registry.add_provider(Arc::new(hacker_news) as Arc<dyn Provider>);

        for feed in &self.feeds {
            let provider = RssFeedProvider::new(&feed.url, feed.name.as_deref(), fetcher.clone())?;
            registry.add_provider(Arc::new(provider) as Arc<dyn Provider>);
        }

        info!("Configured {} providers", registry.len());
        Ok(registry)
    }
}

fn parse_number<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| AggregatorError::InvalidConfig(format!("{} is not a valid number: {}", key, value))),
        None => Ok(default),
    }
}

/// Parse `url` or `url|name` entries separated by commas.
pub fn parse_feeds(raw: &str) -> Result<Vec<FeedSpec>> {
    let mut feeds = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (url, name) = match entry.split_once('|') {
            Some((url, name)) => (url.trim(), Some(name.trim()).filter(|n| !n.is_empty())),
            None => (entry, None),
        };

        let parsed = url::Url::parse(url)
            .map_err(|e| AggregatorError::InvalidConfig(format!("invalid feed url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AggregatorError::InvalidConfig(format!("feed url must be http(s): {}", url)));
        }

        feeds.push(FeedSpec::new(url, name));
    }

    Ok(feeds)
}
