use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post fetched from a source, not yet deduplicated or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePost {
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
}

impl CandidatePost {
    /// Builds a candidate, rejecting empty titles and anything that is not an
    /// absolute http(s) URL.
    pub fn new(title: &str, url: &str, source: &str, published_at: DateTime<Utc>) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AggregatorError::Parse("empty title".to_string()));
        }

        let url = url.trim();
        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(AggregatorError::Parse(format!("not an http(s) url: {}", url)));
        }

        Ok(Self {
            title: title.to_string(),
            url: url.to_string(),
            source: source.to_string(),
            published_at,
        })
    }
}

/// A durable row in the `posts` table, unique by url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersistedPost {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    RankedApi,
    SyndicatedFeed,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::RankedApi => write!(f, "ranked_api"),
            ProviderKind::SyndicatedFeed => write!(f, "syndicated_feed"),
        }
    }
}

/// Configuration and liveness snapshot for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub kind: ProviderKind,
    pub endpoint: String,
    pub available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub source: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostPage {
    pub posts: Vec<PersistedPost>,
    pub total: i64,
    pub page: u32,
    pub size: usize,
    pub pages: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct SourceStats {
    pub source: String,
    pub total_posts: i64,
    pub latest_post: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Nexus-Aggregator/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_ms: 500,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No provider configured for source: {source_name}")]
    ProviderNotFound { source_name: String },

    #[error("An aggregation run is already in progress")]
    RunInProgress,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
