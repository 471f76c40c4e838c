use crate::types::{CandidatePost, ProviderKind};
use async_trait::async_trait;

/// Result of one provider fetch.
///
/// Providers never return errors to the registry. `Failed` carries the reason
/// a whole fetch produced nothing so callers can tell it apart from a source
/// that simply had no items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(Vec<CandidatePost>),
    Failed(String),
}

impl FetchOutcome {
    pub fn into_posts(self) -> Vec<CandidatePost> {
        match self {
            FetchOutcome::Fetched(posts) => posts,
            FetchOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }
}

/// Contract for pulling candidate posts from one external source.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Grouping key in results and lookup key for single-source fetches.
    fn source_name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// API base URL or feed URL, reported in provider stats.
    fn endpoint(&self) -> &str;

    /// Fetch at most `limit` candidates. Individual bad items are dropped.
    async fn fetch(&self, limit: usize) -> FetchOutcome;

    /// Cheap liveness probe. Any failure answers `false`.
    async fn is_available(&self) -> bool;
}
