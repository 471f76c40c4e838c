use crate::registry::ProviderRegistry;
use crate::store;
use crate::types::{AggregatorError, PersistedPost, ProviderStats, Result};
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Posts persisted by one run, keyed by source name.
pub type GroupedPosts = BTreeMap<String, Vec<PersistedPost>>;

/// Runs fetch, merge and persist as one unit of work.
///
/// Writes go through the connection the caller passes in, normally an open
/// transaction. The caller commits once a run returns `Ok`. Only one run may
/// be active per aggregator; a second trigger gets `RunInProgress`.
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, including on early return.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Aggregator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn start_run(&self) -> Result<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AggregatorError::RunInProgress)?;
        Ok(RunGuard { running: &self.running })
    }

    /// Fetch from every available provider, persist the merged batch and
    /// group the stored rows by source.
    pub async fn aggregate_all(&self, conn: &mut SqliteConnection, limit_per_provider: usize) -> Result<GroupedPosts> {
        let _run = self.start_run()?;
        let run_id = Uuid::new_v4();
        info!("Aggregation run {} started (limit {} per provider)", run_id, limit_per_provider);

        let candidates = self.registry.fetch_all(limit_per_provider).await;
        if candidates.is_empty() {
            warn!("Aggregation run {} found no posts", run_id);
            return Ok(GroupedPosts::new());
        }

        let persisted = store::create_posts(conn, &candidates).await?;
        let grouped = group_by_source(persisted);

        info!(
            "Aggregation run {} finished: {} candidates, {} sources",
            run_id,
            candidates.len(),
            grouped.len()
        );
        Ok(grouped)
    }

    /// Same as `aggregate_all` for the first provider named `source_name`.
    /// An unknown or unavailable source yields an empty list.
    pub async fn aggregate_from_source(
        &self,
        conn: &mut SqliteConnection,
        source_name: &str,
        limit: usize,
    ) -> Result<Vec<PersistedPost>> {
        let _run = self.start_run()?;
        let run_id = Uuid::new_v4();
        info!("Aggregation run {} started for {} (limit {})", run_id, source_name, limit);

        let candidates = self.registry.fetch_from_source(source_name, limit).await;
        if candidates.is_empty() {
            warn!("Aggregation run {} found no posts from {}", run_id, source_name);
            return Ok(Vec::new());
        }

        let persisted = store::create_posts(conn, &candidates).await?;
        info!("Aggregation run {} stored {} posts from {}", run_id, persisted.len(), source_name);
        Ok(persisted)
    }

    pub async fn provider_stats(&self) -> BTreeMap<String, ProviderStats> {
        self.registry.stats().await
    }
}

fn group_by_source(posts: Vec<PersistedPost>) -> GroupedPosts {
    let mut grouped = GroupedPosts::new();
    for post in posts {
        grouped.entry(post.source.clone()).or_default().push(post);
    }
    grouped
}
