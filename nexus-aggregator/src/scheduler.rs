use crate::aggregator::{Aggregator, GroupedPosts};
use crate::store::Database;
use crate::types::{AggregatorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
    pub limit_per_provider: usize,
}

/// One aggregation run in its own transaction, committed on success.
pub async fn run_once(aggregator: &Aggregator, db: &Database, limit_per_provider: usize) -> Result<GroupedPosts> {
    let mut tx = db.begin().await?;
    let grouped = aggregator.aggregate_all(&mut tx, limit_per_provider).await?;
    tx.commit().await?;
    Ok(grouped)
}

/// Run an aggregation on every tick until `shutdown` resolves. The first
/// tick fires immediately. Failed runs are logged and the loop continues.
pub async fn run_periodic<S>(aggregator: &Aggregator, db: &Database, cfg: SchedulerCfg, shutdown: S) -> u64
where
    S: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut runs = 0u64;
    info!("Scheduler started, aggregating every {}s", cfg.interval_secs);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Scheduler stopping after {} runs", runs);
                return runs;
            }
            _ = ticker.tick() => {
                runs += 1;
                match run_once(aggregator, db, cfg.limit_per_provider).await {
                    Ok(grouped) => {
                        let stored: usize = grouped.values().map(Vec::len).sum();
                        info!("Scheduled run {} stored {} posts across {} sources", runs, stored, grouped.len());
                    }
                    Err(AggregatorError::RunInProgress) => {
                        warn!("Scheduled run {} skipped, another run is active", runs);
                    }
                    Err(e) => {
                        error!("Scheduled run {} failed: {}", runs, e);
                    }
                }
            }
        }
    }
}
