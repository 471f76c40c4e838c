use anyhow::Context;
use clap::{Parser, Subcommand};
use nexus_aggregator::scheduler::{self, SchedulerCfg};
use nexus_aggregator::store;
use nexus_aggregator::{Aggregator, AggregatorError, Database, FetchConfig, HttpFetcher, PostFilter, Settings};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Aggregates posts from Hacker News and RSS/Atom feeds into SQLite.
///
/// Settings come from environment variables (`DATABASE_URL`, `NEXUS_FEEDS`,
/// `NEXUS_LIMIT_PER_PROVIDER`, ...). Command flags override them.
#[derive(Parser)]
#[command(name = "nexus-aggregator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch from every available provider and store the merged batch.
    Aggregate {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fetch from a single provider by source name.
    AggregateSource {
        name: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show each provider's kind, endpoint and current availability.
    Providers,

    /// List stored posts, newest first.
    Posts {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        size: u32,

        #[arg(long)]
        source: Option<String>,

        /// Case-insensitive match on title or url.
        #[arg(long)]
        search: Option<String>,

        /// Print per-source totals instead of posts.
        #[arg(long)]
        stats: bool,
    },

    /// Delete posts published more than `days` ago.
    Purge {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Aggregate on a fixed interval until Ctrl-C.
    Watch {
        /// Seconds between runs.
        #[arg(long)]
        interval: Option<u64>,

        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("Failed to load settings")?;

    info!("Starting Nexus Aggregator");
    info!("Connecting to database: {}", settings.database_url);

    let db = Database::connect(&settings.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", settings.database_url))?;
    db.setup_schema().await.context("Failed to create schema")?;

    let fetcher = HttpFetcher::new(FetchConfig::default()).context("Failed to build HTTP client")?;
    let registry = settings.build_registry(&fetcher).context("Failed to configure providers")?;
    let aggregator = Aggregator::new(Arc::new(registry));

    match cli.command {
        Commands::Aggregate { limit } => {
            let limit = limit.unwrap_or(settings.limit_per_provider);
            let grouped = scheduler::run_once(&aggregator, &db, limit).await?;
            print_json(&grouped)?;
        }
        Commands::AggregateSource { name, limit } => {
            if aggregator.registry().find(&name).is_none() {
                return Err(AggregatorError::ProviderNotFound { source_name: name }.into());
            }

            let limit = limit.unwrap_or(settings.limit_per_provider);
            let mut tx = db.begin().await?;
            let posts = aggregator.aggregate_from_source(&mut tx, &name, limit).await?;
            tx.commit().await?;
            print_json(&posts)?;
        }
        Commands::Providers => {
            print_json(&aggregator.provider_stats().await)?;
        }
        Commands::Posts {
            page,
            size,
            source,
            search,
            stats,
        } => {
            let mut conn = db.pool().acquire().await?;
            if stats {
                print_json(&store::source_stats(&mut conn).await?)?;
            } else {
                let filter = PostFilter { source, search };
                print_json(&store::list_posts(&mut conn, page, size, &filter).await?)?;
            }
        }
        Commands::Purge { days } => {
            let days = days.unwrap_or(settings.retention_days);
            anyhow::ensure!(days >= 0, "--days must not be negative");
            let max_age = chrono::Duration::try_days(days).context("--days is out of range")?;

            let mut tx = db.begin().await?;
            let deleted = store::delete_older_than(&mut tx, max_age).await?;
            tx.commit().await?;
            print_json(&serde_json::json!({ "deleted": deleted, "days": days }))?;
        }
        Commands::Watch { interval, limit } => {
            let cfg = SchedulerCfg {
                interval_secs: interval.unwrap_or(settings.aggregate_interval_secs),
                limit_per_provider: limit.unwrap_or(settings.limit_per_provider),
            };
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            let runs = scheduler::run_periodic(&aggregator, &db, cfg, shutdown).await;
            info!("Watch finished after {} runs", runs);
        }
    }

    db.close().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
