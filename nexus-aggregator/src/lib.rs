pub mod types;
pub mod fetcher;
pub mod parser;
pub mod traits;
pub mod sources;
pub mod dedup;
pub mod registry;
pub mod store;
pub mod aggregator;
pub mod config;
pub mod scheduler;

pub use types::*;
pub use fetcher::HttpFetcher;
pub use traits::{FetchOutcome, Provider};
pub use sources::{HackerNewsProvider, RssFeedProvider};
pub use dedup::dedup_by_url;
pub use registry::ProviderRegistry;
pub use store::Database;
pub use aggregator::{Aggregator, GroupedPosts};
pub use config::{FeedSpec, Settings};
