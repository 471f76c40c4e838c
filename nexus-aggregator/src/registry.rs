use crate::dedup::dedup_by_url;
use crate::traits::{FetchOutcome, Provider};
use crate::types::{CandidatePost, ProviderStats};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The configured providers plus the concurrent probe/fetch fan-out.
///
/// Probes and fetches run as separate tokio tasks, so a provider that panics
/// is isolated the same way as one that reports a failure.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_providers(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// Register a provider unless this exact instance is already present.
    pub fn add_provider(&mut self, provider: Arc<dyn Provider>) {
        if self.providers.iter().any(|p| Arc::ptr_eq(p, &provider)) {
            debug!("Provider {} already registered", provider.source_name());
            return;
        }
        self.providers.push(provider);
    }

    /// Remove the first provider registered under `source_name`.
    pub fn remove_provider(&mut self, source_name: &str) -> Option<Arc<dyn Provider>> {
        let index = self.providers.iter().position(|p| p.source_name() == source_name)?;
        Some(self.providers.remove(index))
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn find(&self, source_name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .iter()
            .find(|p| p.source_name() == source_name)
            .cloned()
    }

    /// Probe every provider concurrently and keep the ones that answered,
    /// in configuration order.
    pub async fn available_providers(&self) -> Vec<Arc<dyn Provider>> {
        let probes = self.providers.iter().map(|provider| {
            let provider = Arc::clone(provider);
            tokio::spawn(async move { provider.is_available().await })
        });
        let results = join_all(probes).await;

        self.providers
            .iter()
            .zip(results)
            .filter_map(|(provider, result)| match result {
                Ok(true) => Some(Arc::clone(provider)),
                Ok(false) => {
                    debug!("Provider {} is unavailable", provider.source_name());
                    None
                }
                Err(e) => {
                    warn!("Availability probe for {} failed: {}", provider.source_name(), e);
                    None
                }
            })
            .collect()
    }

    /// Fetch from every available provider concurrently and merge the
    /// results by url.
    pub async fn fetch_all(&self, limit_per_provider: usize) -> Vec<CandidatePost> {
        let available = self.available_providers().await;
        if available.is_empty() {
            warn!("No providers available");
            return Vec::new();
        }

        info!("Found {} available providers", available.len());

        let fetches = available.iter().map(|provider| {
            let provider = Arc::clone(provider);
            tokio::spawn(async move { provider.fetch(limit_per_provider).await })
        });
        let results = join_all(fetches).await;

        let mut all_posts = Vec::new();
        for (provider, result) in available.iter().zip(results) {
            match result {
                Ok(FetchOutcome::Fetched(posts)) => {
                    info!("Received {} posts from {}", posts.len(), provider.source_name());
                    all_posts.extend(posts);
                }
                Ok(FetchOutcome::Failed(reason)) => {
                    warn!("Fetch from {} failed: {}", provider.source_name(), reason);
                }
                Err(e) => {
                    error!("Fetch task for {} aborted: {}", provider.source_name(), e);
                }
            }
        }

        let total = all_posts.len();
        let unique = dedup_by_url(all_posts);
        info!("Fetched {} posts in total, {} unique", total, unique.len());
        unique
    }

    /// Fetch from the first provider named `source_name`, if it is up. The
    /// probe and the fetch run as tasks, isolated like `fetch_all`.
    pub async fn fetch_from_source(&self, source_name: &str, limit: usize) -> Vec<CandidatePost> {
        let provider = match self.find(source_name) {
            Some(provider) => provider,
            None => {
                warn!("No provider configured for source '{}'", source_name);
                return Vec::new();
            }
        };

        let probe = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.is_available().await })
        };
        match probe.await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Provider '{}' is unavailable", source_name);
                return Vec::new();
            }
            Err(e) => {
                warn!("Availability probe for {} failed: {}", source_name, e);
                return Vec::new();
            }
        }

        let fetch = tokio::spawn(async move { provider.fetch(limit).await });
        match fetch.await {
            Ok(FetchOutcome::Fetched(posts)) => posts,
            Ok(FetchOutcome::Failed(reason)) => {
                warn!("Fetch from {} failed: {}", source_name, reason);
                Vec::new()
            }
            Err(e) => {
                error!("Fetch task for {} aborted: {}", source_name, e);
                Vec::new()
            }
        }
    }

    /// Configuration plus a fresh liveness probe for every provider.
    pub async fn stats(&self) -> BTreeMap<String, ProviderStats> {
        let available = self.available_providers().await;

        let mut stats = BTreeMap::new();
        for provider in &self.providers {
            stats.entry(provider.source_name().to_string()).or_insert_with(|| ProviderStats {
                kind: provider.kind(),
                endpoint: provider.endpoint().to_string(),
                available: available.iter().any(|p| Arc::ptr_eq(p, provider)),
            });
        }
        stats
    }
}
