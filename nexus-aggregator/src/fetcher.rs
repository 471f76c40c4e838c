use crate::types::{AggregatorError, FetchConfig, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared HTTP client for every provider.
///
/// Cloning is cheap: the underlying `reqwest::Client` keeps one connection
/// pool for the whole process.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    /// GET a document body, retrying failed attempts with exponential backoff.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get_with_retry(url).await?;
        let body = response.text().await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    /// GET and decode a JSON document, retrying like [`HttpFetcher::get_text`].
    pub async fn get_json_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get_with_retry(url).await?;
        Ok(response.json::<T>().await?)
    }

    /// Single-shot GET of a JSON document. Used for per-item fetches where a
    /// failure just drops the item.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        let response = ensure_success(response)?;
        Ok(response.json::<T>().await?)
    }

    /// True when a GET of `url` answers with a 2xx status.
    pub async fn get_ok(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("GET probe failed for {}: {}", url, e);
                false
            }
        }
    }

    /// Liveness probe: HEAD first, then a full GET when HEAD errors or is
    /// answered with a non-success status.
    pub async fn probe(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) => {
                debug!("HEAD {} answered {}, retrying with GET", url, response.status());
            }
            Err(e) => {
                debug!("HEAD {} failed: {}, retrying with GET", url, e);
            }
        }

        self.get_ok(url).await
    }

    async fn get_with_retry(&self, url: &str) -> Result<Response> {
        let start_time = Instant::now();
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: retry_delay,
            initial_interval: retry_delay,
            max_interval: retry_delay * 32,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let outcome = match self.client.get(url).send().await {
                Ok(response) => ensure_success(response),
                Err(e) => Err(AggregatorError::Http(e)),
            };

            match outcome {
                Ok(response) => {
                    debug!("GET {} succeeded after {:?}", url, start_time.elapsed());
                    return Ok(response);
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AggregatorError::General(format!("GET {} failed", url))))
    }
}

fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(status_error(status))
    }
}

fn status_error(status: StatusCode) -> AggregatorError {
    AggregatorError::General(format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    ))
}
