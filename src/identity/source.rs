// src/identity/source.rs
//
// Seam to the authoritative external movie/person database. The pipeline
// only ever issues read-only searches; what matters here is that transport
// failures stay distinguishable from "no result found" all the way up, so a
// rate-limited call can never downgrade a legitimate entity.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::time::Duration;

use crate::models::EntityKind;

/// What the authoritative source returned for a search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRecord {
    pub external_id: String,
    pub kind: EntityKind,
    pub canonical_name: String,
    /// Release year for movies, birth year for people.
    pub year: Option<i32>,
    /// Poster/still URLs hosted by the source's own CDN.
    #[serde(default)]
    pub imagery: Vec<String>,
}

/// Transport-level lookup failure. Never conflated with a "no result"
/// outcome, which is `Ok(None)`.
#[derive(Debug)]
pub enum LookupError {
    RateLimited { retry_after: Option<Duration> },
    Network(String),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited by source (retry after {:?})", d),
                None => write!(f, "rate limited by source"),
            },
            LookupError::Network(msg) => write!(f, "source lookup failed: {}", msg),
        }
    }
}

impl std::error::Error for LookupError {}

/// Read-only search against the authoritative source.
#[async_trait]
pub trait AuthoritativeSource: Send + Sync {
    /// `Ok(None)` means the source answered and found nothing; errors are
    /// strictly transport-level.
    async fn search(
        &self,
        name_or_title: &str,
        year: Option<i32>,
    ) -> Result<Option<SourceRecord>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SourceRecord>,
}

/// HTTP client for the real source API.
pub struct RemoteSourceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RemoteSourceClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build from `LOOKUP_API_BASE` / `LOOKUP_API_KEY`.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = env::var("LOOKUP_API_BASE")
            .map_err(|_| anyhow::anyhow!("LOOKUP_API_BASE must be set"))?;
        let api_key = env::var("LOOKUP_API_KEY").unwrap_or_default();
        Ok(Self::new(base_url, api_key))
    }
}

#[async_trait]
impl AuthoritativeSource for RemoteSourceClient {
    async fn search(
        &self,
        name_or_title: &str,
        year: Option<i32>,
    ) -> Result<Option<SourceRecord>, LookupError> {
        let mut request = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("query", name_or_title)])
            .timeout(Duration::from_secs(10));
        if let Some(y) = year {
            request = request.query(&[("year", y.to_string())]);
        }
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!("Source rate-limited lookup for {:?}", name_or_title);
            return Err(LookupError::RateLimited { retry_after });
        }
        if !response.status().is_success() {
            return Err(LookupError::Network(format!(
                "source returned HTTP {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;
        debug!(
            "Source search {:?} (year {:?}) -> {} results",
            name_or_title,
            year,
            body.results.len()
        );
        Ok(body.results.into_iter().next())
    }
}

/// Retry `search` with capped, jittered backoff on rate limits. Network
/// errors are retried the same way; exhausting the budget surfaces the last
/// error so the gate can report `LookupFailed`.
pub async fn search_with_backoff(
    source: &dyn AuthoritativeSource,
    name_or_title: &str,
    year: Option<i32>,
    max_retries: u32,
    base_delay: Duration,
) -> Result<Option<SourceRecord>, LookupError> {
    use rand::Rng;

    let mut attempt = 0u32;
    loop {
        match source.search(name_or_title, year).await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < max_retries => {
                let delay = match &err {
                    LookupError::RateLimited {
                        retry_after: Some(d),
                    } => *d,
                    _ => base_delay * 2u32.saturating_pow(attempt),
                };
                let jitter_ms = rand::thread_rng().gen_range(0..250);
                let delay = delay + Duration::from_millis(jitter_ms);
                debug!(
                    "Lookup retry {}/{} for {:?} after {:?}: {}",
                    attempt + 1,
                    max_retries,
                    name_or_title,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory source used by gate and audit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    pub struct StaticSource {
        records: HashMap<String, SourceRecord>,
        /// Number of leading calls that fail with a rate limit.
        pub rate_limited_calls: AtomicU32,
        pub calls: AtomicU32,
    }

    impl StaticSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_record(mut self, query_key: &str, record: SourceRecord) -> Self {
            self.records.insert(query_key.to_lowercase(), record);
            self
        }

        pub fn failing_first(self, n: u32) -> Self {
            self.rate_limited_calls.store(n, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl AuthoritativeSource for StaticSource {
        async fn search(
            &self,
            name_or_title: &str,
            _year: Option<i32>,
        ) -> Result<Option<SourceRecord>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.rate_limited_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rate_limited_calls.store(remaining - 1, Ordering::SeqCst);
                return Err(LookupError::RateLimited { retry_after: None });
            }
            Ok(self.records.get(&name_or_title.to_lowercase()).cloned())
        }
    }
}
