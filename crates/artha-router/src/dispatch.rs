//! Provider fetch coordination: rate limiting, retries, caching, isolation.
//!
//! The coordinator owns the only contact point with the external per-provider
//! adapters. Fetches to different providers run concurrently; fetches to the
//! same provider are serialized behind that provider's limiter and spaced by
//! its minimum inter-request interval. Transient failures retry with
//! exponential backoff up to a fixed attempt cap; terminal failures return
//! immediately. Every failure stays attached to its own indicator — one
//! exhausted series never aborts the rest of the query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::config::DispatchConfig;
use crate::error::{FetchError, IndicatorFailure};
use crate::types::{DateRange, ProviderId, ResolvedIndicator, TimeSeries};

/// External provider-fetch contract. Adapters translate their wire formats
/// into `TimeSeries` / `FetchError`; this crate never sees anything else.
#[async_trait]
pub trait ProviderFetch: Send + Sync {
    async fn fetch(
        &self,
        provider: ProviderId,
        code: &str,
        country: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<TimeSeries, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    provider: ProviderId,
    code: String,
    country: Option<String>,
    range: Option<DateRange>,
}

struct CachedSeries {
    series: TimeSeries,
    inserted: Instant,
}

/// One resolved indicator to fetch, tagged with its position in the query so
/// results can be reassembled in request order.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub slot: usize,
    pub resolved: ResolvedIndicator,
}

pub struct DispatchCoordinator {
    fetcher: Arc<dyn ProviderFetch>,
    config: DispatchConfig,
    cache: DashMap<FetchKey, CachedSeries>,
    limiters: DashMap<ProviderId, Arc<Mutex<Option<Instant>>>>,
}

impl DispatchCoordinator {
    pub fn new(fetcher: Arc<dyn ProviderFetch>, config: DispatchConfig) -> Self {
        Self {
            fetcher,
            config,
            cache: DashMap::new(),
            limiters: DashMap::new(),
        }
    }

    /// Fetch every job of one query. Returns one entry per job, in slot
    /// order, successes and failures side by side.
    pub async fn dispatch_all(
        &self,
        jobs: Vec<DispatchJob>,
        country: Option<&str>,
        range: Option<&DateRange>,
        deadline: Option<Instant>,
    ) -> Vec<(usize, Result<TimeSeries, IndicatorFailure>)> {
        let mut groups: HashMap<ProviderId, Vec<DispatchJob>> = HashMap::new();
        for job in jobs {
            groups.entry(job.resolved.provider).or_default().push(job);
        }

        let group_futures = groups.into_values().map(|group| async move {
            let mut results = Vec::with_capacity(group.len());
            for job in group {
                let result = self.fetch_one(&job.resolved, country, range, deadline).await;
                results.push((job.slot, result));
            }
            results
        });

        let mut results: Vec<(usize, Result<TimeSeries, IndicatorFailure>)> =
            join_all(group_futures).await.into_iter().flatten().collect();
        results.sort_by_key(|(slot, _)| *slot);
        results
    }

    async fn fetch_one(
        &self,
        resolved: &ResolvedIndicator,
        country: Option<&str>,
        range: Option<&DateRange>,
        deadline: Option<Instant>,
    ) -> Result<TimeSeries, IndicatorFailure> {
        let provider = resolved.provider;
        let key = FetchKey {
            provider,
            code: resolved.code.clone(),
            country: country.map(str::to_string),
            range: range.cloned(),
        };
        if let Some(series) = self.cache_get(&key) {
            tracing::debug!(provider = %provider, code = %resolved.code, "Fetch cache hit");
            return Ok(series);
        }

        // Serializes all fetches to this provider, across queries.
        let limiter = self
            .limiters
            .entry(provider)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut last_request = limiter.lock().await;

        let interval = self.min_interval(provider);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            if deadline_passed(deadline) {
                return Err(IndicatorFailure::Timeout);
            }
            if let Some(previous) = *last_request {
                let wait = interval.saturating_sub(previous.elapsed());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            *last_request = Some(Instant::now());

            let fetch = self.fetcher.fetch(provider, &resolved.code, country, range);
            let outcome = match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, fetch).await {
                        Ok(outcome) => outcome,
                        Err(_) => return Err(IndicatorFailure::Timeout),
                    }
                }
                None => fetch.await,
            };

            match outcome {
                Ok(series) => {
                    self.cache.insert(
                        key,
                        CachedSeries {
                            series: series.clone(),
                            inserted: Instant::now(),
                        },
                    );
                    return Ok(series);
                }
                Err(FetchError::NotFound) => {
                    return Err(IndicatorFailure::SeriesNotFound {
                        provider,
                        code: resolved.code.clone(),
                    });
                }
                Err(FetchError::UnsupportedRegion(detail)) => {
                    // Terminal classification, never retried.
                    return Err(IndicatorFailure::UnsupportedRegion { provider, detail });
                }
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        tracing::warn!(
                            provider = %provider,
                            code = %resolved.code,
                            attempts = attempt,
                            error = %e,
                            "Fetch retries exhausted"
                        );
                        return Err(IndicatorFailure::ProviderUnavailable {
                            provider,
                            attempts: attempt,
                        });
                    }
                    let backoff =
                        Duration::from_millis(self.config.backoff_base_ms) * 2u32.pow(attempt - 1);
                    tracing::debug!(
                        provider = %provider,
                        code = %resolved.code,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn min_interval(&self, provider: ProviderId) -> Duration {
        let ms = self
            .config
            .provider_min_interval_ms
            .get(&provider)
            .copied()
            .unwrap_or(self.config.default_min_interval_ms);
        Duration::from_millis(ms)
    }

    fn cache_get(&self, key: &FetchKey) -> Option<TimeSeries> {
        let ttl = Duration::from_secs(self.config.fetch_cache_ttl_secs);
        // The read guard must drop before the stale-entry removal below.
        let stale = match self.cache.get(key) {
            Some(entry) if entry.inserted.elapsed() < ttl => return Some(entry.series.clone()),
            Some(_) => true,
            None => false,
        };
        if stale {
            self.cache.remove(key);
        }
        None
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}
