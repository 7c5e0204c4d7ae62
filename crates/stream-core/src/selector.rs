//! Picks the first working candidate from a priority-ordered list.
//!
//! Candidates are probed in batches of `max_concurrent_tests`; every probe in
//! a batch is in flight at once and the batch is awaited as a group.  The
//! winner is the first valid candidate in list order, so priority is honoured
//! even though completion order inside a batch is arbitrary.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cache::TestResultCache;
use crate::probe::{ProbeError, StreamProber, TestResult};
use crate::sources::FallbackCandidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorOptions {
    pub max_concurrent_tests: usize,
    pub test_timeout_ms: u64,
    /// Informational; the selector itself never retries within a pass.
    pub max_retries: u32,
    pub retry_cooldown_ms: u64,
    pub enable_caching: bool,
    pub cache_duration_ms: u64,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tests: 3,
            test_timeout_ms: 10_000,
            max_retries: 3,
            retry_cooldown_ms: 60_000,
            enable_caching: true,
            cache_duration_ms: 300_000,
        }
    }
}

impl SelectorOptions {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.enable_caching
            .then(|| Duration::from_millis(self.cache_duration_ms))
    }

    fn batch_size(&self) -> usize {
        self.max_concurrent_tests.max(1)
    }
}

/// A candidate that failed recently is skipped until the cooldown passes.
pub fn in_cooldown(candidate: &FallbackCandidate, now: DateTime<Utc>, cooldown_ms: u64) -> bool {
    if candidate.consecutive_failures == 0 {
        return false;
    }
    match candidate.last_tested_at {
        Some(at) => (now - at).num_milliseconds() < cooldown_ms as i64,
        None => false,
    }
}

pub struct FallbackSelector {
    prober: Arc<dyn StreamProber>,
    cache: Arc<TestResultCache>,
}

impl FallbackSelector {
    pub fn new(prober: Arc<dyn StreamProber>, cache: Arc<TestResultCache>) -> Self {
        Self { prober, cache }
    }

    pub fn cache(&self) -> &Arc<TestResultCache> {
        &self.cache
    }

    /// Probe `candidates` in priority order and return the first that passes.
    /// Candidate bookkeeping (`consecutive_failures`, `last_tested_at`,
    /// `last_result`) is updated in place for every probed entry.
    pub async fn test_fallback_urls(
        &self,
        candidates: &mut [FallbackCandidate],
        options: &SelectorOptions,
    ) -> Option<FallbackCandidate> {
        let now = Utc::now();
        let eligible: Vec<usize> = (0..candidates.len())
            .filter(|&i| !in_cooldown(&candidates[i], now, options.retry_cooldown_ms))
            .collect();

        if eligible.is_empty() {
            debug!(
                "selector: no eligible candidates ({} in cooldown)",
                candidates.len()
            );
            return None;
        }

        for batch in eligible.chunks(options.batch_size()) {
            let urls: Vec<String> = batch.iter().map(|&i| candidates[i].url.clone()).collect();
            let results = self
                .probe_batch(&urls, options.test_timeout(), options.cache_ttl())
                .await;

            let tested_at = Utc::now();
            let mut winner = None;
            for (&idx, result) in batch.iter().zip(results) {
                let valid = result.is_valid;
                candidates[idx].record_result(result, tested_at);
                if valid && winner.is_none() {
                    winner = Some(idx);
                }
            }

            if let Some(idx) = winner {
                debug!(
                    "selector: picked {} (priority {})",
                    candidates[idx].url, candidates[idx].priority
                );
                return Some(candidates[idx].clone());
            }
        }

        debug!("selector: no candidate passed");
        None
    }

    /// Probe every URL, `batch_size` at a time, without short-circuiting.
    /// Results come back in input order.
    pub async fn probe_batched(
        &self,
        urls: &[String],
        batch_size: usize,
        timeout: Duration,
        cache_ttl: Option<Duration>,
    ) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(urls.len());
        for batch in urls.chunks(batch_size.max(1)) {
            results.extend(self.probe_batch(batch, timeout, cache_ttl).await);
        }
        results
    }

    async fn probe_batch(
        &self,
        urls: &[String],
        timeout: Duration,
        cache_ttl: Option<Duration>,
    ) -> Vec<TestResult> {
        join_all(urls.iter().map(|url| self.check_url(url, timeout, cache_ttl))).await
    }

    async fn check_url(&self, url: &str, timeout: Duration, cache_ttl: Option<Duration>) -> TestResult {
        if let Some(ttl) = cache_ttl {
            if let Some(hit) = self.cache.get(url, ttl) {
                debug!("selector: cache hit for {}", url);
                return hit;
            }
        }
        let probe = AssertUnwindSafe(self.prober.test_stream_connection(url, timeout));
        let result = match probe.catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                // Not cached: the next pass probes this URL again
                error!("selector: probe of {} panicked", url);
                return TestResult::failed(&ProbeError::Request("probe panicked".into()), None);
            }
        };
        if cache_ttl.is_some() {
            self.cache.insert(url, result.clone());
        }
        result
    }
}
