//! Entry points the streaming layer calls: pick a URL, rotate away from a
//! dead one, bulk-validate the candidate list.
//!
//! `FallbackManager` owns everything that used to be process-wide state:
//! the probe cache and the rotation state.  Rotations are serialized by a
//! separate gate; the state lock itself is only held between probes, so
//! readers never wait on the network.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TestResultCache};
use crate::probe::{StreamProber, TestResult};
use crate::rotation::RotationState;
use crate::selector::{FallbackSelector, SelectorOptions};
use crate::sources::{collect_fallback_urls, FallbackCandidate, SourceConfig};
use crate::store::SettingsStore;

#[derive(Debug, Clone, Serialize)]
pub struct CandidateValidation {
    pub candidate: FallbackCandidate,
    pub result: TestResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub results: Vec<CandidateValidation>,
}

pub struct FallbackManager {
    sources: SourceConfig,
    options: SelectorOptions,
    store: Arc<dyn SettingsStore>,
    selector: FallbackSelector,
    rotation_gate: Mutex<()>,
    rotation: Mutex<RotationState>,
}

impl FallbackManager {
    pub fn new(
        sources: SourceConfig,
        options: SelectorOptions,
        store: Arc<dyn SettingsStore>,
        prober: Arc<dyn StreamProber>,
    ) -> Self {
        let cache = Arc::new(TestResultCache::new());
        Self {
            sources,
            options,
            store,
            selector: FallbackSelector::new(prober, cache),
            rotation_gate: Mutex::new(()),
            rotation: Mutex::new(RotationState::default()),
        }
    }

    pub fn sources(&self) -> &SourceConfig {
        &self.sources
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    pub fn selector(&self) -> &FallbackSelector {
        &self.selector
    }

    pub async fn get_fallback_urls(&self) -> Vec<FallbackCandidate> {
        collect_fallback_urls(&self.sources, self.store.as_ref()).await
    }

    pub async fn test_fallback_urls(
        &self,
        candidates: &mut [FallbackCandidate],
        options: Option<&SelectorOptions>,
    ) -> Option<FallbackCandidate> {
        self.selector
            .test_fallback_urls(candidates, options.unwrap_or(&self.options))
            .await
    }

    /// Best URL right now.  When nothing passes, the highest-priority
    /// candidate is returned anyway: a possibly-dead URL beats none.
    pub async fn get_fallback_url(&self, options: Option<&SelectorOptions>) -> Option<String> {
        let mut candidates = self.get_fallback_urls().await;
        if candidates.is_empty() {
            return None;
        }
        if let Some(winner) = self.test_fallback_urls(&mut candidates, options).await {
            return Some(winner.url);
        }
        warn!(
            "fallback: no candidate passed, returning {} untested",
            candidates[0].url
        );
        Some(candidates[0].url.clone())
    }

    /// Called when a live session finds `failed_url` dead.  Returns the next
    /// working URL, or `None` when every candidate has been tried.
    pub async fn rotate_to_next_fallback(
        &self,
        failed_url: &str,
        options: Option<&SelectorOptions>,
    ) -> Option<String> {
        let _gate = self.rotation_gate.lock().await;
        let excluded = {
            let mut rotation = self.rotation.lock().await;
            rotation.record_failure(failed_url, Utc::now());
            warn!(
                "fallback: rotating away from {} (rotation #{})",
                failed_url, rotation.rotation_count
            );
            rotation.failed_urls.clone()
        };

        let candidates = self.get_fallback_urls().await;
        let mut remaining: Vec<(usize, FallbackCandidate)> = candidates
            .iter()
            .cloned()
            .enumerate()
            .filter(|(_, c)| c.url != failed_url && !excluded.contains(&c.url))
            .collect();

        let exhausted = remaining.is_empty();
        if exhausted {
            warn!("fallback: all fallbacks exhausted, starting a new rotation cycle");
            remaining = candidates
                .into_iter()
                .enumerate()
                .filter(|(_, c)| c.url != failed_url)
                .collect();
        }

        let (indices, mut pool): (Vec<usize>, Vec<FallbackCandidate>) = remaining.into_iter().unzip();
        let winner = self.test_fallback_urls(&mut pool, options).await;

        let mut rotation = self.rotation.lock().await;
        if exhausted {
            rotation.clear_failures();
        }
        let winner = winner?;
        let index = pool
            .iter()
            .position(|c| c.url == winner.url)
            .map(|i| indices[i])
            .unwrap_or_default();

        rotation.activate(&winner.url, index);
        info!(
            "fallback: now using {} (priority {})",
            winner.url, winner.priority
        );
        Some(winner.url)
    }

    pub async fn rotation_state(&self) -> RotationState {
        self.rotation.lock().await.clone()
    }

    pub async fn reset_rotation_state(&self) {
        self.rotation.lock().await.reset();
        info!("fallback: rotation state reset");
    }

    /// Make a recovered URL eligible for rotation again.
    pub async fn forget_failure(&self, url: &str) -> bool {
        let removed = self.rotation.lock().await.forget_failure(url);
        if removed {
            debug!("fallback: {} removed from failed set", url);
        }
        removed
    }

    /// Probe every candidate (no cooldown, no short-circuit).
    pub async fn validate_all_fallback_urls(
        &self,
        options: Option<&SelectorOptions>,
    ) -> ValidationReport {
        let options = options.unwrap_or(&self.options);
        let candidates = self.get_fallback_urls().await;
        let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
        let results = self
            .selector
            .probe_batched(
                &urls,
                options.max_concurrent_tests,
                options.test_timeout(),
                options.cache_ttl(),
            )
            .await;

        let tested_at = Utc::now();
        let results: Vec<CandidateValidation> = candidates
            .into_iter()
            .zip(results)
            .map(|(mut candidate, result)| {
                candidate.record_result(result.clone(), tested_at);
                CandidateValidation { candidate, result }
            })
            .collect();

        let valid = results.iter().filter(|r| r.result.is_valid).count();
        info!(
            "fallback: validated {} candidates, {} valid",
            results.len(),
            valid
        );
        ValidationReport {
            total: results.len(),
            valid,
            invalid: results.len() - valid,
            results,
        }
    }

    pub fn clear_test_cache(&self) {
        self.selector.cache().clear();
        debug!("fallback: test cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.selector.cache().stats(self.cache_duration())
    }

    /// Drop probe results older than the configured cache duration.
    pub fn purge_test_cache(&self) -> usize {
        let purged = self.selector.cache().purge_expired(self.cache_duration());
        if purged > 0 {
            debug!("fallback: purged {} expired probe results", purged);
        }
        purged
    }

    fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.options.cache_duration_ms)
    }
}
