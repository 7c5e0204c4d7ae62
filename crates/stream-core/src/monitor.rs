//! Recurring stream health checks with automatic failover.
//!
//! ```text
//!   Stopped ──start_health_monitoring──▶ Running ──stop_health_monitoring──▶ Stopped
//!                 │                          │
//!                 └─ immediate check         └─ check every `check_interval_ms`
//! ```
//!
//! Each check probes the persisted primary plus every aggregated fallback,
//! derives the overall status, updates counters and statistics, and may
//! rotate away from a dead primary.  A probe that panics counts as a failed
//! probe for its URL; any other failing or panicking check is logged and the
//! timer keeps running.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStats;
use crate::error::{ContextDetails, ErrorMetadata, RadioError, RadioErrorHandler, RadioErrorKind};
use crate::events::{EventBus, EventPayload, EventPriority, StreamEvent};
use crate::fallback::FallbackManager;
use crate::health::{
    analyze_overall_health, generate_recommendations, HealthCheckResult, HealthStatus,
    RecommendationInputs, SystemHealthStatus,
};
use crate::rotation::RotationState;
use crate::sources::CandidateSource;
use crate::store::StoreError;

/// Snapshots kept for the dashboard.
pub const HISTORY_LIMIT: usize = 50;

const EVENT_SOURCE: &str = "health-monitor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub max_concurrent_checks: usize,
    pub enable_auto_failover: bool,
    pub failover_cooldown_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 60_000,
            connection_timeout_ms: 10_000,
            failure_threshold: 3,
            recovery_threshold: 2,
            max_concurrent_checks: 3,
            enable_auto_failover: true,
            failover_cooldown_ms: 300_000,
        }
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Partial config supplied when starting the monitor; unset fields keep the
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfigPatch {
    pub check_interval_ms: Option<u64>,
    pub connection_timeout_ms: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub recovery_threshold: Option<u32>,
    pub max_concurrent_checks: Option<usize>,
    pub enable_auto_failover: Option<bool>,
    pub failover_cooldown_ms: Option<u64>,
}

impl MonitorConfigPatch {
    pub fn apply(&self, base: &MonitorConfig) -> MonitorConfig {
        MonitorConfig {
            check_interval_ms: self.check_interval_ms.unwrap_or(base.check_interval_ms),
            connection_timeout_ms: self.connection_timeout_ms.unwrap_or(base.connection_timeout_ms),
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            recovery_threshold: self.recovery_threshold.unwrap_or(base.recovery_threshold),
            max_concurrent_checks: self.max_concurrent_checks.unwrap_or(base.max_concurrent_checks),
            enable_auto_failover: self.enable_auto_failover.unwrap_or(base.enable_auto_failover),
            failover_cooldown_ms: self.failover_cooldown_ms.unwrap_or(base.failover_cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: SystemHealthStatus,
    pub history: Vec<SystemHealthStatus>,
    pub config: MonitorConfig,
    pub is_running: bool,
    pub recommendations: Vec<String>,
    pub rotation: RotationState,
    pub cache: CacheStats,
}

struct MonitorState {
    config: MonitorConfig,
    status: SystemHealthStatus,
    history: VecDeque<SystemHealthStatus>,
}

struct MonitorInner {
    fallback: Arc<FallbackManager>,
    events: EventBus,
    defaults: MonitorConfig,
    state: Mutex<MonitorState>,
    running: Mutex<Option<CancellationToken>>,
    /// Serialises checks so counters are updated by one check at a time.
    check_gate: tokio::sync::Mutex<()>,
}

struct CheckTarget {
    url: String,
    is_fallback: bool,
    priority: u32,
    source: CandidateSource,
}

/// Cheap to clone; clones share the same monitor.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn cooldown_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown_ms: u64) -> bool {
    match last {
        None => true,
        Some(at) => (now - at).num_milliseconds() >= cooldown_ms as i64,
    }
}

impl HealthMonitor {
    pub fn new(fallback: Arc<FallbackManager>, events: EventBus, defaults: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                fallback,
                events,
                state: Mutex::new(MonitorState {
                    config: defaults.clone(),
                    status: SystemHealthStatus::default(),
                    history: VecDeque::with_capacity(HISTORY_LIMIT),
                }),
                defaults,
                running: Mutex::new(None),
                check_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn fallback(&self) -> &Arc<FallbackManager> {
        &self.inner.fallback
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some()
    }

    pub fn config(&self) -> MonitorConfig {
        lock(&self.inner.state).config.clone()
    }

    /// Start the recurring check.  Returns `false` (and changes nothing)
    /// when already running.
    pub async fn start_health_monitoring(&self, overrides: Option<MonitorConfigPatch>) -> bool {
        let cancel = {
            let mut running = lock(&self.inner.running);
            if running.is_some() {
                warn!("monitor: start requested but monitoring is already running");
                return false;
            }
            let token = CancellationToken::new();
            *running = Some(token.clone());
            token
        };

        let config = overrides.unwrap_or_default().apply(&self.inner.defaults);
        let period = config.check_interval();
        info!(
            "monitor: starting, interval={}ms timeout={}ms failure_threshold={} auto_failover={}",
            config.check_interval_ms,
            config.connection_timeout_ms,
            config.failure_threshold,
            config.enable_auto_failover
        );
        lock(&self.inner.state).config = config;

        self.inner.events.safe_broadcast(StreamEvent::MonitoringStarted {
            payload: EventPayload::new("health monitoring started", EventPriority::Low, EVENT_SOURCE),
        });

        self.run_tick().await;
        tokio::spawn(self.clone().run_timer(cancel, period));
        true
    }

    /// Stop the recurring check.  Returns `false` when it was not running.
    pub fn stop_health_monitoring(&self) -> bool {
        let Some(token) = lock(&self.inner.running).take() else {
            warn!("monitor: stop requested but monitoring is not running");
            return false;
        };
        token.cancel();
        info!("monitor: stopped");
        self.inner.events.safe_broadcast(StreamEvent::MonitoringStopped {
            payload: EventPayload::new("health monitoring stopped", EventPriority::Normal, EVENT_SOURCE),
        });
        true
    }

    async fn run_timer(self, cancel: CancellationToken, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_tick().await,
            }
        }
        debug!("monitor: timer exited");
    }

    /// One timer tick, isolated in its own task so a panic cannot take the
    /// timer down.
    async fn run_tick(&self) {
        let monitor = self.clone();
        match tokio::spawn(async move { monitor.perform_health_check().await }).await {
            Ok(status) => debug!("monitor: tick done, overall={}", status.overall_status),
            Err(e) => {
                let err = RadioErrorHandler::create_error(
                    RadioErrorKind::HealthCheckFailed,
                    "health_monitor_tick",
                    Some(&e),
                    ContextDetails::default(),
                );
                error!("monitor: tick aborted, timer stays armed: {}", err);
            }
        }
    }

    /// Run one check now.  Never fails: an error while checking yields a
    /// `critical` status.
    pub async fn perform_health_check(&self) -> SystemHealthStatus {
        let _gate = self.inner.check_gate.lock().await;
        match self.try_health_check().await {
            Ok(status) => status,
            Err(e) => {
                let err = RadioErrorHandler::analyze_error(
                    &e,
                    "perform_health_check",
                    ContextDetails::default(),
                );
                self.record_failed_check(&err)
            }
        }
    }

    pub async fn force_health_check(&self) -> SystemHealthStatus {
        info!("monitor: forced health check");
        self.perform_health_check().await
    }

    pub fn get_health_status(&self) -> SystemHealthStatus {
        lock(&self.inner.state).status.clone()
    }

    pub async fn get_health_report(&self) -> HealthReport {
        let (status, history, config) = {
            let state = lock(&self.inner.state);
            (
                state.status.clone(),
                state.history.iter().cloned().collect::<Vec<_>>(),
                state.config.clone(),
            )
        };
        HealthReport {
            recommendations: status.recommendations.clone(),
            status,
            history,
            config,
            is_running: self.is_running(),
            rotation: self.inner.fallback.rotation_state().await,
            cache: self.inner.fallback.cache_stats(),
        }
    }

    pub fn reset_health_status(&self) {
        let mut state = lock(&self.inner.state);
        state.status = SystemHealthStatus::default();
        state.history.clear();
        info!("monitor: health status reset");
    }

    async fn try_health_check(&self) -> Result<SystemHealthStatus, StoreError> {
        let config = self.config();
        let fallback = &self.inner.fallback;
        fallback.purge_test_cache();

        let primary_url = fallback
            .store()
            .active_settings()
            .await?
            .map(|s| s.stream_url.trim().to_string())
            .filter(|u| !u.is_empty());
        let candidates = fallback.get_fallback_urls().await;

        let mut targets = Vec::with_capacity(candidates.len() + 1);
        if let Some(url) = &primary_url {
            targets.push(CheckTarget {
                url: url.clone(),
                is_fallback: false,
                priority: 0,
                source: CandidateSource::Database,
            });
        }
        for c in &candidates {
            if primary_url.as_deref() == Some(c.url.as_str()) {
                continue;
            }
            targets.push(CheckTarget {
                url: c.url.clone(),
                is_fallback: true,
                priority: c.priority,
                source: c.source,
            });
        }

        let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();
        let probes = fallback
            .selector()
            .probe_batched(&urls, config.max_concurrent_checks, config.connection_timeout(), None)
            .await;
        let results: Vec<HealthCheckResult> = targets
            .into_iter()
            .zip(probes)
            .map(|(t, r)| HealthCheckResult::from_probe(&t.url, r, t.is_fallback, t.priority, t.source))
            .collect();

        let now = Utc::now();
        let overall = analyze_overall_health(&results);
        let primary = results.iter().find(|r| !r.is_fallback).cloned();
        let active_fallback = results
            .iter()
            .find(|r| r.is_fallback && r.is_healthy())
            .cloned();
        let success = match &primary {
            Some(p) => p.is_healthy(),
            None => active_fallback.is_some(),
        };
        let failed_count = results.iter().filter(|r| !r.is_healthy()).count();

        let previous = self.get_health_status();
        let mut next = SystemHealthStatus {
            overall_status: overall,
            timestamp: Some(now),
            primary_url: primary.clone(),
            active_fallback,
            consecutive_failures: if success { 0 } else { previous.consecutive_failures + 1 },
            consecutive_successes: if success { previous.consecutive_successes + 1 } else { 0 },
            last_working_url: results
                .iter()
                .find(|r| r.is_healthy())
                .map(|r| r.url.clone())
                .or(previous.last_working_url.clone()),
            last_failover: previous.last_failover,
            total_failovers: previous.total_failovers,
            statistics: previous.statistics.clone(),
            available_urls: results,
            recommendations: Vec::new(),
        };
        next.statistics.record_check(success);
        for r in next.available_urls.iter().filter(|r| r.is_healthy()) {
            if let Some(ms) = r.response_time_ms {
                next.statistics.record_response_time(ms);
            }
        }

        if let Some(p) = &primary {
            if p.is_healthy()
                && next.last_failover.is_some()
                && next.consecutive_successes == config.recovery_threshold
            {
                info!(
                    "monitor: primary {} recovered after {} healthy checks",
                    p.url, next.consecutive_successes
                );
                fallback.forget_failure(&p.url).await;
            }

            if !p.is_healthy()
                && config.enable_auto_failover
                && next.consecutive_failures >= config.failure_threshold
                && cooldown_elapsed(next.last_failover, now, config.failover_cooldown_ms)
            {
                self.attempt_automatic_failover(&p.url, &mut next).await;
            }
        }

        let rotation = fallback.rotation_state().await;
        next.recommendations = generate_recommendations(&RecommendationInputs {
            candidate_count: candidates.len(),
            failed_count,
            checked_count: next.available_urls.len(),
            rotation_count: rotation.rotation_count,
            has_environment_backup: fallback.sources().has_environment_backup(),
            average_response_time_ms: next.statistics.average_response_time_ms,
            uptime_percentage: next.statistics.uptime_percentage,
            total_checks: next.statistics.total_checks,
            total_failovers: next.total_failovers,
        });

        debug!(
            "monitor: check done overall={} primary_ok={} failures={} successes={}",
            next.overall_status, success, next.consecutive_failures, next.consecutive_successes
        );
        Ok(self.commit(next))
    }

    async fn attempt_automatic_failover(&self, primary_url: &str, next: &mut SystemHealthStatus) {
        warn!(
            "monitor: primary {} failed {} consecutive checks, attempting failover",
            primary_url, next.consecutive_failures
        );
        match self
            .inner
            .fallback
            .rotate_to_next_fallback(primary_url, None)
            .await
        {
            Some(url) => {
                next.last_failover = Some(Utc::now());
                next.total_failovers += 1;
                next.last_working_url = Some(url.clone());
                info!("monitor: failover to {} (#{})", url, next.total_failovers);
                self.inner
                    .events
                    .safe_broadcast(StreamEvent::ConfigurationReloadRequired {
                        payload: EventPayload::new(
                            format!("automatic failover from {}", primary_url),
                            EventPriority::High,
                            EVENT_SOURCE,
                        ),
                        stream_url: Some(url),
                    });
            }
            None => {
                let err = RadioErrorHandler::create_error(
                    RadioErrorKind::FailoverFailed,
                    "automatic_failover",
                    None,
                    ContextDetails::with_metadata(ErrorMetadata::Stream {
                        url: primary_url.to_string(),
                        status_code: None,
                    }),
                );
                self.inner.events.safe_broadcast(StreamEvent::FailoverFailed {
                    payload: EventPayload::new(err.user_message, EventPriority::High, EVENT_SOURCE),
                    failed_url: primary_url.to_string(),
                });
            }
        }
    }

    fn record_failed_check(&self, err: &RadioError) -> SystemHealthStatus {
        let previous = self.get_health_status();
        let mut statistics = previous.statistics.clone();
        statistics.record_check(false);
        let next = SystemHealthStatus {
            overall_status: HealthStatus::Critical,
            timestamp: Some(Utc::now()),
            primary_url: None,
            active_fallback: None,
            available_urls: Vec::new(),
            consecutive_failures: previous.consecutive_failures + 1,
            consecutive_successes: 0,
            last_working_url: previous.last_working_url,
            last_failover: previous.last_failover,
            total_failovers: previous.total_failovers,
            statistics,
            recommendations: vec![format!("Health check failed: {}", err.technical_message)],
        };
        self.commit(next)
    }

    /// Publish `next` as the current status and announce a status change.
    fn commit(&self, next: SystemHealthStatus) -> SystemHealthStatus {
        let previous = {
            let mut state = lock(&self.inner.state);
            let previous = std::mem::replace(&mut state.status, next.clone());
            state.history.push_back(next.clone());
            while state.history.len() > HISTORY_LIMIT {
                state.history.pop_front();
            }
            previous.overall_status
        };

        if previous != next.overall_status {
            let priority = match next.overall_status {
                HealthStatus::Critical => EventPriority::Critical,
                HealthStatus::Unhealthy => EventPriority::High,
                _ => EventPriority::Normal,
            };
            if priority == EventPriority::Normal {
                info!("monitor: status {} -> {}", previous, next.overall_status);
            } else {
                warn!("monitor: status {} -> {}", previous, next.overall_status);
            }
            self.inner.events.safe_broadcast(StreamEvent::HealthStatusChanged {
                payload: EventPayload::new(
                    format!("health changed from {} to {}", previous, next.overall_status),
                    priority,
                    EVENT_SOURCE,
                ),
                previous,
                current: next.overall_status,
            });
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use crate::selector::SelectorOptions;
    use crate::sources::SourceConfig;
    use crate::store::MemorySettingsStore;
    use crate::testing::{FlakySettingsStore, ScriptedProber};
    use tokio::sync::broadcast::error::TryRecvError;

    const P: &str = "https://primary.example/live";
    const B: &str = "https://backup.example/live";
    const C: &str = "https://extra.example/live";

    struct Fixture {
        prober: Arc<ScriptedProber>,
        store: Arc<FlakySettingsStore<MemorySettingsStore>>,
        monitor: HealthMonitor,
    }

    fn fixture(config: MonitorConfig) -> Fixture {
        let prober = Arc::new(ScriptedProber::new());
        let store = Arc::new(FlakySettingsStore::new(MemorySettingsStore::with_urls(P, None)));
        let sources = SourceConfig {
            primary_url: None,
            backup_url: Some(B.into()),
            additional_urls: vec![C.into()],
            default_urls: Vec::new(),
        };
        let options = SelectorOptions {
            enable_caching: false,
            ..SelectorOptions::default()
        };
        let fallback = Arc::new(FallbackManager::new(
            sources,
            options,
            store.clone(),
            prober.clone(),
        ));
        let monitor = HealthMonitor::new(fallback, EventBus::new(64), config);
        Fixture {
            prober,
            store,
            monitor,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => out.push(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn status_levels() {
        let fx = fixture(MonitorConfig::default());
        assert_eq!(fx.monitor.get_health_status().overall_status, HealthStatus::Unknown);

        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Critical);
        assert_eq!(s.available_urls.len(), 3);

        fx.prober.set_ok(C, 40);
        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Degraded);
        assert_eq!(s.active_fallback.as_ref().map(|r| r.url.as_str()), Some(C));

        fx.prober.set_ok(P, 20);
        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Healthy);
        assert_eq!(s.primary_url.as_ref().unwrap().priority, 0);
        assert_eq!(s.consecutive_successes, 1);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.last_working_url.as_deref(), Some(P));
        assert_eq!(s.statistics.total_checks, 3);
        assert_eq!(s.statistics.successful_checks, 1);
        assert_eq!(s.statistics.average_response_time_ms, 33);
        assert_eq!(fx.prober.calls().len(), 9);
    }

    #[tokio::test]
    async fn status_change_is_broadcast_only_on_change() {
        let fx = fixture(MonitorConfig::default());
        let mut rx = fx.monitor.events().subscribe();
        fx.prober.set_ok(P, 10);

        fx.monitor.perform_health_check().await;
        fx.monitor.perform_health_check().await;
        let changes: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::HealthStatusChanged { .. }))
            .collect();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            StreamEvent::HealthStatusChanged { previous, current, .. } => {
                assert_eq!(*previous, HealthStatus::Unknown);
                assert_eq!(*current, HealthStatus::Healthy);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn failover_after_threshold_then_cooldown() {
        let fx = fixture(MonitorConfig {
            failure_threshold: 2,
            ..MonitorConfig::default()
        });
        let mut rx = fx.monitor.events().subscribe();
        fx.prober.set_failed(P, ProbeError::Status(502));
        fx.prober.set_ok(B, 30);
        fx.prober.set_ok(C, 30);

        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.total_failovers, 0);

        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.total_failovers, 1);
        assert!(s.last_failover.is_some());
        assert_eq!(s.last_working_url.as_deref(), Some(B));
        let reloads: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::ConfigurationReloadRequired { stream_url, payload } => {
                    Some((stream_url, payload.priority))
                }
                _ => None,
            })
            .collect();
        assert_eq!(reloads, vec![(Some(B.to_string()), EventPriority::High)]);

        // Inside the cooldown window nothing else happens
        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.total_failovers, 1);
        assert_eq!(s.consecutive_failures, 3);
        let rotation = fx.monitor.fallback().rotation_state().await;
        assert_eq!(rotation.rotation_count, 1);
        assert_eq!(rotation.current_url.as_deref(), Some(B));
    }

    #[tokio::test]
    async fn failover_rearms_once_cooldown_has_passed() {
        let fx = fixture(MonitorConfig {
            failure_threshold: 1,
            failover_cooldown_ms: 0,
            ..MonitorConfig::default()
        });
        let mut rx = fx.monitor.events().subscribe();
        fx.prober.set_failed(P, ProbeError::Status(503));
        fx.prober.set_ok(B, 30);
        fx.prober.set_ok(C, 30);

        let first = fx.monitor.perform_health_check().await;
        assert_eq!(first.total_failovers, 1);
        let second = fx.monitor.perform_health_check().await;
        assert_eq!(second.total_failovers, 2);
        assert!(second.last_failover >= first.last_failover);

        let reloads = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::ConfigurationReloadRequired { .. }))
            .count();
        assert_eq!(reloads, 2);
        assert_eq!(fx.monitor.fallback().rotation_state().await.rotation_count, 2);
    }

    #[tokio::test]
    async fn failed_failover_is_announced() {
        let fx = fixture(MonitorConfig {
            failure_threshold: 1,
            ..MonitorConfig::default()
        });
        let mut rx = fx.monitor.events().subscribe();
        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Critical);
        assert_eq!(s.total_failovers, 0);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            StreamEvent::FailoverFailed { failed_url, .. } if failed_url == P
        )));
    }

    #[tokio::test]
    async fn auto_failover_can_be_disabled() {
        let fx = fixture(MonitorConfig {
            failure_threshold: 1,
            enable_auto_failover: false,
            ..MonitorConfig::default()
        });
        fx.prober.set_ok(B, 30);
        fx.monitor.perform_health_check().await;
        fx.monitor.perform_health_check().await;
        assert_eq!(fx.monitor.fallback().rotation_state().await.rotation_count, 0);
    }

    #[tokio::test]
    async fn recovered_primary_is_eligible_again() {
        let fx = fixture(MonitorConfig {
            failure_threshold: 1,
            recovery_threshold: 2,
            ..MonitorConfig::default()
        });
        fx.prober.set_ok(B, 30);
        fx.monitor.perform_health_check().await;
        assert!(fx.monitor.fallback().rotation_state().await.failed_urls.contains(P));

        fx.prober.set_ok(P, 10);
        fx.monitor.perform_health_check().await;
        assert!(fx.monitor.fallback().rotation_state().await.failed_urls.contains(P));
        fx.monitor.perform_health_check().await;
        assert!(!fx.monitor.fallback().rotation_state().await.failed_urls.contains(P));
    }

    #[tokio::test]
    async fn direct_check_failure_yields_critical_status() {
        let fx = fixture(MonitorConfig::default());
        fx.prober.set_ok(P, 10);
        fx.store.fail_next_reads(1);

        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Critical);
        assert_eq!(s.statistics.failed_checks, 1);
        assert!(s.recommendations[0].starts_with("Health check failed"));

        let s = fx.monitor.perform_health_check().await;
        assert_eq!(s.overall_status, HealthStatus::Healthy);
        assert_eq!(s.statistics.total_checks, 2);
        assert_eq!(s.statistics.uptime_percentage, 50);
    }

    #[tokio::test]
    async fn history_is_bounded_and_reset_clears_it() {
        let fx = fixture(MonitorConfig::default());
        for _ in 0..(HISTORY_LIMIT + 5) {
            fx.monitor.perform_health_check().await;
        }
        let report = fx.monitor.get_health_report().await;
        assert_eq!(report.history.len(), HISTORY_LIMIT);
        assert_eq!(report.status.statistics.total_checks, (HISTORY_LIMIT + 5) as u64);
        assert!(!report.is_running);

        fx.monitor.reset_health_status();
        let report = fx.monitor.get_health_report().await;
        assert!(report.history.is_empty());
        assert_eq!(report.status.overall_status, HealthStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_survives_failing_and_panicking_ticks() {
        let fx = fixture(MonitorConfig::default());
        fx.prober.set_ok(P, 20);
        fx.store.fail_next_reads(1);

        let patch = MonitorConfigPatch {
            check_interval_ms: Some(1_000),
            ..MonitorConfigPatch::default()
        };
        assert!(fx.monitor.start_health_monitoring(Some(patch.clone())).await);
        assert!(!fx.monitor.start_health_monitoring(Some(patch)).await);
        assert_eq!(fx.monitor.config().check_interval_ms, 1_000);

        let s = fx.monitor.get_health_status();
        assert_eq!(s.overall_status, HealthStatus::Critical);
        assert_eq!(s.statistics.total_checks, 1);

        fx.prober.panic_once_on(P);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let s = fx.monitor.get_health_status();
        assert_eq!(s.statistics.total_checks, 2);
        assert_eq!(s.statistics.failed_checks, 2);
        let primary = s.primary_url.as_ref().unwrap();
        assert!(!primary.is_healthy());
        assert_eq!(primary.url, P);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let s = fx.monitor.get_health_status();
        assert_eq!(s.statistics.total_checks, 3);
        assert_eq!(s.overall_status, HealthStatus::Healthy);
        assert!(fx.monitor.is_running());

        assert!(fx.monitor.stop_health_monitoring());
        assert!(!fx.monitor.stop_health_monitoring());
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(fx.monitor.get_health_status().statistics.total_checks, 3);
    }
}
