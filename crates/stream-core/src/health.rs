//! Health data model and the pure parts of health evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::TestResult;
use crate::sources::CandidateSource;

/// Overall stream health.  Worst-to-best: critical, unhealthy, degraded,
/// healthy; `Unknown` until the first check has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One probed URL within a health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub url: String,
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_fallback: bool,
    pub priority: u32,
    pub source: CandidateSource,
}

impl HealthCheckResult {
    pub fn from_probe(
        url: &str,
        result: TestResult,
        is_fallback: bool,
        priority: u32,
        source: CandidateSource,
    ) -> Self {
        Self {
            url: url.to_string(),
            status: if result.is_valid {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            response_time_ms: result.response_time_ms,
            status_code: result.status_code,
            content_type: result.content_type,
            error: result.error,
            timestamp: Utc::now(),
            is_fallback,
            priority,
            source,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatistics {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub average_response_time_ms: u64,
    pub uptime_percentage: u32,
    #[serde(skip)]
    response_time_sum_ms: u64,
    #[serde(skip)]
    response_time_samples: u64,
}

impl HealthStatistics {
    pub fn record_check(&mut self, success: bool) {
        self.total_checks += 1;
        if success {
            self.successful_checks += 1;
        } else {
            self.failed_checks += 1;
        }
        self.uptime_percentage =
            ((self.successful_checks as f64 / self.total_checks as f64) * 100.0).round() as u32;
    }

    /// Add one latency sample from a valid probe.
    pub fn record_response_time(&mut self, ms: u64) {
        self.response_time_sum_ms += ms;
        self.response_time_samples += 1;
        self.average_response_time_ms = self.response_time_sum_ms / self.response_time_samples;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthStatus {
    pub overall_status: HealthStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub primary_url: Option<HealthCheckResult>,
    pub active_fallback: Option<HealthCheckResult>,
    pub available_urls: Vec<HealthCheckResult>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_working_url: Option<String>,
    pub last_failover: Option<DateTime<Utc>>,
    pub total_failovers: u32,
    pub statistics: HealthStatistics,
    pub recommendations: Vec<String>,
}

/// Derive overall health from individual results:
/// a healthy primary wins, then a healthy fallback, then anything healthy.
pub fn analyze_overall_health(results: &[HealthCheckResult]) -> HealthStatus {
    if results.iter().any(|r| !r.is_fallback && r.is_healthy()) {
        HealthStatus::Healthy
    } else if results.iter().any(|r| r.is_fallback && r.is_healthy()) {
        HealthStatus::Degraded
    } else if results.iter().any(HealthCheckResult::is_healthy) {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Critical
    }
}

/// Inputs for the advisory text on the dashboard.
#[derive(Debug, Clone, Default)]
pub struct RecommendationInputs {
    pub candidate_count: usize,
    pub failed_count: usize,
    pub checked_count: usize,
    pub rotation_count: u64,
    pub has_environment_backup: bool,
    pub average_response_time_ms: u64,
    pub uptime_percentage: u32,
    pub total_checks: u64,
    pub total_failovers: u32,
}

pub fn generate_recommendations(inputs: &RecommendationInputs) -> Vec<String> {
    let mut out = Vec::new();
    if inputs.candidate_count <= 3 {
        out.push(format!(
            "Only {} fallback URLs configured; add more backup streams for resilience",
            inputs.candidate_count
        ));
    }
    if inputs.rotation_count > 10 {
        out.push(format!(
            "Streams have rotated {} times; investigate the stability of the primary stream",
            inputs.rotation_count
        ));
    }
    if inputs.checked_count > 0 && inputs.failed_count * 2 > inputs.checked_count {
        out.push(format!(
            "{} of {} stream URLs are failing; review the fallback list",
            inputs.failed_count, inputs.checked_count
        ));
    }
    if !inputs.has_environment_backup {
        out.push("No environment backup stream configured (set RADIO_BACKUP_STREAM_URL)".into());
    }
    if inputs.average_response_time_ms > 5000 {
        out.push(format!(
            "Average response time is {} ms; consider a closer or faster stream server",
            inputs.average_response_time_ms
        ));
    }
    if inputs.total_checks > 0 && inputs.uptime_percentage < 95 {
        out.push(format!(
            "Uptime is {}%, below the 95% target",
            inputs.uptime_percentage
        ));
    }
    if inputs.total_failovers > 5 {
        out.push(format!(
            "{} automatic failovers so far; the primary stream may need replacing",
            inputs.total_failovers
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(healthy: bool, is_fallback: bool) -> HealthCheckResult {
        let probe = if healthy {
            TestResult::valid(200, 100, None)
        } else {
            TestResult::default()
        };
        HealthCheckResult::from_probe("u", probe, is_fallback, 1, CandidateSource::Environment)
    }

    #[test]
    fn overall_status_precedence() {
        assert_eq!(analyze_overall_health(&[]), HealthStatus::Critical);
        assert_eq!(
            analyze_overall_health(&[result(false, false), result(false, true)]),
            HealthStatus::Critical
        );
        assert_eq!(
            analyze_overall_health(&[result(false, false), result(true, true)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            analyze_overall_health(&[result(true, false), result(false, true)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            analyze_overall_health(&[result(true, false), result(true, true)]),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn statistics_stay_consistent() {
        let mut stats = HealthStatistics::default();
        for ok in [true, true, false, true, false, false, true] {
            stats.record_check(ok);
            assert_eq!(stats.total_checks, stats.successful_checks + stats.failed_checks);
            let expected =
                (stats.successful_checks as f64 / stats.total_checks as f64 * 100.0).round() as u32;
            assert_eq!(stats.uptime_percentage, expected);
        }
        assert_eq!(stats.uptime_percentage, 57);

        stats.record_response_time(100);
        stats.record_response_time(300);
        assert_eq!(stats.average_response_time_ms, 200);
    }

    #[test]
    fn recommendations_follow_thresholds() {
        let quiet = RecommendationInputs {
            candidate_count: 6,
            failed_count: 1,
            checked_count: 6,
            rotation_count: 2,
            has_environment_backup: true,
            average_response_time_ms: 300,
            uptime_percentage: 99,
            total_checks: 10,
            total_failovers: 0,
        };
        assert!(generate_recommendations(&quiet).is_empty());

        let noisy = RecommendationInputs {
            candidate_count: 2,
            failed_count: 4,
            checked_count: 6,
            rotation_count: 11,
            has_environment_backup: false,
            average_response_time_ms: 6000,
            uptime_percentage: 80,
            total_checks: 10,
            total_failovers: 6,
        };
        assert_eq!(generate_recommendations(&noisy).len(), 7);
    }
}
