//! Candidate stream URLs, merged from every configured source into one
//! priority-ordered list (lower number = tried first).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::probe::TestResult;
use crate::store::SettingsStore;

pub const PRIMARY_PRIORITY: u32 = 1;
pub const BACKUP_PRIORITY: u32 = 2;
pub const ADDITIONAL_BASE_PRIORITY: u32 = 10;
pub const DATABASE_PRIORITY: u32 = 50;
pub const DEFAULT_BASE_PRIORITY: u32 = 100;
pub const EMERGENCY_PRIORITY: u32 = 999;

/// Built-in last-resort streams.
pub const DEFAULT_STREAM_URLS: [&str; 2] = [
    "https://radio.example.com/live.mp3",
    "https://backup.radio.example.com/live.mp3",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Environment,
    Database,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackCandidate {
    pub url: String,
    pub priority: u32,
    pub source: CandidateSource,
    pub description: String,
    #[serde(default)]
    pub last_tested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<TestResult>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl FallbackCandidate {
    pub fn new(
        url: impl Into<String>,
        priority: u32,
        source: CandidateSource,
        description: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            priority,
            source,
            description: description.into(),
            last_tested_at: None,
            last_result: None,
            consecutive_failures: 0,
        }
    }

    /// Fold a probe outcome into the candidate's bookkeeping.
    pub fn record_result(&mut self, result: TestResult, at: DateTime<Utc>) {
        if result.is_valid {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.last_tested_at = Some(at);
        self.last_result = Some(result);
    }
}

/// Statically configured sources, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default)]
    pub backup_url: Option<String>,
    #[serde(default)]
    pub additional_urls: Vec<String>,
    #[serde(default = "default_urls")]
    pub default_urls: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            backup_url: None,
            additional_urls: Vec::new(),
            default_urls: default_urls(),
        }
    }
}

fn default_urls() -> Vec<String> {
    DEFAULT_STREAM_URLS.iter().map(|u| u.to_string()).collect()
}

impl SourceConfig {
    /// True when any environment-level backup exists beyond the primary.
    pub fn has_environment_backup(&self) -> bool {
        non_blank(self.backup_url.as_deref()).is_some()
            || self.additional_urls.iter().any(|u| !u.trim().is_empty())
    }
}

fn non_blank(url: Option<&str>) -> Option<&str> {
    url.map(str::trim).filter(|u| !u.is_empty())
}

/// Accumulates candidates, dropping exact-duplicate URLs (first one wins).
struct CandidateList {
    seen: HashSet<String>,
    items: Vec<FallbackCandidate>,
}

impl CandidateList {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, url: &str, priority: u32, source: CandidateSource, description: String) {
        if !self.seen.insert(url.to_string()) {
            debug!("sources: skipping duplicate {}", url);
            return;
        }
        self.items
            .push(FallbackCandidate::new(url, priority, source, description));
    }
}

/// Merge every source into a priority-sorted, de-duplicated list.
///
/// The persisted admin fallback is optional: a storage failure is logged and
/// skipped.  An empty result degrades to a single built-in emergency URL.
pub async fn collect_fallback_urls(
    sources: &SourceConfig,
    store: &dyn SettingsStore,
) -> Vec<FallbackCandidate> {
    let mut list = CandidateList::new();

    if let Some(url) = non_blank(sources.primary_url.as_deref()) {
        list.push(
            url,
            PRIMARY_PRIORITY,
            CandidateSource::Environment,
            "Primary stream (RADIO_STREAM_URL)".into(),
        );
    }
    if let Some(url) = non_blank(sources.backup_url.as_deref()) {
        list.push(
            url,
            BACKUP_PRIORITY,
            CandidateSource::Environment,
            "Backup stream (RADIO_BACKUP_STREAM_URL)".into(),
        );
    }
    let additional = sources
        .additional_urls
        .iter()
        .filter_map(|u| non_blank(Some(u.as_str())));
    for (i, url) in additional.enumerate() {
        list.push(
            url,
            ADDITIONAL_BASE_PRIORITY + i as u32,
            CandidateSource::Environment,
            format!("Additional fallback #{}", i + 1),
        );
    }

    match store.fallback_url().await {
        Ok(Some(url)) => {
            if let Some(url) = non_blank(Some(url.as_str())) {
                list.push(
                    url,
                    DATABASE_PRIORITY,
                    CandidateSource::Database,
                    "Admin-configured fallback".into(),
                );
            }
        }
        Ok(None) => {}
        Err(e) => warn!("sources: could not read admin fallback URL: {}", e),
    }

    let defaults = sources
        .default_urls
        .iter()
        .filter_map(|u| non_blank(Some(u.as_str())));
    for (i, url) in defaults.enumerate() {
        list.push(
            url,
            DEFAULT_BASE_PRIORITY + i as u32,
            CandidateSource::Default,
            format!("Built-in default #{}", i + 1),
        );
    }

    let mut candidates = list.items;
    if candidates.is_empty() {
        warn!("sources: no candidates configured, using emergency default");
        return vec![FallbackCandidate::new(
            DEFAULT_STREAM_URLS[0],
            EMERGENCY_PRIORITY,
            CandidateSource::Default,
            "Emergency default",
        )];
    }

    candidates.sort_by_key(|c| c.priority);
    candidates
}
