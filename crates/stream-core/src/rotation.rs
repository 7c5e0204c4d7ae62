use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which URL is live and which ones failed during the current rotation
/// cycle.  `current_url`, when set, is never in `failed_urls`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationState {
    pub current_url: Option<String>,
    pub current_index: usize,
    pub last_rotation_at: Option<DateTime<Utc>>,
    pub failed_urls: BTreeSet<String>,
    pub rotation_count: u64,
}

impl RotationState {
    pub fn record_failure(&mut self, failed_url: &str, at: DateTime<Utc>) {
        self.failed_urls.insert(failed_url.to_string());
        self.rotation_count += 1;
        self.last_rotation_at = Some(at);
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        self.failed_urls.contains(url)
    }

    pub fn activate(&mut self, url: &str, index: usize) {
        self.failed_urls.remove(url);
        self.current_url = Some(url.to_string());
        self.current_index = index;
    }

    /// Every candidate has failed: start a fresh cycle.
    pub fn clear_failures(&mut self) {
        self.failed_urls.clear();
    }

    pub fn forget_failure(&mut self, url: &str) -> bool {
        self.failed_urls.remove(url)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
