//! Short-lived memo of probe results, keyed by URL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::probe::TestResult;

#[derive(Debug, Clone)]
struct CachedResult {
    result: TestResult,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub expired: usize,
}

/// Entries older than the caller-supplied TTL read as absent.  Concurrent
/// writers for the same URL simply overwrite each other.
#[derive(Debug, Default)]
pub struct TestResultCache {
    entries: Mutex<HashMap<String, CachedResult>>,
}

impl TestResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str, ttl: Duration) -> Option<TestResult> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(url)
            .filter(|c| c.stored_at.elapsed() < ttl)
            .map(|c| c.result.clone())
    }

    pub fn insert(&self, url: &str, result: TestResult) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            url.to_string(),
            CachedResult {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Drop entries past `ttl`; returns how many were removed.
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, c| c.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn stats(&self, ttl: Duration) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = entries
            .values()
            .filter(|c| c.stored_at.elapsed() < ttl)
            .count();
        CacheStats {
            entries: entries.len(),
            fresh,
            expired: entries.len() - fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TestResultCache::new();
        let ttl = Duration::from_secs(300);
        cache.insert("https://a.example", TestResult::valid(200, 80, None));

        assert!(cache.get("https://a.example", ttl).is_some());
        assert!(cache.get("https://b.example", ttl).is_none());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("https://a.example", ttl).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("https://a.example", ttl).is_none());
        assert_eq!(
            cache.stats(ttl),
            CacheStats {
                entries: 1,
                fresh: 0,
                expired: 1
            }
        );
        assert_eq!(cache.purge_expired(ttl), 1);
        assert_eq!(cache.stats(ttl).entries, 0);
    }
}
