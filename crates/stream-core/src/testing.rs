//! In-memory stand-ins for the network and storage seams.  Compiled for this
//! crate's tests and for dependents that enable the `test-util` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::probe::{ProbeError, StreamProber, TestResult};
use crate::store::{SettingsStore, StoreError, StreamSettings, StreamUrlUpdate};

/// Prober answering from a URL → result table.  Unknown URLs fail with a
/// connection error.
#[derive(Default)]
pub struct ScriptedProber {
    results: Mutex<HashMap<String, TestResult>>,
    calls: Mutex<Vec<String>>,
    panic_on: Mutex<Option<String>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ok(&self, url: &str, response_time_ms: u64) {
        self.set(
            url,
            TestResult::valid(200, response_time_ms, Some("audio/mpeg".to_string())),
        );
    }

    pub fn set_failed(&self, url: &str, error: ProbeError) {
        self.set(url, TestResult::failed(&error, Some(1)));
    }

    pub fn set(&self, url: &str, result: TestResult) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), result);
    }

    /// Make the next probe of `url` panic (once).
    pub fn panic_once_on(&self, url: &str) {
        *self.panic_on.lock().unwrap_or_else(|e| e.into_inner()) = Some(url.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl StreamProber for ScriptedProber {
    async fn test_stream_connection(&self, url: &str, _timeout: Duration) -> TestResult {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        let should_panic = {
            let mut guard = self.panic_on.lock().unwrap_or_else(|e| e.into_inner());
            if guard.as_deref() == Some(url) {
                guard.take();
                true
            } else {
                false
            }
        };
        if should_panic {
            panic!("scripted probe panic for {}", url);
        }
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                TestResult::failed(&ProbeError::Connect("no scripted result".into()), None)
            })
    }
}

/// Wraps another store and fails a configurable number of upcoming reads.
pub struct FlakySettingsStore<S> {
    inner: S,
    failing_reads: AtomicUsize,
}

impl<S: SettingsStore> FlakySettingsStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_reads: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: SettingsStore> SettingsStore for FlakySettingsStore<S> {
    async fn active_settings(&self) -> Result<Option<StreamSettings>, StoreError> {
        if self.take_failure() {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.active_settings().await
    }

    async fn update_stream_url_atomic(
        &self,
        update: StreamUrlUpdate,
        admin_user_id: &str,
    ) -> Result<StreamSettings, StoreError> {
        self.inner.update_stream_url_atomic(update, admin_user_id).await
    }

    async fn invalidate_entity_cache(&self, entity: &str) {
        self.inner.invalidate_entity_cache(entity).await
    }
}
