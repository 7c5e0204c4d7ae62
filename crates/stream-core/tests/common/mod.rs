#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stream_core::probe::{ProbeError, StreamProber, TestResult};

pub const A: &str = "https://a.example/stream";
pub const B: &str = "https://b.example/stream";

pub fn ok(ms: u64) -> TestResult {
    TestResult::valid(200, ms, Some("audio/mpeg".into()))
}

pub fn down(status: u16) -> TestResult {
    TestResult::failed(&ProbeError::Status(status), Some(5))
}

/// Replays a per-URL script of probe results.  The last entry of a script
/// repeats forever; URLs without a script are unreachable.
#[derive(Default)]
pub struct SequenceProber {
    scripts: Mutex<HashMap<String, VecDeque<TestResult>>>,
    probed: Mutex<Vec<String>>,
}

impl SequenceProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, results: Vec<TestResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), results.into());
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamProber for SequenceProber {
    async fn test_stream_connection(&self, url: &str, _timeout: Duration) -> TestResult {
        self.probed.lock().unwrap().push(url.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(url) else {
            return TestResult::failed(&ProbeError::ConnectionRefused(url.to_string()), Some(1));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_else(|| down(503))
        }
    }
}
