//! Events pushed to connected players and to anything else listening.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::health::HealthStatus;

pub const CONFIGURATION_RELOAD_REQUIRED: &str = "CONFIGURATION_RELOAD_REQUIRED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub reason: String,
    pub priority: EventPriority,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: String,
}

impl EventPayload {
    pub fn new(reason: impl Into<String>, priority: EventPriority, source: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            priority,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: correlation_id(),
        }
    }
}

/// Random 64-bit id, hex encoded.
pub fn correlation_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    /// Players should re-read their stream configuration.
    ConfigurationReloadRequired {
        payload: EventPayload,
        stream_url: Option<String>,
    },
    HealthStatusChanged {
        payload: EventPayload,
        previous: HealthStatus,
        current: HealthStatus,
    },
    FailoverFailed {
        payload: EventPayload,
        failed_url: String,
    },
    MonitoringStarted {
        payload: EventPayload,
    },
    MonitoringStopped {
        payload: EventPayload,
    },
    /// Forwarded WARN/ERROR log line.
    Log {
        message: String,
    },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ConfigurationReloadRequired { .. } => CONFIGURATION_RELOAD_REQUIRED,
            StreamEvent::HealthStatusChanged { .. } => "HEALTH_STATUS_CHANGED",
            StreamEvent::FailoverFailed { .. } => "FAILOVER_FAILED",
            StreamEvent::MonitoringStarted { .. } => "MONITORING_STARTED",
            StreamEvent::MonitoringStopped { .. } => "MONITORING_STOPPED",
            StreamEvent::Log { .. } => "LOG",
        }
    }
}

/// Fan-out of `StreamEvent`s.  Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StreamEvent> {
        self.sender.clone()
    }

    /// Send without failing; returns how many receivers got it.
    pub fn safe_broadcast(&self, event: StreamEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(n) => {
                debug!("events: {} delivered to {} receivers", name, n);
                n
            }
            Err(_) => {
                debug!("events: {} dropped, no receivers", name);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_without_receivers_is_fine() {
        let bus = EventBus::new(8);
        let event = StreamEvent::MonitoringStopped {
            payload: EventPayload::new("stopped", EventPriority::Low, "test"),
        };
        assert_eq!(bus.safe_broadcast(event.clone()), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.safe_broadcast(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn reload_event_wire_shape() {
        let event = StreamEvent::ConfigurationReloadRequired {
            payload: EventPayload::new("admin update", EventPriority::High, "admin"),
            stream_url: Some("https://a.example/stream".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], CONFIGURATION_RELOAD_REQUIRED);
        assert_eq!(json["payload"]["priority"], "high");
        assert_eq!(json["payload"]["source"], "admin");
        assert_eq!(json["payload"]["correlation_id"].as_str().unwrap().len(), 16);
    }
}
