use serde::{Deserialize, Serialize};

use crate::events::StreamEvent;
use crate::health::SystemHealthStatus;

/// Bump when the wire format changes in a breaking way.  Players check it
/// on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame; anything larger is treated as garbage.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Messages sent from a player to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    GetHealth,
    GetStreamUrl,
    /// The player could not keep `url` playing; rotate away from it.
    ReportFailure { url: String },
    ForceCheck,
}

/// Messages sent from the daemon to players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        status: SystemHealthStatus,
    },
    Health {
        status: SystemHealthStatus,
    },
    /// URL the player should be playing; `None` when nothing is available.
    StreamUrl {
        url: Option<String>,
    },
    Event {
        event: StreamEvent,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`.  `Ok(None)` means more
    /// bytes are needed.
    pub fn decode(data: &[u8]) -> anyhow::Result<Option<(Self, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok(Some((msg, 4 + len)))
    }
}
