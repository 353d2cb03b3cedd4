//! WebSocket message shapes.

use crate::metrics::data::{MemoryTriple, SensorReading};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server to client messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    SystemData {
        timestamp: i64,
        cpu_temp: String,
        mem_info: Option<MemoryTriple>,
    },
    Pong {
        timestamp: i64,
    },
    SystemBroadcast {
        timestamp: i64,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
}

impl ServerMessage {
    /// Snapshot of a reading. The timestamp is the delivery time.
    pub fn snapshot(reading: &SensorReading) -> Self {
        ServerMessage::SystemData {
            timestamp: Utc::now().timestamp_millis(),
            cpu_temp: reading.cpu_temp_display(),
            mem_info: reading.memory,
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn broadcast(fields: Map<String, Value>) -> Self {
        ServerMessage::SystemBroadcast {
            timestamp: Utc::now().timestamp_millis(),
            fields,
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client to server messages. Anything else fails to parse and is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Ping,
    RequestData,
    #[serde(rename_all = "camelCase")]
    ClientConnected {
        #[serde(default)]
        client_type: Option<String>,
        #[serde(default)]
        device_type: Option<String>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
