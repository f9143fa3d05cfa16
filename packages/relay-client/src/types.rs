use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of an outbound action webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub device: String,
}

/// Outcome reported back for an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Executed,
    Failed,
}

impl std::fmt::Display for AckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckStatus::Executed => write!(f, "executed"),
            AckStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Body of an acknowledgment callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub status: AckStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of a liveness heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "cameraOn")]
    pub camera_on: bool,
    /// Seconds since the agent started.
    pub uptime: u64,
    pub timestamp: DateTime<Utc>,
}

/// A `data:` frame received on the command stream.
///
/// Servers disagree on naming: some send `{"type": "command", "action": "start_camera"}`,
/// others put the name directly in `event` (`{"event": "unlock"}`). Both shapes land here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

impl StreamFrame {
    /// The name this frame asks for: the explicit `action`, else `event`, else `type`.
    pub fn name(&self) -> Option<&str> {
        self.action
            .as_deref()
            .or(self.event.as_deref())
            .or(self.kind.as_deref())
    }
}
