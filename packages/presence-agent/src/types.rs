//! Values that flow between the sensor, the presence machine, actuators and the relay.

use std::fmt;

use relay_client::StreamFrame;
use tokio::time::Instant;

use crate::error::ErrorKind;

/// One sensor sample. Absent distance or a set error means nothing usable this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub distance_mm: Option<u32>,
    pub timestamp: Instant,
    pub error: Option<ErrorKind>,
}

impl Reading {
    pub fn measured(distance_mm: u32, timestamp: Instant) -> Self {
        Self {
            distance_mm: Some(distance_mm),
            timestamp,
            error: None,
        }
    }

    pub fn out_of_range(timestamp: Instant) -> Self {
        Self {
            distance_mm: None,
            timestamp,
            error: None,
        }
    }

    pub fn failed(kind: ErrorKind, timestamp: Instant) -> Self {
        Self {
            distance_mm: None,
            timestamp,
            error: Some(kind),
        }
    }

    /// `0 < distance <= threshold` with no error.
    pub fn qualifies(&self, threshold_mm: u32) -> bool {
        self.error.is_none()
            && matches!(self.distance_mm, Some(d) if d > 0 && d <= threshold_mm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Absent,
    Present,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Absent => write!(f, "absent"),
            Presence::Present => write!(f, "present"),
        }
    }
}

/// The debounced presence signal. `last_seen` is the timestamp of the latest qualifying reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceState {
    pub presence: Presence,
    pub last_seen: Option<Instant>,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            presence: Presence::Absent,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    BecomePresent,
    BecomeAbsent,
}

impl TransitionKind {
    /// Actuator target for this transition.
    pub fn desired(&self) -> bool {
        matches!(self, TransitionKind::BecomePresent)
    }

    /// Remote-facing command name.
    pub fn remote_action(&self) -> &'static str {
        match self {
            TransitionKind::BecomePresent => "start_camera",
            TransitionKind::BecomeAbsent => "stop_camera",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::BecomePresent => write!(f, "become_present"),
            TransitionKind::BecomeAbsent => write!(f, "become_absent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEvent {
    pub kind: TransitionKind,
    pub at: Instant,
    pub distance_mm: Option<u32>,
}

/// Action requested by a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    StartCamera,
    StopCamera,
    /// Energise every actuator for the configured unlock duration, then release.
    Unlock,
    Lock,
    Unknown(String),
}

impl CommandAction {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "start_camera" => CommandAction::StartCamera,
            "stop_camera" => CommandAction::StopCamera,
            "unlock" | "verified" => CommandAction::Unlock,
            "lock" => CommandAction::Lock,
            other => CommandAction::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::StartCamera => write!(f, "start_camera"),
            CommandAction::StopCamera => write!(f, "stop_camera"),
            CommandAction::Unlock => write!(f, "unlock"),
            CommandAction::Lock => write!(f, "lock"),
            CommandAction::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Device identifier that addresses every agent.
pub const BROADCAST_DEVICE: &str = "all";

/// Frames that keep the stream alive or announce state; never commands.
/// `failed` announces a rejected verification at the turnstile and asks nothing of us.
const CONTROL_FRAMES: &[&str] = &["connected", "ping", "heartbeat", "keepalive", "failed"];

/// A command received from the relay's inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Absent when the server did not supply one; such commands cannot be deduplicated or acknowledged.
    pub request_id: Option<String>,
    pub action: CommandAction,
    pub device: String,
}

impl RemoteCommand {
    /// Interpret a stream frame. Control frames and frames without a name yield `None`.
    pub fn from_frame(frame: &StreamFrame) -> Option<Self> {
        let name = frame.name()?;
        if CONTROL_FRAMES.contains(&name) {
            return None;
        }

        Some(Self {
            request_id: frame.request_id.clone(),
            action: CommandAction::from_wire(name),
            device: frame
                .device
                .clone()
                .unwrap_or_else(|| BROADCAST_DEVICE.to_string()),
        })
    }

    pub fn is_addressed_to(&self, device: &str) -> bool {
        self.device == device || self.device == BROADCAST_DEVICE
    }
}

/// Per-actuator convergence state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorState {
    pub name: String,
    pub desired: bool,
    pub applied: bool,
    pub last_error: Option<ErrorKind>,
    /// Set after a hardware failure, cleared by the next successful write.
    pub degraded: bool,
}

impl ActuatorState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired: false,
            applied: false,
            last_error: None,
            degraded: false,
        }
    }
}

impl fmt::Display for ActuatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.applied { "on" } else { "off" };
        write!(f, "{}={}", self.name, level)?;
        if self.desired != self.applied {
            write!(f, "(pending {})", if self.desired { "on" } else { "off" })?;
        }
        if let Some(kind) = self.last_error {
            write!(f, "[{}]", kind)?;
        }
        Ok(())
    }
}
