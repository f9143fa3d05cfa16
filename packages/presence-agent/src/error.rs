//! Error taxonomy for the agent.
//!
//! Every runtime failure is classified by [`ErrorKind`]. Only
//! [`ErrorKind::StartupResourceFailure`] may end the process; everything else
//! is caught at the component that raised it, logged, and turned into a safe
//! default (no presence, no actuator change, or a failed acknowledgment).

use std::fmt;

use thiserror::Error;

/// Classification of agent failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Sensor bus transaction failed or timed out. Treated as "no reading".
    SensorIoFailure,
    /// Actuator device held elsewhere. Retried on the next transition.
    ActuatorBusy,
    /// Actuator write failed. Logged, actuator marked degraded.
    ActuatorHardwareFailure,
    /// Remote endpoint did not accept a delivery after every attempt.
    RemoteDeliveryFailure,
    /// Inbound stream could not be opened or dropped mid-stream.
    RemoteConnectionLost,
    /// Hardware or configuration could not be acquired at startup.
    StartupResourceFailure,
    /// Inbound command with an action this agent does not implement.
    UnknownRemoteCommand,
}

impl ErrorKind {
    /// Whether this kind may terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::StartupResourceFailure)
    }

    /// Whether the same operation may succeed if attempted again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::SensorIoFailure
                | ErrorKind::ActuatorBusy
                | ErrorKind::RemoteDeliveryFailure
                | ErrorKind::RemoteConnectionLost
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SensorIoFailure => write!(f, "sensor_io_failure"),
            ErrorKind::ActuatorBusy => write!(f, "actuator_busy"),
            ErrorKind::ActuatorHardwareFailure => write!(f, "actuator_hardware_failure"),
            ErrorKind::RemoteDeliveryFailure => write!(f, "remote_delivery_failure"),
            ErrorKind::RemoteConnectionLost => write!(f, "remote_connection_lost"),
            ErrorKind::StartupResourceFailure => write!(f, "startup_resource_failure"),
            ErrorKind::UnknownRemoteCommand => write!(f, "unknown_remote_command"),
        }
    }
}

/// Structured agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("sensor I/O failure: {0}")]
    SensorIo(String),

    #[error("actuator '{actuator}' unavailable: {reason}")]
    ActuatorBusy { actuator: String, reason: String },

    #[error("actuator '{actuator}' hardware failure: {reason}")]
    ActuatorHardware { actuator: String, reason: String },

    #[error("delivery to {endpoint} failed after {attempts} attempts: {reason}")]
    RemoteDelivery {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("remote connection lost: {0}")]
    RemoteConnectionLost(String),

    #[error("failed to acquire {resource}: {reason}")]
    StartupResource { resource: String, reason: String },

    #[error("unknown remote command '{0}'")]
    UnknownRemoteCommand(String),
}

impl AgentError {
    pub fn startup(resource: impl Into<String>, reason: impl fmt::Display) -> Self {
        AgentError::StartupResource {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::SensorIo(_) => ErrorKind::SensorIoFailure,
            AgentError::ActuatorBusy { .. } => ErrorKind::ActuatorBusy,
            AgentError::ActuatorHardware { .. } => ErrorKind::ActuatorHardwareFailure,
            AgentError::RemoteDelivery { .. } => ErrorKind::RemoteDeliveryFailure,
            AgentError::RemoteConnectionLost(_) => ErrorKind::RemoteConnectionLost,
            AgentError::StartupResource { .. } => ErrorKind::StartupResourceFailure,
            AgentError::UnknownRemoteCommand(_) => ErrorKind::UnknownRemoteCommand,
        }
    }
}

/// Failure reported by a device collaborator (range driver, output line, camera).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The device is held by another process or still finishing a previous operation.
    #[error("device busy: {0}")]
    Busy(String),

    #[error("device I/O error: {0}")]
    Io(String),
}
