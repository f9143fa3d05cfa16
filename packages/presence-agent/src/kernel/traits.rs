// Trait definitions for the agent's infrastructure
//
// These are INFRASTRUCTURE traits only - sensor buses, output lines, camera
// processes and the relay transport. Presence logic and actuator convergence
// live in their own modules and only talk to hardware through these.
//
// Naming convention: Base* for collaborator traits; SensorSource is the one
// capability the poll loop drives directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_client::{AckRequest, ActionRequest, HeartbeatRequest, RelayError, StreamFrame};

use crate::error::{AgentError, DeviceError};
use crate::types::Reading;

// =============================================================================
// Sensor
// =============================================================================

/// A distance sensor polled once per tick.
///
/// `poll` never fails: bus errors and timeouts come back as a `Reading` with
/// `error` set, and the implementation must return within its I/O bound.
#[async_trait]
pub trait SensorSource: Send {
    async fn poll(&mut self) -> Reading;

    /// Release the bus handle. Safe to call more than once.
    fn close(&mut self) {}
}

/// Register-level range driver. Blocking; wrapped by `BlockingSensor`.
pub trait BaseRangeDriver: Send + 'static {
    /// Distance in millimetres, `None` when nothing is in range.
    fn read_range_mm(&mut self) -> Result<Option<u32>, DeviceError>;

    fn close(&mut self) {}
}

// =============================================================================
// Actuator outputs
// =============================================================================

/// A binary digital output line (LED, solenoid relay).
pub trait BaseDigitalOutput: Send + Sync {
    fn write(&self, high: bool) -> Result<(), DeviceError>;

    /// Logical pin identifier, for logs.
    fn pin(&self) -> u8;
}

/// A camera capture/streaming process.
#[async_trait]
pub trait BaseCamera: Send + Sync {
    /// Start capturing. Must not preempt another holder of the device:
    /// returns `DeviceError::Busy` instead.
    async fn start(&self) -> Result<(), DeviceError>;

    /// Stop capturing and release the device before returning. No-op when not started.
    async fn stop(&self);

    /// Whether a started capture is still alive. `false` when never started.
    async fn is_running(&self) -> bool;
}

// =============================================================================
// Relay transport
// =============================================================================

#[async_trait]
pub trait BaseRelay: Send + Sync {
    async fn post_action(&self, url: &str, body: &ActionRequest) -> Result<(), RelayError>;

    async fn post_ack(&self, url: &str, body: &AckRequest) -> Result<(), RelayError>;

    async fn post_heartbeat(&self, url: &str, body: &HeartbeatRequest) -> Result<(), RelayError>;

    async fn open_command_stream(
        &self,
        url: &str,
    ) -> Result<BoxStream<'static, Result<StreamFrame, RelayError>>, RelayError>;
}

// =============================================================================
// Hardware acquisition
// =============================================================================

/// Opens the hardware the supervisor owns. Each resource is opened once at
/// startup; any error aborts startup.
pub trait BaseHardware {
    fn open_sensor(&self) -> Result<Box<dyn SensorSource>, AgentError>;

    fn open_output(&self, name: &str, pin: u8) -> Result<Arc<dyn BaseDigitalOutput>, AgentError>;

    /// `None` when this device has no camera.
    fn open_camera(&self) -> Result<Option<Arc<dyn BaseCamera>>, AgentError>;
}
