use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::poll_loop::SharedSensor;
use crate::actuators::ActuatorSet;

/// Drives every actuator to its safe state and releases the sensor.
///
/// Runs at most once, however many exit paths reach it.
pub struct Cleanup {
    actuators: Arc<ActuatorSet>,
    sensor: SharedSensor,
    done: AtomicBool,
    timeout: Duration,
}

impl Cleanup {
    pub fn new(actuators: Arc<ActuatorSet>, sensor: SharedSensor, timeout: Duration) -> Self {
        Self {
            actuators,
            sensor,
            done: AtomicBool::new(false),
            timeout,
        }
    }

    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Returns false if cleanup already ran.
    pub async fn run(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!("cleanup: driving actuators to safe state");
        for name in self.actuators.force_safe(self.timeout).await {
            error!(
                actuator = %name,
                timeout_ms = self.timeout.as_millis() as u64,
                "cleanup: actuator did not reach safe state in time, abandoned"
            );
        }

        match tokio::time::timeout(self.timeout, self.sensor.lock()).await {
            Ok(mut sensor) => sensor.close(),
            Err(_) => warn!("cleanup: sensor still in use, handle released on exit"),
        }

        info!(actuators = %self.actuators.status_line(), "cleanup complete");
        true
    }
}
