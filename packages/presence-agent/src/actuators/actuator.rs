//! A single idempotent boolean actuator.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::error::{DeviceError, ErrorKind};
use crate::kernel::{BaseCamera, BaseDigitalOutput};
use crate::types::ActuatorState;

/// How an actuator reaches the hardware.
pub enum ActuatorDriver {
    /// LED or solenoid line: a plain digital write.
    Line(Arc<dyn BaseDigitalOutput>),
    /// Camera capture process: guarded start, idempotent stop.
    Camera(Arc<dyn BaseCamera>),
}

/// Result of one convergence attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorOutcome {
    /// Already in the desired state; nothing was written.
    Unchanged,
    Applied,
    Failed(ErrorKind, String),
}

impl ActuatorOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ActuatorOutcome::Failed(..))
    }
}

pub struct Actuator {
    driver: ActuatorDriver,
    state: Mutex<ActuatorState>,
    /// One start-or-stop in flight at a time.
    transition: tokio::sync::Mutex<()>,
}

impl Actuator {
    pub fn line(name: impl Into<String>, output: Arc<dyn BaseDigitalOutput>) -> Self {
        Self::new(name, ActuatorDriver::Line(output))
    }

    pub fn camera(name: impl Into<String>, camera: Arc<dyn BaseCamera>) -> Self {
        Self::new(name, ActuatorDriver::Camera(camera))
    }

    fn new(name: impl Into<String>, driver: ActuatorDriver) -> Self {
        Self {
            driver,
            state: Mutex::new(ActuatorState::new(name)),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> String {
        self.with_state(|s| s.name.clone())
    }

    pub fn is_camera(&self) -> bool {
        matches!(self.driver, ActuatorDriver::Camera(_))
    }

    pub fn state(&self) -> ActuatorState {
        self.with_state(|s| s.clone())
    }

    /// Record `desired` and drive the hardware toward it if `applied` differs.
    ///
    /// A failed attempt is not retried here; the next call with the same
    /// target tries again.
    pub async fn converge(&self, desired: bool) -> ActuatorOutcome {
        let _transition = self.transition.lock().await;
        self.reconcile().await;

        let (name, applied) = self.with_state(|s| {
            s.desired = desired;
            (s.name.clone(), s.applied)
        });
        if applied == desired {
            return ActuatorOutcome::Unchanged;
        }

        let result = match &self.driver {
            ActuatorDriver::Line(output) => output.write(desired),
            ActuatorDriver::Camera(camera) if desired => camera.start().await,
            ActuatorDriver::Camera(camera) => {
                camera.stop().await;
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                info!(actuator = %name, on = desired, "actuator applied");
                self.with_state(|s| {
                    s.applied = desired;
                    s.last_error = None;
                    s.degraded = false;
                });
                ActuatorOutcome::Applied
            }
            Err(DeviceError::Busy(reason)) => {
                warn!(actuator = %name, reason = %reason, "actuator unavailable, will retry on next transition");
                self.with_state(|s| s.last_error = Some(ErrorKind::ActuatorBusy));
                ActuatorOutcome::Failed(ErrorKind::ActuatorBusy, reason)
            }
            Err(DeviceError::Io(reason)) => {
                error!(actuator = %name, on = desired, reason = %reason, "actuator hardware failure");
                self.with_state(|s| {
                    s.last_error = Some(ErrorKind::ActuatorHardwareFailure);
                    s.degraded = true;
                });
                ActuatorOutcome::Failed(ErrorKind::ActuatorHardwareFailure, reason)
            }
        }
    }

    /// Re-check hardware that can change state on its own. Skipped while a
    /// transition is in flight.
    pub async fn refresh(&self) {
        if let Ok(_transition) = self.transition.try_lock() {
            self.reconcile().await;
        }
    }

    /// A camera process can exit by itself; `applied` must follow it so the
    /// next start really starts.
    async fn reconcile(&self) {
        let ActuatorDriver::Camera(camera) = &self.driver else {
            return;
        };
        if self.with_state(|s| s.applied) && !camera.is_running().await {
            let name = self.with_state(|s| {
                s.applied = false;
                s.name.clone()
            });
            warn!(actuator = %name, "camera exited on its own, marked off");
        }
    }

    /// Drive to off regardless of what `applied` says.
    pub async fn force_safe(&self) {
        let _transition = self.transition.lock().await;
        let name = self.with_state(|s| {
            s.desired = false;
            s.name.clone()
        });

        let result = match &self.driver {
            ActuatorDriver::Line(output) => output.write(false),
            ActuatorDriver::Camera(camera) => {
                camera.stop().await;
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                debug!(actuator = %name, "actuator forced off");
                self.with_state(|s| s.applied = false);
            }
            Err(e) => {
                error!(actuator = %name, error = %e, "failed to drive actuator to safe state");
                self.with_state(|s| {
                    s.last_error = Some(ErrorKind::ActuatorHardwareFailure);
                    s.degraded = true;
                });
            }
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ActuatorState) -> R) -> R {
        // Every update leaves the state whole, so poisoning is ignored
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}
