//! Camera capture process.
//!
//! The camera is an external capture command (e.g. `rpicam-vid -t 0 ...`).
//! Starting it spawns the process; a process that exits during the startup
//! grace period is taken to mean the device is held by someone else.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::BaseCamera;
use crate::error::DeviceError;

pub struct ProcessCamera {
    program: String,
    args: Vec<String>,
    startup_grace: Duration,
    child: Mutex<Option<Child>>,
}

impl ProcessCamera {
    /// Build from a whitespace-separated command line.
    pub fn from_command_line(command: &str, startup_grace: Duration) -> Result<Self, DeviceError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| DeviceError::Io("empty camera command".into()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            startup_grace,
            child: Mutex::new(None),
        })
    }
}

#[async_trait]
impl BaseCamera for ProcessCamera {
    async fn start(&self) -> Result<(), DeviceError> {
        let mut slot = self.child.lock().await;

        if let Some(child) = slot.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => debug!(%status, "previous camera process had exited"),
                Err(e) => warn!(error = %e, "failed to poll camera process"),
            }
            *slot = None;
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeviceError::Io(format!("failed to spawn {}: {}", self.program, e)))?;

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            // Still running after the grace period: we own the device
            Err(_) => {
                info!(program = %self.program, pid = ?child.id(), "camera started");
                *slot = Some(child);
                Ok(())
            }
            Ok(Ok(status)) => Err(DeviceError::Busy(format!(
                "{} exited during startup ({})",
                self.program, status
            ))),
            Ok(Err(e)) => Err(DeviceError::Io(e.to_string())),
        }
    }

    async fn stop(&self) {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            // kill() also reaps, so the device is free once this returns
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill camera process");
            } else {
                info!(program = %self.program, "camera stopped");
            }
        }
    }

    async fn is_running(&self) -> bool {
        let mut slot = self.child.lock().await;
        let Some(child) = slot.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(program = %self.program, %status, "camera process exited on its own");
                *slot = None;
                false
            }
            Err(e) => {
                warn!(error = %e, "failed to poll camera process");
                true
            }
        }
    }
}

/// Camera that only tracks whether it is running, for `--simulate`.
#[derive(Default)]
pub struct SimulatedCamera {
    running: Mutex<bool>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseCamera for SimulatedCamera {
    async fn start(&self) -> Result<(), DeviceError> {
        let mut running = self.running.lock().await;
        if !*running {
            info!("simulated camera started");
            *running = true;
        }
        Ok(())
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        if *running {
            info!("simulated camera stopped");
            *running = false;
        }
    }

    async fn is_running(&self) -> bool {
        *self.running.lock().await
    }
}
