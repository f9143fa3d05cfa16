//! Supervisor: acquires hardware, wires the components together, runs them,
//! and guarantees the safe-state cleanup on the way out.
//!
//! ```text
//! PollLoop
//!     ├─► ActuatorHandle::submit ──► ActuatorService ──► ActuatorSet
//!     └─► Notifier::notify ──► DeliveryWorker (one per endpoint)
//!
//! Notifier::commands ──► CommandListener
//!     ├─► ActuatorHandle::request (waits for the ApplyReport)
//!     └─► Notifier::acknowledge ──► DeliveryWorker (ack endpoint)
//! ```

pub mod cleanup;
pub mod host;
pub mod poll_loop;

pub use cleanup::Cleanup;
pub use host::{ExitReason, HostReport, Service, ServiceHost};
pub use poll_loop::{PollLoop, SharedSensor};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::actuators::{Actuator, ActuatorService, ActuatorSet};
use crate::config::Config;
use crate::error::AgentError;
use crate::kernel::{BaseHardware, BaseRelay};
use crate::notifier::{CommandListener, Heartbeat, Notifier, NotifierConfig};
use crate::presence::Debouncer;

pub struct Supervisor {
    host: ServiceHost,
    cleanup: Arc<Cleanup>,
    actuators: Arc<ActuatorSet>,
}

impl Supervisor {
    /// Acquire every hardware resource and build the services.
    ///
    /// Fails with `StartupResourceFailure` if anything cannot be acquired;
    /// whatever was already opened is released before returning.
    pub fn start(
        config: &Config,
        hardware: &dyn BaseHardware,
        relay: Arc<dyn BaseRelay>,
    ) -> Result<Self, AgentError> {
        config.validate()?;

        let mut sensor = hardware.open_sensor()?;
        let actuators = match acquire_actuators(config, hardware) {
            Ok(actuators) => actuators,
            Err(e) => {
                sensor.close();
                return Err(e);
            }
        };

        let actuators = Arc::new(ActuatorSet::new(actuators));
        info!(
            device = %config.device_name,
            actuators = %actuators.status_line(),
            endpoints = config.action_webhook_urls.len(),
            "hardware acquired"
        );

        let sensor: SharedSensor = Arc::new(Mutex::new(sensor));
        let (actuator_service, handle) = ActuatorService::new(actuators.clone());
        let (notifier, workers) = Notifier::new(NotifierConfig::from(config), relay.clone());
        let notifier = Arc::new(notifier);

        let poll_loop = PollLoop::new(
            sensor.clone(),
            Debouncer::new(config.debounce()),
            handle.clone(),
            actuators.clone(),
            notifier.clone(),
            config.poll_interval,
        );

        let mut host = ServiceHost::new(config.shutdown_timeout)
            .with_service(actuator_service)
            .with_service(poll_loop);
        for worker in workers {
            host.add(Box::new(worker));
        }
        if config.command_stream_url.is_some() {
            host.add(Box::new(CommandListener::new(
                notifier.clone(),
                handle,
                config.dedupe_capacity,
                config.unlock_duration,
            )));
        }
        if let Some(url) = &config.heartbeat_url {
            host.add(Box::new(Heartbeat::new(
                config.device_name.clone(),
                url.clone(),
                config.heartbeat_interval,
                relay,
                actuators.clone(),
            )));
        }

        let cleanup = Arc::new(Cleanup::new(
            actuators.clone(),
            sensor,
            config.shutdown_timeout,
        ));

        Ok(Self {
            host,
            cleanup,
            actuators,
        })
    }

    pub fn actuators(&self) -> Arc<ActuatorSet> {
        self.actuators.clone()
    }

    pub fn cleanup(&self) -> Arc<Cleanup> {
        self.cleanup.clone()
    }

    /// Run until `shutdown` resolves or a service exits, then clean up.
    pub async fn run<F>(self, shutdown: F) -> HostReport
    where
        F: Future<Output = ()> + Send,
    {
        info!(services = self.host.len(), "supervisor running");
        let report = self.host.run_until(shutdown).await;

        if let ExitReason::ServiceExited(name) = &report.reason {
            error!(service = %name, "stopped because a service exited");
        }
        self.cleanup.run().await;

        report
    }
}

fn acquire_actuators(
    config: &Config,
    hardware: &dyn BaseHardware,
) -> Result<Vec<Actuator>, AgentError> {
    let mut actuators = Vec::new();

    if let Some(pin) = config.led_pin {
        actuators.push(Actuator::line("led", hardware.open_output("led", pin)?));
    }
    if let Some(pin) = config.solenoid_pin {
        actuators.push(Actuator::line(
            "solenoid",
            hardware.open_output("solenoid", pin)?,
        ));
    }
    if let Some(camera) = hardware.open_camera()? {
        actuators.push(Actuator::camera("camera", camera));
    }

    Ok(actuators)
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
