//! The fixed-cadence loop: sensor → debouncer → {actuators, notifier}.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuators::{ActuatorHandle, ActuatorSet, DirectiveKind, DirectiveOrigin};
use crate::kernel::SensorSource;
use crate::machine::Machine;
use crate::notifier::Notifier;
use crate::presence::Debouncer;
use crate::supervisor::Service;
use crate::types::{Reading, TransitionEvent};

pub type SharedSensor = Arc<Mutex<Box<dyn SensorSource>>>;

pub struct PollLoop {
    sensor: SharedSensor,
    debouncer: Debouncer,
    actuators: ActuatorHandle,
    status: Arc<ActuatorSet>,
    notifier: Arc<Notifier>,
    interval: Duration,
}

impl PollLoop {
    pub fn new(
        sensor: SharedSensor,
        debouncer: Debouncer,
        actuators: ActuatorHandle,
        status: Arc<ActuatorSet>,
        notifier: Arc<Notifier>,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            debouncer,
            actuators,
            status,
            notifier,
            interval,
        }
    }

    /// One tick. Returns the transition, if the reading caused one.
    pub async fn tick(&mut self) -> Option<TransitionEvent> {
        let reading = self.sensor.lock().await.poll().await;
        let event = self.debouncer.decide(&reading);

        if let Some(event) = &event {
            info!(
                transition = %event.kind,
                distance_mm = ?event.distance_mm,
                "presence transition"
            );
            if !self
                .actuators
                .submit(DirectiveKind::Set(event.kind.desired()), DirectiveOrigin::Presence)
            {
                warn!(transition = %event.kind, "actuator service stopped, transition not applied");
            }
            self.notifier.notify(event);
        }

        self.log_status(&reading);
        event
    }

    fn log_status(&self, reading: &Reading) {
        let distance = match (reading.distance_mm, reading.error) {
            (_, Some(kind)) => kind.to_string(),
            (Some(mm), None) => format!("{}mm", mm),
            (None, None) => "out of range".to_string(),
        };
        info!(
            target: "presence_agent::status",
            distance = %distance,
            presence = %self.debouncer.presence(),
            actuators = %self.status.status_line(),
            "status"
        );
    }
}

#[async_trait]
impl Service for PollLoop {
    fn name(&self) -> &str {
        "poll-loop"
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "poll loop starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        debug!("poll loop stopped");
        Ok(())
    }
}
