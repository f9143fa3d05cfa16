use std::time::Duration;

use futures::future::join_all;

use super::actuator::{Actuator, ActuatorOutcome};
use crate::types::{ActuatorState, TransitionEvent};

/// Outcome of driving every actuator toward one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub desired: bool,
    pub outcomes: Vec<(String, ActuatorOutcome)>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|(_, o)| o.is_failure())
    }

    /// Human-readable result, used as the acknowledgment message.
    pub fn summary(&self) -> String {
        if self.outcomes.is_empty() {
            return "no actuators configured".to_string();
        }
        let target = if self.desired { "on" } else { "off" };
        self.outcomes
            .iter()
            .map(|(name, outcome)| match outcome {
                ActuatorOutcome::Unchanged => format!("{} already {}", name, target),
                ActuatorOutcome::Applied => format!("{} {}", name, target),
                ActuatorOutcome::Failed(kind, reason) => format!("{} {}: {}", name, kind, reason),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The fixed set of actuators driven by presence and remote commands.
pub struct ActuatorSet {
    actuators: Vec<Actuator>,
}

impl ActuatorSet {
    pub fn new(actuators: Vec<Actuator>) -> Self {
        Self { actuators }
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    pub async fn apply(&self, event: &TransitionEvent) -> ApplyReport {
        self.set_desired(event.kind.desired()).await
    }

    /// Converge every actuator concurrently; each one serialises on its own lock.
    pub async fn set_desired(&self, desired: bool) -> ApplyReport {
        let outcomes = join_all(self.actuators.iter().map(|actuator| async move {
            (actuator.name(), actuator.converge(desired).await)
        }))
        .await;

        ApplyReport { desired, outcomes }
    }

    /// Drive every actuator off, giving each at most `limit`.
    ///
    /// Returns the names of actuators that did not finish in time.
    pub async fn force_safe(&self, limit: Duration) -> Vec<String> {
        let results = join_all(self.actuators.iter().map(|actuator| async move {
            match tokio::time::timeout(limit, actuator.force_safe()).await {
                Ok(()) => None,
                Err(_) => Some(actuator.name()),
            }
        }))
        .await;

        results.into_iter().flatten().collect()
    }

    /// Pick up actuators that changed state on their own (a camera process exiting).
    pub async fn refresh(&self) {
        join_all(self.actuators.iter().map(Actuator::refresh)).await;
    }

    pub fn snapshot(&self) -> Vec<ActuatorState> {
        self.actuators.iter().map(Actuator::state).collect()
    }

    pub fn camera_on(&self) -> bool {
        self.actuators
            .iter()
            .any(|a| a.is_camera() && a.state().applied)
    }

    /// `led=on camera=off(pending on)[actuator_busy]`
    pub fn status_line(&self) -> String {
        self.snapshot()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
