//! Applies inbound remote commands and acknowledges them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use relay_client::AckRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dedupe::{AckOutcome, SeenRequests};
use super::Notifier;
use crate::actuators::{ActuatorHandle, DirectiveKind, DirectiveOrigin};
use crate::error::AgentError;
use crate::supervisor::Service;
use crate::types::{CommandAction, RemoteCommand};

pub struct CommandListener {
    notifier: Arc<Notifier>,
    actuators: ActuatorHandle,
    seen: SeenRequests,
    unlock_duration: Duration,
}

impl CommandListener {
    pub fn new(
        notifier: Arc<Notifier>,
        actuators: ActuatorHandle,
        dedupe_capacity: usize,
        unlock_duration: Duration,
    ) -> Self {
        Self {
            notifier,
            actuators,
            seen: SeenRequests::new(dedupe_capacity),
            unlock_duration,
        }
    }

    /// Handle one command; returns the acknowledgment to send, if any.
    ///
    /// Commands for other devices are ignored without an ack. A repeated
    /// request id is re-acknowledged with its first outcome and not applied again.
    pub async fn handle(&mut self, command: RemoteCommand) -> Option<AckRequest> {
        let device = self.notifier.device_name().to_string();
        if !command.is_addressed_to(&device) {
            debug!(target_device = %command.device, action = %command.action, "command for another device ignored");
            return None;
        }

        if let Some(request_id) = &command.request_id {
            if let Some(outcome) = self.seen.get(request_id) {
                info!(request_id = %request_id, action = %command.action, "duplicate command, re-acknowledging");
                return Some(ack(request_id, &device, outcome.clone()));
            }
        }

        info!(
            request_id = ?command.request_id,
            action = %command.action,
            "remote command received"
        );
        let outcome = self.execute(&command.action).await;

        let Some(request_id) = command.request_id else {
            warn!(action = %command.action, status = %outcome.status, "command has no request id, cannot acknowledge");
            return None;
        };
        self.seen.insert(request_id.clone(), outcome.clone());
        Some(ack(&request_id, &device, outcome))
    }

    async fn execute(&self, action: &CommandAction) -> AckOutcome {
        let kind = match action {
            CommandAction::StartCamera => DirectiveKind::Set(true),
            CommandAction::StopCamera | CommandAction::Lock => DirectiveKind::Set(false),
            CommandAction::Unlock => DirectiveKind::Pulse(self.unlock_duration),
            CommandAction::Unknown(name) => {
                let e = AgentError::UnknownRemoteCommand(name.clone());
                warn!(error = %e, kind = %e.kind(), "rejecting command");
                return AckOutcome::failed(e.to_string());
            }
        };

        match self.actuators.request(kind, DirectiveOrigin::Remote).await {
            Some(report) if report.is_success() => AckOutcome::executed(report.summary()),
            Some(report) => AckOutcome::failed(report.summary()),
            None => AckOutcome::failed("actuator service unavailable"),
        }
    }
}

fn ack(request_id: &str, device: &str, outcome: AckOutcome) -> AckRequest {
    AckRequest {
        request_id: request_id.to_string(),
        device_id: device.to_string(),
        status: outcome.status,
        message: outcome.message,
        timestamp: Utc::now(),
    }
}

#[async_trait]
impl Service for CommandListener {
    fn name(&self) -> &str {
        "command-listener"
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut commands = self.notifier.commands();

        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.next() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            if let Some(ack) = self.handle(command).await {
                self.notifier.acknowledge(ack);
            }
        }

        debug!("command listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::{Actuator, ActuatorService, ActuatorSet};
    use crate::kernel::{MockCamera, MockRelay, RecordingOutput};
    use crate::notifier::{DeliveryPolicy, NotifierConfig};
    use relay_client::AckStatus;

    struct Fixture {
        listener: CommandListener,
        camera: MockCamera,
        solenoid: RecordingOutput,
        _token: CancellationToken,
    }

    fn fixture() -> Fixture {
        let camera = MockCamera::new();
        let solenoid = RecordingOutput::new(27);
        let set = Arc::new(ActuatorSet::new(vec![
            Actuator::line("solenoid", Arc::new(solenoid.clone())),
            Actuator::camera("camera", Arc::new(camera.clone())),
        ]));
        let (service, handle) = ActuatorService::new(set);
        let token = CancellationToken::new();
        tokio::spawn(Box::new(service).run(token.clone()));

        let (notifier, _workers) = Notifier::new(
            NotifierConfig {
                device_name: "device1".into(),
                endpoints: vec![],
                ack_url: None,
                command_stream_url: None,
                delivery: DeliveryPolicy::default(),
                reconnect_base: Duration::from_secs(1),
                reconnect_max: Duration::from_secs(30),
                stream_idle_timeout: Duration::from_secs(60),
            },
            Arc::new(MockRelay::new()),
        );

        Fixture {
            listener: CommandListener::new(
                Arc::new(notifier),
                handle,
                16,
                Duration::from_secs(3),
            ),
            camera,
            solenoid,
            _token: token,
        }
    }

    fn command(id: &str, action: &str, device: &str) -> RemoteCommand {
        RemoteCommand {
            request_id: Some(id.into()),
            action: CommandAction::from_wire(action),
            device: device.into(),
        }
    }

    #[tokio::test]
    async fn start_camera_is_applied_and_acknowledged() {
        let mut f = fixture();

        let ack = f
            .listener
            .handle(command("r1", "start_camera", "device1"))
            .await
            .unwrap();

        assert_eq!(ack.request_id, "r1");
        assert_eq!(ack.device_id, "device1");
        assert_eq!(ack.status, AckStatus::Executed);
        assert!(f.camera.is_running());
        assert!(f.solenoid.level());
    }

    #[tokio::test]
    async fn duplicate_request_has_one_side_effect_and_two_acks() {
        let mut f = fixture();

        let first = f
            .listener
            .handle(command("r1", "start_camera", "device1"))
            .await
            .unwrap();
        f.listener
            .handle(command("r2", "stop_camera", "device1"))
            .await
            .unwrap();
        let second = f
            .listener
            .handle(command("r1", "start_camera", "device1"))
            .await
            .unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.message, second.message);
        assert_eq!(f.camera.start_count(), 1);
        assert!(!f.camera.is_running());
    }

    #[tokio::test]
    async fn other_device_is_ignored() {
        let mut f = fixture();

        let ack = f
            .listener
            .handle(command("r1", "start_camera", "device2"))
            .await;

        assert!(ack.is_none());
        assert_eq!(f.camera.start_count(), 0);
        assert!(f.solenoid.writes().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_device() {
        let mut f = fixture();

        let ack = f.listener.handle(command("r1", "lock", "all")).await.unwrap();
        assert_eq!(ack.status, AckStatus::Executed);
    }

    #[tokio::test]
    async fn unknown_action_fails_without_side_effect() {
        let mut f = fixture();

        let ack = f
            .listener
            .handle(command("r1", "self_destruct", "device1"))
            .await
            .unwrap();

        assert_eq!(ack.status, AckStatus::Failed);
        assert!(ack.message.contains("self_destruct"));
        assert!(f.solenoid.writes().is_empty());
        assert_eq!(f.camera.start_count(), 0);
    }

    #[tokio::test]
    async fn busy_camera_is_acknowledged_failed() {
        let mut f = fixture();
        f.camera.set_busy(true);

        let ack = f
            .listener
            .handle(command("r1", "start_camera", "device1"))
            .await
            .unwrap();

        assert_eq!(ack.status, AckStatus::Failed);
        assert!(ack.message.contains("actuator_busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_energises_then_releases() {
        let mut f = fixture();

        let ack = f
            .listener
            .handle(command("r1", "verified", "device1"))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Executed);
        assert!(f.solenoid.level());

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(!f.solenoid.level());
    }

    #[tokio::test]
    async fn missing_request_id_is_applied_but_not_acknowledged() {
        let mut f = fixture();

        let ack = f
            .listener
            .handle(RemoteCommand {
                request_id: None,
                action: CommandAction::StartCamera,
                device: "all".into(),
            })
            .await;

        assert!(ack.is_none());
        assert!(f.camera.is_running());
    }
}
