//! The single consumer of actuator directives.
//!
//! Both the poll loop and the command listener push `Directive`s onto one
//! unbounded queue. `ActuatorService` applies them strictly in arrival order,
//! so presence transitions and remote commands never race on an actuator and
//! an energise is never overtaken by the de-energise queued after it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::set::{ActuatorSet, ApplyReport};
use crate::supervisor::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Drive every actuator on or off.
    Set(bool),
    /// Drive on, then off again after the duration unless another directive arrives first.
    Pulse(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOrigin {
    Presence,
    Remote,
}

impl fmt::Display for DirectiveOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveOrigin::Presence => write!(f, "presence"),
            DirectiveOrigin::Remote => write!(f, "remote"),
        }
    }
}

pub struct Directive {
    pub kind: DirectiveKind,
    pub origin: DirectiveOrigin,
    pub reply: Option<oneshot::Sender<ApplyReport>>,
}

/// Cloneable sender side of the directive queue.
#[derive(Clone)]
pub struct ActuatorHandle {
    tx: mpsc::UnboundedSender<Directive>,
}

impl ActuatorHandle {
    /// Enqueue without waiting. Returns false once the service has stopped.
    pub fn submit(&self, kind: DirectiveKind, origin: DirectiveOrigin) -> bool {
        self.tx
            .send(Directive {
                kind,
                origin,
                reply: None,
            })
            .is_ok()
    }

    /// Enqueue and wait for the result. `None` if the service stopped first.
    pub async fn request(&self, kind: DirectiveKind, origin: DirectiveOrigin) -> Option<ApplyReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Directive {
                kind,
                origin,
                reply: Some(reply),
            })
            .ok()?;
        rx.await.ok()
    }
}

pub struct ActuatorService {
    actuators: Arc<ActuatorSet>,
    rx: mpsc::UnboundedReceiver<Directive>,
}

impl ActuatorService {
    pub fn new(actuators: Arc<ActuatorSet>) -> (Self, ActuatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { actuators, rx }, ActuatorHandle { tx })
    }

    async fn execute(&self, directive: Directive, release_at: &mut Option<Instant>) {
        // Any new directive supersedes a pending pulse release
        if release_at.take().is_some() {
            debug!("pending release cancelled by newer directive");
        }

        let report = match directive.kind {
            DirectiveKind::Set(desired) => self.actuators.set_desired(desired).await,
            DirectiveKind::Pulse(duration) => {
                let report = self.actuators.set_desired(true).await;
                *release_at = Some(Instant::now() + duration);
                report
            }
        };

        if report.is_success() {
            debug!(origin = %directive.origin, kind = ?directive.kind, result = %report.summary(), "directive applied");
        } else {
            warn!(origin = %directive.origin, kind = ?directive.kind, result = %report.summary(), "directive partially failed");
        }

        if let Some(reply) = directive.reply {
            let _ = reply.send(report);
        }
    }
}

#[async_trait]
impl Service for ActuatorService {
    fn name(&self) -> &str {
        "actuators"
    }

    async fn run(mut self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut release_at: Option<Instant> = None;

        loop {
            let deadline = release_at;
            let release = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = release => {
                    release_at = None;
                    info!("pulse elapsed, releasing actuators");
                    let report = self.actuators.set_desired(false).await;
                    if !report.is_success() {
                        warn!(result = %report.summary(), "release partially failed");
                    }
                }
                directive = self.rx.recv() => match directive {
                    Some(directive) => self.execute(directive, &mut release_at).await,
                    None => break,
                },
            }
        }

        debug!("actuator service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::Actuator;
    use crate::kernel::RecordingOutput;

    fn spawn_service(output: &RecordingOutput) -> (ActuatorHandle, CancellationToken) {
        let set = Arc::new(ActuatorSet::new(vec![Actuator::line(
            "solenoid",
            Arc::new(output.clone()),
        )]));
        let (service, handle) = ActuatorService::new(set);
        let token = CancellationToken::new();
        tokio::spawn(Box::new(service).run(token.clone()));
        (handle, token)
    }

    #[tokio::test]
    async fn directives_apply_in_submission_order() {
        let output = RecordingOutput::new(27);
        let (handle, _token) = spawn_service(&output);

        for desired in [true, false, true, false] {
            assert!(handle.submit(DirectiveKind::Set(desired), DirectiveOrigin::Presence));
        }
        let report = handle
            .request(DirectiveKind::Set(false), DirectiveOrigin::Remote)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(output.writes(), vec![true, false, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_releases_after_duration() {
        let output = RecordingOutput::new(27);
        let (handle, _token) = spawn_service(&output);

        handle
            .request(DirectiveKind::Pulse(Duration::from_secs(3)), DirectiveOrigin::Remote)
            .await
            .unwrap();
        assert!(output.level());

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(output.level());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!output.level());
        assert_eq!(output.writes(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_directive_cancels_pending_release() {
        let output = RecordingOutput::new(27);
        let (handle, _token) = spawn_service(&output);

        handle
            .request(DirectiveKind::Pulse(Duration::from_secs(3)), DirectiveOrigin::Remote)
            .await
            .unwrap();
        handle
            .request(DirectiveKind::Set(true), DirectiveOrigin::Presence)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(output.level());
        assert_eq!(output.writes(), vec![true]);
    }

    #[tokio::test]
    async fn request_after_shutdown_returns_none() {
        let output = RecordingOutput::new(27);
        let (handle, token) = spawn_service(&output);
        token.cancel();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(handle
            .request(DirectiveKind::Set(true), DirectiveOrigin::Remote)
            .await
            .is_none());
    }
}
