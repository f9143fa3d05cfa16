//! Notifier: outbound presence notifications, acknowledgments, and the
//! inbound command stream.
//!
//! ```text
//! PollLoop ──notify──► per-endpoint queue ──► DeliveryWorker ──► POST action
//! CommandListener ──acknowledge──► ack queue ──► DeliveryWorker ──► POST ack
//! relay SSE ──commands()──► CommandListener
//! ```

pub mod backoff;
pub mod dedupe;
pub mod delivery;
pub mod heartbeat;
pub mod listener;

pub use backoff::Backoff;
pub use dedupe::{AckOutcome, SeenRequests};
pub use delivery::{DeliveryPayload, DeliveryPolicy, DeliveryTask, DeliveryWorker};
pub use heartbeat::Heartbeat;
pub use listener::CommandListener;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use relay_client::{AckRequest, ActionRequest, RelayError, StreamFrame};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AgentError, ErrorKind};
use crate::kernel::BaseRelay;
use crate::types::{RemoteCommand, TransitionEvent};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub device_name: String,
    pub endpoints: Vec<String>,
    pub ack_url: Option<String>,
    pub command_stream_url: Option<String>,
    pub delivery: DeliveryPolicy,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub stream_idle_timeout: Duration,
}

impl From<&Config> for NotifierConfig {
    fn from(config: &Config) -> Self {
        Self {
            device_name: config.device_name.clone(),
            endpoints: config.action_webhook_urls.clone(),
            ack_url: config.ack_url.clone(),
            command_stream_url: config.command_stream_url.clone(),
            delivery: DeliveryPolicy {
                attempts: config.delivery_attempts,
                retry_delay: config.delivery_retry_delay,
            },
            reconnect_base: config.reconnect_base,
            reconnect_max: config.reconnect_max,
            stream_idle_timeout: config.stream_idle_timeout,
        }
    }
}

struct Endpoint {
    url: String,
    tx: mpsc::UnboundedSender<DeliveryTask>,
}

pub struct Notifier {
    config: NotifierConfig,
    relay: Arc<dyn BaseRelay>,
    endpoints: Vec<Endpoint>,
    ack_endpoint: Option<Endpoint>,
}

impl Notifier {
    /// Build the notifier and one delivery worker per outbound endpoint.
    /// The workers must be run for deliveries to leave the queues.
    pub fn new(config: NotifierConfig, relay: Arc<dyn BaseRelay>) -> (Self, Vec<DeliveryWorker>) {
        let mut workers = Vec::new();
        let mut open = |url: &str| {
            let (worker, tx) = DeliveryWorker::new(url, relay.clone(), config.delivery);
            workers.push(worker);
            Endpoint {
                url: url.to_string(),
                tx,
            }
        };

        let endpoints = config.endpoints.iter().map(|url| open(url)).collect();
        let ack_endpoint = config.ack_url.as_deref().map(&mut open);

        let notifier = Self {
            config,
            relay,
            endpoints,
            ack_endpoint,
        };
        (notifier, workers)
    }

    pub fn device_name(&self) -> &str {
        &self.config.device_name
    }

    /// Queue `start_camera` / `stop_camera` for every endpoint. Never blocks.
    pub fn notify(&self, event: &TransitionEvent) {
        let action = event.kind.remote_action();
        for endpoint in &self.endpoints {
            let task = DeliveryTask::new(
                DeliveryPayload::Action(ActionRequest {
                    action: action.to_string(),
                    device: self.config.device_name.clone(),
                }),
                endpoint.url.clone(),
            );
            if endpoint.tx.send(task).is_err() {
                warn!(endpoint = %endpoint.url, action, "delivery worker stopped, notification dropped");
            }
        }
        debug!(action, endpoints = self.endpoints.len(), "notification queued");
    }

    /// Queue an acknowledgment. Without an ack endpoint it is only logged.
    pub fn acknowledge(&self, ack: AckRequest) {
        match &self.ack_endpoint {
            Some(endpoint) => {
                let task = DeliveryTask::new(DeliveryPayload::Ack(ack), endpoint.url.clone());
                if endpoint.tx.send(task).is_err() {
                    warn!(endpoint = %endpoint.url, "ack worker stopped, acknowledgment dropped");
                }
            }
            None => info!(
                request_id = %ack.request_id,
                status = %ack.status,
                message = %ack.message,
                "acknowledgment (no ack endpoint configured)"
            ),
        }
    }

    /// Inbound commands, forever.
    ///
    /// Connection failures, mid-stream drops and connections silent for
    /// `stream_idle_timeout` are retried with exponential backoff. The backoff
    /// resets when a command arrives or when a dropped connection had stayed
    /// up for at least `reconnect_max`; control frames alone do not reset it.
    /// Without a command stream URL the stream never yields.
    pub fn commands(&self) -> BoxStream<'static, RemoteCommand> {
        let Some(url) = self.config.command_stream_url.clone() else {
            return stream::pending().boxed();
        };

        let feed = CommandFeed {
            relay: self.relay.clone(),
            url,
            backoff: Backoff::new(self.config.reconnect_base, self.config.reconnect_max),
            stable_after: self.config.reconnect_max,
            idle_timeout: self.config.stream_idle_timeout,
            connection: None,
            connected_at: Instant::now(),
        };

        stream::unfold(feed, |mut feed| async move {
            let command = feed.next_command().await;
            Some((command, feed))
        })
        .boxed()
    }
}

struct CommandFeed {
    relay: Arc<dyn BaseRelay>,
    url: String,
    backoff: Backoff,
    stable_after: Duration,
    idle_timeout: Duration,
    connection: Option<BoxStream<'static, Result<StreamFrame, RelayError>>>,
    connected_at: Instant,
}

impl CommandFeed {
    async fn next_command(&mut self) -> RemoteCommand {
        loop {
            let Some(connection) = self.connection.as_mut() else {
                match self.relay.open_command_stream(&self.url).await {
                    Ok(connection) => {
                        info!(url = %self.url, "command stream connected");
                        self.connection = Some(connection);
                        self.connected_at = Instant::now();
                    }
                    Err(e) => self.wait_to_reconnect("connect failed", &e).await,
                }
                continue;
            };

            let next = tokio::time::timeout(self.idle_timeout, connection.next()).await;
            match next {
                Ok(Some(Ok(frame))) => match RemoteCommand::from_frame(&frame) {
                    Some(command) => {
                        self.backoff.reset();
                        return command;
                    }
                    None => match frame.name() {
                        Some("connected") => info!(url = %self.url, "command stream handshake"),
                        name => debug!(frame = ?name, "control frame ignored"),
                    },
                },
                Ok(Some(Err(e))) => self.disconnect("stream dropped", &e).await,
                Ok(None) => {
                    let closed = AgentError::RemoteConnectionLost("closed by server".into());
                    self.disconnect("stream ended", &closed).await;
                }
                Err(_) => {
                    let idle = AgentError::RemoteConnectionLost(format!(
                        "no data for {}s",
                        self.idle_timeout.as_secs()
                    ));
                    self.disconnect("stream idle", &idle).await;
                }
            }
        }
    }

    async fn disconnect(&mut self, what: &str, error: &(dyn fmt::Display + Sync)) {
        self.connection = None;
        if self.connected_at.elapsed() >= self.stable_after {
            self.backoff.reset();
        }
        self.wait_to_reconnect(what, error).await;
    }

    async fn wait_to_reconnect(&mut self, what: &str, error: &(dyn fmt::Display + Sync)) {
        let delay = self.backoff.next_delay();
        warn!(
            url = %self.url,
            error = %error,
            kind = %ErrorKind::RemoteConnectionLost,
            retry_in_ms = delay.as_millis() as u64,
            "command stream {}, reconnecting",
            what
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{MockRelay, StreamScript};
    use crate::types::{CommandAction, TransitionKind};

    fn config(stream: Option<&str>) -> NotifierConfig {
        NotifierConfig {
            device_name: "device1".into(),
            endpoints: vec![
                "https://a.local/api/camera".into(),
                "https://b.local/api/camera".into(),
            ],
            ack_url: Some("https://a.local/api/ack".into()),
            command_stream_url: stream.map(str::to_string),
            delivery: DeliveryPolicy::default(),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }

    fn frame(event: &str, request_id: Option<&str>) -> StreamFrame {
        StreamFrame {
            event: Some(event.into()),
            request_id: request_id.map(str::to_string),
            device: Some("device1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn notify_queues_one_task_per_endpoint() {
        let relay = MockRelay::new();
        let (notifier, mut workers) = Notifier::new(config(None), Arc::new(relay.clone()));
        assert_eq!(workers.len(), 3);

        notifier.notify(&TransitionEvent {
            kind: TransitionKind::BecomePresent,
            at: Instant::now(),
            distance_mm: Some(300),
        });

        for worker in workers.iter_mut().take(2) {
            let mut task = worker.try_next().unwrap();
            assert_eq!(
                task.payload,
                DeliveryPayload::Action(ActionRequest {
                    action: "start_camera".into(),
                    device: "device1".into(),
                })
            );
            worker.deliver(&mut task).await.unwrap();
        }
        assert_eq!(relay.action_names_for("https://a.local/api/camera"), vec!["start_camera"]);
        assert_eq!(relay.action_names_for("https://b.local/api/camera"), vec!["start_camera"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_exponential_backoff() {
        let mut relay = MockRelay::new();
        for _ in 0..7 {
            relay = relay.with_stream(StreamScript::Refuse);
        }
        let relay = relay.with_stream(StreamScript::Frames(vec![frame("start_camera", Some("r1"))]));
        let (notifier, _workers) =
            Notifier::new(config(Some("https://a.local/api/turnstile")), Arc::new(relay.clone()));

        let started = Instant::now();
        let command = notifier.commands().next().await.unwrap();
        assert_eq!(command.action, CommandAction::StartCamera);

        let offsets: Vec<u64> = relay
            .connect_attempts()
            .iter()
            .map(|at| at.duration_since(started).as_secs())
            .collect();
        // gaps of 1, 2, 4, 8, 16, 30, 30
        assert_eq!(offsets, vec![0, 1, 3, 7, 15, 31, 61, 91]);
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_drop_reconnects_at_base_delay() {
        let relay = MockRelay::new()
            .with_stream(StreamScript::Refuse)
            .with_stream(StreamScript::Refuse)
            .with_stream(StreamScript::Frames(vec![
                StreamFrame {
                    kind: Some("connected".into()),
                    ..Default::default()
                },
                frame("stop_camera", Some("r1")),
            ]))
            .with_stream(StreamScript::Frames(vec![frame("unlock", Some("r2"))]));
        let (notifier, _workers) =
            Notifier::new(config(Some("https://a.local/api/turnstile")), Arc::new(relay.clone()));

        let started = Instant::now();
        let mut commands = notifier.commands();
        assert_eq!(commands.next().await.unwrap().action, CommandAction::StopCamera);
        assert_eq!(commands.next().await.unwrap().action, CommandAction::Unlock);

        let offsets: Vec<u64> = relay
            .connect_attempts()
            .iter()
            .map(|at| at.duration_since(started).as_secs())
            .collect();
        // Refused twice (1s, 2s), then the drop after frames waits only the base delay
        assert_eq!(offsets, vec![0, 1, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_only_connections_keep_backing_off() {
        let connected = StreamFrame {
            kind: Some("connected".into()),
            ..Default::default()
        };
        let mut relay = MockRelay::new();
        for _ in 0..6 {
            relay = relay.with_stream(StreamScript::Frames(vec![connected.clone()]));
        }
        let relay = relay.with_stream(StreamScript::Frames(vec![frame("start_camera", Some("r1"))]));
        let (notifier, _workers) =
            Notifier::new(config(Some("https://a.local/api/turnstile")), Arc::new(relay.clone()));

        let started = Instant::now();
        let command = notifier.commands().next().await.unwrap();
        assert_eq!(command.action, CommandAction::StartCamera);

        let offsets: Vec<u64> = relay
            .connect_attempts()
            .iter()
            .map(|at| at.duration_since(started).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 1, 3, 7, 15, 31, 61]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_dropped_after_idle_timeout() {
        // Exhausted script: every connection succeeds and never sends anything
        let relay = MockRelay::new();
        let (notifier, _workers) =
            Notifier::new(config(Some("https://a.local/api/turnstile")), Arc::new(relay.clone()));

        let started = Instant::now();
        let next = tokio::time::timeout(Duration::from_secs(150), notifier.commands().next()).await;
        assert!(next.is_err());

        let offsets: Vec<u64> = relay
            .connect_attempts()
            .iter()
            .map(|at| at.duration_since(started).as_secs())
            .collect();
        // 60s idle each time; a connection that lived past reconnect_max retries at the base delay
        assert_eq!(offsets, vec![0, 61, 122]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_stream_url_never_yields() {
        let (notifier, _workers) = Notifier::new(config(None), Arc::new(MockRelay::new()));
        let next = tokio::time::timeout(Duration::from_secs(3600), notifier.commands().next()).await;
        assert!(next.is_err());
    }
}
