//! Pure relay server client
//!
//! A minimal HTTP client for the server that presence agents report to.
//! It knows the wire shapes (action webhooks, acknowledgments, heartbeats,
//! the SSE command stream) and nothing about sensors or actuators.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_client::{ActionRequest, RelayClient};
//! use futures::StreamExt;
//!
//! let client = RelayClient::new()?;
//!
//! client
//!     .post_action(
//!         "https://relay.local:4173/api/camera",
//!         &ActionRequest { action: "start_camera".into(), device: "device1".into() },
//!     )
//!     .await?;
//!
//! let mut commands = client.open_command_stream("https://relay.local:4173/api/turnstile").await?;
//! while let Some(frame) = commands.next().await {
//!     println!("{:?}", frame?.name());
//! }
//! ```

pub mod error;
pub mod streaming;
pub mod types;

pub use error::{RelayError, Result};
pub use streaming::CommandStream;
pub use types::{AckRequest, AckStatus, ActionRequest, HeartbeatRequest, StreamFrame};

use std::time::Duration;

use reqwest::{header, Client};
use serde::Serialize;
use tracing::{debug, warn};

/// Options for building a [`RelayClient`].
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Skip TLS certificate verification (self-signed relay servers).
    pub accept_invalid_certs: bool,
    /// Whole-request timeout for POST calls. Streams are not bounded by it.
    pub request_timeout: Duration,
    /// TCP/TLS connect timeout for every request.
    pub connect_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Pure relay API client.
#[derive(Clone)]
pub struct RelayClient {
    http_client: Client,
    request_timeout: Duration,
}

impl RelayClient {
    /// Create a client with default options.
    pub fn new() -> Result<Self> {
        Self::with_options(RelayOptions::default())
    }

    /// Create a client with explicit options.
    pub fn with_options(options: RelayOptions) -> Result<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            request_timeout: options.request_timeout,
        })
    }

    /// Deliver a `start_camera` / `stop_camera` action to a webhook.
    pub async fn post_action(&self, url: &str, body: &ActionRequest) -> Result<()> {
        self.post_json(url, body).await
    }

    /// Acknowledge an inbound command.
    pub async fn post_ack(&self, url: &str, body: &AckRequest) -> Result<()> {
        self.post_json(url, body).await
    }

    /// Report liveness and actuator state.
    pub async fn post_heartbeat(&self, url: &str, body: &HeartbeatRequest) -> Result<()> {
        self.post_json(url, body).await
    }

    /// Open the server-sent command stream.
    ///
    /// Resolves once the server has answered with a 2xx status; frames are
    /// then read lazily from the returned stream until the connection ends.
    pub async fn open_command_stream(&self, url: &str) -> Result<CommandStream> {
        let url = parse_url(url)?;

        let response = self
            .http_client
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Command stream request failed");
                RelayError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(url = %url, "Command stream opened");
        Ok(CommandStream::new(response.bytes_stream()))
    }

    /// POST a JSON body; only the response status is inspected.
    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<()> {
        let url = parse_url(url)?;
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(url.clone())
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            url = %url,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis(),
            "Relay POST"
        );
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<url::Url> {
    url::Url::parse(raw).map_err(|e| RelayError::Config(format!("Invalid URL {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_field_timeouts() {
        let options = RelayOptions::default();
        assert!(!options.accept_invalid_certs);
        assert_eq!(options.request_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let client = RelayClient::new().unwrap();
        let err = client
            .post_action(
                "not a url",
                &ActionRequest {
                    action: "start_camera".into(),
                    device: "device1".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(!err.is_connection());
    }
}
