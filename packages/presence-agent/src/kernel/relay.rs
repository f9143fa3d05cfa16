//! `BaseRelay` over the HTTP relay client.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use relay_client::{
    AckRequest, ActionRequest, HeartbeatRequest, RelayClient, RelayError, StreamFrame,
};

use super::traits::BaseRelay;

#[async_trait]
impl BaseRelay for RelayClient {
    async fn post_action(&self, url: &str, body: &ActionRequest) -> Result<(), RelayError> {
        RelayClient::post_action(self, url, body).await
    }

    async fn post_ack(&self, url: &str, body: &AckRequest) -> Result<(), RelayError> {
        RelayClient::post_ack(self, url, body).await
    }

    async fn post_heartbeat(&self, url: &str, body: &HeartbeatRequest) -> Result<(), RelayError> {
        RelayClient::post_heartbeat(self, url, body).await
    }

    async fn open_command_stream(
        &self,
        url: &str,
    ) -> Result<BoxStream<'static, Result<StreamFrame, RelayError>>, RelayError> {
        let stream = RelayClient::open_command_stream(self, url).await?;
        Ok(stream.boxed())
    }
}
