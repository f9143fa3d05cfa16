//! Periodic liveness report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use relay_client::HeartbeatRequest;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::actuators::ActuatorSet;
use crate::kernel::BaseRelay;
use crate::supervisor::Service;

pub struct Heartbeat {
    device_name: String,
    url: String,
    interval: Duration,
    relay: Arc<dyn BaseRelay>,
    actuators: Arc<ActuatorSet>,
    started: Instant,
}

impl Heartbeat {
    pub fn new(
        device_name: impl Into<String>,
        url: impl Into<String>,
        interval: Duration,
        relay: Arc<dyn BaseRelay>,
        actuators: Arc<ActuatorSet>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            url: url.into(),
            interval,
            relay,
            actuators,
            started: Instant::now(),
        }
    }

    fn report(&self) -> HeartbeatRequest {
        HeartbeatRequest {
            device_id: self.device_name.clone(),
            camera_on: self.actuators.camera_on(),
            uptime: self.started.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl Service for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.actuators.refresh().await;
                    let report = self.report();
                    match self.relay.post_heartbeat(&self.url, &report).await {
                        Ok(()) => debug!(uptime = report.uptime, camera_on = report.camera_on, "heartbeat sent"),
                        Err(e) => warn!(url = %self.url, error = %e, "heartbeat failed"),
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuators::Actuator;
    use crate::kernel::{MockCamera, MockRelay};

    #[tokio::test(start_paused = true)]
    async fn reports_every_interval_and_survives_failures() {
        let relay = MockRelay::new();
        relay.fail_next_heartbeats(1);
        let camera = MockCamera::new();
        let set = Arc::new(ActuatorSet::new(vec![Actuator::camera(
            "camera",
            Arc::new(camera.clone()),
        )]));
        set.set_desired(true).await;

        let heartbeat = Heartbeat::new(
            "device1",
            "https://relay.local/api/heartbeat",
            Duration::from_secs(15),
            Arc::new(relay.clone()),
            set,
        );
        let started = Instant::now();
        let token = CancellationToken::new();
        let handle = tokio::spawn(Box::new(heartbeat).run(token.clone()));

        tokio::time::sleep(Duration::from_secs(46)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        // The 15s beat failed; 30s and 45s went through
        let beats = relay.heartbeats();
        assert_eq!(beats.len(), 2);
        assert_eq!(beats[0].1.duration_since(started), Duration::from_secs(30));
        assert_eq!(beats[1].1.duration_since(started), Duration::from_secs(45));
        assert!(beats.iter().all(|(b, _)| b.camera_on && b.device_id == "device1"));
        assert_eq!(beats[1].0.uptime, 45);
    }
}
