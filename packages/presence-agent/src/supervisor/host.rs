//! Long-running services and their shared lifecycle.
//!
//! Every concurrent task in the agent is a named [`Service`]. The
//! [`ServiceHost`] starts them all, waits for a shutdown request or for any
//! service to exit, cancels the rest through one `CancellationToken`, and
//! gives them a bounded time to finish. Services still running after that are
//! aborted and reported as abandoned.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A long-running task owned by the [`ServiceHost`].
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &str;

    /// Run until `shutdown` is cancelled. Returning early ends the whole host.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The shutdown future resolved (signal).
    Shutdown,
    /// A service returned or failed on its own.
    ServiceExited(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub reason: ExitReason,
    /// Services that returned an error or panicked: (name, error).
    pub failed: Vec<(String, String)>,
    /// Services that ignored cancellation and were aborted.
    pub abandoned: Vec<String>,
}

impl HostReport {
    /// Stopped on request with no service failing along the way.
    pub fn is_clean(&self) -> bool {
        self.reason == ExitReason::Shutdown && self.failed.is_empty()
    }
}

pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
    shutdown_timeout: Duration,
}

type Finished = (String, std::result::Result<Result<()>, String>);

impl ServiceHost {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            shutdown_timeout,
        }
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    pub fn add(&mut self, service: Box<dyn Service>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Run every service until `shutdown` resolves or one of them exits.
    pub async fn run_until<F>(self, shutdown: F) -> HostReport
    where
        F: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut failed = Vec::new();

        for service in self.services {
            let name = service.name().to_string();
            info!(service = %name, "starting service");
            running.insert(name.clone());

            let token = token.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(service.run(token))
                    .catch_unwind()
                    .await
                    .map_err(|panic| panic_message(&*panic));
                (name, outcome)
            });
        }

        let reason = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested");
                ExitReason::Shutdown
            }
            Some(joined) = tasks.join_next() => {
                let name = record(joined, &mut running, &mut failed);
                warn!(service = %name, "service exited, shutting down the rest");
                ExitReason::ServiceExited(name)
            }
            else => ExitReason::Shutdown,
        };

        token.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => {
                    record(joined, &mut running, &mut failed);
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        let mut abandoned: Vec<String> = running.into_iter().collect();
        abandoned.sort();
        for name in &abandoned {
            error!(
                service = %name,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "service did not stop in time, abandoned"
            );
        }

        HostReport {
            reason,
            failed,
            abandoned,
        }
    }
}

fn record(
    joined: std::result::Result<Finished, tokio::task::JoinError>,
    running: &mut HashSet<String>,
    failed: &mut Vec<(String, String)>,
) -> String {
    match joined {
        Ok((name, outcome)) => {
            running.remove(&name);
            match outcome {
                Ok(Ok(())) => info!(service = %name, "service stopped"),
                Ok(Err(e)) => {
                    error!(service = %name, error = %e, "service failed");
                    failed.push((name.clone(), e.to_string()));
                }
                Err(panic) => {
                    error!(service = %name, panic = %panic, "service panicked");
                    failed.push((name.clone(), panic));
                }
            }
            name
        }
        // Only aborts produce a JoinError here; panics are caught inside the task
        Err(e) => {
            error!(error = %e, "service task aborted");
            String::from("unknown")
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Waits(&'static str);

    #[async_trait]
    impl Service for Waits {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct Fails;

    #[async_trait]
    impl Service for Fails {
        fn name(&self) -> &str {
            "fails"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::bail!("bus vanished")
        }
    }

    struct Stubborn;

    #[async_trait]
    impl Service for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Service for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(self: Box<Self>, _shutdown: CancellationToken) -> Result<()> {
            panic!("sensor thread exploded")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_service() {
        let host = ServiceHost::new(Duration::from_secs(5))
            .with_service(Waits("a"))
            .with_service(Waits("b"));

        let report = host
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert_eq!(report.reason, ExitReason::Shutdown);
        assert!(report.failed.is_empty());
        assert!(report.abandoned.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_service_brings_down_the_host() {
        let host = ServiceHost::new(Duration::from_secs(5))
            .with_service(Waits("a"))
            .with_service(Fails);

        let report = host.run_until(std::future::pending()).await;

        assert_eq!(report.reason, ExitReason::ServiceExited("fails".into()));
        assert_eq!(report.failed, vec![("fails".to_string(), "bus vanished".to_string())]);
        assert!(!report.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_service_is_abandoned_after_timeout() {
        let host = ServiceHost::new(Duration::from_millis(500))
            .with_service(Waits("a"))
            .with_service(Stubborn);

        let started = tokio::time::Instant::now();
        let report = host
            .run_until(tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert_eq!(report.abandoned, vec!["stubborn".to_string()]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_reported_not_propagated() {
        let host = ServiceHost::new(Duration::from_secs(5))
            .with_service(Waits("a"))
            .with_service(Panics);

        let report = host.run_until(std::future::pending()).await;

        assert_eq!(report.reason, ExitReason::ServiceExited("panics".into()));
        assert_eq!(report.failed[0].1, "sensor thread exploded");
    }
}
