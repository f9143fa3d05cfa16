//! Presence agent
//!
//! Runs on the device: sensor poll loop, actuators, relay notifications and
//! the inbound command listener, until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use presence_agent::kernel::{BaseHardware, BaseRelay, SimulatedHardware};
use presence_agent::{shutdown_signal, AgentError, Config, Supervisor};
use relay_client::RelayClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "presence-agent")]
#[command(about = "Presence-driven device agent")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Use simulated sensor, GPIO and camera backends
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,presence_agent=debug,relay_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!(
        device = %config.device_name,
        simulate = cli.simulate,
        threshold_mm = config.threshold_mm,
        hold_ms = config.hold_duration.as_millis() as u64,
        poll_ms = config.poll_interval.as_millis() as u64,
        "Starting presence agent"
    );

    let relay = RelayClient::with_options(config.relay_options())
        .map_err(|e| AgentError::startup("relay client", e))?;
    let relay: Arc<dyn BaseRelay> = Arc::new(relay);

    let hardware = select_hardware(&config, cli.simulate)?;
    let supervisor = Supervisor::start(&config, hardware.as_ref(), relay)?;

    let report = supervisor.run(shutdown_signal()).await;

    if !report.abandoned.is_empty() {
        tracing::warn!(abandoned = ?report.abandoned, "some services were abandoned at shutdown");
    }
    if !report.is_clean() {
        // Non-zero exit so a service manager restarts us
        anyhow::bail!(
            "presence agent stopped abnormally: {:?}, failed services: {:?}",
            report.reason,
            report.failed
        );
    }
    tracing::info!(reason = ?report.reason, "Presence agent stopped");
    Ok(())
}

fn select_hardware(config: &Config, simulate: bool) -> Result<Box<dyn BaseHardware>, AgentError> {
    if simulate {
        return Ok(Box::new(SimulatedHardware::new(config)));
    }

    #[cfg(feature = "rpi")]
    {
        Ok(Box::new(presence_agent::kernel::PiHardware::new(config)))
    }

    #[cfg(not(feature = "rpi"))]
    {
        Err(AgentError::startup(
            "hardware",
            "built without the `rpi` feature; rebuild with --features rpi or run with --simulate",
        ))
    }
}
