use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use relay_client::RelayOptions;

use crate::error::AgentError;
use crate::presence::DebounceConfig;

/// Agent configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub device_name: String,
    pub action_webhook_urls: Vec<String>,
    pub command_stream_url: Option<String>,
    pub ack_url: Option<String>,
    pub heartbeat_url: Option<String>,

    pub threshold_mm: u32,
    pub hold_duration: Duration,
    pub poll_interval: Duration,
    pub sensor_timeout: Duration,

    pub i2c_bus: u8,
    pub sensor_address: u8,
    pub led_pin: Option<u8>,
    pub solenoid_pin: Option<u8>,
    pub camera_command: Option<String>,
    pub camera_startup_grace: Duration,

    pub delivery_attempts: u32,
    pub delivery_retry_delay: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// A command stream silent for this long is treated as dropped.
    pub stream_idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub shutdown_timeout: Duration,
    pub dedupe_capacity: usize,
    pub unlock_duration: Duration,
    pub accept_invalid_certs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            device_name: get("DEVICE_NAME").context("DEVICE_NAME must be set")?,
            action_webhook_urls: get("ACTION_WEBHOOK_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            command_stream_url: get("COMMAND_STREAM_URL"),
            ack_url: get("ACK_URL"),
            heartbeat_url: get("HEARTBEAT_URL"),

            threshold_mm: parse_or(&get, "THRESHOLD_MM", 400)?,
            hold_duration: millis_or(&get, "HOLD_DURATION_MS", 10_000)?,
            poll_interval: millis_or(&get, "POLL_INTERVAL_MS", 100)?,
            sensor_timeout: millis_or(&get, "SENSOR_TIMEOUT_MS", 50)?,

            i2c_bus: parse_or(&get, "I2C_BUS", 1)?,
            sensor_address: match get("SENSOR_ADDRESS") {
                Some(raw) => parse_address(&raw)
                    .with_context(|| format!("SENSOR_ADDRESS must be a 7-bit address, got {}", raw))?,
                None => 0x29,
            },
            led_pin: parse_optional(&get, "LED_PIN")?,
            solenoid_pin: parse_optional(&get, "SOLENOID_PIN")?,
            camera_command: get("CAMERA_COMMAND"),
            camera_startup_grace: millis_or(&get, "CAMERA_STARTUP_GRACE_MS", 750)?,

            delivery_attempts: parse_or(&get, "DELIVERY_ATTEMPTS", 3)?,
            delivery_retry_delay: millis_or(&get, "DELIVERY_RETRY_DELAY_MS", 1_000)?,
            reconnect_base: millis_or(&get, "RECONNECT_BASE_MS", 1_000)?,
            reconnect_max: millis_or(&get, "RECONNECT_MAX_MS", 30_000)?,
            stream_idle_timeout: Duration::from_secs(parse_or(&get, "STREAM_IDLE_TIMEOUT_SECS", 60)?),
            heartbeat_interval: Duration::from_secs(parse_or(&get, "HEARTBEAT_INTERVAL_SECS", 15)?),
            shutdown_timeout: millis_or(&get, "SHUTDOWN_TIMEOUT_MS", 5_000)?,
            dedupe_capacity: parse_or(&get, "DEDUPE_CAPACITY", 1024)?,
            unlock_duration: millis_or(&get, "UNLOCK_DURATION_MS", 3_000)?,
            accept_invalid_certs: match get("ACCEPT_INVALID_CERTS") {
                Some(raw) => parse_bool(&raw)
                    .with_context(|| format!("ACCEPT_INVALID_CERTS must be a boolean, got {}", raw))?,
                None => false,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), AgentError> {
        let invalid = |reason: String| Err(AgentError::startup("configuration", reason));

        if self.threshold_mm == 0 {
            return invalid("THRESHOLD_MM must be greater than zero".into());
        }

        let durations = [
            ("HOLD_DURATION_MS", self.hold_duration),
            ("POLL_INTERVAL_MS", self.poll_interval),
            ("SENSOR_TIMEOUT_MS", self.sensor_timeout),
            ("CAMERA_STARTUP_GRACE_MS", self.camera_startup_grace),
            ("DELIVERY_RETRY_DELAY_MS", self.delivery_retry_delay),
            ("RECONNECT_BASE_MS", self.reconnect_base),
            ("RECONNECT_MAX_MS", self.reconnect_max),
            ("STREAM_IDLE_TIMEOUT_SECS", self.stream_idle_timeout),
            ("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval),
            ("SHUTDOWN_TIMEOUT_MS", self.shutdown_timeout),
            ("UNLOCK_DURATION_MS", self.unlock_duration),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return invalid(format!("{} must be greater than zero", key));
        }

        if self.reconnect_max < self.reconnect_base {
            return invalid("RECONNECT_MAX_MS must be at least RECONNECT_BASE_MS".into());
        }
        if self.delivery_attempts == 0 {
            return invalid("DELIVERY_ATTEMPTS must be at least 1".into());
        }
        if self.dedupe_capacity == 0 {
            return invalid("DEDUPE_CAPACITY must be at least 1".into());
        }
        if self.sensor_address > 0x7F {
            return invalid(format!(
                "SENSOR_ADDRESS {:#04x} is not a 7-bit address",
                self.sensor_address
            ));
        }

        let urls = self
            .action_webhook_urls
            .iter()
            .map(|u| ("ACTION_WEBHOOK_URLS", u))
            .chain(self.command_stream_url.iter().map(|u| ("COMMAND_STREAM_URL", u)))
            .chain(self.ack_url.iter().map(|u| ("ACK_URL", u)))
            .chain(self.heartbeat_url.iter().map(|u| ("HEARTBEAT_URL", u)));
        for (key, raw) in urls {
            if let Err(e) = url::Url::parse(raw) {
                return invalid(format!("{} contains an invalid URL {}: {}", key, raw, e));
            }
        }

        Ok(())
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            threshold_mm: self.threshold_mm,
            hold_duration: self.hold_duration,
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            accept_invalid_certs: self.accept_invalid_certs,
            ..RelayOptions::default()
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number, got {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_optional<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("{} must be a valid number, got {}", key, raw))
        })
        .transpose()
}

fn millis_or<G>(get: &G, key: &str, default_ms: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default_ms).map(Duration::from_millis)
}

/// Accepts `0x29` or `41`.
fn parse_address(raw: &str) -> Result<u8> {
    let raw = raw.trim();
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16)?,
        None => raw.parse()?,
    };
    Ok(value)
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognised boolean {}", other),
    }
}
