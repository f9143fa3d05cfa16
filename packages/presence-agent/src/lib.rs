//! Presence-driven device agent.
//!
//! Polls a time-of-flight distance sensor, debounces the readings into a
//! present/absent signal, drives the LED, solenoid and camera from it, and
//! keeps a remote relay informed. The relay can also send commands back.

pub mod actuators;
pub mod config;
pub mod error;
pub mod kernel;
pub mod machine;
pub mod notifier;
pub mod presence;
pub mod supervisor;
pub mod types;

pub use config::Config;
pub use error::{AgentError, ErrorKind};
pub use supervisor::{shutdown_signal, HostReport, Supervisor};
