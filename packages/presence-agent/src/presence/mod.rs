//! Presence detection: turns raw distance readings into transition events.

pub mod debouncer;

pub use debouncer::{DebounceConfig, Debouncer};
