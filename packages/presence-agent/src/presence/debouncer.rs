//! Presence debouncer.
//!
//! Entry is immediate: the first qualifying reading while `Absent` emits
//! `BecomePresent`. Exit is delayed: `BecomeAbsent` is emitted on the first
//! non-qualifying reading that arrives more than `hold_duration` after the
//! last qualifying one. Transitions therefore strictly alternate.

use std::time::Duration;

use crate::machine::Machine;
use crate::types::{Presence, PresenceState, Reading, TransitionEvent, TransitionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    pub threshold_mm: u32,
    pub hold_duration: Duration,
}

#[derive(Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    state: PresenceState,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            state: PresenceState::default(),
        }
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    pub fn presence(&self) -> Presence {
        self.state.presence
    }
}

impl Machine for Debouncer {
    type Input = Reading;
    type Output = TransitionEvent;

    fn decide(&mut self, reading: &Reading) -> Option<TransitionEvent> {
        if reading.qualifies(self.config.threshold_mm) {
            self.state.last_seen = Some(reading.timestamp);

            if self.state.presence == Presence::Absent {
                self.state.presence = Presence::Present;
                return Some(TransitionEvent {
                    kind: TransitionKind::BecomePresent,
                    at: reading.timestamp,
                    distance_mm: reading.distance_mm,
                });
            }
            return None;
        }

        if self.state.presence == Presence::Present {
            // last_seen is always set once Present
            let held = self
                .state
                .last_seen
                .map(|seen| reading.timestamp.saturating_duration_since(seen))
                .unwrap_or(Duration::MAX);

            if held > self.config.hold_duration {
                self.state.presence = Presence::Absent;
                return Some(TransitionEvent {
                    kind: TransitionKind::BecomeAbsent,
                    at: reading.timestamp,
                    distance_mm: reading.distance_mm,
                });
            }
        }

        None
    }
}
