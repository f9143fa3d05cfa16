//! Actuators: LED, solenoid and camera, converged toward a desired on/off state.

pub mod actuator;
pub mod service;
pub mod set;

pub use actuator::{Actuator, ActuatorDriver, ActuatorOutcome};
pub use service::{ActuatorHandle, ActuatorService, Directive, DirectiveKind, DirectiveOrigin};
pub use set::{ActuatorSet, ApplyReport};
