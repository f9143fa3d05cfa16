//! Machine trait for pure decision logic.
//!
//! Machines interpret inputs and decide on outputs. State lives inside the
//! machine and `decide` is synchronous: no IO, no async, no clocks other than
//! the timestamps carried by the input. Effects (actuators, relay delivery)
//! happen elsewhere, driven by what the machine returns.

/// A state machine that interprets inputs and optionally emits an output.
///
/// # Guarantees
///
/// - Called synchronously (no async)
/// - Called serially (no concurrent calls)
/// - At most one output per input
pub trait Machine: Send + 'static {
    /// The fact this machine consumes.
    type Input;

    /// What the machine emits when its state changes.
    type Output;

    fn decide(&mut self, input: &Self::Input) -> Option<Self::Output>;
}
