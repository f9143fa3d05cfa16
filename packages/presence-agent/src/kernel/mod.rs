//! Kernel module - hardware and transport infrastructure.

pub mod camera;
pub mod gpio;
pub mod hardware;
pub mod relay;
pub mod sensor;
pub mod test_dependencies;
pub mod traits;

pub use camera::{ProcessCamera, SimulatedCamera};
pub use gpio::LoggingOutput;
#[cfg(feature = "rpi")]
pub use gpio::RppalOutput;
#[cfg(feature = "rpi")]
pub use hardware::PiHardware;
pub use hardware::SimulatedHardware;
#[cfg(feature = "rpi")]
pub use sensor::Vl53l0x;
pub use sensor::{BlockingSensor, SimulatedRangeDriver};
pub use test_dependencies::{
    MockCamera, MockHardware, MockRelay, RecordingOutput, Sample, ScriptedSensor, StreamScript,
};
pub use traits::*;
