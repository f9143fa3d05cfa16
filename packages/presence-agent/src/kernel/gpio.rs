//! Digital output lines.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::traits::BaseDigitalOutput;
use crate::error::DeviceError;

#[cfg(feature = "rpi")]
pub use rpi::RppalOutput;

#[cfg(feature = "rpi")]
mod rpi {
    use std::sync::Mutex;

    use rppal::gpio::{Gpio, OutputPin};

    use crate::error::DeviceError;
    use crate::kernel::traits::BaseDigitalOutput;

    /// A BCM GPIO line driven through rppal. Claimed low.
    pub struct RppalOutput {
        pin: Mutex<OutputPin>,
        number: u8,
    }

    impl RppalOutput {
        pub fn open(number: u8) -> Result<Self, DeviceError> {
            let gpio = Gpio::new().map_err(|e| DeviceError::Io(e.to_string()))?;
            let pin = gpio.get(number).map_err(|e| match e {
                rppal::gpio::Error::PinUsed(_) | rppal::gpio::Error::PinNotAvailable(_) => {
                    DeviceError::Busy(e.to_string())
                }
                other => DeviceError::Io(other.to_string()),
            })?;

            let mut pin = pin.into_output_low();
            // Release drives the line low rather than leaving it floating
            pin.set_reset_on_drop(true);

            Ok(Self {
                pin: Mutex::new(pin),
                number,
            })
        }
    }

    impl BaseDigitalOutput for RppalOutput {
        fn write(&self, high: bool) -> Result<(), DeviceError> {
            let mut pin = self
                .pin
                .lock()
                .map_err(|_| DeviceError::Io("pin lock poisoned".into()))?;
            if high {
                pin.set_high();
            } else {
                pin.set_low();
            }
            Ok(())
        }

        fn pin(&self) -> u8 {
            self.number
        }
    }
}

/// Output line that only logs level changes, for `--simulate`.
pub struct LoggingOutput {
    name: String,
    number: u8,
    level: AtomicBool,
}

impl LoggingOutput {
    pub fn new(name: impl Into<String>, number: u8) -> Self {
        Self {
            name: name.into(),
            number,
            level: AtomicBool::new(false),
        }
    }
}

impl BaseDigitalOutput for LoggingOutput {
    fn write(&self, high: bool) -> Result<(), DeviceError> {
        let previous = self.level.swap(high, Ordering::SeqCst);
        if previous != high {
            info!(
                output = %self.name,
                pin = self.number,
                level = if high { "high" } else { "low" },
                "simulated output"
            );
        }
        Ok(())
    }

    fn pin(&self) -> u8 {
        self.number
    }
}
