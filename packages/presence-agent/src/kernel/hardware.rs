//! Hardware backends the supervisor acquires at startup.

use std::sync::Arc;
use std::time::Duration;

use super::camera::SimulatedCamera;
use super::gpio::LoggingOutput;
use super::sensor::{BlockingSensor, SimulatedRangeDriver};
use super::traits::{BaseCamera, BaseDigitalOutput, BaseHardware, SensorSource};
use crate::config::Config;
use crate::error::AgentError;

/// Simulated sensor, logging outputs and a log-only camera.
pub struct SimulatedHardware {
    sensor_timeout: Duration,
    distance_mm: u32,
}

impl SimulatedHardware {
    pub fn new(config: &Config) -> Self {
        Self {
            sensor_timeout: config.sensor_timeout,
            distance_mm: (config.threshold_mm / 2).max(1),
        }
    }
}

impl BaseHardware for SimulatedHardware {
    fn open_sensor(&self) -> Result<Box<dyn SensorSource>, AgentError> {
        // Someone stands in front for 3s, then leaves for long enough to clear a 10s hold
        let driver = SimulatedRangeDriver::new(
            Duration::from_secs(3),
            Duration::from_secs(15),
            self.distance_mm,
        );
        Ok(Box::new(BlockingSensor::new(driver, self.sensor_timeout)))
    }

    fn open_output(&self, name: &str, pin: u8) -> Result<Arc<dyn BaseDigitalOutput>, AgentError> {
        Ok(Arc::new(LoggingOutput::new(name, pin)))
    }

    fn open_camera(&self) -> Result<Option<Arc<dyn BaseCamera>>, AgentError> {
        Ok(Some(Arc::new(SimulatedCamera::new())))
    }
}

#[cfg(feature = "rpi")]
pub use pi::PiHardware;

#[cfg(feature = "rpi")]
mod pi {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::Config;
    use crate::error::AgentError;
    use crate::kernel::camera::ProcessCamera;
    use crate::kernel::gpio::RppalOutput;
    use crate::kernel::sensor::{BlockingSensor, Vl53l0x};
    use crate::kernel::traits::{BaseCamera, BaseDigitalOutput, BaseHardware, SensorSource};

    /// VL53L0X over I2C, GPIO lines via rppal, camera as a child process.
    pub struct PiHardware {
        i2c_bus: u8,
        sensor_address: u8,
        sensor_timeout: Duration,
        camera_command: Option<String>,
        camera_startup_grace: Duration,
    }

    impl PiHardware {
        pub fn new(config: &Config) -> Self {
            Self {
                i2c_bus: config.i2c_bus,
                sensor_address: config.sensor_address,
                sensor_timeout: config.sensor_timeout,
                camera_command: config.camera_command.clone(),
                camera_startup_grace: config.camera_startup_grace,
            }
        }
    }

    impl BaseHardware for PiHardware {
        fn open_sensor(&self) -> Result<Box<dyn SensorSource>, AgentError> {
            let driver = Vl53l0x::open(self.i2c_bus, self.sensor_address).map_err(|e| {
                AgentError::startup(
                    format!("range sensor on i2c-{} @ {:#04x}", self.i2c_bus, self.sensor_address),
                    e,
                )
            })?;
            Ok(Box::new(BlockingSensor::new(driver, self.sensor_timeout)))
        }

        fn open_output(
            &self,
            name: &str,
            pin: u8,
        ) -> Result<Arc<dyn BaseDigitalOutput>, AgentError> {
            let output = RppalOutput::open(pin)
                .map_err(|e| AgentError::startup(format!("{} on GPIO {}", name, pin), e))?;
            Ok(Arc::new(output))
        }

        fn open_camera(&self) -> Result<Option<Arc<dyn BaseCamera>>, AgentError> {
            let Some(command) = self.camera_command.as_deref() else {
                return Ok(None);
            };
            let camera = ProcessCamera::from_command_line(command, self.camera_startup_grace)
                .map_err(|e| AgentError::startup("camera", e))?;
            Ok(Some(Arc::new(camera)))
        }
    }
}
