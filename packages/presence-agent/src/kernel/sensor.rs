//! Range sensor adapters.
//!
//! `BlockingSensor` turns a blocking register driver into a `SensorSource`
//! whose `poll` is bounded by a timeout, so a wedged bus can never stall the
//! poll loop.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::traits::{BaseRangeDriver, SensorSource};
use crate::error::{DeviceError, ErrorKind};
use crate::types::Reading;

/// Adapts a [`BaseRangeDriver`] to [`SensorSource`].
///
/// Each read runs on the blocking pool under `timeout`. If a read is still
/// stuck when the next poll starts, that poll fails immediately instead of
/// queueing behind it.
pub struct BlockingSensor<D: BaseRangeDriver> {
    driver: Arc<Mutex<D>>,
    timeout: Duration,
}

impl<D: BaseRangeDriver> BlockingSensor<D> {
    pub fn new(driver: D, timeout: Duration) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            timeout,
        }
    }
}

#[async_trait]
impl<D: BaseRangeDriver> SensorSource for BlockingSensor<D> {
    async fn poll(&mut self) -> Reading {
        let driver = self.driver.clone();
        let read = tokio::task::spawn_blocking(move || match driver.try_lock() {
            Ok(mut guard) => guard.read_range_mm(),
            Err(TryLockError::WouldBlock) => {
                Err(DeviceError::Busy("previous read still in flight".into()))
            }
            Err(TryLockError::Poisoned(_)) => Err(DeviceError::Io("driver lock poisoned".into())),
        });

        let outcome = tokio::time::timeout(self.timeout, read).await;
        let now = Instant::now();

        match outcome {
            Ok(Ok(Ok(Some(distance_mm)))) => Reading::measured(distance_mm, now),
            Ok(Ok(Ok(None))) => Reading::out_of_range(now),
            Ok(Ok(Err(e))) => {
                warn!(component = "sensor", error = %e, "sensor read failed");
                Reading::failed(ErrorKind::SensorIoFailure, now)
            }
            Ok(Err(join_err)) => {
                warn!(component = "sensor", error = %join_err, "sensor read task aborted");
                Reading::failed(ErrorKind::SensorIoFailure, now)
            }
            Err(_) => {
                warn!(
                    component = "sensor",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "sensor read timed out"
                );
                Reading::failed(ErrorKind::SensorIoFailure, now)
            }
        }
    }

    fn close(&mut self) {
        match self.driver.try_lock() {
            Ok(mut guard) => {
                guard.close();
                debug!("sensor closed");
            }
            Err(_) => warn!("sensor busy at close, handle released on drop"),
        }
    }
}

// =============================================================================
// VL53L0X time-of-flight sensor
// =============================================================================

#[cfg(feature = "rpi")]
pub use vl53l0x::Vl53l0x;

#[cfg(feature = "rpi")]
mod vl53l0x {
    use std::time::Duration;

    use rppal::i2c::I2c;

    use crate::error::DeviceError;
    use crate::kernel::traits::BaseRangeDriver;

    /// Power-on register sequence (stop variable handshake).
    const INIT_SEQUENCE: &[(u8, u8)] = &[
        (0x88, 0x00),
        (0x80, 0x01),
        (0xFF, 0x01),
        (0x00, 0x00),
        (0x91, 0x3C),
        (0x00, 0x01),
        (0xFF, 0x00),
        (0x80, 0x00),
    ];
    const SYSRANGE_START: u8 = 0x00;
    const MODE_BACK_TO_BACK: u8 = 0x02;
    const MODE_STOP: u8 = 0x01;
    /// RESULT_RANGE_STATUS (0x14) + 10: big-endian range in mm.
    const RESULT_RANGE_MM: u8 = 0x1E;
    /// Values at or above this mean "no target".
    const OUT_OF_RANGE_MM: u16 = 8190;

    pub struct Vl53l0x {
        i2c: I2c,
    }

    impl Vl53l0x {
        /// Open the sensor on `bus` at the 7-bit `address` and start continuous ranging.
        pub fn open(bus: u8, address: u8) -> Result<Self, DeviceError> {
            let mut i2c = I2c::with_bus(bus).map_err(io)?;
            i2c.set_slave_address(address as u16).map_err(io)?;

            // Sensor boot time
            std::thread::sleep(Duration::from_millis(200));
            for (register, value) in INIT_SEQUENCE {
                i2c.smbus_write_byte(*register, *value).map_err(io)?;
            }
            std::thread::sleep(Duration::from_millis(50));
            i2c.smbus_write_byte(SYSRANGE_START, MODE_BACK_TO_BACK)
                .map_err(io)?;

            Ok(Self { i2c })
        }
    }

    impl BaseRangeDriver for Vl53l0x {
        fn read_range_mm(&mut self) -> Result<Option<u32>, DeviceError> {
            let mut buf = [0u8; 2];
            self.i2c
                .write_read(&[RESULT_RANGE_MM], &mut buf)
                .map_err(io)?;

            let distance = u16::from_be_bytes(buf);
            if distance == 0 || distance >= OUT_OF_RANGE_MM {
                return Ok(None);
            }
            Ok(Some(distance as u32))
        }

        fn close(&mut self) {
            if let Err(e) = self.i2c.smbus_write_byte(SYSRANGE_START, MODE_STOP) {
                tracing::warn!(error = %e, "failed to stop ranging");
            }
        }
    }

    fn io(e: rppal::i2c::Error) -> DeviceError {
        DeviceError::Io(e.to_string())
    }
}

// =============================================================================
// Simulated sensor
// =============================================================================

/// Alternates between a presence phase and an empty phase, for `--simulate`.
pub struct SimulatedRangeDriver {
    started: std::time::Instant,
    present_for: Duration,
    absent_for: Duration,
    distance_mm: u32,
}

impl SimulatedRangeDriver {
    pub fn new(present_for: Duration, absent_for: Duration, distance_mm: u32) -> Self {
        Self {
            started: std::time::Instant::now(),
            present_for,
            absent_for,
            distance_mm,
        }
    }
}

impl BaseRangeDriver for SimulatedRangeDriver {
    fn read_range_mm(&mut self) -> Result<Option<u32>, DeviceError> {
        let cycle = (self.present_for + self.absent_for).as_millis().max(1);
        let phase = self.started.elapsed().as_millis() % cycle;
        if phase < self.present_for.as_millis() {
            Ok(Some(self.distance_mm))
        } else {
            Ok(None)
        }
    }
}
