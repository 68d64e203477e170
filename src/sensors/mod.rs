pub mod aqi;
pub mod climate;
pub mod gas;
pub mod particulate;

pub use climate::Aht2x;
pub use gas::Ens160;
pub use particulate::Pms5003;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Particulate,
    Climate,
    Gas,
}

impl core::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorKind::Particulate => write!(f, "particulate"),
            SensorKind::Climate => write!(f, "climate"),
            SensorKind::Gas => write!(f, "gas"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticulateReading {
    // Standard particle (CF=1) concentrations, µg/m³
    pub pm1_standard: u16,
    pub pm25_standard: u16,
    pub pm10_standard: u16,
    // Environmental concentrations, µg/m³
    pub pm1_env: u16,
    pub pm25_env: u16,
    pub pm10_env: u16,
    // Particles per 0.1 L of air above each diameter
    pub particles_03um: u16,
    pub particles_05um: u16,
    pub particles_10um: u16,
    pub particles_25um: u16,
    pub particles_50um: u16,
    pub particles_100um: u16,
    pub aqi_pm25_us: u16,
    pub aqi_pm10_us: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClimateReading {
    pub temperature_c: f32,
    pub humidity_rh: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GasReading {
    /// UBA air quality index, 1 (excellent) to 5 (unhealthy)
    pub aqi_index: u16,
    pub tvoc_ppb: u16,
    pub eco2_ppm: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("bus transfer failed")]
    Io,
    #[error("checksum mismatch (expected {expected:#06x}, computed {computed:#06x})")]
    Checksum { expected: u16, computed: u16 },
    #[error("malformed frame")]
    BadFrame,
    #[error("no data available")]
    NotReady,
    #[error("measurement still in progress")]
    Busy,
    #[error("unexpected device id {0:#06x}")]
    WrongDevice(u16),
    #[error("device did not answer before the deadline")]
    Timeout,
}

/// Byte-oriented serial link, as exposed by a UART driver.
pub trait SerialPort {
    /// Next received byte, or `WouldBlock` when the receive FIFO is empty.
    fn read_byte(&mut self) -> nb::Result<u8, SensorError>;
}

/// Short-range register bus (I2C) addressed by 7-bit device address.
pub trait I2cBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError>;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), SensorError>;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), SensorError> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}

/// One sensor device. Each kind produces its own reading type.
pub trait Sensor {
    type Reading: Copy + core::fmt::Debug + Serialize;

    fn kind(&self) -> SensorKind;

    /// Non-blocking readiness probe, polled under a deadline while the
    /// device boots.
    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        Ok(())
    }

    /// One-time configuration after the device reported ready.
    fn init(&mut self) -> Result<(), SensorError>;

    /// Take one reading.
    fn read(&mut self) -> Result<Self::Reading, SensorError>;
}

/// Sensor whose accuracy depends on ambient temperature and humidity.
pub trait CompensatedSensor: Sensor {
    fn set_compensation(&mut self, climate: &ClimateReading) -> Result<(), SensorError>;
}
