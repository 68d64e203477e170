//! ScioSense ENS160 metal-oxide gas sensor.
//!
//! Registers are little-endian. The device answers at 0x53 or 0x52
//! depending on its ADDR pin, which is why it is resolved from a candidate
//! list at boot.

use super::{ClimateReading, CompensatedSensor, GasReading, I2cBus, Sensor, SensorError, SensorKind};
use crate::address::AddressedSensor;

const REG_PART_ID: u8 = 0x00;
const REG_OPMODE: u8 = 0x10;
const REG_TEMP_IN: u8 = 0x13;
const REG_DEVICE_STATUS: u8 = 0x20;
const REG_DATA_AQI: u8 = 0x21;

const PART_ID: u16 = 0x0160;
const OPMODE_STANDARD: u8 = 0x02;

const STATUS_NEWDAT: u8 = 0x02;
const AQI_MASK: u8 = 0x07;

const KELVIN_OFFSET: f32 = 273.15;

#[derive(Debug)]
pub struct Ens160<I> {
    i2c: I,
    address: u8,
}

impl<I: I2cBus> Ens160<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    fn part_id(&mut self) -> Result<u16, SensorError> {
        let mut id = [0u8; 2];
        self.i2c.write_read(self.address, &[REG_PART_ID], &mut id)?;
        Ok(u16::from_le_bytes(id))
    }
}

impl<I: I2cBus> Sensor for Ens160<I> {
    type Reading = GasReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Gas
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        match self.part_id() {
            Ok(PART_ID) => Ok(()),
            Ok(other) => Err(nb::Error::Other(SensorError::WrongDevice(other))),
            Err(SensorError::Io) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.i2c.write(self.address, &[REG_OPMODE, OPMODE_STANDARD])
    }

    fn read(&mut self) -> Result<GasReading, SensorError> {
        let mut status = [0u8; 1];
        self.i2c.write_read(self.address, &[REG_DEVICE_STATUS], &mut status)?;
        if status[0] & STATUS_NEWDAT == 0 {
            return Err(SensorError::NotReady);
        }

        // DATA_AQI, DATA_TVOC (2), DATA_ECO2 (2) are contiguous
        let mut data = [0u8; 5];
        self.i2c.write_read(self.address, &[REG_DATA_AQI], &mut data)?;

        Ok(GasReading {
            aqi_index: u16::from(data[0] & AQI_MASK),
            tvoc_ppb: u16::from_le_bytes([data[1], data[2]]),
            eco2_ppm: u16::from_le_bytes([data[3], data[4]]),
        })
    }
}

impl<I: I2cBus> CompensatedSensor for Ens160<I> {
    fn set_compensation(&mut self, climate: &ClimateReading) -> Result<(), SensorError> {
        let [t_lo, t_hi] = compensation_temperature(climate.temperature_c).to_le_bytes();
        let [h_lo, h_hi] = compensation_humidity(climate.humidity_rh).to_le_bytes();
        // TEMP_IN and RH_IN are adjacent, written in one transfer
        self.i2c.write(self.address, &[REG_TEMP_IN, t_lo, t_hi, h_lo, h_hi])
    }
}

impl<I: I2cBus> AddressedSensor for Ens160<I> {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        Self::new(self.i2c, address)
    }
}

/// Kelvin in 1/64 K steps.
pub fn compensation_temperature(celsius: f32) -> u16 {
    ((celsius + KELVIN_OFFSET) * 64.0).round().clamp(0.0, f32::from(u16::MAX)) as u16
}

/// Relative humidity in 1/512 % steps.
pub fn compensation_humidity(rh: f32) -> u16 {
    (rh.clamp(0.0, 100.0) * 512.0).round() as u16
}
