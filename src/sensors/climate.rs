//! AHT20/AHT21 temperature and humidity sensor.
//!
//! Measurements are pipelined so a read never waits for the ~80 ms
//! conversion: `init` triggers the first conversion and every `read`
//! collects the finished one and triggers the next.

use super::{ClimateReading, I2cBus, Sensor, SensorError, SensorKind};
use crate::address::AddressedSensor;
use tracing::warn;

const CMD_STATUS: u8 = 0x71;
const CMD_CALIBRATE: [u8; 3] = [0xBE, 0x08, 0x00];
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

const STATUS_BUSY: u8 = 0x80;
const STATUS_CALIBRATED: u8 = 0x08;

const RAW_SCALE: f32 = 1_048_576.0; // 2^20

#[derive(Debug)]
pub struct Aht2x<I> {
    i2c: I,
    address: u8,
}

impl<I: I2cBus> Aht2x<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    fn status(&mut self) -> Result<u8, SensorError> {
        let mut status = [0u8; 1];
        self.i2c.write_read(self.address, &[CMD_STATUS], &mut status)?;
        Ok(status[0])
    }

    fn trigger(&mut self) -> Result<(), SensorError> {
        self.i2c.write(self.address, &CMD_TRIGGER)
    }
}

impl<I: I2cBus> Sensor for Aht2x<I> {
    type Reading = ClimateReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Climate
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        match self.status() {
            Ok(status) if status & STATUS_BUSY == 0 => Ok(()),
            Ok(_) | Err(SensorError::Io) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        if self.status()? & STATUS_CALIBRATED == 0 {
            self.i2c.write(self.address, &CMD_CALIBRATE)?;
        }
        self.trigger()
    }

    fn read(&mut self) -> Result<ClimateReading, SensorError> {
        let mut raw = [0u8; 7];
        self.i2c.read(self.address, &mut raw)?;
        let reading = decode_measurement(&raw)?;

        if let Err(e) = self.trigger() {
            warn!("AHT2x at {:#04x}: next conversion not started: {}", self.address, e);
        }
        Ok(reading)
    }
}

impl<I: I2cBus> AddressedSensor for Aht2x<I> {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        Self::new(self.i2c, address)
    }
}

/// Decode the 7-byte measurement block: status, 20-bit humidity, 20-bit
/// temperature, CRC-8.
pub fn decode_measurement(raw: &[u8; 7]) -> Result<ClimateReading, SensorError> {
    if raw[0] & STATUS_BUSY != 0 {
        return Err(SensorError::Busy);
    }
    let computed = crc8(&raw[..6]);
    if computed != raw[6] {
        return Err(SensorError::Checksum {
            expected: u16::from(raw[6]),
            computed: u16::from(computed),
        });
    }

    let humidity_raw =
        (u32::from(raw[1]) << 12) | (u32::from(raw[2]) << 4) | (u32::from(raw[3]) >> 4);
    let temperature_raw =
        ((u32::from(raw[3]) & 0x0F) << 16) | (u32::from(raw[4]) << 8) | u32::from(raw[5]);

    Ok(ClimateReading {
        temperature_c: temperature_raw as f32 / RAW_SCALE * 200.0 - 50.0,
        humidity_rh: humidity_raw as f32 / RAW_SCALE * 100.0,
    })
}

/// CRC-8, polynomial 0x31, initial value 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x31 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedBus {
        writes: Vec<(u8, Vec<u8>)>,
        reads: VecDeque<Result<Vec<u8>, SensorError>>,
    }

    impl I2cBus for ScriptedBus {
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }

        fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), SensorError> {
            let data = self.reads.pop_front().unwrap_or(Err(SensorError::Io))?;
            buffer.copy_from_slice(&data[..buffer.len()]);
            Ok(())
        }
    }

    fn measurement(status: u8, humidity_raw: u32, temperature_raw: u32) -> Vec<u8> {
        let mut raw = vec![
            status,
            (humidity_raw >> 12) as u8,
            (humidity_raw >> 4) as u8,
            (((humidity_raw & 0x0F) << 4) as u8) | ((temperature_raw >> 16) & 0x0F) as u8,
            (temperature_raw >> 8) as u8,
            temperature_raw as u8,
        ];
        raw.push(crc8(&raw));
        raw
    }

    #[test]
    fn test_crc8_reference_value() {
        // Sensirion/Aosong reference vector
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn test_decode_half_scale() {
        let raw: [u8; 7] = measurement(0x18, 0x80000, 0x80000).try_into().unwrap();
        let reading = decode_measurement(&raw).unwrap();
        assert!((reading.humidity_rh - 50.0).abs() < 0.01);
        assert!((reading.temperature_c - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_busy_measurement_rejected() {
        let raw: [u8; 7] = measurement(0x98, 0, 0).try_into().unwrap();
        assert_eq!(decode_measurement(&raw), Err(SensorError::Busy));
    }

    #[test]
    fn test_read_triggers_next_conversion() {
        let mut bus = ScriptedBus::default();
        bus.reads.push_back(Ok(measurement(0x18, 0x40000, 0x60000)));
        let mut sensor = Aht2x::new(bus, 0x38);

        let reading = sensor.read().unwrap();
        assert!((reading.humidity_rh - 25.0).abs() < 0.01);
        assert!((reading.temperature_c - 25.0).abs() < 0.01);
        assert_eq!(sensor.i2c.writes, vec![(0x38, CMD_TRIGGER.to_vec())]);
    }

    #[test]
    fn test_init_calibrates_when_needed() {
        let mut bus = ScriptedBus::default();
        bus.reads.push_back(Ok(vec![0x00]));
        let mut sensor = Aht2x::new(bus, 0x38);

        sensor.init().unwrap();
        let writes: Vec<Vec<u8>> = sensor.i2c.writes.iter().map(|(_, w)| w.clone()).collect();
        assert_eq!(writes, vec![vec![CMD_STATUS], CMD_CALIBRATE.to_vec(), CMD_TRIGGER.to_vec()]);
    }

    #[test]
    fn test_absent_device_not_ready() {
        let mut sensor = Aht2x::new(ScriptedBus::default(), 0x38);
        assert_eq!(sensor.poll_ready(), Err(nb::Error::WouldBlock));
    }
}
