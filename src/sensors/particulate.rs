//! Plantower PMS5003 particulate sensor on a UART.
//!
//! The sensor streams 32-byte frames in active mode:
//!
//! ```text
//! 0x42 0x4D | len (=28) | 13 x u16 data | u16 checksum
//! ```
//!
//! All multi-byte fields are big-endian. The checksum is the 16-bit sum of
//! the first 30 bytes.

use super::aqi::{pm10_aqi_us, pm25_aqi_us};
use super::{ParticulateReading, Sensor, SensorError, SensorKind, SerialPort};
use tracing::debug;

pub const FRAME_LEN: usize = 32;
const START_1: u8 = 0x42;
const START_2: u8 = 0x4D;
const DECLARED_LEN: u16 = 28;
const DATA_WORDS: usize = 13;

#[derive(Debug)]
pub struct Pms5003<S> {
    serial: S,
    buffer: [u8; FRAME_LEN],
    fill: usize,
    frames_decoded: u32,
    frames_rejected: u32,
}

impl<S: SerialPort> Pms5003<S> {
    pub fn new(serial: S) -> Self {
        Self {
            serial,
            buffer: [0; FRAME_LEN],
            fill: 0,
            frames_decoded: 0,
            frames_rejected: 0,
        }
    }

    pub fn release(self) -> S {
        self.serial
    }

    pub fn frames_decoded(&self) -> u32 {
        self.frames_decoded
    }

    pub fn frames_rejected(&self) -> u32 {
        self.frames_rejected
    }

    /// Consume bytes until one complete frame is assembled. A partial frame
    /// stays buffered across calls.
    pub fn poll_frame(&mut self) -> nb::Result<ParticulateReading, SensorError> {
        loop {
            let byte = self.serial.read_byte()?;

            match self.fill {
                0 if byte != START_1 => continue,
                1 if byte != START_2 => {
                    // A repeated 0x42 may itself be the start of the frame
                    self.fill = usize::from(byte == START_1);
                    continue;
                }
                _ => {}
            }

            self.buffer[self.fill] = byte;
            self.fill += 1;

            if self.fill == FRAME_LEN {
                self.fill = 0;
                return match decode_frame(&self.buffer) {
                    Ok(reading) => {
                        self.frames_decoded = self.frames_decoded.wrapping_add(1);
                        Ok(reading)
                    }
                    Err(e) => {
                        self.frames_rejected = self.frames_rejected.wrapping_add(1);
                        debug!("PMS5003 frame rejected: {}", e);
                        Err(nb::Error::Other(e))
                    }
                };
            }
        }
    }
}

impl<S: SerialPort> Sensor for Pms5003<S> {
    type Reading = ParticulateReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Particulate
    }

    /// Ready once the first valid frame arrives. Corrupt frames while the
    /// fan spins up are expected and only mean "not yet".
    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        match self.poll_frame() {
            Ok(_) => Ok(()),
            Err(nb::Error::Other(SensorError::Checksum { .. } | SensorError::BadFrame)) => {
                Err(nb::Error::WouldBlock)
            }
            Err(e) => Err(e),
        }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<ParticulateReading, SensorError> {
        match self.poll_frame() {
            Ok(reading) => Ok(reading),
            Err(nb::Error::WouldBlock) => Err(SensorError::NotReady),
            Err(nb::Error::Other(e)) => Err(e),
        }
    }
}

/// Validate and decode one raw frame, deriving the US AQI values from the
/// environmental concentrations.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<ParticulateReading, SensorError> {
    if frame[0] != START_1 || frame[1] != START_2 {
        return Err(SensorError::BadFrame);
    }
    if u16::from_be_bytes([frame[2], frame[3]]) != DECLARED_LEN {
        return Err(SensorError::BadFrame);
    }

    let computed = frame[..FRAME_LEN - 2]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
    let expected = u16::from_be_bytes([frame[FRAME_LEN - 2], frame[FRAME_LEN - 1]]);
    if computed != expected {
        return Err(SensorError::Checksum { expected, computed });
    }

    let mut words = [0u16; DATA_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        let at = 4 + i * 2;
        *word = u16::from_be_bytes([frame[at], frame[at + 1]]);
    }

    let mut reading = ParticulateReading {
        pm1_standard: words[0],
        pm25_standard: words[1],
        pm10_standard: words[2],
        pm1_env: words[3],
        pm25_env: words[4],
        pm10_env: words[5],
        particles_03um: words[6],
        particles_05um: words[7],
        particles_10um: words[8],
        particles_25um: words[9],
        particles_50um: words[10],
        particles_100um: words[11],
        aqi_pm25_us: 0,
        aqi_pm10_us: 0,
    };
    reading.aqi_pm25_us = pm25_aqi_us(f32::from(reading.pm25_env));
    reading.aqi_pm10_us = pm10_aqi_us(f32::from(reading.pm10_env));

    Ok(reading)
}

/// Build a well-formed frame carrying `reading`'s concentrations and
/// counts. The last data word (reserved) is zero.
pub fn encode_frame(reading: &ParticulateReading) -> [u8; FRAME_LEN] {
    let words: [u16; DATA_WORDS] = [
        reading.pm1_standard,
        reading.pm25_standard,
        reading.pm10_standard,
        reading.pm1_env,
        reading.pm25_env,
        reading.pm10_env,
        reading.particles_03um,
        reading.particles_05um,
        reading.particles_10um,
        reading.particles_25um,
        reading.particles_50um,
        reading.particles_100um,
        0,
    ];

    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_1;
    frame[1] = START_2;
    frame[2..4].copy_from_slice(&DECLARED_LEN.to_be_bytes());
    for (i, word) in words.iter().enumerate() {
        let at = 4 + i * 2;
        frame[at..at + 2].copy_from_slice(&word.to_be_bytes());
    }
    let checksum = frame[..FRAME_LEN - 2]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)));
    frame[FRAME_LEN - 2..].copy_from_slice(&checksum.to_be_bytes());
    frame
}
