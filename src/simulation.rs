//! Simulated sensors and CAN bus for running the node on a workstation.
//!
//! Values follow slow periodic drift plus noise. Failures are injected at
//! configurable per-read rates from a seeded generator, so a given seed
//! always replays the same run.

use crate::address::AddressedSensor;
use crate::protocol::CanFrame;
use crate::sensors::particulate::{decode_frame, encode_frame};
use crate::sensors::{
    ClimateReading, CompensatedSensor, GasReading, ParticulateReading, Sensor, SensorError, SensorKind,
};
use crate::transmitter::{BusStatus, CanBus};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;
const WIRE_CAPACITY: usize = 64;
const TWO_PI: f32 = core::f32::consts::PI * 2.0;

/// Samples per simulated day-cycle of the drift.
const DRIFT_PERIOD: f32 = 180.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub particulate_present: bool,
    pub climate_present: bool,
    /// Address the gas sensor answers at; `None` for absent.
    pub gas_address: Option<u8>,
    pub bus_starts: bool,
    pub particulate_failure_percent: f32,
    pub climate_failure_percent: f32,
    pub gas_failure_percent: f32,
    /// Chance that the transmit queue is full for the whole send timeout.
    pub bus_busy_percent: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            particulate_present: true,
            climate_present: true,
            gas_address: Some(crate::config::ENS160_PRIMARY_ADDRESS),
            bus_starts: true,
            particulate_failure_percent: 0.0,
            climate_failure_percent: 0.0,
            gas_failure_percent: 0.0,
            bus_busy_percent: 0.0,
        }
    }
}

/// Linear congruential generator; deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 33) as u32
    }

    /// Uniform in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    pub fn chance(&mut self, percent: f32) -> bool {
        percent > 0.0 && self.next_f32() * 100.0 < percent
    }

    /// Uniform in [-amplitude, amplitude).
    pub fn noise(&mut self, amplitude: f32) -> f32 {
        (self.next_f32() * 2.0 - 1.0) * amplitude
    }
}

fn drift(sample: u32, phase: f32) -> f32 {
    (sample as f32 / DRIFT_PERIOD * TWO_PI + phase).sin()
}

#[derive(Debug)]
pub struct SimParticulate {
    present: bool,
    failure_percent: f32,
    rng: Lcg,
    samples: u32,
}

impl SimParticulate {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            present: config.particulate_present,
            failure_percent: config.particulate_failure_percent,
            rng: Lcg::new(config.seed ^ 0x01),
            samples: 0,
        }
    }
}

impl Sensor for SimParticulate {
    type Reading = ParticulateReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Particulate
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        if self.present { Ok(()) } else { Err(nb::Error::WouldBlock) }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<ParticulateReading, SensorError> {
        self.samples = self.samples.wrapping_add(1);
        if self.rng.chance(self.failure_percent) {
            return Err(SensorError::NotReady);
        }

        let pm25 = (18.0 + 14.0 * drift(self.samples, 0.0) + self.rng.noise(3.0)).max(0.0);
        let pm1 = pm25 * 0.65;
        let pm10 = pm25 * 1.45 + self.rng.noise(2.0).abs();

        let raw = ParticulateReading {
            pm1_standard: pm1 as u16,
            pm25_standard: pm25 as u16,
            pm10_standard: pm10 as u16,
            pm1_env: pm1 as u16,
            pm25_env: pm25 as u16,
            pm10_env: pm10 as u16,
            particles_03um: (pm25 * 180.0) as u16,
            particles_05um: (pm25 * 52.0) as u16,
            particles_10um: (pm25 * 9.0) as u16,
            particles_25um: (pm25 * 1.1) as u16,
            particles_50um: (pm25 * 0.3) as u16,
            particles_100um: (pm25 * 0.1) as u16,
            ..ParticulateReading::default()
        };
        // Same path as a real frame, including AQI derivation
        decode_frame(&encode_frame(&raw))
    }
}

#[derive(Debug)]
pub struct SimClimate {
    present: bool,
    address: u8,
    failure_percent: f32,
    rng: Lcg,
    samples: u32,
}

impl SimClimate {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            present: config.climate_present,
            address: 0,
            failure_percent: config.climate_failure_percent,
            rng: Lcg::new(config.seed ^ 0x02),
            samples: 0,
        }
    }
}

impl Sensor for SimClimate {
    type Reading = ClimateReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Climate
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        if self.present { Ok(()) } else { Err(nb::Error::WouldBlock) }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.samples = self.samples.wrapping_add(1);
        if self.rng.chance(self.failure_percent) {
            return Err(SensorError::Io);
        }
        Ok(ClimateReading {
            temperature_c: 22.0 + 4.0 * drift(self.samples, 1.0) + self.rng.noise(0.2),
            humidity_rh: (45.0 - 10.0 * drift(self.samples, 1.0) + self.rng.noise(1.0)).clamp(0.0, 100.0),
        })
    }
}

impl AddressedSensor for SimClimate {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        Self { address, ..self }
    }
}

#[derive(Debug)]
pub struct SimGas {
    live_address: Option<u8>,
    address: u8,
    failure_percent: f32,
    rng: Lcg,
    samples: u32,
    compensation: Option<ClimateReading>,
}

impl SimGas {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            live_address: config.gas_address,
            address: 0,
            failure_percent: config.gas_failure_percent,
            rng: Lcg::new(config.seed ^ 0x03),
            samples: 0,
            compensation: None,
        }
    }

    pub fn compensation(&self) -> Option<ClimateReading> {
        self.compensation
    }
}

impl Sensor for SimGas {
    type Reading = GasReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Gas
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        if self.live_address == Some(self.address) {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<GasReading, SensorError> {
        self.samples = self.samples.wrapping_add(1);
        if self.rng.chance(self.failure_percent) {
            return Err(SensorError::NotReady);
        }

        // Without compensation the sensor assumes 25 C / 50 %RH and reads high
        let humidity_bias = if self.compensation.is_some() { 1.0 } else { 1.05 };
        let tvoc = ((120.0 + 80.0 * drift(self.samples, 2.0) + self.rng.noise(15.0)) * humidity_bias).max(0.0);
        let eco2 = 400.0 + tvoc * 1.8;
        let aqi = match tvoc as u16 {
            0..=64 => 1,
            65..=219 => 2,
            220..=659 => 3,
            660..=2199 => 4,
            _ => 5,
        };

        Ok(GasReading { aqi_index: aqi, tvoc_ppb: tvoc as u16, eco2_ppm: eco2 as u16 })
    }
}

impl CompensatedSensor for SimGas {
    fn set_compensation(&mut self, climate: &ClimateReading) -> Result<(), SensorError> {
        self.compensation = Some(*climate);
        Ok(())
    }
}

impl AddressedSensor for SimGas {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        Self { address, ..self }
    }
}

/// Receiving side of the simulated bus. Clones see the same traffic.
#[derive(Debug, Clone, Default)]
pub struct SimWire {
    frames: Rc<RefCell<VecDeque<CanFrame>>>,
}

impl SimWire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every frame received since the last drain.
    pub fn drain(&self) -> Vec<CanFrame> {
        self.frames.borrow_mut().drain(..).collect()
    }

    fn deliver(&self, frame: &CanFrame) {
        let mut frames = self.frames.borrow_mut();
        if frames.len() == WIRE_CAPACITY {
            frames.pop_front();
        }
        frames.push_back(frame.clone());
    }
}

#[derive(Debug)]
pub struct SimBus {
    wire: SimWire,
    starts: bool,
    busy_percent: f32,
    rng: Lcg,
    // Busy verdict for the frame currently being offered
    stalled: Option<CanFrame>,
}

impl SimBus {
    pub fn new(config: &SimulationConfig, wire: SimWire) -> Self {
        Self {
            wire,
            starts: config.bus_starts,
            busy_percent: config.bus_busy_percent,
            rng: Lcg::new(config.seed ^ 0x04),
            stalled: None,
        }
    }
}

impl CanBus for SimBus {
    fn start(&mut self) -> Result<(), BusStatus> {
        if self.starts { Ok(()) } else { Err(0x103) }
    }

    fn try_transmit(&mut self, frame: &CanFrame) -> nb::Result<(), BusStatus> {
        // A frame decided to be stuck stays stuck until a different frame
        // is offered, which covers the whole bounded wait
        if self.stalled.as_ref() == Some(frame) {
            return Err(nb::Error::WouldBlock);
        }
        if self.rng.chance(self.busy_percent) {
            self.stalled = Some(frame.clone());
            return Err(nb::Error::WouldBlock);
        }
        self.stalled = None;
        self.wire.deliver(frame);
        Ok(())
    }
}

/// Build the four simulated devices from one configuration.
pub fn devices(config: &SimulationConfig, wire: SimWire) -> (SimParticulate, SimClimate, SimGas, SimBus) {
    (
        SimParticulate::new(config),
        SimClimate::new(config),
        SimGas::new(config),
        SimBus::new(config, wire),
    )
}
