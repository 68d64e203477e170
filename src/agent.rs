use crate::address::{bring_up, resolve, AddressedSensor};
use crate::config::NodeConfig;
use crate::fault::{FaultKind, FaultLog};
use crate::protocol::{gas_frame, particulate_frames, MessageKind};
use crate::scheduler::IntervalScheduler;
use crate::sensors::{
    ClimateReading, CompensatedSensor, GasReading, ParticulateReading, Sensor, SensorError, SensorKind,
};
use crate::time::Clock;
use crate::transmitter::{BusStatus, BusTransmitter, CanBus, TransmitError, TransmitStats};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("particulate sensor not found: {0}")]
    ParticulateUnavailable(SensorError),
}

/// Which sensors came up at boot. Fixed for the rest of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorOnlineState {
    pub particulate: bool,
    pub climate: bool,
    pub gas: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootReport {
    pub online: SensorOnlineState,
    pub bus_running: bool,
    pub climate_address: Option<u8>,
    pub gas_address: Option<u8>,
    pub gas_attempts: u8,
}

/// Everything one cycle produced. Readings are `None` when the sensor is
/// offline or its read failed this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub timestamp_ms: u64,
    pub particulate: Option<ParticulateReading>,
    pub climate: Option<ClimateReading>,
    pub gas: Option<GasReading>,
    pub gas_compensated: bool,
    pub frames_sent: u8,
    pub frames_dropped: u8,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AgentState {
    pub boot_ms: u64,
    pub cycle_count: u32,
    pub last_cycle_ms: Option<u64>,
    pub last_cycle_duration_ms: u64,
}

/// The node: owns every device plus the cycle context and runs one
/// read, fuse, encode, transmit cycle per elapsed interval.
pub struct AirQualityAgent<P, Cl, G, B, C> {
    config: NodeConfig,
    clock: C,

    particulate: Option<P>,
    climate: Option<Cl>,
    gas: Option<G>,
    online: SensorOnlineState,
    boot_report: BootReport,

    transmitter: BusTransmitter<B>,
    scheduler: IntervalScheduler,
    faults: FaultLog,
    state: AgentState,
}

impl<P, Cl, G, B, C> AirQualityAgent<P, Cl, G, B, C>
where
    P: Sensor<Reading = ParticulateReading>,
    Cl: AddressedSensor<Reading = ClimateReading>,
    G: AddressedSensor<Reading = GasReading> + CompensatedSensor,
    B: CanBus,
    C: Clock,
{
    /// Bring up the bus and every sensor. Sensors that do not answer are
    /// left offline for the session; only a missing particulate sensor
    /// with `require_particulate` set stops the boot.
    pub fn boot(
        config: NodeConfig,
        mut clock: C,
        particulate: P,
        climate: Cl,
        gas: G,
        bus: B,
    ) -> Result<Self, NodeError> {
        let boot_ms = clock.now_ms();
        let mut faults = FaultLog::new();

        info!("air quality node booting (interval {} ms)", config.interval_ms);

        let transmitter = match BusTransmitter::start(bus, config.send_timeout_ms) {
            Ok(transmitter) => transmitter,
            Err((degraded, status)) => {
                Self::note_bus_failure(&mut faults, status, clock.now_ms());
                degraded
            }
        };

        let mut particulate = particulate;
        let particulate = match bring_up(&mut particulate, &mut clock, config.pm_settle_timeout_ms) {
            Ok(()) => {
                info!("particulate sensor online");
                Some(particulate)
            }
            Err(e) if config.require_particulate => {
                error!("particulate sensor not found: {}", e);
                return Err(NodeError::ParticulateUnavailable(e));
            }
            Err(e) => {
                error!("particulate sensor not found, continuing without it: {}", e);
                faults.record(FaultKind::SensorInit, Some(SensorKind::Particulate), clock.now_ms(), 0);
                None
            }
        };

        let climate = resolve(climate, &config.climate_addresses, &mut clock, config.i2c_settle_timeout_ms);
        let climate_address = climate.address;
        if !climate.is_online() {
            faults.record(FaultKind::SensorInit, Some(SensorKind::Climate), clock.now_ms(), 0);
        }

        let gas = resolve(gas, &config.gas_addresses, &mut clock, config.i2c_settle_timeout_ms);
        let gas_address = gas.address;
        let gas_attempts = gas.attempts;
        if !gas.is_online() {
            faults.record(FaultKind::SensorInit, Some(SensorKind::Gas), clock.now_ms(), 0);
        }

        let climate = climate.into_online();
        let gas = gas.into_online();
        let online = SensorOnlineState {
            particulate: particulate.is_some(),
            climate: climate.is_some(),
            gas: gas.is_some(),
        };
        let boot_report = BootReport {
            online,
            bus_running: transmitter.is_running(),
            climate_address,
            gas_address,
            gas_attempts,
        };

        // The first cycle is due one interval after boot completes
        let scheduler = IntervalScheduler::new(config.interval_ms, clock.now_ms());

        info!(
            "boot complete: particulate={} climate={} gas={} bus={}",
            online.particulate, online.climate, online.gas, boot_report.bus_running
        );

        Ok(Self {
            config,
            clock,
            particulate,
            climate,
            gas,
            online,
            boot_report,
            transmitter,
            scheduler,
            faults,
            state: AgentState { boot_ms, ..AgentState::default() },
        })
    }

    fn note_bus_failure(faults: &mut FaultLog, status: BusStatus, now_ms: u64) {
        warn!("running without CAN transmission (status {:#x})", status);
        faults.record(FaultKind::BusInit, None, now_ms, 0);
    }

    /// Call from the main loop as often as convenient. Runs one cycle when
    /// an interval has elapsed since the last one and returns its report.
    pub fn tick(&mut self) -> Option<CycleReport> {
        let now_ms = self.clock.now_ms();
        if self.scheduler.poll(now_ms) {
            Some(self.run_cycle(now_ms))
        } else {
            None
        }
    }

    fn run_cycle(&mut self, now_ms: u64) -> CycleReport {
        self.state.cycle_count = self.state.cycle_count.wrapping_add(1);
        let cycle = self.state.cycle_count;
        let mut report = CycleReport {
            cycle,
            timestamp_ms: now_ms,
            particulate: None,
            climate: None,
            gas: None,
            gas_compensated: false,
            frames_sent: 0,
            frames_dropped: 0,
        };

        // Particulate: read, encode, publish both messages
        report.particulate = self.read_particulate(cycle);
        if let Some(reading) = report.particulate {
            for (kind, payload) in particulate_frames(&reading) {
                self.publish(kind, &payload, cycle, &mut report);
            }
        }

        // Climate must be read and handed to the gas sensor before the
        // gas reading is taken
        report.climate = self.read_climate(cycle);
        if let (Some(climate), Some(gas)) = (report.climate, self.gas.as_mut()) {
            match gas.set_compensation(&climate) {
                Ok(()) => report.gas_compensated = true,
                Err(e) => warn!("gas compensation not applied: {}", e),
            }
        }
        report.gas = self.read_gas(cycle);

        if self.config.publish_gas {
            if let Some(reading) = report.gas {
                let (kind, payload) = gas_frame(&reading);
                self.publish(kind, &payload, cycle, &mut report);
            }
        }

        self.log_diagnostics(&report);

        self.state.last_cycle_ms = Some(now_ms);
        self.state.last_cycle_duration_ms = self.clock.now_ms().saturating_sub(now_ms);
        report
    }

    fn read_particulate(&mut self, cycle: u32) -> Option<ParticulateReading> {
        let sensor = self.particulate.as_mut()?;
        match sensor.read() {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("particulate read failed, skipping PM frames this cycle: {}", e);
                self.faults.record(FaultKind::SensorRead, Some(SensorKind::Particulate), self.clock.now_ms(), cycle);
                None
            }
        }
    }

    fn read_climate(&mut self, cycle: u32) -> Option<ClimateReading> {
        let sensor = self.climate.as_mut()?;
        match sensor.read() {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("climate read failed: {}", e);
                self.faults.record(FaultKind::SensorRead, Some(SensorKind::Climate), self.clock.now_ms(), cycle);
                None
            }
        }
    }

    fn read_gas(&mut self, cycle: u32) -> Option<GasReading> {
        let sensor = self.gas.as_mut()?;
        match sensor.read() {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("gas read failed: {}", e);
                self.faults.record(FaultKind::SensorRead, Some(SensorKind::Gas), self.clock.now_ms(), cycle);
                None
            }
        }
    }

    fn publish(&mut self, kind: MessageKind, payload: &[u8], cycle: u32, report: &mut CycleReport) {
        match self.transmitter.transmit(&mut self.clock, kind, payload) {
            Ok(()) => report.frames_sent = report.frames_sent.saturating_add(1),
            // Already recorded once as BusInit; counted in the transmit stats only
            Err(TransmitError::BusOffline) => {
                report.frames_dropped = report.frames_dropped.saturating_add(1);
            }
            Err(TransmitError::Timeout(_) | TransmitError::Driver(_) | TransmitError::InvalidFrame(_)) => {
                report.frames_dropped = report.frames_dropped.saturating_add(1);
                self.faults.record(FaultKind::Transmit, None, self.clock.now_ms(), cycle);
            }
        }
    }

    fn log_diagnostics(&self, report: &CycleReport) {
        if let Some(pm) = &report.particulate {
            info!(
                "PM1.0={} PM2.5={} PM10={} ug/m3, AQI PM2.5={} PM10={}",
                pm.pm1_env, pm.pm25_env, pm.pm10_env, pm.aqi_pm25_us, pm.aqi_pm10_us
            );
        }
        if let Some(climate) = &report.climate {
            info!("T={:.2} C RH={:.2} %", climate.temperature_c, climate.humidity_rh);
        }
        if let Some(gas) = &report.gas {
            info!("AQI-UBA={} TVOC={} ppb eCO2={} ppm", gas.aqi_index, gas.tvoc_ppb, gas.eco2_ppm);
        }
        debug!(
            "cycle {} done: {} frame(s) sent, {} dropped",
            report.cycle, report.frames_sent, report.frames_dropped
        );
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn online(&self) -> SensorOnlineState {
        self.online
    }

    pub fn boot_report(&self) -> &BootReport {
        &self.boot_report
    }

    pub fn get_state(&self) -> &AgentState {
        &self.state
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    pub fn scheduler(&self) -> &IntervalScheduler {
        &self.scheduler
    }

    pub fn transmit_stats(&self) -> &TransmitStats {
        self.transmitter.stats()
    }

    pub fn bus(&self) -> &B {
        self.transmitter.bus()
    }
}
