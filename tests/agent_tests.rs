use aircan::address::AddressedSensor;
use aircan::agent::NodeError;
use aircan::protocol::{CAN_ID_GAS, CAN_ID_PM_AQI_US, CAN_ID_PM_CONCENTRATION};
use aircan::sensors::{CompensatedSensor, Sensor, SensorError, SensorKind};
use aircan::time::{Clock, ManualClock};
use aircan::transmitter::{BusStatus, CanBus};
use aircan::*;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Bind(SensorKind, u8),
    Read(SensorKind),
    Compensate(ClimateReading),
    Sent(CanFrame),
}

type EventLog = Rc<RefCell<Vec<Event>>>;

fn reads(log: &EventLog) -> Vec<SensorKind> {
    log.borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Read(kind) => Some(*kind),
            _ => None,
        })
        .collect()
}

fn sent_ids(log: &EventLog) -> Vec<u16> {
    log.borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Sent(frame) => Some(frame.id().as_raw()),
            _ => None,
        })
        .collect()
}

const PM_READING: ParticulateReading = ParticulateReading {
    pm1_standard: 5,
    pm25_standard: 300,
    pm10_standard: 25,
    pm1_env: 5,
    pm25_env: 300,
    pm10_env: 25,
    particles_03um: 0,
    particles_05um: 0,
    particles_10um: 0,
    particles_25um: 0,
    particles_50um: 0,
    particles_100um: 0,
    aqi_pm25_us: 50,
    aqi_pm10_us: 20,
};

const CLIMATE_READING: ClimateReading = ClimateReading { temperature_c: 21.5, humidity_rh: 40.0 };

const GAS_READING: GasReading = GasReading { aqi_index: 2, tvoc_ppb: 150, eco2_ppm: 620 };

struct MockParticulate {
    log: EventLog,
    present: bool,
    reads: u32,
    // 1-based read numbers that fail
    fail_reads: Vec<u32>,
}

impl Sensor for MockParticulate {
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
        self.reads += 1;
        self.log.borrow_mut().push(Event::Read(SensorKind::Particulate));
        if self.fail_reads.contains(&self.reads) {
            Err(SensorError::Checksum { expected: 0x0100, computed: 0x00FF })
        } else {
            Ok(PM_READING)
        }
    }
}

struct MockClimate {
    log: EventLog,
    live_address: Option<u8>,
    address: u8,
    failing: bool,
}

impl Sensor for MockClimate {
    type Reading = ClimateReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Climate
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        if self.live_address == Some(self.address) { Ok(()) } else { Err(nb::Error::WouldBlock) }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<ClimateReading, SensorError> {
        self.log.borrow_mut().push(Event::Read(SensorKind::Climate));
        if self.failing { Err(SensorError::Io) } else { Ok(CLIMATE_READING) }
    }
}

impl AddressedSensor for MockClimate {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        self.log.borrow_mut().push(Event::Bind(SensorKind::Climate, address));
        Self { address, ..self }
    }
}

struct MockGas {
    log: EventLog,
    live_address: Option<u8>,
    address: u8,
}

impl Sensor for MockGas {
    type Reading = GasReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Gas
    }

    fn poll_ready(&mut self) -> nb::Result<(), SensorError> {
        if self.live_address == Some(self.address) { Ok(()) } else { Err(nb::Error::WouldBlock) }
    }

    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<GasReading, SensorError> {
        self.log.borrow_mut().push(Event::Read(SensorKind::Gas));
        Ok(GAS_READING)
    }
}

impl CompensatedSensor for MockGas {
    fn set_compensation(&mut self, climate: &ClimateReading) -> Result<(), SensorError> {
        self.log.borrow_mut().push(Event::Compensate(*climate));
        Ok(())
    }
}

impl AddressedSensor for MockGas {
    fn address(&self) -> u8 {
        self.address
    }

    fn rebind(self, address: u8) -> Self {
        self.log.borrow_mut().push(Event::Bind(SensorKind::Gas, address));
        Self { address, ..self }
    }
}

struct MockBus {
    log: EventLog,
    starts: bool,
    busy: bool,
}

impl CanBus for MockBus {
    fn start(&mut self) -> Result<(), BusStatus> {
        if self.starts { Ok(()) } else { Err(0x0103) }
    }

    fn try_transmit(&mut self, frame: &CanFrame) -> nb::Result<(), BusStatus> {
        if self.busy {
            return Err(nb::Error::WouldBlock);
        }
        self.log.borrow_mut().push(Event::Sent(frame.clone()));
        Ok(())
    }
}

struct Rig {
    log: EventLog,
    clock: ManualClock,
    particulate: MockParticulate,
    climate: MockClimate,
    gas: MockGas,
    bus: MockBus,
}

type TestAgent = AirQualityAgent<MockParticulate, MockClimate, MockGas, MockBus, ManualClock>;

impl Rig {
    fn new() -> Self {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));
        Self {
            clock: ManualClock::new(0),
            particulate: MockParticulate { log: log.clone(), present: true, reads: 0, fail_reads: Vec::new() },
            climate: MockClimate { log: log.clone(), live_address: Some(0x38), address: 0, failing: false },
            gas: MockGas { log: log.clone(), live_address: Some(0x53), address: 0 },
            bus: MockBus { log: log.clone(), starts: true, busy: false },
            log,
        }
    }

    fn boot_with(self, config: NodeConfig) -> (Result<TestAgent, NodeError>, EventLog, ManualClock) {
        let result = AirQualityAgent::boot(
            config,
            self.clock.clone(),
            self.particulate,
            self.climate,
            self.gas,
            self.bus,
        );
        (result, self.log, self.clock)
    }

    fn boot(self) -> (TestAgent, EventLog, ManualClock) {
        let (result, log, clock) = self.boot_with(NodeConfig::default());
        (result.unwrap(), log, clock)
    }
}

#[test]
fn test_boot_all_sensors_online() {
    let (agent, log, clock) = Rig::new().boot();

    let report = agent.boot_report();
    assert_eq!(report.online, agent::SensorOnlineState { particulate: true, climate: true, gas: true });
    assert!(report.bus_running);
    assert_eq!(report.climate_address, Some(0x38));
    assert_eq!(report.gas_address, Some(0x53));
    assert_eq!(report.gas_attempts, 1);
    assert_eq!(clock.now_ms(), 0);
    assert!(reads(&log).is_empty());
}

#[test]
fn test_no_cycle_before_interval() {
    let (mut agent, log, clock) = Rig::new().boot();

    assert!(agent.tick().is_none());
    clock.advance(1999);
    assert!(agent.tick().is_none());
    assert!(sent_ids(&log).is_empty());
}

#[test]
fn test_cycle_publishes_particulate_frames() {
    let (mut agent, log, clock) = Rig::new().boot();

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");

    assert_eq!(report.cycle, 1);
    assert_eq!(report.particulate, Some(PM_READING));
    assert_eq!(report.frames_sent, 2);
    assert_eq!(report.frames_dropped, 0);

    let frames: Vec<CanFrame> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Sent(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].id().as_raw(), CAN_ID_PM_CONCENTRATION);
    assert_eq!(frames[0].data(), &[0x00, 0x05, 0x01, 0x2C, 0x00, 0x19]);
    assert_eq!(frames[1].id().as_raw(), CAN_ID_PM_AQI_US);
    assert_eq!(frames[1].data(), &[0x00, 0x32, 0x00, 0x14]);
}

#[test]
fn test_climate_compensates_gas_before_gas_read() {
    let (mut agent, log, clock) = Rig::new().boot();

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert!(report.gas_compensated);
    assert_eq!(report.gas, Some(GAS_READING));

    let events = log.borrow();
    let climate_read = events.iter().position(|e| *e == Event::Read(SensorKind::Climate)).unwrap();
    let compensate = events.iter().position(|e| *e == Event::Compensate(CLIMATE_READING)).unwrap();
    let gas_read = events.iter().position(|e| *e == Event::Read(SensorKind::Gas)).unwrap();
    assert!(climate_read < compensate);
    assert!(compensate < gas_read);
}

#[test]
fn test_particulate_frames_sent_before_other_sensors_read() {
    let (mut agent, log, clock) = Rig::new().boot();

    clock.advance(2000);
    agent.tick().expect("cycle due");

    let events = log.borrow();
    let last_sent = events.iter().rposition(|e| matches!(e, Event::Sent(_))).unwrap();
    let climate_read = events.iter().position(|e| *e == Event::Read(SensorKind::Climate)).unwrap();
    assert!(last_sent < climate_read);
}

#[test]
fn test_particulate_failure_skips_frames_for_that_cycle_only() {
    let mut rig = Rig::new();
    rig.particulate.fail_reads = vec![1];
    let (mut agent, log, clock) = rig.boot();

    clock.advance(2000);
    let first = agent.tick().expect("cycle due");
    assert_eq!(first.particulate, None);
    assert_eq!(first.frames_sent, 0);
    // Other sensors still read
    assert!(first.climate.is_some());
    assert!(first.gas.is_some());
    assert!(sent_ids(&log).is_empty());

    clock.advance(2000);
    let second = agent.tick().expect("cycle due");
    assert_eq!(second.frames_sent, 2);
    assert_eq!(sent_ids(&log), vec![CAN_ID_PM_CONCENTRATION, CAN_ID_PM_AQI_US]);
    assert_eq!(agent.faults().counters().sensor_read, 1);
    assert_eq!(agent.faults().faults_in_cycle(1).count(), 1);
}

#[test]
fn test_one_cycle_per_interval_without_catch_up() {
    let (mut agent, _log, clock) = Rig::new().boot();

    clock.advance(2000);
    assert!(agent.tick().is_some());

    // Stall for five intervals: exactly one cycle follows
    clock.advance(10_000);
    assert!(agent.tick().is_some());
    assert!(agent.tick().is_none());

    clock.advance(1999);
    assert!(agent.tick().is_none());
    clock.advance(1);
    assert!(agent.tick().is_some());

    assert_eq!(agent.get_state().cycle_count, 3);
    assert_eq!(agent.scheduler().get_stats().overruns, 1);
}

#[test]
fn test_gas_fallback_uses_exactly_one_extra_attempt() {
    let mut rig = Rig::new();
    rig.gas.live_address = Some(0x52);
    let (mut agent, log, clock) = rig.boot();

    let report = *agent.boot_report();
    assert!(report.online.gas);
    assert_eq!(report.gas_address, Some(0x52));
    assert_eq!(report.gas_attempts, 2);
    // Primary address waited out its full settle time
    assert_eq!(clock.now_ms(), 100);

    let binds: Vec<u8> = log
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Bind(SensorKind::Gas, address) => Some(*address),
            _ => None,
        })
        .collect();
    assert_eq!(binds, vec![0x53, 0x52]);

    clock.advance(2000);
    assert!(agent.tick().expect("cycle due").gas.is_some());
}

#[test]
fn test_gas_absent_at_both_addresses_stays_offline() {
    let mut rig = Rig::new();
    rig.gas.live_address = None;
    let (mut agent, log, clock) = rig.boot();

    let report = *agent.boot_report();
    assert!(!report.online.gas);
    assert_eq!(report.gas_address, None);
    assert_eq!(report.gas_attempts, 2);
    assert_eq!(agent.faults().counters().sensor_init, 1);

    clock.advance(2000);
    let cycle = agent.tick().expect("cycle due");
    assert_eq!(cycle.gas, None);
    assert!(!cycle.gas_compensated);
    assert_eq!(cycle.frames_sent, 2);
    assert_eq!(reads(&log), vec![SensorKind::Particulate, SensorKind::Climate]);
}

#[test]
fn test_climate_failure_reads_gas_uncompensated() {
    let mut rig = Rig::new();
    rig.climate.failing = true;
    let (mut agent, log, clock) = rig.boot();

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert_eq!(report.climate, None);
    assert!(!report.gas_compensated);
    assert_eq!(report.gas, Some(GAS_READING));
    assert!(!log.borrow().iter().any(|e| matches!(e, Event::Compensate(_))));
}

#[test]
fn test_missing_particulate_is_not_fatal_by_default() {
    let mut rig = Rig::new();
    rig.particulate.present = false;
    let (mut agent, log, clock) = rig.boot();

    assert!(!agent.online().particulate);
    assert_eq!(clock.now_ms(), 3000);

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert_eq!(report.frames_sent, 0);
    assert_eq!(reads(&log), vec![SensorKind::Climate, SensorKind::Gas]);
}

#[test]
fn test_missing_particulate_halts_when_required() {
    let mut rig = Rig::new();
    rig.particulate.present = false;
    let config = NodeConfig { require_particulate: true, ..NodeConfig::default() };
    let (result, _log, _clock) = rig.boot_with(config);

    assert!(matches!(result, Err(NodeError::ParticulateUnavailable(SensorError::Timeout))));
}

#[test]
fn test_bus_start_failure_runs_degraded() {
    let mut rig = Rig::new();
    rig.bus.starts = false;
    let (mut agent, log, clock) = rig.boot();

    assert!(!agent.boot_report().bus_running);
    assert_eq!(agent.faults().counters().bus_init, 1);

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert_eq!(report.particulate, Some(PM_READING));
    assert_eq!(report.frames_sent, 0);
    assert_eq!(report.frames_dropped, 2);
    assert!(sent_ids(&log).is_empty());
    assert_eq!(agent.transmit_stats().dropped_offline, 2);
}

#[test]
fn test_dead_bus_keeps_boot_faults_in_history() {
    let mut rig = Rig::new();
    rig.bus.starts = false;
    rig.gas.live_address = None;
    let (mut agent, _log, clock) = rig.boot();

    for _ in 0..40 {
        clock.advance(2000);
        agent.tick().expect("cycle due");
    }

    let kinds: Vec<fault::FaultKind> = agent.faults().history().iter().map(|f| f.kind).collect();
    assert_eq!(kinds, vec![fault::FaultKind::BusInit, fault::FaultKind::SensorInit]);
    assert_eq!(agent.faults().counters().transmit, 0);
    assert_eq!(agent.transmit_stats().dropped_offline, 80);
}

#[test]
fn test_busy_bus_drops_frames_within_timeout() {
    let mut rig = Rig::new();
    rig.bus.busy = true;
    let (mut agent, _log, clock) = rig.boot();

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert_eq!(report.frames_dropped, 2);
    // Each frame waits out the 100 ms send timeout, no more
    assert_eq!(clock.now_ms(), 2200);
    assert_eq!(agent.get_state().last_cycle_duration_ms, 200);
    assert_eq!(agent.transmit_stats().timeouts, 2);
    assert_eq!(agent.faults().counters().transmit, 2);

    // Next interval counts from when the late cycle started
    clock.set(3999);
    assert!(agent.tick().is_none());
    clock.set(4000);
    assert!(agent.tick().is_some());
}

#[test]
fn test_gas_frame_published_when_enabled() {
    let config = NodeConfig { publish_gas: true, ..NodeConfig::default() };
    let (result, log, clock) = Rig::new().boot_with(config);
    let mut agent = result.unwrap();

    clock.advance(2000);
    let report = agent.tick().expect("cycle due");
    assert_eq!(report.frames_sent, 3);
    assert_eq!(sent_ids(&log), vec![CAN_ID_PM_CONCENTRATION, CAN_ID_PM_AQI_US, CAN_ID_GAS]);
}

#[test]
fn test_gas_not_published_by_default() {
    let (mut agent, log, clock) = Rig::new().boot();

    clock.advance(2000);
    agent.tick().expect("cycle due");
    assert!(!sent_ids(&log).contains(&CAN_ID_GAS));
}
