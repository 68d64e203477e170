use crate::sensors::SensorKind;
use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_FAULT_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Sensor never came up at boot; offline for the session.
    SensorInit,
    /// Sensor that booted fine failed one read.
    SensorRead,
    /// CAN controller did not start; no transmission this session.
    BusInit,
    /// One frame could not be queued in time and was dropped.
    Transmit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub kind: FaultKind,
    pub sensor: Option<SensorKind>,
    pub timestamp: u64,
    pub cycle: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounters {
    pub sensor_init: u32,
    pub sensor_read: u32,
    pub bus_init: u32,
    pub transmit: u32,
}

/// Bounded fault history. The oldest record is evicted when full; the
/// counters keep the lifetime totals.
#[derive(Debug)]
pub struct FaultLog {
    fault_history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    counters: FaultCounters,
    next_fault_id: u32,
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            fault_history: Vec::new(),
            counters: FaultCounters::default(),
            next_fault_id: 1,
        }
    }

    pub fn record(
        &mut self,
        kind: FaultKind,
        sensor: Option<SensorKind>,
        timestamp: u64,
        cycle: u32,
    ) -> u32 {
        let fault_id = self.next_fault_id;
        self.next_fault_id = self.next_fault_id.wrapping_add(1);

        let counter = match kind {
            FaultKind::SensorInit => &mut self.counters.sensor_init,
            FaultKind::SensorRead => &mut self.counters.sensor_read,
            FaultKind::BusInit => &mut self.counters.bus_init,
            FaultKind::Transmit => &mut self.counters.transmit,
        };
        *counter = counter.saturating_add(1);

        if self.fault_history.is_full() {
            self.fault_history.remove(0);
        }

        let _ = self.fault_history.push(FaultRecord {
            id: fault_id,
            kind,
            sensor,
            timestamp,
            cycle,
        });
        fault_id
    }

    pub fn history(&self) -> &[FaultRecord] {
        &self.fault_history
    }

    pub fn counters(&self) -> &FaultCounters {
        &self.counters
    }

    pub fn faults_in_cycle(&self, cycle: u32) -> impl Iterator<Item = &FaultRecord> {
        self.fault_history.iter().filter(move |f| f.cycle == cycle)
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}
