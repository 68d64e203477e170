use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub polls: u64,
    pub cycles_triggered: u32,
    /// Triggers that fired more than one full interval late.
    pub overruns: u32,
}

/// Fixed-interval trigger polled from a non-blocking main loop.
///
/// The next period is measured from the moment of the last trigger, not
/// from an ideal grid: a late trigger pushes every later one back, and
/// missed periods are never made up.
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    interval_ms: u64,
    last_triggered_ms: u64,
    stats: SchedulerStats,
}

impl IntervalScheduler {
    /// The first trigger happens one full interval after `start_ms`.
    pub fn new(interval_ms: u64, start_ms: u64) -> Self {
        Self {
            interval_ms,
            last_triggered_ms: start_ms,
            stats: SchedulerStats::default(),
        }
    }

    /// Returns `true` at most once per elapsed interval. The caller runs
    /// exactly one cycle for each `true`.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        self.stats.polls = self.stats.polls.wrapping_add(1);

        let elapsed = now_ms.saturating_sub(self.last_triggered_ms);
        if elapsed < self.interval_ms {
            return false;
        }

        let lateness = elapsed - self.interval_ms;
        if self.interval_ms > 0 && lateness > self.interval_ms {
            self.stats.overruns = self.stats.overruns.saturating_add(1);
        }
        self.last_triggered_ms = now_ms;
        self.stats.cycles_triggered = self.stats.cycles_triggered.saturating_add(1);
        true
    }

    /// Milliseconds until the next trigger is due.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.interval_ms
            .saturating_sub(now_ms.saturating_sub(self.last_triggered_ms))
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn last_triggered_ms(&self) -> u64 {
        self.last_triggered_ms
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}
