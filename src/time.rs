//! Monotonic time source and the bounded wait primitive.
//!
//! Every wait in the node goes through [`poll_until`]: the operation is
//! polled without blocking and the loop gives up once the deadline passes.
//! There is no unconditional sleep anywhere in the pipeline.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Granularity of the busy-wait inside [`poll_until`].
pub const POLL_STEP_MS: u64 = 1;

/// Millisecond clock owned by the node's single execution context.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin. Monotonic and never
    /// wraps: a `u64` of milliseconds outlasts any deployment.
    fn now_ms(&self) -> u64;

    /// Yield for roughly `ms` milliseconds.
    fn delay_ms(&mut self, ms: u64);
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Clock that only moves when told to. Clones share the same time value,
/// so a test can hold one handle while the agent owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: Rc::new(Cell::new(start_ms)) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

/// Point in time after which a bounded wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    pub fn after<C: Clock + ?Sized>(clock: &C, timeout_ms: u64) -> Self {
        Self { at_ms: clock.now_ms().saturating_add(timeout_ms) }
    }

    pub fn has_passed<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_ms() >= self.at_ms
    }

    pub fn at_ms(&self) -> u64 {
        self.at_ms
    }
}

/// Outcome of a bounded wait that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The deadline passed while the operation kept reporting `WouldBlock`.
    TimedOut,
    /// The operation itself failed.
    Failed(E),
}

/// Poll `op` until it completes, fails, or `timeout_ms` elapses.
///
/// `op` is always polled at least once, even with a zero timeout.
pub fn poll_until<C, T, E, F>(clock: &mut C, timeout_ms: u64, mut op: F) -> Result<T, WaitError<E>>
where
    C: Clock + ?Sized,
    F: FnMut() -> nb::Result<T, E>,
{
    let deadline = Deadline::after(clock, timeout_ms);
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(nb::Error::Other(e)) => return Err(WaitError::Failed(e)),
            Err(nb::Error::WouldBlock) => {
                if deadline.has_passed(clock) {
                    return Err(WaitError::TimedOut);
                }
                clock.delay_ms(POLL_STEP_MS);
            }
        }
    }
}
