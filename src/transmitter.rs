//! Bounded-time publication of frames on the shared CAN bus.
//!
//! A frame that cannot be queued within the send timeout is dropped. There
//! is no retry queue: the next cycle publishes fresh data instead.

use crate::protocol::{CanFrame, FrameError, MessageKind};
use crate::time::{poll_until, Clock, WaitError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bus status code reported by a CAN controller driver.
pub type BusStatus = u32;

/// Controller driver for one CAN channel.
pub trait CanBus {
    /// Install and start the controller. Called once at boot.
    fn start(&mut self) -> Result<(), BusStatus>;

    /// Queue one frame for transmission without blocking; `WouldBlock`
    /// when the transmit queue is full.
    fn try_transmit(&mut self, frame: &CanFrame) -> nb::Result<(), BusStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("bus not running")]
    BusOffline,
    #[error("transmit queue still full after {0} ms")]
    Timeout(u64),
    #[error("driver error (status {0:#x})")]
    Driver(BusStatus),
    #[error(transparent)]
    InvalidFrame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransmitStats {
    pub frames_sent: u32,
    pub timeouts: u32,
    pub driver_errors: u32,
    pub dropped_offline: u32,
}

impl TransmitStats {
    pub fn frames_dropped(&self) -> u32 {
        self.timeouts + self.driver_errors + self.dropped_offline
    }
}

#[derive(Debug)]
pub struct BusTransmitter<B> {
    bus: B,
    running: bool,
    send_timeout_ms: u64,
    stats: TransmitStats,
}

impl<B: CanBus> BusTransmitter<B> {
    /// Start the bus. A bus that fails to start leaves the transmitter in
    /// degraded mode: every later send fails with `BusOffline`.
    pub fn start(mut bus: B, send_timeout_ms: u64) -> Result<Self, (Self, BusStatus)> {
        match bus.start() {
            Ok(()) => {
                info!("CAN bus started");
                Ok(Self { bus, running: true, send_timeout_ms, stats: TransmitStats::default() })
            }
            Err(status) => {
                error!("CAN bus failed to start (status {:#x}), continuing without transmission", status);
                Err((
                    Self { bus, running: false, send_timeout_ms, stats: TransmitStats::default() },
                    status,
                ))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stats(&self) -> &TransmitStats {
        &self.stats
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Build a standard frame for `kind` and try to queue it, waiting at
    /// most the send timeout.
    pub fn transmit<C>(&mut self, clock: &mut C, kind: MessageKind, payload: &[u8]) -> Result<(), TransmitError>
    where
        C: Clock + ?Sized,
    {
        if !self.running {
            self.stats.dropped_offline = self.stats.dropped_offline.saturating_add(1);
            return Err(TransmitError::BusOffline);
        }

        let frame = CanFrame::new(kind.id(), payload)?;

        let bus = &mut self.bus;
        match poll_until(clock, self.send_timeout_ms, || bus.try_transmit(&frame)) {
            Ok(()) => {
                self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);
                debug!("sent {} frame {}", kind, frame.to_text());
                Ok(())
            }
            Err(WaitError::TimedOut) => {
                self.stats.timeouts = self.stats.timeouts.saturating_add(1);
                warn!("{} frame dropped: bus busy for {} ms", kind, self.send_timeout_ms);
                Err(TransmitError::Timeout(self.send_timeout_ms))
            }
            Err(WaitError::Failed(status)) => {
                self.stats.driver_errors = self.stats.driver_errors.saturating_add(1);
                warn!("{} frame dropped: driver status {:#x}", kind, status);
                Err(TransmitError::Driver(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    #[derive(Default)]
    struct TestBus {
        start_status: Option<BusStatus>,
        busy_polls: u32,
        fail_with: Option<BusStatus>,
        sent: Vec<CanFrame>,
    }

    impl CanBus for TestBus {
        fn start(&mut self) -> Result<(), BusStatus> {
            self.start_status.map_or(Ok(()), Err)
        }

        fn try_transmit(&mut self, frame: &CanFrame) -> nb::Result<(), BusStatus> {
            if let Some(status) = self.fail_with {
                return Err(nb::Error::Other(status));
            }
            if self.busy_polls > 0 {
                self.busy_polls -= 1;
                return Err(nb::Error::WouldBlock);
            }
            self.sent.push(frame.clone());
            Ok(())
        }
    }

    fn started(bus: TestBus) -> BusTransmitter<TestBus> {
        BusTransmitter::start(bus, 100).map_err(|(_, status)| status).unwrap()
    }

    #[test]
    fn test_frame_queued() {
        let mut clock = ManualClock::new(0);
        let mut tx = started(TestBus::default());

        tx.transmit(&mut clock, MessageKind::Aqi, &[0x00, 0x32, 0x00, 0x14]).unwrap();
        let sent = &tx.bus().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id().as_raw(), 0x101);
        assert_eq!(sent[0].dlc(), 4);
        assert_eq!(tx.stats().frames_sent, 1);
    }

    #[test]
    fn test_waits_for_queue_space_within_timeout() {
        let mut clock = ManualClock::new(0);
        let mut tx = started(TestBus { busy_polls: 30, ..Default::default() });

        assert!(tx.transmit(&mut clock, MessageKind::Concentration, &[0; 6]).is_ok());
        assert_eq!(clock.now_ms(), 30);
    }

    #[test]
    fn test_timeout_drops_frame() {
        let mut clock = ManualClock::new(0);
        let mut tx = started(TestBus { busy_polls: u32::MAX, ..Default::default() });

        let result = tx.transmit(&mut clock, MessageKind::Concentration, &[0; 6]);
        assert_eq!(result, Err(TransmitError::Timeout(100)));
        assert_eq!(clock.now_ms(), 100);
        assert!(tx.bus().sent.is_empty());
        assert_eq!(tx.stats().timeouts, 1);
    }

    #[test]
    fn test_driver_error_not_retried() {
        let mut clock = ManualClock::new(0);
        let mut tx = started(TestBus { fail_with: Some(0x42), ..Default::default() });

        assert_eq!(
            tx.transmit(&mut clock, MessageKind::Aqi, &[0; 4]),
            Err(TransmitError::Driver(0x42))
        );
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(tx.stats().frames_dropped(), 1);
    }

    #[test]
    fn test_failed_start_is_degraded() {
        let mut clock = ManualClock::new(0);
        let (mut tx, status) = match BusTransmitter::start(TestBus { start_status: Some(3), ..Default::default() }, 100) {
            Ok(_) => panic!("bus should not start"),
            Err(degraded) => degraded,
        };
        assert_eq!(status, 3);
        assert!(!tx.is_running());
        assert_eq!(tx.transmit(&mut clock, MessageKind::Aqi, &[0; 4]), Err(TransmitError::BusOffline));
        assert_eq!(tx.stats().dropped_offline, 1);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut clock = ManualClock::new(0);
        let mut tx = started(TestBus::default());
        assert_eq!(
            tx.transmit(&mut clock, MessageKind::Gas, &[0; 9]),
            Err(TransmitError::InvalidFrame(FrameError::PayloadTooLong(9)))
        );
        assert!(tx.bus().sent.is_empty());
    }
}
