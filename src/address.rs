//! Boot-time bring-up of sensors, including devices that may answer at
//! more than one bus address.

use crate::sensors::{Sensor, SensorError};
use crate::time::{poll_until, Clock, WaitError};
use tracing::{error, info, warn};

/// Sensor bound to one bus address that can be rebuilt at another.
pub trait AddressedSensor: Sensor + Sized {
    fn address(&self) -> u8;

    /// Consume this handle and build a fresh one on the same bus, bound to
    /// `address`.
    fn rebind(self, address: u8) -> Self;
}

/// Result of resolving a device. The handle is always handed back so the
/// underlying bus is never lost, even when the device stays offline.
#[derive(Debug)]
pub struct Resolution<S> {
    pub device: S,
    /// Address that answered, `None` when every candidate failed.
    pub address: Option<u8>,
    pub attempts: u8,
}

impl<S> Resolution<S> {
    pub fn is_online(&self) -> bool {
        self.address.is_some()
    }

    /// The device, if it came up.
    pub fn into_online(self) -> Option<S> {
        self.address.map(|_| self.device)
    }
}

/// One bring-up attempt: wait for the device to report ready within
/// `settle_ms`, then configure it.
pub fn bring_up<S, C>(device: &mut S, clock: &mut C, settle_ms: u64) -> Result<(), SensorError>
where
    S: Sensor,
    C: Clock + ?Sized,
{
    match poll_until(clock, settle_ms, || device.poll_ready()) {
        Ok(()) => {}
        Err(WaitError::TimedOut) => return Err(SensorError::Timeout),
        Err(WaitError::Failed(e)) => return Err(e),
    }
    device.init()
}

/// Try each candidate address in order, one attempt each, with a fresh
/// handle per attempt. Stops at the first address that comes up.
pub fn resolve<S, C>(device: S, candidates: &[u8], clock: &mut C, settle_ms: u64) -> Resolution<S>
where
    S: AddressedSensor,
    C: Clock + ?Sized,
{
    let kind = device.kind();
    let mut device = device;
    let mut attempts = 0u8;

    for &address in candidates {
        device = device.rebind(address);
        attempts = attempts.saturating_add(1);

        match bring_up(&mut device, clock, settle_ms) {
            Ok(()) => {
                info!("{} sensor online at {:#04x}", kind, address);
                return Resolution { device, address: Some(address), attempts };
            }
            Err(e) => {
                warn!("{} sensor not responding at {:#04x}: {}", kind, address, e);
            }
        }
    }

    error!("{} sensor offline after {} attempt(s)", kind, attempts);
    Resolution { device, address: None, attempts }
}
