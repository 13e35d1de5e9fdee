//! One attached adapter
use super::{Health, HealthState, Transport};
use crate::{
    error::{Error, Result},
    stats::{Counter, Stats},
};
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Instant,
};

/// Whether anything answered the last reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AnyDevices {
    Unknown = 0,
    Yes = 1,
    No = 2,
}

/// An adapter and everything we know about it.
///
/// The transport is behind the bus lock, held for one whole transaction at a
/// time.
#[derive(Debug)]
pub struct Connection {
    index: usize,
    name: String,
    bus: Mutex<Box<dyn Transport>>,
    health: Health,
    any_devices: AtomicU8,
    stats: Arc<Stats>,
}

// Public
impl Connection {
    pub fn new(index: usize, transport: Box<dyn Transport>, health: Health, stats: Arc<Stats>) -> Self {
        Self {
            index,
            name: transport.name().to_owned(),
            bus: Mutex::new(transport),
            health,
            any_devices: AtomicU8::new(AnyDevices::Unknown as u8),
            stats,
        }
    }

    /// Position in the adapter list, the `N` of `bus.N`
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn any_devices(&self) -> AnyDevices {
        match self.any_devices.load(Ordering::Acquire) {
            1 => AnyDevices::Yes,
            2 => AnyDevices::No,
            _ => AnyDevices::Unknown,
        }
    }

    /// Take the bus lock.
    ///
    /// A thread that panicked mid transaction leaves the bus in an unknown
    /// state, which the next reset takes care of, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.stats.inc(Counter::BusLocks);
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reopen the adapter if it's failed too often.
    ///
    /// Returns whether it was reopened, in which case anything cached about
    /// its devices is suspect.
    ///
    /// # Errors
    ///
    /// - [`Error::AdapterUnavailable`] if it needed reopening and that failed,
    ///   or a previous attempt failed recently.
    ///
    /// # Note
    ///
    /// Takes the bus lock, so must not be called with it held.
    pub fn test_connection(&self) -> Result<bool> {
        if self.health.state() != HealthState::MustReconnect {
            return Ok(false);
        }
        if !self.health.may_retry(Instant::now()) {
            return Err(Error::AdapterUnavailable(self.index));
        }
        let mut bus = self.lock();
        // Someone else may have got here first
        if self.health.state() != HealthState::MustReconnect {
            return Ok(false);
        }
        if !self.health.may_retry(Instant::now()) {
            return Err(Error::AdapterUnavailable(self.index));
        }
        bus.close();
        self.set_any_devices(AnyDevices::Unknown);
        match bus.reopen() {
            Ok(()) => {
                self.health.reopened();
                self.stats.inc(Counter::Reconnects);
                log::info!("Reconnected adapter {} ({})", self.index, self.name);
                Ok(true)
            }
            Err(e) => {
                self.health.reopen_failed(Instant::now());
                self.stats.inc(Counter::ReconnectErrors);
                log::warn!("Reconnecting adapter {} ({}) failed: {}", self.index, self.name, e);
                Err(Error::AdapterUnavailable(self.index))
            }
        }
    }
}

// Crate
impl Connection {
    pub(crate) fn set_any_devices(&self, any: AnyDevices) {
        self.any_devices.store(any as u8, Ordering::Release);
    }

    /// Count the outcome of one bus transaction against the adapter's health
    pub(crate) fn record<T>(&self, res: &Result<T>) {
        match res {
            Ok(_) => self.health.record_success(),
            Err(e) if e.is_bus_fault() => {
                if let Error::Crc = e {
                    self.stats.inc(Counter::Crc8Errors);
                }
                self.health.record_failure();
            }
            Err(_) => {}
        }
    }
}
