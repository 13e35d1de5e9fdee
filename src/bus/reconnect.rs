//! Adapter health
//!
//! Consecutive failures are counted per adapter. Once they reach the
//! threshold the adapter must be reopened before it's used again, see
//! [`Connection::test_connection`][super::Connection::test_connection].
use std::{
    sync::{
        atomic::{AtomicU32, AtomicU8, Ordering},
        Mutex,
        PoisonError,
    },
    time::{Duration, Instant},
};

/// Adapter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthState {
    Ok = 0,

    /// Some failures, but below the threshold
    Degraded = 1,

    /// Must be closed and reopened before use
    MustReconnect = 2,
}

impl HealthState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => HealthState::Ok,
            1 => HealthState::Degraded,
            _ => HealthState::MustReconnect,
        }
    }
}

/// Failure counter and reconnect state of one adapter
#[derive(Debug)]
pub struct Health {
    failures: AtomicU32,
    state: AtomicU8,

    /// No reopen attempts before this
    retry_at: Mutex<Option<Instant>>,

    threshold: u32,
    cooldown: Duration,
}

// Public
impl Health {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            state: AtomicU8::new(HealthState::Ok as u8),
            retry_at: Mutex::new(None),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Count one failed bus transaction
    pub fn record_failure(&self) {
        let n = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let state = if n >= self.threshold {
            HealthState::MustReconnect
        } else {
            HealthState::Degraded
        };
        // Never downgrade from MustReconnect here
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    /// A transaction worked
    pub fn record_success(&self) {
        if self.failures.swap(0, Ordering::AcqRel) != 0 || self.state() != HealthState::Ok {
            self.state.store(HealthState::Ok as u8, Ordering::Release);
        }
    }

    /// Whether a reopen may be attempted at `now`
    pub fn may_retry(&self, now: Instant) -> bool {
        match *self.retry_at() {
            Some(t) => now >= t,
            None => true,
        }
    }
}

// Crate
impl Health {
    pub(crate) fn reopened(&self) {
        *self.retry_at() = None;
        self.failures.store(0, Ordering::Release);
        self.state.store(HealthState::Ok as u8, Ordering::Release);
    }

    pub(crate) fn reopen_failed(&self, now: Instant) {
        *self.retry_at() = Some(now + self.cooldown);
        self.state.store(HealthState::MustReconnect as u8, Ordering::Release);
    }

    fn retry_at(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.retry_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
