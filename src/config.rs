//! Runtime configuration
//!
//! Parsing options is up to whoever embeds the core, this is just the plain
//! values they end up as.
use crate::{types::Volatility, util::*};
use std::time::Duration;

/// Cache timeout per volatility class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub volatile: Duration,
    pub stable: Duration,
    pub directory: Duration,
    pub presence: Duration,
}

impl Timeouts {
    /// Timeout for `class`. Zero means never cached.
    ///
    /// # Note
    ///
    /// [`Volatility::Persistent`] entries never expire, the one second here is
    /// only used for the previous generation grace window, which they don't
    /// take part in.
    pub fn of(&self, class: Volatility) -> Duration {
        match class {
            Volatility::Volatile => self.volatile,
            Volatility::Stable => self.stable,
            Volatility::Directory => self.directory,
            Volatility::Presence => self.presence,
            Volatility::Second | Volatility::Persistent => Duration::from_secs(1),
            Volatility::Static | Volatility::Statistic => Duration::ZERO,
        }
    }

    /// Change the timeout for `class`.
    ///
    /// Returns [`None`] for classes with a fixed timeout.
    pub(crate) fn slot(&mut self, class: Volatility) -> Option<&mut Duration> {
        match class {
            Volatility::Volatile => Some(&mut self.volatile),
            Volatility::Stable => Some(&mut self.stable),
            Volatility::Directory => Some(&mut self.directory),
            Volatility::Presence => Some(&mut self.presence),
            _ => None,
        }
    }

    /// How long one cache generation lives
    pub fn generation(&self) -> Duration {
        self.stable.min(MAX_GENERATION)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            volatile: VOLATILE_TIMEOUT,
            stable: STABLE_TIMEOUT,
            directory: DIRECTORY_TIMEOUT,
            presence: PRESENCE_TIMEOUT,
        }
    }
}

/// Everything tunable about a [`OneWire`][crate::system::OneWire]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub timeouts: Timeouts,

    /// Whether anything is cached at all
    pub cache_enabled: bool,

    /// Devices that may be mid-operation at once
    pub lock_slots: usize,

    /// Consecutive failures before an adapter is reopened
    pub reconnect_threshold: u32,

    /// Wait after a failed reopen
    pub reconnect_cooldown: Duration,

    /// Whether `alarm` is listed in bus directories
    pub show_alarm: bool,
}

impl Config {
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_lock_slots(mut self, slots: usize) -> Self {
        self.lock_slots = slots;
        self
    }

    pub fn with_reconnect(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.reconnect_threshold = threshold;
        self.reconnect_cooldown = cooldown;
        self
    }

    pub fn with_alarm_dir(mut self, show: bool) -> Self {
        self.show_alarm = show;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            cache_enabled: true,
            lock_slots: DEVICE_LOCK_SLOTS,
            reconnect_threshold: RECONNECT_THRESHOLD,
            reconnect_cooldown: RECONNECT_COOLDOWN,
            show_alarm: true,
        }
    }
}
