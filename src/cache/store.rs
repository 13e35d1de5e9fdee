//! Generational attribute store
//!
//! Two generations, current and previous, each an ordered map. Once the
//! current generation has lived for its lifespan the next put retires it to
//! previous, throwing away the old previous wholesale. Previous is still
//! searched for a while after that, as long as the entry's own timeout hasn't
//! run out since the flip.
//!
//! Persistent entries live in their own map under their own lock, and never
//! expire.
use super::Clock;
use crate::{
    config::Timeouts,
    error::{CacheError, Error, Result},
    stats::{Counter, Stats},
    types::{AttributeDescriptor, DeviceDescriptor, Extension, SerialNumber, Volatility},
};
use std::{
    collections::BTreeMap,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::{Duration, Instant},
};

/// What a cached value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrId {
    /// A device attribute, by device and attribute name
    Property {
        device: &'static str,
        name: &'static str,
    },

    /// Internal bookkeeping that isn't an attribute
    Internal(&'static str),

    /// Directory listing on the given adapter
    Directory(usize),

    /// Which adapter a device was last seen on
    Device,
}

/// Full cache key, compared byte for byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub sn: [u8; 8],
    pub attr: AttrId,
    pub extension: Extension,
}

impl CacheKey {
    /// Key for one attribute value of one device
    pub fn property(
        sn: SerialNumber,
        device: &DeviceDescriptor,
        attribute: &AttributeDescriptor,
        extension: Extension,
    ) -> Self {
        Self {
            sn: sn.to_bytes(),
            attr: AttrId::Property {
                device: device.name,
                name: attribute.name,
            },
            extension,
        }
    }

    /// Key for internal data about a device
    pub fn internal(sn: SerialNumber, name: &'static str) -> Self {
        Self {
            sn: sn.to_bytes(),
            attr: AttrId::Internal(name),
            extension: Extension::None,
        }
    }
}

/// Result of a [`Cache::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    /// New entry
    Added,

    /// Replaced an existing entry
    Updated,

    /// Not cached, because the class isn't cacheable, caching is off, or
    /// there was no memory for it.
    NotCached,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,

    /// [`None`] once deleted
    expires: Option<Instant>,
}

#[derive(Debug)]
struct Generations {
    current: BTreeMap<CacheKey, Entry>,
    previous: BTreeMap<CacheKey, Entry>,

    /// When previous was retired
    retired: Instant,

    /// When current is due to be retired
    killed: Instant,
}

/// The attribute cache
#[derive(Debug)]
pub struct Cache {
    gens: Mutex<Generations>,
    persistent: Mutex<BTreeMap<CacheKey, Vec<u8>>>,
    timeouts: RwLock<Timeouts>,
    enabled: bool,
    clock: Arc<dyn Clock>,
    stats: Arc<Stats>,
}

// Public
impl Cache {
    pub fn new(timeouts: Timeouts, enabled: bool, clock: Arc<dyn Clock>, stats: Arc<Stats>) -> Self {
        let now = clock.now();
        Self {
            gens: Mutex::new(Generations {
                current: BTreeMap::new(),
                previous: BTreeMap::new(),
                retired: now,
                killed: now + timeouts.generation(),
            }),
            persistent: Mutex::new(BTreeMap::new()),
            timeouts: RwLock::new(timeouts),
            enabled,
            clock,
            stats,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timeouts(&self) -> Timeouts {
        *self.timeouts.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the timeout of `class`.
    ///
    /// Takes effect for new entries, and for the previous generation grace
    /// window. A new stable timeout also changes the lifespan of the next
    /// generation.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`] if `class` has a fixed timeout
    pub fn set_timeout(&self, class: Volatility, timeout: Duration) -> Result<()> {
        let mut t = self.timeouts.write().unwrap_or_else(PoisonError::into_inner);
        let slot = t
            .slot(class)
            .ok_or_else(|| Error::Invalid(format!("{:?} timeout is fixed", class)))?;
        *slot = timeout;
        Ok(())
    }

    /// Store `value` under `key`.
    ///
    /// Never fails, anything that can't be cached just isn't.
    pub fn put(&self, key: CacheKey, class: Volatility, value: &[u8]) -> Stored {
        let timeout = self.timeouts().of(class);
        if !self.enabled || timeout.is_zero() {
            return Stored::NotCached;
        }
        let mut blob = Vec::new();
        if blob.try_reserve_exact(value.len()).is_err() {
            return Stored::NotCached;
        }
        blob.extend_from_slice(value);
        //
        let stored = if class == Volatility::Persistent {
            match self.persistent().insert(key, blob) {
                Some(_) => Stored::Updated,
                None => Stored::Added,
            }
        } else {
            let now = self.clock.now();
            let mut gens = self.gens();
            let dropped = self.flip_if_due(&mut gens, now);
            gens.previous.remove(&key);
            let old = gens.current.insert(
                key,
                Entry {
                    value: blob,
                    expires: Some(now + timeout),
                },
            );
            drop(gens);
            drop(dropped);
            match old {
                Some(_) => Stored::Updated,
                None => Stored::Added,
            }
        };
        self.stats.inc(Counter::CacheAdditions);
        stored
    }

    /// Cached value of `key`, however large.
    pub fn get(&self, key: &CacheKey, class: Volatility) -> Result<Vec<u8>, CacheError> {
        self.get_bounded(key, class, usize::MAX)
    }

    /// Cached value of `key`, if it's at most `capacity` bytes.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Uncacheable`] if `class` is never cached
    /// - [`CacheError::NotFound`] if there's no such entry
    /// - [`CacheError::Expired`] if there is, but it's stale
    /// - [`CacheError::Oversize`] if the value is larger than `capacity`
    pub fn get_bounded(
        &self,
        key: &CacheKey,
        class: Volatility,
        capacity: usize,
    ) -> Result<Vec<u8>, CacheError> {
        let timeout = self.timeouts().of(class);
        if !self.enabled || timeout.is_zero() {
            return Err(CacheError::Uncacheable);
        }
        self.stats.inc(Counter::CacheTries);
        let found = if class == Volatility::Persistent {
            self.persistent()
                .get(key)
                .map(|v| fit(v, capacity))
                .ok_or(CacheError::NotFound)
        } else {
            let now = self.clock.now();
            let gens = self.gens();
            let entry = match gens.current.get(key) {
                Some(e) => Some(e),
                None if gens.retired + timeout > now => gens.previous.get(key),
                None => None,
            };
            match entry {
                Some(Entry {
                    value,
                    expires: Some(t),
                }) if *t >= now => Ok(fit(value, capacity)),
                Some(_) => Err(CacheError::Expired),
                None => Err(CacheError::NotFound),
            }
        };
        match found {
            Ok(Ok(v)) => {
                self.stats.inc(Counter::CacheHits);
                Ok(v)
            }
            Ok(Err(e)) => Err(e),
            Err(CacheError::Expired) => {
                self.stats.inc(Counter::CacheExpirations);
                Err(CacheError::Expired)
            }
            Err(e) => {
                self.stats.inc(Counter::CacheMisses);
                Err(e)
            }
        }
    }

    /// Forget `key`. Safe to call on missing keys.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if there was nothing to forget
    pub fn delete(&self, key: &CacheKey, class: Volatility) -> Result<(), CacheError> {
        if class == Volatility::Persistent {
            self.persistent().remove(key).ok_or(CacheError::NotFound)?;
        } else {
            let timeout = self.timeouts().of(class);
            let now = self.clock.now();
            let mut gens = self.gens();
            // Whatever get can still see
            let searchable = gens.retired + timeout > now;
            let Generations {
                current, previous, ..
            } = &mut *gens;
            let entry = match current.get_mut(key) {
                Some(e) => e,
                None if searchable => previous.get_mut(key).ok_or(CacheError::NotFound)?,
                None => return Err(CacheError::NotFound),
            };
            entry.expires = None;
            entry.value = Vec::new();
        }
        self.stats.inc(Counter::CacheDeletions);
        Ok(())
    }

    /// Drop both generations. The persistent store is kept.
    pub fn clear(&self) {
        let now = self.clock.now();
        let generation = self.timeouts().generation();
        let mut gens = self.gens();
        let current = mem::take(&mut gens.current);
        let previous = mem::take(&mut gens.previous);
        gens.retired = now;
        gens.killed = now + generation;
        drop(gens);
        log::debug!("Cleared {} cached values", current.len() + previous.len());
    }

    /// Number of entries in all stores, dead ones included
    pub fn len(&self) -> usize {
        let gens = self.gens();
        let n = gens.current.len() + gens.previous.len();
        drop(gens);
        n + self.persistent().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Private
impl Cache {
    fn gens(&self) -> MutexGuard<'_, Generations> {
        self.gens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persistent(&self) -> MutexGuard<'_, BTreeMap<CacheKey, Vec<u8>>> {
        self.persistent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retire the current generation if it's lived long enough.
    ///
    /// Returns the old previous generation, so it can be dropped after the
    /// lock is released.
    fn flip_if_due(&self, gens: &mut Generations, now: Instant) -> Option<BTreeMap<CacheKey, Entry>> {
        if gens.killed >= now {
            return None;
        }
        let current = mem::take(&mut gens.current);
        let dropped = mem::replace(&mut gens.previous, current);
        gens.retired = now;
        gens.killed = now + self.timeouts().generation();
        self.stats.inc(Counter::CacheFlips);
        log::debug!(
            "Cache generation flipped, {} retired, {} dropped",
            gens.previous.len(),
            dropped.len()
        );
        Some(dropped)
    }
}

fn fit(value: &[u8], capacity: usize) -> Result<Vec<u8>, CacheError> {
    if value.len() > capacity {
        return Err(CacheError::Oversize);
    }
    Ok(value.to_vec())
}
