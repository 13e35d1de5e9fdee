//! Per device locking
//!
//! Operations on one device are serialized, operations on different devices
//! run in parallel. A counting semaphore bounds how many distinct devices may
//! be mid-operation at once, system wide.
use crate::types::SerialNumber;
use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

type Key = (usize, SerialNumber);

/// Bounded pool of device lock slots
#[derive(Debug)]
pub struct DeviceLocks {
    slots: Mutex<HashMap<Key, Slot>>,
    permits: Semaphore,
}

#[derive(Debug)]
struct Slot {
    /// Holder plus waiters
    users: usize,
    lock: Arc<SlotLock>,
}

/// A mutex that can be held across calls
#[derive(Debug, Default)]
struct SlotLock {
    held: Mutex<bool>,
    freed: Condvar,
}

impl SlotLock {
    fn lock(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self.freed.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
    }

    fn unlock(&self) {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.freed.notify_one();
    }
}

#[derive(Debug)]
struct Semaphore {
    available: Mutex<usize>,
    freed: Condvar,
}

impl Semaphore {
    fn new(n: usize) -> Self {
        Self {
            available: Mutex::new(n),
            freed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut n = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *n == 0 {
            n = self.freed.wait(n).unwrap_or_else(PoisonError::into_inner);
        }
        *n -= 1;
    }

    fn release(&self) {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.freed.notify_one();
    }
}

// Public
impl DeviceLocks {
    /// Pool allowing `slots` devices at once. At least one.
    pub fn new(slots: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            permits: Semaphore::new(slots.max(1)),
        }
    }

    /// Lock `sn` on adapter `bus`, blocking until it's ours.
    ///
    /// # Note
    ///
    /// If the device already has a slot this only waits on that slot, never
    /// on the pool.
    pub fn acquire(&self, bus: usize, sn: SerialNumber) -> SlotGuard<'_> {
        let key = (bus, sn);
        let lock = match self.join(&key) {
            Some(lock) => lock,
            None => {
                self.permits.acquire();
                let mut slots = self.slots();
                match slots.get_mut(&key) {
                    // Someone claimed it while we waited for a permit
                    Some(slot) => {
                        slot.users += 1;
                        let lock = slot.lock.clone();
                        drop(slots);
                        self.permits.release();
                        lock
                    }
                    None => {
                        let lock = Arc::new(SlotLock::default());
                        slots.insert(
                            key,
                            Slot {
                                users: 1,
                                lock: lock.clone(),
                            },
                        );
                        lock
                    }
                }
            }
        };
        lock.lock();
        SlotGuard { pool: self, key, lock }
    }

    /// Number of claimed slots
    pub fn in_use(&self) -> usize {
        self.slots().len()
    }
}

// Private
impl DeviceLocks {
    fn slots(&self) -> MutexGuard<'_, HashMap<Key, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, key: &Key) -> Option<Arc<SlotLock>> {
        let mut slots = self.slots();
        let slot = slots.get_mut(key)?;
        slot.users += 1;
        Some(slot.lock.clone())
    }

    fn release(&self, key: &Key, lock: &SlotLock) {
        lock.unlock();
        let mut slots = self.slots();
        let last = match slots.get_mut(key) {
            Some(slot) => {
                slot.users -= 1;
                slot.users == 0
            }
            None => false,
        };
        if last {
            slots.remove(key);
            drop(slots);
            self.permits.release();
        }
    }
}

/// A held device lock, released on drop
#[derive(Debug)]
pub struct SlotGuard<'a> {
    pool: &'a DeviceLocks,
    key: Key,
    lock: Arc<SlotLock>,
}

impl SlotGuard<'_> {
    /// Release now rather than at end of scope
    pub fn release(self) {}
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pool.release(&self.key, &self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::mpsc,
        thread,
        time::Duration,
    };

    fn sn(n: u8) -> SerialNumber {
        SerialNumber::new(0x10, [n, 0, 0, 0, 0, 0])
    }

    const WAIT: Duration = Duration::from_millis(100);

    #[test]
    fn same_device_waits() {
        let pool = DeviceLocks::new(10);
        let locks = &pool;
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let guard = locks.acquire(0, sn(1));
            s.spawn(move || {
                let _g = locks.acquire(0, sn(1));
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(WAIT).is_err());
            assert_eq!(locks.in_use(), 1);
            guard.release();
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
        assert_eq!(locks.in_use(), 0);
    }

    #[test]
    fn different_devices_dont() {
        let pool = DeviceLocks::new(10);
        let locks = &pool;
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let _guard = locks.acquire(0, sn(1));
            s.spawn(move || {
                let _a = locks.acquire(0, sn(2));
                // Same address on another adapter is another device
                let _b = locks.acquire(1, sn(1));
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
    }

    #[test]
    fn pool_is_bounded() {
        let pool = DeviceLocks::new(2);
        let locks = &pool;
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let a = locks.acquire(0, sn(1));
            let _b = locks.acquire(0, sn(2));
            s.spawn(move || {
                let _c = locks.acquire(0, sn(3));
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(WAIT).is_err());
            drop(a);
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
    }

    #[test]
    fn full_pool_still_joins_held_slot() {
        let pool = DeviceLocks::new(1);
        let locks = &pool;
        let (tx, rx) = mpsc::channel();
        thread::scope(|s| {
            let a = locks.acquire(0, sn(1));
            s.spawn(move || {
                let _a = locks.acquire(0, sn(1));
                tx.send(()).unwrap();
            });
            assert!(rx.recv_timeout(WAIT).is_err());
            a.release();
            assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        });
        assert_eq!(locks.in_use(), 0);
    }
}
