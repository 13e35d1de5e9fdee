//! Utility functions
use std::time::Duration;

/// How long volatile values, like a switch state, stay cached.
pub const VOLATILE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long stable values, like alarm thresholds, stay cached.
///
/// Also drives the lifespan of a cache generation.
pub const STABLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a bus directory listing stays cached.
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(60);

/// How long we remember which adapter a device was found on.
pub const PRESENCE_TIMEOUT: Duration = Duration::from_secs(120);

/// A cache generation never lives longer than this, whatever
/// [`STABLE_TIMEOUT`] is set to.
pub const MAX_GENERATION: Duration = Duration::from_secs(3600);

/// Number of devices that may be mid-operation at once, system wide.
pub const DEVICE_LOCK_SLOTS: usize = 10;

/// Consecutive bus failures before an adapter is closed and reopened.
pub const RECONNECT_THRESHOLD: u32 = 5;

/// Wait after a failed reopen before trying again.
pub const RECONNECT_COOLDOWN: Duration = Duration::from_millis(200);

/// Dallas/Maxim CRC8, polynomial `x^8 + x^5 + x^4 + 1`.
///
/// Running it over data with its CRC appended gives 0.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in bytes {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}

/// Bit `loc` of `buf`, least significant bit of byte 0 first.
pub fn get_bit(buf: &[u8], loc: usize) -> bool {
    buf[loc / 8] & (1 << (loc % 8)) != 0
}

/// Set bit `loc` of `buf`. Same ordering as [`get_bit`].
pub fn set_bit(buf: &mut [u8], loc: usize, bit: bool) {
    if bit {
        buf[loc / 8] |= 1 << (loc % 8);
    } else {
        buf[loc / 8] &= !(1 << (loc % 8));
    }
}
