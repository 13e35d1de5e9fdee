//! Error handling stuff
use displaydoc::Display;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for everything in [`crate`]
#[derive(Debug, Display, Error)]
pub enum Error {
    /// IO Failed: {0}
    Io(#[from] io::Error),

    /// Not found: {0}
    NotFound(String),

    /// Invalid path `{0}`: {1}
    InvalidPath(String, String),

    /// Invalid value: {0}
    Invalid(String),

    /// Bus transaction failed: {0}
    Bus(String),

    /// CRC mismatch on data read from the bus
    Crc,

    /// 1-Wire protocol violation: {0}
    Protocol(String),

    /// Adapter {0} is unavailable until it reconnects
    AdapterUnavailable(usize),

    /// Attribute is read only
    ReadOnly,

    /// Attribute is write only
    WriteOnly,

    /// Operation was cancelled
    Cancelled,
}

impl Error {
    /// Errno equivalent, for the filesystem and network bindings.
    ///
    /// Missing things are `ENOENT`, bus trouble is `EIO` and safe to retry,
    /// bad input is `EINVAL`, access mode mismatches are `EACCES`.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => errno::ENOENT,
            Error::InvalidPath(..) | Error::Invalid(_) => errno::EINVAL,
            Error::ReadOnly | Error::WriteOnly => errno::EACCES,
            Error::Cancelled => errno::EINTR,
            Error::Io(e) => e.raw_os_error().unwrap_or(errno::EIO),
            Error::Bus(_)
            | Error::Crc
            | Error::Protocol(_)
            | Error::AdapterUnavailable(_) => errno::EIO,
        }
    }

    /// Whether this is transient bus trouble, which counts against the
    /// adapter's health.
    pub fn is_bus_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Bus(_) | Error::Crc | Error::Protocol(_)
        )
    }
}

/// Why the cache couldn't answer.
///
/// These are never user visible, a cache failure just falls through to the
/// bus.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Not in the cache
    NotFound,

    /// In the cache but stale
    Expired,

    /// Cached value is larger than the supplied buffer
    Oversize,

    /// This volatility class is never cached
    Uncacheable,
}

/// Linux errno values. Only what [`Error::errno`] needs.
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const EACCES: i32 = 13;
    pub const EINVAL: i32 = 22;
}

/// Error text.
pub(crate) mod text {
    pub const NO_DEVICE: &str = "no such device";

    pub const NO_BUS: &str = "no such bus";

    pub const NO_ATTRIBUTE: &str = "no such attribute";

    pub const BAD_SEGMENT: &str = "unrecognized path segment";

    pub const BAD_EXTENSION: &str = "invalid attribute extension";

    pub const BAD_ADDRESS: &str = "invalid device address";

    pub const NOT_PRESENT: &str = "device not present on any bus";

    pub const NOT_A_BRANCH: &str = "device has no branches";

    pub const SHORTED: &str = "bus is shorted";

    pub const VANISHED: &str = "all devices stopped responding mid search";

    pub const NO_FAMILY: &str = "search produced a zero family code";

    pub const IS_DIRECTORY: &str = "is a directory";

    pub const NOT_A_DIRECTORY: &str = "not a directory";

    pub const BAD_VALUE: &str = "value doesn't fit the attribute";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_classes() {
        assert_eq!(Error::NotFound("x".into()).errno(), errno::ENOENT);
        assert_eq!(Error::Crc.errno(), errno::EIO);
        assert_eq!(Error::AdapterUnavailable(1).errno(), errno::EIO);
        assert_eq!(Error::ReadOnly.errno(), errno::EACCES);
        assert!(Error::Bus("reset".into()).is_bus_fault());
        assert!(!Error::NotFound("x".into()).is_bus_fault());
        assert!(!Error::AdapterUnavailable(0).is_bus_fault());
    }

    #[test]
    fn display_comes_from_docs() {
        assert_eq!(
            Error::InvalidPath("/x".into(), text::BAD_SEGMENT.into()).to_string(),
            "Invalid path `/x`: unrecognized path segment"
        );
        assert_eq!(CacheError::Expired.to_string(), "In the cache but stale");
    }
}
