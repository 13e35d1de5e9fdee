//! Pseudo devices of the in-memory areas
//!
//! These are never on a bus. Reads and writes go straight to the
//! [`OneWire`][crate::system::OneWire] they're queried through.
use crate::{
    error::{text::BAD_VALUE, Error, Result},
    stats::Counter,
    system::Query,
    types::{AttributeDescriptor, DeviceDescriptor, DeviceFlags, DeviceKind, Format, Volatility},
};
use std::time::Duration;

/// Timeout classes of `settings/timeout`, by attribute `data`
const TIMEOUT_CLASSES: [Volatility; 4] = [
    Volatility::Volatile,
    Volatility::Stable,
    Volatility::Directory,
    Volatility::Presence,
];

const fn timeout(name: &'static str, class: usize) -> AttributeDescriptor {
    AttributeDescriptor::new(name, 4, Format::Unsigned, Volatility::Static)
        .read(read_timeout)
        .write(write_timeout)
        .data(class)
}

const fn stat(name: &'static str, counter: Counter) -> AttributeDescriptor {
    AttributeDescriptor::new(name, 4, Format::Unsigned, Volatility::Statistic)
        .read(read_stat)
        .data(counter as usize)
}

const fn pseudo(name: &'static str, attributes: &'static [AttributeDescriptor]) -> DeviceDescriptor {
    DeviceDescriptor {
        code: 0,
        name,
        kind: DeviceKind::Pseudo,
        flags: DeviceFlags::empty(),
        attributes,
    }
}

/// `settings/timeout`, cache timeouts in seconds
pub static TIMEOUT: DeviceDescriptor = pseudo(
    "timeout",
    &[
        timeout("volatile", 0),
        timeout("stable", 1),
        timeout("directory", 2),
        timeout("presence", 3),
    ],
);

/// `system/adapter`
pub static ADAPTER: DeviceDescriptor = pseudo(
    "adapter",
    &[
        AttributeDescriptor::new("count", 4, Format::Unsigned, Volatility::Statistic).read(read_adapter_count),
        AttributeDescriptor::new("names", 256, Format::Ascii, Volatility::Statistic).read(read_adapter_names),
    ],
);

pub static CACHE: DeviceDescriptor = pseudo(
    "cache",
    &[
        stat("tries", Counter::CacheTries),
        stat("hits", Counter::CacheHits),
        stat("misses", Counter::CacheMisses),
        stat("expirations", Counter::CacheExpirations),
        stat("additions", Counter::CacheAdditions),
        stat("deletions", Counter::CacheDeletions),
        stat("flips", Counter::CacheFlips),
    ],
);

pub static DIRECTORY: DeviceDescriptor = pseudo(
    "directory",
    &[stat("calls", Counter::DirCalls), stat("entries", Counter::DirEntries)],
);

pub static READ: DeviceDescriptor = pseudo(
    "read",
    &[
        stat("calls", Counter::ReadCalls),
        stat("cachesuccess", Counter::ReadCacheSuccess),
        stat("success", Counter::ReadSuccess),
        stat("bytes", Counter::ReadBytes),
    ],
);

pub static WRITE: DeviceDescriptor = pseudo(
    "write",
    &[
        stat("calls", Counter::WriteCalls),
        stat("success", Counter::WriteSuccess),
        stat("bytes", Counter::WriteBytes),
    ],
);

pub static BUS: DeviceDescriptor = pseudo(
    "bus",
    &[
        stat("locks", Counter::BusLocks),
        stat("reconnects", Counter::Reconnects),
        stat("reconnect_errors", Counter::ReconnectErrors),
        stat("search_errors", Counter::SearchErrors),
        stat("crc8_errors", Counter::Crc8Errors),
    ],
);

fn unsigned(v: u64) -> Vec<u8> {
    u32::try_from(v).unwrap_or(u32::MAX).to_le_bytes().to_vec()
}

fn timeout_class(q: &Query<'_>) -> Result<Volatility> {
    TIMEOUT_CLASSES
        .get(q.attribute.data)
        .copied()
        .ok_or_else(|| Error::Invalid(format!("no timeout class {}", q.attribute.data)))
}

fn read_timeout(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let class = timeout_class(q)?;
    let t = q.system().cache().timeouts().of(class);
    Ok(unsigned(t.as_secs()))
}

fn write_timeout(q: &mut Query<'_>, value: &[u8]) -> Result<()> {
    let class = timeout_class(q)?;
    let secs: [u8; 4] = value
        .try_into()
        .map_err(|_| Error::Invalid(format!("{}: {}", q.attribute.name, BAD_VALUE)))?;
    let t = Duration::from_secs(u32::from_le_bytes(secs).into());
    log::info!("{} timeout set to {:?}", q.attribute.name, t);
    q.system().cache().set_timeout(class, t)
}

fn read_stat(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let counter = Counter::from_index(q.attribute.data)
        .ok_or_else(|| Error::Invalid(format!("no counter {}", q.attribute.data)))?;
    Ok(unsigned(q.system().stats().get(counter)))
}

fn read_adapter_count(q: &mut Query<'_>) -> Result<Vec<u8>> {
    Ok(unsigned(q.system().adapters().len() as u64))
}

fn read_adapter_names(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let names: Vec<String> = q
        .system()
        .adapters()
        .iter()
        .map(|c| c.name().to_owned())
        .collect();
    Ok(names.join(",").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::fake::FakeBus, config::Config, system::OneWire};

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn read(ow: &OneWire, path: &str) -> crate::error::Result<Vec<u8>> {
        ow.read(&ow.parse_path(path)?)
    }

    #[test]
    fn timeouts() -> Result<()> {
        let ow = OneWire::new(Config::default());
        assert_eq!(read(&ow, "/settings/timeout/volatile")?, 15u32.to_le_bytes());
        let pn = ow.parse_path("/settings/timeout/volatile")?;
        ow.write(&pn, &30u32.to_le_bytes())?;
        assert_eq!(read(&ow, "/settings/timeout/volatile")?, 30u32.to_le_bytes());
        assert_eq!(ow.cache().timeouts().volatile, Duration::from_secs(30));
        assert!(ow.write(&pn, b"x").is_err());
        Ok(())
    }

    #[test]
    fn counters() -> Result<()> {
        let ow = OneWire::new(Config::default());
        read(&ow, "/statistics/read/calls")?;
        // The read of the counter counts itself
        assert_eq!(read(&ow, "/statistics/read/calls")?, 2u32.to_le_bytes());
        assert!(ow.write(&ow.parse_path("/statistics/read/calls")?, &[0; 4]).is_err());
        Ok(())
    }

    #[test]
    fn adapters() -> Result<()> {
        let ow = OneWire::new(Config::default());
        ow.add_adapter(Box::new(FakeBus::new("a")));
        ow.add_adapter(Box::new(FakeBus::new("b")));
        assert_eq!(read(&ow, "/system/adapter/count")?, 2u32.to_le_bytes());
        assert_eq!(read(&ow, "/system/adapter/names")?, b"a,b");
        Ok(())
    }
}
