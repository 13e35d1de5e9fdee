//! DS2413 dual channel addressable switch
//!
//! Both channels are read and written together, through one status byte:
//!
//! | Bit | Meaning          |
//! |-----|------------------|
//! | 0   | PIO A pin state  |
//! | 1   | PIO A latch      |
//! | 2   | PIO B pin state  |
//! | 3   | PIO B latch      |
//!
//! The high nibble is the complement of the low one.
use crate::{
    error::{Error, Result},
    system::Query,
    types::{
        AttributeDescriptor,
        DeviceDescriptor,
        DeviceFlags,
        DeviceKind,
        Format,
        Layout,
        Naming,
        Volatility,
    },
};

const PIO_ACCESS_READ: u8 = 0xF5;
const PIO_ACCESS_WRITE: u8 = 0x5A;
const WRITE_CONFIRM: u8 = 0xAA;

/// Dual channel addressable switch
pub static DS2413: DeviceDescriptor = DeviceDescriptor {
    code: 0x3A,
    name: "DS2413",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::from_bits_truncate(
        DeviceFlags::RESUME.bits() | DeviceFlags::OVERDRIVE.bits(),
    ),
    attributes: with_standard![
        AttributeDescriptor::new("PIO", 1, Format::Bitfield, Volatility::Volatile)
            .aggregate(2, Naming::Letters, Layout::Aggregate)
            .read(read_pio)
            .write(write_pio),
        AttributeDescriptor::new("latch", 1, Format::Bitfield, Volatility::Volatile)
            .aggregate(2, Naming::Letters, Layout::Aggregate)
            .read(read_latch)
            .write(write_pio),
        AttributeDescriptor::new("sensed", 1, Format::Bitfield, Volatility::Volatile)
            .aggregate(2, Naming::Letters, Layout::Aggregate)
            .read(read_sensed),
    ],
};

fn sensed(status: u8) -> u32 {
    u32::from((status & 0x01) | ((status >> 1) & 0x02))
}

fn latch(status: u8) -> u32 {
    u32::from(((status >> 1) & 0x01) | ((status >> 2) & 0x02))
}

fn bits(v: u32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

/// # Errors
///
/// - [`Error::Crc`] if the complement nibble doesn't match
fn read_status(q: &mut Query<'_>) -> Result<u8> {
    let resp = q.transaction(&[PIO_ACCESS_READ], 1)?;
    let status = resp[0];
    if status & 0x0F != (!status >> 4) & 0x0F {
        return Err(Error::Crc);
    }
    Ok(status)
}

/// Sensed and latch come with every status byte, keep whichever wasn't
/// asked for.
fn cache_both(q: &Query<'_>, status: u8) {
    q.cache_sibling("sensed", &bits(sensed(status)));
    q.cache_sibling("latch", &bits(latch(status)));
}

/// Inverse of the sensed pin states, so `1` is on
fn read_pio(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let status = read_status(q)?;
    cache_both(q, status);
    Ok(bits(sensed(status) ^ 0x03))
}

fn read_sensed(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let status = read_status(q)?;
    q.cache_sibling("latch", &bits(latch(status)));
    Ok(bits(sensed(status)))
}

fn read_latch(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let status = read_status(q)?;
    q.cache_sibling("sensed", &bits(sensed(status)));
    Ok(bits(latch(status)))
}

/// Switch outputs, `1` is on.
///
/// The top six bits are sent as 1, then the whole byte again inverted.
fn write_pio(q: &mut Query<'_>, value: &[u8]) -> Result<()> {
    let v = value.first().copied().unwrap_or(0);
    let data = ((v & 0x03) ^ 0x03) | 0xFC;
    let resp = q.transaction(&[PIO_ACCESS_WRITE, data, !data], 2)?;
    if resp[0] != WRITE_CONFIRM {
        return Err(Error::Protocol(format!(
            "{} didn't confirm the write, got {:02X}",
            q.sn, resp[0]
        )));
    }
    cache_both(q, resp[1]);
    Ok(())
}
