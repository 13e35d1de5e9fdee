//! Commands every device on a bus acts on at once
//!
//! Starting a temperature conversion takes most of a second per sensor.
//! Sent with Skip ROM, all of them convert together, and their drivers only
//! have to read the results.
use crate::{
    bus::select::{self, SKIP_ROM},
    error::Result,
    system::Query,
    types::{AttributeDescriptor, DeviceDescriptor, DeviceFlags, DeviceKind, Format, Volatility},
};

const CONVERT_T: u8 = 0x44;

/// `simultaneous`, listed next to any temperature or voltage sensor
pub static SIMULTANEOUS: DeviceDescriptor = DeviceDescriptor {
    code: 0,
    name: "simultaneous",
    kind: DeviceKind::Bus,
    flags: DeviceFlags::empty(),
    attributes: &[
        AttributeDescriptor::new("present", 1, Format::YesNo, Volatility::Volatile).read(read_present),
        AttributeDescriptor::new("temperature", 1, Format::YesNo, Volatility::Volatile)
            .write(write_temperature),
    ],
};

/// Whether anything answers a reset
fn read_present(q: &mut Query<'_>) -> Result<Vec<u8>> {
    let branches = q.branches();
    let present = select::select(q.bus()?, branches, None)?;
    Ok(vec![u8::from(present)])
}

/// Start a conversion on every thermometer. Writing `0` does nothing.
fn write_temperature(q: &mut Query<'_>, value: &[u8]) -> Result<()> {
    if value.first().map_or(true, |&v| v == 0) {
        return Ok(());
    }
    let branches = q.branches();
    let bus = q.bus()?;
    if select::select(bus, branches, None)? {
        bus.send_bytes(&[SKIP_ROM, CONVERT_T])?;
        log::debug!("Started a simultaneous conversion on {}", bus.name());
    }
    Ok(())
}
