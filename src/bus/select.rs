//! Addressing devices, through any couplers on the way
use super::{Reset, Transport};
use crate::{
    error::{
        text::{NOT_A_BRANCH, SHORTED},
        Error,
        Result,
    },
    types::{Branch, BranchPoint, SerialNumber},
};

pub(crate) const MATCH_ROM: u8 = 0x55;
pub(crate) const SKIP_ROM: u8 = 0xCC;

const SMART_ON_MAIN: u8 = 0xCC;
const SMART_ON_AUX: u8 = 0x33;
const ALL_LINES_OFF: u8 = 0x66;

/// Reset the bus. Returns whether anything answered.
///
/// # Errors
///
/// - [`Error::Bus`] if the bus is shorted, or the transport failed
pub fn reset(bus: &mut dyn Transport) -> Result<bool> {
    match bus.reset()? {
        Reset::Presence => Ok(true),
        Reset::Empty => Ok(false),
        Reset::Short => Err(Error::Bus(format!("{}: {}", bus.name(), SHORTED))),
    }
}

/// Switch every coupler on the bus off, so only the top level is connected.
pub fn branch_off(bus: &mut dyn Transport) -> Result<()> {
    bus.send_bytes(&[SKIP_ROM, ALL_LINES_OFF])?;
    Ok(())
}

/// Get the bus ready to talk to `target`, or to everything behind
/// `branches` if it's [`None`].
///
/// Returns false if nothing answered a reset.
///
/// # Errors
///
/// - [`Error::Bus`] if a coupler on the way didn't switch
pub fn select(
    bus: &mut dyn Transport,
    branches: &[BranchPoint],
    target: Option<&SerialNumber>,
) -> Result<bool> {
    if !reset(bus)? {
        return Ok(false);
    }
    branch_off(bus)?;
    if !reset(bus)? {
        return Ok(false);
    }
    for bp in branches {
        let cmd = match bp.branch {
            Branch::Main => SMART_ON_MAIN,
            Branch::Aux => SMART_ON_AUX,
        };
        let mut out = Vec::with_capacity(12);
        out.push(MATCH_ROM);
        out.extend_from_slice(bp.sn.as_bytes());
        // Command, reset stimulus, confirmation
        out.extend_from_slice(&[cmd, 0xFF, 0xFF]);
        let resp = bus.send_bytes(&out)?;
        if resp.last() != Some(&cmd) {
            return Err(Error::Bus(format!(
                "{} {}: {}",
                bp.sn,
                bp.branch.name(),
                NOT_A_BRANCH
            )));
        }
    }
    if let Some(sn) = target {
        let mut out = Vec::with_capacity(9);
        out.push(MATCH_ROM);
        out.extend_from_slice(sn.as_bytes());
        bus.send_bytes(&out)?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::fake::{FakeBus, FakeDevice};

    #[test]
    fn empty_bus() {
        let mut bus = FakeBus::new("fake");
        assert!(!select(&mut bus, &[], None).unwrap());
    }

    #[test]
    fn shorted_bus() {
        let mut bus = FakeBus::new("fake");
        bus.handle().set_short(true);
        assert!(matches!(reset(&mut bus), Err(Error::Bus(_))));
    }

    #[test]
    fn through_coupler() {
        let mut bus = FakeBus::new("fake");
        let coupler = SerialNumber::new(0x1F, [0, 0, 0, 0, 0, 0xA1]);
        let leaf = SerialNumber::new(0x10, [1, 2, 3, 4, 5, 6]);
        let h = bus.handle();
        h.add(FakeDevice::new(coupler));
        h.add(FakeDevice::new(leaf).behind(coupler, Branch::Aux));
        //
        let path = [BranchPoint {
            sn: coupler,
            branch: Branch::Aux,
        }];
        assert!(select(&mut bus, &path, Some(&leaf)).unwrap());
        // Not a coupler
        let bad = [BranchPoint {
            sn: leaf,
            branch: Branch::Main,
        }];
        assert!(select(&mut bus, &bad, None).is_err());
    }
}
