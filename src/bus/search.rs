//! ROM search
//!
//! Finds every device on one bus segment, one 64 bit pass per device. Each
//! pass follows the previous address up to its last discrepancy, takes the
//! other branch there, and the `0` branch at any new discrepancy after it.
//! For a bus that doesn't change this gives the same addresses in the same
//! order every time.
use super::{select::select, Transport};
use crate::{
    error::{
        text::{NO_FAMILY, VANISHED},
        Error,
        Result,
    },
    types::{BranchPoint, SerialNumber},
    util::{get_bit, set_bit},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

const SEARCH_ROM: u8 = 0xF0;
const ALARM_SEARCH: u8 = 0xEC;

/// Which devices take part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    /// Everything
    Normal,

    /// Only devices with an alarm condition
    Alarm,
}

impl SearchKind {
    fn command(self) -> u8 {
        match self {
            SearchKind::Normal => SEARCH_ROM,
            SearchKind::Alarm => ALARM_SEARCH,
        }
    }
}

/// Cancellation for long bus operations.
///
/// Clones share the flag. Checked before every search step.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    /// Never cancelled unless [`Cancel::cancel`] is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled once `timeout` has passed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// # Errors
    ///
    /// - [`Error::Cancelled`] if cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Searching,
    Done,
}

/// Iterator over the addresses on one bus segment.
///
/// Stops after the first error.
#[derive(Debug)]
pub struct Search<'a> {
    bus: &'a mut dyn Transport,
    branches: &'a [BranchPoint],
    kind: SearchKind,
    cancel: &'a Cancel,
    rom: [u8; 8],

    /// Bit where the last pass took `0` at a discrepancy, [`None`] before the
    /// first pass.
    last_discrepancy: Option<usize>,

    state: State,

    /// Whether the segment answered a reset, once known
    presence: Option<bool>,
}

// Public
impl<'a> Search<'a> {
    pub fn new(
        bus: &'a mut dyn Transport,
        branches: &'a [BranchPoint],
        kind: SearchKind,
        cancel: &'a Cancel,
    ) -> Self {
        Self {
            bus,
            branches,
            kind,
            cancel,
            rom: [0; 8],
            last_discrepancy: None,
            state: State::Searching,
            presence: None,
        }
    }

    /// Whether anything answered the last reset, [`None`] before the first
    /// pass.
    pub fn presence(&self) -> Option<bool> {
        self.presence
    }
}

// Private
impl Search<'_> {
    /// One pass, finding one device
    fn pass(&mut self) -> Result<Option<SerialNumber>> {
        let present = select(self.bus, self.branches, None)?;
        self.presence = Some(present);
        if !present {
            return Ok(None);
        }
        self.bus.send_bytes(&[self.kind.command()])?;
        //
        let mut last_zero = None;
        for bit in 0..64 {
            self.cancel.check()?;
            let direction = match self.last_discrepancy {
                Some(ld) if bit < ld => get_bit(&self.rom, bit),
                Some(ld) if bit == ld => true,
                _ => false,
            };
            let t = self.bus.triplet(direction)?;
            match (t.id_bit, t.cmp_bit) {
                // Nobody took part, like an alarm search without alarms
                (true, true) if bit == 0 => return Ok(None),
                (true, true) => return Err(Error::Protocol(VANISHED.into())),
                (false, false) if !t.direction => last_zero = Some(bit),
                _ => {}
            }
            set_bit(&mut self.rom, bit, t.direction);
        }
        //
        let sn = SerialNumber::from_bytes(self.rom);
        if sn.family() == 0 {
            return Err(Error::Protocol(NO_FAMILY.into()));
        }
        if !sn.is_valid() {
            return Err(Error::Crc);
        }
        log::debug!("Found {} on {}", sn, self.bus.name());
        self.last_discrepancy = last_zero;
        if last_zero.is_none() {
            self.state = State::Done;
        }
        Ok(Some(sn))
    }
}

impl Iterator for Search<'_> {
    type Item = Result<SerialNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }
        match self.pass() {
            Ok(Some(sn)) => Some(Ok(sn)),
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

/// Whether `sn` answers on the segment behind `branches`.
///
/// A search pass that follows `sn`'s bits, so it also works for devices that
/// only respond to an alarm search.
pub fn verify(
    bus: &mut dyn Transport,
    branches: &[BranchPoint],
    sn: &SerialNumber,
    kind: SearchKind,
) -> Result<bool> {
    if !select(bus, branches, None)? {
        return Ok(false);
    }
    bus.send_bytes(&[kind.command()])?;
    let rom = sn.as_bytes();
    for bit in 0..64 {
        let want = get_bit(rom, bit);
        let t = bus.triplet(want)?;
        if (t.id_bit && t.cmp_bit) || t.direction != want {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::fake::{FakeBus, FakeDevice},
        types::Branch,
    };

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn population() -> Vec<SerialNumber> {
        vec![
            SerialNumber::new(0x10, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
            SerialNumber::new(0x3A, [0xFE, 0xED, 0xDC, 0xCB, 0xBA, 0xA0]),
            SerialNumber::new(0x28, [0x01, 0x00, 0x00, 0x00, 0x00, 0x00]),
            SerialNumber::new(0x28, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]),
            SerialNumber::new(0x28, [0x03, 0x00, 0x00, 0x00, 0x00, 0x80]),
        ]
    }

    fn search_all(bus: &mut FakeBus, kind: SearchKind) -> crate::error::Result<Vec<SerialNumber>> {
        let cancel = Cancel::new();
        Search::new(bus, &[], kind, &cancel).collect()
    }

    #[test]
    fn finds_everything_once() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        for sn in population() {
            h.add(FakeDevice::new(sn));
        }
        let mut found = search_all(&mut bus, SearchKind::Normal)?;
        assert_eq!(found.len(), 5);
        found.sort();
        let mut want = population();
        want.sort();
        assert_eq!(found, want);
        assert_eq!(h.searches(), 5);
        Ok(())
    }

    #[test]
    fn deterministic() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        for sn in population() {
            h.add(FakeDevice::new(sn));
        }
        let first = search_all(&mut bus, SearchKind::Normal)?;
        let second = search_all(&mut bus, SearchKind::Normal)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn empty_bus() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let cancel = Cancel::new();
        let mut search = Search::new(&mut bus, &[], SearchKind::Normal, &cancel);
        assert!(search.next().is_none());
        assert_eq!(search.presence(), Some(false));
        Ok(())
    }

    #[test]
    fn alarm_only() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        let pop = population();
        h.add(FakeDevice::new(pop[0]).alarm(true));
        h.add(FakeDevice::new(pop[1]));
        assert_eq!(search_all(&mut bus, SearchKind::Alarm)?, [pop[0]]);
        h.set_alarm(pop[0], false);
        assert!(search_all(&mut bus, SearchKind::Alarm)?.is_empty());
        Ok(())
    }

    #[test]
    fn fault_mid_search() {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        for sn in population() {
            h.add(FakeDevice::new(sn));
        }
        h.fail_triplets_after(100);
        let cancel = Cancel::new();
        let res: Vec<_> = Search::new(&mut bus, &[], SearchKind::Normal, &cancel).collect();
        assert_eq!(res.len(), 2);
        assert!(res[0].is_ok());
        assert!(res[1].is_err());
    }

    #[test]
    fn cancelled() {
        let mut bus = FakeBus::new("fake");
        bus.handle().add(FakeDevice::new(population()[0]));
        let cancel = Cancel::new();
        cancel.cancel();
        let res: crate::error::Result<Vec<_>> =
            Search::new(&mut bus, &[], SearchKind::Normal, &cancel).collect();
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[test]
    fn behind_a_coupler() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        let pop = population();
        let coupler = SerialNumber::new(0x1F, [0, 0, 0, 0, 0, 0xA1]);
        h.add(FakeDevice::new(coupler));
        h.add(FakeDevice::new(pop[0]));
        h.add(FakeDevice::new(pop[1]).behind(coupler, Branch::Main));
        h.add(FakeDevice::new(pop[2]).behind(coupler, Branch::Aux));
        //
        let mut top = search_all(&mut bus, SearchKind::Normal)?;
        top.sort();
        let mut want = vec![coupler, pop[0]];
        want.sort();
        assert_eq!(top, want);
        //
        let cancel = Cancel::new();
        let main = [BranchPoint {
            sn: coupler,
            branch: Branch::Main,
        }];
        let found: crate::error::Result<Vec<_>> =
            Search::new(&mut bus, &main, SearchKind::Normal, &cancel).collect();
        assert_eq!(found?, [pop[1]]);
        // Switched off again for the top level
        assert_eq!(search_all(&mut bus, SearchKind::Normal)?.len(), 2);
        Ok(())
    }

    #[test]
    fn verify_presence() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        let pop = population();
        h.add(FakeDevice::new(pop[0]));
        h.add(FakeDevice::new(pop[2]));
        assert!(verify(&mut bus, &[], &pop[0], SearchKind::Normal)?);
        assert!(verify(&mut bus, &[], &pop[2], SearchKind::Normal)?);
        assert!(!verify(&mut bus, &[], &pop[3], SearchKind::Normal)?);
        assert!(!verify(&mut bus, &[], &pop[0], SearchKind::Alarm)?);
        Ok(())
    }
}
