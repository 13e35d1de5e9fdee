//! A simulated bus
//!
//! Enough of the 1-Wire protocol to test everything above the transport:
//! searching with a real wired AND, couplers with switchable branches, the
//! DS2413 switch, and injected faults.
use super::{Reset, Transport, Triplet};
use crate::{
    error::{Error, Result},
    types::{Branch, SerialNumber},
    util::get_bit,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const SEARCH_ROM: u8 = 0xF0;
const ALARM_SEARCH: u8 = 0xEC;
const MATCH_ROM: u8 = 0x55;
const SKIP_ROM: u8 = 0xCC;

const COUPLER_FAMILY: u8 = 0x1F;
const SMART_ON_MAIN: u8 = 0xCC;
const SMART_ON_AUX: u8 = 0x33;
const ALL_LINES_OFF: u8 = 0x66;

const CONVERT_T: u8 = 0x44;

const SWITCH_FAMILY: u8 = 0x3A;
const PIO_READ: u8 = 0xF5;
const PIO_WRITE: u8 = 0x5A;
const PIO_CONFIRM: u8 = 0xAA;

/// One simulated device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub sn: SerialNumber,
    pub alarm: bool,

    /// Coupler and branch this hangs off, [`None`] for the top level
    pub behind: Option<(SerialNumber, Branch)>,

    /// Output latches of a switch, bit 0 for A. `1` is off.
    pub latch: u8,

    /// What's driving a switch's pins from outside, `1` is high.
    pub inputs: u8,

    /// Branch switched on, couplers only
    active: Option<Branch>,
}

impl FakeDevice {
    pub fn new(sn: SerialNumber) -> Self {
        Self {
            sn,
            alarm: false,
            behind: None,
            latch: 0x03,
            inputs: 0x03,
            active: None,
        }
    }

    pub fn alarm(mut self, alarm: bool) -> Self {
        self.alarm = alarm;
        self
    }

    pub fn behind(mut self, coupler: SerialNumber, branch: Branch) -> Self {
        self.behind = Some((coupler, branch));
        self
    }

    /// DS2413 status byte, complement in the high nibble
    fn status(&self) -> u8 {
        let sensed = self.latch & self.inputs;
        let low = (sensed & 0x01)
            | ((self.latch & 0x01) << 1)
            | ((sensed & 0x02) << 1)
            | ((self.latch & 0x02) << 2);
        low | ((!low & 0x0F) << 4)
    }
}

/// Where the conversation after a reset is at
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// Nothing useful until the next reset
    Idle,

    /// Waiting for a ROM command, with the devices that were just reset
    Rom(Vec<usize>),

    /// Collecting a Match ROM address
    Match { rom: Vec<u8>, listening: Vec<usize> },

    /// Mid search, with the devices still taking part
    Search { bit: usize, participants: Vec<usize> },

    /// Function commands for the selected device, or all of them
    Function { target: Option<usize>, bytes: Vec<u8> },
}

#[derive(Debug)]
struct State {
    devices: Vec<FakeDevice>,
    phase: Phase,
    open: bool,
    short: bool,

    resets: usize,
    searches: usize,
    conversions: usize,
    reopens: usize,
    closes: usize,

    /// Triplets left before they start failing
    triplets_left: Option<usize>,
    failing_resets: u32,
    failing_reopens: u32,
}

impl State {
    /// Whether device `i` is reachable from the top of the bus
    fn connected(&self, i: usize) -> bool {
        match self.devices[i].behind {
            None => true,
            Some((coupler, branch)) => self
                .devices
                .iter()
                .position(|d| d.sn == coupler)
                .map_or(false, |c| self.devices[c].active == Some(branch) && self.connected(c)),
        }
    }

    fn connected_devices(&self) -> Vec<usize> {
        (0..self.devices.len()).filter(|&i| self.connected(i)).collect()
    }

    /// Whether device `i` hangs off `coupler`'s `branch`, at any depth
    fn under(&self, i: usize, coupler: SerialNumber, branch: Branch) -> bool {
        match self.devices[i].behind {
            None => false,
            Some(parent) if parent == (coupler, branch) => true,
            Some((parent, _)) => self
                .devices
                .iter()
                .position(|d| d.sn == parent)
                .map_or(false, |p| self.under(p, coupler, branch)),
        }
    }

    /// Devices reset by switching on `coupler`'s `branch`
    fn branch_devices(&self, coupler: SerialNumber, branch: Branch) -> Vec<usize> {
        self.connected_devices()
            .into_iter()
            .filter(|&i| self.under(i, coupler, branch))
            .collect()
    }

    /// Exchange one byte, returning what the bus reads back
    fn exchange(&mut self, byte: u8) -> u8 {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        let (next, out) = match phase {
            Phase::Idle => (Phase::Idle, byte),
            Phase::Rom(listening) => match byte {
                MATCH_ROM => (
                    Phase::Match {
                        rom: Vec::new(),
                        listening,
                    },
                    byte,
                ),
                SKIP_ROM => (
                    Phase::Function {
                        target: None,
                        bytes: Vec::new(),
                    },
                    byte,
                ),
                SEARCH_ROM | ALARM_SEARCH => {
                    self.searches += 1;
                    let alarm = byte == ALARM_SEARCH;
                    let participants = listening
                        .into_iter()
                        .filter(|&i| !alarm || self.devices[i].alarm)
                        .collect();
                    (Phase::Search { bit: 0, participants }, byte)
                }
                _ => (Phase::Idle, byte),
            },
            Phase::Match { mut rom, listening } => {
                rom.push(byte);
                if rom.len() < 8 {
                    (Phase::Match { rom, listening }, byte)
                } else {
                    let target = listening
                        .into_iter()
                        .find(|&i| self.devices[i].sn.as_bytes()[..] == rom[..]);
                    match target {
                        Some(t) => (
                            Phase::Function {
                                target: Some(t),
                                bytes: Vec::new(),
                            },
                            byte,
                        ),
                        None => (Phase::Idle, byte),
                    }
                }
            }
            Phase::Function { target, mut bytes } => {
                bytes.push(byte);
                match target {
                    None => {
                        match bytes[0] {
                            ALL_LINES_OFF => {
                                for d in &mut self.devices {
                                    d.active = None;
                                }
                            }
                            CONVERT_T => self.conversions += 1,
                            _ => {}
                        }
                        (Phase::Idle, byte)
                    }
                    Some(t) => self.function(t, bytes),
                }
            }
            search @ Phase::Search { .. } => (search, byte),
        };
        self.phase = next;
        out
    }

    /// Function command byte for device `t`. `bytes` is everything sent
    /// since it was selected, including this byte.
    fn function(&mut self, t: usize, bytes: Vec<u8>) -> (Phase, u8) {
        let dev = &mut self.devices[t];
        let n = bytes.len();
        let byte = bytes[n - 1];
        let cont = |bytes| Phase::Function {
            target: Some(t),
            bytes,
        };
        match (dev.sn.family(), bytes[0]) {
            (COUPLER_FAMILY, cmd @ (SMART_ON_MAIN | SMART_ON_AUX)) => match n {
                1 => {
                    dev.active = Some(if cmd == SMART_ON_MAIN {
                        Branch::Main
                    } else {
                        Branch::Aux
                    });
                    (cont(bytes), byte)
                }
                // Reset stimulus
                2 => (cont(bytes), byte),
                // Confirmation, then only the branch is reset and waits for
                // a ROM command
                _ => {
                    let (sn, branch) = (dev.sn, dev.active.unwrap_or(Branch::Main));
                    (Phase::Rom(self.branch_devices(sn, branch)), cmd)
                }
            },
            (COUPLER_FAMILY, ALL_LINES_OFF) => {
                dev.active = None;
                (Phase::Idle, byte)
            }
            (SWITCH_FAMILY, PIO_READ) => {
                let out = if n == 1 { byte } else { dev.status() };
                (cont(bytes), out)
            }
            (SWITCH_FAMILY, PIO_WRITE) => match n {
                1 | 2 => (cont(bytes), byte),
                3 => {
                    if bytes[2] == !bytes[1] {
                        dev.latch = bytes[1] & 0x03;
                    }
                    (cont(bytes), byte)
                }
                4 if bytes[2] == !bytes[1] => (cont(bytes), PIO_CONFIRM),
                _ if bytes[2] == !bytes[1] => (cont(bytes), dev.status()),
                _ => (cont(bytes), 0xFF),
            },
            _ => (cont(bytes), byte),
        }
    }

    fn triplet(&mut self, direction: bool) -> Result<Triplet> {
        let Phase::Search { bit, participants } = &mut self.phase else {
            return Err(Error::Protocol("search step outside a search".into()));
        };
        let bit_of = |sn: &SerialNumber| get_bit(sn.as_bytes(), *bit);
        // Wired AND, anyone sending 0 wins
        let id_bit = participants.iter().all(|&i| bit_of(&self.devices[i].sn));
        let cmp_bit = participants.iter().all(|&i| !bit_of(&self.devices[i].sn));
        let taken = match (id_bit, cmp_bit) {
            (false, false) => direction,
            (true, true) => true,
            (id, _) => id,
        };
        participants.retain(|&i| bit_of(&self.devices[i].sn) == taken);
        *bit += 1;
        if *bit == 64 {
            self.phase = Phase::Idle;
        }
        Ok(Triplet {
            id_bit,
            cmp_bit,
            direction: taken,
        })
    }
}

/// A simulated bus, see the [module docs][self]
#[derive(Debug)]
pub struct FakeBus {
    name: String,
    state: Arc<Mutex<State>>,
}

impl FakeBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Arc::new(Mutex::new(State {
                devices: Vec::new(),
                phase: Phase::Idle,
                open: true,
                short: false,
                resets: 0,
                searches: 0,
                conversions: 0,
                reopens: 0,
                closes: 0,
                triplets_left: None,
                failing_resets: 0,
                failing_reopens: 0,
            })),
        }
    }

    /// Handle for changing the bus and looking at it after it's been handed
    /// off.
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            state: self.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> Error {
        Error::Bus(format!("{} is closed", self.name))
    }
}

impl Transport for FakeBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) -> Result<Reset> {
        let mut s = self.state();
        if !s.open {
            return Err(self.closed());
        }
        s.resets += 1;
        if s.failing_resets > 0 {
            s.failing_resets -= 1;
            s.phase = Phase::Idle;
            return Err(Error::Bus(format!("{}: reset timed out", self.name)));
        }
        if s.short {
            s.phase = Phase::Idle;
            return Ok(Reset::Short);
        }
        let listening = s.connected_devices();
        if listening.is_empty() {
            s.phase = Phase::Idle;
            return Ok(Reset::Empty);
        }
        s.phase = Phase::Rom(listening);
        Ok(Reset::Presence)
    }

    fn triplet(&mut self, direction: bool) -> Result<Triplet> {
        let mut s = self.state();
        if !s.open {
            return Err(self.closed());
        }
        if let Some(left) = s.triplets_left.as_mut() {
            if *left == 0 {
                return Err(Error::Bus(format!("{}: search step timed out", self.name)));
            }
            *left -= 1;
        }
        s.triplet(direction)
    }

    fn send_bytes(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut s = self.state();
        if !s.open {
            return Err(self.closed());
        }
        Ok(data.iter().map(|&b| s.exchange(b)).collect())
    }

    fn close(&mut self) {
        let mut s = self.state();
        s.open = false;
        s.closes += 1;
    }

    fn reopen(&mut self) -> Result<()> {
        let mut s = self.state();
        s.reopens += 1;
        if s.failing_reopens > 0 {
            s.failing_reopens -= 1;
            return Err(Error::Bus(format!("{}: cannot open", self.name)));
        }
        s.open = true;
        s.phase = Phase::Idle;
        Ok(())
    }
}

/// Controls a [`FakeBus`] from outside
#[derive(Debug, Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<State>>,
}

impl FakeHandle {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_mut<R>(&self, sn: SerialNumber, f: impl FnOnce(&mut FakeDevice) -> R) -> Option<R> {
        self.state().devices.iter_mut().find(|d| d.sn == sn).map(f)
    }

    /// Plug a device in
    pub fn add(&self, device: FakeDevice) {
        self.state().devices.push(device);
    }

    /// Unplug a device
    pub fn remove(&self, sn: SerialNumber) {
        self.state().devices.retain(|d| d.sn != sn);
    }

    pub fn set_alarm(&self, sn: SerialNumber, alarm: bool) {
        self.device_mut(sn, |d| d.alarm = alarm);
    }

    /// Drive a switch's pins from outside
    pub fn set_inputs(&self, sn: SerialNumber, inputs: u8) {
        self.device_mut(sn, |d| d.inputs = inputs & 0x03);
    }

    /// Output latches of a switch
    pub fn latch(&self, sn: SerialNumber) -> Option<u8> {
        self.device_mut(sn, |d| d.latch)
    }

    pub fn set_short(&self, short: bool) {
        self.state().short = short;
    }

    /// Fail every search step after the next `n`
    pub fn fail_triplets_after(&self, n: usize) {
        self.state().triplets_left = Some(n);
    }

    /// Stop failing search steps
    pub fn heal(&self) {
        let mut s = self.state();
        s.triplets_left = None;
        s.failing_resets = 0;
    }

    /// Fail the next `n` resets
    pub fn fail_resets(&self, n: u32) {
        self.state().failing_resets = n;
    }

    /// Fail the next `n` reopens
    pub fn fail_reopens(&self, n: u32) {
        self.state().failing_reopens = n;
    }

    pub fn resets(&self) -> usize {
        self.state().resets
    }

    /// Search commands received, one per search pass
    pub fn searches(&self) -> usize {
        self.state().searches
    }

    /// Skip ROM temperature conversions started
    pub fn conversions(&self) -> usize {
        self.state().conversions
    }

    /// Reopen attempts, failed ones included
    pub fn reopens(&self) -> usize {
        self.state().reopens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte() {
        let mut d = FakeDevice::new(SerialNumber::new(SWITCH_FAMILY, [1, 0, 0, 0, 0, 0]));
        // Everything off and high
        assert_eq!(d.status() & 0x0F, 0x0F);
        d.latch = 0x02;
        d.inputs = 0x03;
        // A on, so A reads low
        assert_eq!(d.status() & 0x0F, 0b1100);
        assert_eq!(d.status() >> 4, 0b0011);
    }

    #[test]
    fn wired_and() -> Result<()> {
        let mut bus = FakeBus::new("fake");
        let h = bus.handle();
        // Differ in bit 8, the lowest bit of the first id byte
        h.add(FakeDevice::new(SerialNumber::new(0x10, [0, 0, 0, 0, 0, 0])));
        h.add(FakeDevice::new(SerialNumber::new(0x10, [1, 0, 0, 0, 0, 0])));
        assert_eq!(bus.reset()?, Reset::Presence);
        bus.send_bytes(&[SEARCH_ROM])?;
        let t = bus.triplet(false)?;
        // Family bit 0 is 0 for both
        assert_eq!((t.id_bit, t.cmp_bit, t.direction), (false, true, false));
        for _ in 1..8 {
            bus.triplet(false)?;
        }
        let t = bus.triplet(true)?;
        assert_eq!((t.id_bit, t.cmp_bit, t.direction), (false, false, true));
        Ok(())
    }

    #[test]
    fn closed_bus_fails() {
        let mut bus = FakeBus::new("fake");
        bus.close();
        assert!(bus.reset().is_err());
        assert!(bus.reopen().is_ok());
        assert!(bus.reset().is_ok());
        assert_eq!(bus.handle().closes(), 1);
    }
}
