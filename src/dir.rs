//! Directory listings
//!
//! Bus directories come from a ROM search, or the directory cache when a
//! recent one is there. Every adapter is searched on its own thread, and
//! entries reach the sink as each adapter finishes. Everything else is
//! listed from the in-memory descriptors.
use crate::{
    bus::{
        search::{Cancel, Search, SearchKind},
        AnyDevices,
        Connection,
    },
    cache::DirKey,
    error::{text::*, Error, Result},
    stats::Counter,
    system::OneWire,
    types::{Area, DeviceDescriptor, DeviceFlags, Format, Naming, ParsedName, SerialNumber},
};
use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
};

/// One name in a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirEntry {
    /// `uncached`
    Uncached,

    /// `alarm`
    Alarm,

    /// `simultaneous`
    Simultaneous,

    /// `bus.N`
    Bus(usize),

    /// One of the in-memory areas
    Area(Area),

    /// A device found on a bus
    Device(SerialNumber),

    /// A known family under `structure`
    Family(u8),

    /// A pseudo device under `settings`, `system` or `statistics`
    Pseudo(&'static str),

    /// A subdirectory of a device, or a coupler branch
    Directory(&'static str),

    /// A readable or writable attribute, with its extension
    Attribute(String),
}

impl DirEntry {
    /// Name as it appears in a path
    pub fn name(&self) -> String {
        match self {
            DirEntry::Uncached => "uncached".into(),
            DirEntry::Alarm => "alarm".into(),
            DirEntry::Simultaneous => "simultaneous".into(),
            DirEntry::Bus(n) => format!("bus.{}", n),
            DirEntry::Area(a) => a.name().into(),
            DirEntry::Device(sn) => sn.to_string(),
            DirEntry::Family(code) => format!("{:02X}", code),
            DirEntry::Pseudo(name) | DirEntry::Directory(name) => (*name).into(),
            DirEntry::Attribute(name) => name.clone(),
        }
    }
}

/// Receives directory entries, one at a time.
///
/// Calls are never concurrent, but may come from different threads.
pub trait DirSink: Send {
    fn entry(&mut self, entry: DirEntry);
}

impl<F: FnMut(DirEntry) + Send> DirSink for F {
    fn entry(&mut self, entry: DirEntry) {
        self(entry)
    }
}

// Public
impl OneWire {
    /// List the directory at `pn` into `sink`.
    ///
    /// # Errors
    ///
    /// See [`OneWire::dir_with`]
    pub fn dir<S: DirSink + ?Sized>(&self, pn: &ParsedName, sink: &mut S) -> Result<()> {
        self.dir_with(pn, sink, &Cancel::new())
    }

    /// List the directory at `pn` into `sink`, giving up on bus searches once
    /// `cancel` is.
    ///
    /// When several adapters are searched, all of them finish and whatever
    /// they found is listed before the first error is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`] if `pn` is an attribute
    /// - [`Error::NotFound`] if the bus doesn't exist
    /// - [`Error::Cancelled`] if `cancel` was
    /// - Whatever a search failed with
    pub fn dir_with<S: DirSink + ?Sized>(
        &self,
        pn: &ParsedName,
        sink: &mut S,
        cancel: &Cancel,
    ) -> Result<()> {
        self.stats().inc(Counter::DirCalls);
        self.mark_listed();
        if !pn.is_dir() {
            return Err(Error::Invalid(format!("{}: {}", pn.path, NOT_A_DIRECTORY)));
        }
        if pn.is_bus_dir() {
            return self.list_buses(pn, sink, cancel);
        }
        match pn.device {
            // A coupler branch or similar, outside of the real device tree
            Some(_) if pn.attribute.is_some() => Ok(()),
            Some(device) => {
                self.list_device(device, pn, sink);
                Ok(())
            }
            None => {
                self.list_area(pn.area, sink);
                Ok(())
            }
        }
    }
}

// Private
impl OneWire {
    fn emit<S: DirSink + ?Sized>(&self, sink: &mut S, entry: DirEntry) {
        self.stats().inc(Counter::DirEntries);
        sink.entry(entry);
    }

    fn list_area<S: DirSink + ?Sized>(&self, area: Area, sink: &mut S) {
        for device in self.registry().area(area) {
            let entry = match area {
                Area::Structure => DirEntry::Family(device.code),
                _ => DirEntry::Pseudo(device.name),
            };
            self.emit(sink, entry);
        }
    }

    /// Attributes of `device`, aggregates expanded into their elements
    fn list_device<S: DirSink + ?Sized>(&self, device: &DeviceDescriptor, pn: &ParsedName, sink: &mut S) {
        for attr in device.attributes_in(pn.subdir.map(|s| s.name)) {
            let name = attr.base_name();
            let Some(ag) = attr.aggregate else {
                let entry = if attr.is_dir() {
                    DirEntry::Directory(name)
                } else {
                    DirEntry::Attribute(name.into())
                };
                self.emit(sink, entry);
                continue;
            };
            self.emit(sink, DirEntry::Attribute(format!("{}.ALL", name)));
            if attr.format == Format::Bitfield {
                self.emit(sink, DirEntry::Attribute(format!("{}.BYTE", name)));
            }
            let suffixes: Vec<String> = match ag.naming {
                Naming::Numbers => (0..ag.elements).map(|i| i.to_string()).collect(),
                Naming::Letters => (b'A'..=b'Z')
                    .take(ag.elements)
                    .map(|c| char::from(c).to_string())
                    .collect(),
            };
            for suffix in suffixes {
                self.emit(sink, DirEntry::Attribute(format!("{}.{}", name, suffix)));
            }
        }
    }

    fn list_buses<S: DirSink + ?Sized>(&self, pn: &ParsedName, sink: &mut S, cancel: &Cancel) -> Result<()> {
        let all = self.adapters();
        let adapters: Vec<Arc<Connection>> = match pn.bus {
            Some(b) => vec![all
                .get(b)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("bus.{}: {}", b, NO_BUS)))?],
            None => all.iter().cloned().collect(),
        };
        if pn.is_root() && !pn.uncached {
            if self.cache().is_enabled() {
                self.emit(sink, DirEntry::Uncached);
            }
            for conn in adapters.iter() {
                self.emit(sink, DirEntry::Bus(conn.index()));
            }
            for area in Area::META {
                self.emit(sink, DirEntry::Area(area));
            }
        }
        //
        let shared = Mutex::new(&mut *sink);
        let outcomes: Vec<(DeviceFlags, Result<()>)> = thread::scope(|s| {
            let shared = &shared;
            let workers: Vec<_> = adapters
                .iter()
                .map(|conn| {
                    s.spawn(move || {
                        let (found, res) = self.scan(conn, pn, cancel);
                        let mut flags = DeviceFlags::empty();
                        let mut sink = shared.lock().unwrap_or_else(PoisonError::into_inner);
                        for sn in found {
                            flags |= self.registry().device(sn.family()).flags;
                            self.emit(&mut **sink, DirEntry::Device(sn));
                        }
                        (flags, res)
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| {
                    w.join().unwrap_or_else(|_| {
                        (DeviceFlags::empty(), Err(Error::Bus("directory worker panicked".into())))
                    })
                })
                .collect()
        });
        let sink = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        //
        let mut flags = DeviceFlags::empty();
        let mut first = None;
        for (f, res) in outcomes {
            flags |= f;
            if first.is_none() {
                first = res.err();
            }
        }
        if !pn.alarm {
            if flags.contains(DeviceFlags::ALARM) && self.config().show_alarm {
                self.emit(sink, DirEntry::Alarm);
            }
            if flags.intersects(DeviceFlags::TEMPERATURE | DeviceFlags::VOLTAGE) {
                self.emit(sink, DirEntry::Simultaneous);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Devices on one adapter, and how the search ended.
    ///
    /// Whatever was found before an error is still returned.
    fn scan(&self, conn: &Connection, pn: &ParsedName, cancel: &Cancel) -> (Vec<SerialNumber>, Result<()>) {
        let dir = DirKey::new(conn.index(), &pn.branches);
        if !pn.alarm && !pn.uncached {
            if let Some(list) = self.cache().get_directory(&dir) {
                return (list, Ok(()));
            }
        }
        if let Err(e) = self.gate(conn) {
            return (Vec::new(), Err(e));
        }
        let kind = if pn.alarm { SearchKind::Alarm } else { SearchKind::Normal };
        let mut found = Vec::new();
        let mut res = Ok(());
        {
            let mut bus = conn.lock();
            let mut search = Search::new(&mut **bus, &pn.branches, kind, cancel);
            for sn in search.by_ref() {
                match sn {
                    Ok(sn) => found.push(sn),
                    Err(e) => {
                        res = Err(e);
                        break;
                    }
                }
            }
            if pn.branches.is_empty() {
                match search.presence() {
                    Some(true) => conn.set_any_devices(AnyDevices::Yes),
                    Some(false) => conn.set_any_devices(AnyDevices::No),
                    None => {}
                }
            }
        }
        conn.record(&res);
        match &res {
            Ok(()) if pn.alarm => {}
            Ok(()) => {
                self.cache().put_directory(&dir, &found);
                for sn in &found {
                    self.cache().put_device(*sn, conn.index());
                }
            }
            Err(e) => {
                self.stats().inc(Counter::SearchErrors);
                log::warn!(
                    "Search on adapter {} ({}) aborted after {} devices: {}",
                    conn.index(),
                    conn.name(),
                    found.len(),
                    e
                );
            }
        }
        (found, res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::fake::{FakeBus, FakeDevice, FakeHandle},
        cache::ManualClock,
        config::Config,
        registry::Registry,
        types::Branch,
    };
    use std::time::Duration;

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn thermometer() -> SerialNumber {
        SerialNumber::new(0x10, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    fn switch() -> SerialNumber {
        SerialNumber::new(0x3A, [0xFE, 0xED, 0xDC, 0xCB, 0xBA, 0xA0])
    }

    fn coupler() -> SerialNumber {
        SerialNumber::new(0x1F, [0xA1, 0, 0, 0, 0, 0])
    }

    fn system() -> (OneWire, FakeHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let ow = OneWire::with_parts(Config::default(), Registry::default(), clock.clone());
        let bus = FakeBus::new("fake0");
        let h = bus.handle();
        h.add(FakeDevice::new(thermometer()));
        h.add(FakeDevice::new(switch()));
        ow.add_adapter(Box::new(bus));
        (ow, h, clock)
    }

    fn list(ow: &OneWire, path: &str) -> crate::error::Result<Vec<String>> {
        let mut names = Vec::new();
        ow.dir(&ow.parse_path(path)?, &mut |e: DirEntry| names.push(e.name()))?;
        Ok(names)
    }

    #[test]
    fn root() -> Result<()> {
        let (ow, _, _) = system();
        assert_eq!(
            list(&ow, "/")?,
            [
                "uncached",
                "bus.0",
                "settings",
                "system",
                "statistics",
                "structure",
                "10.AABBCCDDEEFF",
                "3A.FEEDDCCBBAA0",
                "alarm",
                "simultaneous",
            ]
        );
        assert_eq!(ow.adapter(0).map(|c| c.any_devices()), Some(AnyDevices::Yes));
        Ok(())
    }

    #[test]
    fn one_bus() -> Result<()> {
        let (ow, _, _) = system();
        assert_eq!(
            list(&ow, "/bus.0")?,
            ["10.AABBCCDDEEFF", "3A.FEEDDCCBBAA0", "alarm", "simultaneous"]
        );
        assert!(matches!(list(&ow, "/bus.1"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn alarm_entry_can_be_hidden() -> Result<()> {
        let ow = OneWire::new(Config::default().with_alarm_dir(false));
        let bus = FakeBus::new("fake0");
        bus.handle().add(FakeDevice::new(thermometer()));
        ow.add_adapter(Box::new(bus));
        assert_eq!(list(&ow, "/bus.0")?, ["10.AABBCCDDEEFF", "simultaneous"]);
        Ok(())
    }

    #[test]
    fn listings_are_cached() -> Result<()> {
        let (ow, h, clock) = system();
        list(&ow, "/")?;
        let searches = h.searches();
        assert!(searches > 0);
        list(&ow, "/")?;
        assert_eq!(h.searches(), searches);
        // Uncached always searches, and still refreshes the cache
        h.remove(switch());
        assert_eq!(list(&ow, "/uncached")?, ["10.AABBCCDDEEFF", "alarm", "simultaneous"]);
        assert!(h.searches() > searches);
        assert_eq!(ow.cache().get_directory(&DirKey::new(0, &[])), Some(vec![thermometer()]));
        // And they expire
        h.add(FakeDevice::new(switch()));
        clock.advance(Duration::from_secs(61));
        assert_eq!(list(&ow, "/bus.0")?.len(), 4);
        Ok(())
    }

    #[test]
    fn affinity_is_recorded() -> Result<()> {
        let (ow, _, _) = system();
        list(&ow, "/")?;
        assert_eq!(ow.cache().get_device(switch()), Some(0));
        assert_eq!(ow.cache().get_device(thermometer()), Some(0));
        Ok(())
    }

    #[test]
    fn aborted_search() -> Result<()> {
        let (ow, h, _) = system();
        // Enough for the first device but not the second
        h.fail_triplets_after(100);
        let mut names = Vec::new();
        let res = ow.dir(&ow.parse_path("/bus.0")?, &mut |e: DirEntry| names.push(e.name()));
        assert!(matches!(res, Err(Error::Bus(_))));
        assert_eq!(names, ["10.AABBCCDDEEFF", "alarm", "simultaneous"]);
        assert_eq!(ow.cache().get_directory(&DirKey::new(0, &[])), None);
        assert_eq!(ow.stats().get(Counter::SearchErrors), 1);
        //
        h.heal();
        assert_eq!(list(&ow, "/bus.0")?.len(), 4);
        Ok(())
    }

    #[test]
    fn cancelled_search() -> Result<()> {
        let (ow, _, _) = system();
        let cancel = Cancel::new();
        cancel.cancel();
        let res = ow.dir_with(&ow.parse_path("/")?, &mut |_: DirEntry| {}, &cancel);
        assert!(matches!(res, Err(Error::Cancelled)));
        assert_eq!(ow.cache().get_directory(&DirKey::new(0, &[])), None);
        Ok(())
    }

    #[test]
    fn alarm_search() -> Result<()> {
        let (ow, h, _) = system();
        assert!(list(&ow, "/alarm")?.is_empty());
        h.set_alarm(thermometer(), true);
        assert_eq!(list(&ow, "/alarm")?, ["10.AABBCCDDEEFF"]);
        assert_eq!(ow.cache().get_directory(&DirKey::new(0, &[])), None);
        Ok(())
    }

    #[test]
    fn devices() -> Result<()> {
        let (ow, _, _) = system();
        let names = list(&ow, "/3A.FEEDDCCBBAA0")?;
        assert_eq!(
            names,
            [
                "address",
                "crc8",
                "family",
                "id",
                "present",
                "r_address",
                "r_id",
                "type",
                "PIO.ALL",
                "PIO.BYTE",
                "PIO.A",
                "PIO.B",
                "latch.ALL",
                "latch.BYTE",
                "latch.A",
                "latch.B",
                "sensed.ALL",
                "sensed.BYTE",
                "sensed.A",
                "sensed.B",
            ]
        );
        // Not on any bus, listed all the same
        assert_eq!(list(&ow, "/28.010000000000")?.len(), 8);
        assert!(matches!(list(&ow, "/3A.FEEDDCCBBAA0/type"), Err(Error::Invalid(_))));
        Ok(())
    }

    #[test]
    fn device_listing_stays_off_the_bus() -> Result<()> {
        let (ow, h, _) = system();
        list(&ow, "/3A.FEEDDCCBBAA0")?;
        list(&ow, "/28.010000000000")?;
        list(&ow, "/simultaneous")?;
        assert_eq!((h.resets(), h.searches()), (0, 0));
        assert_eq!(ow.cache().get_device(switch()), None);
        Ok(())
    }

    #[test]
    fn uncached_root() -> Result<()> {
        let (ow, _, _) = system();
        let names = list(&ow, "/uncached")?;
        assert!(!names.iter().any(|n| n.starts_with("bus.") || n == "uncached" || n == "settings"));
        assert_eq!(names.len(), 4);
        Ok(())
    }

    #[test]
    fn simultaneous_entry() -> Result<()> {
        let ow = OneWire::new(Config::default());
        let bus = FakeBus::new("fake0");
        let h = bus.handle();
        h.add(FakeDevice::new(switch()));
        ow.add_adapter(Box::new(bus));
        // No sensors, nothing to convert
        assert_eq!(list(&ow, "/")?.last().map(String::as_str), Some("3A.FEEDDCCBBAA0"));
        h.add(FakeDevice::new(thermometer()));
        assert_eq!(list(&ow, "/uncached/bus.0")?.last().map(String::as_str), Some("simultaneous"));
        assert_eq!(list(&ow, "/simultaneous")?, ["present", "temperature"]);
        // Not inside the alarm directory
        h.set_alarm(thermometer(), true);
        assert_eq!(list(&ow, "/alarm")?, ["10.AABBCCDDEEFF"]);
        Ok(())
    }

    #[test]
    fn couplers() -> Result<()> {
        let (ow, h, _) = system();
        h.add(FakeDevice::new(coupler()));
        let hidden = SerialNumber::new(0x28, [0x01, 0, 0, 0, 0, 0]);
        h.add(FakeDevice::new(hidden).behind(coupler(), Branch::Aux));
        //
        let names = list(&ow, &format!("/{}", coupler()))?;
        assert!(names.ends_with(&["aux".to_owned(), "main".to_owned()]));
        assert_eq!(
            list(&ow, &format!("/{}/aux", coupler()))?,
            [hidden.to_string(), "alarm".into(), "simultaneous".into()]
        );
        assert!(list(&ow, &format!("/{}/main", coupler()))?.is_empty());
        assert!(!list(&ow, "/bus.0")?.contains(&hidden.to_string()));
        Ok(())
    }

    #[test]
    fn areas() -> Result<()> {
        let (ow, _, _) = system();
        assert_eq!(list(&ow, "/statistics")?, ["bus", "cache", "directory", "read", "write"]);
        assert_eq!(list(&ow, "/statistics/directory")?, ["calls", "entries"]);
        assert_eq!(list(&ow, "/settings/timeout")?, ["volatile", "stable", "directory", "presence"]);
        assert_eq!(list(&ow, "/structure")?, ["01", "10", "1F", "28", "3A"]);
        assert_eq!(list(&ow, "/structure/1F")?.len(), 10);
        Ok(())
    }

    #[test]
    fn entries_are_counted() -> Result<()> {
        let (ow, _, _) = system();
        let before = ow.stats().get(Counter::DirCalls);
        let n = list(&ow, "/statistics")?.len();
        assert_eq!(ow.stats().get(Counter::DirCalls), before + 1);
        assert_eq!(ow.stats().get(Counter::DirEntries), n as u64);
        Ok(())
    }
}
