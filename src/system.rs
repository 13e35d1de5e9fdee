//! The whole 1-Wire system
//!
//! [`OneWire`] owns every adapter, the caches, the device lock pool and the
//! statistics, and is what bindings talk to: [`OneWire::parse_path`], then
//! [`OneWire::read`], [`OneWire::write`] or [`OneWire::dir`].
use crate::{
    bus::{
        search::{self, SearchKind},
        select,
        Connection,
        Health,
        Transport,
    },
    cache::{Cache, CacheKey, Clock, SystemClock},
    config::Config,
    devices::describe,
    error::{text::*, Error, Result},
    locks::DeviceLocks,
    registry::Registry,
    stats::{Counter, Stats},
    types::{
        AttributeDescriptor,
        BranchPoint,
        DeviceDescriptor,
        DeviceKind,
        Extension,
        Format,
        Layout,
        ParsedName,
        SerialNumber,
        Area,
    },
};
use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::SystemTime,
};

/// Adapters, appended to by copying so readers never wait
type Adapters = Arc<Vec<Arc<Connection>>>;

/// Everything needed to read or write one attribute, handed to the
/// attribute's [`ReadFn`][crate::types::ReadFn] or
/// [`WriteFn`][crate::types::WriteFn].
pub struct Query<'a> {
    pub sn: SerialNumber,
    pub device: &'static DeviceDescriptor,
    pub attribute: &'static AttributeDescriptor,

    /// Which part of an aggregate. [`Extension::All`] for aggregates stored
    /// as one.
    pub extension: Extension,

    adapter: Option<usize>,
    branches: &'a [BranchPoint],
    bus: Option<&'a mut dyn Transport>,
    system: &'a OneWire,
}

// Public
impl<'a> Query<'a> {
    /// The bus the device is on, locked for the whole query.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for pseudo devices, which aren't on a bus
    pub fn bus(&mut self) -> Result<&mut dyn Transport> {
        match self.bus.as_deref_mut() {
            Some(bus) => Ok(bus),
            None => Err(Error::NotFound(format!("{}: {}", self.device.name, NO_BUS))),
        }
    }

    /// Index of the adapter the device is on
    pub fn adapter(&self) -> Option<usize> {
        self.adapter
    }

    /// Couplers between the adapter and the device
    pub fn branches(&self) -> &'a [BranchPoint] {
        self.branches
    }

    pub fn system(&self) -> &'a OneWire {
        self.system
    }

    /// Reset and address the device.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if nothing answered the reset
    pub fn select(&mut self) -> Result<()> {
        let (sn, branches) = (self.sn, self.branches);
        if !select::select(self.bus()?, branches, Some(&sn))? {
            return Err(Error::NotFound(format!("{}: {}", sn, NOT_PRESENT)));
        }
        Ok(())
    }

    /// Address the device, send `data`, then read `read` bytes.
    pub fn transaction(&mut self, data: &[u8], read: usize) -> Result<Vec<u8>> {
        self.select()?;
        let mut out = Vec::with_capacity(data.len() + read);
        out.extend_from_slice(data);
        out.resize(data.len() + read, 0xFF);
        let mut resp = self.bus()?.send_bytes(&out)?;
        if resp.len() != out.len() {
            return Err(Error::Protocol(format!(
                "sent {} bytes, got {} back",
                out.len(),
                resp.len()
            )));
        }
        Ok(resp.split_off(data.len()))
    }

    /// Cache a value of another attribute of the same device, learned on the
    /// way.
    ///
    /// `value` is what that attribute's own read would return.
    pub fn cache_sibling(&self, name: &str, value: &[u8]) {
        let Some(attr) = self.device.attribute(name) else {
            return;
        };
        let ext = unit_extension(attr, Extension::All);
        let key = CacheKey::property(self.sn, self.device, attr, ext);
        self.system.cache.put(key, attr.change, value);
    }
}

/// A 1-Wire system
#[derive(Debug)]
pub struct OneWire {
    config: Config,
    registry: Registry,
    adapters: RwLock<Adapters>,
    cache: Cache,
    locks: DeviceLocks,
    stats: Arc<Stats>,
    started: SystemTime,

    /// When a directory was last listed
    listed: Mutex<SystemTime>,
}

// Public
impl OneWire {
    /// A system with the built in device families and no adapters yet.
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, Registry::default(), Arc::new(SystemClock))
    }

    /// A system with custom device families and time source.
    pub fn with_parts(config: Config, registry: Registry, clock: Arc<dyn Clock>) -> Self {
        let stats = Arc::new(Stats::new());
        Self {
            cache: Cache::new(config.timeouts, config.cache_enabled, clock, stats.clone()),
            locks: DeviceLocks::new(config.lock_slots),
            adapters: RwLock::new(Arc::default()),
            started: SystemTime::now(),
            listed: Mutex::new(SystemTime::now()),
            registry,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// When this system was created
    pub fn started(&self) -> SystemTime {
        self.started
    }

    /// When a directory was last listed, or [`OneWire::started`] if never
    pub fn listed(&self) -> SystemTime {
        *self.listed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach an adapter. Returns its index, the `N` of `bus.N`.
    ///
    /// Safe to call while other threads are using the system.
    pub fn add_adapter(&self, transport: Box<dyn Transport>) -> usize {
        let mut adapters = self.adapters.write().unwrap_or_else(PoisonError::into_inner);
        let index = adapters.len();
        let health = Health::new(self.config.reconnect_threshold, self.config.reconnect_cooldown);
        let conn = Connection::new(index, transport, health, self.stats.clone());
        log::info!("Added adapter {} ({})", index, conn.name());
        let mut list = Vec::clone(&adapters);
        list.push(Arc::new(conn));
        *adapters = Arc::new(list);
        index
    }

    /// Snapshot of the attached adapters
    pub fn adapters(&self) -> Adapters {
        self.adapters.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn adapter(&self, index: usize) -> Option<Arc<Connection>> {
        self.adapters().get(index).cloned()
    }

    /// Parse `path` against this system's device families.
    ///
    /// # Errors
    ///
    /// See [`ParsedName::parse`]
    pub fn parse_path(&self, path: &str) -> Result<ParsedName> {
        ParsedName::parse(path, &self.registry)
    }

    /// Read the attribute at `pn`.
    ///
    /// Values come from the cache when they can, unless `pn` is under
    /// `/uncached`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the device isn't on any bus
    /// - [`Error::Invalid`] if `pn` is a directory
    /// - [`Error::WriteOnly`] if the attribute can't be read
    /// - [`Error::AdapterUnavailable`] if the adapter is being reconnected
    /// - Whatever the bus or the attribute's driver fails with
    pub fn read(&self, pn: &ParsedName) -> Result<Vec<u8>> {
        self.stats.inc(Counter::ReadCalls);
        let (device, attr) = target(pn)?;
        if pn.area == Area::Structure {
            return Ok(describe(attr, pn.extension).into_bytes());
        }
        if attr.read.is_none() {
            return Err(Error::WriteOnly);
        }
        let value = match attr.aggregate {
            None => self.read_unit(pn, device, attr, Extension::None)?,
            Some(ag) => match (ag.layout, pn.extension) {
                (Layout::Aggregate, ext) => {
                    let full = self.read_unit(pn, device, attr, Extension::All)?;
                    split(attr, ag.elements, &full, ext)?
                }
                (Layout::Separate, Extension::Index(i)) => {
                    self.read_unit(pn, device, attr, Extension::Index(i))?
                }
                (Layout::Separate, ext) => {
                    let mut all = Vec::new();
                    for i in 0..ag.elements {
                        all.extend(self.read_unit(pn, device, attr, Extension::Index(i))?);
                    }
                    match ext {
                        Extension::Byte => pack(&all).to_le_bytes().to_vec(),
                        _ => all,
                    }
                }
            },
        };
        self.stats.inc(Counter::ReadSuccess);
        self.stats.add(Counter::ReadBytes, value.len() as u64);
        Ok(value)
    }

    /// Write `data` to the attribute at `pn`.
    ///
    /// Cached values of the attribute are dropped afterwards, all of its
    /// elements included.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadOnly`] if the attribute can't be written
    /// - [`Error::Invalid`] if `data` doesn't fit the attribute
    /// - Otherwise as [`OneWire::read`]
    pub fn write(&self, pn: &ParsedName, data: &[u8]) -> Result<()> {
        self.stats.inc(Counter::WriteCalls);
        let (device, attr) = target(pn)?;
        if attr.write.is_none() || pn.area == Area::Structure {
            return Err(Error::ReadOnly);
        }
        let res = match attr.aggregate {
            None => self.write_unit(pn, device, attr, Extension::None, data),
            Some(ag) => match (ag.layout, pn.extension) {
                (Layout::Aggregate, ext @ Extension::Index(_)) => {
                    self.modify_unit(pn, device, attr, |full| merge(attr, ag.elements, full, ext, data))
                }
                (Layout::Aggregate, ext) => {
                    let full = merge(attr, ag.elements, Vec::new(), ext, data)?;
                    self.write_unit(pn, device, attr, Extension::All, &full)
                }
                (Layout::Separate, Extension::Index(i)) => {
                    self.write_unit(pn, device, attr, Extension::Index(i), data)
                }
                (Layout::Separate, ext) => {
                    let elements = match ext {
                        Extension::Byte => unpack(data, ag.elements)?,
                        _ => data.to_vec(),
                    };
                    let size = element_size(attr);
                    if elements.len() != size * ag.elements {
                        return Err(bad_value(pn));
                    }
                    elements
                        .chunks(size)
                        .enumerate()
                        .try_for_each(|(i, chunk)| {
                            self.write_unit(pn, device, attr, Extension::Index(i), chunk)
                        })
                }
            },
        };
        self.invalidate(pn, device, attr);
        res?;
        self.stats.inc(Counter::WriteSuccess);
        self.stats.add(Counter::WriteBytes, data.len() as u64);
        Ok(())
    }

    /// Whether the device at `pn` answers on any bus.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalid`] if `pn` isn't a real device
    pub fn present(&self, pn: &ParsedName) -> Result<bool> {
        match pn.device {
            Some(d) if d.kind == DeviceKind::Chip && pn.area == Area::Real => {}
            _ => return Err(Error::Invalid(format!("{}: {}", pn.path, NO_DEVICE))),
        }
        match self.find_bus(pn) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// Crate
impl OneWire {
    pub(crate) fn mark_listed(&self) {
        *self.listed.lock().unwrap_or_else(PoisonError::into_inner) = SystemTime::now();
    }

    /// Reconnect `conn` if it needs it.
    ///
    /// After a reconnect nothing cached can be trusted, so the cache is
    /// cleared.
    pub(crate) fn gate(&self, conn: &Connection) -> Result<()> {
        if conn.test_connection()? {
            self.cache.clear();
        }
        Ok(())
    }

    /// Adapter the device at `pn` is on.
    ///
    /// An explicit `bus.N` wins, then where it was last seen, then asking
    /// every adapter in turn.
    pub(crate) fn find_bus(&self, pn: &ParsedName) -> Result<Arc<Connection>> {
        if let Some(b) = pn.bus {
            return self
                .adapter(b)
                .ok_or_else(|| Error::NotFound(format!("bus.{}: {}", b, NO_BUS)));
        }
        if !pn.uncached {
            if let Some(conn) = self.cache.get_device(pn.sn).and_then(|b| self.adapter(b)) {
                return Ok(conn);
            }
        }
        for conn in self.adapters().iter() {
            if self.gate(conn).is_err() {
                continue;
            }
            let res = {
                let mut bus = conn.lock();
                search::verify(&mut **bus, &pn.branches, &pn.sn, SearchKind::Normal)
            };
            conn.record(&res);
            if let Ok(true) = res {
                self.cache.put_device(pn.sn, conn.index());
                return Ok(conn.clone());
            }
        }
        Err(Error::NotFound(format!("{}: {}", pn.sn, NOT_PRESENT)))
    }
}

// Private
impl OneWire {
    /// Read what one call of the attribute's read function returns
    fn read_unit(
        &self,
        pn: &ParsedName,
        device: &'static DeviceDescriptor,
        attr: &'static AttributeDescriptor,
        ext: Extension,
    ) -> Result<Vec<u8>> {
        let read = attr.read.ok_or(Error::WriteOnly)?;
        if device.kind == DeviceKind::Bus {
            let values = self.broadcast(pn, device, attr, ext, |q| read(q))?;
            return Ok(either(attr, values));
        }
        let key = CacheKey::property(pn.sn, device, attr, ext);
        if !pn.uncached {
            if let Ok(v) = self.cache.get(&key, attr.change) {
                self.stats.inc(Counter::ReadCacheSuccess);
                return Ok(v);
            }
        }
        let value = self.query(pn, device, attr, ext, |q| read(q))?;
        self.cache.put(key, attr.change, &value);
        Ok(value)
    }

    fn write_unit(
        &self,
        pn: &ParsedName,
        device: &'static DeviceDescriptor,
        attr: &'static AttributeDescriptor,
        ext: Extension,
        data: &[u8],
    ) -> Result<()> {
        let write = attr.write.ok_or(Error::ReadOnly)?;
        if device.kind == DeviceKind::Bus {
            return self.broadcast(pn, device, attr, ext, |q| write(q, data)).map(drop);
        }
        self.query(pn, device, attr, ext, |q| write(q, data))
    }

    /// Write back what `change` makes of the current value, read fresh from
    /// the device.
    ///
    /// Both happen under the same device lock and bus lock, so a concurrent
    /// write to another element can't slip in between.
    fn modify_unit(
        &self,
        pn: &ParsedName,
        device: &'static DeviceDescriptor,
        attr: &'static AttributeDescriptor,
        change: impl FnOnce(Vec<u8>) -> Result<Vec<u8>>,
    ) -> Result<()> {
        let read = attr.read.ok_or(Error::WriteOnly)?;
        let write = attr.write.ok_or(Error::ReadOnly)?;
        self.query(pn, device, attr, Extension::All, |q| {
            let full = change(read(q)?)?;
            write(q, &full)
        })
    }

    /// Run `f` against the device, on its bus for real devices.
    fn query<T>(
        &self,
        pn: &ParsedName,
        device: &'static DeviceDescriptor,
        attr: &'static AttributeDescriptor,
        ext: Extension,
        f: impl FnOnce(&mut Query<'_>) -> Result<T>,
    ) -> Result<T> {
        if device.kind == DeviceKind::Pseudo || pn.area != Area::Real {
            let mut q = Query {
                sn: pn.sn,
                device,
                attribute: attr,
                extension: ext,
                adapter: None,
                branches: &[],
                bus: None,
                system: self,
            };
            return f(&mut q);
        }
        let conn = self.find_bus(pn)?;
        let _slot = attr.needs_lock().then(|| self.locks.acquire(conn.index(), pn.sn));
        self.gate(&conn)?;
        let mut bus = conn.lock();
        let mut q = Query {
            sn: pn.sn,
            device,
            attribute: attr,
            extension: ext,
            adapter: Some(conn.index()),
            branches: &pn.branches,
            bus: Some(&mut **bus),
            system: self,
        };
        let res = f(&mut q);
        drop(bus);
        conn.record(&res);
        if res.is_err() && pn.bus.is_none() {
            // It may have moved
            self.cache.delete_device(pn.sn);
        }
        res
    }

    /// Run `f` once on every adapter `pn` covers, for devices that address
    /// a whole bus. Never cached, and no device lock.
    fn broadcast<T>(
        &self,
        pn: &ParsedName,
        device: &'static DeviceDescriptor,
        attr: &'static AttributeDescriptor,
        ext: Extension,
        mut f: impl FnMut(&mut Query<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        let adapters = match pn.bus {
            Some(b) => vec![self
                .adapter(b)
                .ok_or_else(|| Error::NotFound(format!("bus.{}: {}", b, NO_BUS)))?],
            None => self.adapters().to_vec(),
        };
        let mut out = Vec::with_capacity(adapters.len());
        for conn in adapters {
            self.gate(&conn)?;
            let res = {
                let mut bus = conn.lock();
                let mut q = Query {
                    sn: pn.sn,
                    device,
                    attribute: attr,
                    extension: ext,
                    adapter: Some(conn.index()),
                    branches: &pn.branches,
                    bus: Some(&mut **bus),
                    system: self,
                };
                f(&mut q)
            };
            conn.record(&res);
            out.push(res?);
        }
        Ok(out)
    }

    /// Drop every cached value of `attr`
    fn invalidate(&self, pn: &ParsedName, device: &DeviceDescriptor, attr: &AttributeDescriptor) {
        let elements = attr.aggregate.map_or(0, |ag| ag.elements);
        let exts = [Extension::None, Extension::All, Extension::Byte]
            .into_iter()
            .chain((0..elements).map(Extension::Index));
        for ext in exts {
            let key = CacheKey::property(pn.sn, device, attr, ext);
            let _ = self.cache.delete(&key, attr.change);
        }
    }
}

/// Device and attribute `pn` names
fn target(pn: &ParsedName) -> Result<(&'static DeviceDescriptor, &'static AttributeDescriptor)> {
    let device = pn
        .device
        .ok_or_else(|| Error::Invalid(format!("{}: {}", pn.path, IS_DIRECTORY)))?;
    match pn.attribute {
        Some(attr) if !attr.is_dir() => Ok((device, attr)),
        _ => Err(Error::Invalid(format!("{}: {}", pn.path, IS_DIRECTORY))),
    }
}

fn bad_value(pn: &ParsedName) -> Error {
    Error::Invalid(format!("{}: {}", pn.path, BAD_VALUE))
}

/// Bus wide values are flags, set if they are on any adapter
fn either(attr: &AttributeDescriptor, values: Vec<Vec<u8>>) -> Vec<u8> {
    values.into_iter().fold(vec![0; attr.length], |mut acc, v| {
        for (a, b) in acc.iter_mut().zip(v) {
            *a |= b;
        }
        acc
    })
}

/// Extension a read function is called with for `ext`
pub(crate) fn unit_extension(attr: &AttributeDescriptor, ext: Extension) -> Extension {
    match attr.aggregate {
        None => Extension::None,
        Some(ag) if ag.layout == Layout::Aggregate => Extension::All,
        Some(_) => ext,
    }
}

/// Size of one element of an aggregate
fn element_size(attr: &AttributeDescriptor) -> usize {
    match attr.format {
        Format::Bitfield | Format::YesNo => 1,
        _ => attr.length,
    }
}

/// Bits as one byte each, least significant first, packed
fn pack(elements: &[u8]) -> u32 {
    elements
        .iter()
        .take(32)
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (u32::from(b != 0) << i))
}

fn unpack(packed: &[u8], elements: usize) -> Result<Vec<u8>> {
    let mut b = [0u8; 4];
    let n = packed.len().min(4);
    if n == 0 {
        return Err(Error::Invalid(BAD_VALUE.into()));
    }
    b[..n].copy_from_slice(&packed[..n]);
    let bits = u32::from_le_bytes(b);
    Ok((0..elements.min(32)).map(|i| ((bits >> i) & 1) as u8).collect())
}

/// Pick `ext` out of an aggregate read as a whole
fn split(attr: &AttributeDescriptor, elements: usize, full: &[u8], ext: Extension) -> Result<Vec<u8>> {
    if attr.format == Format::Bitfield {
        let bits = unpack(full, elements)?;
        return match ext {
            Extension::Index(i) => bits
                .get(i)
                .map(|&b| vec![b])
                .ok_or_else(|| Error::Invalid(format!("{}: {}", attr.name, BAD_EXTENSION))),
            Extension::Byte => Ok(pack(&bits).to_le_bytes().to_vec()),
            _ => Ok(bits),
        };
    }
    match ext {
        Extension::Index(i) => {
            let size = element_size(attr);
            full.get(i * size..(i + 1) * size)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| Error::Protocol(format!("{} is too short for element {}", attr.name, i)))
        }
        _ => Ok(full.to_vec()),
    }
}

/// Build the whole aggregate value to write from `data` written to `ext`.
///
/// `full` is the current value, only needed when writing one element.
fn merge(
    attr: &AttributeDescriptor,
    elements: usize,
    full: Vec<u8>,
    ext: Extension,
    data: &[u8],
) -> Result<Vec<u8>> {
    let bad = || Error::Invalid(format!("{}: {}", attr.name, BAD_VALUE));
    if attr.format == Format::Bitfield {
        let bits = match ext {
            Extension::Index(i) => {
                let mut bits = unpack(&full, elements)?;
                let bit = bits
                    .get_mut(i)
                    .ok_or_else(|| Error::Invalid(format!("{}: {}", attr.name, BAD_EXTENSION)))?;
                *bit = u8::from(*data.first().ok_or_else(bad)? != 0);
                bits
            }
            Extension::Byte => unpack(data, elements)?,
            _ if data.len() == elements => data.to_vec(),
            _ => return Err(bad()),
        };
        return Ok(pack(&bits).to_le_bytes().to_vec());
    }
    let size = element_size(attr);
    match ext {
        Extension::Index(i) => {
            let mut full = full;
            let dst = full.get_mut(i * size..(i + 1) * size).ok_or_else(bad)?;
            if data.len() != size {
                return Err(bad());
            }
            dst.copy_from_slice(data);
            Ok(full)
        }
        _ if data.len() == size * elements => Ok(data.to_vec()),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::fake::{FakeBus, FakeDevice, FakeHandle},
        cache::ManualClock,
        types::Volatility,
    };
    use std::{thread, time::Duration};

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    const SWITCH: &str = "/3A.FEEDDCCBBAA0";

    fn switch() -> SerialNumber {
        SerialNumber::new(0x3A, [0xFE, 0xED, 0xDC, 0xCB, 0xBA, 0xA0])
    }

    fn system() -> (OneWire, FakeHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let ow = OneWire::with_parts(Config::default(), Registry::default(), clock.clone());
        let bus = FakeBus::new("fake0");
        let h = bus.handle();
        h.add(FakeDevice::new(switch()));
        ow.add_adapter(Box::new(bus));
        (ow, h, clock)
    }

    fn read(ow: &OneWire, path: &str) -> crate::error::Result<Vec<u8>> {
        ow.read(&ow.parse_path(path)?)
    }

    fn write(ow: &OneWire, path: &str, data: &[u8]) -> crate::error::Result<()> {
        ow.write(&ow.parse_path(path)?, data)
    }

    #[test]
    fn generic_attributes() -> Result<()> {
        let (ow, _, _) = system();
        assert_eq!(read(&ow, &format!("{}/address", SWITCH))?.len(), 16);
        assert_eq!(read(&ow, &format!("{}/family", SWITCH))?, b"3A");
        assert_eq!(read(&ow, &format!("{}/id", SWITCH))?, b"FEEDDCCBBAA0");
        assert_eq!(read(&ow, &format!("{}/r_id", SWITCH))?, b"A0BACBDCEDFE");
        assert_eq!(read(&ow, &format!("{}/type", SWITCH))?, b"DS2413");
        assert_eq!(read(&ow, &format!("{}/present", SWITCH))?, [1]);
        Ok(())
    }

    #[test]
    fn missing_device() -> Result<()> {
        let (ow, _, _) = system();
        let err = read(&ow, "/10.AABBCCDDEEFF/family").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!ow.present(&ow.parse_path("/10.AABBCCDDEEFF")?)?);
        assert!(ow.present(&ow.parse_path(SWITCH)?)?);
        Ok(())
    }

    #[test]
    fn switch_elements() -> Result<()> {
        let (ow, h, _) = system();
        // Pin A pulled low from outside
        h.set_inputs(switch(), 0b10);
        assert_eq!(read(&ow, &format!("{}/sensed.ALL", SWITCH))?, [0, 1]);
        assert_eq!(read(&ow, &format!("{}/sensed.A", SWITCH))?, [0]);
        assert_eq!(read(&ow, &format!("{}/sensed.BYTE", SWITCH))?, 2u32.to_le_bytes());
        assert_eq!(read(&ow, &format!("{}/PIO.A", SWITCH))?, [1]);
        Ok(())
    }

    #[test]
    fn write_one_element() -> Result<()> {
        let (ow, h, _) = system();
        write(&ow, &format!("{}/PIO.B", SWITCH), &[1])?;
        // B on, so its latch is 0
        assert_eq!(h.latch(switch()), Some(0b01));
        assert_eq!(read(&ow, &format!("{}/PIO.ALL", SWITCH))?, [0, 1]);
        assert_eq!(read(&ow, &format!("{}/latch.ALL", SWITCH))?, [1, 0]);
        write(&ow, &format!("{}/PIO.ALL", SWITCH), &[1, 1])?;
        assert_eq!(h.latch(switch()), Some(0));
        assert!(write(&ow, &format!("{}/PIO.ALL", SWITCH), &[1]).is_err());
        assert!(matches!(
            write(&ow, &format!("{}/sensed.A", SWITCH), &[1]),
            Err(Error::ReadOnly)
        ));
        Ok(())
    }

    #[test]
    fn sibling_elements_written_together() -> Result<()> {
        let (ow, h, _) = system();
        let a = ow.parse_path(&format!("{}/PIO.A", SWITCH))?;
        let b = ow.parse_path(&format!("{}/PIO.B", SWITCH))?;
        for _ in 0..100 {
            write(&ow, &format!("{}/PIO.ALL", SWITCH), &[0, 0])?;
            let (ra, rb) = thread::scope(|s| {
                let ta = s.spawn(|| ow.write(&a, &[1]));
                let tb = s.spawn(|| ow.write(&b, &[1]));
                (ta.join(), tb.join())
            });
            assert!(matches!((ra, rb), (Ok(Ok(())), Ok(Ok(())))));
            // Both on, neither write lost
            assert_eq!(h.latch(switch()), Some(0));
        }
        Ok(())
    }

    #[test]
    fn wide_bitfield_elements() {
        static WIDE: AttributeDescriptor =
            AttributeDescriptor::new("wide", 1, Format::Bitfield, Volatility::Volatile).aggregate(
                40,
                crate::types::Naming::Numbers,
                Layout::Aggregate,
            );
        let full = u32::MAX.to_le_bytes();
        assert_eq!(split(&WIDE, 40, &full, Extension::Index(31)).unwrap(), [1]);
        assert!(matches!(
            split(&WIDE, 40, &full, Extension::Index(35)),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            merge(&WIDE, 40, full.to_vec(), Extension::Index(35), &[0]),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn cached_until_written() -> Result<()> {
        let (ow, h, _) = system();
        assert_eq!(read(&ow, &format!("{}/PIO.A", SWITCH))?, [0]);
        // Changed behind our back, the cache doesn't know yet
        h.set_inputs(switch(), 0b10);
        assert_eq!(read(&ow, &format!("{}/PIO.A", SWITCH))?, [0]);
        assert_eq!(read(&ow, &format!("/uncached{}/PIO.A", SWITCH))?, [1]);
        //
        write(&ow, &format!("{}/PIO.B", SWITCH), &[0])?;
        let key = CacheKey::property(
            switch(),
            &crate::devices::DS2413,
            ow.parse_path(&format!("{}/PIO.A", SWITCH))?.attribute.unwrap(),
            Extension::All,
        );
        assert!(ow.cache().get(&key, Volatility::Volatile).is_err());
        Ok(())
    }

    #[test]
    fn volatile_values_expire() -> Result<()> {
        let (ow, h, clock) = system();
        assert_eq!(read(&ow, &format!("{}/sensed.A", SWITCH))?, [1]);
        h.set_inputs(switch(), 0b10);
        clock.advance(Duration::from_secs(16));
        assert_eq!(read(&ow, &format!("{}/sensed.A", SWITCH))?, [0]);
        Ok(())
    }

    #[test]
    fn directories_arent_read() -> Result<()> {
        let (ow, _, _) = system();
        assert!(matches!(read(&ow, SWITCH), Err(Error::Invalid(_))));
        assert!(matches!(read(&ow, "/"), Err(Error::Invalid(_))));
        Ok(())
    }

    #[test]
    fn structure_descriptions() -> Result<()> {
        let (ow, _, _) = system();
        let d = String::from_utf8(read(&ow, "/structure/3A/PIO.B")?)?;
        assert_eq!(d, "y,000001,000002,rw,000001,v,");
        Ok(())
    }

    #[test]
    fn affinity_is_recorded() -> Result<()> {
        let (ow, _, _) = system();
        read(&ow, &format!("{}/present", SWITCH))?;
        assert_eq!(ow.cache().get_device(switch()), Some(0));
        Ok(())
    }

    #[test]
    fn unreachable_adapter() -> Result<()> {
        let (ow, _, _) = system();
        let err = read(&ow, &format!("/bus.3{}/family", SWITCH)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        Ok(())
    }
}
