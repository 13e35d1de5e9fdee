//! Device and attribute descriptors
//!
//! Every device family is described by one static [`DeviceDescriptor`],
//! holding an ordered list of [`AttributeDescriptor`]s. These are built once
//! from static tables and never change, so they're shared as `&'static`
//! everywhere, including as part of cache keys.
use crate::{error::Result, system::Query};
use bitflags::bitflags;
use std::fmt;

/// Reads one attribute. Returns the raw value.
pub type ReadFn = fn(&mut Query<'_>) -> Result<Vec<u8>>;

/// Writes one attribute from a raw value.
pub type WriteFn = fn(&mut Query<'_>, &[u8]) -> Result<()>;

bitflags! {
    /// Device capabilities
    pub struct DeviceFlags: u32 {
        /// Takes part in the conditional (alarm) search
        const ALARM = 1;

        /// Can be addressed at overdrive speed
        const OVERDRIVE = 2;

        /// Coupler with switchable `main` and `aux` branches
        const BRANCH = 4;

        /// Temperature sensor, can join a simultaneous conversion
        const TEMPERATURE = 8;

        /// Voltage sensor, can join a simultaneous conversion
        const VOLTAGE = 16;

        /// Supports the resume ROM command
        const RESUME = 32;
    }
}

/// Where a device lives in the namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// A real chip found on a bus
    Chip,

    /// A pseudo device under one of the in-memory areas
    Pseudo,

    /// Commands for every device on a bus at once, like `simultaneous`
    Bus,
}

/// How an attribute's value is shaped.
///
/// Blobs are raw, integers little endian. Turning them into text is up to
/// whoever exposes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Integer,
    Unsigned,
    Float,
    Date,
    /// Packed bits, `u32` little endian. Elements are one byte, 0 or 1.
    Bitfield,
    Binary,
    /// One byte, 0 or 1
    YesNo,
    Ascii,
    /// A directory of other devices, like a coupler branch
    Directory,
    /// A directory of further attributes on the same device
    Subdir,
}

/// How often an attribute may change, which decides how long it's cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Volatility {
    /// Changes at any time. Short, configurable timeout.
    Volatile,

    /// Rarely changes. Longer timeout, also sets the generation lifespan.
    Stable,

    /// Clocks and counters. Nominally cached for one second.
    Second,

    /// Constant physical property, never cached because it's free.
    Static,

    /// Internal statistic, never cached.
    Statistic,

    /// Kept in the persistent store, survives generation flips.
    Persistent,

    /// Directory listings.
    Directory,

    /// Which adapter a device was last seen on.
    Presence,
}

/// How elements of an aggregate are named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// `page.0`, `page.1`, ...
    Numbers,

    /// `PIO.A`, `PIO.B`, ...
    Letters,
}

/// How elements of an aggregate are stored on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Read and written as one, and split into elements
    Aggregate,

    /// Read and written one element at a time, and joined for `.ALL`
    Separate,
}

/// Repeated, same shaped values under one attribute name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub elements: usize,
    pub naming: Naming,
    pub layout: Layout,
}

/// Which part of an attribute is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Extension {
    /// A plain attribute
    None,

    /// Packed bitfield of all elements, `.BYTE`
    Byte,

    /// All elements, `.ALL`
    All,

    /// One element
    Index(usize),
}

/// One attribute, which shows up as a file
#[derive(Clone, Copy)]
pub struct AttributeDescriptor {
    /// Name, with `/` separating a subdirectory from its members
    pub name: &'static str,

    /// Estimated size of one value, in bytes
    pub length: usize,

    pub aggregate: Option<Aggregate>,

    pub format: Format,

    pub change: Volatility,

    pub read: Option<ReadFn>,

    pub write: Option<WriteFn>,

    /// Free for the read and write functions, like a byte offset or a
    /// counter index shared between several attributes.
    pub data: usize,
}

impl AttributeDescriptor {
    pub const fn new(name: &'static str, length: usize, format: Format, change: Volatility) -> Self {
        Self {
            name,
            length,
            aggregate: None,
            format,
            change,
            read: None,
            write: None,
            data: 0,
        }
    }

    pub const fn aggregate(self, elements: usize, naming: Naming, layout: Layout) -> Self {
        Self {
            aggregate: Some(Aggregate {
                elements,
                naming,
                layout,
            }),
            ..self
        }
    }

    pub const fn read(self, f: ReadFn) -> Self {
        Self {
            read: Some(f),
            ..self
        }
    }

    pub const fn write(self, f: WriteFn) -> Self {
        Self {
            write: Some(f),
            ..self
        }
    }

    pub const fn data(self, data: usize) -> Self {
        Self { data, ..self }
    }

    /// Name without any subdirectory prefix
    pub fn base_name(&self) -> &'static str {
        match self.name.rsplit_once('/') {
            Some((_, base)) => base,
            None => self.name,
        }
    }

    /// Subdirectory this attribute lives in, if any
    pub fn subdir(&self) -> Option<&'static str> {
        self.name.rsplit_once('/').map(|(dir, _)| dir)
    }

    /// Whether this is listed as a directory rather than a file
    pub fn is_dir(&self) -> bool {
        matches!(self.format, Format::Directory | Format::Subdir)
    }

    /// Whether access must take a device lock slot.
    ///
    /// Directories and static or statistic data don't touch the device.
    pub fn needs_lock(&self) -> bool {
        !self.is_dir() && !matches!(self.change, Volatility::Static | Volatility::Statistic)
    }
}

impl fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("change", &self.change)
            .field("aggregate", &self.aggregate)
            .finish()
    }
}

/// A device family
#[derive(Debug)]
pub struct DeviceDescriptor {
    /// Family code, `0` for pseudo devices
    pub code: u8,

    /// Display name, like `DS2413`
    pub name: &'static str,

    pub kind: DeviceKind,

    pub flags: DeviceFlags,

    pub attributes: &'static [AttributeDescriptor],
}

impl DeviceDescriptor {
    /// Find a top level or subdirectory attribute by its full name
    pub fn attribute(&self, name: &str) -> Option<&'static AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes directly in `subdir`, or at the top level for [`None`]
    pub fn attributes_in<'a>(
        &'a self,
        subdir: Option<&'a str>,
    ) -> impl Iterator<Item = &'static AttributeDescriptor> + 'a {
        let attrs: &'static [AttributeDescriptor] = self.attributes;
        attrs.iter().filter(move |a| a.subdir() == subdir)
    }
}
