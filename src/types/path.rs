//! Logical paths into the 1-Wire namespace
//!
//! # Layout
//!
//! ```text
//! /                               all devices on all buses
//! /bus.1                          devices on adapter 1 only
//! /uncached/...                   same, bypassing the caches
//! /alarm                          devices currently signaling an alarm
//! /10.AABBCCDDEEFF                one device
//! /10.AABBCCDDEEFF/temperature    one attribute
//! /3A.0000000012AB/PIO.A          one element of an aggregate
//! /1F.0000000000A1/main           devices behind a coupler's main branch
//! /simultaneous/temperature       every thermometer on every bus at once
//! /statistics/cache/hits          in-memory pseudo devices
//! ```
use super::{AttributeDescriptor, DeviceDescriptor, DeviceFlags, Extension, Format, Naming, SerialNumber};
use crate::{
    devices::SIMULTANEOUS,
    error::{text::*, Error, Result},
    registry::Registry,
};
use std::fmt;

/// The in-memory areas next to the real device tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Area {
    /// Real devices on real buses
    Real,
    Settings,
    System,
    Statistics,
    Structure,
}

impl Area {
    /// The in-memory areas, in listing order
    pub const META: [Area; 4] = [Area::Settings, Area::System, Area::Statistics, Area::Structure];

    pub fn name(&self) -> &'static str {
        match self {
            Area::Real => "",
            Area::Settings => "settings",
            Area::System => "system",
            Area::Statistics => "statistics",
            Area::Structure => "structure",
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        Self::META.iter().copied().find(|a| a.name() == s)
    }
}

/// Coupler branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Branch {
    Main,
    Aux,
}

impl Branch {
    pub fn name(&self) -> &'static str {
        match self {
            Branch::Main => "main",
            Branch::Aux => "aux",
        }
    }

    /// Number stored in directory cache keys
    pub(crate) fn number(&self) -> u8 {
        match self {
            Branch::Main => 0,
            Branch::Aux => 1,
        }
    }
}

/// One coupler branch along a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchPoint {
    pub sn: SerialNumber,
    pub branch: Branch,
}

/// A path, resolved against a [`Registry`].
#[derive(Clone)]
pub struct ParsedName {
    /// The path as given
    pub path: String,

    /// Explicit `bus.N`
    pub bus: Option<usize>,

    /// Under `/uncached`
    pub uncached: bool,

    /// Under `/alarm`
    pub alarm: bool,

    pub area: Area,

    /// Couplers passed through to get here, outermost first
    pub branches: Vec<BranchPoint>,

    /// Selected device, if any. For pseudo devices `sn` is all zero.
    pub device: Option<&'static DeviceDescriptor>,

    pub sn: SerialNumber,

    /// Selected subdirectory of `device`
    pub subdir: Option<&'static AttributeDescriptor>,

    /// Selected attribute of `device`
    pub attribute: Option<&'static AttributeDescriptor>,

    pub extension: Extension,
}

// Public
impl ParsedName {
    /// Parse `path` into its parts.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] if a segment isn't valid where it appears
    /// - [`Error::NotFound`] if a device area or attribute doesn't exist
    pub fn parse(path: &str, registry: &Registry) -> Result<Self> {
        let mut pn = Self::root(path);
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            pn.push(seg, registry)?;
        }
        Ok(pn)
    }

    /// Whether this names a directory rather than an attribute
    pub fn is_dir(&self) -> bool {
        match self.attribute {
            Some(a) => a.is_dir(),
            None => true,
        }
    }

    /// Whether this is the top of a bus, all buses, or a branch.
    ///
    /// That is, listing it needs a bus search.
    pub fn is_bus_dir(&self) -> bool {
        self.area == Area::Real && self.device.is_none()
    }

    /// Whether this is the very top, `/` or `/uncached`
    pub fn is_root(&self) -> bool {
        self.is_bus_dir() && self.bus.is_none() && self.branches.is_empty() && !self.alarm
    }

    /// The same path with a different extension, for sibling elements of an
    /// aggregate.
    pub fn with_extension(&self, extension: Extension) -> Self {
        let mut pn = self.clone();
        pn.extension = extension;
        pn
    }
}

// Private
impl ParsedName {
    fn root(path: &str) -> Self {
        Self {
            path: path.into(),
            bus: None,
            uncached: false,
            alarm: false,
            area: Area::Real,
            branches: Vec::new(),
            device: None,
            sn: SerialNumber::default(),
            subdir: None,
            attribute: None,
            extension: Extension::None,
        }
    }

    fn invalid(&self, why: &str) -> Error {
        Error::InvalidPath(self.path.clone(), why.into())
    }

    fn push(&mut self, seg: &str, registry: &Registry) -> Result<()> {
        if self.attribute.is_some() {
            return Err(self.invalid(BAD_SEGMENT));
        }
        if let Some(dev) = self.device {
            return self.push_attribute(dev, seg);
        }
        if self.area != Area::Real {
            let dev = match self.area {
                Area::Structure => u8::from_str_radix(seg, 16)
                    .ok()
                    .and_then(|code| registry.chip(code)),
                area => registry.pseudo(area, seg),
            };
            self.device = Some(dev.ok_or_else(|| Error::NotFound(self.path.clone()))?);
            return Ok(());
        }
        let fresh = self.branches.is_empty() && !self.alarm;
        if let Some(n) = seg.strip_prefix("bus.") {
            if self.bus.is_some() || !fresh {
                return Err(self.invalid(BAD_SEGMENT));
            }
            self.bus = Some(n.parse().map_err(|_| self.invalid(NO_BUS))?);
            return Ok(());
        }
        match seg {
            "uncached" if !self.uncached && fresh => self.uncached = true,
            "alarm" if !self.alarm => self.alarm = true,
            "simultaneous" if !self.alarm => self.device = Some(&SIMULTANEOUS),
            s if fresh && !self.uncached && Area::from_name(s).is_some() => {
                self.area = Area::from_name(s).unwrap_or(Area::Real);
            }
            s => {
                let sn: SerialNumber = s.parse().map_err(|_| self.invalid(BAD_SEGMENT))?;
                self.sn = sn;
                self.device = Some(registry.device(sn.family()));
            }
        }
        Ok(())
    }

    fn push_attribute(&mut self, dev: &'static DeviceDescriptor, seg: &str) -> Result<()> {
        if self.area == Area::Real && self.subdir.is_none() && dev.flags.contains(DeviceFlags::BRANCH) {
            let branch = match seg {
                "main" => Some(Branch::Main),
                "aux" => Some(Branch::Aux),
                _ => None,
            };
            if let Some(branch) = branch {
                self.branches.push(BranchPoint { sn: self.sn, branch });
                self.device = None;
                self.sn = SerialNumber::default();
                return Ok(());
            }
        }
        let full = match self.subdir {
            Some(sub) => format!("{}/{}", sub.name, seg),
            None => seg.to_owned(),
        };
        if let Some(attr) = dev.attribute(&full) {
            if attr.format == Format::Subdir {
                if self.subdir.is_some() {
                    return Err(self.invalid(BAD_SEGMENT));
                }
                self.subdir = Some(attr);
            } else if attr.aggregate.is_none() {
                self.attribute = Some(attr);
            } else {
                return Err(self.invalid(BAD_EXTENSION));
            }
            return Ok(());
        }
        let (base, ext) = full
            .rsplit_once('.')
            .ok_or_else(|| Error::NotFound(format!("{}: {}", self.path, NO_ATTRIBUTE)))?;
        let attr = dev
            .attribute(base)
            .ok_or_else(|| Error::NotFound(format!("{}: {}", self.path, NO_ATTRIBUTE)))?;
        let ag = attr.aggregate.ok_or_else(|| self.invalid(BAD_EXTENSION))?;
        self.extension = match ext {
            "ALL" => Extension::All,
            "BYTE" if attr.format == Format::Bitfield => Extension::Byte,
            e => {
                let i = match ag.naming {
                    Naming::Numbers => e.parse::<usize>().ok(),
                    Naming::Letters => match e.as_bytes() {
                        [c @ b'A'..=b'Z'] => Some(usize::from(c - b'A')),
                        _ => None,
                    },
                };
                match i {
                    Some(i) if i < ag.elements => Extension::Index(i),
                    _ => return Err(self.invalid(BAD_EXTENSION)),
                }
            }
        };
        self.attribute = Some(attr);
        Ok(())
    }
}

impl fmt::Debug for ParsedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedName")
            .field("path", &self.path)
            .field("bus", &self.bus)
            .field("area", &self.area)
            .field("device", &self.device.map(|d| d.name))
            .field("sn", &self.sn)
            .field("attribute", &self.attribute.map(|a| a.name))
            .field("extension", &self.extension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceKind;

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn parse(path: &str) -> crate::error::Result<ParsedName> {
        ParsedName::parse(path, &Registry::default())
    }

    #[test]
    fn root_and_buses() -> Result<()> {
        let pn = parse("/")?;
        assert!(pn.is_root());
        let pn = parse("/bus.2")?;
        assert_eq!(pn.bus, Some(2));
        assert!(pn.is_bus_dir() && !pn.is_root());
        let pn = parse("/uncached")?;
        assert!(pn.uncached && pn.is_root());
        assert!(parse("/bus.x").is_err());
        assert!(parse("/bus.0/bus.1").is_err());
        Ok(())
    }

    #[test]
    fn devices_and_attributes() -> Result<()> {
        let pn = parse("/3A.0000000012AB/PIO.B")?;
        assert_eq!(pn.sn.family(), 0x3A);
        assert_eq!(pn.device.map(|d| d.name), Some("DS2413"));
        assert_eq!(pn.attribute.map(|a| a.name), Some("PIO"));
        assert_eq!(pn.extension, Extension::Index(1));
        //
        assert_eq!(parse("/3A.0000000012AB/sensed.ALL")?.extension, Extension::All);
        assert_eq!(parse("/3A.0000000012AB/sensed.BYTE")?.extension, Extension::Byte);
        assert!(parse("/3A.0000000012AB/PIO").is_err());
        assert!(parse("/3A.0000000012AB/PIO.C").is_err());
        assert!(parse("/3A.0000000012AB/nothing").is_err());
        assert!(parse("/3A.0000000012AB/type/more").is_err());
        //
        let pn = parse("/bus.0/10.AABBCCDDEEFF/address")?;
        assert_eq!(pn.bus, Some(0));
        assert_eq!(pn.extension, Extension::None);
        Ok(())
    }

    #[test]
    fn unknown_family_still_parses() -> Result<()> {
        let pn = parse("/7E.000000000001/family")?;
        assert_eq!(pn.device.map(|d| d.code), Some(0));
        Ok(())
    }

    #[test]
    fn branches() -> Result<()> {
        let pn = parse("/1F.0000000000A1/aux/3A.0000000012AB/sensed.A")?;
        assert_eq!(pn.branches.len(), 1);
        assert_eq!(pn.branches[0].branch, Branch::Aux);
        assert_eq!(pn.branches[0].sn.family(), 0x1F);
        assert_eq!(pn.sn.family(), 0x3A);
        //
        let pn = parse("/1F.0000000000A1/main")?;
        assert!(pn.is_bus_dir());
        assert!(!pn.is_root());
        // Only couplers have branches
        assert!(parse("/3A.0000000012AB/main").is_err());
        Ok(())
    }

    #[test]
    fn simultaneous() -> Result<()> {
        let pn = parse("/bus.1/simultaneous/temperature")?;
        assert_eq!(pn.bus, Some(1));
        assert_eq!(pn.device.map(|d| d.kind), Some(DeviceKind::Bus));
        assert_eq!(pn.attribute.map(|a| a.name), Some("temperature"));
        let pn = parse("/1F.0000000000A1/main/simultaneous")?;
        assert_eq!(pn.branches.len(), 1);
        assert!(pn.is_dir() && !pn.is_bus_dir());
        assert!(parse("/alarm/simultaneous").is_err());
        Ok(())
    }

    #[test]
    fn areas() -> Result<()> {
        let pn = parse("/statistics/cache/hits")?;
        assert_eq!(pn.area, Area::Statistics);
        assert_eq!(pn.attribute.map(|a| a.name), Some("hits"));
        let pn = parse("/structure/3A/PIO.A")?;
        assert_eq!(pn.device.map(|d| d.code), Some(0x3A));
        assert!(parse("/statistics/nothing").is_err());
        assert!(parse("/bus.0/1F.0000000000A1/main/settings").is_err());
        Ok(())
    }
}
