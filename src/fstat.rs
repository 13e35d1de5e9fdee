//! File attributes of paths
//!
//! What a filesystem binding needs to answer `stat` without touching a bus:
//! whether a path is a directory, its permissions, how large a value is, and
//! a modification time guessed from how often the value changes.
use crate::{
    error::{text::*, Error, Result},
    system::OneWire,
    types::{Area, AttributeDescriptor, Extension, Format, ParsedName, Volatility},
};
use std::time::SystemTime;

/// Directory or regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    File,
}

/// Attributes of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub file_type: FileType,

    /// Unix permission bits
    pub mode: u32,

    /// Size of the value in bytes, `0` for directories
    pub size: u64,

    pub modified: SystemTime,
}

// Public
impl OneWire {
    /// Attributes of the path `pn`.
    ///
    /// Devices aren't looked for, any well formed path has attributes.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if `pn` names a `bus.N` that doesn't exist
    pub fn fstat(&self, pn: &ParsedName) -> Result<FileStat> {
        if let Some(b) = pn.bus {
            if self.adapter(b).is_none() {
                return Err(Error::NotFound(format!("bus.{}: {}", b, NO_BUS)));
            }
        }
        let dir = |modified| FileStat {
            file_type: FileType::Directory,
            mode: 0o755,
            size: 0,
            modified,
        };
        let attr = match (pn.device, pn.attribute) {
            (None, _) => return Ok(dir(self.started())),
            (Some(_), None) => return Ok(dir(self.listed())),
            (Some(_), Some(a)) if a.is_dir() => return Ok(dir(self.listed())),
            (Some(_), Some(a)) => a,
        };
        let mut mode = 0;
        if attr.read.is_some() || pn.area == Area::Structure {
            mode |= 0o444;
        }
        if attr.write.is_some() && pn.area != Area::Structure {
            mode |= 0o222;
        }
        let modified = match attr.change {
            Volatility::Volatile | Volatility::Second | Volatility::Statistic => SystemTime::now(),
            Volatility::Stable => self.listed(),
            _ => self.started(),
        };
        Ok(FileStat {
            file_type: FileType::File,
            mode,
            size: value_len(attr, pn.extension) as u64,
            modified,
        })
    }
}

/// Bytes a read of `attr` at `ext` returns
fn value_len(attr: &AttributeDescriptor, ext: Extension) -> usize {
    let element = match attr.format {
        Format::Bitfield | Format::YesNo => 1,
        _ => attr.length,
    };
    match (attr.aggregate, ext) {
        (None, _) => attr.length,
        (Some(_), Extension::Byte) => 4,
        (Some(_), Extension::Index(_)) => element,
        (Some(ag), _) => element * ag.elements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::fake::{FakeBus, FakeDevice},
        config::Config,
        types::SerialNumber,
    };

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    fn system() -> OneWire {
        let ow = OneWire::new(Config::default());
        let bus = FakeBus::new("fake0");
        bus.handle()
            .add(FakeDevice::new(SerialNumber::new(0x3A, [0xFE, 0xED, 0xDC, 0xCB, 0xBA, 0xA0])));
        ow.add_adapter(Box::new(bus));
        ow
    }

    fn stat(ow: &OneWire, path: &str) -> crate::error::Result<FileStat> {
        ow.fstat(&ow.parse_path(path)?)
    }

    #[test]
    fn directories() -> Result<()> {
        let ow = system();
        let root = stat(&ow, "/")?;
        assert_eq!((root.file_type, root.mode, root.size), (FileType::Directory, 0o755, 0));
        assert_eq!(root.modified, ow.started());
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0")?.file_type, FileType::Directory);
        assert_eq!(stat(&ow, "/1F.0000000000A1/main")?.file_type, FileType::Directory);
        assert_eq!(stat(&ow, "/statistics/read")?.file_type, FileType::Directory);
        assert!(matches!(stat(&ow, "/bus.4"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn files() -> Result<()> {
        let ow = system();
        let pio = stat(&ow, "/3A.FEEDDCCBBAA0/PIO.A")?;
        assert_eq!((pio.file_type, pio.mode, pio.size), (FileType::File, 0o666, 1));
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0/PIO.ALL")?.size, 2);
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0/PIO.BYTE")?.size, 4);
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0/sensed.A")?.mode, 0o444);
        assert_eq!(stat(&ow, "/simultaneous/temperature")?.mode, 0o222);
        assert_eq!(stat(&ow, "/structure/3A/PIO.A")?.mode, 0o444);
        // No bus traffic, so absent devices have attributes too
        assert_eq!(stat(&ow, "/10.AABBCCDDEEFF/address")?.size, 16);
        Ok(())
    }

    #[test]
    fn times_follow_volatility() -> Result<()> {
        let ow = system();
        let before = SystemTime::now();
        assert!(stat(&ow, "/3A.FEEDDCCBBAA0/PIO.A")?.modified >= before);
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0/type")?.modified, ow.started());
        //
        ow.dir(&ow.parse_path("/3A.FEEDDCCBBAA0")?, &mut |_: crate::dir::DirEntry| {})?;
        let listed = ow.listed();
        assert!(listed >= before);
        assert_eq!(stat(&ow, "/3A.FEEDDCCBBAA0")?.modified, listed);
        Ok(())
    }
}
