//! Directory listings and device affinity
//!
//! A listing is cached as one blob of 8 byte addresses per adapter and
//! parent path, written once per complete scan.
use super::{AttrId, Cache, CacheKey, Stored};
use crate::types::{BranchPoint, Extension, SerialNumber, Volatility};

/// Which directory a listing belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirKey {
    pub bus: usize,

    /// All zero for the top of the bus, otherwise the innermost coupler's
    /// address with the branch number as the last byte.
    pub path: [u8; 8],
}

impl DirKey {
    pub fn new(bus: usize, branches: &[BranchPoint]) -> Self {
        let path = match branches.last() {
            Some(bp) => {
                let mut p = bp.sn.to_bytes();
                p[7] = bp.branch.number();
                p
            }
            None => [0; 8],
        };
        Self { bus, path }
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey {
            sn: self.path,
            attr: AttrId::Directory(self.bus),
            extension: Extension::None,
        }
    }
}

fn device_key(sn: SerialNumber) -> CacheKey {
    CacheKey {
        sn: sn.to_bytes(),
        attr: AttrId::Device,
        extension: Extension::None,
    }
}

impl Cache {
    /// Cache a complete listing. An empty one is remembered as empty.
    pub fn put_directory(&self, dir: &DirKey, devices: &[SerialNumber]) -> Stored {
        let blob: Vec<u8> = devices.iter().flat_map(|sn| sn.to_bytes()).collect();
        self.put(dir.cache_key(), Volatility::Directory, &blob)
    }

    /// Cached listing, or [`None`] if there's no current one.
    pub fn get_directory(&self, dir: &DirKey) -> Option<Vec<SerialNumber>> {
        let blob = self.get(&dir.cache_key(), Volatility::Directory).ok()?;
        if blob.len() % SerialNumber::LEN != 0 {
            return None;
        }
        let list = blob
            .chunks_exact(SerialNumber::LEN)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                SerialNumber::from_bytes(b)
            })
            .collect();
        Some(list)
    }

    pub fn delete_directory(&self, dir: &DirKey) {
        let _ = self.delete(&dir.cache_key(), Volatility::Directory);
    }

    /// Remember `sn` was found on adapter `bus`
    pub fn put_device(&self, sn: SerialNumber, bus: usize) -> Stored {
        let Ok(bus) = u32::try_from(bus) else {
            return Stored::NotCached;
        };
        self.put(device_key(sn), Volatility::Presence, &bus.to_le_bytes())
    }

    /// Adapter `sn` was last found on
    pub fn get_device(&self, sn: SerialNumber) -> Option<usize> {
        let blob = self.get(&device_key(sn), Volatility::Presence).ok()?;
        let bytes: [u8; 4] = blob.as_slice().try_into().ok()?;
        usize::try_from(u32::from_le_bytes(bytes)).ok()
    }

    pub fn delete_device(&self, sn: SerialNumber) {
        let _ = self.delete(&device_key(sn), Volatility::Presence);
    }
}
