//! Device family registry
//!
//! Maps family codes to [`DeviceDescriptor`]s, and names to the pseudo
//! devices of the in-memory areas. Built once at startup and read only after
//! that, so lookups need no locking.
use crate::{
    devices,
    types::{Area, DeviceDescriptor},
};
use std::collections::BTreeMap;

/// Read only table of known device families
#[derive(Debug)]
pub struct Registry {
    chips: BTreeMap<u8, &'static DeviceDescriptor>,
    pseudo: BTreeMap<(Area, &'static str), &'static DeviceDescriptor>,
    unknown: &'static DeviceDescriptor,
}

impl Registry {
    /// Start from the built in families and pseudo devices.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            registry: Self {
                chips: BTreeMap::new(),
                pseudo: BTreeMap::new(),
                unknown: &devices::UNKNOWN,
            },
        }
        .with_builtins()
    }

    /// Descriptor for `family`, or the generic one for unknown families.
    pub fn device(&self, family: u8) -> &'static DeviceDescriptor {
        self.chip(family).unwrap_or(self.unknown)
    }

    /// Descriptor for `family`, only if it's known.
    pub fn chip(&self, family: u8) -> Option<&'static DeviceDescriptor> {
        self.chips.get(&family).copied()
    }

    /// Known families, by family code.
    pub fn chips(&self) -> impl Iterator<Item = &'static DeviceDescriptor> + '_ {
        self.chips.values().copied()
    }

    /// Pseudo device `name` in `area`.
    pub fn pseudo(&self, area: Area, name: &str) -> Option<&'static DeviceDescriptor> {
        self.pseudo
            .iter()
            .find(|((a, n), _)| *a == area && *n == name)
            .map(|(_, d)| *d)
    }

    /// Everything listed directly under `area`, sorted.
    ///
    /// For [`Area::Structure`] that's every known family.
    pub fn area(&self, area: Area) -> Vec<&'static DeviceDescriptor> {
        match area {
            Area::Real => Vec::new(),
            Area::Structure => self.chips().collect(),
            area => self
                .pseudo
                .iter()
                .filter(|((a, _), _)| *a == area)
                .map(|(_, d)| *d)
                .collect(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builds a [`Registry`], letting chip drivers register their families.
#[derive(Debug)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    /// Register a chip family, replacing any built in one with the same code.
    pub fn register(mut self, device: &'static DeviceDescriptor) -> Self {
        self.registry.chips.insert(device.code, device);
        self
    }

    /// Register a pseudo device under `area`.
    pub fn register_pseudo(mut self, area: Area, device: &'static DeviceDescriptor) -> Self {
        self.registry.pseudo.insert((area, device.name), device);
        self
    }

    pub fn build(self) -> Registry {
        self.registry
    }

    fn with_builtins(mut self) -> Self {
        for dev in devices::CHIPS {
            self = self.register(dev);
        }
        for (area, dev) in devices::PSEUDO {
            self = self.register_pseudo(*area, dev);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceFlags, DeviceKind};

    static CUSTOM: DeviceDescriptor = DeviceDescriptor {
        code: 0x10,
        name: "CUSTOM",
        kind: DeviceKind::Chip,
        flags: DeviceFlags::empty(),
        attributes: &[],
    };

    #[test]
    fn lookup() {
        let reg = Registry::default();
        assert_eq!(reg.device(0x3A).name, "DS2413");
        assert_eq!(reg.device(0x7E).code, 0);
        assert!(reg.chip(0x7E).is_none());
        assert!(reg.pseudo(Area::Statistics, "cache").is_some());
        assert!(reg.pseudo(Area::Settings, "cache").is_none());
    }

    #[test]
    fn registered_driver_wins() {
        let reg = Registry::builder().register(&CUSTOM).build();
        assert_eq!(reg.device(0x10).name, "CUSTOM");
    }

    #[test]
    fn areas_sorted() {
        let reg = Registry::default();
        let codes: Vec<_> = reg.area(Area::Structure).iter().map(|d| d.code).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
        assert!(!reg.area(Area::Statistics).is_empty());
        assert!(reg.area(Area::Real).is_empty());
    }
}
