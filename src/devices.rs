//! Built in device families
//!
//! Only what the core needs itself lives here: the attributes every device
//! has, couplers for branching, bus wide conversions, and a small switch
//! driver. Real chip drivers
//! register their own descriptors through
//! [`RegistryBuilder::register`][crate::registry::RegistryBuilder::register].
use crate::types::{
    Area,
    AttributeDescriptor,
    DeviceDescriptor,
    DeviceFlags,
    DeviceKind,
    Format,
    Volatility,
};

/// Attribute table with the attributes every device has up front.
macro_rules! with_standard {
    ($($attr:expr),* $(,)?) => {
        &[
            $crate::types::AttributeDescriptor::new("address", 16, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_address),
            $crate::types::AttributeDescriptor::new("crc8", 2, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_crc8),
            $crate::types::AttributeDescriptor::new("family", 2, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_family),
            $crate::types::AttributeDescriptor::new("id", 12, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_id),
            $crate::types::AttributeDescriptor::new("present", 1, $crate::types::Format::YesNo, $crate::types::Volatility::Volatile)
                .read($crate::devices::generic::read_present),
            $crate::types::AttributeDescriptor::new("r_address", 16, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_r_address),
            $crate::types::AttributeDescriptor::new("r_id", 12, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_r_id),
            $crate::types::AttributeDescriptor::new("type", 32, $crate::types::Format::Ascii, $crate::types::Volatility::Static)
                .read($crate::devices::generic::read_type),
            $($attr),*
        ]
    };
}

mod ds2413;
mod generic;
mod pseudo;
mod simultaneous;

pub use self::{ds2413::DS2413, simultaneous::SIMULTANEOUS};
pub(crate) use self::generic::describe;

/// Anything we don't have a driver for
pub static UNKNOWN: DeviceDescriptor = DeviceDescriptor {
    code: 0,
    name: "Unknown",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::empty(),
    attributes: with_standard![],
};

/// Silicon serial number
pub static DS2401: DeviceDescriptor = DeviceDescriptor {
    code: 0x01,
    name: "DS2401",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::empty(),
    attributes: with_standard![],
};

/// Thermometer. Conversion is left to a registered driver.
pub static DS18S20: DeviceDescriptor = DeviceDescriptor {
    code: 0x10,
    name: "DS18S20",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::from_bits_truncate(
        DeviceFlags::ALARM.bits() | DeviceFlags::TEMPERATURE.bits(),
    ),
    attributes: with_standard![],
};

/// Microlan coupler.
///
/// The branches are directories, selecting them is done by the bus layer
/// when a path passes through them.
pub static DS2409: DeviceDescriptor = DeviceDescriptor {
    code: 0x1F,
    name: "DS2409",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::BRANCH,
    attributes: with_standard![
        AttributeDescriptor::new("aux", 0, Format::Directory, Volatility::Static),
        AttributeDescriptor::new("main", 0, Format::Directory, Volatility::Static),
    ],
};

/// Programmable resolution thermometer. Conversion is left to a registered
/// driver.
pub static DS18B20: DeviceDescriptor = DeviceDescriptor {
    code: 0x28,
    name: "DS18B20",
    kind: DeviceKind::Chip,
    flags: DeviceFlags::from_bits_truncate(
        DeviceFlags::ALARM.bits() | DeviceFlags::TEMPERATURE.bits(),
    ),
    attributes: with_standard![],
};

pub(crate) static CHIPS: &[&DeviceDescriptor] = &[&DS2401, &DS18S20, &DS2409, &DS18B20, &DS2413];

pub(crate) static PSEUDO: &[(Area, &DeviceDescriptor)] = &[
    (Area::Settings, &pseudo::TIMEOUT),
    (Area::System, &pseudo::ADAPTER),
    (Area::Statistics, &pseudo::CACHE),
    (Area::Statistics, &pseudo::DIRECTORY),
    (Area::Statistics, &pseudo::READ),
    (Area::Statistics, &pseudo::WRITE),
    (Area::Statistics, &pseudo::BUS),
];
