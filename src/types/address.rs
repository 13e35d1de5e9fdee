//! Physical 1-Wire device addresses
use crate::{
    error::{text::BAD_ADDRESS, Error, Result},
    util::crc8,
};
use std::{fmt, str::FromStr};

/// The 64 bit ROM address of one 1-Wire device.
///
/// Laid out as on the wire: family code, six id bytes, and a CRC8 of the
/// first seven bytes.
///
/// The textual form is `FF.IIIIIIIIIIII`, family and id in hex, bytes in
/// wire order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SerialNumber([u8; 8]);

impl SerialNumber {
    /// Size of an address in bytes
    pub const LEN: usize = 8;

    /// Build from raw bytes exactly as read from the bus. Not validated.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build from a family code and id, computing the CRC.
    pub fn new(family: u8, id: [u8; 6]) -> Self {
        let mut b = [0u8; 8];
        b[0] = family;
        b[1..7].copy_from_slice(&id);
        b[7] = crc8(&b[..7]);
        Self(b)
    }

    /// Family code, selects the [`DeviceDescriptor`][crate::types::DeviceDescriptor]
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// Device id, wire order
    pub fn id(&self) -> [u8; 6] {
        let mut id = [0u8; 6];
        id.copy_from_slice(&self.0[1..7]);
        id
    }

    /// Stored CRC8 byte
    pub fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Whether the CRC matches and the family isn't 0.
    ///
    /// A zero family code is what a bus with a stuck low data line reads as.
    pub fn is_valid(&self) -> bool {
        self.0[0] != 0 && crc8(&self.0) == 0
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.", self.family())?;
        for b in self.id() {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialNumber({}.{:02X})", self, self.crc())
    }
}

/// Accepts `10.AABBCCDDEEFF`, `10AABBCCDDEEFF`, and either with the CRC
/// appended (`10.AABBCCDDEEFF.E9`). A given CRC must match.
impl FromStr for SerialNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidPath(s.into(), BAD_ADDRESS.into());
        let hex: String = s.chars().filter(|c| *c != '.').collect();
        if !(hex.len() == 14 || hex.len() == 16) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(bad());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| bad());
        //
        let family = byte(0)?;
        let mut id = [0u8; 6];
        for (i, b) in id.iter_mut().enumerate() {
            *b = byte(1 + i)?;
        }
        let sn = Self::new(family, id);
        if hex.len() == 16 && byte(7)? != sn.crc() {
            return Err(bad());
        }
        Ok(sn)
    }
}
