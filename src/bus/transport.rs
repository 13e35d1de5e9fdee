//! What an adapter has to provide
use crate::error::Result;
use std::fmt;

/// Outcome of a bus reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    /// At least one device answered with a presence pulse
    Presence,

    /// Nobody answered
    Empty,

    /// The data line is stuck low
    Short,
}

/// Response to one search step.
///
/// `id_bit` is the wired AND of every participating device's address bit,
/// `cmp_bit` of its complement. `direction` is the branch the adapter took,
/// which the participating devices follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub id_bit: bool,
    pub cmp_bit: bool,
    pub direction: bool,
}

/// Bus communication speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Standard,
    Overdrive,
}

/// One bus master.
///
/// Implemented per adapter type, serial, USB, I2C, or a [simulated
/// bus][crate::bus::fake::FakeBus]. Everything above only ever talks to the
/// bus through these.
pub trait Transport: Send + fmt::Debug {
    /// Human readable name, like the device path
    fn name(&self) -> &str;

    /// Reset pulse and presence detect
    fn reset(&mut self) -> Result<Reset>;

    /// One search step. Reads the bit and its complement, then writes
    /// `direction` unless the bits decide it.
    fn triplet(&mut self, direction: bool) -> Result<Triplet>;

    /// Send bytes, returning what was read back. Reading is sending `0xFF`.
    fn send_bytes(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    fn set_speed(&mut self, speed: Speed) -> Result<()> {
        let _ = speed;
        Ok(())
    }

    /// Release the underlying device
    fn close(&mut self) {}

    /// Open the underlying device again after [`Transport::close`]
    fn reopen(&mut self) -> Result<()>;
}
