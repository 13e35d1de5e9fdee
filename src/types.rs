//! Types and interfaces common to this crate.
mod address;
mod device;
mod path;

pub use self::{address::*, device::*, path::*};
