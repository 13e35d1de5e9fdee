//! Core of a 1-Wire bus filesystem
//!
//! Devices on one or more 1-Wire adapters are exposed as a tree of paths,
//! like `/10.AABBCCDDEEFF/temperature`, which can be read, written and
//! listed through a [`OneWire`], and [`fstat`][OneWire::fstat]ed without
//! going to a bus.
//!
//! # Implementation details
//!
//! Bus traffic is slow, so almost everything is cached. Attribute values are
//! kept in a two generation cache, timed out by how volatile they are, and
//! directory listings and which adapter a device was last seen on are cached
//! the same way. Paths under `/uncached` go to the bus every time.
//!
//! Adapters are anything implementing [`Transport`][bus::Transport]. Each is
//! used by one thread at a time, under its bus lock, for one whole
//! transaction. An adapter that keeps failing is closed and reopened.
//!
//! Only device families the core needs itself are built in, see
//! [`devices`]. Others are added to a [`Registry`][registry::Registry] at
//! startup.
#![doc(html_root_url = "https://docs.rs/owcore/0.1.0")]

pub mod bus;
pub mod cache;
pub mod config;
pub mod devices;
pub mod dir;
pub mod error;
pub mod fstat;
pub mod locks;
pub mod registry;
pub mod stats;
pub mod system;
pub mod types;
mod util;

pub use self::{config::Config, system::OneWire};
