//! Talking to adapters
//!
//! A [`Transport`] is the raw adapter, a [`Connection`] wraps one with its
//! bus lock and health, and [`search`] and [`select`] build 1-Wire
//! transactions on top.
pub mod fake;
pub mod search;
pub mod select;

mod connection;
mod reconnect;
mod transport;

pub use self::{connection::*, reconnect::*, transport::*};
