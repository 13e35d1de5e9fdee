//! Attribute and directory caching
//!
//! Everything read from a bus can be cached for a while, depending on its
//! [`Volatility`][crate::types::Volatility]. Caching is best effort, a
//! failure here never fails the operation that tried to use it.
mod clock;
mod directory;
mod store;

pub use self::{clock::*, directory::*, store::*};
