//! Core functionality: the device wrapper and crate-level traits.

pub mod device;
pub mod traits;
