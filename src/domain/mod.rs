//! Domain layer - Wire types, lifecycle types and port definitions
//!
//! This module defines the data model and the capability traits that
//! adapters implement, following hexagonal architecture principles.

pub mod csi;
pub mod ports;
pub mod volume;

pub use ports::*;
