//! Domain layer - Core records and port definitions
//!
//! This module defines the host-facing driver trait and the array CLI trait
//! that adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
