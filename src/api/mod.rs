//! API Module
//!
//! Exposes the volume driver lifecycle contract over a REST API.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
