//! Volume Driver Module
//!
//! The iSCSI driver adapter, its backend configuration and the periodic
//! stats reporter.

pub mod configuration;
pub mod iscsi;
pub mod reporter;

#[cfg(test)]
pub(crate) mod testing;

pub use configuration::Configuration;
pub use iscsi::*;
pub use reporter::*;
