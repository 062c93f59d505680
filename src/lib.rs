//! VNX iSCSI Driver
//!
//! A block storage volume driver for EMC VNX arrays. The driver implements
//! the host framework's volume lifecycle contract and delegates every call
//! to an array CLI collaborator.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         Host Orchestration Framework                        │
//! │               (REST API / periodic stats reporter / embedders)              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                              VolumeDriver port                              │
//! │                    ┌───────────────────────────┐                            │
//! │                    │       VnxIscsiDriver      │                            │
//! │                    │  forwarding + stats cache │                            │
//! │                    └─────────────┬─────────────┘                            │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                ArrayCli port                                │
//! │                    ┌─────────────┴─────────────┐                            │
//! │                    │    CliFactory("iSCSI")    │                            │
//! │                    └─────────────┬─────────────┘                            │
//! │                    ┌─────────────┴─────────────┐                            │
//! │                    │     SimulatedVnxArray     │                            │
//! │                    │    pools, LUNs, groups    │                            │
//! │                    └───────────────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`driver`]: The iSCSI driver adapter, configuration and stats reporter
//! - [`cli`]: Array CLI collaborators and their factory
//! - [`api`]: REST API exposing the driver
//! - [`domain`]: Core records and traits
//! - [`error`]: Error types and handling

pub mod api;
pub mod cli;
pub mod domain;
pub mod driver;
pub mod error;

// Re-export commonly used types
pub use api::{ApiMetrics, ApiServer, ApiServerConfig, RestRouter};

pub use cli::{CliFactory, SimulatedArrayConfig, SimulatedVnxArray};

pub use domain::ports::{
    ArrayCli, ConnectionInfo, Connector, HostInfo, IscsiTargetProperties, MigrationOutcome,
    ModelUpdate, Protocol, RequestContext, Snapshot, TerminateOptions, Volume, VolumeDriver,
    VolumeStats,
};

pub use driver::{Configuration, StatsReporter, VnxIscsiDriver};

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
