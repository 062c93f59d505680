//! Error types for the VNX iSCSI driver
//!
//! Provides structured error types for the driver adapter, the array CLI
//! collaborators, configuration loading and the REST API.

use thiserror::Error;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Array Resource Errors
    // =========================================================================
    #[error("Volume not found: {volume}")]
    VolumeNotFound { volume: String },

    #[error("Snapshot not found: {snapshot}")]
    SnapshotNotFound { snapshot: String },

    #[error("Volume already exists: {volume}")]
    VolumeExists { volume: String },

    #[error("Snapshot already exists: {snapshot}")]
    SnapshotExists { snapshot: String },

    #[error("Volume {volume} is busy: {reason}")]
    VolumeBusy { volume: String, reason: String },

    #[error("Invalid size for volume {volume}: {reason}")]
    InvalidSize { volume: String, reason: String },

    #[error("Insufficient capacity in pool {pool}: requested {requested_gb} GB, free {free_gb} GB")]
    InsufficientCapacity {
        pool: String,
        requested_gb: u64,
        free_gb: u64,
    },

    #[error("Storage pool not found: {pool}")]
    PoolNotFound { pool: String },

    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("Initiator {initiator} is not registered on the array")]
    InitiatorNotRegistered { initiator: String },

    #[error("Storage group {group} is full ({max_luns} LUNs)")]
    StorageGroupFull { group: String, max_luns: u32 },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    #[error("Unsupported storage protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("CLI command failed: {command} (rc={rc}): {output}")]
    CliCommandFailed {
        command: String,
        rc: i32,
        output: String,
    },

    #[error("Array unavailable: {array}")]
    ArrayUnavailable { array: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ArrayUnavailable { .. }
                | Error::CliCommandFailed { .. }
                | Error::VolumeBusy { .. }
        )
    }

    /// Check if this error reports a missing array resource
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::VolumeNotFound { .. }
                | Error::SnapshotNotFound { .. }
                | Error::PoolNotFound { .. }
        )
    }

    /// Check if this error reports a conflict with existing array state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::VolumeExists { .. }
                | Error::SnapshotExists { .. }
                | Error::VolumeBusy { .. }
                | Error::StorageGroupFull { .. }
        )
    }

    /// Check if this error was caused by bad caller input
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Error::InvalidSize { .. }
                | Error::InsufficientCapacity { .. }
                | Error::UnsupportedProtocol { .. }
                | Error::InitiatorNotRegistered { .. }
                | Error::JsonParse(_)
        )
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;
