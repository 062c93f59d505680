//! Backend Configuration
//!
//! A driver instance reads its options from one named backend section.
//! Sections are loaded from a YAML document of the form:
//!
//! ```yaml
//! backends:
//!   vnx-iscsi-1:
//!     volume_backend_name: vnx_gold
//!     san_ip: 10.10.61.35
//!     storage_vnx_pool_name: Pool_01_SAS
//!     initiator_auto_registration: true
//! ```
//!
//! Scalar values are kept as strings and parsed on access.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

// =============================================================================
// Option Keys
// =============================================================================

pub const VOLUME_BACKEND_NAME: &str = "volume_backend_name";
pub const CLI_BACKEND: &str = "cli_backend";
pub const SAN_IP: &str = "san_ip";
pub const ISCSI_PORTAL_IP: &str = "iscsi_portal_ip";
pub const ARRAY_SERIAL: &str = "vnx_array_serial";
pub const STORAGE_POOL_NAME: &str = "storage_vnx_pool_name";
pub const MAX_LUNS_PER_STORAGE_GROUP: &str = "max_luns_per_storage_group";
pub const DESTROY_EMPTY_STORAGE_GROUP: &str = "destroy_empty_storage_group";
pub const INITIATOR_AUTO_REGISTRATION: &str = "initiator_auto_registration";
pub const SIMULATED_POOL_CAPACITY_GB: &str = "simulated_pool_capacity_gb";

/// Section name used when no file is loaded
pub const DEFAULT_SECTION: &str = "vnx-iscsi";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    backends: BTreeMap<String, BTreeMap<String, serde_yaml::Value>>,
}

/// Options of one backend section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    section: String,
    values: BTreeMap<String, String>,
}

impl Configuration {
    /// Create an empty configuration for a section
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Name of the backend section these options came from
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Look up an option, returning `None` when it is not set
    pub fn safe_get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// String option with a fallback
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.safe_get(key).unwrap_or(default)
    }

    /// Boolean option with a fallback
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.safe_get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(Error::Configuration(format!(
                    "[{}] {} must be a boolean, got '{}'",
                    self.section, key, raw
                ))),
            },
        }
    }

    /// Unsigned integer option with a fallback
    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.safe_get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Configuration(format!(
                    "[{}] {} must be an unsigned integer, got '{}'",
                    self.section, key, raw
                ))
            }),
        }
    }

    /// Parse a YAML document and select one backend section
    pub fn from_yaml_str(contents: &str, section: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;

        let raw = file.backends.get(section).ok_or_else(|| {
            Error::Configuration(format!("backend section '{}' not found", section))
        })?;

        let mut config = Self::new(section);
        for (key, value) in raw {
            match scalar_to_string(value) {
                Some(value) => config.set(key.clone(), value),
                None => {
                    return Err(Error::Configuration(format!(
                        "[{}] {} must be a scalar value",
                        section, key
                    )))
                }
            }
        }

        debug!("Loaded {} options for backend section {}", config.values.len(), section);

        Ok(config)
    }

    /// Read a YAML file and select one backend section
    pub fn from_yaml_file(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents, section)
    }
}

/// Render a YAML scalar as a string, `None` for sequences and mappings.
/// A null value is kept as an empty string.
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
