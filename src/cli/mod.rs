//! Array CLI Collaborators
//!
//! Provides the objects that carry out array-side work for the driver:
//! - Simulated: in-memory VNX array model

pub mod simulated;

pub use simulated::*;

use crate::domain::ports::{ArrayCli, Protocol};
use crate::driver::configuration::{Configuration, CLI_BACKEND};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Collaborator used when the configuration does not name one
pub const DEFAULT_CLI_BACKEND: &str = "simulated";

/// Factory for creating array CLI collaborators
pub struct CliFactory;

impl CliFactory {
    /// Create the collaborator for a protocol, once per driver instance
    pub fn create(protocol: Protocol, configuration: &Configuration) -> Result<Arc<dyn ArrayCli>> {
        if protocol != Protocol::Iscsi {
            return Err(Error::UnsupportedProtocol {
                protocol: protocol.to_string(),
            });
        }

        let backend = configuration
            .get_str_or(CLI_BACKEND, DEFAULT_CLI_BACKEND)
            .to_lowercase();

        info!(
            "Creating {} array CLI for backend section {} ({})",
            backend,
            configuration.section(),
            protocol
        );

        match backend.as_str() {
            "simulated" => Ok(Arc::new(SimulatedVnxArray::from_configuration(
                protocol,
                configuration,
            )?)),
            other => Err(Error::Configuration(format!(
                "[{}] unknown {}: {}",
                configuration.section(),
                CLI_BACKEND,
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_create_iscsi_cli() {
        let config = Configuration::new("vnx");
        let cli = CliFactory::create(Protocol::Iscsi, &config).unwrap();
        assert_eq!(cli.protocol(), Protocol::Iscsi);
    }

    #[test]
    fn test_fibre_channel_rejected() {
        let config = Configuration::new("vnx");
        let result = CliFactory::create(Protocol::FibreChannel, &config);
        assert_matches!(
            result.err(),
            Some(Error::UnsupportedProtocol { protocol }) if protocol == "FC"
        );
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = Configuration::new("vnx").with_value(CLI_BACKEND, "smis");
        let result = CliFactory::create(Protocol::Iscsi, &config);
        assert_matches!(result.err(), Some(Error::Configuration(_)));
    }
}
