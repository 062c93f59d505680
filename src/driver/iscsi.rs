//! VNX iSCSI Driver
//!
//! Implements the host lifecycle contract by forwarding every call to the
//! array CLI collaborator. The only state kept here is the last stats report.

use crate::cli::CliFactory;
use crate::domain::ports::{
    ArrayCli, ConnectionInfo, Connector, HostInfo, MigrationOutcome, Protocol, RequestContext,
    Snapshot, TerminateOptions, Volume, VolumeDriver, VolumeStats,
};
use crate::driver::configuration::{Configuration, VOLUME_BACKEND_NAME};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Backend name reported when the configuration does not set one
pub const DEFAULT_BACKEND_NAME: &str = "EMCCLIISCSIDriver";

/// Protocol name stamped on stats reports
pub const STORAGE_PROTOCOL: &str = "iSCSI";

/// iSCSI volume driver for VNX arrays driven through the CLI
pub struct VnxIscsiDriver {
    configuration: Configuration,
    cli: Arc<dyn ArrayCli>,
    stats: RwLock<Option<VolumeStats>>,
}

impl VnxIscsiDriver {
    /// Create a driver and its iSCSI collaborator
    pub fn new(configuration: Configuration) -> Result<Self> {
        let cli = CliFactory::create(Protocol::Iscsi, &configuration)?;
        Ok(Self::with_cli(configuration, cli))
    }

    /// Create a driver around an existing collaborator
    pub fn with_cli(configuration: Configuration, cli: Arc<dyn ArrayCli>) -> Self {
        Self {
            configuration,
            cli,
            stats: RwLock::new(None),
        }
    }

    /// Retrieve status info from the array and cache it
    pub async fn update_volume_status(&self) -> Result<()> {
        debug!("Updating volume status");
        let mut data = self.cli.update_volume_status().await?;

        data.volume_backend_name = self
            .configuration
            .safe_get(VOLUME_BACKEND_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_BACKEND_NAME)
            .to_string();
        data.storage_protocol = STORAGE_PROTOCOL.to_string();

        *self.stats.write() = Some(data);
        Ok(())
    }
}

#[async_trait]
impl VolumeDriver for VnxIscsiDriver {
    async fn check_for_setup_error(&self) -> Result<()> {
        Ok(())
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        debug!("create_volume {}", volume.name);
        self.cli.create_volume(volume).await
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &Volume,
        snapshot: &Snapshot,
    ) -> Result<()> {
        debug!("create_volume_from_snapshot {} <- {}", volume.name, snapshot.name);
        self.cli.create_volume_from_snapshot(volume, snapshot).await
    }

    async fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> Result<()> {
        debug!("create_cloned_volume {} <- {}", volume.name, src_vref.name);
        self.cli.create_cloned_volume(volume, src_vref).await
    }

    async fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> Result<()> {
        debug!("extend_volume {} to {} GB", volume.name, new_size_gb);
        self.cli.extend_volume(volume, new_size_gb).await
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        debug!("delete_volume {}", volume.name);
        self.cli.delete_volume(volume).await
    }

    async fn migrate_volume(
        &self,
        context: &RequestContext,
        volume: &Volume,
        host: &HostInfo,
    ) -> Result<MigrationOutcome> {
        debug!("migrate_volume {} to {}", volume.name, host.host);
        self.cli.migrate_volume(context, volume, host).await
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        debug!("create_snapshot {} of {}", snapshot.name, snapshot.volume_name);
        self.cli.create_snapshot(snapshot).await
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        debug!("delete_snapshot {}", snapshot.name);
        self.cli.delete_snapshot(snapshot).await
    }

    // Exports on the array are always valid and managed by the array itself.
    async fn ensure_export(&self, _context: &RequestContext, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn create_export(&self, context: &RequestContext, volume: &Volume) -> Result<()> {
        debug!("create_export {}", volume.name);
        self.cli.create_export(context, volume).await?;
        Ok(())
    }

    async fn remove_export(&self, _context: &RequestContext, _volume: &Volume) -> Result<()> {
        Ok(())
    }

    async fn check_for_export(&self, _context: &RequestContext, _volume_id: &str) -> Result<()> {
        Ok(())
    }

    async fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        debug!("initialize_connection {} for {}", volume.name, connector.initiator);
        self.cli.initialize_connection(volume, connector).await
    }

    async fn terminate_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
        _options: &TerminateOptions,
    ) -> Result<()> {
        debug!("terminate_connection {} for {}", volume.name, connector.initiator);
        self.cli.terminate_connection(volume, connector).await
    }

    async fn get_volume_stats(&self, refresh: bool) -> Result<Option<VolumeStats>> {
        if refresh {
            self.update_volume_status().await?;
        }
        Ok(self.stats.read().clone())
    }

    fn driver_name(&self) -> &str {
        DEFAULT_BACKEND_NAME
    }
}
