//! Recording array CLI double for driver tests

use crate::domain::ports::{
    ArrayCli, ConnectionInfo, Connector, HostInfo, IscsiTargetProperties, MigrationOutcome,
    ModelUpdate, Protocol, RequestContext, Snapshot, Volume, VolumeStats,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// One recorded collaborator call with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum CliCall {
    CreateVolume(Volume),
    CreateVolumeFromSnapshot(Volume, Snapshot),
    CreateClonedVolume(Volume, Volume),
    ExtendVolume(Volume, u64),
    DeleteVolume(Volume),
    MigrateVolume(RequestContext, Volume, HostInfo),
    CreateSnapshot(Snapshot),
    DeleteSnapshot(Snapshot),
    CreateExport(RequestContext, Volume),
    InitializeConnection(Volume, Connector),
    TerminateConnection(Volume, Connector),
    UpdateVolumeStatus,
}

/// Collaborator that records every call and returns canned results
#[derive(Default)]
pub struct RecordingCli {
    calls: Mutex<Vec<CliCall>>,
    next_error: Mutex<Option<Error>>,
    migration_outcome: Mutex<MigrationOutcome>,
    free_capacity_gb: Mutex<u64>,
}

impl RecordingCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CliCall> {
        self.calls.lock().clone()
    }

    /// Make the next call fail with `error`
    pub fn fail_next(&self, error: Error) {
        *self.next_error.lock() = Some(error);
    }

    pub fn set_migration_outcome(&self, outcome: MigrationOutcome) {
        *self.migration_outcome.lock() = outcome;
    }

    pub fn set_free_capacity_gb(&self, free_gb: u64) {
        *self.free_capacity_gb.lock() = free_gb;
    }

    /// Descriptor returned by initialize_connection for a volume
    pub fn connection_info(&self, volume: &Volume) -> ConnectionInfo {
        ConnectionInfo::iscsi(IscsiTargetProperties {
            target_discovered: true,
            target_iqn: "iqn.1992-04.com.emc:cx.apm00123456789.a4".into(),
            target_portal: "10.10.61.35:3260".into(),
            volume_id: volume.id.clone(),
            target_lun: Some(1),
            auth_method: None,
            auth_username: None,
            auth_password: None,
        })
    }

    fn record(&self, call: CliCall) -> Result<()> {
        self.calls.lock().push(call);
        match self.next_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ArrayCli for RecordingCli {
    fn protocol(&self) -> Protocol {
        Protocol::Iscsi
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        self.record(CliCall::CreateVolume(volume.clone()))
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &Volume,
        snapshot: &Snapshot,
    ) -> Result<()> {
        self.record(CliCall::CreateVolumeFromSnapshot(
            volume.clone(),
            snapshot.clone(),
        ))
    }

    async fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> Result<()> {
        self.record(CliCall::CreateClonedVolume(volume.clone(), src_vref.clone()))
    }

    async fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> Result<()> {
        self.record(CliCall::ExtendVolume(volume.clone(), new_size_gb))
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        self.record(CliCall::DeleteVolume(volume.clone()))
    }

    async fn migrate_volume(
        &self,
        context: &RequestContext,
        volume: &Volume,
        host: &HostInfo,
    ) -> Result<MigrationOutcome> {
        self.record(CliCall::MigrateVolume(
            context.clone(),
            volume.clone(),
            host.clone(),
        ))?;
        Ok(self.migration_outcome.lock().clone())
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.record(CliCall::CreateSnapshot(snapshot.clone()))
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.record(CliCall::DeleteSnapshot(snapshot.clone()))
    }

    async fn create_export(
        &self,
        context: &RequestContext,
        volume: &Volume,
    ) -> Result<Option<ModelUpdate>> {
        self.record(CliCall::CreateExport(context.clone(), volume.clone()))?;
        Ok(Some(ModelUpdate {
            provider_location: Some("system^APM00123456789|type^lun|id^0".into()),
            provider_auth: None,
        }))
    }

    async fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        self.record(CliCall::InitializeConnection(
            volume.clone(),
            connector.clone(),
        ))?;
        Ok(self.connection_info(volume))
    }

    async fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> Result<()> {
        self.record(CliCall::TerminateConnection(
            volume.clone(),
            connector.clone(),
        ))
    }

    async fn update_volume_status(&self) -> Result<VolumeStats> {
        self.record(CliCall::UpdateVolumeStatus)?;
        Ok(VolumeStats {
            vendor_name: "EMC".into(),
            driver_version: "02.00.00".into(),
            total_capacity_gb: 100,
            free_capacity_gb: *self.free_capacity_gb.lock(),
            extra: BTreeMap::new(),
            ..Default::default()
        })
    }
}
