//! Simulated VNX Array
//!
//! In-memory model of a VNX array as seen through its CLI: storage pools,
//! LUNs, snapshots and per-host storage groups. Stands in for the naviseccli
//! orchestration so the driver can run without an array.

use crate::domain::ports::{
    ArrayCli, ConnectionInfo, Connector, HostInfo, IscsiTargetProperties, MigrationOutcome,
    ModelUpdate, Protocol, RequestContext, Snapshot, Volume, VolumeStats,
};
use crate::driver::configuration::{
    Configuration, ARRAY_SERIAL, DESTROY_EMPTY_STORAGE_GROUP, INITIATOR_AUTO_REGISTRATION,
    ISCSI_PORTAL_IP, MAX_LUNS_PER_STORAGE_GROUP, SAN_IP, SIMULATED_POOL_CAPACITY_GB,
    STORAGE_POOL_NAME,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// iSCSI port on the storage processors
pub const ISCSI_PORT: u16 = 3260;

/// Version reported in volume stats
pub const DRIVER_VERSION: &str = "02.00.00";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the simulated array
#[derive(Debug, Clone)]
pub struct SimulatedArrayConfig {
    /// Array serial number
    pub array_serial: String,
    /// Pool new LUNs are created in
    pub pool_name: String,
    /// Capacity of that pool in GB
    pub pool_capacity_gb: u64,
    /// Address of the SP iSCSI portal
    pub iscsi_portal_ip: String,
    /// Maximum host LUN ids per storage group
    pub max_luns_per_storage_group: u32,
    /// Destroy a storage group when its last LUN is removed
    pub destroy_empty_storage_group: bool,
    /// Register unknown initiators on first attach
    pub initiator_auto_registration: bool,
}

impl Default for SimulatedArrayConfig {
    fn default() -> Self {
        Self {
            array_serial: "APM00123456789".to_string(),
            pool_name: "Pool_01_SAS".to_string(),
            pool_capacity_gb: 10240,
            iscsi_portal_ip: "192.168.1.50".to_string(),
            max_luns_per_storage_group: 255,
            destroy_empty_storage_group: false,
            initiator_auto_registration: true,
        }
    }
}

impl SimulatedArrayConfig {
    /// Read array options from a backend section
    pub fn from_configuration(configuration: &Configuration) -> Result<Self> {
        let defaults = Self::default();

        let iscsi_portal_ip = configuration
            .safe_get(ISCSI_PORTAL_IP)
            .or_else(|| configuration.safe_get(SAN_IP))
            .unwrap_or(&defaults.iscsi_portal_ip)
            .to_string();

        let max_luns = configuration.get_u64(
            MAX_LUNS_PER_STORAGE_GROUP,
            defaults.max_luns_per_storage_group as u64,
        )?;
        let max_luns_per_storage_group = u32::try_from(max_luns).map_err(|_| {
            Error::Configuration(format!(
                "[{}] {} out of range: {}",
                configuration.section(),
                MAX_LUNS_PER_STORAGE_GROUP,
                max_luns
            ))
        })?;

        Ok(Self {
            array_serial: configuration
                .get_str_or(ARRAY_SERIAL, &defaults.array_serial)
                .to_string(),
            pool_name: configuration
                .get_str_or(STORAGE_POOL_NAME, &defaults.pool_name)
                .to_string(),
            pool_capacity_gb: configuration
                .get_u64(SIMULATED_POOL_CAPACITY_GB, defaults.pool_capacity_gb)?,
            iscsi_portal_ip,
            max_luns_per_storage_group,
            destroy_empty_storage_group: configuration
                .get_bool(DESTROY_EMPTY_STORAGE_GROUP, defaults.destroy_empty_storage_group)?,
            initiator_auto_registration: configuration
                .get_bool(INITIATOR_AUTO_REGISTRATION, defaults.initiator_auto_registration)?,
        })
    }
}

// =============================================================================
// Array State
// =============================================================================

/// A LUN as the array reports it
#[derive(Debug, Clone, PartialEq)]
pub struct LunRecord {
    /// Array LUN id
    pub id: u32,
    /// Host framework volume id the LUN was created for
    pub volume_id: String,
    pub size_gb: u64,
    pub pool: String,
    /// Snapshot the LUN was created from
    pub source_snapshot: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A snapshot as the array reports it
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// LUN the snapshot was taken of
    pub lun_name: String,
    pub size_gb: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
struct StorageGroup {
    initiators: BTreeSet<String>,
    /// Host LUN id -> array LUN id
    hlus: BTreeMap<u32, u32>,
}

#[derive(Debug, Default)]
struct ArrayState {
    /// Pool name -> capacity in GB
    pools: BTreeMap<String, u64>,
    /// Keyed by volume name
    luns: BTreeMap<String, LunRecord>,
    /// Keyed by snapshot name
    snapshots: BTreeMap<String, SnapshotRecord>,
    /// Keyed by host name
    storage_groups: BTreeMap<String, StorageGroup>,
    registered_initiators: BTreeSet<String>,
    next_lun_id: u32,
}

impl ArrayState {
    fn used_gb(&self, pool: &str) -> u64 {
        self.luns
            .values()
            .filter(|lun| lun.pool == pool)
            .map(|lun| lun.size_gb)
            .sum()
    }

    fn free_gb(&self, pool: &str) -> u64 {
        let capacity = self.pools.get(pool).copied().unwrap_or(0);
        capacity.saturating_sub(self.used_gb(pool))
    }

    fn reserve(&self, pool: &str, requested_gb: u64) -> Result<()> {
        if !self.pools.contains_key(pool) {
            return Err(Error::PoolNotFound { pool: pool.into() });
        }
        let free_gb = self.free_gb(pool);
        if requested_gb > free_gb {
            return Err(Error::InsufficientCapacity {
                pool: pool.into(),
                requested_gb,
                free_gb,
            });
        }
        Ok(())
    }

    fn lun(&self, name: &str) -> Result<&LunRecord> {
        self.luns.get(name).ok_or_else(|| Error::VolumeNotFound {
            volume: name.into(),
        })
    }

    fn insert_lun(
        &mut self,
        volume: &Volume,
        pool: &str,
        source_snapshot: Option<String>,
    ) -> Result<u32> {
        if self.luns.contains_key(&volume.name) {
            return Err(Error::VolumeExists {
                volume: volume.name.clone(),
            });
        }
        self.reserve(pool, volume.size_gb)?;

        let id = self.next_lun_id;
        self.next_lun_id += 1;

        self.luns.insert(
            volume.name.clone(),
            LunRecord {
                id,
                volume_id: volume.id.clone(),
                size_gb: volume.size_gb,
                pool: pool.to_string(),
                source_snapshot,
                created_at: chrono::Utc::now(),
            },
        );

        Ok(id)
    }
}

// =============================================================================
// Simulated Array
// =============================================================================

/// In-memory VNX array serving the array CLI contract
pub struct SimulatedVnxArray {
    config: SimulatedArrayConfig,
    protocol: Protocol,
    state: Mutex<ArrayState>,
}

impl SimulatedVnxArray {
    /// Create a new simulated array with its primary pool
    pub fn new(protocol: Protocol, config: SimulatedArrayConfig) -> Self {
        let mut state = ArrayState::default();
        state
            .pools
            .insert(config.pool_name.clone(), config.pool_capacity_gb);

        Self {
            config,
            protocol,
            state: Mutex::new(state),
        }
    }

    /// Create a simulated array from a backend section
    pub fn from_configuration(protocol: Protocol, configuration: &Configuration) -> Result<Self> {
        Ok(Self::new(
            protocol,
            SimulatedArrayConfig::from_configuration(configuration)?,
        ))
    }

    /// Add another storage pool
    pub fn with_pool(self, name: impl Into<String>, capacity_gb: u64) -> Self {
        self.state.lock().pools.insert(name.into(), capacity_gb);
        self
    }

    /// Register an initiator ahead of its first attach
    pub fn register_initiator(&self, initiator: impl Into<String>) {
        self.state.lock().registered_initiators.insert(initiator.into());
    }

    /// Array serial number
    pub fn serial(&self) -> &str {
        &self.config.array_serial
    }

    /// Pool a LUN lives in
    pub fn lun_pool(&self, volume_name: &str) -> Option<String> {
        self.state.lock().luns.get(volume_name).map(|lun| lun.pool.clone())
    }

    /// Size of a LUN in GB
    pub fn lun_size_gb(&self, volume_name: &str) -> Option<u64> {
        self.state.lock().luns.get(volume_name).map(|lun| lun.size_gb)
    }

    /// Full record of a LUN
    pub fn lun_record(&self, volume_name: &str) -> Option<LunRecord> {
        self.state.lock().luns.get(volume_name).cloned()
    }

    /// Full record of a snapshot
    pub fn snapshot_record(&self, snapshot_name: &str) -> Option<SnapshotRecord> {
        self.state.lock().snapshots.get(snapshot_name).cloned()
    }

    /// Number of LUNs on the array
    pub fn lun_count(&self) -> usize {
        self.state.lock().luns.len()
    }

    /// Whether a snapshot exists
    pub fn has_snapshot(&self, snapshot_name: &str) -> bool {
        self.state.lock().snapshots.contains_key(snapshot_name)
    }

    /// Host LUN id mappings of a host's storage group, `None` when there is no group
    pub fn storage_group(&self, host: &str) -> Option<BTreeMap<u32, u32>> {
        self.state
            .lock()
            .storage_groups
            .get(host)
            .map(|group| group.hlus.clone())
    }

    fn target_iqn(&self) -> String {
        format!(
            "iqn.1992-04.com.emc:cx.{}.a4",
            self.config.array_serial.to_lowercase()
        )
    }

    fn target_portal(&self) -> String {
        format!("{}:{}", self.config.iscsi_portal_ip, ISCSI_PORT)
    }

    fn provider_location(&self, lun_id: u32) -> String {
        format!("system^{}|type^lun|id^{}", self.config.array_serial, lun_id)
    }

    /// Parse `pool|serial` location info, `None` when malformed
    fn parse_location_info(location_info: &str) -> Option<(&str, &str)> {
        let (pool, serial) = location_info.split_once('|')?;
        if pool.is_empty() || serial.is_empty() {
            return None;
        }
        Some((pool, serial))
    }
}

#[async_trait]
impl ArrayCli for SimulatedVnxArray {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn create_volume(&self, volume: &Volume) -> Result<()> {
        info!(
            "Creating LUN {} ({} GB) in pool {}",
            volume.name, volume.size_gb, self.config.pool_name
        );

        let mut state = self.state.lock();
        let lun_id = state.insert_lun(volume, &self.config.pool_name, None)?;

        debug!("Created LUN {} with id {}", volume.name, lun_id);
        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        volume: &Volume,
        snapshot: &Snapshot,
    ) -> Result<()> {
        info!(
            "Creating LUN {} from snapshot {}",
            volume.name, snapshot.name
        );

        let mut state = self.state.lock();
        let snap = state
            .snapshots
            .get(&snapshot.name)
            .ok_or_else(|| Error::SnapshotNotFound {
                snapshot: snapshot.name.clone(),
            })?;

        if volume.size_gb < snap.size_gb {
            return Err(Error::InvalidSize {
                volume: volume.name.clone(),
                reason: format!(
                    "{} GB is smaller than snapshot {} ({} GB)",
                    volume.size_gb, snapshot.name, snap.size_gb
                ),
            });
        }

        let lun_id = state.insert_lun(
            volume,
            &self.config.pool_name,
            Some(snapshot.name.clone()),
        )?;

        debug!("Created LUN {} with id {} from snapshot", volume.name, lun_id);
        Ok(())
    }

    async fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> Result<()> {
        info!("Cloning LUN {} to {}", src_vref.name, volume.name);

        let mut state = self.state.lock();
        let source = state.lun(&src_vref.name)?;
        let (source_size, pool) = (source.size_gb, source.pool.clone());

        if volume.size_gb < source_size {
            return Err(Error::InvalidSize {
                volume: volume.name.clone(),
                reason: format!(
                    "{} GB is smaller than source {} ({} GB)",
                    volume.size_gb, src_vref.name, source_size
                ),
            });
        }

        let lun_id = state.insert_lun(volume, &pool, None)?;

        debug!("Created clone {} with id {} in pool {}", volume.name, lun_id, pool);
        Ok(())
    }

    async fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> Result<()> {
        info!("Extending LUN {} to {} GB", volume.name, new_size_gb);

        let mut state = self.state.lock();
        let lun = state.lun(&volume.name)?;
        let (current_gb, pool) = (lun.size_gb, lun.pool.clone());

        if new_size_gb <= current_gb {
            return Err(Error::InvalidSize {
                volume: volume.name.clone(),
                reason: format!(
                    "new size {} GB must exceed current size {} GB",
                    new_size_gb, current_gb
                ),
            });
        }
        state.reserve(&pool, new_size_gb - current_gb)?;

        if let Some(lun) = state.luns.get_mut(&volume.name) {
            lun.size_gb = new_size_gb;
        }
        Ok(())
    }

    async fn delete_volume(&self, volume: &Volume) -> Result<()> {
        info!("Deleting LUN {}", volume.name);

        let mut state = self.state.lock();
        let lun_id = state.lun(&volume.name)?.id;

        let dependents: Vec<&String> = state
            .snapshots
            .iter()
            .filter(|(_, snap)| snap.lun_name == volume.name)
            .map(|(name, _)| name)
            .collect();
        if !dependents.is_empty() {
            return Err(Error::VolumeBusy {
                volume: volume.name.clone(),
                reason: format!("{} snapshot(s) still reference the LUN", dependents.len()),
            });
        }

        let mut emptied = Vec::new();
        for (host, group) in state.storage_groups.iter_mut() {
            let mapped = group.hlus.len();
            group.hlus.retain(|_, id| *id != lun_id);
            if group.hlus.len() < mapped && group.hlus.is_empty() {
                emptied.push(host.clone());
            }
        }
        if self.config.destroy_empty_storage_group {
            for host in emptied {
                info!("Destroying empty storage group {}", host);
                state.storage_groups.remove(&host);
            }
        }

        state.luns.remove(&volume.name);
        debug!("Deleted LUN {} (id {})", volume.name, lun_id);
        Ok(())
    }

    async fn migrate_volume(
        &self,
        context: &RequestContext,
        volume: &Volume,
        host: &HostInfo,
    ) -> Result<MigrationOutcome> {
        info!(
            "[{}] Migrating LUN {} to host {}",
            context.request_id, volume.name, host.host
        );

        let (target_pool, serial) = match host
            .location_info()
            .and_then(Self::parse_location_info)
        {
            Some(location) => location,
            None => {
                warn!("No usable location_info for host {}", host.host);
                return Ok(MigrationOutcome::default());
            }
        };

        if serial != self.config.array_serial {
            debug!("Host {} is on array {}, not {}", host.host, serial, self.config.array_serial);
            return Ok(MigrationOutcome::default());
        }

        let mut state = self.state.lock();
        let lun = state.lun(&volume.name)?;
        let size_gb = lun.size_gb;

        if lun.pool == target_pool || !state.pools.contains_key(target_pool) {
            debug!(
                "LUN {} cannot move from {} to {}",
                volume.name, lun.pool, target_pool
            );
            return Ok(MigrationOutcome::default());
        }

        if let Err(e) = state.reserve(target_pool, size_gb) {
            warn!("Backend migration of {} declined: {}", volume.name, e);
            return Ok(MigrationOutcome::default());
        }

        if let Some(lun) = state.luns.get_mut(&volume.name) {
            lun.pool = target_pool.to_string();
        }

        info!("Migrated LUN {} to pool {}", volume.name, target_pool);

        Ok(MigrationOutcome {
            moved: true,
            model_update: None,
        })
    }

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        info!(
            "Creating snapshot {} of LUN {}",
            snapshot.name, snapshot.volume_name
        );

        let mut state = self.state.lock();
        let size_gb = state.lun(&snapshot.volume_name)?.size_gb;

        if state.snapshots.contains_key(&snapshot.name) {
            return Err(Error::SnapshotExists {
                snapshot: snapshot.name.clone(),
            });
        }

        state.snapshots.insert(
            snapshot.name.clone(),
            SnapshotRecord {
                lun_name: snapshot.volume_name.clone(),
                size_gb,
                created_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        info!("Deleting snapshot {}", snapshot.name);

        let mut state = self.state.lock();
        match state.snapshots.remove(&snapshot.name) {
            Some(snap) => {
                debug!("Deleted snapshot {} of {}", snapshot.name, snap.lun_name);
                Ok(())
            }
            None => Err(Error::SnapshotNotFound {
                snapshot: snapshot.name.clone(),
            }),
        }
    }

    async fn create_export(
        &self,
        context: &RequestContext,
        volume: &Volume,
    ) -> Result<Option<ModelUpdate>> {
        debug!("[{}] Creating export for {}", context.request_id, volume.name);

        let state = self.state.lock();
        let lun_id = state.lun(&volume.name)?.id;

        Ok(Some(ModelUpdate {
            provider_location: Some(self.provider_location(lun_id)),
            provider_auth: None,
        }))
    }

    async fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo> {
        info!(
            "Attaching LUN {} to host {} ({})",
            volume.name, connector.host, connector.initiator
        );

        let mut state = self.state.lock();
        let lun_id = state.lun(&volume.name)?.id;

        if !state.registered_initiators.contains(&connector.initiator) {
            if !self.config.initiator_auto_registration {
                return Err(Error::InitiatorNotRegistered {
                    initiator: connector.initiator.clone(),
                });
            }
            info!("Registering initiator {}", connector.initiator);
            state
                .registered_initiators
                .insert(connector.initiator.clone());
        }

        let max_luns = self.config.max_luns_per_storage_group;
        let group = state
            .storage_groups
            .entry(connector.host.clone())
            .or_default();
        group.initiators.insert(connector.initiator.clone());

        let existing = group
            .hlus
            .iter()
            .find(|(_, id)| **id == lun_id)
            .map(|(hlu, _)| *hlu);

        let hlu = match existing {
            Some(hlu) => hlu,
            None => {
                let hlu = (1..=max_luns)
                    .find(|candidate| !group.hlus.contains_key(candidate))
                    .ok_or_else(|| Error::StorageGroupFull {
                        group: connector.host.clone(),
                        max_luns,
                    })?;
                group.hlus.insert(hlu, lun_id);
                hlu
            }
        };

        debug!(
            "LUN {} mapped to HLU {} in storage group {} ({} initiators)",
            lun_id,
            hlu,
            connector.host,
            group.initiators.len()
        );

        Ok(ConnectionInfo::iscsi(IscsiTargetProperties {
            target_discovered: true,
            target_iqn: self.target_iqn(),
            target_portal: self.target_portal(),
            volume_id: volume.id.clone(),
            target_lun: Some(hlu),
            auth_method: None,
            auth_username: None,
            auth_password: None,
        }))
    }

    async fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> Result<()> {
        info!("Detaching LUN {} from host {}", volume.name, connector.host);

        let mut state = self.state.lock();
        let lun_id = match state.luns.get(&volume.name) {
            Some(lun) => lun.id,
            None => {
                debug!("LUN {} not on array, nothing to detach", volume.name);
                return Ok(());
            }
        };

        let now_empty = match state.storage_groups.get_mut(&connector.host) {
            Some(group) => {
                group.hlus.retain(|_, id| *id != lun_id);
                group.hlus.is_empty()
            }
            None => return Ok(()),
        };

        if now_empty && self.config.destroy_empty_storage_group {
            info!("Destroying empty storage group {}", connector.host);
            state.storage_groups.remove(&connector.host);
        }
        Ok(())
    }

    async fn update_volume_status(&self) -> Result<VolumeStats> {
        let state = self.state.lock();
        let pool = &self.config.pool_name;

        let total_capacity_gb = state.pools.get(pool).copied().unwrap_or(0);
        let free_capacity_gb = state.free_gb(pool);

        debug!(
            "Pool {}: {} GB total, {} GB free, {} LUNs",
            pool,
            total_capacity_gb,
            free_capacity_gb,
            state.luns.len()
        );

        Ok(VolumeStats {
            volume_backend_name: String::new(),
            storage_protocol: String::new(),
            vendor_name: "EMC".to_string(),
            driver_version: DRIVER_VERSION.to_string(),
            total_capacity_gb,
            free_capacity_gb,
            reserved_percentage: 0,
            location_info: Some(format!("{}|{}", pool, self.config.array_serial)),
            extra: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn volume(name: &str, size_gb: u64) -> Volume {
        Volume {
            id: format!("{}-id", name),
            name: name.into(),
            size_gb,
            display_name: None,
            provider_location: None,
            volume_type_id: None,
            metadata: BTreeMap::new(),
        }
    }

    fn snapshot(name: &str, source: &Volume) -> Snapshot {
        Snapshot {
            id: format!("{}-id", name),
            name: name.into(),
            volume_id: source.id.clone(),
            volume_name: source.name.clone(),
            volume_size_gb: source.size_gb,
        }
    }

    fn connector(host: &str) -> Connector {
        Connector {
            initiator: format!("iqn.1993-08.org.debian:01:{}", host),
            host: host.into(),
            ip: Some("10.0.0.2".into()),
            multipath: false,
            wwpns: Vec::new(),
        }
    }

    fn migration_host(location_info: &str) -> HostInfo {
        let mut capabilities = BTreeMap::new();
        capabilities.insert("location_info".to_string(), serde_json::json!(location_info));
        HostInfo {
            host: "node2@vnx#Pool_02".into(),
            capabilities,
        }
    }

    fn array() -> SimulatedVnxArray {
        SimulatedVnxArray::new(
            Protocol::Iscsi,
            SimulatedArrayConfig {
                pool_capacity_gb: 100,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_delete_volume() {
        let array = array();
        let vol = volume("volume-1", 10);

        array.create_volume(&vol).await.unwrap();
        assert_eq!(array.lun_pool("volume-1").as_deref(), Some("Pool_01_SAS"));

        assert_matches!(
            array.create_volume(&vol).await,
            Err(Error::VolumeExists { .. })
        );

        array.delete_volume(&vol).await.unwrap();
        assert_eq!(array.lun_count(), 0);

        assert_matches!(
            array.delete_volume(&vol).await,
            Err(Error::VolumeNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_pool_capacity_enforced() {
        let array = array();
        array.create_volume(&volume("volume-1", 80)).await.unwrap();

        assert_matches!(
            array.create_volume(&volume("volume-2", 30)).await,
            Err(Error::InsufficientCapacity { free_gb: 20, .. })
        );

        let stats = array.update_volume_status().await.unwrap();
        assert_eq!(stats.total_capacity_gb, 100);
        assert_eq!(stats.free_capacity_gb, 20);
        assert_eq!(stats.location_info.as_deref(), Some("Pool_01_SAS|APM00123456789"));
        assert!(stats.volume_backend_name.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let array = array();
        let vol = volume("volume-1", 10);
        let snap = snapshot("snapshot-1", &vol);

        assert_matches!(
            array.create_snapshot(&snap).await,
            Err(Error::VolumeNotFound { .. })
        );

        array.create_volume(&vol).await.unwrap();
        array.create_snapshot(&snap).await.unwrap();
        assert!(array.has_snapshot("snapshot-1"));

        assert_matches!(
            array.create_snapshot(&snap).await,
            Err(Error::SnapshotExists { .. })
        );
        assert_matches!(
            array.delete_volume(&vol).await,
            Err(Error::VolumeBusy { .. })
        );

        array.delete_snapshot(&snap).await.unwrap();
        assert_matches!(
            array.delete_snapshot(&snap).await,
            Err(Error::SnapshotNotFound { .. })
        );
        array.delete_volume(&vol).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_from_snapshot_requires_size() {
        let array = array();
        let vol = volume("volume-1", 10);
        let snap = snapshot("snapshot-1", &vol);
        array.create_volume(&vol).await.unwrap();
        array.create_snapshot(&snap).await.unwrap();

        assert_matches!(
            array
                .create_volume_from_snapshot(&volume("volume-2", 5), &snap)
                .await,
            Err(Error::InvalidSize { .. })
        );

        array
            .create_volume_from_snapshot(&volume("volume-2", 20), &snap)
            .await
            .unwrap();
        assert_eq!(array.lun_size_gb("volume-2"), Some(20));

        let missing = snapshot("snapshot-9", &vol);
        assert_matches!(
            array
                .create_volume_from_snapshot(&volume("volume-3", 10), &missing)
                .await,
            Err(Error::SnapshotNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_clone_lands_in_source_pool() {
        let array = array().with_pool("Pool_02_FLASH", 50);
        let src = volume("volume-1", 10);
        array.create_volume(&src).await.unwrap();

        let context = RequestContext::admin("req-1");
        let host = migration_host("Pool_02_FLASH|APM00123456789");
        assert!(array.migrate_volume(&context, &src, &host).await.unwrap().moved);

        array
            .create_cloned_volume(&volume("volume-2", 10), &src)
            .await
            .unwrap();
        assert_eq!(array.lun_pool("volume-2").as_deref(), Some("Pool_02_FLASH"));

        assert_matches!(
            array
                .create_cloned_volume(&volume("volume-3", 10), &volume("volume-9", 10))
                .await,
            Err(Error::VolumeNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_extend_volume() {
        let array = array();
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();

        array.extend_volume(&vol, 20).await.unwrap();
        assert_eq!(array.lun_size_gb("volume-1"), Some(20));

        assert_matches!(
            array.extend_volume(&vol, 20).await,
            Err(Error::InvalidSize { .. })
        );
        assert_matches!(
            array.extend_volume(&vol, 500).await,
            Err(Error::InsufficientCapacity { .. })
        );
    }

    #[tokio::test]
    async fn test_migrate_declines_unusable_hosts() {
        let array = array().with_pool("Pool_02_FLASH", 50);
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        let context = RequestContext::admin("req-1");

        for location in [
            "Pool_02_FLASH|APM00999999999",
            "Pool_01_SAS|APM00123456789",
            "Pool_09|APM00123456789",
            "garbage",
        ] {
            let outcome = array
                .migrate_volume(&context, &vol, &migration_host(location))
                .await
                .unwrap();
            assert!(!outcome.moved, "{} should not move", location);
        }

        let no_info = HostInfo {
            host: "node3@lvm".into(),
            capabilities: BTreeMap::new(),
        };
        assert!(!array.migrate_volume(&context, &vol, &no_info).await.unwrap().moved);
        assert_eq!(array.lun_pool("volume-1").as_deref(), Some("Pool_01_SAS"));
    }

    #[tokio::test]
    async fn test_migrate_declined_when_target_pool_full() {
        let array = array().with_pool("P2", 5);
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();

        let outcome = array
            .migrate_volume(
                &RequestContext::admin("req-1"),
                &vol,
                &migration_host("P2|APM00123456789"),
            )
            .await
            .unwrap();
        assert!(!outcome.moved);
        assert_eq!(array.lun_pool("volume-1").as_deref(), Some("Pool_01_SAS"));
    }

    #[tokio::test]
    async fn test_create_export_reports_provider_location() {
        let array = array();
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();

        let update = array
            .create_export(&RequestContext::admin("req-1"), &vol)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            update.provider_location.as_deref(),
            Some("system^APM00123456789|type^lun|id^0")
        );
    }

    #[tokio::test]
    async fn test_initialize_connection_maps_hlu() {
        let array = array();
        let vol1 = volume("volume-1", 10);
        let vol2 = volume("volume-2", 10);
        array.create_volume(&vol1).await.unwrap();
        array.create_volume(&vol2).await.unwrap();
        let host = connector("compute-1");

        let info = array.initialize_connection(&vol1, &host).await.unwrap();
        assert_eq!(info.driver_volume_type, "iscsi");
        assert!(info.data.target_discovered);
        assert_eq!(info.data.target_iqn, "iqn.1992-04.com.emc:cx.apm00123456789.a4");
        assert_eq!(info.data.target_portal, "192.168.1.50:3260");
        assert_eq!(info.data.volume_id, "volume-1-id");
        assert_eq!(info.data.target_lun, Some(1));

        let info = array.initialize_connection(&vol2, &host).await.unwrap();
        assert_eq!(info.data.target_lun, Some(2));

        // Re-attach keeps the mapping
        let info = array.initialize_connection(&vol1, &host).await.unwrap();
        assert_eq!(info.data.target_lun, Some(1));
        assert_eq!(array.storage_group("compute-1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_initiator_rejected() {
        let array = SimulatedVnxArray::new(
            Protocol::Iscsi,
            SimulatedArrayConfig {
                initiator_auto_registration: false,
                ..Default::default()
            },
        );
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        let host = connector("compute-1");

        assert_matches!(
            array.initialize_connection(&vol, &host).await,
            Err(Error::InitiatorNotRegistered { .. })
        );

        array.register_initiator(host.initiator.clone());
        array.initialize_connection(&vol, &host).await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_group_full() {
        let array = SimulatedVnxArray::new(
            Protocol::Iscsi,
            SimulatedArrayConfig {
                max_luns_per_storage_group: 1,
                ..Default::default()
            },
        );
        let host = connector("compute-1");
        let vol1 = volume("volume-1", 1);
        let vol2 = volume("volume-2", 1);
        array.create_volume(&vol1).await.unwrap();
        array.create_volume(&vol2).await.unwrap();

        array.initialize_connection(&vol1, &host).await.unwrap();
        assert_matches!(
            array.initialize_connection(&vol2, &host).await,
            Err(Error::StorageGroupFull { max_luns: 1, .. })
        );
    }

    #[tokio::test]
    async fn test_terminate_connection_and_group_cleanup() {
        let array = SimulatedVnxArray::new(
            Protocol::Iscsi,
            SimulatedArrayConfig {
                destroy_empty_storage_group: true,
                ..Default::default()
            },
        );
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        let host = connector("compute-1");

        // Unknown host is a no-op
        array.terminate_connection(&vol, &host).await.unwrap();

        array.initialize_connection(&vol, &host).await.unwrap();
        array.terminate_connection(&vol, &host).await.unwrap();
        assert!(array.storage_group("compute-1").is_none());
    }

    #[tokio::test]
    async fn test_empty_group_kept_by_default() {
        let array = array();
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        let host = connector("compute-1");

        array.initialize_connection(&vol, &host).await.unwrap();
        array.terminate_connection(&vol, &host).await.unwrap();
        assert_eq!(array.storage_group("compute-1").map(|g| g.len()), Some(0));
    }

    #[tokio::test]
    async fn test_delete_volume_unmaps_lun() {
        let array = array();
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        array
            .initialize_connection(&vol, &connector("compute-1"))
            .await
            .unwrap();

        array.delete_volume(&vol).await.unwrap();
        assert_eq!(array.storage_group("compute-1").map(|g| g.len()), Some(0));
    }

    #[tokio::test]
    async fn test_delete_volume_destroys_emptied_group() {
        let array = SimulatedVnxArray::new(
            Protocol::Iscsi,
            SimulatedArrayConfig {
                destroy_empty_storage_group: true,
                ..Default::default()
            },
        );
        let vol1 = volume("volume-1", 10);
        let vol2 = volume("volume-2", 10);
        array.create_volume(&vol1).await.unwrap();
        array.create_volume(&vol2).await.unwrap();
        array
            .initialize_connection(&vol1, &connector("compute-1"))
            .await
            .unwrap();
        array
            .initialize_connection(&vol1, &connector("compute-2"))
            .await
            .unwrap();
        array
            .initialize_connection(&vol2, &connector("compute-2"))
            .await
            .unwrap();

        array.delete_volume(&vol1).await.unwrap();
        assert!(array.storage_group("compute-1").is_none());
        assert_eq!(array.storage_group("compute-2").map(|g| g.len()), Some(1));
    }

    #[tokio::test]
    async fn test_records_track_lineage() {
        let array = array();
        let vol = volume("volume-1", 10);
        array.create_volume(&vol).await.unwrap();
        let snap = snapshot("snapshot-1", &vol);
        array.create_snapshot(&snap).await.unwrap();
        let restored = volume("volume-2", 10);
        array
            .create_volume_from_snapshot(&restored, &snap)
            .await
            .unwrap();

        let source = array.lun_record("volume-1").unwrap();
        assert_eq!(source.volume_id, "volume-1-id");
        assert_eq!(source.source_snapshot, None);

        let record = array.lun_record("volume-2").unwrap();
        assert_eq!(record.id, source.id + 1);
        assert_eq!(record.source_snapshot.as_deref(), Some("snapshot-1"));
        assert!(record.created_at >= source.created_at);

        let snap_record = array.snapshot_record("snapshot-1").unwrap();
        assert_eq!(snap_record.lun_name, "volume-1");
        assert_eq!(snap_record.size_gb, 10);
        assert!(snap_record.created_at <= record.created_at);
        assert!(array.lun_record("volume-9").is_none());
    }

    #[test]
    fn test_config_from_configuration() {
        let configuration = Configuration::new("vnx")
            .with_value(SAN_IP, "10.10.61.35")
            .with_value(STORAGE_POOL_NAME, "Pool_02_NLSAS")
            .with_value(MAX_LUNS_PER_STORAGE_GROUP, "64")
            .with_value(DESTROY_EMPTY_STORAGE_GROUP, "true");

        let config = SimulatedArrayConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.iscsi_portal_ip, "10.10.61.35");
        assert_eq!(config.pool_name, "Pool_02_NLSAS");
        assert_eq!(config.max_luns_per_storage_group, 64);
        assert!(config.destroy_empty_storage_group);
        assert!(config.initiator_auto_registration);

        let configuration = configuration.with_value(ISCSI_PORTAL_IP, "10.10.62.1");
        let config = SimulatedArrayConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.iscsi_portal_ip, "10.10.62.1");
    }
}
