//! Domain Ports - Core trait definitions for the volume driver
//!
//! These traits define the two boundaries of the driver: the lifecycle
//! contract the host framework calls into, and the array CLI contract the
//! driver delegates to. The record types are owned by those two sides and
//! are only passed through by the driver.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Protocol
// =============================================================================

/// Storage protocol a collaborator is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "iSCSI")]
    Iscsi,
    #[serde(rename = "FC")]
    FibreChannel,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Iscsi => write!(f, "iSCSI"),
            Protocol::FibreChannel => write!(f, "FC"),
        }
    }
}

// =============================================================================
// Host Framework Records
// =============================================================================

/// Caller context attached to a lifecycle request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl RequestContext {
    /// Admin context used for internal and anonymous calls
    pub fn admin(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            project_id: None,
            user_id: None,
            is_admin: true,
        }
    }
}

/// A block volume as known to the host framework
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume UUID
    pub id: String,
    /// Backend name of the volume (e.g., volume-<uuid>)
    pub name: String,
    /// Size in GB
    pub size_gb: u64,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Location string previously returned by the backend
    #[serde(default)]
    pub provider_location: Option<String>,
    #[serde(default)]
    pub volume_type_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A point-in-time snapshot of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    /// Source volume UUID
    pub volume_id: String,
    /// Source volume backend name
    pub volume_name: String,
    /// Source volume size in GB at snapshot time
    pub volume_size_gb: u64,
}

/// Descriptor of the initiator requesting a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    /// iSCSI initiator IQN
    pub initiator: String,
    /// Hostname of the attaching node
    pub host: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub multipath: bool,
    /// Fibre Channel port names, unused by iSCSI
    #[serde(default)]
    pub wwpns: Vec<String>,
}

/// Destination backend of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host string (e.g., node@backend#pool)
    pub host: String,
    /// Capabilities reported by the destination backend
    #[serde(default)]
    pub capabilities: BTreeMap<String, serde_json::Value>,
}

impl HostInfo {
    /// `location_info` capability, if present and a string
    pub fn location_info(&self) -> Option<&str> {
        self.capabilities
            .get("location_info")
            .and_then(|value| value.as_str())
    }
}

/// Volume model fields the backend asks the host framework to persist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_auth: Option<String>,
}

/// Result of a backend-assisted migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationOutcome {
    /// Whether the backend moved the volume itself
    pub moved: bool,
    #[serde(default)]
    pub model_update: Option<ModelUpdate>,
}

// =============================================================================
// Connection Info
// =============================================================================

/// Driver volume type reported for iSCSI attachments
pub const ISCSI_VOLUME_TYPE: &str = "iscsi";

/// Connection descriptor returned to storage-attach clients.
///
/// The serialized shape is consumed by attach clients and must stay:
///
/// ```text
/// {
///     "driver_volume_type": "iscsi",
///     "data": {
///         "target_discovered": true,
///         "target_iqn": "iqn.1992-04.com.emc:cx.apm00123456789.a4",
///         "target_portal": "10.10.61.35:3260",
///         "volume_id": "a1b2...",
///         "target_lun": 1
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub driver_volume_type: String,
    pub data: IscsiTargetProperties,
}

/// iSCSI target properties for one attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IscsiTargetProperties {
    pub target_discovered: bool,
    pub target_iqn: String,
    pub target_portal: String,
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lun: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
}

impl ConnectionInfo {
    /// Build an iSCSI connection descriptor
    pub fn iscsi(data: IscsiTargetProperties) -> Self {
        Self {
            driver_volume_type: ISCSI_VOLUME_TYPE.to_string(),
            data,
        }
    }
}

/// Options accepted by terminate_connection that the driver does not use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateOptions {
    #[serde(default)]
    pub force: bool,
}

// =============================================================================
// Volume Stats
// =============================================================================

/// Backend capability and capacity report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    #[serde(default)]
    pub volume_backend_name: String,
    #[serde(default)]
    pub storage_protocol: String,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub driver_version: String,
    pub total_capacity_gb: u64,
    pub free_capacity_gb: u64,
    #[serde(default)]
    pub reserved_percentage: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_info: Option<String>,
    /// Additional backend capabilities
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// Volume Driver Port (host contract)
// =============================================================================

/// Lifecycle hooks the host orchestration framework invokes on a backend
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Verify the driver is usable
    async fn check_for_setup_error(&self) -> Result<()>;

    async fn create_volume(&self, volume: &Volume) -> Result<()>;

    async fn create_volume_from_snapshot(&self, volume: &Volume, snapshot: &Snapshot)
        -> Result<()>;

    async fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> Result<()>;

    async fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> Result<()>;

    async fn delete_volume(&self, volume: &Volume) -> Result<()>;

    /// Ask the backend to migrate a volume to another host
    async fn migrate_volume(
        &self,
        context: &RequestContext,
        volume: &Volume,
        host: &HostInfo,
    ) -> Result<MigrationOutcome>;

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Recreate the export of an existing volume
    async fn ensure_export(&self, context: &RequestContext, volume: &Volume) -> Result<()>;

    /// Export a new volume
    async fn create_export(&self, context: &RequestContext, volume: &Volume) -> Result<()>;

    async fn remove_export(&self, context: &RequestContext, volume: &Volume) -> Result<()>;

    async fn check_for_export(&self, context: &RequestContext, volume_id: &str) -> Result<()>;

    /// Attach a volume to the connector and describe the target
    async fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo>;

    async fn terminate_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
        options: &TerminateOptions,
    ) -> Result<()>;

    /// Return cached stats, refreshing them first when asked
    async fn get_volume_stats(&self, refresh: bool) -> Result<Option<VolumeStats>>;

    /// Driver name used in logs
    fn driver_name(&self) -> &str;
}

// =============================================================================
// Array CLI Port (collaborator contract)
// =============================================================================

/// Orchestration of the array's command-line interface
#[async_trait]
pub trait ArrayCli: Send + Sync {
    /// Protocol this collaborator was created for
    fn protocol(&self) -> Protocol;

    async fn create_volume(&self, volume: &Volume) -> Result<()>;

    async fn create_volume_from_snapshot(&self, volume: &Volume, snapshot: &Snapshot)
        -> Result<()>;

    async fn create_cloned_volume(&self, volume: &Volume, src_vref: &Volume) -> Result<()>;

    async fn extend_volume(&self, volume: &Volume, new_size_gb: u64) -> Result<()>;

    async fn delete_volume(&self, volume: &Volume) -> Result<()>;

    async fn migrate_volume(
        &self,
        context: &RequestContext,
        volume: &Volume,
        host: &HostInfo,
    ) -> Result<MigrationOutcome>;

    async fn create_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn create_export(
        &self,
        context: &RequestContext,
        volume: &Volume,
    ) -> Result<Option<ModelUpdate>>;

    async fn initialize_connection(
        &self,
        volume: &Volume,
        connector: &Connector,
    ) -> Result<ConnectionInfo>;

    async fn terminate_connection(&self, volume: &Volume, connector: &Connector) -> Result<()>;

    /// Query the array for fresh capacity and capability data
    async fn update_volume_status(&self) -> Result<VolumeStats>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeDriverRef = Arc<dyn VolumeDriver>;
pub type ArrayCliRef = Arc<dyn ArrayCli>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display() {
        assert_eq!(format!("{}", Protocol::Iscsi), "iSCSI");
        assert_eq!(format!("{}", Protocol::FibreChannel), "FC");
    }

    #[test]
    fn test_connection_info_wire_shape() {
        let info = ConnectionInfo::iscsi(IscsiTargetProperties {
            target_discovered: true,
            target_iqn: "iqn.2010-10.org.openstack:volume-00000001".into(),
            target_portal: "127.0.0.1:3260".into(),
            volume_id: "1".into(),
            target_lun: None,
            auth_method: None,
            auth_username: None,
            auth_password: None,
        });

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "driver_volume_type": "iscsi",
                "data": {
                    "target_discovered": true,
                    "target_iqn": "iqn.2010-10.org.openstack:volume-00000001",
                    "target_portal": "127.0.0.1:3260",
                    "volume_id": "1"
                }
            })
        );
    }

    #[test]
    fn test_volume_stats_extra_capabilities_flatten() {
        let mut stats = VolumeStats {
            total_capacity_gb: 100,
            free_capacity_gb: 40,
            ..Default::default()
        };
        stats
            .extra
            .insert("thin_provisioning_support".into(), serde_json::json!(true));

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["thin_provisioning_support"], serde_json::json!(true));
        assert!(value.get("location_info").is_none());
    }

    #[test]
    fn test_host_location_info() {
        let mut host = HostInfo {
            host: "node1@vnx#Pool_02".into(),
            capabilities: BTreeMap::new(),
        };
        assert_eq!(host.location_info(), None);

        host.capabilities.insert(
            "location_info".into(),
            serde_json::json!("Pool_02|APM00123456789"),
        );
        assert_eq!(host.location_info(), Some("Pool_02|APM00123456789"));
    }
}
