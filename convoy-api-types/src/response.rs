//! Response bodies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeResponse {
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub name: String,
    pub driver: String,
    pub mount_point: String,
    pub created_time: String,
    pub driver_info: HashMap<String, String>,
    pub snapshots: HashMap<String, SnapshotResponse>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotResponse {
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub name: String,
    #[serde(rename = "VolumeUUID", skip_serializing_if = "String::is_empty")]
    pub volume_uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume_created_at: String,
    pub created_time: String,
    pub driver_info: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BackupURLResponse {
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginInfo {
    pub implements: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginVolume {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginCapabilities {
    pub scope: String,
}

/// Reply of the `VolumeDriver.*` calls, unused fields are omitted.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mountpoint: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub err: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<PluginVolume>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<PluginVolume>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<PluginCapabilities>,
}

impl PluginResponse {
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Self {
            err: err.to_string(),
            ..Default::default()
        }
    }

    pub fn mountpoint(mountpoint: String) -> Self {
        Self {
            mountpoint,
            ..Default::default()
        }
    }
}

/// Backup information as returned by backup inspect and list.
///
/// The map keys are stable across drivers, see the `BACKUP_INFO_*` keys.
pub type BackupInfo = HashMap<String, String>;

pub const BACKUP_INFO_NAME: &str = "BackupName";
pub const BACKUP_INFO_URL: &str = "BackupURL";
pub const BACKUP_INFO_DRIVER: &str = "DriverName";
pub const BACKUP_INFO_VOLUME_NAME: &str = "VolumeName";
pub const BACKUP_INFO_VOLUME_SIZE: &str = "VolumeSize";
pub const BACKUP_INFO_VOLUME_CREATED_AT: &str = "VolumeCreatedAt";
pub const BACKUP_INFO_SNAPSHOT_NAME: &str = "SnapshotName";
pub const BACKUP_INFO_SNAPSHOT_CREATED_AT: &str = "SnapshotCreatedAt";
pub const BACKUP_INFO_CREATED_TIME: &str = "CreatedTime";
pub const BACKUP_INFO_IS_INCREMENTAL: &str = "IsIncremental";
pub const BACKUP_INFO_FILE: &str = "BackupFile";

/// Persisted daemon configuration, also reported as `General` by `/info`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DaemonConfig {
    pub root: String,
    pub driver_list: Vec<String>,
    pub default_driver: String,
    #[serde(rename = "MountNamespaceFD")]
    pub mount_namespace_fd: String,
    pub ignore_docker_delete: bool,
    pub create_on_docker_mount: bool,
    pub cmd_timeout: String,
}

#[test]
fn test_plugin_response_omits_unused() {
    let text = serde_json::to_string(&PluginResponse::mountpoint("/mnt/x".into())).unwrap();
    assert_eq!(text, r#"{"Mountpoint":"/mnt/x"}"#);
    let text = serde_json::to_string(&PluginResponse::error("boom")).unwrap();
    assert_eq!(text, r#"{"Err":"boom"}"#);
}
