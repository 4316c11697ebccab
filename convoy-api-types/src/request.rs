//! Request bodies of the client API and the docker plugin protocol.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeCreateRequest {
    pub name: String,
    pub driver_name: String,
    /// Bytes or human readable size (`10G`)
    pub size: String,
    #[serde(rename = "BackupURL")]
    pub backup_url: String,
    #[serde(rename = "DriverVolumeID")]
    pub driver_volume_id: String,
    #[serde(rename = "Type")]
    pub volume_type: String,
    #[serde(rename = "IOPS")]
    pub iops: u64,
    #[serde(rename = "PrepareForVM")]
    pub prepare_for_vm: bool,
    pub filesystem: String,
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeDeleteRequest {
    pub volume_name: String,
    pub reference_only: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeInspectRequest {
    pub volume_name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeMountRequest {
    pub volume_name: String,
    pub mount_point: String,
    /// `rw` or `ro`, empty means `rw`
    pub read_write: String,
    pub bind_mount: String,
    pub re_mount: bool,
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeUmountRequest {
    pub volume_name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotCreateRequest {
    pub name: String,
    pub volume_name: String,
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotDeleteRequest {
    pub snapshot_name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotInspectRequest {
    pub snapshot_name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupListRequest {
    #[serde(rename = "URL")]
    pub url: String,
    pub volume_name: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupInspectRequest {
    #[serde(rename = "URL")]
    pub url: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupCreateRequest {
    #[serde(rename = "URL")]
    pub url: String,
    pub snapshot_name: String,
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupDeleteRequest {
    #[serde(rename = "URL")]
    pub url: String,
}

/// Body of every `VolumeDriver.*` call.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PluginRequest {
    pub name: String,
    pub opts: HashMap<String, String>,
}

#[test]
fn test_request_field_names() {
    let req: VolumeCreateRequest = serde_json::from_str(
        r#"{"Name":"db","Size":"10G","BackupURL":"vfs:///x?backup=b&volume=v","PrepareForVM":true}"#,
    )
    .unwrap();
    assert_eq!(req.name, "db");
    assert_eq!(req.size, "10G");
    assert!(req.backup_url.starts_with("vfs://"));
    assert!(req.prepare_for_vm);
    assert!(!req.verbose);

    let req: PluginRequest = serde_json::from_str(r#"{"Name":"db"}"#).unwrap();
    assert!(req.opts.is_empty());
}
