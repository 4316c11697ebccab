//! Option keys understood by the storage drivers.
//!
//! Drivers receive a string map with these keys along with every request.

pub const OPT_MOUNT_POINT: &str = "MountPoint";
pub const OPT_SIZE: &str = "Size";
pub const OPT_FILESYSTEM: &str = "Filesystem";
pub const OPT_BACKUP_URL: &str = "BackupURL";
pub const OPT_VOLUME_NAME: &str = "VolumeName";
pub const OPT_VOLUME_DRIVER_ID: &str = "VolumeDriverID";
pub const OPT_VOLUME_TYPE: &str = "VolumeType";
pub const OPT_VOLUME_IOPS: &str = "VolumeIOPS";
pub const OPT_VOLUME_CREATED_TIME: &str = "VolumeCreatedAt";
pub const OPT_SNAPSHOT_NAME: &str = "SnapshotName";
pub const OPT_SNAPSHOT_CREATED_TIME: &str = "SnapshotCreatedAt";
pub const OPT_PREPARE_FOR_VM: &str = "PrepareForVM";
pub const OPT_REFERENCE_ONLY: &str = "ReferenceOnly";
pub const OPT_READ_WRITE: &str = "ReadWrite";
pub const OPT_BIND_MOUNT: &str = "BindMount";
pub const OPT_REMOUNT: &str = "ReMount";

/// Key used in driver info maps for the driver name
pub const INFO_DRIVER: &str = "Driver";
