//! Storage driver contract and registry.
//!
//! A storage driver provides volumes. Beyond the mandatory
//! [VolumeOperations] it may offer [SnapshotOperations] and
//! [BackupOperations]; the capability queries on [StorageDriver] fail with a
//! `NotSupported` error when a capability is absent.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Error};
use lazy_static::lazy_static;

use convoy_api_types::{parse_bool_opt, volume_bail};

pub mod image;
pub mod vfs;

/// String map handed to drivers with every request, keys are the `OPT_*`
/// constants from [convoy_api_types::opts].
pub type DriverOpts = HashMap<String, String>;

/// Driver info as shown by inspect and `/info`.
pub type DriverInfo = HashMap<String, String>;

/// Request addressed to a driver: the object name plus options.
#[derive(Clone, Debug, Default)]
pub struct DriverRequest {
    pub name: String,
    pub options: DriverOpts,
}

impl DriverRequest {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_opt<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Option value, empty if unset.
    pub fn opt(&self, key: &str) -> &str {
        self.options.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn bool_opt(&self, key: &str) -> Result<bool, Error> {
        parse_bool_opt(self.options.get(key))
    }
}

pub trait StorageDriver: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> Result<DriverInfo, Error>;

    fn volume_ops(&self) -> Result<&dyn VolumeOperations, Error>;

    fn snapshot_ops(&self) -> Result<&dyn SnapshotOperations, Error> {
        volume_bail!(NotSupported, "driver {} doesn't support snapshot operations", self.name())
    }

    fn backup_ops(&self) -> Result<&dyn BackupOperations, Error> {
        volume_bail!(NotSupported, "driver {} doesn't support backup operations", self.name())
    }
}

pub trait VolumeOperations {
    /// Fails with `AlreadyExists` if a volume of that name is present.
    fn create(&self, req: &DriverRequest) -> Result<(), Error>;

    /// With `ReferenceOnly` set only local records go away.
    fn delete(&self, req: &DriverRequest) -> Result<(), Error>;

    /// Mount and return the mount point. Mounting again at the recorded
    /// mount point is a no-op.
    fn mount(&self, req: &DriverRequest) -> Result<String, Error>;

    fn umount(&self, req: &DriverRequest) -> Result<(), Error>;

    /// Current mount point, empty if not mounted.
    fn mount_point(&self, req: &DriverRequest) -> Result<String, Error>;

    fn get_volume_info(&self, name: &str) -> Result<DriverInfo, Error>;

    fn list_volume(&self, opts: &DriverOpts) -> Result<HashMap<String, DriverInfo>, Error>;
}

/// Snapshot requests carry the owning volume as `VolumeName` option.
pub trait SnapshotOperations {
    fn create_snapshot(&self, req: &DriverRequest) -> Result<(), Error>;

    fn delete_snapshot(&self, req: &DriverRequest) -> Result<(), Error>;

    fn get_snapshot_info(&self, req: &DriverRequest) -> Result<DriverInfo, Error>;

    fn list_snapshot(&self, opts: &DriverOpts) -> Result<HashMap<String, DriverInfo>, Error>;
}

pub trait BackupOperations {
    /// Back up `snapshot_name` of `volume_name` to `dest_url`, returning the
    /// backup URL.
    fn create_backup(
        &self,
        snapshot_name: &str,
        volume_name: &str,
        dest_url: &str,
        opts: &DriverOpts,
    ) -> Result<String, Error>;

    fn delete_backup(&self, backup_url: &str) -> Result<(), Error>;

    fn get_backup_info(&self, backup_url: &str) -> Result<DriverInfo, Error>;

    fn list_backup(
        &self,
        dest_url: &str,
        opts: &DriverOpts,
    ) -> Result<HashMap<String, DriverInfo>, Error>;
}

/// Driver factory, called with the daemon root and the driver options
/// given on the command line.
pub type InitFn = fn(root: &Path, config: &DriverOpts) -> Result<Arc<dyn StorageDriver>, Error>;

lazy_static! {
    static ref STORAGE_DRIVERS: RwLock<HashMap<String, InitFn>> = {
        let mut map: HashMap<String, InitFn> = HashMap::new();
        map.insert(vfs::DRIVER_NAME.to_string(), vfs::init);
        map.insert(image::DRIVER_NAME.to_string(), image::init);
        RwLock::new(map)
    };
}

/// Register an additional storage driver. Registering a name twice fails.
pub fn register_driver(name: &str, init: InitFn) -> Result<(), Error> {
    let mut map = STORAGE_DRIVERS.write().unwrap();
    if map.contains_key(name) {
        bail!("storage driver {} has already been registered", name);
    }
    map.insert(name.to_string(), init);
    Ok(())
}

pub fn registered_drivers() -> Vec<String> {
    let mut list: Vec<String> = STORAGE_DRIVERS.read().unwrap().keys().cloned().collect();
    list.sort();
    list
}

/// Initialize driver `name` below `root`.
pub fn get_driver(name: &str, root: &Path, config: &DriverOpts) -> Result<Arc<dyn StorageDriver>, Error> {
    let init = match STORAGE_DRIVERS.read().unwrap().get(name) {
        Some(init) => *init,
        None => volume_bail!(NotSupported, "storage driver {} is not supported", name),
    };
    init(root, config)
}

/// Split `key=value` pairs as given by `--driver-opts`.
pub fn parse_driver_opts<S: AsRef<str>>(list: &[S]) -> Result<DriverOpts, Error> {
    let mut opts = HashMap::new();
    for item in list {
        let item = item.as_ref();
        match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                opts.insert(key.to_string(), value.to_string());
            }
            _ => volume_bail!(InvalidArgument, "invalid driver option {:?} - expected key=value", item),
        }
    }
    Ok(opts)
}

#[cfg(test)]
pub(crate) mod test {
    use std::path::PathBuf;

    use super::*;

    pub(crate) fn testdir(name: &str) -> PathBuf {
        let mut path = std::fs::canonicalize(".").unwrap();
        path.push(".testdir");
        path.push(name);
        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
        }
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_registry() {
        let names = registered_drivers();
        assert!(names.contains(&"vfs".to_string()));
        assert!(names.contains(&"image".to_string()));
        assert!(register_driver("vfs", vfs::init).is_err());

        let err = get_driver("ebs", Path::new("/nonexistent"), &HashMap::new())
            .err()
            .unwrap();
        assert_eq!(
            convoy_api_types::error_kind(&err),
            Some(convoy_api_types::ErrorKind::NotSupported)
        );
    }

    #[test]
    fn test_parse_driver_opts() {
        let opts = parse_driver_opts(&["vfs.path=/srv/vol", "a=b=c"]).unwrap();
        assert_eq!(opts["vfs.path"], "/srv/vol");
        assert_eq!(opts["a"], "b=c");
        assert!(parse_driver_opts(&["novalue"]).is_err());
        assert!(parse_driver_opts(&["=x"]).is_err());
    }

    #[test]
    fn test_driver_request() {
        let req = DriverRequest::new("db").with_opt("ReferenceOnly", "true");
        assert!(req.bool_opt("ReferenceOnly").unwrap());
        assert!(!req.bool_opt("PrepareForVM").unwrap());
        assert_eq!(req.opt("MountPoint"), "");
    }
}
