//! Daemon state shared by all request handlers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use convoy_api_types::{check_name, volume_bail, DaemonConfig};
use convoy_config::{
    config_exists, list_config_ids, load_config, save_config, ConfigObject, CFG_POSTFIX,
};

use crate::driver::{
    get_driver, BackupOperations, DriverOpts, SnapshotOperations, StorageDriver, VolumeOperations,
};
use crate::index::Index;

pub const CONFIG_FILE: &str = "convoy.cfg";
pub const LOCK_FILE: &str = "lock";

const VOLUME_CFG_PREFIX: &str = "volume_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SnapshotRecord {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "VolumeUUID")]
    pub volume_uuid: String,
    pub name: String,
    pub created_time: String,
}

/// Volume as tracked by the daemon, stored as `<root>/volume_<uuid>.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeRecord {
    #[serde(skip)]
    pub root: PathBuf,
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub name: String,
    pub driver_name: String,
    pub file_system: String,
    pub created_time: String,
    /// Keyed by snapshot UUID.
    pub snapshots: HashMap<String, SnapshotRecord>,
}

impl ConfigObject for VolumeRecord {
    fn config_file(&self) -> Result<PathBuf, Error> {
        if self.uuid.is_empty() {
            bail!("BUG: invalid empty volume uuid");
        }
        Ok(self
            .root
            .join(format!("{}{}{}", VOLUME_CFG_PREFIX, self.uuid, CFG_POSTFIX)))
    }
}

/// Load `<root>/convoy.cfg` if present.
pub fn load_daemon_config(root: &Path) -> Result<Option<DaemonConfig>, Error> {
    let path = root.join(CONFIG_FILE);
    if !config_exists(&path) {
        return Ok(None);
    }
    let mut config: DaemonConfig = load_config(&path)?;
    config.root = root.to_string_lossy().to_string();
    Ok(Some(config))
}

pub fn save_daemon_config(config: &DaemonConfig) -> Result<(), Error> {
    if config.root.is_empty() {
        bail!("BUG: invalid empty daemon config root");
    }
    save_config(&Path::new(&config.root).join(CONFIG_FILE), config)
}

pub struct Daemon {
    pub config: DaemonConfig,
    root: PathBuf,
    // kept in declaration order, the first one is the default
    drivers: Vec<Arc<dyn StorageDriver>>,
    /// Volume and snapshot names to UUIDs.
    pub name_index: Index,
    /// Snapshot UUIDs to the name of their volume.
    pub snapshot_index: Index,
    global_lock: RwLock<()>,
}

impl Daemon {
    /// Initialize the configured drivers and rebuild the indices from the
    /// volume records below the root directory.
    pub fn new(config: DaemonConfig, driver_opts: &DriverOpts) -> Result<Self, Error> {
        if config.root.is_empty() {
            bail!("missing daemon root directory");
        }
        if config.driver_list.is_empty() {
            volume_bail!(InvalidArgument, "no storage driver configured");
        }
        let root = PathBuf::from(&config.root);

        let mut drivers = Vec::new();
        for name in &config.driver_list {
            log::debug!("initializing driver {}", name);
            let driver = get_driver(name, &root, driver_opts)
                .map_err(|err| format_err!("unable to initialize driver {} - {}", name, err))?;
            drivers.push(driver);
        }

        let daemon = Self {
            config,
            root,
            drivers,
            name_index: Index::new(),
            snapshot_index: Index::new(),
            global_lock: RwLock::new(()),
        };
        daemon.rebuild_indices()?;
        Ok(daemon)
    }

    fn rebuild_indices(&self) -> Result<(), Error> {
        let mut volumes = 0;
        for uuid in self.volume_uuids()? {
            let volume = self.load_volume(&uuid)?;
            if !volume.name.is_empty() {
                self.name_index.add(&volume.name, &volume.uuid)?;
            }
            for snapshot in volume.snapshots.values() {
                self.snapshot_index.add(&snapshot.uuid, &volume.name)?;
                if !snapshot.name.is_empty() {
                    self.name_index.add(&snapshot.name, &snapshot.uuid)?;
                }
            }
            volumes += 1;
        }
        log::info!("found {} existing volumes", volumes);
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared handler lock, see [Daemon::write_lock].
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.global_lock.read().unwrap()
    }

    /// Serializes handlers which change state.
    pub fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.global_lock.write().unwrap()
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Arc<dyn StorageDriver>> {
        self.drivers.iter()
    }

    pub fn driver(&self, name: &str) -> Result<&Arc<dyn StorageDriver>, Error> {
        match self.drivers.iter().find(|driver| driver.name() == name) {
            Some(driver) => Ok(driver),
            None => volume_bail!(InvalidArgument, "cannot find driver {}", name),
        }
    }

    pub fn volume_ops(&self, volume: &VolumeRecord) -> Result<&dyn VolumeOperations, Error> {
        self.driver(&volume.driver_name)?.volume_ops()
    }

    pub fn snapshot_ops(&self, volume: &VolumeRecord) -> Result<&dyn SnapshotOperations, Error> {
        self.driver(&volume.driver_name)?.snapshot_ops()
    }

    pub fn backup_ops(&self, volume: &VolumeRecord) -> Result<&dyn BackupOperations, Error> {
        self.driver(&volume.driver_name)?.backup_ops()
    }

    pub fn volume_uuids(&self) -> Result<Vec<String>, Error> {
        list_config_ids(&self.root, VOLUME_CFG_PREFIX, CFG_POSTFIX)
    }

    /// Empty record bound to this daemon's root.
    pub fn new_volume_record(&self, uuid: &str) -> VolumeRecord {
        VolumeRecord {
            root: self.root.clone(),
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    pub fn load_volume(&self, uuid: &str) -> Result<VolumeRecord, Error> {
        let path = self.new_volume_record(uuid).config_file()?;
        if !config_exists(&path) {
            volume_bail!(NotFound, "volume {} doesn't exist", uuid);
        }
        let mut volume: VolumeRecord = load_config(&path)?;
        volume.root = self.root.clone();
        Ok(volume)
    }

    pub fn get_volume_by_name(&self, name: &str) -> Result<VolumeRecord, Error> {
        if name.is_empty() {
            volume_bail!(InvalidArgument, "missing volume name");
        }
        check_name(name)?;
        let uuid = self.name_index.get(name);
        if uuid.is_empty() || self.snapshot_index.contains(&uuid) {
            volume_bail!(NotFound, "volume {} doesn't exist", name);
        }
        self.load_volume(&uuid)
    }

    /// Find a snapshot by name, along with its volume.
    pub fn get_snapshot_by_name(&self, name: &str) -> Result<(VolumeRecord, SnapshotRecord), Error> {
        if name.is_empty() {
            volume_bail!(InvalidArgument, "missing snapshot name");
        }
        check_name(name)?;
        let uuid = self.name_index.get(name);
        let volume_name = if uuid.is_empty() {
            String::new()
        } else {
            self.snapshot_index.get(&uuid)
        };
        if volume_name.is_empty() {
            volume_bail!(NotFound, "snapshot {} doesn't exist", name);
        }

        let volume = self.get_volume_by_name(&volume_name)?;
        let snapshot = match volume.snapshots.get(&uuid) {
            Some(snapshot) => snapshot.clone(),
            None => volume_bail!(NotFound, "snapshot {} of volume {} doesn't exist", name, volume_name),
        };
        Ok((volume, snapshot))
    }

    /// `<prefix>-<first 8 chars of uuid>`, drawing a new UUID until the
    /// name is unused.
    pub fn unique_default_name(&self, prefix: &str, uuid: &mut String) -> String {
        loop {
            let name = format!("{}-{}", prefix, &uuid[..8]);
            if !self.name_index.contains(&name) {
                return name;
            }
            *uuid = convoy_tools::generate_uuid();
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::driver::test::testdir;
    use convoy_config::save_object;

    pub(crate) fn test_daemon(dir: &Path) -> Daemon {
        let config = DaemonConfig {
            root: dir.join("root").to_string_lossy().to_string(),
            driver_list: vec!["vfs".to_string()],
            default_driver: "vfs".to_string(),
            ..Default::default()
        };
        std::fs::create_dir_all(&config.root).unwrap();
        let mut opts = HashMap::new();
        opts.insert(
            "vfs.path".to_string(),
            dir.join("volumes").to_string_lossy().to_string(),
        );
        Daemon::new(config, &opts).unwrap()
    }

    #[test]
    fn test_rebuild_indices() {
        let dir = testdir("daemon-indices");
        let daemon = test_daemon(&dir);
        assert!(daemon.name_index.is_empty());

        let mut volume = daemon.new_volume_record("0a1b2c3d-0000-0000-0000-000000000001");
        volume.name = "db".into();
        volume.driver_name = "vfs".into();
        volume.snapshots.insert(
            "snap-uuid".into(),
            SnapshotRecord {
                uuid: "snap-uuid".into(),
                volume_uuid: volume.uuid.clone(),
                name: "nightly".into(),
                created_time: String::new(),
            },
        );
        save_object(&volume).unwrap();

        let daemon = test_daemon(&dir);
        assert_eq!(daemon.name_index.get("db"), volume.uuid);
        assert_eq!(daemon.name_index.get("nightly"), "snap-uuid");
        assert_eq!(daemon.snapshot_index.get("snap-uuid"), "db");

        assert_eq!(daemon.get_volume_by_name("db").unwrap(), volume);
        let (owner, snapshot) = daemon.get_snapshot_by_name("nightly").unwrap();
        assert_eq!(owner.uuid, volume.uuid);
        assert_eq!(snapshot.uuid, "snap-uuid");
        // snapshot names don't resolve as volumes
        assert!(daemon.get_volume_by_name("nightly").is_err());
        assert!(daemon.get_snapshot_by_name("db").is_err());

        let mut uuid = volume.uuid.clone();
        let name = daemon.unique_default_name("volume", &mut uuid);
        assert_eq!(name, "volume-0a1b2c3d");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_daemon_config_roundtrip() {
        let dir = testdir("daemon-config");
        assert!(load_daemon_config(&dir).unwrap().is_none());
        let config = DaemonConfig {
            root: dir.to_string_lossy().to_string(),
            driver_list: vec!["vfs".into(), "image".into()],
            default_driver: "vfs".into(),
            cmd_timeout: "30s".into(),
            ..Default::default()
        };
        save_daemon_config(&config).unwrap();
        assert_eq!(load_daemon_config(&dir).unwrap(), Some(config));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
