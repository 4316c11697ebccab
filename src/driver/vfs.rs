//! Directory backed volumes.
//!
//! Every volume is a directory below `vfs.path`. Snapshots are `.tar.gz`
//! archives of that directory and are backed up as single files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use convoy_api_types::opts::*;
use convoy_api_types::{parse_size, volume_bail, HumanByte};
use convoy_config::{
    config_exists, delete_object, list_config_ids, load_config, lock_object, save_object,
    ConfigObject, CFG_POSTFIX,
};
use convoy_objectstore::singlefile::{
    create_single_file_backup, delete_single_file_backup, restore_single_file_backup,
};

use super::{
    BackupOperations, DriverInfo, DriverOpts, DriverRequest, SnapshotOperations, StorageDriver,
    VolumeOperations,
};

pub const DRIVER_NAME: &str = "vfs";

const KEY_PATH: &str = "vfs.path";
const KEY_DEFAULT_VOLUME_SIZE: &str = "vfs.defaultvolumesize";
const DEFAULT_VOLUME_SIZE: &str = "100G";

const VOLUME_CFG_PREFIX: &str = "vfs_volume_";
const SNAPSHOTS_DIR: &str = "snapshots";
const VM_IMAGE_FILE: &str = "disk.img";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DriverConfig {
    #[serde(skip)]
    root: PathBuf,
    path: String,
    default_volume_size: u64,
}

impl ConfigObject for DriverConfig {
    fn config_file(&self) -> Result<PathBuf, Error> {
        Ok(self.root.join(format!("{}.cfg", DRIVER_NAME)))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VfsSnapshot {
    name: String,
    file_path: String,
    created_time: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct VfsVolume {
    #[serde(skip)]
    root: PathBuf,
    name: String,
    path: String,
    mount_point: String,
    size: u64,
    #[serde(rename = "PrepareForVM")]
    prepare_for_vm: bool,
    created_time: String,
    snapshots: HashMap<String, VfsSnapshot>,
}

impl ConfigObject for VfsVolume {
    fn config_file(&self) -> Result<PathBuf, Error> {
        if self.name.is_empty() {
            bail!("BUG: invalid empty volume name");
        }
        Ok(self
            .root
            .join(format!("{}{}{}", VOLUME_CFG_PREFIX, self.name, CFG_POSTFIX)))
    }
}

pub struct VfsDriver {
    root: PathBuf,
    config: DriverConfig,
}

/// Set up the driver below `<root>/vfs`. Options are only used when no
/// driver config exists yet.
pub fn init(root: &Path, opts: &DriverOpts) -> Result<Arc<dyn StorageDriver>, Error> {
    let driver_root = root.join(DRIVER_NAME);
    std::fs::create_dir_all(&driver_root)
        .map_err(|err| format_err!("unable to create {:?} - {}", driver_root, err))?;

    let mut config = DriverConfig {
        root: driver_root.clone(),
        ..Default::default()
    };
    let config_file = config.config_file()?;
    if config_exists(&config_file) {
        config = load_config(&config_file)?;
        config.root = driver_root.clone();
    } else {
        config.path = match opts.get(KEY_PATH) {
            Some(path) if !path.is_empty() => path.clone(),
            _ => volume_bail!(InvalidArgument, "missing required option {}", KEY_PATH),
        };
        let size = opts
            .get(KEY_DEFAULT_VOLUME_SIZE)
            .map(String::as_str)
            .unwrap_or(DEFAULT_VOLUME_SIZE);
        config.default_volume_size = parse_size(size)?;
    }

    std::fs::create_dir_all(&config.path)
        .map_err(|err| format_err!("unable to create vfs path {:?} - {}", config.path, err))?;
    std::fs::create_dir_all(driver_root.join(SNAPSHOTS_DIR))?;
    save_object(&config)?;

    log::info!("vfs driver initialized, volumes in {}", config.path);

    Ok(Arc::new(VfsDriver {
        root: driver_root,
        config,
    }))
}

impl VfsDriver {
    fn blank_volume(&self, name: &str) -> VfsVolume {
        VfsVolume {
            root: self.root.clone(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn volume_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(config_exists(&self.blank_volume(name).config_file()?))
    }

    fn load_volume(&self, name: &str) -> Result<VfsVolume, Error> {
        let path = self.blank_volume(name).config_file()?;
        if !config_exists(&path) {
            volume_bail!(NotFound, "volume {} doesn't exist", name);
        }
        let mut volume: VfsVolume = load_config(&path)?;
        volume.root = self.root.clone();
        Ok(volume)
    }

    fn snapshot_file(&self, volume_name: &str, snapshot_name: &str) -> PathBuf {
        self.root
            .join(SNAPSHOTS_DIR)
            .join(format!("{}_{}.tar.gz", volume_name, snapshot_name))
    }

    fn volume_info(&self, volume: &VfsVolume) -> DriverInfo {
        let mut info = HashMap::new();
        info.insert("Path".to_string(), volume.path.clone());
        info.insert(OPT_MOUNT_POINT.to_string(), volume.mount_point.clone());
        info.insert(OPT_SIZE.to_string(), volume.size.to_string());
        info.insert(OPT_PREPARE_FOR_VM.to_string(), volume.prepare_for_vm.to_string());
        info.insert(OPT_VOLUME_NAME.to_string(), volume.name.clone());
        info.insert(OPT_VOLUME_CREATED_TIME.to_string(), volume.created_time.clone());
        info
    }

    fn snapshot_info(volume: &VfsVolume, snapshot: &VfsSnapshot) -> DriverInfo {
        let mut info = HashMap::new();
        info.insert("Name".to_string(), snapshot.name.clone());
        info.insert("FilePath".to_string(), snapshot.file_path.clone());
        info.insert("CreatedTime".to_string(), snapshot.created_time.clone());
        info.insert(OPT_VOLUME_NAME.to_string(), volume.name.clone());
        info
    }

    fn restore_backup(&self, backup_url: &str, volume_path: &Path) -> Result<(), Error> {
        let backup_volume = convoy_objectstore::load_volume_for_backup(backup_url)?;
        if backup_volume.driver != DRIVER_NAME {
            volume_bail!(
                InvalidArgument,
                "cannot restore backup of driver {} with driver {}",
                backup_volume.driver,
                DRIVER_NAME
            );
        }

        std::fs::create_dir_all(volume_path)?;
        let file = restore_single_file_backup(backup_url, volume_path)?;
        let result = convoy_tools::archive::unpack_archive(&file, volume_path);
        if let Err(err) = std::fs::remove_file(&file) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("unable to remove downloaded backup {:?} - {}", file, err);
            }
        }
        result
    }

    fn prepare_vm_image(&self, volume: &VfsVolume) -> Result<(), Error> {
        let image = Path::new(&volume.path).join(VM_IMAGE_FILE);
        if image.exists() {
            return Ok(());
        }
        let size = volume.size.to_string();
        let image = image.to_string_lossy();
        convoy_tools::execute("truncate", &["-s", &size, &image])?;
        log::debug!("created vm image {} ({})", image, HumanByte::from(volume.size));
        Ok(())
    }

    fn snapshot_volume_name<'a>(&self, req: &'a DriverRequest) -> Result<&'a str, Error> {
        match req.opt(OPT_VOLUME_NAME) {
            "" => volume_bail!(InvalidArgument, "missing {} for snapshot {}", OPT_VOLUME_NAME, req.name),
            name => Ok(name),
        }
    }
}

impl StorageDriver for VfsDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn info(&self) -> Result<DriverInfo, Error> {
        let mut info = HashMap::new();
        info.insert("Root".to_string(), self.root.to_string_lossy().to_string());
        info.insert("Path".to_string(), self.config.path.clone());
        info.insert(
            "DefaultVolumeSize".to_string(),
            self.config.default_volume_size.to_string(),
        );
        Ok(info)
    }

    fn volume_ops(&self) -> Result<&dyn VolumeOperations, Error> {
        Ok(self)
    }

    fn snapshot_ops(&self) -> Result<&dyn SnapshotOperations, Error> {
        Ok(self)
    }

    fn backup_ops(&self) -> Result<&dyn BackupOperations, Error> {
        Ok(self)
    }
}

impl VolumeOperations for VfsDriver {
    fn create(&self, req: &DriverRequest) -> Result<(), Error> {
        let name = &req.name;
        if self.volume_exists(name)? {
            volume_bail!(AlreadyExists, "volume {} already exists", name);
        }

        let mut volume = self.blank_volume(name);
        let _lock = lock_object(&volume, None)?;

        volume.path = Path::new(&self.config.path)
            .join(name)
            .to_string_lossy()
            .to_string();
        volume.size = match parse_size(req.opt(OPT_SIZE))? {
            0 => self.config.default_volume_size,
            size => size,
        };
        volume.prepare_for_vm = req.bool_opt(OPT_PREPARE_FOR_VM)?;
        volume.created_time = convoy_tools::now_rfc3339()?;

        let backup_url = req.opt(OPT_BACKUP_URL);
        if !backup_url.is_empty() {
            log::debug!("restoring volume {} from {}", name, backup_url);
            self.restore_backup(backup_url, Path::new(&volume.path))?;
        } else {
            std::fs::create_dir_all(&volume.path)
                .map_err(|err| format_err!("unable to create {} - {}", volume.path, err))?;
        }

        save_object(&volume)?;
        log::debug!("created vfs volume {} at {}", name, volume.path);
        Ok(())
    }

    fn delete(&self, req: &DriverRequest) -> Result<(), Error> {
        let volume = self.load_volume(&req.name)?;
        let _lock = lock_object(&volume, None)?;

        let reference_only = req.bool_opt(OPT_REFERENCE_ONLY)?;
        if !volume.mount_point.is_empty() && !reference_only {
            volume_bail!(
                Conflict,
                "volume {} is still mounted at {}",
                volume.name,
                volume.mount_point
            );
        }

        if reference_only {
            log::debug!("keeping data of volume {} at {}", volume.name, volume.path);
        } else {
            if let Err(err) = std::fs::remove_dir_all(&volume.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    bail!("unable to remove {} - {}", volume.path, err);
                }
            }
            for snapshot in volume.snapshots.values() {
                if let Err(err) = std::fs::remove_file(&snapshot.file_path) {
                    log::warn!("unable to remove snapshot file {} - {}", snapshot.file_path, err);
                }
            }
        }

        delete_object(&volume)
    }

    fn mount(&self, req: &DriverRequest) -> Result<String, Error> {
        let mut volume = self.load_volume(&req.name)?;
        let _lock = lock_object(&volume, None)?;

        if !Path::new(&volume.path).is_dir() {
            volume_bail!(
                NotAttachedInBackend,
                "volume {} lost its directory {}",
                volume.name,
                volume.path
            );
        }

        let requested = req.opt(OPT_MOUNT_POINT);
        if !volume.mount_point.is_empty() {
            if !requested.is_empty() && requested != volume.mount_point {
                volume_bail!(
                    Conflict,
                    "volume {} already mounted at {}, cannot mount at {}",
                    volume.name,
                    volume.mount_point,
                    requested
                );
            }
            return Ok(volume.mount_point);
        }
        if !requested.is_empty() {
            volume_bail!(
                InvalidArgument,
                "vfs driver doesn't support specifying a mount point"
            );
        }

        if volume.prepare_for_vm {
            self.prepare_vm_image(&volume)?;
        }

        volume.mount_point = volume.path.clone();
        save_object(&volume)?;
        Ok(volume.mount_point)
    }

    fn umount(&self, req: &DriverRequest) -> Result<(), Error> {
        let mut volume = self.load_volume(&req.name)?;
        let _lock = lock_object(&volume, None)?;

        if volume.mount_point.is_empty() {
            log::debug!("volume {} is not mounted", volume.name);
            return Ok(());
        }
        volume.mount_point.clear();
        save_object(&volume)
    }

    fn mount_point(&self, req: &DriverRequest) -> Result<String, Error> {
        Ok(self.load_volume(&req.name)?.mount_point)
    }

    fn get_volume_info(&self, name: &str) -> Result<DriverInfo, Error> {
        let volume = self.load_volume(name)?;
        Ok(self.volume_info(&volume))
    }

    fn list_volume(&self, _opts: &DriverOpts) -> Result<HashMap<String, DriverInfo>, Error> {
        let mut result = HashMap::new();
        for name in list_config_ids(&self.root, VOLUME_CFG_PREFIX, CFG_POSTFIX)? {
            let volume = self.load_volume(&name)?;
            result.insert(name, self.volume_info(&volume));
        }
        Ok(result)
    }
}

impl SnapshotOperations for VfsDriver {
    fn create_snapshot(&self, req: &DriverRequest) -> Result<(), Error> {
        let volume_name = self.snapshot_volume_name(req)?;
        let mut volume = self.load_volume(volume_name)?;
        let _lock = lock_object(&volume, None)?;

        if volume.snapshots.contains_key(&req.name) {
            volume_bail!(
                AlreadyExists,
                "snapshot {} of volume {} already exists",
                req.name,
                volume_name
            );
        }

        let file = self.snapshot_file(volume_name, &req.name);
        convoy_tools::archive::pack_dir(Path::new(&volume.path), &file)?;

        let snapshot = VfsSnapshot {
            name: req.name.clone(),
            file_path: file.to_string_lossy().to_string(),
            created_time: convoy_tools::now_rfc3339()?,
        };
        volume.snapshots.insert(req.name.clone(), snapshot);
        save_object(&volume)
    }

    fn delete_snapshot(&self, req: &DriverRequest) -> Result<(), Error> {
        let volume_name = self.snapshot_volume_name(req)?;
        let mut volume = self.load_volume(volume_name)?;
        let _lock = lock_object(&volume, None)?;

        let snapshot = match volume.snapshots.remove(&req.name) {
            Some(snapshot) => snapshot,
            None => volume_bail!(NotFound, "snapshot {} of volume {} doesn't exist", req.name, volume_name),
        };
        if let Err(err) = std::fs::remove_file(&snapshot.file_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                bail!("unable to remove {} - {}", snapshot.file_path, err);
            }
        }
        save_object(&volume)
    }

    fn get_snapshot_info(&self, req: &DriverRequest) -> Result<DriverInfo, Error> {
        let volume = self.load_volume(self.snapshot_volume_name(req)?)?;
        match volume.snapshots.get(&req.name) {
            Some(snapshot) => Ok(Self::snapshot_info(&volume, snapshot)),
            None => volume_bail!(NotFound, "snapshot {} of volume {} doesn't exist", req.name, volume.name),
        }
    }

    fn list_snapshot(&self, opts: &DriverOpts) -> Result<HashMap<String, DriverInfo>, Error> {
        let names = match opts.get(OPT_VOLUME_NAME) {
            Some(name) if !name.is_empty() => vec![name.clone()],
            _ => list_config_ids(&self.root, VOLUME_CFG_PREFIX, CFG_POSTFIX)?,
        };
        let mut result = HashMap::new();
        for name in names {
            let volume = self.load_volume(&name)?;
            for snapshot in volume.snapshots.values() {
                result.insert(snapshot.name.clone(), Self::snapshot_info(&volume, snapshot));
            }
        }
        Ok(result)
    }
}

impl BackupOperations for VfsDriver {
    fn create_backup(
        &self,
        snapshot_name: &str,
        volume_name: &str,
        dest_url: &str,
        opts: &DriverOpts,
    ) -> Result<String, Error> {
        let volume = self.load_volume(volume_name)?;
        let snapshot = match volume.snapshots.get(snapshot_name) {
            Some(snapshot) => snapshot,
            None => volume_bail!(NotFound, "snapshot {} of volume {} doesn't exist", snapshot_name, volume_name),
        };

        let opt = |key: &str| opts.get(key).cloned().unwrap_or_default();
        let store_volume = convoy_objectstore::Volume {
            name: volume.name.clone(),
            driver: DRIVER_NAME.to_string(),
            size: volume.size as i64,
            file_system: opt(OPT_FILESYSTEM),
            created_time: opt(OPT_VOLUME_CREATED_TIME),
            ..Default::default()
        };
        let store_snapshot = convoy_objectstore::Snapshot {
            name: snapshot.name.clone(),
            created_time: match opt(OPT_SNAPSHOT_CREATED_TIME) {
                time if time.is_empty() => snapshot.created_time.clone(),
                time => time,
            },
        };

        create_single_file_backup(
            &store_volume,
            &store_snapshot,
            Path::new(&snapshot.file_path),
            dest_url,
        )
    }

    fn delete_backup(&self, backup_url: &str) -> Result<(), Error> {
        delete_single_file_backup(backup_url)
    }

    fn get_backup_info(&self, backup_url: &str) -> Result<DriverInfo, Error> {
        convoy_objectstore::get_backup_info(backup_url)
    }

    fn list_backup(
        &self,
        dest_url: &str,
        opts: &DriverOpts,
    ) -> Result<HashMap<String, DriverInfo>, Error> {
        let volume_name = opts.get(OPT_VOLUME_NAME).map(String::as_str).unwrap_or("");
        convoy_objectstore::list(volume_name, dest_url, DRIVER_NAME)
    }
}
