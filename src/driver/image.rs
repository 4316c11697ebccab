//! Raw image file backed volumes with differential backups.
//!
//! A volume is a sparse image `<image.path>/<name>.img`, loop mounted on
//! demand. Snapshots are full copies of the image, which the delta block
//! engine compares block by block.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use convoy_api_types::opts::*;
use convoy_api_types::{parse_size, volume_bail, HumanByte};
use convoy_config::{
    config_exists, delete_object, list_config_ids, load_config, lock_object, save_object,
    ConfigObject, CFG_POSTFIX,
};
use convoy_objectstore::deltablock::{
    create_delta_block_backup, delete_delta_block_backup, restore_delta_block_backup,
};
use convoy_objectstore::{DeltaBlockBackupOperations, Mapping, Mappings, DEFAULT_BLOCK_SIZE};

use super::{
    BackupOperations, DriverInfo, DriverOpts, DriverRequest, SnapshotOperations, StorageDriver,
    VolumeOperations,
};

pub const DRIVER_NAME: &str = "image";

const KEY_PATH: &str = "image.path";
const KEY_DEFAULT_VOLUME_SIZE: &str = "image.defaultvolumesize";
const DEFAULT_VOLUME_SIZE: &str = "1G";

const VOLUME_CFG_PREFIX: &str = "image_volume_";
const IMAGE_SUFFIX: &str = ".img";
const IMAGES_DIR: &str = "images";
const SNAPSHOTS_DIR: &str = "snapshots";
const MOUNTS_DIR: &str = "mounts";

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
struct ImageSnapshot {
    name: String,
    file_path: String,
    created_time: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ImageVolume {
    #[serde(skip)]
    root: PathBuf,
    name: String,
    file_path: String,
    mount_point: String,
    size: u64,
    file_system: String,
    created_time: String,
    snapshots: HashMap<String, ImageSnapshot>,
}

impl ConfigObject for ImageVolume {
    fn config_file(&self) -> Result<PathBuf, Error> {
        if self.name.is_empty() {
            bail!("BUG: invalid empty volume name");
        }
        Ok(self
            .root
            .join(format!("{}{}{}", VOLUME_CFG_PREFIX, self.name, CFG_POSTFIX)))
    }
}

pub struct ImageDriver {
    root: PathBuf,
    config: DriverConfig,
    // snapshots opened for backup, keyed by "<volume>/<snapshot>"
    open_snapshots: Mutex<HashMap<String, Arc<File>>>,
}

/// Set up the driver below `<root>/image`. Options are only used when no
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
            _ => driver_root.join(IMAGES_DIR).to_string_lossy().to_string(),
        };
        let size = opts
            .get(KEY_DEFAULT_VOLUME_SIZE)
            .map(String::as_str)
            .unwrap_or(DEFAULT_VOLUME_SIZE);
        config.default_volume_size = parse_size(size)?;
    }

    for dir in [
        PathBuf::from(&config.path),
        driver_root.join(SNAPSHOTS_DIR),
        driver_root.join(MOUNTS_DIR),
    ] {
        std::fs::create_dir_all(&dir)
            .map_err(|err| format_err!("unable to create {:?} - {}", dir, err))?;
    }
    save_object(&config)?;

    log::info!(
        "image driver initialized, images in {}, default size {}",
        config.path,
        HumanByte::from(config.default_volume_size)
    );

    Ok(Arc::new(ImageDriver {
        root: driver_root,
        config,
        open_snapshots: Mutex::new(HashMap::new()),
    }))
}

fn remove_file_if_exists(path: &str) -> Result<(), Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => bail!("unable to remove {} - {}", path, err),
    }
}

/// Read `data.len()` bytes at `offset`, zero filling past the end of file.
fn read_block(file: &File, offset: u64, data: &mut [u8]) -> Result<(), Error> {
    let mut pos = 0;
    while pos < data.len() {
        match file.read_at(&mut data[pos..], offset + pos as u64) {
            Ok(0) => break,
            Ok(n) => pos += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => bail!("read at offset {} failed - {}", offset + pos as u64, err),
        }
    }
    data[pos..].fill(0);
    Ok(())
}

fn block_count(size: u64) -> u64 {
    (size + DEFAULT_BLOCK_SIZE - 1) / DEFAULT_BLOCK_SIZE
}

/// Collapse changed block indices into ranges.
fn coalesce_blocks(blocks: &[u64]) -> Vec<Mapping> {
    let mut mappings: Vec<Mapping> = Vec::new();
    for &block in blocks {
        let offset = block * DEFAULT_BLOCK_SIZE;
        match mappings.last_mut() {
            Some(last) if last.offset + last.size == offset => last.size += DEFAULT_BLOCK_SIZE,
            _ => mappings.push(Mapping {
                offset,
                size: DEFAULT_BLOCK_SIZE,
            }),
        }
    }
    mappings
}

impl ImageDriver {
    fn blank_volume(&self, name: &str) -> ImageVolume {
        ImageVolume {
            root: self.root.clone(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn volume_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(config_exists(&self.blank_volume(name).config_file()?))
    }

    fn load_volume(&self, name: &str) -> Result<ImageVolume, Error> {
        let path = self.blank_volume(name).config_file()?;
        if !config_exists(&path) {
            volume_bail!(NotFound, "volume {} doesn't exist", name);
        }
        let mut volume: ImageVolume = load_config(&path)?;
        volume.root = self.root.clone();
        Ok(volume)
    }

    fn load_snapshot(&self, id: &str, volume_name: &str) -> Result<ImageSnapshot, Error> {
        let volume = self.load_volume(volume_name)?;
        match volume.snapshots.get(id) {
            Some(snapshot) => Ok(snapshot.clone()),
            None => volume_bail!(NotFound, "snapshot {} of volume {} doesn't exist", id, volume_name),
        }
    }

    fn default_mount_point(&self, name: &str) -> PathBuf {
        self.root.join(MOUNTS_DIR).join(name)
    }

    fn volume_info(&self, volume: &ImageVolume) -> DriverInfo {
        let mut info = HashMap::new();
        info.insert("Path".to_string(), volume.file_path.clone());
        info.insert(OPT_MOUNT_POINT.to_string(), volume.mount_point.clone());
        info.insert(OPT_SIZE.to_string(), volume.size.to_string());
        info.insert(OPT_FILESYSTEM.to_string(), volume.file_system.clone());
        info.insert(OPT_VOLUME_NAME.to_string(), volume.name.clone());
        info.insert(OPT_VOLUME_CREATED_TIME.to_string(), volume.created_time.clone());
        info
    }

    fn snapshot_info(volume: &ImageVolume, snapshot: &ImageSnapshot) -> DriverInfo {
        let mut info = HashMap::new();
        info.insert("Name".to_string(), snapshot.name.clone());
        info.insert("FilePath".to_string(), snapshot.file_path.clone());
        info.insert("CreatedTime".to_string(), snapshot.created_time.clone());
        info.insert(OPT_VOLUME_NAME.to_string(), volume.name.clone());
        info.insert(OPT_SIZE.to_string(), volume.size.to_string());
        info
    }

    fn snapshot_volume_name<'a>(&self, req: &'a DriverRequest) -> Result<&'a str, Error> {
        match req.opt(OPT_VOLUME_NAME) {
            "" => volume_bail!(InvalidArgument, "missing {} for snapshot {}", OPT_VOLUME_NAME, req.name),
            name => Ok(name),
        }
    }

    fn create_image(&self, volume: &mut ImageVolume, req: &DriverRequest) -> Result<(), Error> {
        let backup_url = req.opt(OPT_BACKUP_URL);
        let mut size = parse_size(req.opt(OPT_SIZE))?;

        if !backup_url.is_empty() {
            let backup_volume = convoy_objectstore::load_volume_for_backup(backup_url)?;
            if backup_volume.driver != DRIVER_NAME {
                volume_bail!(
                    InvalidArgument,
                    "cannot restore backup of driver {} with driver {}",
                    backup_volume.driver,
                    DRIVER_NAME
                );
            }
            if size == 0 {
                size = backup_volume.size.max(0) as u64;
            }
            volume.file_system = backup_volume.file_system;
        }
        if size == 0 {
            size = self.config.default_volume_size;
        }
        volume.size = size;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&volume.file_path)
            .map_err(|err| format_err!("unable to create image {} - {}", volume.file_path, err))?;
        file.set_len(size)?;
        drop(file);

        if !backup_url.is_empty() {
            log::debug!("restoring volume {} from {}", volume.name, backup_url);
            restore_delta_block_backup(backup_url, Path::new(&volume.file_path))?;
            // restored blocks may extend past an unaligned size
            let file = std::fs::OpenOptions::new().write(true).open(&volume.file_path)?;
            file.set_len(size)?;
            return Ok(());
        }

        let fs = req.opt(OPT_FILESYSTEM);
        if !fs.is_empty() {
            convoy_tools::execute("mkfs", &["-t", fs, &volume.file_path])?;
            volume.file_system = fs.to_string();
        }
        Ok(())
    }
}

impl StorageDriver for ImageDriver {
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
        info.insert("BlockSize".to_string(), DEFAULT_BLOCK_SIZE.to_string());
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

impl VolumeOperations for ImageDriver {
    fn create(&self, req: &DriverRequest) -> Result<(), Error> {
        let name = &req.name;
        if self.volume_exists(name)? {
            volume_bail!(AlreadyExists, "volume {} already exists", name);
        }

        let mut volume = self.blank_volume(name);
        let _lock = lock_object(&volume, None)?;

        volume.file_path = Path::new(&self.config.path)
            .join(format!("{}{}", name, IMAGE_SUFFIX))
            .to_string_lossy()
            .to_string();
        volume.created_time = convoy_tools::now_rfc3339()?;

        // left behind by a reference only delete
        if Path::new(&volume.file_path).is_file() {
            if !req.opt(OPT_BACKUP_URL).is_empty() {
                volume_bail!(AlreadyExists, "image {} already exists", volume.file_path);
            }
            volume.size = std::fs::metadata(&volume.file_path)?.len();
            save_object(&volume)?;
            log::info!("reusing existing image {} for volume {}", volume.file_path, name);
            return Ok(());
        }

        if let Err(err) = self.create_image(&mut volume, req) {
            if let Err(cleanup_err) = remove_file_if_exists(&volume.file_path) {
                log::warn!("{}", cleanup_err);
            }
            return Err(err);
        }

        save_object(&volume)?;
        log::debug!(
            "created image volume {} ({})",
            name,
            HumanByte::from(volume.size)
        );
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
            log::debug!("keeping image {} of volume {}", volume.file_path, volume.name);
        } else {
            remove_file_if_exists(&volume.file_path)?;
            for snapshot in volume.snapshots.values() {
                if let Err(err) = remove_file_if_exists(&snapshot.file_path) {
                    log::warn!("{}", err);
                }
            }
        }

        delete_object(&volume)
    }

    fn mount(&self, req: &DriverRequest) -> Result<String, Error> {
        let mut volume = self.load_volume(&req.name)?;
        let _lock = lock_object(&volume, None)?;

        if !Path::new(&volume.file_path).is_file() {
            volume_bail!(
                NotAttachedInBackend,
                "volume {} lost its image {}",
                volume.name,
                volume.file_path
            );
        }

        let requested = req.opt(OPT_MOUNT_POINT);
        let read_only = match req.opt(OPT_READ_WRITE) {
            "" | "rw" => false,
            "ro" => true,
            other => volume_bail!(InvalidArgument, "invalid {} value {:?}", OPT_READ_WRITE, other),
        };

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
            if req.bool_opt(OPT_REMOUNT)? {
                let options = if read_only { "remount,ro" } else { "remount,rw" };
                convoy_tools::execute("mount", &["-o", options, &volume.mount_point])?;
            }
            return Ok(volume.mount_point);
        }

        let mount_point = if requested.is_empty() {
            self.default_mount_point(&volume.name)
        } else {
            PathBuf::from(requested)
        };
        std::fs::create_dir_all(&mount_point)
            .map_err(|err| format_err!("unable to create mount point {:?} - {}", mount_point, err))?;
        let mount_point = mount_point.to_string_lossy().to_string();

        let options = if read_only { "loop,ro" } else { "loop" };
        convoy_tools::execute("mount", &["-o", options, &volume.file_path, &mount_point])?;

        volume.mount_point = mount_point;
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
        convoy_tools::execute("umount", &[&volume.mount_point])?;

        if Path::new(&volume.mount_point) == self.default_mount_point(&volume.name) {
            if let Err(err) = std::fs::remove_dir(&volume.mount_point) {
                log::warn!("unable to remove mount point {} - {}", volume.mount_point, err);
            }
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

impl SnapshotOperations for ImageDriver {
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

        let file = self
            .root
            .join(SNAPSHOTS_DIR)
            .join(format!("{}_{}{}", volume_name, req.name, IMAGE_SUFFIX));
        std::fs::copy(&volume.file_path, &file).map_err(|err| {
            format_err!("unable to copy {} to {:?} - {}", volume.file_path, file, err)
        })?;

        let snapshot = ImageSnapshot {
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
        remove_file_if_exists(&snapshot.file_path)?;
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

impl DeltaBlockBackupOperations for ImageDriver {
    fn has_snapshot(&self, id: &str, volume_id: &str) -> bool {
        match self.load_snapshot(id, volume_id) {
            Ok(snapshot) => Path::new(&snapshot.file_path).is_file(),
            Err(_) => false,
        }
    }

    fn compare_snapshot(
        &self,
        id: &str,
        compare_id: &str,
        volume_id: &str,
    ) -> Result<Mappings, Error> {
        let snapshot = self.load_snapshot(id, volume_id)?;
        let file = File::open(&snapshot.file_path)
            .map_err(|err| format_err!("unable to open {} - {}", snapshot.file_path, err))?;
        let blocks = block_count(file.metadata()?.len());

        if compare_id.is_empty() {
            let mut mappings = Vec::new();
            if blocks > 0 {
                mappings.push(Mapping {
                    offset: 0,
                    size: blocks * DEFAULT_BLOCK_SIZE,
                });
            }
            return Ok(Mappings {
                mappings,
                block_size: DEFAULT_BLOCK_SIZE,
            });
        }

        let previous = self.load_snapshot(compare_id, volume_id)?;
        let previous = File::open(&previous.file_path)
            .map_err(|err| format_err!("unable to open {} - {}", previous.file_path, err))?;

        let mut current_block = vec![0u8; DEFAULT_BLOCK_SIZE as usize];
        let mut previous_block = vec![0u8; DEFAULT_BLOCK_SIZE as usize];
        let mut changed = Vec::new();
        for block in 0..blocks {
            let offset = block * DEFAULT_BLOCK_SIZE;
            read_block(&file, offset, &mut current_block)?;
            read_block(&previous, offset, &mut previous_block)?;
            if current_block != previous_block {
                changed.push(block);
            }
        }
        log::debug!(
            "snapshot {} differs from {} in {} of {} blocks",
            id,
            compare_id,
            changed.len(),
            blocks
        );

        Ok(Mappings {
            mappings: coalesce_blocks(&changed),
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    fn open_snapshot(&self, id: &str, volume_id: &str) -> Result<(), Error> {
        let snapshot = self.load_snapshot(id, volume_id)?;
        let file = File::open(&snapshot.file_path)
            .map_err(|err| format_err!("unable to open {} - {}", snapshot.file_path, err))?;
        self.open_snapshots
            .lock()
            .unwrap()
            .insert(format!("{}/{}", volume_id, id), Arc::new(file));
        Ok(())
    }

    fn read_snapshot(
        &self,
        id: &str,
        volume_id: &str,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), Error> {
        let file = match self
            .open_snapshots
            .lock()
            .unwrap()
            .get(&format!("{}/{}", volume_id, id))
        {
            Some(file) => Arc::clone(file),
            None => bail!("snapshot {} of volume {} is not open", id, volume_id),
        };
        read_block(&file, offset, data)
    }

    fn close_snapshot(&self, id: &str, volume_id: &str) -> Result<(), Error> {
        self.open_snapshots
            .lock()
            .unwrap()
            .remove(&format!("{}/{}", volume_id, id));
        Ok(())
    }
}

impl BackupOperations for ImageDriver {
    fn create_backup(
        &self,
        snapshot_name: &str,
        volume_name: &str,
        dest_url: &str,
        opts: &DriverOpts,
    ) -> Result<String, Error> {
        let volume = self.load_volume(volume_name)?;
        let snapshot = self.load_snapshot(snapshot_name, volume_name)?;

        let opt = |key: &str| opts.get(key).cloned().unwrap_or_default();
        let store_volume = convoy_objectstore::Volume {
            name: volume.name.clone(),
            driver: DRIVER_NAME.to_string(),
            size: volume.size as i64,
            file_system: volume.file_system.clone(),
            created_time: match opt(OPT_VOLUME_CREATED_TIME) {
                time if time.is_empty() => volume.created_time.clone(),
                time => time,
            },
            ..Default::default()
        };
        let store_snapshot = convoy_objectstore::Snapshot {
            name: snapshot.name.clone(),
            created_time: match opt(OPT_SNAPSHOT_CREATED_TIME) {
                time if time.is_empty() => snapshot.created_time.clone(),
                time => time,
            },
        };

        create_delta_block_backup(&store_volume, &store_snapshot, dest_url, self)
    }

    fn delete_backup(&self, backup_url: &str) -> Result<(), Error> {
        delete_delta_block_backup(backup_url)
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::test::testdir;
    use convoy_api_types::{error_kind, ErrorKind};

    const BLOCK: usize = DEFAULT_BLOCK_SIZE as usize;

    fn setup(name: &str) -> (PathBuf, Arc<dyn StorageDriver>) {
        let dir = testdir(name);
        let mut opts = HashMap::new();
        opts.insert(KEY_DEFAULT_VOLUME_SIZE.to_string(), "8M".to_string());
        let driver = init(&dir, &opts).unwrap();
        (dir, driver)
    }

    fn image_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(DRIVER_NAME).join(IMAGES_DIR).join(format!("{}.img", name))
    }

    fn count_blocks(dir: &Path) -> usize {
        let mut count = 0;
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    count += count_blocks(&path);
                } else if path.to_string_lossy().ends_with(".blk") {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_coalesce_blocks() {
        let bs = DEFAULT_BLOCK_SIZE;
        assert_eq!(
            coalesce_blocks(&[0, 1, 3, 5, 6, 7]),
            vec![
                Mapping { offset: 0, size: 2 * bs },
                Mapping { offset: 3 * bs, size: bs },
                Mapping { offset: 5 * bs, size: 3 * bs },
            ]
        );
        assert!(coalesce_blocks(&[]).is_empty());
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(DEFAULT_BLOCK_SIZE + 1), 2);
    }

    #[test]
    fn test_image_volume_and_lost_image() {
        let (dir, driver) = setup("image-volume");
        let ops = driver.volume_ops().unwrap();

        ops.create(&DriverRequest::new("vol1")).unwrap();
        assert_eq!(
            std::fs::metadata(image_path(&dir, "vol1")).unwrap().len(),
            8 * 1024 * 1024
        );
        let err = ops.create(&DriverRequest::new("vol1")).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::AlreadyExists));

        std::fs::remove_file(image_path(&dir, "vol1")).unwrap();
        let err = ops.mount(&DriverRequest::new("vol1")).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotAttachedInBackend));

        ops.delete(&DriverRequest::new("vol1")).unwrap();
        assert!(ops.list_volume(&HashMap::new()).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_image_differential_backup_and_restore() {
        let (dir, driver) = setup("image-backup");
        let ops = driver.volume_ops().unwrap();
        let snapshots = driver.snapshot_ops().unwrap();
        let backups = driver.backup_ops().unwrap();

        let store = dir.join("store");
        std::fs::create_dir_all(&store).unwrap();
        let dest = format!("vfs://{}", store.display());

        ops.create(&DriverRequest::new("vol1")).unwrap();
        let snap1 = DriverRequest::new("snap1").with_opt(OPT_VOLUME_NAME, "vol1");
        snapshots.create_snapshot(&snap1).unwrap();
        let url1 = backups
            .create_backup("snap1", "vol1", &dest, &HashMap::new())
            .unwrap();
        // four zero blocks share one block object
        assert_eq!(count_blocks(&store), 1);

        let image = image_path(&dir, "vol1");
        let file = std::fs::OpenOptions::new().write(true).open(&image).unwrap();
        file.write_all_at(&vec![7u8; BLOCK], 2 * DEFAULT_BLOCK_SIZE).unwrap();
        drop(file);

        let snap2 = DriverRequest::new("snap2").with_opt(OPT_VOLUME_NAME, "vol1");
        snapshots.create_snapshot(&snap2).unwrap();
        let url2 = backups
            .create_backup("snap2", "vol1", &dest, &HashMap::new())
            .unwrap();
        assert_eq!(count_blocks(&store), 2);

        let restore = DriverRequest::new("vol2").with_opt(OPT_BACKUP_URL, url2.clone());
        ops.create(&restore).unwrap();
        assert_eq!(
            std::fs::read(image_path(&dir, "vol2")).unwrap(),
            std::fs::read(&image).unwrap()
        );
        let info = ops.get_volume_info("vol2").unwrap();
        assert_eq!(info[OPT_SIZE], (8 * 1024 * 1024).to_string());

        assert_eq!(backups.list_backup(&dest, &HashMap::new()).unwrap().len(), 2);
        backups.delete_backup(&url1).unwrap();
        assert_eq!(count_blocks(&store), 2);
        backups.delete_backup(&url2).unwrap();
        assert_eq!(count_blocks(&store), 0);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
