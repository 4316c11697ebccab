//! Object store layout and the records kept in it.
//!
//! ```text
//! convoy-objectstore/volumes/<lv1>/<lv2>/<volume>/
//!     volume.cfg
//!     backups/backup_<name>.cfg
//!     blocks/<lv1>/<lv2>/<checksum>.blk
//!     BackupFiles/<name>.bak
//! ```

use std::io::Cursor;

use anyhow::{format_err, Error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use convoy_api_types::volume_bail;
use convoy_tools::checksum::is_valid_checksum;

use crate::driver::ObjectStoreDriver;

pub const OBJECTSTORE_BASE: &str = "convoy-objectstore";

const VOLUME_SEPARATE_LAYER1: usize = 2;
const VOLUME_SEPARATE_LAYER2: usize = 4;

const VOLUME_DIRECTORY: &str = "volumes";
const VOLUME_CONFIG_FILE: &str = "volume.cfg";
const BACKUP_DIRECTORY: &str = "backups";
const BACKUP_CONFIG_PREFIX: &str = "backup_";
const CFG_SUFFIX: &str = ".cfg";

pub(crate) const BLOCKS_DIRECTORY: &str = "blocks";
pub(crate) const BLOCK_SUFFIX: &str = ".blk";
pub(crate) const BACKUP_FILES_DIRECTORY: &str = "BackupFiles";

/// Volume descriptor stored next to its backups.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Volume {
    pub name: String,
    pub driver: String,
    pub size: i64,
    pub file_system: String,
    pub created_time: String,
    /// Most recent backup, empty if there is none.
    pub last_backup_name: String,
}

/// Snapshot being backed up. Not persisted on its own.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub created_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockMapping {
    pub offset: u64,
    pub block_checksum: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BackupFile {
    pub file_path: String,
}

/// Backup manifest. Differential backups carry `blocks`, single file
/// backups carry `single_file`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Backup {
    pub name: String,
    pub volume_name: String,
    pub snapshot_name: String,
    pub snapshot_created_at: String,
    pub created_time: String,
    pub blocks: Vec<BlockMapping>,
    pub single_file: BackupFile,
}

impl Backup {
    pub fn is_single_file(&self) -> bool {
        !self.single_file.file_path.is_empty()
    }
}

pub(crate) fn volume_path(volume_name: &str) -> String {
    // names never contain '!', so padding short names cannot collide
    let mut padded = volume_name.to_string();
    while padded.len() < VOLUME_SEPARATE_LAYER2 {
        padded.push('!');
    }
    format!(
        "{}/{}/{}/{}/{}",
        OBJECTSTORE_BASE,
        VOLUME_DIRECTORY,
        &padded[..VOLUME_SEPARATE_LAYER1],
        &padded[VOLUME_SEPARATE_LAYER1..VOLUME_SEPARATE_LAYER2],
        volume_name,
    )
}

pub(crate) fn volume_file_path(volume_name: &str) -> String {
    format!("{}/{}", volume_path(volume_name), VOLUME_CONFIG_FILE)
}

pub(crate) fn backup_path(volume_name: &str) -> String {
    format!("{}/{}", volume_path(volume_name), BACKUP_DIRECTORY)
}

pub(crate) fn backup_config_path(backup_name: &str, volume_name: &str) -> String {
    format!(
        "{}/{}{}{}",
        backup_path(volume_name),
        BACKUP_CONFIG_PREFIX,
        backup_name,
        CFG_SUFFIX
    )
}

pub(crate) fn block_file_path(volume_name: &str, checksum: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}{}",
        volume_path(volume_name),
        BLOCKS_DIRECTORY,
        &checksum[..2],
        &checksum[2..4],
        checksum,
        BLOCK_SUFFIX,
    )
}

pub(crate) fn backup_file_path(backup_name: &str, volume_name: &str) -> String {
    format!(
        "{}/{}/{}.bak",
        volume_path(volume_name),
        BACKUP_FILES_DIRECTORY,
        backup_name
    )
}

pub(crate) fn load_config_in_store<T: DeserializeOwned>(
    driver: &dyn ObjectStoreDriver,
    path: &str,
) -> Result<T, Error> {
    if driver.file_size(path) < 0 {
        volume_bail!(NotFound, "cannot find {} in object store", path);
    }
    log::debug!("loading {} from {} object store", path, driver.kind());
    let reader = driver.read(path)?;
    serde_json::from_reader(reader)
        .map_err(|err| format_err!("unable to parse {} from object store - {}", path, err))
}

pub(crate) fn save_config_in_store<T: Serialize>(
    driver: &dyn ObjectStoreDriver,
    path: &str,
    data: &T,
) -> Result<(), Error> {
    let raw = serde_json::to_vec(data)?;
    log::debug!("saving {} to {} object store", path, driver.kind());
    driver.write(path, &mut Cursor::new(raw))
}

pub(crate) fn volume_exists(driver: &dyn ObjectStoreDriver, volume_name: &str) -> bool {
    driver.file_exists(&volume_file_path(volume_name))
}

pub(crate) fn load_volume(driver: &dyn ObjectStoreDriver, volume_name: &str) -> Result<Volume, Error> {
    load_config_in_store(driver, &volume_file_path(volume_name))
}

pub(crate) fn save_volume(driver: &dyn ObjectStoreDriver, volume: &Volume) -> Result<(), Error> {
    save_config_in_store(driver, &volume_file_path(&volume.name), volume)
}

/// Store the volume descriptor unless it already exists.
pub(crate) fn add_volume(driver: &dyn ObjectStoreDriver, volume: &Volume) -> Result<(), Error> {
    if volume_exists(driver, &volume.name) {
        return Ok(());
    }
    save_volume(driver, volume)
        .map_err(|err| format_err!("unable to add volume {} to object store - {}", volume.name, err))?;
    log::debug!("added volume {} to object store", volume.name);
    Ok(())
}

pub(crate) fn remove_volume(driver: &dyn ObjectStoreDriver, volume_name: &str) -> Result<(), Error> {
    if !volume_exists(driver, volume_name) {
        volume_bail!(NotFound, "volume {} doesn't exist in object store", volume_name);
    }
    driver.remove(&[volume_path(volume_name)])?;
    log::debug!("removed volume {} from object store", volume_name);
    Ok(())
}

/// Names of all volumes with a directory in the store.
pub(crate) fn get_volume_names(driver: &dyn ObjectStoreDriver) -> Result<Vec<String>, Error> {
    let base = format!("{}/{}", OBJECTSTORE_BASE, VOLUME_DIRECTORY);
    let lv1_dirs = match driver.list(&base) {
        Ok(list) => list,
        Err(_) => return Ok(Vec::new()), // nothing stored yet
    };

    let mut names = Vec::new();
    for lv1 in lv1_dirs {
        let lv1_path = format!("{}/{}", base, lv1);
        for lv2 in driver.list(&lv1_path)? {
            let lv2_path = format!("{}/{}", lv1_path, lv2);
            names.extend(driver.list(&lv2_path)?);
        }
    }
    Ok(names)
}

pub(crate) fn get_backup_names_for_volume(
    driver: &dyn ObjectStoreDriver,
    volume_name: &str,
) -> Result<Vec<String>, Error> {
    let list = match driver.list(&backup_path(volume_name)) {
        Ok(list) => list,
        Err(_) => return Ok(Vec::new()),
    };
    Ok(list
        .iter()
        .filter_map(|name| {
            let id = name.strip_prefix(BACKUP_CONFIG_PREFIX)?.strip_suffix(CFG_SUFFIX)?;
            (!id.is_empty()).then(|| id.to_string())
        })
        .collect())
}

pub(crate) fn load_backup(
    driver: &dyn ObjectStoreDriver,
    backup_name: &str,
    volume_name: &str,
) -> Result<Backup, Error> {
    let backup: Backup = load_config_in_store(driver, &backup_config_path(backup_name, volume_name))?;
    for mapping in backup.blocks.iter() {
        if !is_valid_checksum(&mapping.block_checksum) {
            volume_bail!(
                Corruption,
                "backup {} of volume {} has invalid block checksum {:?} at offset {}",
                backup_name,
                volume_name,
                mapping.block_checksum,
                mapping.offset
            );
        }
    }
    Ok(backup)
}

pub(crate) fn save_backup(driver: &dyn ObjectStoreDriver, backup: &Backup) -> Result<(), Error> {
    let path = backup_config_path(&backup.name, &backup.volume_name);
    if driver.file_exists(&path) {
        log::warn!("backup config {} already exists, replacing it", path);
        driver.remove(&[path.clone()])?;
    }
    save_config_in_store(driver, &path, backup)
}

pub(crate) fn remove_backup(driver: &dyn ObjectStoreDriver, backup: &Backup) -> Result<(), Error> {
    let path = backup_config_path(&backup.name, &backup.volume_name);
    driver.remove(&[path.clone()])?;
    log::debug!("removed {} from object store", path);
    Ok(())
}
