//! Object store access for backups.
//!
//! Object store drivers are looked up by URL scheme (see [driver]). On top of
//! them live two backup engines: [deltablock] for block based storage and
//! [singlefile] for drivers whose snapshots are a single archive.

pub mod backup_url;
pub mod config;
pub mod deltablock;
pub mod driver;
pub mod singlefile;
pub mod vfs;

use std::collections::HashMap;

use anyhow::Error;

use convoy_api_types::{
    BackupInfo, BACKUP_INFO_CREATED_TIME, BACKUP_INFO_DRIVER, BACKUP_INFO_FILE,
    BACKUP_INFO_IS_INCREMENTAL, BACKUP_INFO_NAME, BACKUP_INFO_SNAPSHOT_CREATED_AT,
    BACKUP_INFO_SNAPSHOT_NAME, BACKUP_INFO_URL, BACKUP_INFO_VOLUME_CREATED_AT,
    BACKUP_INFO_VOLUME_NAME, BACKUP_INFO_VOLUME_SIZE,
};

pub use backup_url::{decode_backup_url, encode_backup_url};
pub use config::{Backup, BlockMapping, Snapshot, Volume};
pub use deltablock::{DeltaBlockBackupOperations, Mapping, Mappings, DEFAULT_BLOCK_SIZE};
pub use driver::{get_object_store_driver, register_driver, ObjectStoreDriver};

use config::{get_backup_names_for_volume, get_volume_names, load_backup, load_volume};

fn fill_backup_info(backup: &Backup, volume: &Volume, dest_url: &str) -> BackupInfo {
    let mut info = HashMap::new();
    let mut set = |key: &str, value: &str| {
        info.insert(key.to_string(), value.to_string());
    };
    set(BACKUP_INFO_NAME, &backup.name);
    set(
        BACKUP_INFO_URL,
        &encode_backup_url(&backup.name, &volume.name, dest_url),
    );
    set(BACKUP_INFO_DRIVER, &volume.driver);
    set(BACKUP_INFO_VOLUME_NAME, &volume.name);
    set(BACKUP_INFO_VOLUME_SIZE, &volume.size.to_string());
    set(BACKUP_INFO_VOLUME_CREATED_AT, &volume.created_time);
    set(BACKUP_INFO_SNAPSHOT_NAME, &backup.snapshot_name);
    set(BACKUP_INFO_SNAPSHOT_CREATED_AT, &backup.snapshot_created_at);
    set(BACKUP_INFO_CREATED_TIME, &backup.created_time);
    if backup.is_single_file() {
        set(BACKUP_INFO_FILE, &backup.single_file.file_path);
    } else {
        set(BACKUP_INFO_IS_INCREMENTAL, "true");
    }
    info
}

/// Load the volume descriptor a backup URL refers to.
pub fn load_volume_for_backup(backup_url: &str) -> Result<Volume, Error> {
    let driver = get_object_store_driver(backup_url)?;
    let (_backup_name, volume_name) = decode_backup_url(backup_url)?;
    load_volume(driver.as_ref(), &volume_name)
}

/// Describe a single backup.
pub fn get_backup_info(backup_url: &str) -> Result<BackupInfo, Error> {
    let driver = get_object_store_driver(backup_url)?;
    let (backup_name, volume_name) = decode_backup_url(backup_url)?;

    let volume = load_volume(driver.as_ref(), &volume_name)?;
    let backup = load_backup(driver.as_ref(), &backup_name, &volume_name)?;
    Ok(fill_backup_info(&backup, &volume, driver.url()))
}

/// List backups at `dest_url` created by storage driver `driver_name`, keyed
/// by backup URL. An empty `volume_name` lists all volumes.
pub fn list(
    volume_name: &str,
    dest_url: &str,
    driver_name: &str,
) -> Result<HashMap<String, BackupInfo>, Error> {
    let driver = get_object_store_driver(dest_url)?;
    let driver = driver.as_ref();

    let volume_names = if volume_name.is_empty() {
        get_volume_names(driver)?
    } else {
        vec![volume_name.to_string()]
    };

    let mut result = HashMap::new();
    for name in volume_names {
        let volume = match load_volume(driver, &name) {
            Ok(volume) => volume,
            Err(err) => {
                if !volume_name.is_empty() {
                    log::debug!("no backups of volume {} at {} - {}", name, dest_url, err);
                } else {
                    log::warn!("unable to load volume {} at {} - {}", name, dest_url, err);
                }
                continue;
            }
        };
        if volume.driver != driver_name {
            continue;
        }
        for backup_name in get_backup_names_for_volume(driver, &name)? {
            let backup = load_backup(driver, &backup_name, &name)?;
            let info = fill_backup_info(&backup, &volume, driver.url());
            result.insert(info[BACKUP_INFO_URL].clone(), info);
        }
    }
    Ok(result)
}
