//! Single file backups, used for snapshots which are already a packed archive.

use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};

use convoy_api_types::volume_bail;

use crate::backup_url::{decode_backup_url, encode_backup_url};
use crate::config::{
    add_volume, backup_file_path, get_backup_names_for_volume, load_backup, load_volume,
    remove_backup, remove_volume, save_backup, Backup, BackupFile, Snapshot, Volume,
};
use crate::driver::get_object_store_driver;

/// Upload `file_path` as backup of `snapshot` and return the backup URL.
pub fn create_single_file_backup(
    volume: &Volume,
    snapshot: &Snapshot,
    file_path: &Path,
    dest_url: &str,
) -> Result<String, Error> {
    let driver = get_object_store_driver(dest_url)?;
    let driver = driver.as_ref();

    add_volume(driver, volume)?;
    let volume = load_volume(driver, &volume.name)?;

    let name = convoy_tools::generate_name("backup");
    let mut backup = Backup {
        single_file: BackupFile {
            file_path: backup_file_path(&name, &volume.name),
        },
        name,
        volume_name: volume.name.clone(),
        snapshot_name: snapshot.name.clone(),
        snapshot_created_at: snapshot.created_time.clone(),
        ..Default::default()
    };

    log::debug!("uploading {:?} as {}", file_path, backup.single_file.file_path);
    driver.upload(file_path, &backup.single_file.file_path)?;

    backup.created_time = convoy_tools::now_rfc3339()?;
    save_backup(driver, &backup)?;
    log::debug!("created backup {} of snapshot {}", backup.name, snapshot.name);

    Ok(encode_backup_url(&backup.name, &volume.name, driver.url()))
}

/// Download the backup file into `dir`, returning the local file path.
pub fn restore_single_file_backup(backup_url: &str, dir: &Path) -> Result<PathBuf, Error> {
    let driver = get_object_store_driver(backup_url)?;
    let driver = driver.as_ref();
    let (backup_name, volume_name) = decode_backup_url(backup_url)?;

    if let Err(err) = load_volume(driver, &volume_name) {
        volume_bail!(NotFound, "volume {} doesn't exist in object store - {}", volume_name, err);
    }
    let backup = load_backup(driver, &backup_name, &volume_name)?;
    if !backup.is_single_file() {
        volume_bail!(InvalidArgument, "backup {} is not a single file backup", backup_name);
    }

    let file_name = Path::new(&backup.single_file.file_path)
        .file_name()
        .ok_or_else(|| format_err!("invalid backup file path {}", backup.single_file.file_path))?;
    let target = dir.join(file_name);
    driver.download(&backup.single_file.file_path, &target)?;

    Ok(target)
}

/// Remove the backup file, then the backup record.
pub fn delete_single_file_backup(backup_url: &str) -> Result<(), Error> {
    let driver = get_object_store_driver(backup_url)?;
    let driver = driver.as_ref();
    let (backup_name, volume_name) = decode_backup_url(backup_url)?;

    load_volume(driver, &volume_name)?;
    let backup = load_backup(driver, &backup_name, &volume_name)?;

    driver.remove(&[backup.single_file.file_path.clone()])?;
    remove_backup(driver, &backup)?;

    if get_backup_names_for_volume(driver, &volume_name)?.is_empty() {
        log::debug!("no backup left for volume {}, removing it", volume_name);
        if let Err(err) = remove_volume(driver, &volume_name) {
            log::warn!("failed to remove volume {} - {}", volume_name, err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::deltablock::test::{count_files, testdir};

    #[test]
    fn test_single_file_backup() {
        let dir = testdir("singlefile");
        let dest = format!("vfs://{}", dir.display());

        let archive = dir.join("snap.tar.gz");
        std::fs::write(&archive, b"packed snapshot").unwrap();

        let volume = Volume {
            name: "files".into(),
            driver: "vfs".into(),
            ..Default::default()
        };
        let snapshot = Snapshot {
            name: "snap".into(),
            created_time: "2024-01-01T00:00:00Z".into(),
        };
        let url = create_single_file_backup(&volume, &snapshot, &archive, &dest).unwrap();
        assert_eq!(count_files(&dir.join("convoy-objectstore"), ".bak"), 1);

        let restore_dir = dir.join("restore");
        std::fs::create_dir(&restore_dir).unwrap();
        let file = restore_single_file_backup(&url, &restore_dir).unwrap();
        assert!(file.starts_with(&restore_dir));
        assert_eq!(std::fs::read(&file).unwrap(), b"packed snapshot");

        delete_single_file_backup(&url).unwrap();
        assert_eq!(count_files(&dir.join("convoy-objectstore"), ".bak"), 0);
        assert_eq!(count_files(&dir.join("convoy-objectstore"), ".cfg"), 0);
        assert!(restore_single_file_backup(&url, &restore_dir).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
