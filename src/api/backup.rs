use std::collections::HashMap;

use anyhow::Error;
use serde_json::Value;

use convoy_api_types::opts::*;
use convoy_api_types::{
    error_kind, volume_bail, BackupCreateRequest, BackupDeleteRequest, BackupInspectRequest,
    BackupListRequest, BackupURLResponse, ErrorKind,
};

use super::{string_response, unescape_url, ApiRequest};
use crate::daemon::Daemon;
use crate::driver::{BackupOperations, DriverOpts};

/// Find the driver responsible for a backup URL.
///
/// Backups in an object store name their driver in the stored volume
/// descriptor, otherwise the URL scheme is the driver name.
fn backup_ops_for_url<'a>(daemon: &'a Daemon, backup_url: &str) -> Result<&'a dyn BackupOperations, Error> {
    let driver_name = match convoy_objectstore::get_object_store_driver(backup_url) {
        Ok(_) => convoy_objectstore::load_volume_for_backup(backup_url)?.driver,
        Err(err) if error_kind(&err) == Some(ErrorKind::NotSupported) => {
            match url::Url::parse(backup_url) {
                Ok(url) => url.scheme().to_string(),
                Err(err) => volume_bail!(InvalidArgument, "invalid backup url {:?} - {}", backup_url, err),
            }
        }
        Err(err) => return Err(err),
    };

    match daemon.driver(&driver_name) {
        Ok(driver) => driver.backup_ops(),
        Err(_) => volume_bail!(NotFound, "cannot find driver {} for backup {}", driver_name, backup_url),
    }
}

pub fn create_backup(daemon: &Daemon, request: &BackupCreateRequest) -> Result<String, Error> {
    let (volume, snapshot) = daemon.get_snapshot_by_name(&request.snapshot_name)?;
    let ops = daemon.backup_ops(&volume)?;

    let mut opts: DriverOpts = HashMap::new();
    opts.insert(OPT_VOLUME_NAME.to_string(), volume.name.clone());
    opts.insert(OPT_VOLUME_CREATED_TIME.to_string(), volume.created_time.clone());
    opts.insert(OPT_SNAPSHOT_NAME.to_string(), snapshot.name.clone());
    opts.insert(OPT_SNAPSHOT_CREATED_TIME.to_string(), snapshot.created_time.clone());
    opts.insert(OPT_FILESYSTEM.to_string(), volume.file_system.clone());

    let dest_url = unescape_url(&request.url);
    log::debug!("backing up snapshot {} of {} to {}", snapshot.name, volume.name, dest_url);
    let backup_url = ops.create_backup(&snapshot.name, &volume.name, &dest_url, &opts)?;
    log::info!("created backup {}", backup_url);
    Ok(backup_url)
}

pub fn api_backup_create(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: BackupCreateRequest = param.parse()?;
    let url = create_backup(daemon, &request)?;
    if request.verbose {
        return Ok(serde_json::to_value(BackupURLResponse { url })?);
    }
    Ok(string_response(url))
}

pub fn api_backup_delete(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: BackupDeleteRequest = param.parse()?;
    let url = unescape_url(&request.url);
    backup_ops_for_url(daemon, &url)?.delete_backup(&url)?;
    log::info!("deleted backup {}", url);
    Ok(Value::Null)
}

pub fn api_backup_inspect(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: BackupInspectRequest = param.parse()?;
    let url = unescape_url(&request.url);
    let info = backup_ops_for_url(daemon, &url)?.get_backup_info(&url)?;
    Ok(serde_json::to_value(info)?)
}

/// Merge the listings of every driver supporting backups.
pub fn api_backup_list(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: BackupListRequest = param.parse()?;
    let url = unescape_url(&request.url);
    if url.is_empty() {
        volume_bail!(InvalidArgument, "missing destination URL");
    }

    let mut opts: DriverOpts = HashMap::new();
    opts.insert(OPT_VOLUME_NAME.to_string(), request.volume_name.clone());

    let mut result = HashMap::new();
    for driver in daemon.drivers() {
        let ops = match driver.backup_ops() {
            Ok(ops) => ops,
            Err(_) => continue,
        };
        result.extend(ops.list_backup(&url, &opts)?);
    }
    Ok(serde_json::to_value(result)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::snapshot::create_snapshot;
    use crate::api::volume::create_volume;
    use crate::daemon::test::test_daemon;
    use crate::driver::test::testdir;
    use convoy_api_types::{
        BackupInfo, SnapshotCreateRequest, VolumeCreateRequest, BACKUP_INFO_DRIVER,
        BACKUP_INFO_FILE, BACKUP_INFO_SNAPSHOT_NAME,
    };

    fn request<T: serde::Serialize>(data: &T) -> ApiRequest {
        ApiRequest::new(serde_json::to_vec(data).unwrap(), HashMap::new())
    }

    #[test]
    fn test_backup_handlers() {
        let dir = testdir("api-backup");
        let daemon = test_daemon(&dir);
        let store = dir.join("store");
        std::fs::create_dir_all(&store).unwrap();
        let dest = format!("vfs://{}", store.display());

        create_volume(
            &daemon,
            &VolumeCreateRequest {
                name: "db".into(),
                ..Default::default()
            },
        )
        .unwrap();
        create_snapshot(
            &daemon,
            &SnapshotCreateRequest {
                name: "nightly".into(),
                volume_name: "db".into(),
                verbose: false,
            },
        )
        .unwrap();

        let create = BackupCreateRequest {
            url: dest.clone(),
            snapshot_name: "nightly".into(),
            verbose: true,
        };
        let response: BackupURLResponse =
            serde_json::from_value(api_backup_create(&daemon, &request(&create)).unwrap()).unwrap();
        assert!(response.url.starts_with(&dest));

        let inspect = BackupInspectRequest {
            url: response.url.replace('&', "\\u0026"),
        };
        let info: BackupInfo =
            serde_json::from_value(api_backup_inspect(&daemon, &request(&inspect)).unwrap()).unwrap();
        assert_eq!(info[BACKUP_INFO_DRIVER], "vfs");
        assert_eq!(info[BACKUP_INFO_SNAPSHOT_NAME], "nightly");
        assert!(info.contains_key(BACKUP_INFO_FILE));

        let list = BackupListRequest {
            url: dest.clone(),
            volume_name: "db".into(),
        };
        let listed = api_backup_list(&daemon, &request(&list)).unwrap();
        assert!(listed.get(&response.url).is_some());

        let unknown = BackupInspectRequest {
            url: "ebs://us-west-2/snap-1".into(),
        };
        let err = api_backup_inspect(&daemon, &request(&unknown)).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        let delete = BackupDeleteRequest {
            url: response.url.clone(),
        };
        api_backup_delete(&daemon, &request(&delete)).unwrap();
        let listed = api_backup_list(&daemon, &request(&list)).unwrap();
        assert!(listed.as_object().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
