use anyhow::Error;
use serde_json::Value;

use convoy_api_types::opts::*;
use convoy_api_types::{
    check_name, volume_bail, SnapshotCreateRequest, SnapshotDeleteRequest,
    SnapshotInspectRequest, SnapshotResponse,
};
use convoy_config::{lock_object, save_object};

use super::{string_response, ApiRequest};
use crate::daemon::{Daemon, SnapshotRecord, VolumeRecord};
use crate::driver::DriverRequest;

fn driver_request(volume: &VolumeRecord, snapshot_name: &str) -> DriverRequest {
    DriverRequest::new(snapshot_name).with_opt(OPT_VOLUME_NAME, volume.name.as_str())
}

/// Describe a snapshot. The volume fields are only filled in for a
/// standalone reply, not when nested in a volume.
pub(crate) fn snapshot_response(
    daemon: &Daemon,
    volume: &VolumeRecord,
    snapshot: &SnapshotRecord,
    with_volume: bool,
) -> Result<SnapshotResponse, Error> {
    let driver_info = daemon
        .snapshot_ops(volume)?
        .get_snapshot_info(&driver_request(volume, &snapshot.name))?;

    let mut response = SnapshotResponse {
        uuid: snapshot.uuid.clone(),
        name: snapshot.name.clone(),
        created_time: snapshot.created_time.clone(),
        driver_info,
        ..Default::default()
    };
    if with_volume {
        response.volume_uuid = volume.uuid.clone();
        response.volume_name = volume.name.clone();
        response.volume_created_at = volume.created_time.clone();
    }
    Ok(response)
}

/// Add the snapshot to the volume record and the indices. The record is
/// saved first, a failed save leaves the indices untouched.
fn record_snapshot(daemon: &Daemon, volume: &mut VolumeRecord, snapshot: &SnapshotRecord) -> Result<(), Error> {
    volume.snapshots.insert(snapshot.uuid.clone(), snapshot.clone());
    if let Err(err) = save_object(volume) {
        volume.snapshots.remove(&snapshot.uuid);
        return Err(err);
    }
    daemon.snapshot_index.add(&snapshot.uuid, &volume.name)?;
    daemon.name_index.add(&snapshot.name, &snapshot.uuid)?;
    Ok(())
}

fn forget_snapshot(daemon: &Daemon, volume: &mut VolumeRecord, snapshot: &SnapshotRecord) -> Result<(), Error> {
    let removed = volume.snapshots.remove(&snapshot.uuid);
    if let Err(err) = save_object(volume) {
        if let Some(removed) = removed {
            volume.snapshots.insert(snapshot.uuid.clone(), removed);
        }
        return Err(err);
    }
    daemon.snapshot_index.remove(&snapshot.uuid)?;
    daemon.name_index.remove(&snapshot.name)?;
    Ok(())
}

pub fn create_snapshot(daemon: &Daemon, request: &SnapshotCreateRequest) -> Result<(VolumeRecord, SnapshotRecord), Error> {
    let mut volume = daemon.get_volume_by_name(&request.volume_name)?;
    let _lock = lock_object(&volume, None)?;

    if !request.name.is_empty() {
        check_name(&request.name)?;
        if daemon.name_index.contains(&request.name) {
            volume_bail!(AlreadyExists, "snapshot name {} already exists", request.name);
        }
    }

    let mut uuid = convoy_tools::generate_uuid();
    let name = if request.name.is_empty() {
        daemon.unique_default_name("snapshot", &mut uuid)
    } else {
        request.name.clone()
    };

    daemon
        .snapshot_ops(&volume)?
        .create_snapshot(&driver_request(&volume, &name))?;

    let snapshot = SnapshotRecord {
        uuid,
        volume_uuid: volume.uuid.clone(),
        name,
        created_time: convoy_tools::now_rfc3339()?,
    };
    record_snapshot(daemon, &mut volume, &snapshot)?;

    log::info!("created snapshot {} of volume {}", snapshot.name, volume.name);
    Ok((volume, snapshot))
}

pub fn delete_snapshot(daemon: &Daemon, name: &str) -> Result<(), Error> {
    let (mut volume, snapshot) = daemon.get_snapshot_by_name(name)?;
    let _lock = lock_object(&volume, None)?;

    daemon
        .snapshot_ops(&volume)?
        .delete_snapshot(&driver_request(&volume, &snapshot.name))?;

    forget_snapshot(daemon, &mut volume, &snapshot)?;

    log::info!("deleted snapshot {} of volume {}", snapshot.name, volume.name);
    Ok(())
}

pub fn api_snapshot_create(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: SnapshotCreateRequest = param.parse()?;
    let (volume, snapshot) = create_snapshot(daemon, &request)?;
    if request.verbose {
        let response = snapshot_response(daemon, &volume, &snapshot, true)?;
        return Ok(serde_json::to_value(response)?);
    }
    Ok(string_response(snapshot.uuid))
}

pub fn api_snapshot_delete(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: SnapshotDeleteRequest = param.parse()?;
    delete_snapshot(daemon, &request.snapshot_name)?;
    Ok(Value::Null)
}

pub fn api_snapshot_inspect(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: SnapshotInspectRequest = param.parse()?;
    let (volume, snapshot) = daemon.get_snapshot_by_name(&request.snapshot_name)?;
    let response = snapshot_response(daemon, &volume, &snapshot, true)?;
    Ok(serde_json::to_value(response)?)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;
    use crate::api::volume::{api_volume_delete, create_volume};
    use crate::daemon::test::test_daemon;
    use crate::driver::test::testdir;
    use convoy_api_types::{error_kind, ErrorKind, VolumeCreateRequest, VolumeDeleteRequest};

    fn request<T: serde::Serialize>(data: &T) -> ApiRequest {
        ApiRequest::new(serde_json::to_vec(data).unwrap(), HashMap::new())
    }

    #[test]
    fn test_snapshot_handlers() {
        let dir = testdir("api-snapshot");
        let daemon = test_daemon(&dir);

        let volume = create_volume(
            &daemon,
            &VolumeCreateRequest {
                name: "db".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let create = SnapshotCreateRequest {
            name: "nightly".into(),
            volume_name: "db".into(),
            verbose: true,
        };
        let response: SnapshotResponse =
            serde_json::from_value(api_snapshot_create(&daemon, &request(&create)).unwrap()).unwrap();
        assert_eq!(response.volume_uuid, volume.uuid);
        assert_eq!(daemon.snapshot_index.get(&response.uuid), "db");
        assert_eq!(daemon.name_index.get("nightly"), response.uuid);

        let err = api_snapshot_create(&daemon, &request(&create)).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::AlreadyExists));
        // snapshot names share the namespace with volumes
        let clash = SnapshotCreateRequest {
            name: "db".into(),
            volume_name: "db".into(),
            verbose: false,
        };
        assert!(api_snapshot_create(&daemon, &request(&clash)).is_err());

        let inspect = SnapshotInspectRequest {
            snapshot_name: "nightly".into(),
        };
        let inspected: SnapshotResponse =
            serde_json::from_value(api_snapshot_inspect(&daemon, &request(&inspect)).unwrap()).unwrap();
        assert_eq!(inspected.volume_name, "db");
        assert_eq!(inspected.driver_info["VolumeName"], "db");

        let delete = SnapshotDeleteRequest {
            snapshot_name: "nightly".into(),
        };
        api_snapshot_delete(&daemon, &request(&delete)).unwrap();
        assert!(!daemon.name_index.contains("nightly"));
        assert!(daemon.snapshot_index.is_empty());
        let err = api_snapshot_delete(&daemon, &request(&delete)).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        // deleting the volume drops the remaining snapshot index entries
        let other = SnapshotCreateRequest {
            volume_name: "db".into(),
            ..Default::default()
        };
        api_snapshot_create(&daemon, &request(&other)).unwrap();
        assert_eq!(daemon.snapshot_index.len(), 1);
        let delete = VolumeDeleteRequest {
            volume_name: "db".into(),
            reference_only: false,
        };
        api_volume_delete(&daemon, &request(&delete)).unwrap();
        assert!(daemon.snapshot_index.is_empty());
        assert!(daemon.name_index.is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_record_save_keeps_indices() {
        let dir = testdir("api-snapshot-save");
        let daemon = test_daemon(&dir);
        create_volume(
            &daemon,
            &VolumeCreateRequest {
                name: "db".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let create = SnapshotCreateRequest {
            name: "nightly".into(),
            volume_name: "db".into(),
            verbose: false,
        };
        let (_, snapshot) = create_snapshot(&daemon, &create).unwrap();

        // records below a regular file cannot be written
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut volume = daemon.get_volume_by_name("db").unwrap();
        volume.root = blocker.join("root");

        assert!(forget_snapshot(&daemon, &mut volume, &snapshot).is_err());
        assert!(volume.snapshots.contains_key(&snapshot.uuid));
        assert_eq!(daemon.name_index.get("nightly"), snapshot.uuid);
        assert_eq!(daemon.snapshot_index.get(&snapshot.uuid), "db");

        let weekly = SnapshotRecord {
            uuid: convoy_tools::generate_uuid(),
            volume_uuid: volume.uuid.clone(),
            name: "weekly".into(),
            created_time: String::new(),
        };
        assert!(record_snapshot(&daemon, &mut volume, &weekly).is_err());
        assert!(!volume.snapshots.contains_key(&weekly.uuid));
        assert!(!daemon.name_index.contains("weekly"));
        assert!(!daemon.snapshot_index.contains(&weekly.uuid));

        // the stored record still lists the snapshot
        let (stored, _) = daemon.get_snapshot_by_name("nightly").unwrap();
        assert!(stored.snapshots.contains_key(&snapshot.uuid));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
