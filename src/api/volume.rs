use std::collections::HashMap;

use anyhow::Error;
use serde_json::Value;

use convoy_api_types::opts::*;
use convoy_api_types::{
    check_name, parse_size, volume_bail, VolumeCreateRequest, VolumeDeleteRequest,
    VolumeInspectRequest, VolumeMountRequest, VolumeResponse, VolumeUmountRequest,
};
use convoy_config::{delete_object, lock_object, save_object};

use super::snapshot::snapshot_response;
use super::{string_response, unescape_url, ApiRequest};
use crate::daemon::{Daemon, VolumeRecord};
use crate::driver::DriverRequest;

const DEFAULT_FILESYSTEM: &str = "ext4";

/// Create a volume through its driver and record it.
pub fn create_volume(daemon: &Daemon, request: &VolumeCreateRequest) -> Result<VolumeRecord, Error> {
    if !request.name.is_empty() {
        check_name(&request.name)?;
        if daemon.name_index.contains(&request.name) {
            volume_bail!(AlreadyExists, "volume name {} already exists", request.name);
        }
    }

    let mut uuid = convoy_tools::generate_uuid();
    let name = if request.name.is_empty() {
        daemon.unique_default_name("volume", &mut uuid)
    } else {
        request.name.clone()
    };

    let driver_name = if request.driver_name.is_empty() {
        daemon.config.default_driver.clone()
    } else {
        request.driver_name.clone()
    };
    let driver = daemon.driver(&driver_name)?;

    let size = parse_size(&request.size)?;
    let req = DriverRequest::new(name.as_str())
        .with_opt(OPT_SIZE, size.to_string())
        .with_opt(OPT_BACKUP_URL, unescape_url(&request.backup_url))
        .with_opt(OPT_VOLUME_NAME, name.as_str())
        .with_opt(OPT_VOLUME_DRIVER_ID, request.driver_volume_id.as_str())
        .with_opt(OPT_VOLUME_TYPE, request.volume_type.as_str())
        .with_opt(OPT_VOLUME_IOPS, request.iops.to_string())
        .with_opt(OPT_PREPARE_FOR_VM, request.prepare_for_vm.to_string())
        .with_opt(OPT_FILESYSTEM, request.filesystem.as_str());

    log::debug!("creating volume {} ({}) with driver {}", name, uuid, driver_name);
    driver.volume_ops()?.create(&req)?;

    let mut volume = daemon.new_volume_record(&uuid);
    volume.name = name;
    volume.driver_name = driver_name;
    volume.file_system = if request.filesystem.is_empty() {
        DEFAULT_FILESYSTEM.to_string()
    } else {
        request.filesystem.clone()
    };
    volume.created_time = convoy_tools::now_rfc3339()?;

    {
        let _lock = lock_object(&volume, None)?;
        save_object(&volume)?;
    }
    daemon.name_index.add(&volume.name, &volume.uuid)?;

    log::info!("created volume {} ({})", volume.name, volume.uuid);
    Ok(volume)
}

/// Delete a volume. A reference only delete keeps the backing data and
/// is allowed while mounted.
pub fn delete_volume(daemon: &Daemon, volume: &VolumeRecord, reference_only: bool) -> Result<(), Error> {
    let _lock = lock_object(volume, None)?;
    let ops = daemon.volume_ops(volume)?;
    let req = DriverRequest::new(volume.name.as_str())
        .with_opt(OPT_REFERENCE_ONLY, reference_only.to_string());

    if !reference_only {
        let mount_point = ops.mount_point(&req)?;
        if !mount_point.is_empty() {
            volume_bail!(
                Conflict,
                "volume {} is still mounted at {}",
                volume.name,
                mount_point
            );
        }
    }

    ops.delete(&req)?;
    delete_object(volume)?;

    daemon.name_index.remove(&volume.name)?;
    for snapshot in volume.snapshots.values() {
        daemon.snapshot_index.remove(&snapshot.uuid)?;
        daemon.name_index.remove(&snapshot.name)?;
    }

    log::info!(
        "deleted volume {} ({}){}",
        volume.name,
        volume.uuid,
        if reference_only { ", kept backing data" } else { "" }
    );
    Ok(())
}

pub fn mount_volume(daemon: &Daemon, volume: &VolumeRecord, request: &VolumeMountRequest) -> Result<String, Error> {
    let _lock = lock_object(volume, None)?;
    let req = DriverRequest::new(volume.name.as_str())
        .with_opt(OPT_MOUNT_POINT, request.mount_point.as_str())
        .with_opt(OPT_READ_WRITE, request.read_write.as_str())
        .with_opt(OPT_BIND_MOUNT, request.bind_mount.as_str())
        .with_opt(OPT_REMOUNT, request.re_mount.to_string());

    let mount_point = daemon.volume_ops(volume)?.mount(&req)?;
    log::debug!("mounted volume {} at {}", volume.name, mount_point);
    Ok(mount_point)
}

pub fn umount_volume(daemon: &Daemon, volume: &VolumeRecord) -> Result<(), Error> {
    let _lock = lock_object(volume, None)?;
    daemon
        .volume_ops(volume)?
        .umount(&DriverRequest::new(volume.name.as_str()))?;
    log::debug!("unmounted volume {}", volume.name);
    Ok(())
}

pub fn volume_mount_point(daemon: &Daemon, volume: &VolumeRecord) -> Result<String, Error> {
    daemon
        .volume_ops(volume)?
        .mount_point(&DriverRequest::new(volume.name.as_str()))
}

/// Full description of a volume including driver info and snapshots.
pub fn volume_response(daemon: &Daemon, volume: &VolumeRecord) -> Result<VolumeResponse, Error> {
    let driver = daemon.driver(&volume.driver_name)?;
    let ops = driver.volume_ops()?;

    let mount_point = ops.mount_point(&DriverRequest::new(volume.name.as_str()))?;
    let mut driver_info = ops.get_volume_info(&volume.name)?;
    driver_info.insert(INFO_DRIVER.to_string(), driver.name().to_string());

    let mut snapshots = HashMap::new();
    for snapshot in volume.snapshots.values() {
        snapshots.insert(
            snapshot.uuid.clone(),
            snapshot_response(daemon, volume, snapshot, false)?,
        );
    }

    Ok(VolumeResponse {
        uuid: volume.uuid.clone(),
        name: volume.name.clone(),
        driver: volume.driver_name.clone(),
        mount_point,
        created_time: volume.created_time.clone(),
        driver_info,
        snapshots,
    })
}

pub fn api_volume_create(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: VolumeCreateRequest = param.parse()?;
    let volume = create_volume(daemon, &request)?;
    if request.verbose {
        return Ok(serde_json::to_value(volume_response(daemon, &volume)?)?);
    }
    Ok(string_response(volume.uuid))
}

pub fn api_volume_delete(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: VolumeDeleteRequest = param.parse()?;
    let volume = daemon.get_volume_by_name(&request.volume_name)?;
    delete_volume(daemon, &volume, request.reference_only)?;
    Ok(Value::Null)
}

pub fn api_volume_inspect(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: VolumeInspectRequest = param.parse()?;
    let volume = daemon.get_volume_by_name(&request.volume_name)?;
    Ok(serde_json::to_value(volume_response(daemon, &volume)?)?)
}

/// With `driver=1` the raw driver listings are merged, otherwise every
/// volume is described, keyed by UUID.
pub fn api_volume_list(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    if param.query_flag("driver") {
        let mut result = HashMap::new();
        for driver in daemon.drivers() {
            let volumes = driver.volume_ops()?.list_volume(&HashMap::new())?;
            for (name, mut info) in volumes {
                info.insert(INFO_DRIVER.to_string(), driver.name().to_string());
                result.insert(name, info);
            }
        }
        return Ok(serde_json::to_value(result)?);
    }

    let mut result = HashMap::new();
    for uuid in daemon.volume_uuids()? {
        let volume = daemon.load_volume(&uuid)?;
        result.insert(uuid, volume_response(daemon, &volume)?);
    }
    Ok(serde_json::to_value(result)?)
}

pub fn api_volume_mount(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: VolumeMountRequest = param.parse()?;
    let volume = daemon.get_volume_by_name(&request.volume_name)?;
    let mount_point = mount_volume(daemon, &volume, &request)?;
    if request.verbose {
        return Ok(serde_json::to_value(volume_response(daemon, &volume)?)?);
    }
    Ok(string_response(mount_point))
}

pub fn api_volume_umount(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    let request: VolumeUmountRequest = param.parse()?;
    let volume = daemon.get_volume_by_name(&request.volume_name)?;
    umount_volume(daemon, &volume)?;
    Ok(Value::Null)
}
