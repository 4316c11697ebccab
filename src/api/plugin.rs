//! Docker volume plugin protocol.
//!
//! Replies always use HTTP 200, failures are reported in the `Err` field.

use anyhow::Error;
use serde_json::Value;

use convoy_api_types::common_regex::split_sized_name;
use convoy_api_types::{
    check_name, error_kind, parse_bool_opt, parse_size, volume_bail, volume_err, ErrorKind,
    PluginCapabilities, PluginInfo, PluginRequest, PluginResponse, PluginVolume,
    VolumeCreateRequest, VolumeMountRequest, PLUGIN_IMPLEMENTS,
};

use super::volume::{create_volume, delete_volume, mount_volume, umount_volume, volume_mount_point};
use super::ApiRequest;
use crate::daemon::{Daemon, VolumeRecord};

fn plugin_reply(result: Result<PluginResponse, Error>) -> Result<Value, Error> {
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            log::error!("docker plugin request failed - {}", err);
            PluginResponse::error(err)
        }
    };
    Ok(serde_json::to_value(response)?)
}

/// Strip a `~<size>` suffix from the name and move it into the options.
fn normalize_request(mut request: PluginRequest) -> PluginRequest {
    if let Some((name, size)) = split_sized_name(&request.name) {
        let (name, size) = (name.to_string(), size.to_string());
        request.opts.insert("size".to_string(), size);
        request.name = name;
    }
    request
}

fn create_request(request: &PluginRequest) -> Result<VolumeCreateRequest, Error> {
    let opt = |key: &str| request.opts.get(key).cloned().unwrap_or_default();

    let size = opt("size");
    parse_size(&size)?;
    let iops = match request.opts.get("iops") {
        Some(iops) if !iops.is_empty() => iops
            .parse()
            .map_err(|err| volume_err!(InvalidArgument, "invalid iops {:?} - {}", iops, err))?,
        _ => 0,
    };

    Ok(VolumeCreateRequest {
        name: request.name.clone(),
        driver_name: opt("driver"),
        size,
        backup_url: opt("backup"),
        driver_volume_id: opt("id"),
        volume_type: opt("type"),
        iops,
        prepare_for_vm: parse_bool_opt(request.opts.get("vm"))?,
        filesystem: opt("fs"),
        verbose: false,
    })
}

/// Look up the volume docker refers to, creating it if asked to.
fn docker_volume(daemon: &Daemon, request: &PluginRequest, create: bool) -> Result<Option<VolumeRecord>, Error> {
    check_name(&request.name)?;
    match daemon.get_volume_by_name(&request.name) {
        Ok(volume) => return Ok(Some(volume)),
        Err(err) if error_kind(&err) == Some(ErrorKind::NotFound) => {}
        Err(err) => return Err(err),
    }
    if !create {
        return Ok(None);
    }

    log::debug!("creating volume {} for docker", request.name);
    let volume = create_volume(daemon, &create_request(request)?)?;
    Ok(Some(volume))
}

fn parse_request(param: &ApiRequest) -> Result<PluginRequest, Error> {
    let request: PluginRequest = param.parse()?;
    log::debug!("request from docker: {:?}", request);
    Ok(normalize_request(request))
}

pub fn plugin_activate(_daemon: &Daemon, _param: &ApiRequest) -> Result<Value, Error> {
    let info = PluginInfo {
        implements: vec![PLUGIN_IMPLEMENTS.to_string()],
    };
    Ok(serde_json::to_value(info)?)
}

fn docker_create(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    docker_volume(daemon, &request, true)?;
    Ok(PluginResponse::default())
}

pub fn plugin_create(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_create(daemon, param))
}

fn docker_remove(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    let volume = match docker_volume(daemon, &request, false)? {
        Some(volume) => volume,
        None => {
            log::info!("volume {} not found, nothing to remove", request.name);
            return Ok(PluginResponse::default());
        }
    };

    if daemon.config.ignore_docker_delete {
        log::debug!("ignoring docker remove of volume {}", volume.name);
    } else {
        // the backing storage may still be used elsewhere
        delete_volume(daemon, &volume, true)?;
    }
    Ok(PluginResponse::default())
}

pub fn plugin_remove(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_remove(daemon, param))
}

fn docker_mount(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    let create = daemon.config.create_on_docker_mount;

    let volume = match docker_volume(daemon, &request, create)? {
        Some(volume) => volume,
        None => volume_bail!(NotFound, "cannot find volume {}", request.name),
    };

    let mount_request = VolumeMountRequest::default();
    match mount_volume(daemon, &volume, &mount_request) {
        Ok(mount_point) => Ok(PluginResponse::mountpoint(mount_point)),
        Err(err) if error_kind(&err) == Some(ErrorKind::NotAttachedInBackend) => {
            log::warn!(
                "volume {} is gone in the backend, removing stale record - {}",
                volume.name,
                err
            );
            delete_volume(daemon, &volume, true)?;

            if !create {
                volume_bail!(
                    NotFound,
                    "volume {} is not attached in backend and has been removed",
                    request.name
                );
            }
            let volume = match docker_volume(daemon, &request, true)? {
                Some(volume) => volume,
                None => volume_bail!(NotFound, "cannot find volume {}", request.name),
            };
            let mount_point = mount_volume(daemon, &volume, &mount_request)?;
            Ok(PluginResponse::mountpoint(mount_point))
        }
        Err(err) => Err(err),
    }
}

pub fn plugin_mount(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_mount(daemon, param))
}

fn docker_unmount(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    match docker_volume(daemon, &request, false)? {
        Some(volume) => umount_volume(daemon, &volume)?,
        None => log::info!("volume {} not found, nothing to unmount", request.name),
    }
    Ok(PluginResponse::default())
}

pub fn plugin_unmount(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_unmount(daemon, param))
}

fn docker_path(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    let volume = match docker_volume(daemon, &request, false)? {
        Some(volume) => volume,
        None => volume_bail!(NotFound, "cannot find volume {}", request.name),
    };
    Ok(PluginResponse::mountpoint(volume_mount_point(daemon, &volume)?))
}

pub fn plugin_path(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_path(daemon, param))
}

fn docker_get(daemon: &Daemon, param: &ApiRequest) -> Result<PluginResponse, Error> {
    let request = parse_request(param)?;
    let volume = match docker_volume(daemon, &request, false)? {
        Some(volume) => volume,
        None => volume_bail!(NotFound, "cannot find volume {}", request.name),
    };
    Ok(PluginResponse {
        volume: Some(PluginVolume {
            mountpoint: volume_mount_point(daemon, &volume)?,
            name: volume.name,
        }),
        ..Default::default()
    })
}

pub fn plugin_get(daemon: &Daemon, param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_get(daemon, param))
}

fn docker_list(daemon: &Daemon) -> Result<PluginResponse, Error> {
    let mut volumes = Vec::new();
    for uuid in daemon.volume_uuids()? {
        let volume = daemon.load_volume(&uuid)?;
        volumes.push(PluginVolume {
            mountpoint: volume_mount_point(daemon, &volume)?,
            name: volume.name,
        });
    }
    volumes.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(PluginResponse {
        volumes: Some(volumes),
        ..Default::default()
    })
}

pub fn plugin_list(daemon: &Daemon, _param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(docker_list(daemon))
}

pub fn plugin_capabilities(_daemon: &Daemon, _param: &ApiRequest) -> Result<Value, Error> {
    plugin_reply(Ok(PluginResponse {
        capabilities: Some(PluginCapabilities {
            scope: "local".to_string(),
        }),
        ..Default::default()
    }))
}
