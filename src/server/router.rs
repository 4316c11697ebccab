//! Route table of the client API and the docker plugin protocol.

use hyper::Method;
use lazy_static::lazy_static;
use regex::Regex;

use crate::api::{backup, info, plugin, snapshot, volume, ApiHandler, LockMode};

pub struct Route {
    pub method: Method,
    pub path: &'static str,
    pub handler: ApiHandler,
    pub lock: LockMode,
    /// Plugin routes are only reachable without version prefix.
    pub versioned: bool,
}

macro_rules! route {
    (plugin $path:expr, $handler:path, $lock:ident) => {
        Route {
            method: Method::POST,
            path: $path,
            handler: $handler,
            lock: LockMode::$lock,
            versioned: false,
        }
    };
    ($method:ident, $path:expr, $handler:path, $lock:ident) => {
        Route {
            method: Method::$method,
            path: $path,
            handler: $handler,
            lock: LockMode::$lock,
            versioned: true,
        }
    };
}

lazy_static! {
    static ref ROUTES: Vec<Route> = vec![
        route!(GET, "/info", info::api_info, Read),
        route!(GET, "/volumes/list", volume::api_volume_list, Read),
        route!(GET, "/volumes", volume::api_volume_inspect, Read),
        route!(GET, "/snapshots", snapshot::api_snapshot_inspect, Read),
        route!(GET, "/backups/list", backup::api_backup_list, None),
        route!(GET, "/backups/inspect", backup::api_backup_inspect, None),
        route!(POST, "/volumes/create", volume::api_volume_create, Write),
        route!(POST, "/volumes/mount", volume::api_volume_mount, Write),
        route!(POST, "/volumes/umount", volume::api_volume_umount, Write),
        route!(POST, "/snapshots/create", snapshot::api_snapshot_create, Write),
        route!(POST, "/backups/create", backup::api_backup_create, None),
        route!(DELETE, "/volumes", volume::api_volume_delete, Write),
        route!(DELETE, "/snapshots", snapshot::api_snapshot_delete, Write),
        route!(DELETE, "/backups", backup::api_backup_delete, None),
        route!(plugin "/Plugin.Activate", plugin::plugin_activate, None),
        route!(plugin "/VolumeDriver.Create", plugin::plugin_create, Write),
        route!(plugin "/VolumeDriver.Remove", plugin::plugin_remove, Write),
        route!(plugin "/VolumeDriver.Mount", plugin::plugin_mount, Write),
        route!(plugin "/VolumeDriver.Unmount", plugin::plugin_unmount, Write),
        route!(plugin "/VolumeDriver.Path", plugin::plugin_path, Read),
        route!(plugin "/VolumeDriver.Get", plugin::plugin_get, Read),
        route!(plugin "/VolumeDriver.List", plugin::plugin_list, Read),
        route!(plugin "/VolumeDriver.Capabilities", plugin::plugin_capabilities, None),
    ];
}

lazy_static! {
    static ref VERSIONED_PATH: Regex = Regex::new(r"^/v([0-9][0-9.]*)(/.*)?$").unwrap();
}

/// Split `/v<version>/<route>` into version and route path. Trailing
/// slashes are ignored.
pub fn split_version(path: &str) -> (Option<&str>, &str) {
    let (version, path) = match VERSIONED_PATH.captures(path) {
        Some(cap) => (
            cap.get(1).map(|m| m.as_str()),
            cap.get(2).map(|m| m.as_str()).unwrap_or("/"),
        ),
        None => (None, path),
    };
    let trimmed = path.trim_end_matches('/');
    (version, if trimmed.is_empty() { "/" } else { trimmed })
}

pub fn find_route(method: &Method, path: &str, versioned: bool) -> Option<&'static Route> {
    ROUTES
        .iter()
        .find(|r| r.method == *method && r.path == path && (r.versioned || !versioned))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_version() {
        assert_eq!(split_version("/v1/volumes/list"), (Some("1"), "/volumes/list"));
        assert_eq!(split_version("/v1.2/volumes/"), (Some("1.2"), "/volumes"));
        assert_eq!(split_version("/volumes/create"), (None, "/volumes/create"));
        assert_eq!(split_version("/v1"), (Some("1"), "/"));
        assert_eq!(split_version("/VolumeDriver.Get"), (None, "/VolumeDriver.Get"));
    }

    #[test]
    fn test_find_route() {
        let route = find_route(&Method::DELETE, "/volumes", true).unwrap();
        assert_eq!(route.lock, LockMode::Write);
        assert!(find_route(&Method::GET, "/volumes/create", false).is_none());

        assert!(find_route(&Method::POST, "/VolumeDriver.Mount", false).is_some());
        assert!(find_route(&Method::POST, "/VolumeDriver.Mount", true).is_none());
        assert_eq!(
            find_route(&Method::POST, "/backups/create", true).unwrap().lock,
            LockMode::None
        );
    }
}
