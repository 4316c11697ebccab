//! Persistence of JSON encoded objects and per object advisory locks.
//!
//! Every record knows its own file name through [ConfigObject]. Files are
//! replaced atomically, so readers either see the old or the new content.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, format_err, Error};
use nix::fcntl::{flock, FlockArg};
use serde::de::DeserializeOwned;
use serde::Serialize;

use proxmox_sys::fs::{replace_file, CreateOptions};

use convoy_api_types::volume_bail;

/// Suffix of JSON encoded records.
pub const CFG_POSTFIX: &str = ".json";

/// Suffix appended to a record path to get its lock file.
pub const LOCK_POSTFIX: &str = ".lock";

/// Object stored as JSON file.
pub trait ConfigObject: Serialize + DeserializeOwned {
    /// Absolute path of the file holding this object.
    fn config_file(&self) -> Result<PathBuf, Error>;
}

fn config_create_options() -> CreateOptions {
    CreateOptions::new().perm(nix::sys::stat::Mode::from_bits_truncate(0o600))
}

/// Serialize `data` and atomically replace `path` with it.
pub fn save_config<T: Serialize>(path: &Path, data: &T) -> Result<(), Error> {
    let raw = serde_json::to_vec_pretty(data)?;
    replace_file(path, &raw, config_create_options(), true)
        .map_err(|err| format_err!("unable to save config {:?} - {}", path, err))
}

/// Load a JSON encoded record. A missing file is a `NotFound` error.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    match load_config_optional(path)? {
        Some(data) => Ok(data),
        None => volume_bail!(NotFound, "cannot find config {:?}", path),
    }
}

/// Load a JSON encoded record, returning `None` if the file does not exist.
pub fn load_config_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => bail!("unable to read config {:?} - {}", path, err),
    };
    let data = serde_json::from_slice(&raw)
        .map_err(|err| format_err!("unable to parse config {:?} - {}", path, err))?;
    Ok(Some(data))
}

pub fn config_exists(path: &Path) -> bool {
    path.is_file()
}

/// Remove a record file. Removing a missing file is not an error.
pub fn remove_config(path: &Path) -> Result<(), Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => bail!("unable to remove config {:?} - {}", path, err),
    }
}

pub fn save_object<T: ConfigObject>(obj: &T) -> Result<(), Error> {
    save_config(&obj.config_file()?, obj)
}

pub fn object_exists<T: ConfigObject>(obj: &T) -> Result<bool, Error> {
    Ok(config_exists(&obj.config_file()?))
}

pub fn delete_object<T: ConfigObject>(obj: &T) -> Result<(), Error> {
    remove_config(&obj.config_file()?)
}

/// List the identifiers of all records named `<prefix><id><suffix>` in `dir`.
///
/// A missing directory yields an empty list. The result is sorted.
pub fn list_config_ids(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<String>, Error> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => bail!("unable to list {:?} - {}", dir, err),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(name) => name,
            None => continue,
        };
        if let Some(id) = extract_id(name, prefix, suffix) {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Strip `prefix` and `suffix` from `name`, if both are present.
pub fn extract_id<'a>(name: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let id = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Holds an advisory lock on a lock file.
///
/// Dropping the guard removes the lock file and releases the lock.
pub struct ConfigLockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl ConfigLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigLockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("unable to remove lock file {:?} - {}", self.path, err);
            }
        }
        // closing the file releases the flock
        self.file.take();
    }
}

/// Path of the lock file next to a record file.
pub fn lock_file_path(config_file: &Path) -> PathBuf {
    let mut path = config_file.as_os_str().to_owned();
    path.push(LOCK_POSTFIX);
    PathBuf::from(path)
}

/// Open or create a lock file and lock it exclusively (`flock`, non-blocking).
///
/// With a `timeout` the lock is retried until it expires, otherwise a held
/// lock fails immediately with a `Conflict` error.
pub fn open_lockfile(path: &Path, timeout: Option<Duration>) -> Result<ConfigLockGuard, Error> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| format_err!("unable to open lock {:?} - {}", path, err))?;

    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => break,
            Err(nix::errno::Errno::EWOULDBLOCK) => match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => volume_bail!(Conflict, "unable to acquire lock {:?} - locked by another user", path),
            },
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => bail!("unable to acquire lock {:?} - {}", path, err),
        }
    }

    Ok(ConfigLockGuard {
        file: Some(file),
        path: path.to_owned(),
    })
}

/// Lock the record behind `obj` using its adjacent `.lock` file.
pub fn lock_object<T: ConfigObject>(
    obj: &T,
    timeout: Option<Duration>,
) -> Result<ConfigLockGuard, Error> {
    open_lockfile(&lock_file_path(&obj.config_file()?), timeout)
}
