//! Object store driver contract and the process wide driver table.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Error};
use lazy_static::lazy_static;
use url::Url;

use convoy_api_types::volume_bail;

/// Readable and seekable source passed to [ObjectStoreDriver::write].
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Byte level access to a (possibly remote) object store.
///
/// All paths are relative to the location given in the store URL and use `/`
/// as separator.
pub trait ObjectStoreDriver: Send + Sync {
    fn kind(&self) -> &str;

    /// Canonical URL of the store location, without query.
    fn url(&self) -> &str;

    fn file_exists(&self, path: &str) -> bool {
        self.file_size(path) >= 0
    }

    /// Size of a file, negative if it is missing or a directory.
    fn file_size(&self, path: &str) -> i64;

    /// Remove files or directories recursively (`rm -rf`).
    fn remove(&self, paths: &[String]) -> Result<(), Error>;

    fn read(&self, src: &str) -> Result<Box<dyn Read + Send>, Error>;

    /// Atomically replace `dst` with the content of `data`.
    fn write(&self, dst: &str, data: &mut dyn ReadSeek) -> Result<(), Error>;

    /// Entries of a single directory (`ls`, not `find`), sorted.
    fn list(&self, path: &str) -> Result<Vec<String>, Error>;

    fn upload(&self, src: &Path, dst: &str) -> Result<(), Error>;

    fn download(&self, src: &str, dst: &Path) -> Result<(), Error>;
}

/// Connection parameters besides the store URL.
#[derive(Clone, Debug, Default)]
pub struct DriverOptions {
    /// Endpoint override, only valid for drivers documenting it.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

pub type InitFn = fn(&Url, &DriverOptions) -> Result<Arc<dyn ObjectStoreDriver>, Error>;

lazy_static! {
    static ref OBJECTSTORE_DRIVERS: RwLock<HashMap<String, InitFn>> = {
        let mut map: HashMap<String, InitFn> = HashMap::new();
        map.insert(crate::vfs::KIND.to_string(), crate::vfs::init as InitFn);
        RwLock::new(map)
    };
}

/// Register an object store driver for URL scheme `kind`.
///
/// Registering the same scheme twice is an error.
pub fn register_driver(kind: &str, init: InitFn) -> Result<(), Error> {
    let mut map = OBJECTSTORE_DRIVERS.write().unwrap();
    if map.contains_key(kind) {
        bail!("object store driver {} has already been registered", kind);
    }
    map.insert(kind.to_string(), init);
    Ok(())
}

/// Check if a driver for URL scheme `kind` is registered.
pub fn driver_registered(kind: &str) -> bool {
    OBJECTSTORE_DRIVERS.read().unwrap().contains_key(kind)
}

pub fn registered_drivers() -> Vec<String> {
    let mut list: Vec<String> = OBJECTSTORE_DRIVERS.read().unwrap().keys().cloned().collect();
    list.sort();
    list
}

pub(crate) fn parse_store_url(dest_url: &str) -> Result<Url, Error> {
    Url::parse(dest_url).map_err(|err| {
        convoy_api_types::volume_err!(InvalidArgument, "unable to parse url {:?} - {}", dest_url, err)
    })
}

/// Instantiate the driver responsible for the scheme of `dest_url`.
pub fn get_object_store_driver(dest_url: &str) -> Result<Arc<dyn ObjectStoreDriver>, Error> {
    get_object_store_driver_with_options(dest_url, &DriverOptions::default())
}

pub fn get_object_store_driver_with_options(
    dest_url: &str,
    options: &DriverOptions,
) -> Result<Arc<dyn ObjectStoreDriver>, Error> {
    let url = parse_store_url(dest_url)?;
    let init = match OBJECTSTORE_DRIVERS.read().unwrap().get(url.scheme()) {
        Some(init) => *init,
        None => volume_bail!(NotSupported, "object store driver {} is not supported", url.scheme()),
    };
    init(&url, options)
}
