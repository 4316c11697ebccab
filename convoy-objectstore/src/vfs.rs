//! `vfs:///path` object store on a local (or network mounted) directory.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, format_err, Error};
use url::Url;

use convoy_api_types::volume_bail;

use crate::config::OBJECTSTORE_BASE;
use crate::driver::{DriverOptions, ObjectStoreDriver, ReadSeek};

pub const KIND: &str = "vfs";

pub struct VfsObjectStore {
    url: String,
    path: PathBuf,
}

pub(crate) fn init(url: &Url, options: &DriverOptions) -> Result<Arc<dyn ObjectStoreDriver>, Error> {
    if url.scheme() != KIND {
        bail!("BUG: dispatched {} url to {} driver", url.scheme(), KIND);
    }
    if !options.endpoint.is_empty() {
        volume_bail!(InvalidArgument, "{} driver does not support endpoint override", KIND);
    }
    if url.host_str().map(|h| !h.is_empty()).unwrap_or(false) {
        volume_bail!(InvalidArgument, "vfs path must follow the vfs:///path/ format");
    }

    let path = url.path();
    if path.is_empty() {
        volume_bail!(InvalidArgument, "cannot find vfs path in {}", url);
    }

    let store = VfsObjectStore {
        url: format!("{}://{}", KIND, path),
        path: PathBuf::from(path),
    };
    if let Err(err) = store.list("") {
        volume_bail!(
            InvalidArgument,
            "vfs path {} doesn't exist or is not a directory - {}",
            path,
            err
        );
    }

    log::debug!("loaded object store driver for {}", store.url);
    Ok(Arc::new(store))
}

impl VfsObjectStore {
    fn full_path(&self, path: &str) -> PathBuf {
        self.path.join(path.trim_start_matches('/'))
    }

    fn prepare_path(&self, file: &Path) -> Result<(), Error> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format_err!("unable to create directory {:?} - {}", parent, err))?;
        }
        Ok(())
    }

    // remove now empty parents, never above the object store base directory
    fn cleanup_parents(&self, path: &Path) {
        let stop = self.path.join(OBJECTSTORE_BASE);
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop || !current.starts_with(&stop) {
                break;
            }
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    fn remove_tmp(&self, tmp: &Path) -> Result<(), Error> {
        match std::fs::remove_file(tmp) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => bail!("unable to remove stale {:?} - {}", tmp, err),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl ObjectStoreDriver for VfsObjectStore {
    fn kind(&self) -> &str {
        KIND
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn file_size(&self, path: &str) -> i64 {
        match std::fs::metadata(self.full_path(path)) {
            Ok(stat) if stat.is_file() => stat.len() as i64,
            _ => -1,
        }
    }

    fn remove(&self, paths: &[String]) -> Result<(), Error> {
        for name in paths {
            let path = self.full_path(name);
            let res = match std::fs::symlink_metadata(&path) {
                Ok(stat) if stat.is_dir() => std::fs::remove_dir_all(&path),
                Ok(_) => std::fs::remove_file(&path),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            };
            res.map_err(|err| format_err!("unable to remove {:?} - {}", path, err))?;
            self.cleanup_parents(&path);
        }
        Ok(())
    }

    fn read(&self, src: &str) -> Result<Box<dyn Read + Send>, Error> {
        let path = self.full_path(src);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                volume_bail!(NotFound, "cannot find {} in object store", src)
            }
            Err(err) => bail!("unable to open {:?} - {}", path, err),
        }
    }

    fn write(&self, dst: &str, data: &mut dyn ReadSeek) -> Result<(), Error> {
        let path = self.full_path(dst);
        let tmp = tmp_path(&path);
        self.remove_tmp(&tmp)?;
        self.prepare_path(&path)?;

        let mut file = File::create(&tmp)
            .map_err(|err| format_err!("unable to create {:?} - {}", tmp, err))?;
        std::io::copy(data, &mut file)
            .map_err(|err| format_err!("unable to write {:?} - {}", tmp, err))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &path)
            .map_err(|err| format_err!("unable to rename {:?} to {:?} - {}", tmp, path, err))
    }

    fn list(&self, path: &str) -> Result<Vec<String>, Error> {
        let dir = self.full_path(path);
        let mut list = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .map_err(|err| format_err!("unable to list {:?} - {}", dir, err))?
        {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                list.push(name.to_string());
            }
        }
        list.sort();
        Ok(list)
    }

    fn upload(&self, src: &Path, dst: &str) -> Result<(), Error> {
        let path = self.full_path(dst);
        let tmp = tmp_path(&path);
        self.remove_tmp(&tmp)?;
        self.prepare_path(&path)?;
        std::fs::copy(src, &tmp)
            .map_err(|err| format_err!("unable to copy {:?} to {:?} - {}", src, tmp, err))?;
        std::fs::rename(&tmp, &path)
            .map_err(|err| format_err!("unable to rename {:?} to {:?} - {}", tmp, path, err))
    }

    fn download(&self, src: &str, dst: &Path) -> Result<(), Error> {
        let path = self.full_path(src);
        if !path.is_file() {
            volume_bail!(NotFound, "cannot find {} in object store", src);
        }
        std::fs::copy(&path, dst)
            .map_err(|err| format_err!("unable to copy {:?} to {:?} - {}", path, dst, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver::{get_object_store_driver, get_object_store_driver_with_options};
    use convoy_api_types::{error_kind, ErrorKind};
    use std::io::Cursor;

    fn testdir(name: &str) -> PathBuf {
        let mut path = std::fs::canonicalize(".").unwrap();
        path.push(".testdir");
        path.push(name);
        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
        }
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_vfs_init() {
        let dir = testdir("vfs-init");
        let url = format!("vfs://{}", dir.display());

        let driver = get_object_store_driver(&url).unwrap();
        assert_eq!(driver.kind(), KIND);
        assert_eq!(driver.url(), url);

        let err = get_object_store_driver("vfs://host/tmp").err().unwrap();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));

        let options = DriverOptions {
            endpoint: "http://localhost:9000".into(),
            ..Default::default()
        };
        assert!(get_object_store_driver_with_options(&url, &options).is_err());

        let missing = format!("vfs://{}/missing", dir.display());
        assert!(get_object_store_driver(&missing).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_vfs_file_operations() {
        let dir = testdir("vfs-files");
        let driver = get_object_store_driver(&format!("vfs://{}", dir.display())).unwrap();

        let file = format!("{}/volumes/ab/cd/abcd/volume.cfg", OBJECTSTORE_BASE);
        assert_eq!(driver.file_size(&file), -1);
        assert!(!driver.file_exists(&file));

        driver.write(&file, &mut Cursor::new(b"{}".to_vec())).unwrap();
        assert_eq!(driver.file_size(&file), 2);
        assert!(!dir.join(format!("{}.tmp", file)).exists());
        // directories have no size
        assert_eq!(driver.file_size(&format!("{}/volumes", OBJECTSTORE_BASE)), -1);

        let mut data = Vec::new();
        driver.read(&file).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"{}");

        let other = format!("{}/volumes/ab/cd/abcd/backups/backup_x.cfg", OBJECTSTORE_BASE);
        driver.write(&other, &mut Cursor::new(b"[]".to_vec())).unwrap();
        assert_eq!(
            driver.list(&format!("{}/volumes/ab/cd/abcd", OBJECTSTORE_BASE)).unwrap(),
            vec!["backups".to_string(), "volume.cfg".to_string()]
        );
        assert!(driver.list("does/not/exist").is_err());

        let local = dir.join("local.bin");
        driver.download(&file, &local).unwrap();
        let uploaded = format!("{}/volumes/ab/cd/abcd/BackupFiles/b.bak", OBJECTSTORE_BASE);
        driver.upload(&local, &uploaded).unwrap();
        assert_eq!(driver.file_size(&uploaded), 2);

        // removing the last file also removes the empty parents
        driver.remove(&[other, uploaded]).unwrap();
        assert!(!dir.join(OBJECTSTORE_BASE).join("volumes/ab/cd/abcd/backups").exists());
        assert!(dir.join(OBJECTSTORE_BASE).join("volumes/ab/cd/abcd").exists());

        driver.remove(&[file]).unwrap();
        assert!(!dir.join(OBJECTSTORE_BASE).join("volumes").exists());
        assert!(dir.join(OBJECTSTORE_BASE).exists());

        let err = driver.read("missing").err().unwrap();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
