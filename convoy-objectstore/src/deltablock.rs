//! Differential block backups.
//!
//! A snapshot is stored as a list of fixed size blocks. Each block is named
//! by the checksum of its uncompressed content and stored gzip compressed,
//! so identical blocks are written only once per volume. Every backup record
//! lists all blocks of its snapshot, not only the ones changed since the
//! previous backup.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, format_err, Error};

use convoy_api_types::volume_bail;
use convoy_tools::checksum::get_checksum;
use convoy_tools::compression::{compress_data, decompress_and_verify};

use crate::backup_url::{decode_backup_url, encode_backup_url};
use crate::config::{
    add_volume, block_file_path, get_backup_names_for_volume, load_backup, load_volume,
    remove_backup, remove_volume, save_backup, save_volume, Backup, BlockMapping, Snapshot,
    Volume,
};
use crate::driver::{get_object_store_driver, ObjectStoreDriver};

pub const DEFAULT_BLOCK_SIZE: u64 = 2097152;

/// A changed range inside a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub offset: u64,
    pub size: u64,
}

/// Result of comparing two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mappings {
    pub mappings: Vec<Mapping>,
    pub block_size: u64,
}

/// Snapshot access a storage driver provides to the backup engine.
pub trait DeltaBlockBackupOperations {
    fn has_snapshot(&self, id: &str, volume_id: &str) -> bool;

    /// Ranges of `id` differing from `compare_id`. An empty `compare_id`
    /// means everything.
    fn compare_snapshot(&self, id: &str, compare_id: &str, volume_id: &str)
        -> Result<Mappings, Error>;

    fn open_snapshot(&self, id: &str, volume_id: &str) -> Result<(), Error>;

    /// Fill `data` with snapshot content starting at `offset`.
    fn read_snapshot(&self, id: &str, volume_id: &str, offset: u64, data: &mut [u8])
        -> Result<(), Error>;

    fn close_snapshot(&self, id: &str, volume_id: &str) -> Result<(), Error>;
}

struct OpenSnapshotGuard<'a> {
    ops: &'a dyn DeltaBlockBackupOperations,
    id: &'a str,
    volume_id: &'a str,
}

impl<'a> OpenSnapshotGuard<'a> {
    fn open(
        ops: &'a dyn DeltaBlockBackupOperations,
        id: &'a str,
        volume_id: &'a str,
    ) -> Result<Self, Error> {
        ops.open_snapshot(id, volume_id)?;
        Ok(Self { ops, id, volume_id })
    }
}

impl Drop for OpenSnapshotGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.ops.close_snapshot(self.id, self.volume_id) {
            log::warn!("unable to close snapshot {} of {} - {}", self.id, self.volume_id, err);
        }
    }
}

/// Store one block unless a block with the same checksum already exists.
///
/// Returns `true` if the block was written.
fn store_block(
    driver: &dyn ObjectStoreDriver,
    volume_name: &str,
    block: &[u8],
    checksum: &str,
) -> Result<bool, Error> {
    let path = block_file_path(volume_name, checksum);
    if driver.file_size(&path) >= 0 {
        log::debug!("found existing block {}", path);
        return Ok(false);
    }

    let compressed = compress_data(block)?;
    if let Err(err) = driver.write(&path, &mut Cursor::new(compressed)) {
        // a concurrent backup stored the same content
        if driver.file_size(&path) >= 0 {
            log::debug!("block {} appeared during write, using it", path);
            return Ok(false);
        }
        return Err(err);
    }
    log::debug!("created new block {}", path);
    Ok(true)
}

/// Merge two offset ordered mapping lists, entries of `delta` win on equal
/// offsets.
pub fn merge_block_mappings(delta: Vec<BlockMapping>, last: &[BlockMapping]) -> Vec<BlockMapping> {
    let mut result = Vec::with_capacity(delta.len().max(last.len()));
    let mut delta = delta.into_iter().peekable();
    let mut last = last.iter().peekable();

    loop {
        match (delta.peek(), last.peek()) {
            (Some(d), Some(l)) => {
                if d.offset == l.offset {
                    last.next();
                    result.extend(delta.next());
                } else if d.offset < l.offset {
                    result.extend(delta.next());
                } else {
                    result.extend(last.next().cloned());
                }
            }
            (Some(_), None) => result.extend(delta.next()),
            (None, Some(_)) => result.extend(last.next().cloned()),
            (None, None) => break,
        }
    }
    result
}

/// Back up `snapshot` of `volume` to `dest_url` and return the backup URL.
pub fn create_delta_block_backup(
    volume: &Volume,
    snapshot: &Snapshot,
    dest_url: &str,
    ops: &dyn DeltaBlockBackupOperations,
) -> Result<String, Error> {
    let driver = get_object_store_driver(dest_url)?;
    let driver = driver.as_ref();

    add_volume(driver, volume)?;
    let mut volume = load_volume(driver, &volume.name)?;

    let mut last_backup = None;
    let mut last_snapshot_name = String::new();
    if !volume.last_backup_name.is_empty() {
        let backup = load_backup(driver, &volume.last_backup_name, &volume.name)?;
        if backup.snapshot_name == snapshot.name {
            log::debug!("snapshot {} was backed up last time, creating full backup", snapshot.name);
        } else if !ops.has_snapshot(&backup.snapshot_name, &volume.name) {
            log::debug!(
                "cannot find last snapshot {} in local storage, creating full backup",
                backup.snapshot_name
            );
        } else {
            last_snapshot_name = backup.snapshot_name.clone();
        }
        last_backup = Some(backup);
    }

    let _guard = OpenSnapshotGuard::open(ops, &snapshot.name, &volume.name)?;

    log::debug!(
        "comparing snapshot {} with {:?} of volume {}",
        snapshot.name,
        last_snapshot_name,
        volume.name
    );
    let delta = ops.compare_snapshot(&snapshot.name, &last_snapshot_name, &volume.name)?;
    if delta.block_size != DEFAULT_BLOCK_SIZE {
        volume_bail!(
            NotSupported,
            "block size {} is not supported, only {} is",
            delta.block_size,
            DEFAULT_BLOCK_SIZE
        );
    }

    let mut blocks = Vec::new();
    let mut new_blocks = 0;
    let mut block = vec![0u8; DEFAULT_BLOCK_SIZE as usize];
    let segments = delta.mappings.len();
    for (index, mapping) in delta.mappings.iter().enumerate() {
        if mapping.offset % DEFAULT_BLOCK_SIZE != 0 {
            bail!("changed range at {} is not block aligned", mapping.offset);
        }
        if mapping.size % DEFAULT_BLOCK_SIZE != 0 {
            bail!(
                "changed range at {} has size {}, not a multiple of the block size",
                mapping.offset,
                mapping.size
            );
        }
        let block_count = mapping.size / DEFAULT_BLOCK_SIZE;
        for i in 0..block_count {
            let offset = mapping.offset + i * DEFAULT_BLOCK_SIZE;
            log::debug!(
                "backup {}: segment {}/{}, block {}/{}",
                snapshot.name,
                index + 1,
                segments,
                i + 1,
                block_count
            );
            ops.read_snapshot(&snapshot.name, &volume.name, offset, &mut block)?;
            let checksum = get_checksum(&block);
            if store_block(driver, &volume.name, &block, &checksum)? {
                new_blocks += 1;
            }
            blocks.push(BlockMapping {
                offset,
                block_checksum: checksum,
            });
        }
    }
    log::debug!("backup {}: wrote {} new blocks", snapshot.name, new_blocks);

    if let Some(last) = &last_backup {
        blocks = merge_block_mappings(blocks, &last.blocks);
    }

    let backup = Backup {
        name: convoy_tools::generate_name("backup"),
        volume_name: volume.name.clone(),
        snapshot_name: snapshot.name.clone(),
        snapshot_created_at: snapshot.created_time.clone(),
        created_time: convoy_tools::now_rfc3339()?,
        blocks,
        ..Default::default()
    };
    save_backup(driver, &backup)?;

    volume.last_backup_name = backup.name.clone();
    save_volume(driver, &volume)?;

    Ok(encode_backup_url(&backup.name, &volume.name, driver.url()))
}

/// Write the blocks of a backup to `device`, which should be a fresh target.
pub fn restore_delta_block_backup(backup_url: &str, device: &Path) -> Result<(), Error> {
    let driver = get_object_store_driver(backup_url)?;
    let driver = driver.as_ref();
    let (backup_name, volume_name) = decode_backup_url(backup_url)?;

    if let Err(err) = load_volume(driver, &volume_name) {
        volume_bail!(NotFound, "volume {} doesn't exist in object store - {}", volume_name, err);
    }
    let backup = load_backup(driver, &backup_name, &volume_name)?;

    let mut target = OpenOptions::new()
        .write(true)
        .create(true)
        .open(device)
        .map_err(|err| format_err!("unable to open {:?} - {}", device, err))?;

    log::debug!("restoring {} to {:?}", backup_url, device);
    let count = backup.blocks.len();
    for (index, mapping) in backup.blocks.iter().enumerate() {
        log::debug!(
            "restore {:?}: block {}, {}/{}",
            device,
            mapping.block_checksum,
            index + 1,
            count
        );
        let reader = driver.read(&block_file_path(&volume_name, &mapping.block_checksum))?;
        let data = decompress_and_verify(reader, &mapping.block_checksum)?;
        if (data.len() as u64) < DEFAULT_BLOCK_SIZE {
            volume_bail!(
                Corruption,
                "block {} is too short ({} bytes)",
                mapping.block_checksum,
                data.len()
            );
        }
        target.seek(SeekFrom::Start(mapping.offset))?;
        target
            .write_all(&data[..DEFAULT_BLOCK_SIZE as usize])
            .map_err(|err| format_err!("unable to write to {:?} - {}", device, err))?;
    }
    target.sync_all()?;

    Ok(())
}

/// Delete a backup and every block no other backup of the volume references.
pub fn delete_delta_block_backup(backup_url: &str) -> Result<(), Error> {
    let driver = get_object_store_driver(backup_url)?;
    let driver = driver.as_ref();
    let (backup_name, volume_name) = decode_backup_url(backup_url)?;

    let mut volume = load_volume(driver, &volume_name)?;
    let backup = load_backup(driver, &backup_name, &volume_name)?;

    let mut discard: HashSet<String> = backup
        .blocks
        .iter()
        .map(|mapping| mapping.block_checksum.clone())
        .collect();

    remove_backup(driver, &backup)?;

    if volume.last_backup_name == backup.name {
        volume.last_backup_name.clear();
        save_volume(driver, &volume)?;
    }

    let backup_names = get_backup_names_for_volume(driver, &volume_name)?;
    if backup_names.is_empty() {
        log::debug!("no backup left for volume {}, removing it", volume_name);
        if let Err(err) = remove_volume(driver, &volume_name) {
            log::warn!("failed to remove volume {} - {}", volume_name, err);
        }
        return Ok(());
    }

    log::debug!("GC started for volume {}", volume_name);
    for name in backup_names {
        if discard.is_empty() {
            break;
        }
        let other = load_backup(driver, &name, &volume_name)?;
        for mapping in other.blocks.iter() {
            discard.remove(&mapping.block_checksum);
        }
    }

    let paths: Vec<String> = discard
        .iter()
        .map(|checksum| {
            log::debug!("found unused block {} of volume {}", checksum, volume_name);
            block_file_path(&volume_name, checksum)
        })
        .collect();
    driver.remove(&paths)?;
    log::debug!(
        "GC completed, removed {} blocks of volume {}",
        paths.len(),
        volume_name
    );

    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// In memory snapshots, changes are tracked per block.
    #[derive(Default)]
    pub(crate) struct MemorySnapshots {
        snapshots: RefCell<HashMap<String, Vec<u8>>>,
        pub open: RefCell<Vec<String>>,
    }

    impl MemorySnapshots {
        pub fn add(&self, id: &str, data: Vec<u8>) {
            self.snapshots.borrow_mut().insert(id.to_string(), data);
        }

        pub fn remove(&self, id: &str) {
            self.snapshots.borrow_mut().remove(id);
        }
    }

    impl DeltaBlockBackupOperations for MemorySnapshots {
        fn has_snapshot(&self, id: &str, _volume_id: &str) -> bool {
            self.snapshots.borrow().contains_key(id)
        }

        fn compare_snapshot(&self, id: &str, compare_id: &str, _volume_id: &str) -> Result<Mappings, Error> {
            let snapshots = self.snapshots.borrow();
            let current = snapshots.get(id).ok_or_else(|| format_err!("no snapshot {}", id))?;
            let previous = if compare_id.is_empty() {
                None
            } else {
                Some(snapshots.get(compare_id).ok_or_else(|| format_err!("no snapshot {}", compare_id))?)
            };

            let bs = DEFAULT_BLOCK_SIZE as usize;
            let mut mappings = Vec::new();
            for (index, chunk) in current.chunks(bs).enumerate() {
                let changed = match previous {
                    Some(prev) => prev.get(index * bs..(index + 1) * bs) != Some(chunk),
                    None => true,
                };
                if changed {
                    mappings.push(Mapping {
                        offset: (index * bs) as u64,
                        size: DEFAULT_BLOCK_SIZE,
                    });
                }
            }
            Ok(Mappings {
                mappings,
                block_size: DEFAULT_BLOCK_SIZE,
            })
        }

        fn open_snapshot(&self, id: &str, _volume_id: &str) -> Result<(), Error> {
            self.open.borrow_mut().push(id.to_string());
            Ok(())
        }

        fn read_snapshot(&self, id: &str, _volume_id: &str, offset: u64, data: &mut [u8]) -> Result<(), Error> {
            let snapshots = self.snapshots.borrow();
            let snapshot = snapshots.get(id).ok_or_else(|| format_err!("no snapshot {}", id))?;
            let start = offset as usize;
            data.copy_from_slice(&snapshot[start..start + data.len()]);
            Ok(())
        }

        fn close_snapshot(&self, id: &str, _volume_id: &str) -> Result<(), Error> {
            self.open.borrow_mut().retain(|open| open != id);
            Ok(())
        }
    }

    pub(crate) fn testdir(name: &str) -> PathBuf {
        let mut path = std::fs::canonicalize(".").unwrap();
        path.push(".testdir");
        path.push(name);
        if path.exists() {
            std::fs::remove_dir_all(&path).unwrap();
        }
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub(crate) fn count_files(dir: &Path, suffix: &str) -> usize {
        let mut count = 0;
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    count += count_files(&path, suffix);
                } else if path.to_string_lossy().ends_with(suffix) {
                    count += 1;
                }
            }
        }
        count
    }

    const BS: usize = DEFAULT_BLOCK_SIZE as usize;

    fn volume() -> Volume {
        Volume {
            name: "vol1".into(),
            driver: "image".into(),
            size: 4 * DEFAULT_BLOCK_SIZE as i64,
            ..Default::default()
        }
    }

    fn snapshot(name: &str) -> Snapshot {
        Snapshot {
            name: name.into(),
            created_time: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_merge_block_mappings() {
        let m = |offset: u64, sum: &str| BlockMapping {
            offset,
            block_checksum: sum.to_string(),
        };
        let merged = merge_block_mappings(
            vec![m(0, "a2"), m(3, "d2"), m(5, "f2")],
            &[m(0, "a"), m(1, "b"), m(3, "d"), m(4, "e")],
        );
        assert_eq!(
            merged,
            vec![m(0, "a2"), m(1, "b"), m(3, "d2"), m(4, "e"), m(5, "f2")]
        );
        assert_eq!(merge_block_mappings(Vec::new(), &[m(1, "b")]), vec![m(1, "b")]);
    }

    #[test]
    fn test_dedup_delta_and_gc() {
        let dir = testdir("deltablock-gc");
        let dest = format!("vfs://{}", dir.display());
        let blocks_dir = dir.join("convoy-objectstore");
        let ops = MemorySnapshots::default();

        // four zero blocks share one block object
        ops.add("snap1", vec![0u8; 4 * BS]);
        let url1 = create_delta_block_backup(&volume(), &snapshot("snap1"), &dest, &ops).unwrap();
        assert!(ops.open.borrow().is_empty());
        assert_eq!(count_files(&blocks_dir, ".blk"), 1);
        assert_eq!(count_files(&blocks_dir, ".cfg"), 2);

        // same snapshot again writes nothing new
        let url2 = create_delta_block_backup(&volume(), &snapshot("snap1"), &dest, &ops).unwrap();
        assert_ne!(url1, url2);
        assert_eq!(count_files(&blocks_dir, ".blk"), 1);

        let driver = get_object_store_driver(&dest).unwrap();
        let (name2, _) = decode_backup_url(&url2).unwrap();
        assert_eq!(load_volume(driver.as_ref(), "vol1").unwrap().last_backup_name, name2);

        // change the third block
        let mut data = vec![0u8; 4 * BS];
        data[2 * BS] = 1;
        ops.add("snap2", data.clone());
        let url3 = create_delta_block_backup(&volume(), &snapshot("snap2"), &dest, &ops).unwrap();
        assert_eq!(count_files(&blocks_dir, ".blk"), 2);

        let (name3, _) = decode_backup_url(&url3).unwrap();
        let backup3 = load_backup(driver.as_ref(), &name3, "vol1").unwrap();
        let zero = get_checksum(&vec![0u8; BS]);
        let changed = get_checksum(&data[2 * BS..3 * BS]);
        let offsets: Vec<u64> = backup3.blocks.iter().map(|b| b.offset).collect();
        assert_eq!(offsets, vec![0, BS as u64, 2 * BS as u64, 3 * BS as u64]);
        let sums: Vec<&str> = backup3.blocks.iter().map(|b| b.block_checksum.as_str()).collect();
        assert_eq!(sums, vec![zero.as_str(), zero.as_str(), changed.as_str(), zero.as_str()]);
        assert_eq!(backup3.snapshot_name, "snap2");

        // deleting older backups keeps blocks still referenced
        delete_delta_block_backup(&url1).unwrap();
        delete_delta_block_backup(&url2).unwrap();
        assert_eq!(count_files(&blocks_dir, ".blk"), 2);
        assert_eq!(load_volume(driver.as_ref(), "vol1").unwrap().last_backup_name, name3);

        // the last one removes everything, including the volume descriptor
        delete_delta_block_backup(&url3).unwrap();
        assert_eq!(count_files(&blocks_dir, ".blk"), 0);
        assert!(load_volume(driver.as_ref(), "vol1").is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_restore_and_missing_prior_snapshot() {
        let dir = testdir("deltablock-restore");
        let dest = format!("vfs://{}", dir.display());
        let ops = MemorySnapshots::default();

        let mut data = vec![0u8; 4 * BS];
        data[BS + 7] = 0xaa;
        ops.add("snap1", data.clone());
        create_delta_block_backup(&volume(), &snapshot("snap1"), &dest, &ops).unwrap();

        // the prior snapshot is gone locally, so the whole snapshot is compared
        data[3 * BS] = 0x55;
        ops.remove("snap1");
        ops.add("snap2", data.clone());
        let url = create_delta_block_backup(&volume(), &snapshot("snap2"), &dest, &ops).unwrap();

        let target = dir.join("restored.img");
        restore_delta_block_backup(&url, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data);

        // corrupt a block object and restore again
        let driver = get_object_store_driver(&dest).unwrap();
        let sum = get_checksum(&data[3 * BS..]);
        let path = dir.join(block_file_path("vol1", &sum));
        std::fs::write(&path, compress_data(&vec![1u8; BS]).unwrap()).unwrap();
        let err = restore_delta_block_backup(&url, &dir.join("second.img")).unwrap_err();
        assert_eq!(
            convoy_api_types::error_kind(&err),
            Some(convoy_api_types::ErrorKind::Corruption)
        );
        drop(driver);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Reports a fixed comparison result and zero filled content.
    struct FixedDelta(Mappings);

    impl DeltaBlockBackupOperations for FixedDelta {
        fn has_snapshot(&self, _: &str, _: &str) -> bool {
            true
        }
        fn compare_snapshot(&self, _: &str, _: &str, _: &str) -> Result<Mappings, Error> {
            Ok(self.0.clone())
        }
        fn open_snapshot(&self, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }
        fn read_snapshot(&self, _: &str, _: &str, _: u64, data: &mut [u8]) -> Result<(), Error> {
            data.fill(0);
            Ok(())
        }
        fn close_snapshot(&self, _: &str, _: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_reject_block_size() {
        let dir = testdir("deltablock-blocksize");
        let dest = format!("vfs://{}", dir.display());
        let ops = FixedDelta(Mappings {
            mappings: Vec::new(),
            block_size: 4096,
        });
        let err = create_delta_block_backup(&volume(), &snapshot("s"), &dest, &ops).unwrap_err();
        assert_eq!(
            convoy_api_types::error_kind(&err),
            Some(convoy_api_types::ErrorKind::NotSupported)
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reject_partial_block_range() {
        let dir = testdir("deltablock-partial");
        let dest = format!("vfs://{}", dir.display());
        let ops = FixedDelta(Mappings {
            mappings: vec![Mapping {
                offset: 0,
                size: DEFAULT_BLOCK_SIZE + 4096,
            }],
            block_size: DEFAULT_BLOCK_SIZE,
        });
        let err = create_delta_block_backup(&volume(), &snapshot("s"), &dest, &ops).unwrap_err();
        assert!(err.to_string().contains("not a multiple of the block size"));
        assert_eq!(count_files(&dir, ".blk"), 0);
        // only the volume descriptor was written
        assert_eq!(count_files(&dir, ".cfg"), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
