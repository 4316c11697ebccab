//! Pack and unpack directory trees as `.tar.gz` archives.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{format_err, Error};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Pack the contents of `source_dir` into the gzip compressed tar file `target`.
///
/// The archive is written to `target.tmp` first and renamed when complete.
pub fn pack_dir(source_dir: &Path, target: &Path) -> Result<(), Error> {
    let tmp = tmp_path(target);

    let file = File::create(&tmp)
        .map_err(|err| format_err!("unable to create {:?} - {}", tmp, err))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", source_dir)
        .map_err(|err| format_err!("unable to archive {:?} - {}", source_dir, err))?;
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;

    std::fs::rename(&tmp, target)
        .map_err(|err| format_err!("unable to rename {:?} to {:?} - {}", tmp, target, err))?;
    Ok(())
}

/// Replace `target_dir` with the contents of the archive `source`.
///
/// Extraction happens into `target_dir.tmp`, which then replaces the target.
/// If `source` lives inside `target_dir` it is gone afterwards.
pub fn unpack_archive(source: &Path, target_dir: &Path) -> Result<(), Error> {
    let tmp = tmp_path(target_dir);
    if tmp.exists() {
        std::fs::remove_dir_all(&tmp)?;
    }
    std::fs::create_dir_all(&tmp)?;

    let file = File::open(source)
        .map_err(|err| format_err!("unable to open archive {:?} - {}", source, err))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(&tmp)
        .map_err(|err| format_err!("unable to unpack {:?} - {}", source, err))?;

    if target_dir.exists() {
        std::fs::remove_dir_all(target_dir)?;
    }
    std::fs::rename(&tmp, target_dir)
        .map_err(|err| format_err!("unable to rename {:?} to {:?} - {}", tmp, target_dir, err))?;
    Ok(())
}

#[test]
fn test_pack_unpack() -> Result<(), Error> {
    let mut testdir = std::fs::canonicalize(".")?;
    testdir.push(".testdir");
    testdir.push("archive");
    if testdir.exists() {
        std::fs::remove_dir_all(&testdir)?;
    }
    let source = testdir.join("source");
    std::fs::create_dir_all(source.join("sub"))?;
    std::fs::write(source.join("a.txt"), b"alpha")?;
    std::fs::write(source.join("sub/b.txt"), b"beta")?;

    let archive = testdir.join("snap.tar.gz");
    pack_dir(&source, &archive)?;
    assert!(archive.exists());
    assert!(!tmp_path(&archive).exists());

    let target = testdir.join("target");
    std::fs::create_dir_all(&target)?;
    std::fs::write(target.join("stale"), b"x")?;
    unpack_archive(&archive, &target)?;

    assert_eq!(std::fs::read(target.join("a.txt"))?, b"alpha");
    assert_eq!(std::fs::read(target.join("sub/b.txt"))?, b"beta");
    assert!(!target.join("stale").exists());

    std::fs::remove_dir_all(&testdir)?;
    Ok(())
}
