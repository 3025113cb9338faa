//! Blocking filesystem steps of an install.

use crate::error::{NatpierceError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Copy `src` into `dst`, recreating symlinks rather than following them.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| NatpierceError::io_with_path(e, dst))?;

    for entry in fs::read_dir(src).map_err(|e| NatpierceError::io_with_path(e, src))? {
        let entry = entry.map_err(|e| NatpierceError::io_with_path(e, src))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| NatpierceError::io_with_path(e, &src_path))?;

        if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).map_err(|e| NatpierceError::io_with_path(e, &src_path))?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src).map_err(|e| NatpierceError::io_with_path(e, src))?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).map_err(|e| NatpierceError::io_with_path(e, dst))?;
    }
    std::os::unix::fs::symlink(&target, dst).map_err(|e| NatpierceError::io_with_path(e, dst))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    warn!("Skipping symlink {}", src.display());
    Ok(())
}

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Nothing to remove at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(NatpierceError::io_with_path(e, path)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NatpierceError::io_with_path(e, path)),
    }
}

/// Best-effort cleanup: failures are logged and swallowed.
pub fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!("Failed to clean up {}: {}", path.display(), e);
    }
}

/// Unpack a zip archive into `dest`.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| NatpierceError::io_with_path(e, archive_path))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    fs::create_dir_all(dest).map_err(|e| NatpierceError::io_with_path(e, dest))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let outpath = match entry.enclosed_name() {
            Some(path) => dest.join(path),
            None => {
                warn!("Skipping unsafe zip entry {}", entry.name());
                continue;
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| NatpierceError::io_with_path(e, &outpath))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| NatpierceError::io_with_path(e, parent))?;
        }
        let mut outfile =
            File::create(&outpath).map_err(|e| NatpierceError::io_with_path(e, &outpath))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|e| NatpierceError::io_with_path(e, &outpath))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

/// Decompress a single-stream gzip file to `dest`.
pub fn gunzip_file(archive_path: &Path, dest: &Path) -> Result<u64> {
    let file = File::open(archive_path).map_err(|e| NatpierceError::io_with_path(e, archive_path))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut out = File::create(dest).map_err(|e| NatpierceError::io_with_path(e, dest))?;

    std::io::copy(&mut decoder, &mut out).map_err(|e| {
        if e.kind() == ErrorKind::InvalidInput || e.kind() == ErrorKind::InvalidData {
            NatpierceError::InstallationFailed {
                message: format!("Invalid gzip artifact {}: {}", archive_path.display(), e),
            }
        } else {
            NatpierceError::io_with_path(e, dest)
        }
    })
}

/// Directory holding the package files inside an unpacked archive.
///
/// Prefers `<scratch>/<root_name>`, then a single top-level directory, then
/// the scratch directory itself.
pub fn archive_content_root(scratch: &Path, root_name: &str) -> Result<PathBuf> {
    let preferred = scratch.join(root_name);
    if preferred.is_dir() {
        return Ok(preferred);
    }

    let entries: Vec<_> = fs::read_dir(scratch)
        .map_err(|e| NatpierceError::io_with_path(e, scratch))?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].path().is_dir() {
        Ok(entries[0].path())
    } else {
        Ok(scratch.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_and_find_root() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("pkg.zip");
        write_zip(
            &archive,
            &[
                ("DeckyNatpierce/main.py", b"print()"),
                ("DeckyNatpierce/dist/index.js", b"js"),
            ],
        );

        let scratch = temp_dir.path().join("scratch");
        extract_zip(&archive, &scratch).unwrap();

        let root = archive_content_root(&scratch, "DeckyNatpierce").unwrap();
        assert_eq!(root, scratch.join("DeckyNatpierce"));
        assert_eq!(fs::read(root.join("dist/index.js")).unwrap(), b"js");
    }

    #[test]
    fn test_archive_root_falls_back_to_single_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("other")).unwrap();
        assert_eq!(
            archive_content_root(temp_dir.path(), "DeckyNatpierce").unwrap(),
            temp_dir.path().join("other")
        );

        fs::write(temp_dir.path().join("loose.txt"), b"x").unwrap();
        assert_eq!(
            archive_content_root(temp_dir.path(), "DeckyNatpierce").unwrap(),
            temp_dir.path()
        );
    }

    #[test]
    fn test_invalid_zip_is_installation_failure() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.zip");
        fs::write(&archive, b"<html>not found</html>").unwrap();

        let err = extract_zip(&archive, &temp_dir.path().join("out")).unwrap_err();
        assert!(matches!(err, NatpierceError::InstallationFailed { .. }));
    }

    #[test]
    fn test_gunzip_file() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("core.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(File::create(&archive).unwrap(), flate2::Compression::default());
        encoder.write_all(b"\x7fELF binary").unwrap();
        encoder.finish().unwrap();

        let dest = temp_dir.path().join("natpierce");
        assert_eq!(gunzip_file(&archive, &dest).unwrap(), 11);
        assert_eq!(fs::read(&dest).unwrap(), b"\x7fELF binary");
    }

    #[test]
    fn test_remove_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("tree");
        fs::create_dir_all(dir.join("a/b")).unwrap();
        fs::write(dir.join("a/b/c"), b"x").unwrap();

        remove_if_exists(&dir).unwrap();
        assert!(!dir.exists());
        remove_if_exists(&dir).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("bin");
        fs::create_dir_all(src.join("data")).unwrap();
        fs::write(src.join("natpierce"), b"binary").unwrap();
        // dangling on purpose: the durable config may not exist yet
        std::os::unix::fs::symlink("/nonexistent/natpierce_config", src.join("data/config"))
            .unwrap();

        let dst = temp_dir.path().join("backup");
        copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("natpierce")).unwrap(), b"binary");
        assert_eq!(
            fs::read_link(dst.join("data/config")).unwrap(),
            Path::new("/nonexistent/natpierce_config")
        );
    }
}
