//! File permission and ownership handling for install trees.

use crate::error::{NatpierceError, Result};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Make a file executable (mode 0o755).
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)
            .map_err(|e| NatpierceError::io_with_path(e, path))?
            .permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| NatpierceError::io_with_path(e, path))?;
        debug!("Set executable permissions on: {}", path.display());
    }

    #[cfg(not(unix))]
    debug!("Skipping executable bit for: {}", path.display());

    Ok(())
}

/// OR `bits` into the mode of `root` and everything below it (`chmod -R +w`).
pub fn add_mode_recursive(root: &Path, bits: u32) -> Result<()> {
    for_each_entry(root, |path, current| set_mode(path, current | bits))
}

/// Give `root` and everything below it to the system user `owner`.
///
/// The supervisor usually runs as root while the install belongs to the
/// desktop user; files it writes must be handed back.
pub fn chown_recursive(root: &Path, owner: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::unistd::User;

        let user = User::from_name(owner)
            .map_err(|e| NatpierceError::Other(format!("Failed to look up user {}: {}", owner, e)))?
            .ok_or_else(|| NatpierceError::Config {
                message: format!("Unknown user: {}", owner),
            })?;

        let mut count = 0usize;
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(walk_error)?;
            // never follow the config symlink out of the tree
            std::os::unix::fs::lchown(
                entry.path(),
                Some(user.uid.as_raw()),
                Some(user.gid.as_raw()),
            )
            .map_err(|e| NatpierceError::io_with_path(e, entry.path()))?;
            count += 1;
        }
        debug!("Changed owner of {} entries under {} to {}", count, root.display(), owner);
    }

    #[cfg(not(unix))]
    warn!("Ownership change not supported, skipping {} for {}", root.display(), owner);

    Ok(())
}

fn for_each_entry(root: &Path, mut apply: impl FnMut(&Path, u32) -> Result<()>) -> Result<()> {
    if !root.exists() {
        warn!("Permission target does not exist: {}", root.display());
        return Ok(());
    }

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(walk_error)?;
        if entry.path_is_symlink() {
            continue;
        }
        let current = entry_mode(&entry)?;
        apply(entry.path(), current)?;
    }
    Ok(())
}

#[cfg(unix)]
fn entry_mode(entry: &walkdir::DirEntry) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = entry.metadata().map_err(walk_error)?;
    Ok(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn entry_mode(_entry: &walkdir::DirEntry) -> Result<u32> {
    Ok(0)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| NatpierceError::io_with_path(e, path))?;
    }

    #[cfg(not(unix))]
    let _ = (path, mode);

    Ok(())
}

fn walk_error(err: walkdir::Error) -> NatpierceError {
    let path = err.path().map(Path::to_path_buf);
    let message = err.to_string();
    NatpierceError::Io {
        message,
        path,
        source: err.into_io_error(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_set_executable() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("natpierce");
        std::fs::write(&file, b"#!/bin/sh\n").unwrap();

        set_executable(&file).unwrap();
        assert_eq!(mode_of(&file), 0o755);
    }

    #[test]
    fn test_add_mode_recursive_keeps_existing_bits() {
        let temp_dir = TempDir::new().unwrap();
        let sub = temp_dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let file = sub.join("main.py");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o444)).unwrap();

        add_mode_recursive(temp_dir.path(), 0o200).unwrap();
        assert_eq!(mode_of(&file), 0o644);
    }

    #[test]
    fn test_add_exec_bits_over_bin_tree() {
        let temp_dir = TempDir::new().unwrap();
        let bin = temp_dir.path().join("bin");
        std::fs::create_dir_all(bin.join("data")).unwrap();
        std::fs::write(bin.join("natpierce"), b"x").unwrap();
        std::fs::set_permissions(bin.join("natpierce"), std::fs::Permissions::from_mode(0o600))
            .unwrap();

        add_mode_recursive(&bin, 0o755).unwrap();
        assert_eq!(mode_of(&bin.join("natpierce")), 0o755);
        assert_eq!(mode_of(&bin.join("data")), 0o755);
    }

    #[test]
    fn test_missing_root_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        add_mode_recursive(&temp_dir.path().join("missing"), 0o755).unwrap();
    }

    #[test]
    fn test_chown_to_unknown_user_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = chown_recursive(temp_dir.path(), "no-such-user-natpierce").unwrap_err();
        assert!(matches!(err, NatpierceError::Config { .. }));
    }
}
