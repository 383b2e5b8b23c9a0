use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use filetime::FileTime;
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};

use crate::archive::{ArchiveError, Link, RestoreFlags};

fn restore_error<E: std::fmt::Display>(path: &Path, what: &'static str, err: E) -> ArchiveError {
    ArchiveError::MetadataRestore {
        path: path.display().to_string(),
        what,
        message: err.to_string(),
    }
}

fn apply_ownership(link: &Link, path: &Path) -> Result<(), ArchiveError> {
    let (uid, gid) = match (u32::try_from(link.uid()), u32::try_from(link.gid())) {
        (Ok(uid), Ok(gid)) => (uid, gid),
        _ => return Ok(()),
    };

    // only root may hand files to other users
    if !nix::unistd::geteuid().is_root() {
        return Ok(());
    }

    fchownat(
        None,
        path,
        Some(Uid::from_raw(uid)),
        Some(Gid::from_raw(gid)),
        FchownatFlags::NoFollowSymlink,
    )
    .map_err(|err| restore_error(path, "ownership", err))
}

fn apply_permissions(link: &Link, path: &Path) -> Result<(), ArchiveError> {
    let mode = match u32::try_from(link.permissions()) {
        Ok(mode) => mode,
        Err(_) => return Ok(()),
    };

    std::fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|err| restore_error(path, "permissions", err))
}

fn apply_mtime(link: &Link, path: &Path) -> Result<(), ArchiveError> {
    if link.last_modified() < 0 {
        return Ok(());
    }

    let meta =
        std::fs::symlink_metadata(path).map_err(|err| restore_error(path, "mtime", err))?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_unix_time(link.last_modified(), 0);

    filetime::set_symlink_file_times(path, atime, mtime)
        .map_err(|err| restore_error(path, "mtime", err))
}

/// Restore ownership, permissions and modification time of an extracted entry.
///
/// Failures never abort the extraction. They are logged and returned so they can be attached
/// to the entry. Ownership is only restored when running as root, permissions are never
/// applied to symbolic links.
pub fn apply(flags: RestoreFlags, link: &Link, path: &Path) -> Vec<ArchiveError> {
    let mut warnings = Vec::new();

    // chown clears the setuid and setgid bits, so the mode has to follow it
    if flags.contains(RestoreFlags::WITH_OWNER) {
        if let Err(err) = apply_ownership(link, path) {
            warnings.push(err);
        }
    }

    if flags.contains(RestoreFlags::WITH_PERMISSIONS) && !link.is_symlink() {
        if let Err(err) = apply_permissions(link, path) {
            warnings.push(err);
        }
    }

    if flags.contains(RestoreFlags::WITH_MTIME) {
        if let Err(err) = apply_mtime(link, path) {
            warnings.push(err);
        }
    }

    for warning in &warnings {
        log::warn!("{warning}");
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileLinkType;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_apply_mode_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let link = Link::new(FileLinkType::RegularFile)
            .with_permissions(0o640)
            .with_last_modified(1_234_567_890);
        let warnings = apply(RestoreFlags::DEFAULT, &link, &file);
        assert!(warnings.is_empty(), "{warnings:?}");

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o640);
        assert_eq!(meta.mtime(), 1_234_567_890);
    }

    #[test]
    fn test_unknown_fields_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, Permissions::from_mode(0o600)).unwrap();

        let link = Link::new(FileLinkType::RegularFile);
        let warnings = apply(RestoreFlags::DEFAULT, &link, &file);
        assert!(warnings.is_empty());
        assert_eq!(std::fs::metadata(&file).unwrap().mode() & 0o7777, 0o600);
    }

    #[test]
    fn test_missing_target_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let link = Link::new(FileLinkType::RegularFile)
            .with_permissions(0o644)
            .with_last_modified(0);
        let warnings = apply(RestoreFlags::DEFAULT, &link, &dir.path().join("missing"));
        assert_eq!(warnings.len(), 2);
        assert!(matches!(
            warnings[0],
            ArchiveError::MetadataRestore {
                what: "permissions",
                ..
            }
        ));
    }
}
