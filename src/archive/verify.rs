//! Comparison of archived entries with the filesystem and with their stored checksums.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, Error};
use nix::errno::Errno;

use h5ar_container::Container;

use crate::archive::layout::DatasetReader;
use crate::archive::list_entry::{hash_to_string, mode_string};
use crate::archive::tools::{archive_to_fs_path, crc32_of, join_archive_path};
use crate::archive::walker::{ArchiveTreeWalker, WalkItem};
use crate::archive::{
    ArchiveEntry, Discrepancy, DiscrepancyKind, FileLinkType, IdCache, Link, VerifyParameters,
};

/// Check a regular file's contents against its stored size and checksum.
pub fn check_archived_file<C: Container + ?Sized>(
    container: &C,
    path: &str,
    link: &Link,
) -> Result<Option<Discrepancy>, Error> {
    if !link.is_regular_file() {
        return Ok(None);
    }

    let (crc32, len) = crc32_of(DatasetReader::new(container, path))
        .with_context(|| format!("failed to read archived file {path:?}"))?;

    if link.size() >= 0 && link.size() as u64 != len {
        return Ok(Some(Discrepancy::new(
            path,
            DiscrepancyKind::SizeMismatch,
            link.size().to_string(),
            len.to_string(),
        )));
    }

    match link.crc32() {
        Some(stored) if stored != crc32 => Ok(Some(Discrepancy::new(
            path,
            DiscrepancyKind::ChecksumMismatch,
            hash_to_string(stored),
            hash_to_string(crc32),
        ))),
        _ => Ok(None),
    }
}

fn is_missing(err: &io::Error) -> bool {
    // a parent replaced by a non-directory hides the entry as well
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(Errno::ENOTDIR as i32)
}

fn fs_link(fs_path: &Path) -> Result<Option<Link>, Error> {
    match std::fs::symlink_metadata(fs_path) {
        Ok(_) => Ok(Some(Link::from_filesystem(fs_path)?)),
        Err(err) if is_missing(&err) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Compare one archived entry with the filesystem entry at `fs_path`.
///
/// The first applying category is reported.
pub fn check_entry(
    path: &str,
    link: &Link,
    fs_path: &Path,
    params: &VerifyParameters,
) -> Result<Option<Discrepancy>, Error> {
    let actual = match fs_link(fs_path)? {
        Some(actual) => actual,
        None => {
            return Ok(Some(Discrepancy::new(
                path,
                DiscrepancyKind::MissingOnDisk,
                link.link_type().as_str(),
                "missing",
            )))
        }
    };

    if link.link_type() != FileLinkType::Unknown && link.link_type() != actual.link_type() {
        return Ok(Some(Discrepancy::new(
            path,
            DiscrepancyKind::TypeMismatch,
            link.link_type().as_str(),
            actual.link_type().as_str(),
        )));
    }

    if link.is_regular_file() && link.size() >= 0 && link.size() != actual.size() {
        return Ok(Some(Discrepancy::new(
            path,
            DiscrepancyKind::SizeMismatch,
            link.size().to_string(),
            actual.size().to_string(),
        )));
    }

    if let (Some(archived), Some(target)) = (link.link_target(), actual.link_target()) {
        if archived != target {
            return Ok(Some(Discrepancy::new(
                path,
                DiscrepancyKind::LinkTargetMismatch,
                archived,
                target,
            )));
        }
    }

    if params.verify_attributes
        && !link.is_symlink()
        && link.permissions() >= 0
        && link.permissions() != actual.permissions()
    {
        return Ok(Some(Discrepancy::new(
            path,
            DiscrepancyKind::PermissionMismatch,
            mode_string(link),
            mode_string(&actual),
        )));
    }

    if let (true, Some(stored)) = (link.is_regular_file(), link.crc32()) {
        let file = File::open(fs_path)
            .with_context(|| format!("failed to open {fs_path:?} for checksum verification"))?;
        let (crc32, _) = crc32_of(file)?;
        if crc32 != stored {
            return Ok(Some(Discrepancy::new(
                path,
                DiscrepancyKind::ChecksumMismatch,
                hash_to_string(stored),
                hash_to_string(crc32),
            )));
        }
    }

    Ok(None)
}

/// Names of filesystem entries in `fs_dir` that have no counterpart in the archive directory.
fn missing_in_archive<C: Container + ?Sized>(
    container: &C,
    path: &str,
    fs_dir: &Path,
) -> Result<Vec<String>, Error> {
    let archived: HashSet<String> = container
        .list_children(path)
        .with_context(|| format!("failed to list archive directory {path:?}"))?
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    let mut missing = Vec::new();
    for entry in std::fs::read_dir(fs_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !archived.contains(&name) {
            missing.push(name);
        }
    }
    missing.sort_unstable();

    Ok(missing)
}

/// Walk the archive subtree at `path` in lock-step with the filesystem below `root`.
///
/// Every visited entry is passed to `visitor`, with its discrepancy attached if one was
/// found. Read failures go through `on_error`, the failing entry is skipped.
pub fn verify<C, F>(
    container: &C,
    id_cache: &mut IdCache,
    on_error: &mut (dyn FnMut(Error) -> Result<(), Error> + Send),
    path: &str,
    root: &Path,
    params: &VerifyParameters,
    mut visitor: F,
) -> Result<(), Error>
where
    C: Container + ?Sized,
    F: FnMut(&ArchiveEntry) -> ControlFlow<()>,
{
    let mut walker = ArchiveTreeWalker::new(container, path, params.recursive);
    let mut depth = 0usize;

    while let Some(item) = walker.next() {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                on_error(err)?;
                continue;
            }
        };

        let (path, link, is_dir) = match item {
            WalkItem::LeaveDirectory { .. } => {
                depth = depth.saturating_sub(1);
                continue;
            }
            WalkItem::EnterDirectory { path, link } => {
                depth += 1;
                (path, link, true)
            }
            WalkItem::Entry { path, link } => (path, link, false),
        };

        let fs_path = archive_to_fs_path(root, &path);
        log::debug!("verifying {path:?} against {fs_path:?}");

        let mut entry = ArchiveEntry::at_path(&path, &link, id_cache, params.numeric);
        match check_entry(&path, &link, &fs_path, params) {
            Ok(Some(discrepancy)) => {
                if is_dir
                    && matches!(
                        discrepancy.kind,
                        DiscrepancyKind::MissingOnDisk | DiscrepancyKind::TypeMismatch
                    )
                {
                    walker.skip_directory();
                }
                entry.set_discrepancy(discrepancy);
            }
            Ok(None) => (),
            Err(err) => {
                if is_dir {
                    walker.skip_directory();
                }
                on_error(err.context(format!("failed to verify {path:?}")))?;
                continue;
            }
        }

        let fs_dir_present = entry.is_ok();
        if visitor(&entry).is_break() {
            return Ok(());
        }

        // only directories whose contents are walked are checked for extra files
        let contents_walked = params.recursive || depth == 1;
        if !(is_dir && params.check_missing_files && fs_dir_present && contents_walked) {
            continue;
        }

        let missing = match missing_in_archive(container, &path, &fs_path) {
            Ok(missing) => missing,
            Err(err) => {
                on_error(err.context(format!("failed to compare directory {path:?}")))?;
                continue;
            }
        };

        for name in missing {
            let child_path = join_archive_path(&path, &name);
            let actual = match Link::from_filesystem(&fs_path.join(&name)) {
                Ok(actual) => actual,
                Err(err) => {
                    on_error(err.context(format!("failed to stat {child_path:?} on disk")))?;
                    continue;
                }
            };
            let mut entry =
                ArchiveEntry::at_path(&child_path, &actual, id_cache, params.numeric);
            entry.set_discrepancy(Discrepancy::new(
                &child_path,
                DiscrepancyKind::MissingInArchive,
                "missing",
                actual.link_type().as_str(),
            ));
            if visitor(&entry).is_break() {
                return Ok(());
            }
        }
    }

    Ok(())
}
