//! Code for extraction of archived entries to sinks and to the filesystem.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Error};
use bitflags::bitflags;

use h5ar_container::{Container, ContainerError};

use crate::archive::layout::read_link;
use crate::archive::metadata;
use crate::archive::reader::Session;
use crate::archive::tools::archive_to_fs_path;
use crate::archive::walker::{ArchiveTreeWalker, WalkItem};
use crate::archive::{
    ArchiveEntry, ArchiveError, ArchivingStrategy, ExtractContext, FileLinkType, IdCache, Link,
    BUFFER_SIZE,
};

bitflags! {
    /// Metadata restored when extracting to the filesystem.
    pub struct RestoreFlags: u32 {
        /// Restore the permission bits
        const WITH_PERMISSIONS = 0x1;
        /// Restore owner and group, only effective when running as root
        const WITH_OWNER       = 0x2;
        /// Restore the modification time
        const WITH_MTIME       = 0x4;

        const DEFAULT =
            RestoreFlags::WITH_PERMISSIONS.bits() |
            RestoreFlags::WITH_OWNER.bits() |
            RestoreFlags::WITH_MTIME.bits();
    }
}

impl Default for RestoreFlags {
    fn default() -> RestoreFlags {
        RestoreFlags::DEFAULT
    }
}

/// Look up `path` and make sure it is a regular file.
pub fn open_regular_file<C>(container: &C, path: &str) -> Result<Link, Error>
where
    C: Container + ?Sized,
{
    let kind = container
        .object_kind(path)
        .map_err(|err| ArchiveError::container(path, err))?
        .ok_or_else(|| ArchiveError::PathNotFound(path.to_string()))?;

    let link =
        read_link(container, path, kind).map_err(|err| ArchiveError::container(path, err))?;
    if !link.is_regular_file() {
        return Err(ArchiveError::TypeMismatch {
            path: path.to_string(),
            expected: FileLinkType::RegularFile.as_str(),
            found: link.link_type().as_str(),
        }
        .into());
    }

    Ok(link)
}

fn copy_contents<C, W>(container: &C, path: &str, sink: &mut W) -> Result<u64, Error>
where
    C: Container + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut offset = 0u64;

    loop {
        let got = container
            .read_block(path, offset, &mut buffer)
            .map_err(|err| ArchiveError::container(path, err))?;
        if got == 0 {
            break;
        }
        sink.write_all(&buffer[..got])?;
        offset += got as u64;
    }

    Ok(offset)
}

/// Stream the contents of the regular file at `path` into `sink`.
///
/// Returns the number of bytes written.
pub fn extract_file<C, W>(container: &C, path: &str, sink: &mut W) -> Result<u64, Error>
where
    C: Container + ?Sized,
    W: Write + ?Sized,
{
    open_regular_file(container, path)?;
    copy_contents(container, path, sink).with_context(|| format!("failed to extract {path:?}"))
}

/// Streaming reader over an archived file.
///
/// Every read locks the session of the [`ArchiveReader`](crate::archive::ArchiveReader) it
/// was created from, other operations on that reader interleave with the reads.
pub struct ArchiveFileReader<'a, C: Container> {
    session: &'a Mutex<Session<C>>,
    path: String,
    offset: u64,
    len: u64,
}

impl<'a, C: Container> ArchiveFileReader<'a, C> {
    pub(crate) fn new(session: &'a Mutex<Session<C>>, path: String, len: u64) -> Self {
        Self {
            session,
            path,
            offset: 0,
            len,
        }
    }

    /// Archive path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Size of the file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a, C: Container> io::Read for ArchiveFileReader<'a, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let got = session
            .container
            .read_block(&self.path, self.offset, buf)
            .map_err(|err| match err {
                ContainerError::Io(err) => err,
                other => io::Error::new(io::ErrorKind::Other, other),
            })?;
        self.offset += got as u64;
        Ok(got)
    }
}

fn remove_existing(fs_path: &Path) -> Result<(), Error> {
    match std::fs::symlink_metadata(fs_path) {
        Ok(meta) if meta.is_dir() => bail!("refusing to replace directory {fs_path:?}"),
        Ok(_) => std::fs::remove_file(fs_path)
            .with_context(|| format!("failed to remove existing file {fs_path:?}")),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Make sure `fs_path` is a directory, replacing whatever non-directory is in the way.
///
/// With `follow_symlinks` a symbolic link to a directory is used as is. This is only wanted
/// for the extraction target itself and its parents, entries below it never follow links.
fn create_directory(fs_path: &Path, follow_symlinks: bool) -> Result<(), Error> {
    let meta = if follow_symlinks {
        std::fs::metadata(fs_path)
    } else {
        std::fs::symlink_metadata(fs_path)
    };
    match meta {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => remove_existing(fs_path)?,
        Err(_) => (),
    }
    std::fs::create_dir_all(fs_path)
        .with_context(|| format!("failed to create directory {fs_path:?}"))
}

/// Restore a non-directory entry. Returns `false` if the entry type cannot be restored.
fn extract_entry<C: Container + ?Sized>(
    container: &C,
    path: &str,
    link: &Link,
    fs_path: &Path,
) -> Result<bool, Error> {
    if let Some(parent) = fs_path.parent() {
        create_directory(parent, true).context(ExtractContext::CreateDirectory)?;
    }

    match link.link_type() {
        FileLinkType::RegularFile => {
            remove_existing(fs_path).context(ExtractContext::ExtractFile)?;
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(fs_path)
                .with_context(|| format!("failed to create file {fs_path:?}"))
                .context(ExtractContext::ExtractFile)?;
            copy_contents(container, path, &mut file).context(ExtractContext::ExtractFile)?;
            Ok(true)
        }
        FileLinkType::SymbolicLink => {
            let target = link
                .link_target()
                .context("symbolic link without target")
                .context(ExtractContext::ExtractSymlink)?;
            remove_existing(fs_path).context(ExtractContext::ExtractSymlink)?;
            std::os::unix::fs::symlink(target, fs_path).context(ExtractContext::ExtractSymlink)?;
            Ok(true)
        }
        FileLinkType::Directory => {
            create_directory(fs_path, false).context(ExtractContext::CreateDirectory)?;
            Ok(true)
        }
        FileLinkType::Other | FileLinkType::Unknown => Ok(false),
    }
}

struct ExtractDir {
    path: String,
    fs_path: PathBuf,
    link: Link,
    created: bool,
}

fn finish_directory(
    dir: &ExtractDir,
    flags: RestoreFlags,
    id_cache: &mut IdCache,
) -> Option<ArchiveEntry> {
    if !dir.created {
        return None;
    }

    let mut entry = ArchiveEntry::at_path(&dir.path, &dir.link, id_cache, false);
    for warning in metadata::apply(flags, &dir.link, &dir.fs_path) {
        entry.add_warning(warning.to_string());
    }
    Some(entry)
}

/// Recreate the archive subtree at `path` below the filesystem directory `root`.
///
/// Missing parent directories are created, existing files are replaced and existing
/// directories are reused. Directory metadata is restored when the walk leaves the directory,
/// so directories are reported to `visitor` after their contents.
#[allow(clippy::too_many_arguments)]
pub fn extract_to_filesystem<C, F>(
    container: &C,
    id_cache: &mut IdCache,
    on_error: &mut (dyn FnMut(Error) -> Result<(), Error> + Send),
    root: &Path,
    path: &str,
    strategy: &ArchivingStrategy,
    flags: RestoreFlags,
    mut visitor: F,
) -> Result<(), Error>
where
    C: Container + ?Sized,
    F: FnMut(&ArchiveEntry) -> ControlFlow<()>,
{
    let mut walker = ArchiveTreeWalker::new(container, path, true);
    let mut dir_stack: Vec<ExtractDir> = Vec::new();

    while let Some(item) = walker.next() {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                on_error(err)?;
                continue;
            }
        };

        match item {
            WalkItem::EnterDirectory { path, link } => {
                let fs_path = archive_to_fs_path(root, &path);

                // the requested directory itself is always extracted
                let is_top = dir_stack.is_empty();
                let created = if !is_top && !strategy.should_include(&path, true) {
                    log::debug!("skipping excluded directory {path:?}");
                    false
                } else {
                    log::debug!("extracting directory {path:?} to {fs_path:?}");
                    match create_directory(&fs_path, is_top)
                        .context(ExtractContext::CreateDirectory)
                    {
                        Ok(()) => true,
                        Err(err) => {
                            on_error(err.context(format!("error at entry {path:?}")))?;
                            false
                        }
                    }
                };

                if !created {
                    walker.skip_directory();
                }
                dir_stack.push(ExtractDir {
                    path,
                    fs_path,
                    link,
                    created,
                });
            }
            WalkItem::LeaveDirectory { .. } => {
                let dir = dir_stack
                    .pop()
                    .context("broken archive walk (directory stack underrun)")
                    .context(ExtractContext::LeaveDirectory)?;

                if let Some(entry) = finish_directory(&dir, flags, id_cache) {
                    if visitor(&entry).is_break() {
                        break;
                    }
                }
            }
            WalkItem::Entry { path, link } => {
                if !strategy.should_include(&path, false) {
                    log::debug!("skipping excluded file {path:?}");
                    continue;
                }

                let fs_path = archive_to_fs_path(root, &path);
                log::debug!("extracting {path:?} to {fs_path:?}");

                let mut entry = ArchiveEntry::at_path(&path, &link, id_cache, false);
                match extract_entry(container, &path, &link, &fs_path) {
                    Ok(true) => {
                        for warning in metadata::apply(flags, &link, &fs_path) {
                            entry.add_warning(warning.to_string());
                        }
                    }
                    Ok(false) => {
                        log::warn!("not restoring {} entry {path:?}", link.link_type());
                        entry.add_warning(format!(
                            "{} entries are not restored",
                            link.link_type()
                        ));
                    }
                    Err(err) => {
                        on_error(err.context(format!("error at entry {path:?}")))?;
                        continue;
                    }
                }

                if visitor(&entry).is_break() {
                    break;
                }
            }
        }
    }

    // stopped early, the directories still open get their metadata anyway
    while let Some(dir) = dir_stack.pop() {
        finish_directory(&dir, flags, id_cache);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5ar_container::{ContainerFile, DataType, StorageFeatures};

    fn container_with_file(path: &str, data: &[u8]) -> ContainerFile {
        let mut container = ContainerFile::new();
        let (parent, _) = crate::archive::tools::parent_and_name(path);
        container.create_group(parent).unwrap();
        let id = container
            .create_or_open_dataset(
                path,
                DataType::U8,
                &[data.len() as u64],
                &[],
                &StorageFeatures::UNCOMPRESSED,
            )
            .unwrap();
        container.write_flat(&id, DataType::U8, data).unwrap();
        container
    }

    #[test]
    fn test_extract_file_to_sink() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let container = container_with_file("/d/big", &data);

        let mut out = Vec::new();
        let written = extract_file(&container, "/d/big", &mut out).unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_extract_file_type_errors() {
        let container = container_with_file("/d/f", b"x");

        let err = extract_file(&container, "/d", &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::TypeMismatch { found: "dir", .. })
        ));

        let err = extract_file(&container, "/d/nope", &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_extract_replaces_existing_file() {
        let container = container_with_file("/d/f", b"new");
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        std::fs::write(dir.path().join("d/f"), b"old contents").unwrap();

        let mut on_error = |err: Error| -> Result<(), Error> { Err(err) };
        let mut seen = Vec::new();
        extract_to_filesystem(
            &container,
            &mut IdCache::new(),
            &mut on_error,
            dir.path(),
            "/d/f",
            &ArchivingStrategy::default(),
            RestoreFlags::DEFAULT,
            |entry| {
                seen.push(entry.path().to_string());
                ControlFlow::Continue(())
            },
        )
        .unwrap();

        assert_eq!(seen, vec!["/d/f"]);
        assert_eq!(std::fs::read(dir.path().join("d/f")).unwrap(), b"new");
    }

    fn extract_all(container: &ContainerFile, root: &Path, path: &str) -> Vec<ArchiveEntry> {
        let mut on_error = |err: Error| -> Result<(), Error> { Err(err) };
        let mut seen = Vec::new();
        extract_to_filesystem(
            container,
            &mut IdCache::new(),
            &mut on_error,
            root,
            path,
            &ArchivingStrategy::default(),
            RestoreFlags::DEFAULT - RestoreFlags::WITH_OWNER,
            |entry| {
                seen.push(entry.clone());
                ControlFlow::Continue(())
            },
        )
        .unwrap();
        seen
    }

    #[test]
    fn test_extract_into_symlinked_target() {
        let container = container_with_file("/d/f", b"data");
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let target = dir.path().join("target");
        std::os::unix::fs::symlink(&real, &target).unwrap();

        extract_all(&container, &target, "/");
        assert!(std::fs::symlink_metadata(&target)
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(std::fs::read(real.join("d/f")).unwrap(), b"data");

        // a single file below a symlinked parent
        std::fs::remove_file(real.join("d/f")).unwrap();
        std::fs::remove_dir(real.join("d")).unwrap();
        let linked_parent = dir.path().join("real_d");
        std::fs::create_dir(&linked_parent).unwrap();
        std::os::unix::fs::symlink(&linked_parent, real.join("d")).unwrap();

        extract_all(&container, &target, "/d/f");
        assert!(std::fs::symlink_metadata(real.join("d"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(std::fs::read(linked_parent.join("f")).unwrap(), b"data");
    }

    #[test]
    fn test_symlink_below_target_is_replaced() {
        let container = container_with_file("/d/f", b"data");
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("d")).unwrap();

        extract_all(&container, &root, "/");
        assert!(std::fs::symlink_metadata(root.join("d")).unwrap().is_dir());
        assert_eq!(std::fs::read(root.join("d/f")).unwrap(), b"data");
        assert!(!outside.join("f").exists());
    }

    #[test]
    fn test_other_entries_are_reported_not_restored() {
        let mut container = container_with_file("/d/f", b"data");
        container
            .create_or_open_dataset(
                "/d/fifo",
                DataType::U8,
                &[0],
                &[],
                &StorageFeatures::UNCOMPRESSED,
            )
            .unwrap();
        crate::archive::layout::write_attributes(
            &mut container,
            "/d/fifo",
            &Link::new(FileLinkType::Other),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let seen = extract_all(&container, dir.path(), "/d");

        let fifo = seen.iter().find(|entry| entry.path() == "/d/fifo").unwrap();
        assert_eq!(fifo.warnings(), ["other entries are not restored"]);
        assert!(!dir.path().join("d/fifo").exists());
        assert_eq!(std::fs::read(dir.path().join("d/f")).unwrap(), b"data");
    }
}
