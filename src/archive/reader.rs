use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Error;

use h5ar_container::Container;

use crate::archive::extract::{self, open_regular_file};
use crate::archive::layout::read_link;
use crate::archive::verify::{self, check_archived_file};
use crate::archive::walker::{ArchiveTreeWalker, WalkItem};
use crate::archive::{
    normalize_path, ArchiveEntry, ArchiveError, ArchiveFileReader, ArchivingStrategy,
    ErrorHandler, IdCache, RestoreFlags,
};

/// Options for listing an archive.
#[derive(Clone, Debug)]
pub struct ListParameters {
    /// Descend into sub-directories.
    pub recursive: bool,
    /// Also report the listed directory itself.
    pub include_top_level_directory: bool,
    /// Only report entries which are not directories.
    pub suppress_directory_entries: bool,
    /// Recompute the checksum of every regular file and attach mismatches to the entry.
    pub test_checksums: bool,
    /// Report numeric owner and group ids instead of names.
    pub numeric: bool,
}

impl Default for ListParameters {
    fn default() -> Self {
        Self {
            recursive: true,
            include_top_level_directory: false,
            suppress_directory_entries: false,
            test_checksums: false,
            numeric: false,
        }
    }
}

/// Options for verifying an archive against the filesystem.
#[derive(Clone, Debug)]
pub struct VerifyParameters {
    pub recursive: bool,
    /// Report filesystem entries without counterpart in the archive.
    pub check_missing_files: bool,
    /// Compare permission bits as well.
    pub verify_attributes: bool,
    pub numeric: bool,
}

impl Default for VerifyParameters {
    fn default() -> Self {
        Self {
            recursive: true,
            check_missing_files: false,
            verify_attributes: false,
            numeric: false,
        }
    }
}

pub(crate) struct Session<C> {
    pub(crate) container: C,
    pub(crate) id_cache: IdCache,
    pub(crate) on_error: ErrorHandler,
}

/// Read access to an archive stored in a container.
///
/// All operations lock the reader's session, so calls on one reader are serialized. Visitors
/// run while the session is locked and must not call back into the same reader.
///
/// Failures are passed to the session's error handler. The default handler returns the error
/// and the operation fails. A handler returning `Ok(())` skips the failing entry, operations
/// returning data then yield `None` or fewer entries.
pub struct ArchiveReader<C: Container> {
    session: Mutex<Session<C>>,
}

impl<C: Container> ArchiveReader<C> {
    pub fn new(container: C) -> Self {
        Self {
            session: Mutex::new(Session {
                container,
                id_cache: IdCache::new(),
                on_error: Box::new(Err),
            }),
        }
    }

    /// Replace the error handler of this reader's session.
    pub fn on_error(&mut self, on_error: ErrorHandler) {
        self.session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .on_error = on_error;
    }

    fn lock(&self) -> MutexGuard<'_, Session<C>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the reader and hand back its container.
    pub fn close(self) -> C {
        self.session
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .container
    }

    /// Whether `path` exists in the archive.
    pub fn exists(&self, path: &str) -> Result<bool, Error> {
        let path = normalize_path(path)?;
        let session = self.lock();
        let kind = session
            .container
            .object_kind(&path)
            .map_err(|err| ArchiveError::container(&path, err))?;
        Ok(kind.is_some())
    }

    /// Get the entry stored at `path`, `None` if there is none.
    pub fn try_get_entry(
        &self,
        path: &str,
        numeric: bool,
    ) -> Result<Option<ArchiveEntry>, Error> {
        let path = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        let result = session
            .container
            .object_kind(&path)
            .and_then(|kind| match kind {
                Some(kind) => read_link(&session.container, &path, kind).map(Some),
                None => Ok(None),
            })
            .map_err(|err| ArchiveError::container(&path, err));

        match result {
            Ok(link) => Ok(link.map(|link| {
                ArchiveEntry::at_path(&path, &link, &mut session.id_cache, numeric)
            })),
            Err(err) => {
                (session.on_error)(err.into())?;
                Ok(None)
            }
        }
    }

    /// List the entries below `path` in pre-order.
    pub fn list(&self, path: &str, params: &ListParameters) -> Result<Vec<ArchiveEntry>, Error> {
        let mut entries = Vec::new();
        self.list_with(path, params, |entry| {
            entries.push(entry.clone());
            ControlFlow::Continue(())
        })?;
        Ok(entries)
    }

    /// Pass the entries below `path` to `visitor` in pre-order, until it returns
    /// [`ControlFlow::Break`].
    pub fn list_with<F>(
        &self,
        path: &str,
        params: &ListParameters,
        mut visitor: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&ArchiveEntry) -> ControlFlow<()>,
    {
        let top = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        let mut walker = ArchiveTreeWalker::new(&session.container, &top, params.recursive);
        while let Some(item) = walker.next() {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    (session.on_error)(err)?;
                    continue;
                }
            };

            let (path, link) = match item {
                WalkItem::LeaveDirectory { .. } => continue,
                WalkItem::EnterDirectory { path, link } => {
                    if params.suppress_directory_entries
                        || (path == top && !params.include_top_level_directory)
                    {
                        continue;
                    }
                    (path, link)
                }
                WalkItem::Entry { path, link } => (path, link),
            };

            let mut entry =
                ArchiveEntry::at_path(&path, &link, &mut session.id_cache, params.numeric);
            if params.test_checksums {
                match check_archived_file(&session.container, &path, &link) {
                    Ok(Some(discrepancy)) => entry.set_discrepancy(discrepancy),
                    Ok(None) => (),
                    Err(err) => {
                        (session.on_error)(err)?;
                        continue;
                    }
                }
            }

            if visitor(&entry).is_break() {
                break;
            }
        }

        Ok(())
    }

    /// Check the integrity of the complete archive.
    ///
    /// Every regular file is read back and compared with its stored size and checksum. Returns
    /// the entries that failed.
    pub fn test(&self) -> Result<Vec<ArchiveEntry>, Error> {
        let params = ListParameters {
            test_checksums: true,
            ..Default::default()
        };

        let mut failed = Vec::new();
        self.list_with("/", &params, |entry| {
            if !entry.is_ok() {
                failed.push(entry.clone());
            }
            ControlFlow::Continue(())
        })?;
        Ok(failed)
    }

    /// Compare the archive subtree at `path` with the filesystem below `root`.
    ///
    /// Returns the entries with a discrepancy.
    pub fn verify_against_filesystem(
        &self,
        path: &str,
        root: &Path,
        params: &VerifyParameters,
    ) -> Result<Vec<ArchiveEntry>, Error> {
        let mut failed = Vec::new();
        self.verify_against_filesystem_with(path, root, params, |entry| {
            if !entry.is_ok() {
                failed.push(entry.clone());
            }
            ControlFlow::Continue(())
        })?;
        Ok(failed)
    }

    /// Compare the archive subtree at `path` with the filesystem below `root`, passing every
    /// checked entry to `visitor`.
    pub fn verify_against_filesystem_with<F>(
        &self,
        path: &str,
        root: &Path,
        params: &VerifyParameters,
        visitor: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&ArchiveEntry) -> ControlFlow<()>,
    {
        let path = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        verify::verify(
            &session.container,
            &mut session.id_cache,
            &mut *session.on_error,
            &path,
            root,
            params,
            visitor,
        )
    }

    /// Write the contents of the regular file at `path` to `sink`.
    ///
    /// Returns the number of bytes written.
    pub fn extract_file<W: Write + ?Sized>(
        &self,
        path: &str,
        sink: &mut W,
    ) -> Result<Option<u64>, Error> {
        let path = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        match extract::extract_file(&session.container, &path, sink) {
            Ok(written) => Ok(Some(written)),
            Err(err) => {
                (session.on_error)(err)?;
                Ok(None)
            }
        }
    }

    /// Read the complete contents of the regular file at `path`.
    pub fn extract_file_as_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut data = Vec::new();
        Ok(self.extract_file(path, &mut data)?.map(|_| data))
    }

    /// Open the regular file at `path` for streaming reads.
    pub fn extract_file_as_reader(
        &self,
        path: &str,
    ) -> Result<Option<ArchiveFileReader<'_, C>>, Error> {
        let path = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        match open_regular_file(&session.container, &path) {
            Ok(link) => {
                let len = u64::try_from(link.size()).unwrap_or(0);
                Ok(Some(ArchiveFileReader::new(&self.session, path, len)))
            }
            Err(err) => {
                (session.on_error)(err)?;
                Ok(None)
            }
        }
    }

    /// Recreate the archive subtree at `path` below the filesystem directory `root`.
    ///
    /// Entries rejected by `strategy` are skipped. Every restored entry is passed to
    /// `visitor`, carrying the metadata restore warnings for it.
    pub fn extract_to_filesystem<F>(
        &self,
        root: &Path,
        path: &str,
        strategy: &ArchivingStrategy,
        flags: RestoreFlags,
        visitor: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&ArchiveEntry) -> ControlFlow<()>,
    {
        let path = normalize_path(path)?;
        let mut guard = self.lock();
        let session = &mut *guard;

        extract::extract_to_filesystem(
            &session.container,
            &mut session.id_cache,
            &mut *session.on_error,
            root,
            &path,
            strategy,
            flags,
            visitor,
        )
    }
}
