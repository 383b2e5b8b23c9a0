use anyhow::Error;

use h5ar_container::ContainerError;

/// Error callback deciding whether a failure is fatal.
///
/// Returning the error aborts the running operation, returning `Ok(())` skips the offending
/// entry and continues.
pub type ErrorHandler = Box<dyn FnMut(Error) -> Result<(), Error> + Send>;

/// Typed failures of the archive engine.
///
/// These are carried inside [`anyhow::Error`], callers match on them with `downcast_ref`.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("error accessing archive object {path:?} - {source}")]
    ContainerIo {
        path: String,
        #[source]
        source: ContainerError,
    },
    #[error("path {0:?} does not exist in archive")]
    PathNotFound(String),
    #[error("archive object {path:?} is a {found}, expected a {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("failed to restore {what} of {path:?} - {message}")]
    MetadataRestore {
        path: String,
        what: &'static str,
        message: String,
    },
}

impl ArchiveError {
    /// Wrap a container error, mapping missing objects to [`ArchiveError::PathNotFound`].
    pub(crate) fn container(path: &str, source: ContainerError) -> Self {
        if source.not_found() {
            ArchiveError::PathNotFound(path.to_string())
        } else {
            ArchiveError::ContainerIo {
                path: path.to_string(),
                source,
            }
        }
    }
}

/// Provides additional [context][C] for errors returned while extracting, accessible via
/// `downcast_ref` on the [`anyhow::Error`].
///
/// ```
/// # use anyhow::anyhow;
/// # use h5ar::archive::ExtractContext;
/// let err = anyhow!("disk full").context(ExtractContext::ExtractFile);
/// assert_eq!(
///     err.downcast_ref::<ExtractContext>(),
///     Some(&ExtractContext::ExtractFile),
/// );
/// ```
///
/// [C]: anyhow::Context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExtractContext {
    CreateDirectory,
    LeaveDirectory,
    ExtractSymlink,
    ExtractFile,
}

impl ExtractContext {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        use ExtractContext::*;

        match *self {
            CreateDirectory => "failed to create directory",
            LeaveDirectory => "failed to leave directory",
            ExtractSymlink => "failed to extract symlink",
            ExtractFile => "failed to extract file",
        }
    }
}

impl std::fmt::Display for ExtractContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object_maps_to_path_not_found() {
        let err = ArchiveError::container("/a", ContainerError::NotFound("/a".to_string()));
        assert!(matches!(err, ArchiveError::PathNotFound(ref p) if p == "/a"));

        let err = ArchiveError::container("/a", ContainerError::InvalidPath("a".to_string()));
        assert!(matches!(err, ArchiveError::ContainerIo { .. }));
    }

    #[test]
    fn test_context_downcast() {
        let err = anyhow::anyhow!("boom").context(ExtractContext::ExtractSymlink);
        assert_eq!(err.to_string(), "failed to extract symlink");
        assert!(err.downcast_ref::<ExtractContext>().is_some());
    }
}
