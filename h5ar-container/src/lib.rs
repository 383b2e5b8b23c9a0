//! Hierarchical container storage for h5ar archives.
//!
//! A container is a tree of named objects. Groups hold further objects in the
//! order they were linked in, datasets hold a flat array of typed elements and
//! soft links hold a target path. Every object carries a set of typed
//! attributes.
//!
//! The archive engine only talks to the [`Container`] trait, [`ContainerFile`]
//! is the implementation backed by a single file on disk.

mod error;
pub use error::ContainerError;

mod types;
pub use types::{AttributeValue, DataType, DatasetId, ObjectKind, StorageFeatures};

pub mod format;

mod file;
pub use file::ContainerFile;

/// Object path of the root group.
pub const ROOT: &str = "/";

/// Maximum nesting depth of objects below the root group.
pub const MAX_DEPTH: usize = 512;

/// Operations the archive engine needs from a container.
///
/// Object paths are absolute, `/`-separated and must not contain `.` or `..`
/// components. Implementations are not expected to be usable from several
/// threads at once, callers serialize access to a handle.
pub trait Container {
    /// Get the kind of the object at `path`, `None` if there is no such object.
    fn object_kind(&self, path: &str) -> Result<Option<ObjectKind>, ContainerError>;

    /// List the objects linked into a group, in the order they were created.
    fn list_children(&self, group: &str) -> Result<Vec<(String, ObjectKind)>, ContainerError>;

    /// Create a group. Missing parent groups are created as well, an existing group is kept.
    fn create_group(&mut self, path: &str) -> Result<(), ContainerError>;

    /// Create a soft link pointing to `target`.
    fn create_soft_link(&mut self, path: &str, target: &str) -> Result<(), ContainerError>;

    /// Read the target of a soft link.
    fn soft_link_target(&self, path: &str) -> Result<String, ContainerError>;

    /// Create a dataset, or open it if it exists with the same element type.
    ///
    /// `dims` is the shape of the dataset, `block_dims` the shape of the storage blocks (empty
    /// for contiguous storage).
    fn create_or_open_dataset(
        &mut self,
        path: &str,
        storage_type: DataType,
        dims: &[u64],
        block_dims: &[u64],
        features: &StorageFeatures,
    ) -> Result<DatasetId, ContainerError>;

    /// Replace the complete contents of a dataset with `buffer`.
    fn write_flat(
        &mut self,
        dataset: &DatasetId,
        native_type: DataType,
        buffer: &[u8],
    ) -> Result<(), ContainerError>;

    /// Replace the complete contents of a dataset, handing over the buffer.
    fn write_flat_owned(
        &mut self,
        dataset: &DatasetId,
        native_type: DataType,
        buffer: Vec<u8>,
    ) -> Result<(), ContainerError> {
        self.write_flat(dataset, native_type, &buffer)
    }

    /// Read the complete contents of a dataset.
    fn read_flat(&self, dataset: &DatasetId, native_type: DataType)
        -> Result<Vec<u8>, ContainerError>;

    /// Open an existing dataset.
    fn open_dataset(&self, path: &str) -> Result<DatasetId, ContainerError>;

    /// Length of a dataset's contents in bytes.
    fn dataset_len(&self, path: &str) -> Result<u64, ContainerError>;

    /// Read a block of raw bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is only less than `buf.len()` at the end of the
    /// dataset.
    fn read_block(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, ContainerError>;

    fn get_attribute(&self, path: &str, name: &str)
        -> Result<Option<AttributeValue>, ContainerError>;

    fn set_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), ContainerError>;

    /// Resolve the in-memory type used to exchange elements of `storage_type`.
    fn native_type(&self, storage_type: DataType) -> DataType {
        storage_type
    }
}

/// Split an absolute object path into its components.
///
/// The root group yields an empty list.
pub fn split_path(path: &str) -> Result<Vec<&str>, ContainerError> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| ContainerError::InvalidPath(path.to_string()))?;

    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let mut components = Vec::new();
    for comp in rest.split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            return Err(ContainerError::InvalidPath(path.to_string()));
        }
        components.push(comp);
    }
    if components.len() > MAX_DEPTH {
        return Err(ContainerError::InvalidPath(path.to_string()));
    }
    Ok(components)
}

/// Join a group path and an object name.
pub fn join_path(group: &str, name: &str) -> String {
    if group.ends_with('/') {
        format!("{group}{name}")
    } else {
        format!("{group}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert!(split_path("/").unwrap().is_empty());
        assert_eq!(split_path("/a/b").unwrap(), vec!["a", "b"]);
        assert!(split_path("a/b").is_err());
        assert!(split_path("/a//b").is_err());
        assert!(split_path("/a/../b").is_err());
        assert!(split_path("/a/b/").is_err());

        let deepest = "/a".repeat(MAX_DEPTH);
        assert_eq!(split_path(&deepest).unwrap().len(), MAX_DEPTH);
        assert!(split_path(&format!("{deepest}/a")).is_err());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a", "b"), "/a/b");
    }
}
