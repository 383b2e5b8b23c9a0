//! Mapping between [`Link`] metadata and container objects with sidecar attributes.

use std::io;

use h5ar_container::{AttributeValue, Container, ContainerError, ObjectKind};

use crate::archive::link::UNKNOWN;
use crate::archive::tools::parent_and_name;
use crate::archive::{FileLinkType, Link};

pub const ATTR_TYPE: &str = "h5ar:type";
pub const ATTR_SIZE: &str = "h5ar:size";
pub const ATTR_MTIME: &str = "h5ar:mtime";
pub const ATTR_UID: &str = "h5ar:uid";
pub const ATTR_GID: &str = "h5ar:gid";
pub const ATTR_MODE: &str = "h5ar:mode";
pub const ATTR_CRC32: &str = "h5ar:crc32";

fn int_attribute<C: Container + ?Sized>(
    container: &C,
    path: &str,
    name: &str,
) -> Result<Option<i64>, ContainerError> {
    Ok(container
        .get_attribute(path, name)?
        .and_then(|value| value.as_int()))
}

/// Read the metadata of the object stored at `path`.
///
/// The object kind decides between directory, symbolic link and dataset backed entries,
/// missing attributes are left unknown.
pub fn read_link<C: Container + ?Sized>(
    container: &C,
    path: &str,
    kind: ObjectKind,
) -> Result<Link, ContainerError> {
    let link_type = match kind {
        ObjectKind::Group => FileLinkType::Directory,
        ObjectKind::SoftLink => FileLinkType::SymbolicLink,
        ObjectKind::Dataset => match container.get_attribute(path, ATTR_TYPE)? {
            Some(AttributeValue::Str(ty)) if ty == FileLinkType::Other.as_str() => {
                FileLinkType::Other
            }
            _ => FileLinkType::RegularFile,
        },
    };

    let mut link = Link::new(link_type);

    let (_, name) = parent_and_name(path);
    if !name.is_empty() {
        link = link.with_name(name);
    }

    if link_type == FileLinkType::RegularFile {
        let size = match int_attribute(container, path, ATTR_SIZE)? {
            Some(size) => size,
            None => container.dataset_len(path)? as i64,
        };
        link = link.with_size(size);
    }

    if let Some(crc32) = int_attribute(container, path, ATTR_CRC32)? {
        if let Ok(crc32) = u32::try_from(crc32) {
            link = link.with_crc32(crc32);
        }
    }

    if kind == ObjectKind::SoftLink {
        link = link.with_link_target(container.soft_link_target(path)?);
    }

    Ok(link
        .with_last_modified(int_attribute(container, path, ATTR_MTIME)?.unwrap_or(UNKNOWN))
        .with_uid(int_attribute(container, path, ATTR_UID)?.unwrap_or(UNKNOWN))
        .with_gid(int_attribute(container, path, ATTR_GID)?.unwrap_or(UNKNOWN))
        .with_permissions(int_attribute(container, path, ATTR_MODE)?.unwrap_or(UNKNOWN)))
}

/// Store the known fields of `link` as attributes of the object at `path`.
pub fn write_attributes<C: Container + ?Sized>(
    container: &mut C,
    path: &str,
    link: &Link,
) -> Result<(), ContainerError> {
    container.set_attribute(path, ATTR_TYPE, link.link_type().as_str().into())?;

    if link.is_regular_file() && link.size() >= 0 {
        container.set_attribute(path, ATTR_SIZE, link.size().into())?;
    }

    let numeric = [
        (ATTR_MTIME, link.last_modified()),
        (ATTR_UID, link.uid()),
        (ATTR_GID, link.gid()),
        (ATTR_MODE, link.permissions()),
    ];
    for (name, value) in numeric {
        if value != UNKNOWN {
            container.set_attribute(path, name, value.into())?;
        }
    }

    if let Some(crc32) = link.crc32() {
        container.set_attribute(path, ATTR_CRC32, i64::from(crc32).into())?;
    }

    Ok(())
}

/// Sequential reader over the contents of a dataset.
pub struct DatasetReader<'a, C: Container + ?Sized> {
    container: &'a C,
    path: &'a str,
    offset: u64,
}

impl<'a, C: Container + ?Sized> DatasetReader<'a, C> {
    pub fn new(container: &'a C, path: &'a str) -> Self {
        Self {
            container,
            path,
            offset: 0,
        }
    }
}

impl<'a, C: Container + ?Sized> io::Read for DatasetReader<'a, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let got = self
            .container
            .read_block(self.path, self.offset, buf)
            .map_err(|err| match err {
                ContainerError::Io(err) => err,
                other => io::Error::new(io::ErrorKind::Other, other),
            })?;
        self.offset += got as u64;
        Ok(got)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5ar_container::{ContainerFile, DataType, StorageFeatures};
    use std::io::Read;

    #[test]
    fn test_attributes_round_trip() {
        let mut container = ContainerFile::new();
        container.create_group("/d").unwrap();
        let dataset = container
            .create_or_open_dataset("/d/f", DataType::U8, &[3], &[], &StorageFeatures::UNCOMPRESSED)
            .unwrap();
        container.write_flat(&dataset, DataType::U8, b"abc").unwrap();

        let link = Link::new(FileLinkType::RegularFile)
            .with_size(3)
            .with_uid(1000)
            .with_gid(1000)
            .with_permissions(0o640)
            .with_last_modified(1_600_000_000)
            .with_crc32(0xffff_ffff);
        write_attributes(&mut container, "/d/f", &link).unwrap();

        let read = read_link(&container, "/d/f", ObjectKind::Dataset).unwrap();
        assert_eq!(read, link.with_name("f"));
    }

    #[test]
    fn test_missing_attributes_are_unknown() {
        let mut container = ContainerFile::new();
        container.create_group("/d").unwrap();
        container.create_soft_link("/d/ln", "../target").unwrap();
        let dataset = container
            .create_or_open_dataset("/d/f", DataType::U8, &[2], &[], &StorageFeatures::UNCOMPRESSED)
            .unwrap();
        container.write_flat(&dataset, DataType::U8, b"xy").unwrap();

        let dir = read_link(&container, "/d", ObjectKind::Group).unwrap();
        assert!(dir.is_directory());
        assert_eq!(dir.permissions(), UNKNOWN);
        assert!(!dir.has_unix_ownership());

        let ln = read_link(&container, "/d/ln", ObjectKind::SoftLink).unwrap();
        assert!(ln.is_symlink());
        assert_eq!(ln.link_target(), Some("../target"));

        let file = read_link(&container, "/d/f", ObjectKind::Dataset).unwrap();
        assert!(file.is_regular_file());
        assert_eq!(file.size(), 2);
        assert_eq!(file.last_modified(), UNKNOWN);
        assert_eq!(file.crc32(), None);
    }

    #[test]
    fn test_dataset_reader() {
        let mut container = ContainerFile::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let dataset = container
            .create_or_open_dataset(
                "/blob",
                DataType::U8,
                &[data.len() as u64],
                &[],
                &StorageFeatures::UNCOMPRESSED,
            )
            .unwrap();
        container.write_flat(&dataset, DataType::U8, &data).unwrap();

        let mut out = Vec::new();
        DatasetReader::new(&container, "/blob")
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, data);
    }
}
