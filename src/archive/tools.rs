//! Some common methods used within the archive code.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Error};

use crate::archive::BUFFER_SIZE;

/// Normalize an archive path to the absolute form used in the container.
///
/// Empty paths and `.` refer to the root, repeated and trailing slashes are dropped.
pub fn normalize_path(path: &str) -> Result<String, Error> {
    let mut normalized = String::with_capacity(path.len() + 1);

    for comp in path.split('/') {
        match comp {
            "" | "." => continue,
            ".." => bail!("invalid archive path {path:?} - parent references are not allowed"),
            comp => {
                normalized.push('/');
                normalized.push_str(comp);
            }
        }
    }

    if normalized.is_empty() {
        normalized.push('/');
    }

    Ok(normalized)
}

/// Append a single component to an archive path.
pub fn join_archive_path(parent: &str, name: &str) -> String {
    h5ar_container::join_path(parent, name)
}

/// Split an absolute archive path into parent path and last component.
///
/// The root has itself as parent and an empty name.
pub fn parent_and_name(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) if path.len() == 1 => ("/", ""),
        Some(0) => ("/", &path[1..]),
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("/", path),
    }
}

/// Location of the archive path `path` below the filesystem directory `root`.
pub fn archive_to_fs_path(root: &Path, path: &str) -> PathBuf {
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Make sure path is a single component and not '.' or '..'.
pub fn assert_single_path_component<S: AsRef<OsStr> + ?Sized>(path: &S) -> Result<(), Error> {
    let path = Path::new(path);

    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(_)) => (),
        _ => bail!("invalid path component in archive: {:?}", path),
    }

    if components.next().is_some() {
        bail!(
            "invalid path with multiple components in archive: {:?}",
            path
        );
    }

    Ok(())
}

/// Compute the CRC32 of everything `reader` yields.
pub fn crc32_of<R: Read>(mut reader: R) -> Result<(u32, u64), Error> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let got = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(got) => got,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        hasher.update(&buf[..got]);
        total += got as u64;
    }

    Ok((hasher.finalize(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("").unwrap(), "/");
        assert_eq!(normalize_path(".").unwrap(), "/");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("a/b").unwrap(), "/a/b");
        assert_eq!(normalize_path("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize_path("/a/./b").unwrap(), "/a/b");
        assert!(normalize_path("/a/../b").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_and_name("/"), ("/", ""));
        assert_eq!(parent_and_name("/a"), ("/", "a"));
        assert_eq!(parent_and_name("/a/b/c"), ("/a/b", "c"));
    }

    #[test]
    fn test_archive_to_fs_path() {
        let root = Path::new("/tmp/out");
        assert_eq!(archive_to_fs_path(root, "/"), PathBuf::from("/tmp/out"));
        assert_eq!(
            archive_to_fs_path(root, "/a/b"),
            PathBuf::from("/tmp/out/a/b")
        );
    }

    #[test]
    fn test_single_path_component() {
        assert!(assert_single_path_component("file").is_ok());
        assert!(assert_single_path_component("..").is_err());
        assert!(assert_single_path_component("a/b").is_err());
        assert!(assert_single_path_component("/a").is_err());
    }

    #[test]
    fn test_crc32_of() {
        let (crc, len) = crc32_of(&b"123456789"[..]).unwrap();
        assert_eq!(crc, 0xcbf43926);
        assert_eq!(len, 9);
    }
}
