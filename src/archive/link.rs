use std::fmt;
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::Serialize;

/// Sentinel for numeric fields whose value is not known.
pub const UNKNOWN: i64 = -1;

/// Type of an archived filesystem entry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileLinkType {
    RegularFile,
    Directory,
    SymbolicLink,
    Other,
    /// The type could not be determined.
    #[default]
    Unknown,
}

impl FileLinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileLinkType::RegularFile => "file",
            FileLinkType::Directory => "dir",
            FileLinkType::SymbolicLink => "symlink",
            FileLinkType::Other => "other",
            FileLinkType::Unknown => "unknown",
        }
    }

    /// Leading character of the mode string.
    pub fn type_char(&self) -> char {
        match self {
            FileLinkType::RegularFile => '-',
            FileLinkType::Directory => 'd',
            FileLinkType::SymbolicLink => 'l',
            FileLinkType::Other | FileLinkType::Unknown => '?',
        }
    }

    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_file() {
            FileLinkType::RegularFile
        } else if file_type.is_dir() {
            FileLinkType::Directory
        } else if file_type.is_symlink() {
            FileLinkType::SymbolicLink
        } else if file_type.is_block_device()
            || file_type.is_char_device()
            || file_type.is_fifo()
            || file_type.is_socket()
        {
            FileLinkType::Other
        } else {
            FileLinkType::Unknown
        }
    }
}

impl fmt::Display for FileLinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileLinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s {
            "file" => FileLinkType::RegularFile,
            "dir" => FileLinkType::Directory,
            "symlink" => FileLinkType::SymbolicLink,
            "other" => FileLinkType::Other,
            "unknown" => FileLinkType::Unknown,
            _ => bail!("unknown link type {s:?}"),
        })
    }
}

/// Metadata of a single archived entry.
///
/// Every numeric field may be unknown, which is stored as `-1`. A `Link` is built once, either
/// from the container or from the filesystem, with the `with_*` methods and not changed after.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    name: Option<String>,
    link_target: Option<String>,
    link_type: FileLinkType,
    size: i64,
    last_modified: i64,
    uid: i64,
    gid: i64,
    permissions: i64,
    crc32: Option<u32>,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            name: None,
            link_target: None,
            link_type: FileLinkType::Unknown,
            size: UNKNOWN,
            last_modified: UNKNOWN,
            uid: UNKNOWN,
            gid: UNKNOWN,
            permissions: UNKNOWN,
            crc32: None,
        }
    }
}

impl Link {
    pub fn new(link_type: FileLinkType) -> Self {
        Self {
            link_type,
            ..Default::default()
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_link_target<S: Into<String>>(mut self, target: S) -> Self {
        self.link_target = Some(target.into());
        self
    }

    /// Negative sizes are stored as unknown.
    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size.max(UNKNOWN);
        self
    }

    pub fn with_last_modified(mut self, secs: i64) -> Self {
        self.last_modified = secs;
        self
    }

    pub fn with_uid(mut self, uid: i64) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_gid(mut self, gid: i64) -> Self {
        self.gid = gid;
        self
    }

    /// Only the 12 permission bits are kept, negative values are stored as unknown.
    pub fn with_permissions(mut self, permissions: i64) -> Self {
        self.permissions = if permissions < 0 {
            UNKNOWN
        } else {
            permissions & 0o7777
        };
        self
    }

    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = Some(crc32);
        self
    }

    /// Describe a filesystem entry without following symbolic links.
    pub fn from_filesystem(path: &Path) -> Result<Self, Error> {
        let meta = std::fs::symlink_metadata(path)?;
        let mut link = Self::from_metadata(&meta);

        if let Some(name) = path.file_name() {
            link = link.with_name(name.to_string_lossy());
        }

        if link.is_symlink() {
            let target = std::fs::read_link(path)?;
            link = link.with_link_target(target.to_string_lossy());
        }

        Ok(link)
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        let link_type = FileLinkType::from_file_type(meta.file_type());
        let size = if link_type == FileLinkType::RegularFile {
            meta.len() as i64
        } else {
            UNKNOWN
        };

        Self::new(link_type)
            .with_size(size)
            .with_last_modified(meta.mtime())
            .with_uid(i64::from(meta.uid()))
            .with_gid(i64::from(meta.gid()))
            .with_permissions(i64::from(meta.mode()))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
    }

    pub fn link_type(&self) -> FileLinkType {
        self.link_type
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn gid(&self) -> i64 {
        self.gid
    }

    pub fn permissions(&self) -> i64 {
        self.permissions
    }

    pub fn crc32(&self) -> Option<u32> {
        self.crc32
    }

    pub fn is_directory(&self) -> bool {
        self.link_type == FileLinkType::Directory
    }

    pub fn is_regular_file(&self) -> bool {
        self.link_type == FileLinkType::RegularFile
    }

    pub fn is_symlink(&self) -> bool {
        self.link_type == FileLinkType::SymbolicLink
    }

    /// Whether both owner and group are known.
    pub fn has_unix_ownership(&self) -> bool {
        self.uid >= 0 && self.gid >= 0
    }
}
