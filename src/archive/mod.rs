//! *h5ar* archive engine
//!
//! An archive maps a filesystem tree onto the object hierarchy of a container. The archive
//! path `/a/b` is stored as the container object `/a/b`:
//!
//!  * directories are groups, their entries are linked in the order they were archived
//!  * regular files are `u8` datasets holding the file contents
//!  * symbolic links are soft links holding the raw link target
//!  * other entries (devices, fifos, sockets) are empty datasets marked as `other`
//!
//! Every object carries its metadata as sidecar attributes:
//!  * `h5ar:type`   -- `file`, `dir`, `symlink` or `other`
//!  * `h5ar:size`   -- size of a regular file in bytes
//!  * `h5ar:mtime`  -- modification time in seconds since the epoch
//!  * `h5ar:uid`    -- numeric owner
//!  * `h5ar:gid`    -- numeric group
//!  * `h5ar:mode`   -- the 12 permission bits
//!  * `h5ar:crc32`  -- CRC32 of the file contents, if checksums were requested
//!
//! Missing attributes are read as "unknown", so an archive without any metadata can still be
//! listed and extracted.

pub(crate) mod create;
pub(crate) mod entry;
pub(crate) mod error;
pub(crate) mod extract;
pub(crate) mod id_cache;
pub(crate) mod layout;
pub(crate) mod link;
pub(crate) mod list_entry;
pub(crate) mod metadata;
pub(crate) mod reader;
pub(crate) mod strategy;
pub(crate) mod tools;
pub(crate) mod verify;
pub(crate) mod walker;

pub use create::{archive_directory, CreateOptions};
pub use entry::{ArchiveEntry, Discrepancy, DiscrepancyKind};
pub use error::{ArchiveError, ErrorHandler, ExtractContext};
pub use extract::{ArchiveFileReader, RestoreFlags};
pub use id_cache::IdCache;
pub use link::{FileLinkType, Link};
pub use list_entry::{hash_to_string, permission_string, ListEntry};
pub use reader::{ArchiveReader, ListParameters, VerifyParameters};
pub use strategy::ArchivingStrategy;
pub use tools::normalize_path;
pub use walker::{ArchiveTreeWalker, WalkItem};

/// Size of the blocks used to stream file contents out of and into the container.
pub const BUFFER_SIZE: usize = 64 * 1024;
