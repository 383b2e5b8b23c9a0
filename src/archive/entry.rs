use std::fmt;

use serde::Serialize;

use crate::archive::list_entry::{mode_string, ListEntry};
use crate::archive::tools::parent_and_name;
use crate::archive::{FileLinkType, IdCache, Link};

/// Category of a difference between an archive and the filesystem.
///
/// When several apply, the first one in declaration order is reported.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    MissingOnDisk,
    MissingInArchive,
    TypeMismatch,
    SizeMismatch,
    LinkTargetMismatch,
    PermissionMismatch,
    ChecksumMismatch,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::MissingOnDisk => "MISSING_ON_DISK",
            DiscrepancyKind::MissingInArchive => "MISSING_IN_ARCHIVE",
            DiscrepancyKind::TypeMismatch => "TYPE_MISMATCH",
            DiscrepancyKind::SizeMismatch => "SIZE_MISMATCH",
            DiscrepancyKind::LinkTargetMismatch => "LINK_TARGET_MISMATCH",
            DiscrepancyKind::PermissionMismatch => "PERMISSION_MISMATCH",
            DiscrepancyKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single difference found by verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub path: String,
    pub kind: DiscrepancyKind,
    pub archived: String,
    pub actual: String,
}

impl Discrepancy {
    pub fn new<A: Into<String>, B: Into<String>>(
        path: &str,
        kind: DiscrepancyKind,
        archived: A,
        actual: B,
    ) -> Self {
        Self {
            path: path.to_string(),
            kind,
            archived: archived.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (archive: {}, actual: {})",
            self.path, self.kind, self.archived, self.actual
        )
    }
}

/// Stable, public view of one archived item as handed to visitors and returned by listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveEntry {
    path: String,
    parent_path: String,
    name: String,
    #[serde(rename = "type")]
    link_type: FileLinkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    link_target: Option<String>,
    size: i64,
    last_modified: i64,
    uid: i64,
    gid: i64,
    user: String,
    group: String,
    permissions: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc32: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discrepancy: Option<Discrepancy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

impl ArchiveEntry {
    /// Build the entry for `link` stored at the archive path `path`.
    pub(crate) fn at_path(
        path: &str,
        link: &Link,
        id_cache: &mut IdCache,
        numeric: bool,
    ) -> Self {
        Self::with_path(path.to_string(), link, id_cache, numeric)
    }

    fn with_path(path: String, link: &Link, id_cache: &mut IdCache, numeric: bool) -> Self {
        let (parent_path, name) = parent_and_name(&path);
        let (parent_path, name) = (parent_path.to_string(), name.to_string());

        let (user, group) = if link.has_unix_ownership() {
            (
                id_cache.get_user(link, numeric),
                id_cache.get_group(link, numeric),
            )
        } else {
            (String::new(), String::new())
        };

        Self {
            path,
            parent_path,
            name,
            link_type: link.link_type(),
            link_target: link.link_target().map(str::to_string),
            size: link.size(),
            last_modified: link.last_modified(),
            uid: link.uid(),
            gid: link.gid(),
            user,
            group,
            permissions: link.permissions(),
            crc32: link.crc32(),
            discrepancy: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn set_discrepancy(&mut self, discrepancy: Discrepancy) {
        self.discrepancy = Some(discrepancy);
    }

    pub(crate) fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link_type(&self) -> FileLinkType {
        self.link_type
    }

    pub fn link_target(&self) -> Option<&str> {
        self.link_target.as_deref()
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

    /// Owner name, or the numeric id when listing numerically. Empty if unknown.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn permissions(&self) -> i64 {
        self.permissions
    }

    pub fn permission_string(&self) -> String {
        mode_string(&self.to_link())
    }

    pub fn crc32(&self) -> Option<u32> {
        self.crc32
    }

    pub fn discrepancy(&self) -> Option<&Discrepancy> {
        self.discrepancy.as_ref()
    }

    /// Metadata restore warnings collected during extraction.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether no discrepancy was found for this entry.
    pub fn is_ok(&self) -> bool {
        self.discrepancy.is_none()
    }

    /// `OK` or the description of the discrepancy.
    pub fn status(&self) -> String {
        match &self.discrepancy {
            None => "OK".to_string(),
            Some(discrepancy) => discrepancy.to_string(),
        }
    }

    /// Rebuild the metadata record of this entry.
    pub fn to_link(&self) -> Link {
        let mut link = Link::new(self.link_type)
            .with_name(self.name.clone())
            .with_size(self.size)
            .with_last_modified(self.last_modified)
            .with_uid(self.uid)
            .with_gid(self.gid)
            .with_permissions(self.permissions);
        if let Some(target) = &self.link_target {
            link = link.with_link_target(target.clone());
        }
        if let Some(crc32) = self.crc32 {
            link = link.with_crc32(crc32);
        }
        link
    }

    /// Render the entry as listing line, see [`ListEntry::describe_link`].
    pub fn describe(&self, verbose: bool, numeric: bool) -> String {
        let link = self.to_link();
        ListEntry::with_names(
            &self.path,
            &link,
            self.user.clone(),
            self.group.clone(),
            verbose,
            numeric,
        )
        .describe_link()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_paths() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile)
            .with_name("b.txt")
            .with_size(3);

        let entry = ArchiveEntry::at_path("/a/b.txt", &link, &mut cache, true);
        assert_eq!(entry.path(), "/a/b.txt");
        assert_eq!(entry.parent_path(), "/a");
        assert_eq!(entry.name(), "b.txt");

        let entry = ArchiveEntry::at_path("/b.txt", &link, &mut cache, true);
        assert_eq!(entry.path(), "/b.txt");
        assert_eq!(entry.parent_path(), "/");
    }

    #[test]
    fn test_status() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile).with_name("f");
        let mut entry = ArchiveEntry::at_path("/f", &link, &mut cache, true);
        assert!(entry.is_ok());
        assert_eq!(entry.status(), "OK");

        entry.set_discrepancy(Discrepancy::new(
            "/f",
            DiscrepancyKind::SizeMismatch,
            "3",
            "4",
        ));
        assert!(!entry.is_ok());
        assert_eq!(entry.status(), "/f: SIZE_MISMATCH (archive: 3, actual: 4)");
    }

    #[test]
    fn test_numeric_names_and_describe() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile)
            .with_name("f")
            .with_uid(1234)
            .with_gid(99)
            .with_permissions(0o640)
            .with_size(1)
            .with_crc32(1);
        let entry = ArchiveEntry::at_path("/d/f", &link, &mut cache, true);
        assert_eq!(entry.user(), "1234");
        assert_eq!(entry.group(), "99");
        assert_eq!(entry.permission_string(), "-rw-r-----");
        assert_eq!(entry.describe(false, true), "/d/f");
        assert_eq!(
            entry.describe(true, true),
            "640\t1234\t99\t         1\t\t00000001\t/d/f"
        );
    }

    #[test]
    fn test_serialize() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::Directory).with_name("d");
        let entry = ArchiveEntry::at_path("/d", &link, &mut cache, true);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["path"], "/d");
        assert_eq!(value["type"], "directory");
        assert_eq!(value["last-modified"], -1);
        assert!(value.get("discrepancy").is_none());
    }
}
