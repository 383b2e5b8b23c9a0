//! Rendering of archive entries as listing lines.

use crate::archive::{FileLinkType, IdCache, Link};

const S_ISUID: i64 = 0o4000;
const S_ISGID: i64 = 0o2000;
const S_ISVTX: i64 = 0o1000;

#[rustfmt::skip]
fn symbolic_mode(c: i64, special: bool, special_x: u8, special_no_x: u8) -> [u8; 3] {
    [
        if 0 != c & 4 { b'r' } else { b'-' },
        if 0 != c & 2 { b'w' } else { b'-' },
        match (c & 1, special) {
            (0, false) => b'-',
            (0, true) => special_no_x,
            (_, false) => b'x',
            (_, true) => special_x,
        }
    ]
}

fn format_mode(type_char: char, permissions: i64) -> String {
    let mut out = String::with_capacity(10);
    out.push(type_char);

    if permissions < 0 {
        out.push_str("---------");
        return out;
    }

    let fmt_u = symbolic_mode((permissions >> 6) & 7, 0 != permissions & S_ISUID, b's', b'S');
    let fmt_g = symbolic_mode((permissions >> 3) & 7, 0 != permissions & S_ISGID, b's', b'S');
    let fmt_o = symbolic_mode(permissions & 7, 0 != permissions & S_ISVTX, b't', b'T');

    out.extend(
        fmt_u
            .iter()
            .chain(fmt_g.iter())
            .chain(fmt_o.iter())
            .map(|b| char::from(*b)),
    );
    out
}

/// Render the 12 permission bits as `ls` style mode string, like `drwxr-sr-t`.
///
/// Unknown permissions (`-1`) render as dashes.
pub fn permission_string(permissions: i64, is_directory: bool) -> String {
    format_mode(if is_directory { 'd' } else { '-' }, permissions)
}

/// Mode string of `link`, using its type for the leading character.
pub fn mode_string(link: &Link) -> String {
    let type_char = match link.link_type() {
        // entries without type information are shown like plain files
        FileLinkType::Unknown => '-',
        other => other.type_char(),
    };
    format_mode(type_char, link.permissions())
}

/// Render a CRC32 checksum as 8 lowercase hex digits.
pub fn hash_to_string(crc32: u32) -> String {
    format!("{crc32:08x}")
}

pub(crate) fn format_mtime(secs: i64) -> String {
    if let Ok(s) = proxmox_time::strftime_local("%Y-%m-%d %H:%M:%S", secs) {
        return s;
    }
    secs.to_string()
}

/// One line of an archive listing.
pub struct ListEntry<'a> {
    path: &'a str,
    link: &'a Link,
    user: String,
    group: String,
    verbose: bool,
    numeric: bool,
}

impl<'a> ListEntry<'a> {
    /// Build a listing line, resolving owner and group names through `id_cache` when they are
    /// shown.
    pub fn new(
        path: &'a str,
        link: &'a Link,
        id_cache: &mut IdCache,
        verbose: bool,
        numeric: bool,
    ) -> Self {
        let (user, group) = if verbose && !numeric && link.has_unix_ownership() {
            (
                id_cache.get_user(link, false),
                id_cache.get_group(link, false),
            )
        } else {
            (String::new(), String::new())
        };

        Self::with_names(path, link, user, group, verbose, numeric)
    }

    /// Build a listing line with owner and group names that were resolved before.
    pub fn with_names(
        path: &'a str,
        link: &'a Link,
        user: String,
        group: String,
        verbose: bool,
        numeric: bool,
    ) -> Self {
        Self {
            path,
            link,
            user,
            group,
            verbose,
            numeric,
        }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    pub fn link(&self) -> &Link {
        self.link
    }

    fn size_column(&self) -> String {
        let size = if self.link.is_directory() {
            "DIR".to_string()
        } else if self.link.size() < 0 {
            String::new()
        } else {
            self.link.size().to_string()
        };
        format!("{size:>10}")
    }

    fn checksum_column(&self) -> String {
        if self.link.is_regular_file() {
            hash_to_string(self.link.crc32().unwrap_or(0))
        } else {
            " ".repeat(8)
        }
    }

    fn path_column(&self) -> String {
        match (self.link.is_symlink(), self.link.link_target()) {
            (true, Some(target)) => format!("{} -> {}", self.path, target),
            _ => self.path.to_string(),
        }
    }

    /// Render the line.
    ///
    /// Columns are tab separated. Without `verbose` only the path is shown.
    pub fn describe_link(&self) -> String {
        if !self.verbose {
            return self.path.to_string();
        }

        let link = self.link;
        let mut columns = Vec::with_capacity(7);

        if self.numeric {
            columns.push(unknown_as_empty(link.permissions(), |v| format!("{v:o}")));
            columns.push(unknown_as_empty(link.uid(), |v| v.to_string()));
            columns.push(unknown_as_empty(link.gid(), |v| v.to_string()));
            columns.push(self.size_column());
            columns.push(unknown_as_empty(link.last_modified(), format_mtime));
        } else {
            if link.has_unix_ownership() {
                columns.push(mode_string(link));
                columns.push(self.user.clone());
                columns.push(self.group.clone());
            }
            columns.push(self.size_column());
            if link.last_modified() >= 0 {
                columns.push(format_mtime(link.last_modified()));
            }
        }

        columns.push(self.checksum_column());
        columns.push(self.path_column());

        columns.join("\t")
    }
}

fn unknown_as_empty<F: FnOnce(i64) -> String>(value: i64, render: F) -> String {
    if value == -1 {
        String::new()
    } else {
        render(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_strings() {
        let table = [
            (0, "----------"),
            (0o666, "-rw-rw-rw-"),
            (0o444, "-r--r--r--"),
            (0o700, "-rwx------"),
            (0o4755, "-rwsr-xr-x"),
            (0o4655, "-rwSr-xr-x"),
            (0o2755, "-rwxr-sr-x"),
            (0o2745, "-rwxr-Sr-x"),
            (0o1755, "-rwxr-xr-t"),
            (0o1754, "-rwxr-xr-T"),
        ];
        for (mode, expected) in table {
            assert_eq!(permission_string(mode, false), expected, "mode {mode:o}");
        }

        assert_eq!(permission_string(0, true), "d---------");
        assert_eq!(permission_string(0o755, true), "drwxr-xr-x");
        assert_eq!(permission_string(-1, false), "----------");
    }

    #[test]
    fn test_mode_string_type_chars() {
        let link = Link::new(FileLinkType::SymbolicLink).with_permissions(0o777);
        assert_eq!(mode_string(&link), "lrwxrwxrwx");

        let link = Link::new(FileLinkType::Other).with_permissions(0o644);
        assert_eq!(mode_string(&link), "?rw-r--r--");

        let link = Link::default();
        assert_eq!(mode_string(&link), "----------");
    }

    #[test]
    fn test_hash_to_string() {
        assert_eq!(hash_to_string(0), "00000000");
        assert_eq!(hash_to_string(0xdeadbeef), "deadbeef");
        assert_eq!(hash_to_string(0x1f), "0000001f");
    }

    #[test]
    fn test_non_verbose() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile).with_size(3);
        let entry = ListEntry::new("/a/b", &link, &mut cache, false, false);
        assert_eq!(entry.describe_link(), "/a/b");
    }

    #[test]
    fn test_verbose_full_form() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::Directory)
            .with_uid(0)
            .with_gid(0)
            .with_permissions(0o755)
            .with_last_modified(1_000_000_000);
        let entry = ListEntry::new("/etc", &link, &mut cache, true, false);

        let expected = format!(
            "drwxr-xr-x\troot\troot\t       DIR\t{}\t        \t/etc",
            format_mtime(1_000_000_000)
        );
        assert_eq!(entry.describe_link(), expected);
    }

    #[test]
    fn test_verbose_numeric() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile)
            .with_uid(1000)
            .with_gid(100)
            .with_permissions(0o644)
            .with_size(42)
            .with_crc32(0xabc);
        let entry = ListEntry::new("/f", &link, &mut cache, true, true);
        assert_eq!(
            entry.describe_link(),
            "644\t1000\t100\t        42\t\t00000abc\t/f"
        );
    }

    #[test]
    fn test_degraded_without_mtime() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::RegularFile)
            .with_uid(0)
            .with_gid(0)
            .with_permissions(0o600)
            .with_size(7);
        let entry = ListEntry::new("/secret", &link, &mut cache, true, false);
        assert_eq!(
            entry.describe_link(),
            "-rw-------\troot\troot\t         7\t00000000\t/secret"
        );
    }

    #[test]
    fn test_degraded_without_ownership() {
        let mut cache = IdCache::new();
        let link = Link::new(FileLinkType::SymbolicLink).with_link_target("../x");
        let entry = ListEntry::new("/ln", &link, &mut cache, true, false);
        assert_eq!(entry.describe_link(), "          \t        \t/ln -> ../x");
    }
}
