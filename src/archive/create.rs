use std::path::Path;

use anyhow::{bail, format_err, Context, Error};

use h5ar_container::{Container, DataType};

use crate::archive::layout::write_attributes;
use crate::archive::tools::{assert_single_path_component, join_archive_path, parent_and_name};
use crate::archive::{
    normalize_path, ArchiveEntry, ArchiveError, ArchivingStrategy, FileLinkType, IdCache, Link,
    BUFFER_SIZE,
};

/// Options for archive creation.
#[derive(Clone, Debug)]
pub struct CreateOptions {
    /// Store a CRC32 checksum for every regular file.
    pub compute_checksums: bool,
    /// Maximum number of entries to archive.
    pub entries_max: usize,
    /// Skip lost+found directory
    pub skip_lost_and_found: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            compute_checksums: true,
            entries_max: 1024 * 1024,
            skip_lost_and_found: false,
        }
    }
}

struct Archiver<'a, C: Container + ?Sized, F> {
    container: &'a mut C,
    strategy: &'a ArchivingStrategy,
    options: &'a CreateOptions,
    id_cache: IdCache,
    entry_counter: usize,
    callback: F,
}

/// Archive the filesystem entry `source` at `archive_path`.
///
/// Directories are archived recursively with their entries sorted by name. Entries rejected by
/// `strategy` are skipped, `callback` is called for every archived entry. Returns the number
/// of archived entries.
pub fn archive_directory<C, F>(
    container: &mut C,
    source: &Path,
    archive_path: &str,
    strategy: &ArchivingStrategy,
    options: &CreateOptions,
    callback: F,
) -> Result<usize, Error>
where
    C: Container + ?Sized,
    F: FnMut(&ArchiveEntry),
{
    let archive_path = normalize_path(archive_path)?;
    let link = Link::from_filesystem(source)
        .with_context(|| format!("failed to stat source {source:?}"))?;

    if archive_path == "/" && !link.is_directory() {
        bail!("only directories can be archived at the archive root");
    }

    let mut archiver = Archiver {
        container,
        strategy,
        options,
        id_cache: IdCache::new(),
        entry_counter: 0,
        callback,
    };

    let (parent, _) = parent_and_name(&archive_path);
    archiver
        .container
        .create_group(parent)
        .map_err(|err| ArchiveError::container(parent, err))?;

    archiver.add_entry(source, &archive_path, link, true)?;

    Ok(archiver.entry_counter)
}

impl<'a, C, F> Archiver<'a, C, F>
where
    C: Container + ?Sized,
    F: FnMut(&ArchiveEntry),
{
    fn add_entry(
        &mut self,
        fs_path: &Path,
        archive_path: &str,
        link: Link,
        is_root: bool,
    ) -> Result<(), Error> {
        self.entry_counter += 1;
        if self.entry_counter > self.options.entries_max {
            bail!(
                "exceeded allowed number of file entries (> {})",
                self.options.entries_max
            );
        }

        log::debug!("archiving {fs_path:?} as {archive_path:?}");

        let link = match link.link_type() {
            FileLinkType::Directory => {
                self.container
                    .create_group(archive_path)
                    .map_err(|err| ArchiveError::container(archive_path, err))?;
                link
            }
            FileLinkType::RegularFile => self.add_regular_file(fs_path, archive_path, link)?,
            FileLinkType::SymbolicLink => {
                let target = link
                    .link_target()
                    .ok_or_else(|| format_err!("symbolic link {fs_path:?} without target"))?;
                self.container
                    .create_soft_link(archive_path, target)
                    .map_err(|err| ArchiveError::container(archive_path, err))?;
                link
            }
            FileLinkType::Other | FileLinkType::Unknown => {
                let link = Link::new(FileLinkType::Other)
                    .with_last_modified(link.last_modified())
                    .with_uid(link.uid())
                    .with_gid(link.gid())
                    .with_permissions(link.permissions());
                self.container
                    .create_or_open_dataset(
                        archive_path,
                        DataType::U8,
                        &[0],
                        &[],
                        &self.strategy.compression_for(archive_path),
                    )
                    .map_err(|err| ArchiveError::container(archive_path, err))?;
                link
            }
        };

        write_attributes(&mut *self.container, archive_path, &link)
            .map_err(|err| ArchiveError::container(archive_path, err))?;

        let entry = ArchiveEntry::at_path(archive_path, &link, &mut self.id_cache, false);
        (self.callback)(&entry);

        if link.is_directory() {
            self.add_directory_contents(fs_path, archive_path, is_root)?;
        }

        Ok(())
    }

    fn add_regular_file(
        &mut self,
        fs_path: &Path,
        archive_path: &str,
        link: Link,
    ) -> Result<Link, Error> {
        let data = std::fs::read(fs_path).with_context(|| format!("failed to read {fs_path:?}"))?;
        let len = data.len() as u64;

        let block_dims = if len > 0 {
            vec![len.min(BUFFER_SIZE as u64)]
        } else {
            Vec::new()
        };
        let features = self.strategy.compression_for(archive_path);

        let dataset = self
            .container
            .create_or_open_dataset(archive_path, DataType::U8, &[len], &block_dims, &features)
            .map_err(|err| ArchiveError::container(archive_path, err))?;
        // the file may have changed since it was stat'ed
        let mut link = link.with_size(len as i64);
        if self.options.compute_checksums {
            link = link.with_crc32(crc32fast::hash(&data));
        }

        let native = self.container.native_type(DataType::U8);
        self.container
            .write_flat_owned(&dataset, native, data)
            .map_err(|err| ArchiveError::container(archive_path, err))?;

        Ok(link)
    }

    fn add_directory_contents(
        &mut self,
        fs_dir: &Path,
        archive_dir: &str,
        is_root: bool,
    ) -> Result<(), Error> {
        let mut file_list = Vec::new();

        for entry in std::fs::read_dir(fs_dir)
            .with_context(|| format!("failed to read directory {fs_dir:?}"))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            assert_single_path_component(&file_name)?;

            let name = match file_name.to_str() {
                Some(name) => name.to_string(),
                None => {
                    log::warn!("skipping {file_name:?} in {fs_dir:?} - name is not valid UTF-8");
                    continue;
                }
            };

            if is_root && self.options.skip_lost_and_found && name == "lost+found" {
                continue;
            }

            file_list.push(name);
        }

        file_list.sort_unstable();

        for name in file_list {
            let fs_path = fs_dir.join(&name);
            let archive_path = join_archive_path(archive_dir, &name);

            let link = match Link::from_filesystem(&fs_path) {
                Ok(link) => link,
                Err(err) => match err.downcast_ref::<std::io::Error>() {
                    Some(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                        log::debug!("{fs_path:?} vanished while archiving");
                        continue;
                    }
                    _ => return Err(err.context(format!("stat failed on {fs_path:?}"))),
                },
            };

            if !self
                .strategy
                .should_include(&archive_path, link.is_directory())
            {
                log::debug!("excluding {archive_path:?}");
                continue;
            }

            self.add_entry(&fs_path, &archive_path, link, false)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5ar_container::{AttributeValue, ContainerFile, ObjectKind};

    #[test]
    fn test_archive_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bbb").unwrap();
        std::fs::write(dir.path().join("a.log"), b"a").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), b"").unwrap();
        std::os::unix::fs::symlink("b.txt", dir.path().join("ln")).unwrap();

        let strategy = ArchivingStrategy::new().exclude_files(r".*\.log").unwrap();
        let mut container = ContainerFile::new();
        let mut seen = Vec::new();
        let count = archive_directory(
            &mut container,
            dir.path(),
            "/",
            &strategy,
            &CreateOptions::default(),
            |entry| seen.push(entry.path().to_string()),
        )
        .unwrap();

        assert_eq!(count, 5);
        assert_eq!(seen, vec!["/", "/b.txt", "/ln", "/sub", "/sub/c.txt"]);
        assert_eq!(
            container.list_children("/").unwrap(),
            vec![
                ("b.txt".to_string(), ObjectKind::Dataset),
                ("ln".to_string(), ObjectKind::SoftLink),
                ("sub".to_string(), ObjectKind::Group),
            ]
        );
        assert_eq!(container.soft_link_target("/ln").unwrap(), "b.txt");
        assert_eq!(
            container.get_attribute("/b.txt", "h5ar:crc32").unwrap(),
            Some(AttributeValue::Int(i64::from(crc32fast::hash(b"bbb"))))
        );
    }

    #[test]
    fn test_archive_single_file_below_new_groups() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"1234").unwrap();

        let mut container = ContainerFile::new();
        let options = CreateOptions {
            compute_checksums: false,
            ..Default::default()
        };
        archive_directory(
            &mut container,
            &file,
            "/x/y/data.bin",
            &ArchivingStrategy::default(),
            &options,
            |_| (),
        )
        .unwrap();

        assert_eq!(container.dataset_len("/x/y/data.bin").unwrap(), 4);
        assert_eq!(
            container.get_attribute("/x/y/data.bin", "h5ar:crc32").unwrap(),
            None
        );
    }

    #[test]
    fn test_entry_limit() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let options = CreateOptions {
            entries_max: 2,
            ..Default::default()
        };
        let result = archive_directory(
            &mut ContainerFile::new(),
            dir.path(),
            "/",
            &ArchivingStrategy::default(),
            &options,
            |_| (),
        );
        assert!(result.is_err());
    }
}
