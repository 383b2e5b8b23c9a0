//! Lazy pre-order traversal of the archive hierarchy.

use anyhow::{Context, Error};

use h5ar_container::{Container, ObjectKind};

use crate::archive::layout::read_link;
use crate::archive::tools::join_archive_path;
use crate::archive::{ArchiveError, Link};

/// Events produced while walking an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkItem {
    /// A non-directory entry.
    Entry { path: String, link: Link },
    /// A directory, its contents follow up to the matching [`WalkItem::LeaveDirectory`].
    EnterDirectory { path: String, link: Link },
    LeaveDirectory { path: String, link: Link },
}

impl WalkItem {
    pub fn path(&self) -> &str {
        match self {
            WalkItem::Entry { path, .. }
            | WalkItem::EnterDirectory { path, .. }
            | WalkItem::LeaveDirectory { path, .. } => path,
        }
    }

    pub fn link(&self) -> &Link {
        match self {
            WalkItem::Entry { link, .. }
            | WalkItem::EnterDirectory { link, .. }
            | WalkItem::LeaveDirectory { link, .. } => link,
        }
    }
}

struct DirFrame {
    path: String,
    link: Link,
    children: std::vec::IntoIter<(String, ObjectKind)>,
}

enum WalkState {
    NotStarted,
    Descending(Vec<DirFrame>),
    Done,
}

/// Depth-first walk over an archive subtree.
///
/// Children are visited in the order the container stores them. Failing to read an object
/// yields an error for it and skips its subtree, the walk then continues with the next
/// sibling. Dropping the walker stops the traversal.
pub struct ArchiveTreeWalker<'a, C: Container + ?Sized> {
    container: &'a C,
    root: String,
    recursive: bool,
    state: WalkState,
}

impl<'a, C: Container + ?Sized> ArchiveTreeWalker<'a, C> {
    /// Walk the subtree at the normalized archive path `root`.
    ///
    /// Without `recursive` only the direct children of `root` are reported, sub-directories
    /// appear as an enter/leave pair without contents.
    pub fn new(container: &'a C, root: &str, recursive: bool) -> Self {
        Self {
            container,
            root: root.to_string(),
            recursive,
            state: WalkState::NotStarted,
        }
    }

    /// Skip the remaining contents of the directory entered last.
    ///
    /// The next item is the [`WalkItem::LeaveDirectory`] of that directory.
    pub fn skip_directory(&mut self) {
        if let WalkState::Descending(stack) = &mut self.state {
            if let Some(frame) = stack.last_mut() {
                frame.children = Vec::new().into_iter();
            }
        }
    }

    fn open(&self, path: &str, kind: ObjectKind) -> Result<Link, Error> {
        read_link(self.container, path, kind)
            .map_err(|err| ArchiveError::container(path, err))
            .with_context(|| format!("failed to read archive entry {path:?}"))
    }

    fn open_directory(&self, path: String, link: Link, list: bool) -> Result<DirFrame, Error> {
        let children = if list {
            self.container
                .list_children(&path)
                .map_err(|err| ArchiveError::container(&path, err))
                .with_context(|| format!("failed to list archive directory {path:?}"))?
        } else {
            Vec::new()
        };

        Ok(DirFrame {
            path,
            link,
            children: children.into_iter(),
        })
    }

    fn start(&mut self) -> Result<WalkItem, Error> {
        let kind = self
            .container
            .object_kind(&self.root)
            .map_err(|err| ArchiveError::container(&self.root, err))?
            .ok_or_else(|| ArchiveError::PathNotFound(self.root.clone()))?;

        let link = self.open(&self.root, kind)?;
        let path = self.root.clone();

        if kind != ObjectKind::Group {
            return Ok(WalkItem::Entry { path, link });
        }

        let frame = self.open_directory(path.clone(), link.clone(), true)?;
        self.state = WalkState::Descending(vec![frame]);
        Ok(WalkItem::EnterDirectory { path, link })
    }

    fn step(&mut self) -> Option<Result<WalkItem, Error>> {
        let stack = match &mut self.state {
            WalkState::Descending(stack) => stack,
            _ => return None,
        };

        let (parent, child) = match stack.last_mut() {
            None => {
                self.state = WalkState::Done;
                return None;
            }
            Some(frame) => (frame.path.clone(), frame.children.next()),
        };

        let (name, kind) = match child {
            Some(child) => child,
            None => {
                // stack is not empty here
                let frame = stack.pop()?;
                if stack.is_empty() {
                    self.state = WalkState::Done;
                }
                return Some(Ok(WalkItem::LeaveDirectory {
                    path: frame.path,
                    link: frame.link,
                }));
            }
        };

        let path = join_archive_path(&parent, &name);
        let link = match self.open(&path, kind) {
            Ok(link) => link,
            Err(err) => return Some(Err(err)),
        };

        if kind != ObjectKind::Group {
            return Some(Ok(WalkItem::Entry { path, link }));
        }

        match self.open_directory(path.clone(), link.clone(), self.recursive) {
            Ok(frame) => {
                if let WalkState::Descending(stack) = &mut self.state {
                    stack.push(frame);
                }
                Some(Ok(WalkItem::EnterDirectory { path, link }))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl<'a, C: Container + ?Sized> Iterator for ArchiveTreeWalker<'a, C> {
    type Item = Result<WalkItem, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            WalkState::NotStarted => {
                self.state = WalkState::Done;
                Some(self.start())
            }
            WalkState::Descending(_) => self.step(),
            WalkState::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h5ar_container::{ContainerFile, DataType, StorageFeatures};

    fn sample() -> ContainerFile {
        let mut container = ContainerFile::new();
        container.create_group("/b/inner").unwrap();
        container.create_group("/a").unwrap();
        for path in ["/b/inner/z", "/b/y", "/x"] {
            container
                .create_or_open_dataset(path, DataType::U8, &[0], &[], &StorageFeatures::UNCOMPRESSED)
                .unwrap();
        }
        container.create_soft_link("/b/ln", "y").unwrap();
        container
    }

    fn describe(item: &WalkItem) -> String {
        match item {
            WalkItem::Entry { path, .. } => path.clone(),
            WalkItem::EnterDirectory { path, .. } => format!("{path}/"),
            WalkItem::LeaveDirectory { path, .. } => format!("<{path}"),
        }
    }

    #[test]
    fn test_pre_order_in_container_order() {
        let container = sample();
        let items: Vec<String> = ArchiveTreeWalker::new(&container, "/", true)
            .map(|item| describe(&item.unwrap()))
            .collect();
        assert_eq!(
            items,
            vec![
                "//", "/b/", "/b/inner/", "/b/inner/z", "</b/inner", "/b/y", "/b/ln", "</b",
                "/a/", "</a", "/x", "</",
            ]
        );
    }

    #[test]
    fn test_non_recursive() {
        let container = sample();
        let items: Vec<String> = ArchiveTreeWalker::new(&container, "/b", false)
            .map(|item| describe(&item.unwrap()))
            .collect();
        assert_eq!(
            items,
            vec!["/b/", "/b/inner/", "</b/inner", "/b/y", "/b/ln", "</b"]
        );
    }

    #[test]
    fn test_single_entry_and_missing_root() {
        let container = sample();
        let items: Vec<WalkItem> = ArchiveTreeWalker::new(&container, "/b/y", true)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].link().is_regular_file());

        let mut walker = ArchiveTreeWalker::new(&container, "/nope", true);
        let err = walker.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::PathNotFound(_))
        ));
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_skip_directory() {
        let container = sample();
        let mut walker = ArchiveTreeWalker::new(&container, "/", true);
        let mut items = Vec::new();
        while let Some(item) = walker.next() {
            let item = item.unwrap();
            if matches!(&item, WalkItem::EnterDirectory { path, .. } if path == "/b") {
                walker.skip_directory();
            }
            items.push(describe(&item));
        }
        assert_eq!(items, vec!["//", "/b/", "</b", "/a/", "</a", "/x", "</"]);
    }

    #[test]
    fn test_early_stop() {
        let container = sample();
        let mut walker = ArchiveTreeWalker::new(&container, "/", true);
        assert_eq!(walker.next().unwrap().unwrap().path(), "/");
        assert_eq!(walker.next().unwrap().unwrap().path(), "/b");
        drop(walker);
    }
}
