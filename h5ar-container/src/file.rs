use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::format::*;
use crate::{
    join_path, split_path, AttributeValue, Container, ContainerError, DataType, DatasetId,
    ObjectKind, StorageFeatures, MAX_DEPTH,
};

/// Guard against corrupt files claiming absurd numbers of entries.
const MAX_ENTRIES: u64 = 16 * 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

enum DatasetData {
    Memory(Vec<u8>),
    /// Created but never written, reads as zeros.
    Zeroed { len: u64 },
    /// Payload still lives in the backing file.
    Backing { offset: u64, len: u64 },
}

struct Dataset {
    data_type: DataType,
    dims: Vec<u64>,
    block_dims: Vec<u64>,
    features: StorageFeatures,
    data: DatasetData,
}

impl Dataset {
    fn len(&self) -> u64 {
        match &self.data {
            DatasetData::Memory(data) => data.len() as u64,
            DatasetData::Zeroed { len } => *len,
            DatasetData::Backing { len, .. } => *len,
        }
    }
}

enum NodeBody {
    Group(Vec<(String, Node)>),
    Dataset(Dataset),
    SoftLink(String),
}

struct Node {
    attributes: Vec<(String, AttributeValue)>,
    body: NodeBody,
}

impl Node {
    fn group() -> Self {
        Self {
            attributes: Vec::new(),
            body: NodeBody::Group(Vec::new()),
        }
    }

    fn kind(&self) -> ObjectKind {
        match self.body {
            NodeBody::Group(_) => ObjectKind::Group,
            NodeBody::Dataset(_) => ObjectKind::Dataset,
            NodeBody::SoftLink(_) => ObjectKind::SoftLink,
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        match &self.body {
            NodeBody::Group(children) => children
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        match &mut self.body {
            NodeBody::Group(children) => children
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c),
            _ => None,
        }
    }
}

/// A container kept in memory and persisted to a single file.
///
/// Opening a file only reads the object hierarchy and attributes, dataset payloads are read
/// on demand with positional reads from the still open file.
pub struct ContainerFile {
    root: Node,
    backing: Option<File>,
    path: Option<PathBuf>,
}

impl Default for ContainerFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerFile {
    /// Create an empty container which only lives in memory until it is saved.
    pub fn new() -> Self {
        Self {
            root: Node::group(),
            backing: None,
            path: None,
        }
    }

    /// Open an existing container file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file.try_clone()?);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != H5AR_CONTAINER_MAGIC_1_0 {
            return Err(ContainerError::Format(
                "got unexpected magic number".to_string(),
            ));
        }

        let root = decode_node(&mut reader, 0)?;
        if root.kind() != ObjectKind::Group {
            return Err(ContainerError::Format(
                "root object is not a group".to_string(),
            ));
        }

        log::debug!("opened container {:?}", path);

        Ok(Self {
            root,
            backing: Some(file),
            path: Some(path.to_owned()),
        })
    }

    /// Path of the file this container was opened from or last saved to.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the container to `path`.
    ///
    /// The data is written to a temporary file next to `path` which then replaces it.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ContainerError> {
        let path = path.as_ref();
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let result = (|| -> Result<(), ContainerError> {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&H5AR_CONTAINER_MAGIC_1_0)?;
            encode_node(&mut writer, &self.root, self.backing.as_ref())?;
            let file = writer
                .into_inner()
                .map_err(|err| ContainerError::Io(err.into_error()))?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result?;

        self.path = Some(path.to_owned());
        Ok(())
    }

    fn lookup(&self, path: &str) -> Result<Option<&Node>, ContainerError> {
        let mut current = &self.root;
        for comp in split_path(path)? {
            match current.child(comp) {
                Some(node) => current = node,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn node(&self, path: &str) -> Result<&Node, ContainerError> {
        self.lookup(path)?
            .ok_or_else(|| ContainerError::NotFound(path.to_string()))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node, ContainerError> {
        let mut current = &mut self.root;
        for comp in split_path(path)? {
            current = current
                .child_mut(comp)
                .ok_or_else(|| ContainerError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn dataset(&self, path: &str) -> Result<&Dataset, ContainerError> {
        match &self.node(path)?.body {
            NodeBody::Dataset(dataset) => Ok(dataset),
            _ => Err(ContainerError::WrongKind {
                path: path.to_string(),
                expected: "dataset",
            }),
        }
    }

    /// Look up the dataset behind `id` for replacing its contents with `len` bytes.
    fn writable_dataset(
        &mut self,
        id: &DatasetId,
        native_type: DataType,
        len: usize,
    ) -> Result<&mut Dataset, ContainerError> {
        let path = id.path();
        let dataset = match &mut self.node_mut(path)?.body {
            NodeBody::Dataset(dataset) => dataset,
            _ => {
                return Err(ContainerError::WrongKind {
                    path: path.to_string(),
                    expected: "dataset",
                })
            }
        };

        if dataset.data_type != native_type {
            return Err(ContainerError::TypeMismatch {
                path: path.to_string(),
                stored: dataset.data_type.as_str(),
                native: native_type.as_str(),
            });
        }

        let expected = dataset.len();
        if expected != len as u64 {
            return Err(ContainerError::SizeMismatch {
                path: path.to_string(),
                expected,
                len: len as u64,
            });
        }

        Ok(dataset)
    }

    /// Link a new object into its parent group, which has to exist.
    fn insert(&mut self, path: &str, node: Node) -> Result<(), ContainerError> {
        let mut components = split_path(path)?;
        let name = components
            .pop()
            .ok_or_else(|| ContainerError::AlreadyExists(path.to_string()))?
            .to_string();

        let mut parent = &mut self.root;
        for comp in components {
            parent = parent
                .child_mut(comp)
                .ok_or_else(|| ContainerError::NotFound(path.to_string()))?;
        }

        match &mut parent.body {
            NodeBody::Group(children) => {
                if children.iter().any(|(n, _)| *n == name) {
                    return Err(ContainerError::AlreadyExists(path.to_string()));
                }
                children.push((name, node));
                Ok(())
            }
            _ => Err(ContainerError::WrongKind {
                path: path.to_string(),
                expected: "group",
            }),
        }
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, ContainerError> {
        let file = self
            .backing
            .as_ref()
            .ok_or_else(|| ContainerError::Format("dataset without backing file".to_string()))?;

        let mut done = 0;
        while done < buf.len() {
            match file.read_at(&mut buf[done..], offset + done as u64) {
                Ok(0) => {
                    return Err(ContainerError::Format(
                        "unexpected end of container file".to_string(),
                    ))
                }
                Ok(n) => done += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(done)
    }
}

impl Container for ContainerFile {
    fn object_kind(&self, path: &str) -> Result<Option<ObjectKind>, ContainerError> {
        Ok(self.lookup(path)?.map(Node::kind))
    }

    fn list_children(&self, group: &str) -> Result<Vec<(String, ObjectKind)>, ContainerError> {
        match &self.node(group)?.body {
            NodeBody::Group(children) => Ok(children
                .iter()
                .map(|(name, node)| (name.clone(), node.kind()))
                .collect()),
            _ => Err(ContainerError::WrongKind {
                path: group.to_string(),
                expected: "group",
            }),
        }
    }

    fn create_group(&mut self, path: &str) -> Result<(), ContainerError> {
        let mut current = String::from("/");
        for comp in split_path(path)? {
            current = join_path(&current, comp);
            match self.object_kind(&current)? {
                Some(ObjectKind::Group) => (),
                Some(_) => {
                    return Err(ContainerError::WrongKind {
                        path: current,
                        expected: "group",
                    })
                }
                None => {
                    self.insert(&current, Node::group())?;
                }
            }
        }
        Ok(())
    }

    fn create_soft_link(&mut self, path: &str, target: &str) -> Result<(), ContainerError> {
        self.insert(
            path,
            Node {
                attributes: Vec::new(),
                body: NodeBody::SoftLink(target.to_string()),
            },
        )?;
        Ok(())
    }

    fn soft_link_target(&self, path: &str) -> Result<String, ContainerError> {
        match &self.node(path)?.body {
            NodeBody::SoftLink(target) => Ok(target.clone()),
            _ => Err(ContainerError::WrongKind {
                path: path.to_string(),
                expected: "soft link",
            }),
        }
    }

    fn create_or_open_dataset(
        &mut self,
        path: &str,
        storage_type: DataType,
        dims: &[u64],
        block_dims: &[u64],
        features: &StorageFeatures,
    ) -> Result<DatasetId, ContainerError> {
        if let Some(node) = self.lookup(path)? {
            return match &node.body {
                NodeBody::Dataset(dataset) if dataset.data_type == storage_type => {
                    Ok(DatasetId::new(path.to_string(), storage_type))
                }
                NodeBody::Dataset(dataset) => Err(ContainerError::TypeMismatch {
                    path: path.to_string(),
                    stored: dataset.data_type.as_str(),
                    native: storage_type.as_str(),
                }),
                _ => Err(ContainerError::WrongKind {
                    path: path.to_string(),
                    expected: "dataset",
                }),
            };
        }

        let elements: u64 = dims.iter().product();
        let len = elements * storage_type.element_size() as u64;

        self.insert(
            path,
            Node {
                attributes: Vec::new(),
                body: NodeBody::Dataset(Dataset {
                    data_type: storage_type,
                    dims: dims.to_vec(),
                    block_dims: block_dims.to_vec(),
                    features: *features,
                    data: DatasetData::Zeroed { len },
                }),
            },
        )?;

        Ok(DatasetId::new(path.to_string(), storage_type))
    }

    fn write_flat(
        &mut self,
        dataset: &DatasetId,
        native_type: DataType,
        buffer: &[u8],
    ) -> Result<(), ContainerError> {
        self.writable_dataset(dataset, native_type, buffer.len())?.data =
            DatasetData::Memory(buffer.to_vec());
        Ok(())
    }

    fn write_flat_owned(
        &mut self,
        dataset: &DatasetId,
        native_type: DataType,
        buffer: Vec<u8>,
    ) -> Result<(), ContainerError> {
        let len = buffer.len();
        self.writable_dataset(dataset, native_type, len)?.data = DatasetData::Memory(buffer);
        Ok(())
    }

    fn read_flat(
        &self,
        dataset: &DatasetId,
        native_type: DataType,
    ) -> Result<Vec<u8>, ContainerError> {
        let path = dataset.path();
        let dataset = self.dataset(path)?;
        if dataset.data_type != native_type {
            return Err(ContainerError::TypeMismatch {
                path: path.to_string(),
                stored: dataset.data_type.as_str(),
                native: native_type.as_str(),
            });
        }

        match &dataset.data {
            DatasetData::Memory(data) => Ok(data.clone()),
            DatasetData::Zeroed { len } => Ok(vec![0u8; *len as usize]),
            DatasetData::Backing { offset, len } => {
                let mut data = vec![0u8; *len as usize];
                self.read_at(*offset, &mut data)?;
                Ok(data)
            }
        }
    }

    fn open_dataset(&self, path: &str) -> Result<DatasetId, ContainerError> {
        let dataset = self.dataset(path)?;
        Ok(DatasetId::new(path.to_string(), dataset.data_type))
    }

    fn dataset_len(&self, path: &str) -> Result<u64, ContainerError> {
        Ok(self.dataset(path)?.len())
    }

    fn read_block(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, ContainerError> {
        let dataset = self.dataset(path)?;
        let len = dataset.len();
        if offset >= len {
            return Ok(0);
        }
        let count = (len - offset).min(buf.len() as u64) as usize;

        match &dataset.data {
            DatasetData::Memory(data) => {
                let start = offset as usize;
                buf[..count].copy_from_slice(&data[start..start + count]);
                Ok(count)
            }
            DatasetData::Zeroed { .. } => {
                buf[..count].fill(0);
                Ok(count)
            }
            DatasetData::Backing { offset: base, .. } => {
                self.read_at(base + offset, &mut buf[..count])
            }
        }
    }

    fn get_attribute(
        &self,
        path: &str,
        name: &str,
    ) -> Result<Option<AttributeValue>, ContainerError> {
        let node = self.node(path)?;
        Ok(node
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone()))
    }

    fn set_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), ContainerError> {
        let node = self.node_mut(path)?;
        match node.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => node.attributes.push((name.to_string(), value)),
        }
        Ok(())
    }
}

fn encode_node<W: Write>(
    writer: &mut W,
    node: &Node,
    backing: Option<&File>,
) -> Result<(), ContainerError> {
    let tag = match node.body {
        NodeBody::Group(_) => TAG_GROUP,
        NodeBody::Dataset(_) => TAG_DATASET,
        NodeBody::SoftLink(_) => TAG_SOFT_LINK,
    };
    writer.write_all(&[tag])?;

    encode_u64(writer, node.attributes.len() as u64)?;
    for (name, value) in &node.attributes {
        encode_str(writer, name)?;
        match value {
            AttributeValue::Int(v) => {
                writer.write_all(&[VALUE_INT])?;
                encode_i64(writer, *v)?;
            }
            AttributeValue::Str(s) => {
                writer.write_all(&[VALUE_STR])?;
                encode_str(writer, s)?;
            }
        }
    }

    match &node.body {
        NodeBody::Group(children) => {
            encode_u64(writer, children.len() as u64)?;
            for (name, child) in children {
                encode_str(writer, name)?;
                encode_node(writer, child, backing)?;
            }
        }
        NodeBody::SoftLink(target) => encode_str(writer, target)?,
        NodeBody::Dataset(dataset) => {
            writer.write_all(&[dataset.data_type as u8])?;
            encode_u64(writer, dataset.dims.len() as u64)?;
            for dim in &dataset.dims {
                encode_u64(writer, *dim)?;
            }
            encode_u64(writer, dataset.block_dims.len() as u64)?;
            for dim in &dataset.block_dims {
                encode_u64(writer, *dim)?;
            }
            let deflate = match dataset.features.deflate_level {
                Some(level) => level + 1,
                None => 0,
            };
            writer.write_all(&[deflate, dataset.features.shuffle as u8])?;

            encode_u64(writer, dataset.len())?;
            match &dataset.data {
                DatasetData::Memory(data) => writer.write_all(data)?,
                DatasetData::Zeroed { len } => {
                    std::io::copy(&mut std::io::repeat(0).take(*len), writer)?;
                }
                DatasetData::Backing { offset, len } => {
                    let file = backing.ok_or_else(|| {
                        ContainerError::Format("dataset without backing file".to_string())
                    })?;
                    copy_range(file, *offset, *len, writer)?;
                }
            }
        }
    }

    Ok(())
}

fn copy_range<W: Write>(
    file: &File,
    mut offset: u64,
    len: u64,
    writer: &mut W,
) -> Result<(), ContainerError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let end = offset + len;
    while offset < end {
        let count = (end - offset).min(buffer.len() as u64) as usize;
        file.read_exact_at(&mut buffer[..count], offset)?;
        writer.write_all(&buffer[..count])?;
        offset += count as u64;
    }
    Ok(())
}

fn decode_count<R: Read>(reader: &mut R) -> Result<u64, ContainerError> {
    let count = decode_u64(reader)?;
    if count > MAX_ENTRIES {
        return Err(ContainerError::Format(format!(
            "object count {count} exceeds limit"
        )));
    }
    Ok(count)
}

fn decode_node<R: Read + Seek>(
    reader: &mut BufReader<R>,
    depth: usize,
) -> Result<Node, ContainerError> {
    if depth > MAX_DEPTH {
        return Err(ContainerError::Format(format!(
            "objects nested deeper than {MAX_DEPTH} levels"
        )));
    }

    let tag = decode_u8(reader)?;

    let attr_count = decode_count(reader)?;
    let mut attributes = Vec::with_capacity(attr_count as usize);
    for _ in 0..attr_count {
        let name = decode_str(reader)?;
        let value = match decode_u8(reader)? {
            VALUE_INT => AttributeValue::Int(decode_i64(reader)?),
            VALUE_STR => AttributeValue::Str(decode_str(reader)?),
            other => {
                return Err(ContainerError::Format(format!(
                    "invalid attribute value tag '{}'",
                    char::from(other)
                )))
            }
        };
        attributes.push((name, value));
    }

    let body = match tag {
        TAG_GROUP => {
            let count = decode_count(reader)?;
            let mut children = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = decode_str(reader)?;
                if name.is_empty() || name.contains('/') || name == "." || name == ".." {
                    return Err(ContainerError::Format(format!(
                        "invalid object name {name:?}"
                    )));
                }
                children.push((name, decode_node(reader, depth + 1)?));
            }
            NodeBody::Group(children)
        }
        TAG_SOFT_LINK => NodeBody::SoftLink(decode_str(reader)?),
        TAG_DATASET => {
            let data_type = DataType::try_from(decode_u8(reader)?)?;
            let rank = decode_count(reader)?;
            let mut dims = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                dims.push(decode_u64(reader)?);
            }
            let block_rank = decode_count(reader)?;
            let mut block_dims = Vec::with_capacity(block_rank as usize);
            for _ in 0..block_rank {
                block_dims.push(decode_u64(reader)?);
            }
            let deflate = decode_u8(reader)?;
            let shuffle = decode_u8(reader)? != 0;
            let features = StorageFeatures {
                deflate_level: deflate.checked_sub(1),
                shuffle,
            };

            let len = decode_u64(reader)?;
            let offset = reader.stream_position()?;
            let len_i64 = i64::try_from(len)
                .map_err(|_| ContainerError::Format(format!("dataset length {len} too large")))?;
            reader.seek_relative(len_i64)?;

            NodeBody::Dataset(Dataset {
                data_type,
                dims,
                block_dims,
                features,
                data: DatasetData::Backing { offset, len },
            })
        }
        other => {
            return Err(ContainerError::Format(format!(
                "invalid object tag '{}'",
                char::from(other)
            )))
        }
    };

    Ok(Node { attributes, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContainerFile {
        let mut container = ContainerFile::new();
        container.create_group("/dir/sub").unwrap();
        let id = container
            .create_or_open_dataset(
                "/dir/data",
                DataType::U8,
                &[5],
                &[4],
                &StorageFeatures::deflate(6),
            )
            .unwrap();
        container.write_flat(&id, DataType::U8, b"hello").unwrap();
        container.create_soft_link("/dir/link", "data").unwrap();
        container
            .set_attribute("/dir/data", "mode", AttributeValue::Int(0o644))
            .unwrap();
        container
            .set_attribute("/dir", "owner", "root".into())
            .unwrap();
        container
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let container = sample();
        let children = container.list_children("/dir").unwrap();
        assert_eq!(
            children,
            vec![
                ("sub".to_string(), ObjectKind::Group),
                ("data".to_string(), ObjectKind::Dataset),
                ("link".to_string(), ObjectKind::SoftLink),
            ]
        );
    }

    #[test]
    fn test_insert_errors() {
        let mut container = sample();
        assert!(matches!(
            container.create_soft_link("/dir/link", "x"),
            Err(ContainerError::AlreadyExists(_))
        ));
        assert!(matches!(
            container.create_soft_link("/missing/link", "x"),
            Err(ContainerError::NotFound(_))
        ));
        assert!(matches!(
            container.create_group("/dir/data/below"),
            Err(ContainerError::WrongKind { .. })
        ));
        let id = container.open_dataset("/dir/data").unwrap();
        assert!(matches!(
            container.write_flat(&id, DataType::U8, b"too long"),
            Err(ContainerError::SizeMismatch { .. })
        ));
        assert!(matches!(
            container.read_flat(&id, DataType::I32),
            Err(ContainerError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.h5ar");

        let mut container = sample();
        container.save(&path).unwrap();

        let reopened = ContainerFile::open(&path).unwrap();
        assert_eq!(reopened.object_kind("/dir/sub").unwrap(), Some(ObjectKind::Group));
        assert_eq!(reopened.soft_link_target("/dir/link").unwrap(), "data");
        assert_eq!(
            reopened.get_attribute("/dir/data", "mode").unwrap(),
            Some(AttributeValue::Int(0o644))
        );
        assert_eq!(
            reopened.get_attribute("/dir", "owner").unwrap(),
            Some(AttributeValue::Str("root".to_string()))
        );
        assert_eq!(reopened.dataset_len("/dir/data").unwrap(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(reopened.read_block("/dir/data", 0, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(reopened.read_block("/dir/data", 3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(reopened.read_block("/dir/data", 5, &mut buf).unwrap(), 0);

        let id = reopened.open_dataset("/dir/data").unwrap();
        assert_eq!(reopened.read_flat(&id, DataType::U8).unwrap(), b"hello");
    }

    #[test]
    fn test_resave_opened_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.h5ar");

        sample().save(&path).unwrap();

        let mut container = ContainerFile::open(&path).unwrap();
        container.create_group("/other").unwrap();
        container.save(&path).unwrap();

        let reopened = ContainerFile::open(&path).unwrap();
        assert_eq!(reopened.object_kind("/other").unwrap(), Some(ObjectKind::Group));
        let id = reopened.open_dataset("/dir/data").unwrap();
        assert_eq!(reopened.read_flat(&id, DataType::U8).unwrap(), b"hello");
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.h5ar");
        std::fs::write(&path, b"not a container").unwrap();
        assert!(matches!(
            ContainerFile::open(&path),
            Err(ContainerError::Format(_))
        ));
    }

    #[test]
    fn test_open_rejects_deep_nesting() {
        let mut data = H5AR_CONTAINER_MAGIC_1_0.to_vec();
        for _ in 0..=MAX_DEPTH {
            data.push(TAG_GROUP);
            encode_u64(&mut data, 0).unwrap();
            encode_u64(&mut data, 1).unwrap();
            encode_str(&mut data, "a").unwrap();
        }
        data.push(TAG_GROUP);
        encode_u64(&mut data, 0).unwrap();
        encode_u64(&mut data, 0).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.h5ar");
        std::fs::write(&path, &data).unwrap();
        assert!(matches!(
            ContainerFile::open(&path),
            Err(ContainerError::Format(_))
        ));
    }

    #[test]
    fn test_unwritten_dataset_reads_zeros() {
        let mut container = ContainerFile::new();
        let features = StorageFeatures::UNCOMPRESSED;
        container
            .create_or_open_dataset("/zero", DataType::U8, &[3], &[], &features)
            .unwrap();
        let id = container
            .create_or_open_dataset("/owned", DataType::U8, &[4], &[], &features)
            .unwrap();
        container
            .write_flat_owned(&id, DataType::U8, b"data".to_vec())
            .unwrap();
        assert!(matches!(
            container.write_flat_owned(&id, DataType::U8, b"toolong".to_vec()),
            Err(ContainerError::SizeMismatch { expected: 4, .. })
        ));

        let mut buf = [0xffu8; 8];
        assert_eq!(container.read_block("/zero", 0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0, 0, 0]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.h5ar");
        container.save(&path).unwrap();

        let reopened = ContainerFile::open(&path).unwrap();
        let id = reopened.open_dataset("/zero").unwrap();
        assert_eq!(reopened.read_flat(&id, DataType::U8).unwrap(), vec![0u8; 3]);
        let id = reopened.open_dataset("/owned").unwrap();
        assert_eq!(reopened.read_flat(&id, DataType::U8).unwrap(), b"data");
    }
}
