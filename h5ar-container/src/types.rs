use std::fmt;

use crate::ContainerError;

/// Kind of an object linked into a group.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Group,
    Dataset,
    SoftLink,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Group => "group",
            ObjectKind::Dataset => "dataset",
            ObjectKind::SoftLink => "soft link",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of a dataset, both as stored and as handed over in memory.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    U8 = b'B',
    I32 = b'i',
    I64 = b'l',
    F32 = b'f',
    F64 = b'd',
}

impl DataType {
    /// Size of a single element in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::U8 => "u8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = ContainerError;

    fn try_from(value: u8) -> Result<Self, ContainerError> {
        Ok(match value {
            b'B' => DataType::U8,
            b'i' => DataType::I32,
            b'l' => DataType::I64,
            b'f' => DataType::F32,
            b'd' => DataType::F64,
            _ => {
                return Err(ContainerError::Format(format!(
                    "invalid data type tag '{}'",
                    char::from(value)
                )))
            }
        })
    }
}

/// Storage properties requested when a dataset is created.
///
/// The container records these per dataset. Payloads are kept as they are, no
/// codec is applied when writing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageFeatures {
    /// Deflate level (0-9), `None` for uncompressed storage.
    pub deflate_level: Option<u8>,
    /// Byte shuffling before compression.
    pub shuffle: bool,
}

impl StorageFeatures {
    pub const UNCOMPRESSED: StorageFeatures = StorageFeatures {
        deflate_level: None,
        shuffle: false,
    };

    pub fn deflate(level: u8) -> Self {
        Self {
            deflate_level: Some(level.min(9)),
            shuffle: false,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.deflate_level.is_some()
    }
}

/// Typed value of an attribute attached to a container object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValue {
    Int(i64),
    Str(String),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            AttributeValue::Int(_) => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

/// Handle of an opened dataset.
///
/// Handles hold no resources of their own, dropping them is all the release
/// they need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetId {
    path: String,
    data_type: DataType,
}

impl DatasetId {
    pub(crate) fn new(path: String, data_type: DataType) -> Self {
        Self { path, data_type }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}
