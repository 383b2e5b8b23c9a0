/// The single error type of the container layer.
#[derive(thiserror::Error, Debug)]
pub enum ContainerError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("object {0:?} does not exist")]
    NotFound(String),
    #[error("object {0:?} already exists")]
    AlreadyExists(String),
    #[error("object {path:?} is not a {expected}")]
    WrongKind { path: String, expected: &'static str },
    #[error("invalid object path {0:?}")]
    InvalidPath(String),
    #[error("dataset {path:?} stores {stored} elements, got a {native} buffer")]
    TypeMismatch {
        path: String,
        stored: &'static str,
        native: &'static str,
    },
    #[error("dataset {path:?} holds {expected} bytes, got a buffer of {len} bytes")]
    SizeMismatch { path: String, expected: u64, len: u64 },
    #[error("corrupt container file - {0}")]
    Format(String),
}

impl ContainerError {
    /// Whether this error reports a missing object.
    pub fn not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}
