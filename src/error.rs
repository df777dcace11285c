use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid permission level: {0}")]
    InvalidLevel(String),

    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    #[error("object too large: {size} bytes exceeds maximum of {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("directory service unavailable")]
    DirectoryUnavailable,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, Error>;
