//! Error types for the backup server infrastructure

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::CodecError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Infrastructure errors: storage, I/O, configuration, wire framing
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Corrupt stored record: {0}")]
    CorruptRecord(String),

    #[error("Invalid file name for storage: {0}")]
    InvalidStoragePath(String),

    #[error("Startup failed: {0}")]
    Startup(String),
}
