//! Error types for cs-core
//!
//! A single error enum is shared by the configuration layer, the storage
//! traits and the sync engine. Per-item sync failures are not errors of
//! the job; they are collected in the sync report instead.

use thiserror::Error;

/// Result type alias for cs-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by cs-core
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("{0}")]
    General(String),

    // ========== Sync: structural errors ==========
    /// Source and destination do not form a supported direction
    #[error("Invalid sync direction: {0}")]
    InvalidDirection(String),

    /// An include/exclude pattern is malformed or carries directory info
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidFilterPattern { pattern: String, reason: String },

    #[error("Sync limit exceeded: {found} entries, maximum is {limit}")]
    SyncLimitExceeded { limit: usize, found: usize },

    #[error("Backup path conflict: {0}")]
    BackupPathConflict(String),

    #[error("Destination is not a directory: {0}")]
    DestinationNotDirectory(String),

    #[error("Invalid backup directory: {0}")]
    InvalidBackupDir(String),

    // ========== Sync: enumeration errors ==========
    #[error("Failed to enumerate {location}: {message}")]
    Enumeration { location: String, message: String },
}

impl Error {
    /// Structural errors are detected before any mutation and abort the job
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::InvalidDirection(_)
                | Error::InvalidFilterPattern { .. }
                | Error::SyncLimitExceeded { .. }
                | Error::BackupPathConflict(_)
                | Error::DestinationNotDirectory(_)
                | Error::InvalidBackupDir(_)
        )
    }

    /// Wrap an error raised while listing one side of a sync job
    pub fn enumeration(location: impl std::fmt::Display, source: impl std::fmt::Display) -> Self {
        Error::Enumeration {
            location: location.to_string(),
            message: source.to_string(),
        }
    }
}
