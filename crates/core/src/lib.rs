//! cs-core: Core library for the cs cloud sync client
//!
//! This crate provides:
//! - Configuration and alias management
//! - Path parsing
//! - Storage traits (`ObjectStore`, `TransferPrimitive`)
//! - The directory synchronization engine
//!
//! It does not depend on any S3 SDK, so the engine can be driven by
//! in-memory stores in tests.

pub mod alias;
pub mod config;
pub mod error;
pub mod path;
pub mod retry;
pub mod sync;
pub mod traits;

pub use alias::{Alias, AliasManager, RetryConfig};
pub use config::{Config, ConfigManager};
pub use error::{Error, Result};
pub use path::{ParsedPath, RemotePath, parse_path};
pub use retry::{RetryBuilder, is_retryable_error, retry_with_backoff};
pub use traits::{
    DeleteObjectsResult, ListOptions, ListResult, ObjectInfo, ObjectStore, TransferPrimitive,
};
