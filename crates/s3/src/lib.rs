//! cs-s3: S3 adapter for the cs cloud sync client
//!
//! Implements the `ObjectStore` and `TransferPrimitive` traits from cs-core
//! on top of aws-sdk-s3.

pub mod checkpoint;
pub mod client;
pub mod transfer;

pub use checkpoint::{DEFAULT_BIGFILE_THRESHOLD, DEFAULT_PART_SIZE, MIN_PART_SIZE};
pub use client::S3Client;
pub use transfer::{DEFAULT_CHECKPOINT_DIR, S3Transfer};
