//! Object storage for the vscan worker fleet.
//!
//! This crate provides:
//! - The [`ObjectStore`] seam used by every component that persists state
//! - An S3-compatible implementation (AWS S3, MinIO, Cloudflare R2)
//! - An in-memory implementation with fault injection for tests
//! - The bucket key layout

pub mod error;
pub mod keys;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};
pub use store::{get_json, put_json, ObjectInfo, ObjectStore};
