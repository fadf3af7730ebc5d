//! The object store seam.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

/// Information about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub last_modified: Option<u64>,
}

/// Flat key/value object storage with prefix listing.
///
/// Every call is a single-object operation; there are no transactions and no
/// conditional writes. Callers compose multi-step updates out of these.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Read an object. `Ok(None)` when the key does not exist.
    async fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every object whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>>;

    /// Whether at least one object exists under `prefix`.
    async fn any_with_prefix(&self, prefix: &str) -> StorageResult<bool>;
}

/// Serialize `value` as JSON and store it at `key`.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    store.put_bytes(key, json, "application/json").await
}

/// Load and deserialize the JSON object at `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get_bytes(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}
