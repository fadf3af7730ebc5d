//! In-memory object store.
//!
//! Behaves like a single bucket: flat keys, prefix listing, last write wins.
//! Listings leave out folder markers, as `S3Store` does.
//! Faults can be injected per operation and key prefix to reproduce the
//! partial-failure windows of a real store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectInfo, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    last_modified: u64,
}

#[derive(Debug, Default)]
struct Faults {
    puts: Vec<String>,
    deletes: Vec<String>,
    gets: Vec<String>,
    lists: Vec<String>,
}

fn matches_any(prefixes: &[String], key: &str) -> bool {
    prefixes.iter().any(|p| key.starts_with(p.as_str()))
}

/// Object store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put to a key under `prefix` fail.
    pub async fn fail_puts_under(&self, prefix: impl Into<String>) {
        self.faults.lock().await.puts.push(prefix.into());
    }

    /// Make every delete of a key under `prefix` fail.
    pub async fn fail_deletes_under(&self, prefix: impl Into<String>) {
        self.faults.lock().await.deletes.push(prefix.into());
    }

    /// Make every read of a key under `prefix` fail.
    pub async fn fail_gets_under(&self, prefix: impl Into<String>) {
        self.faults.lock().await.gets.push(prefix.into());
    }

    /// Make listing any prefix that starts with `prefix` fail.
    pub async fn fail_lists_under(&self, prefix: impl Into<String>) {
        self.faults.lock().await.lists.push(prefix.into());
    }

    /// Remove every injected fault.
    pub async fn clear_faults(&self) {
        *self.faults.lock().await = Faults::default();
    }

    /// All keys currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    /// Keys under `prefix`, sorted.
    pub async fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Content type recorded for `key`.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        if matches_any(&self.faults.lock().await.puts, key) {
            return Err(StorageError::upload_failed(format!("injected put fault: {key}")));
        }
        let object = StoredObject {
            data,
            content_type: content_type.to_string(),
            last_modified: Utc::now().timestamp_millis().max(0) as u64,
        };
        self.objects.write().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if matches_any(&self.faults.lock().await.gets, key) {
            return Err(StorageError::download_failed(format!("injected get fault: {key}")));
        }
        Ok(self.objects.read().await.get(key).map(|o| o.data.clone()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if matches_any(&self.faults.lock().await.deletes, key) {
            return Err(StorageError::delete_failed(format!("injected delete fault: {key}")));
        }
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        if matches_any(&self.faults.lock().await.lists, prefix) {
            return Err(StorageError::list_failed(format!("injected list fault: {prefix}")));
        }
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| !k.ends_with('/'))
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.data.len() as u64,
                last_modified: Some(o.last_modified),
            })
            .collect())
    }

    async fn any_with_prefix(&self, prefix: &str) -> StorageResult<bool> {
        Ok(!self.list(prefix).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{get_json, put_json};

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put_bytes("a/b.txt", b"hello".to_vec(), "text/plain").await.unwrap();

        assert_eq!(store.get_bytes("a/b.txt").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.content_type("a/b.txt").await.as_deref(), Some("text/plain"));

        store.delete("a/b.txt").await.unwrap();
        assert_eq!(store.get_bytes("a/b.txt").await.unwrap(), None);
        // Deleting again is fine.
        store.delete("a/b.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        for key in ["results/b/2.json", "results/a/1.json", "results/ab/3.json", "workers/w.json"] {
            store.put_bytes(key, vec![1], "application/json").await.unwrap();
        }

        let listed: Vec<_> = store
            .list("results/a/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, vec!["results/a/1.json".to_string()]);

        assert!(store.any_with_prefix("results/").await.unwrap());
        assert!(!store.any_with_prefix("results/c/").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_leaves_out_folder_markers() {
        let store = MemoryStore::new();
        store.put_bytes("jobs/queued/", Vec::new(), "application/x-directory").await.unwrap();
        assert!(store.list("jobs/queued/").await.unwrap().is_empty());
        assert!(!store.any_with_prefix("jobs/").await.unwrap());

        store.put_bytes("jobs/queued/j.json", b"{}".to_vec(), "application/json").await.unwrap();
        let listed: Vec<_> = store
            .list("jobs/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, vec!["jobs/queued/j.json".to_string()]);
        assert!(store.contains("jobs/queued/").await);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let store = MemoryStore::new();
        put_json(&store, "jobs/queued/j.json", &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        store.fail_deletes_under("jobs/queued/").await;
        assert!(matches!(
            store.delete("jobs/queued/j.json").await,
            Err(StorageError::DeleteFailed(_))
        ));
        assert!(store.contains("jobs/queued/j.json").await);

        store.fail_puts_under("jobs/").await;
        assert!(store.put_bytes("jobs/failed/j.json", vec![], "x").await.is_err());

        store.clear_faults().await;
        store.delete("jobs/queued/j.json").await.unwrap();
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_json_reports_corrupt_objects() {
        let store = MemoryStore::new();
        store.put_bytes("x.json", b"{not json".to_vec(), "application/json").await.unwrap();

        let result: StorageResult<Option<serde_json::Value>> = get_json(&store, "x.json").await;
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));

        let missing: Option<serde_json::Value> = get_json(&store, "missing.json").await.unwrap();
        assert!(missing.is_none());
    }
}
