//! S3-compatible object store (AWS S3, MinIO, Cloudflare R2).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::keys::FOLDER_MARKERS;
use crate::store::{ObjectInfo, ObjectStore};

/// Region that rejects an explicit location constraint on bucket creation.
const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Custom endpoint (MinIO, R2). `None` uses AWS.
    pub endpoint_url: Option<String>,
    /// Static access key; the default credential chain is used when unset
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    pub fn new(bucket_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            region: region.into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint_url: Option<String>) -> Self {
        self.endpoint_url = endpoint_url.filter(|e| !e.is_empty());
        self
    }

    /// Pick up static credentials from `S3_ACCESS_KEY_ID` / `S3_SECRET_ACCESS_KEY`
    /// when both are present.
    pub fn with_env_credentials(mut self) -> Self {
        if let (Ok(key), Ok(secret)) = (
            std::env::var("S3_ACCESS_KEY_ID"),
            std::env::var("S3_SECRET_ACCESS_KEY"),
        ) {
            self.access_key_id = Some(key);
            self.secret_access_key = Some(secret);
        }
        self
    }
}

/// S3-backed object store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

impl S3Store {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket_name.trim().is_empty() {
            return Err(StorageError::config_error("bucket name is empty"));
        }

        let region = Region::new(config.region.clone());
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret, None, None, "static");
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name,
            region: config.region,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Make sure the bucket exists, creating it and its folder markers when
    /// it does not.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        let head = self.client.head_bucket().bucket(&self.bucket).send().await;
        let err = match head {
            Ok(_) => {
                info!(bucket = %self.bucket, "Bucket exists");
                return Ok(());
            }
            Err(e) => e,
        };

        let missing = err
            .as_service_error()
            .map(|se| se.is_not_found())
            .unwrap_or(false);
        if !missing {
            return Err(StorageError::BucketSetup(format!(
                "checking bucket {}: {}",
                self.bucket, err
            )));
        }

        info!(bucket = %self.bucket, region = %self.region, "Creating bucket");
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| StorageError::BucketSetup(format!("creating bucket {}: {}", self.bucket, e)))?;

        for marker in FOLDER_MARKERS {
            self.put_bytes(marker, Vec::new(), "application/x-directory").await?;
        }
        info!(bucket = %self.bucket, "Created bucket and folder markers");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{key}: {e}")))?;

        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        debug!("Downloading {}", key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    return Ok(None);
                }
                return Err(StorageError::download_failed(format!("{key}: {e}")));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(format!("{key}: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(Some(bytes))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(format!("{key}: {e}")))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        debug!("Listing objects with prefix: {}", prefix);

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::list_failed(format!("{prefix}: {e}")))?;

            for obj in response.contents() {
                let key = obj.key().unwrap_or_default();
                // Folder markers are bookkeeping, not records.
                if key.is_empty() || key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| t.to_millis().ok())
                        .map(|ms| ms.max(0) as u64),
                });
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    warn!(prefix, "Truncated listing without continuation token");
                    break;
                }
            } else {
                break;
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn any_with_prefix(&self, prefix: &str) -> StorageResult<bool> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(2)
            .send()
            .await
            .map_err(|e| StorageError::list_failed(format!("{prefix}: {e}")))?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .any(|k| !k.ends_with('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_endpoint_filtering() {
        let config = S3Config::new("bucket", "eu-west-1").with_endpoint(Some(String::new()));
        assert!(config.endpoint_url.is_none());

        let config = S3Config::new("bucket", "auto").with_endpoint(Some("http://localhost:9000".into()));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
    }

    #[tokio::test]
    async fn test_empty_bucket_name_is_rejected() {
        let result = S3Store::new(S3Config::new("  ", "us-east-1")).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore = "requires S3-compatible storage"]
    async fn test_s3_round_trip() {
        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "youtube-transcripts".into());
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.into());
        let config = S3Config::new(bucket, region)
            .with_endpoint(std::env::var("S3_ENDPOINT_URL").ok())
            .with_env_credentials();
        let store = S3Store::new(config).await.expect("client");
        store.ensure_bucket().await.expect("bucket");

        let key = "workers/selftest.json";
        store.put_bytes(key, b"{}".to_vec(), "application/json").await.unwrap();
        assert_eq!(store.get_bytes(key).await.unwrap(), Some(b"{}".to_vec()));
        assert!(store.any_with_prefix("workers/").await.unwrap());
        store.delete(key).await.unwrap();
        assert_eq!(store.get_bytes(key).await.unwrap(), None);
    }
}
