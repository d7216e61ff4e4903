use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Named byte-blob storage shared by the API, workers and the reaper.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Fetch the full blob.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete a blob. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Client for an S3-compatible object store (R2, MinIO, AWS).
pub struct S3BlobStore {
    bucket: Box<Bucket>,
}

impl S3BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        check_status(key, response.status_code())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        match response.status_code() {
            404 => Err(StorageError::NotFound(key.to_string())),
            code => {
                check_status(key, code)?;
                Ok(response.to_vec())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(key).await?;
        match response.status_code() {
            404 => Ok(()),
            code => check_status(key, code),
        }
    }
}

fn check_status(key: &str, code: u16) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            code,
        })
    }
}

/// In-process blob store for tests and local runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock_blobs().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock_blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock_blobs().get(key).map(|(_, ct)| ct.clone())
    }

    /// Make every operation on `key` fail with an unreachable-store error.
    pub fn fail_key(&self, key: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string());
    }

    fn check_reachable(&self, key: &str) -> Result<(), StorageError> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(key) {
            return Err(StorageError::Unavailable(format!("simulated failure for {}", key)));
        }
        Ok(())
    }

    fn lock_blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, String)>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.check_reachable(key)?;
        self.lock_blobs()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_reachable(key)?;
        self.lock_blobs()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_reachable(key)?;
        self.lock_blobs().remove(key);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store returned HTTP {code} for {key}")]
    Status { key: String, code: u16 },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
