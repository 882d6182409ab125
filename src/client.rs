// src/client.rs
//
// The storage capability consumed by every driver. The benchmark core never
// speaks HTTP/S3 itself; it is handed an `ObjectStoreClient` and records
// whatever timing the client reports back.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage-side failure classification.
///
/// `Transient` is recorded on the operation and the worker continues;
/// `Fatal` aborts prepare; `NotFound` is surfaced to drivers that care
/// (versioned deletes racing each other treat it as transient).
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Fatal(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Bytes moved plus the instant the first body byte arrived, when known.
#[derive(Debug, Clone, Copy)]
pub struct Fetched {
    pub bytes: u64,
    pub first_byte: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PutResult {
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub size: u64,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Reference to one object in a batch removal.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    pub key: String,
    pub version_id: Option<String>,
}

/// Injected S3 wire capability.
///
/// Every method returns bytes moved and, where meaningful, the first-byte
/// instant; failures carry a `StorageError` classification. Per-request
/// timeouts are the client's own concern.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), StorageError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> Result<PutResult, StorageError>;

    /// `range` is an inclusive byte range `(offset, length)`.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
        version_id: Option<&str>,
    ) -> Result<Fetched, StorageError>;

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, StorageError>;

    async fn remove_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn remove_objects(
        &self,
        bucket: &str,
        objects: &[ObjectRef],
    ) -> Result<(), StorageError>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError>;

    /// Run an S3 Select expression and drain the result stream.
    async fn select_object_content(
        &self,
        bucket: &str,
        key: &str,
        expression: &str,
    ) -> Result<Fetched, StorageError>;

    /// host:port label stamped on every record issued through this client.
    fn endpoint(&self) -> String;
}

pub type SharedClient = Arc<dyn ObjectStoreClient>;

/// In-memory implementation, used by the test suites and dry runs.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Stored {
        versions: Vec<(String, Vec<u8>)>,
    }

    /// A process-local object store. Optionally sleeps per request to give
    /// recorded operations a non-zero, stable duration.
    pub struct InMemoryClient {
        buckets: Mutex<BTreeMap<String, BTreeMap<String, Stored>>>,
        latency: Duration,
        label: String,
        next_version: Mutex<u64>,
    }

    impl InMemoryClient {
        pub fn new() -> Self {
            Self::with_latency(Duration::from_millis(1))
        }

        pub fn with_latency(latency: Duration) -> Self {
            InMemoryClient {
                buckets: Mutex::new(BTreeMap::new()),
                latency,
                label: "mem:0".to_string(),
                next_version: Mutex::new(1),
            }
        }

        pub fn object_count(&self, bucket: &str) -> usize {
            self.buckets
                .lock()
                .get(bucket)
                .map(|b| b.len())
                .unwrap_or(0)
        }

        async fn simulate_io(&self) {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
        }

        fn new_version(&self) -> String {
            let mut v = self.next_version.lock();
            let id = format!("v{:08}", *v);
            *v += 1;
            id
        }
    }

    impl Default for InMemoryClient {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ObjectStoreClient for InMemoryClient {
        async fn make_bucket(&self, bucket: &str, _region: &str) -> Result<(), StorageError> {
            self.buckets.lock().entry(bucket.to_string()).or_default();
            Ok(())
        }

        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            data: &[u8],
        ) -> Result<PutResult, StorageError> {
            self.simulate_io().await;
            let version = self.new_version();
            let mut buckets = self.buckets.lock();
            let b = buckets
                .get_mut(bucket)
                .ok_or_else(|| StorageError::Fatal(format!("no such bucket {bucket}")))?;
            b.entry(key.to_string())
                .or_default()
                .versions
                .push((version.clone(), data.to_vec()));
            Ok(PutResult {
                version_id: Some(version),
            })
        }

        async fn get_object(
            &self,
            bucket: &str,
            key: &str,
            range: Option<(u64, u64)>,
            version_id: Option<&str>,
        ) -> Result<Fetched, StorageError> {
            self.simulate_io().await;
            let buckets = self.buckets.lock();
            let stored = buckets
                .get(bucket)
                .and_then(|b| b.get(key))
                .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))?;
            let data = match version_id {
                Some(v) => {
                    &stored
                        .versions
                        .iter()
                        .find(|(id, _)| id == v)
                        .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}?{v}")))?
                        .1
                }
                None => {
                    &stored
                        .versions
                        .last()
                        .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))?
                        .1
                }
            };
            let bytes = match range {
                Some((off, len)) => {
                    let off = off.min(data.len() as u64);
                    len.min(data.len() as u64 - off)
                }
                None => data.len() as u64,
            };
            Ok(Fetched {
                bytes,
                first_byte: Some(Utc::now()),
            })
        }

        async fn stat_object(
            &self,
            bucket: &str,
            key: &str,
            version_id: Option<&str>,
        ) -> Result<ObjectInfo, StorageError> {
            self.simulate_io().await;
            let buckets = self.buckets.lock();
            let stored = buckets
                .get(bucket)
                .and_then(|b| b.get(key))
                .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))?;
            let (id, data) = match version_id {
                Some(v) => stored
                    .versions
                    .iter()
                    .find(|(id, _)| id == v)
                    .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}?{v}")))?,
                None => stored
                    .versions
                    .last()
                    .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))?,
            };
            Ok(ObjectInfo {
                size: data.len() as u64,
                version_id: Some(id.clone()),
            })
        }

        async fn remove_object(
            &self,
            bucket: &str,
            key: &str,
            version_id: Option<&str>,
        ) -> Result<(), StorageError> {
            self.simulate_io().await;
            let mut buckets = self.buckets.lock();
            let b = buckets
                .get_mut(bucket)
                .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;
            match version_id {
                Some(v) => {
                    if let Some(stored) = b.get_mut(key) {
                        stored.versions.retain(|(id, _)| id != v);
                        if stored.versions.is_empty() {
                            b.remove(key);
                        }
                    }
                }
                None => {
                    b.remove(key);
                }
            }
            Ok(())
        }

        async fn remove_objects(
            &self,
            bucket: &str,
            objects: &[ObjectRef],
        ) -> Result<(), StorageError> {
            for obj in objects {
                self.remove_object(bucket, &obj.key, obj.version_id.as_deref())
                    .await?;
            }
            Ok(())
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ObjectEntry>, StorageError> {
            self.simulate_io().await;
            let buckets = self.buckets.lock();
            let b = buckets
                .get(bucket)
                .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;
            Ok(b.iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, s)| ObjectEntry {
                    key: k.clone(),
                    size: s.versions.last().map(|(_, d)| d.len() as u64).unwrap_or(0),
                })
                .collect())
        }

        async fn select_object_content(
            &self,
            bucket: &str,
            key: &str,
            _expression: &str,
        ) -> Result<Fetched, StorageError> {
            // Scans the whole object, returns it unfiltered.
            self.get_object(bucket, key, None, None).await
        }

        fn endpoint(&self) -> String {
            self.label.clone()
        }
    }
}
