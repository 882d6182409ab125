// src/s3.rs
//
// aws-sdk-s3 implementation of the ObjectStoreClient capability. One client
// is built per configured endpoint; the driver layer round-robins across
// them so per-endpoint throughput can be broken out at analysis time.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, CsvInput, CsvOutput, Delete,
    ExpressionType, FileHeaderInfo, InputSerialization, ObjectIdentifier, OutputSerialization,
    SelectObjectContentEventStream,
};
use chrono::Utc;

use crate::client::{
    Fetched, ObjectEntry, ObjectInfo, ObjectRef, ObjectStoreClient, PutResult, StorageError,
};
use crate::config::ClientConfig;

pub struct S3Client {
    inner: s3::Client,
    label: String,
}

impl S3Client {
    /// Build one client per host in the configuration.
    pub async fn connect_all(cfg: &ClientConfig) -> Result<Vec<S3Client>, StorageError> {
        let base = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut out = Vec::with_capacity(cfg.hosts.len());
        for host in &cfg.hosts {
            let scheme = if cfg.tls { "https" } else { "http" };
            let creds = s3::config::Credentials::new(
                cfg.access_key.clone(),
                cfg.secret_key.clone(),
                None,
                None,
                "s3surge",
            );
            let conf = s3::config::Builder::from(&base)
                .region(s3::config::Region::new(cfg.region.clone()))
                .endpoint_url(format!("{scheme}://{host}"))
                .credentials_provider(creds)
                .force_path_style(true)
                .build();
            out.push(S3Client {
                inner: s3::Client::from_conf(conf),
                label: host.clone(),
            });
        }
        Ok(out)
    }
}

/// Map an SDK failure onto the three storage error classes.
fn classify<E, R>(err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(se) => {
            let code = se.err().code().unwrap_or_default();
            let msg = format!("{code}: {}", se.err().message().unwrap_or_default());
            match code {
                "NoSuchKey" | "NoSuchBucket" | "NoSuchVersion" | "NotFound" => {
                    StorageError::NotFound(msg)
                }
                "SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable"
                | "Throttling" | "ThrottlingException" => StorageError::Transient(msg),
                _ => StorageError::Fatal(msg),
            }
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(format!("{err:?}"))
        }
        _ => StorageError::Fatal(format!("{err:?}")),
    }
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), StorageError> {
        let mut req = self.inner.create_bucket().bucket(bucket);
        if !region.is_empty() && region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        match req.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                // A bucket that already exists is a known state, not a failure.
                if let SdkError::ServiceError(se) = &err {
                    let code = se.err().code().unwrap_or_default();
                    if code == "BucketAlreadyOwnedByYou" || code == "BucketAlreadyExists" {
                        return Ok(());
                    }
                }
                Err(classify(err))
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
    ) -> Result<PutResult, StorageError> {
        let out = self
            .inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(PutResult {
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
        version_id: Option<&str>,
    ) -> Result<Fetched, StorageError> {
        let mut req = self.inner.get_object().bucket(bucket).key(key);
        if let Some((off, len)) = range {
            req = req.range(format!("bytes={}-{}", off, off + len.saturating_sub(1)));
        }
        if let Some(v) = version_id {
            req = req.version_id(v);
        }
        let mut out = req.send().await.map_err(classify)?;
        let mut bytes = 0u64;
        let mut first_byte = None;
        while let Some(chunk) = out
            .body
            .try_next()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?
        {
            if first_byte.is_none() {
                first_byte = Some(Utc::now());
            }
            bytes += chunk.len() as u64;
        }
        Ok(Fetched { bytes, first_byte })
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, StorageError> {
        let mut req = self.inner.head_object().bucket(bucket).key(key);
        if let Some(v) = version_id {
            req = req.version_id(v);
        }
        let out = req.send().await.map_err(classify)?;
        Ok(ObjectInfo {
            size: out.content_length().unwrap_or(0) as u64,
            version_id: out.version_id().map(str::to_string),
        })
    }

    async fn remove_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut req = self.inner.delete_object().bucket(bucket).key(key);
        if let Some(v) = version_id {
            req = req.version_id(v);
        }
        req.send().await.map_err(classify)?;
        Ok(())
    }

    async fn remove_objects(
        &self,
        bucket: &str,
        objects: &[ObjectRef],
    ) -> Result<(), StorageError> {
        let mut ids = Vec::with_capacity(objects.len());
        for obj in objects {
            let mut b = ObjectIdentifier::builder().key(&obj.key);
            if let Some(v) = &obj.version_id {
                b = b.version_id(v);
            }
            ids.push(
                b.build()
                    .map_err(|e| StorageError::Fatal(e.to_string()))?,
            );
        }
        let delete = Delete::builder()
            .set_objects(Some(ids))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::Fatal(e.to_string()))?;
        self.inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut stream = self
            .inner
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        let mut entries = Vec::new();
        while let Some(page) = stream.next().await {
            let page = page.map_err(classify)?;
            for obj in page.contents() {
                entries.push(ObjectEntry {
                    key: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0) as u64,
                });
            }
        }
        Ok(entries)
    }

    async fn select_object_content(
        &self,
        bucket: &str,
        key: &str,
        expression: &str,
    ) -> Result<Fetched, StorageError> {
        let out = self
            .inner
            .select_object_content()
            .bucket(bucket)
            .key(key)
            .expression(expression)
            .expression_type(ExpressionType::Sql)
            .input_serialization(
                InputSerialization::builder()
                    .csv(
                        CsvInput::builder()
                            .file_header_info(FileHeaderInfo::Use)
                            .build(),
                    )
                    .build(),
            )
            .output_serialization(
                OutputSerialization::builder().csv(CsvOutput::builder().build()).build(),
            )
            .send()
            .await
            .map_err(classify)?;
        let mut payload = out.payload;
        let mut bytes = 0u64;
        let mut first_byte = None;
        while let Some(event) = payload
            .recv()
            .await
            .map_err(|e| StorageError::Transient(e.to_string()))?
        {
            if let SelectObjectContentEventStream::Records(records) = event {
                if let Some(data) = records.payload() {
                    if first_byte.is_none() {
                        first_byte = Some(Utc::now());
                    }
                    bytes += data.as_ref().len() as u64;
                }
            }
        }
        Ok(Fetched { bytes, first_byte })
    }

    fn endpoint(&self) -> String {
        self.label.clone()
    }
}
