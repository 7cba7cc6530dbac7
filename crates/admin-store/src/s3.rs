//! [`ObjectStore`] backed by an S3-compatible bucket.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Credentials, Region},
    presigning::PresigningConfig,
    types::{Delete, ObjectIdentifier},
    Client,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::objects::{DeleteOutcome, ObjectError, ObjectStore, ObjectSummary, StorageKey, StoreError};

/// Connection settings for the bucket. Credentials fall back to the default
/// AWS provider chain when no static pair is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub async fn connect(settings: &S3Settings) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&shared);
        if let (Some(key_id), Some(secret)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            builder = builder.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "admin-static",
            ));
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        info!(bucket = %settings.bucket, region = %settings.region, "object store configured");
        Self::new(Client::from_conf(builder.build()), settings.bucket.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, keys), fields(bucket = %self.bucket, count = keys.len()))]
    async fn delete_objects(&self, keys: &[StorageKey]) -> Result<DeleteOutcome, StoreError> {
        let objects = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key.as_str())
                    .build()
                    .map_err(|err| StoreError::Invalid(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Quiet mode: the response lists failures only.
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|err| StoreError::Invalid(err.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| StoreError::transport("DeleteObjects", err))?;

        let errors: Vec<ObjectError> = output.errors().iter().map(object_error).collect();
        if !errors.is_empty() {
            warn!(failed = errors.len(), "bulk delete reported per-object failures");
        }
        Ok(DeleteOutcome { errors })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .into_paginator()
            .send();

        let mut summaries = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StoreError::transport("ListObjectsV2", err))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                summaries.push(ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }
        }
        debug!(count = summaries.len(), "listed objects");
        Ok(summaries)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::transport("GetObject", err)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::transport("GetObject body", err))?;
        Ok(body.into_bytes().to_vec())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn presign_put(
        &self,
        key: &StorageKey,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|err| StoreError::transport("PutObject presign", err))?;

        Ok(request.uri().to_string())
    }
}

fn object_error(error: &aws_sdk_s3::types::Error) -> ObjectError {
    ObjectError {
        key: error.key().unwrap_or_default().to_string(),
        code: error.code().unwrap_or_default().to_string(),
        message: error.message().unwrap_or_default().to_string(),
        version_id: error.version_id().map(str::to_string),
    }
}

fn to_chrono(value: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_error_copies_store_fields() {
        let error = aws_sdk_s3::types::Error::builder()
            .key("pfiles/a.png")
            .code("AccessDenied")
            .message("Access Denied")
            .build();

        let record = object_error(&error);
        assert_eq!(record.key, "pfiles/a.png");
        assert_eq!(record.code, "AccessDenied");
        assert_eq!(record.message, "Access Denied");
        assert!(record.version_id.is_none());
    }

    #[test]
    fn timestamps_convert_to_utc() {
        let value = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        let converted = to_chrono(&value).expect("in range");
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn static_credentials_and_endpoint_are_applied() {
        let store = S3ObjectStore::connect(&S3Settings {
            bucket: "tiles".into(),
            region: "eu-central-1".into(),
            endpoint: Some("http://127.0.0.1:9000".into()),
            access_key_id: Some("AKIDEXAMPLE".into()),
            secret_access_key: Some("secret".into()),
        })
        .await;

        let url = store
            .presign_put(
                &StorageKey::new(crate::objects::Visibility::Public, "a.png"),
                "image/png",
                Duration::from_secs(300),
            )
            .await
            .expect("presign");

        assert_eq!(store.bucket(), "tiles");
        assert!(url.starts_with("http://127.0.0.1:9000/tiles/files/a.png?"));
        assert!(url.contains("X-Amz-Expires=300"));
    }
}
