//! Object-storage abstraction for the panel's binary files.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Namespace a stored file lives in. Public files are served directly from
/// the bucket; private ones are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn prefix(self) -> &'static str {
        match self {
            Visibility::Public => "files",
            Visibility::Private => "pfiles",
        }
    }

    /// Interprets the `isPublic` request flag: only a case-insensitive `true`
    /// selects public storage.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(value) if value.eq_ignore_ascii_case("true") => Visibility::Public,
            _ => Visibility::Private,
        }
    }

    pub fn key_for(self, name: &str) -> StorageKey {
        StorageKey::new(self, name)
    }
}

/// Full bucket key of a file: `<visibility prefix>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(visibility: Visibility, name: &str) -> Self {
        Self(format!("{}/{}", visibility.prefix(), name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A per-key failure reported by a bulk delete. Serialized with the field
/// names the storage API itself uses so callers receive the records as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectError {
    pub key: String,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Result of a bulk delete that reached the store. Keys that did not exist
/// count as deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub errors: Vec<ObjectError>,
}

impl DeleteOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Listing row shown by the panel's file browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} failed")]
    Transport {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("object {0} not found")]
    NotFound(String),
    #[error("invalid object request: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn transport(operation: &'static str, source: impl Into<BoxError>) -> Self {
        StoreError::Transport {
            operation,
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Deletes every key in a single bulk request. Duplicates are passed
    /// through unchanged; nothing is retried.
    async fn delete_objects(&self, keys: &[StorageKey]) -> Result<DeleteOutcome, StoreError>;

    /// Lists objects under `prefix`. With a delimiter only the direct
    /// children of the prefix are returned.
    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<ObjectSummary>, StoreError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns a URL the browser can `PUT` the file body to directly.
    async fn presign_put(
        &self,
        key: &StorageKey,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError>;
}

pub async fn list_files(
    store: &dyn ObjectStore,
    visibility: Visibility,
) -> Result<Vec<FileEntry>, StoreError> {
    let prefix = format!("{}/", visibility.prefix());
    let objects = store.list_objects(&prefix, None).await?;

    Ok(objects
        .into_iter()
        .filter_map(|object| {
            let name = object.key.strip_prefix(&prefix)?;
            if name.is_empty() {
                return None;
            }
            Some(FileEntry {
                name: name.to_string(),
                size: object.size,
                date: object.last_modified,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryObjectStore;

    #[test]
    fn visibility_flag_is_case_insensitive() {
        assert_eq!(Visibility::from_flag(Some("true")), Visibility::Public);
        assert_eq!(Visibility::from_flag(Some("TRUE")), Visibility::Public);
        assert_eq!(Visibility::from_flag(Some("True")), Visibility::Public);
        assert_eq!(Visibility::from_flag(Some("yes")), Visibility::Private);
        assert_eq!(Visibility::from_flag(Some("")), Visibility::Private);
        assert_eq!(Visibility::from_flag(None), Visibility::Private);
    }

    #[test]
    fn storage_keys_carry_visibility_prefix() {
        assert_eq!(Visibility::Public.key_for("a.png").as_str(), "files/a.png");
        assert_eq!(Visibility::Private.key_for("a.png").as_str(), "pfiles/a.png");
        assert_eq!(
            serde_json::to_string(&Visibility::Private.key_for("tiles/z1.pbf")).unwrap(),
            "\"pfiles/tiles/z1.pbf\""
        );
    }

    #[test]
    fn object_errors_serialize_with_store_field_names() {
        let record = ObjectError {
            key: "files/a.png".into(),
            code: "AccessDenied".into(),
            message: "Access Denied".into(),
            version_id: None,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({"Key": "files/a.png", "Code": "AccessDenied", "Message": "Access Denied"})
        );
    }

    #[tokio::test]
    async fn list_files_strips_prefix_and_directory_marker() {
        let store = MemoryObjectStore::new("tiles");
        store.add_object("files/", Vec::new());
        store.add_object("files/coast.mbtiles", vec![0; 12]);
        store.add_object("files/nested/roads.pbf", vec![0; 3]);
        store.add_object("pfiles/secret.csv", vec![0; 5]);
        store.add_object("filesystem.txt", vec![0; 1]);

        let files = list_files(&store, Visibility::Public).await.expect("list");
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["coast.mbtiles", "nested/roads.pbf"]);
        assert_eq!(files[0].size, 12);
    }
}
