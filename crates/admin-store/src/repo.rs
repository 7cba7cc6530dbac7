//! Repository-hosting abstraction used as the panel's document database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity behind an access token, as reported by the repository host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A single file read through the contents API, already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    pub path: String,
    pub sha: String,
    pub content: Vec<u8>,
}

impl ContentFile {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoInfo {
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Create-or-update of a single file. `sha` must carry the blob sha that was
/// read when the file already exists; the host rejects stale values.
#[derive(Debug, Clone, Copy)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub content: &'a [u8],
    pub sha: Option<&'a str>,
    pub message: &'a str,
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("credential rejected by repository host")]
    Unauthenticated,
    #[error("access to {0} is forbidden")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} was modified concurrently; reload and retry")]
    Conflict(String),
    #[error("repository host returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("repository host unreachable: {0}")]
    Transport(String),
    #[error("unexpected response from repository host: {0}")]
    Decode(String),
}

/// Operations the panel needs from the repository host. Every call is
/// authenticated with the caller's own token; the configured owner/repository
/// pair is fixed by the implementation.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn authenticated_user(&self, token: &str) -> Result<UserProfile, RepoError>;

    /// Returns whether `login` is a collaborator of the configured repository.
    async fn is_collaborator(&self, token: &str, login: &str) -> Result<bool, RepoError>;

    async fn repository(&self, token: &str) -> Result<RepoInfo, RepoError>;

    /// Reads a file; `Ok(None)` when the path does not exist.
    async fn get_file(&self, token: &str, path: &str) -> Result<Option<ContentFile>, RepoError>;

    /// Lists a directory; `Ok(None)` when the path does not exist.
    async fn list_dir(&self, token: &str, path: &str) -> Result<Option<Vec<DirEntry>>, RepoError>;

    /// Writes a file and returns its new blob sha.
    async fn put_file(&self, token: &str, write: FileWrite<'_>) -> Result<String, RepoError>;

    async fn delete_file(
        &self,
        token: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), RepoError>;
}
