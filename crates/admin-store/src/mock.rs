//! In-memory implementations of the storage traits.
//!
//! These let request handling be exercised end to end without a repository
//! host or bucket: seed state, inject failures, run the code under test, then
//! inspect what was written or deleted.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::deploy::{DeployError, SiteDeployer};
use crate::objects::{DeleteOutcome, ObjectError, ObjectStore, ObjectSummary, StorageKey, StoreError};
use crate::repo::{
    ContentFile, DirEntry, EntryKind, FileWrite, RepoError, RepoInfo, RepositoryHost, UserProfile,
};

#[derive(Debug, Clone)]
struct StoredFile {
    sha: String,
    content: Vec<u8>,
}

#[derive(Default)]
struct RepoState {
    files: BTreeMap<String, StoredFile>,
    users: HashMap<String, UserProfile>,
    collaborators: HashSet<String>,
    pushed_at: Option<DateTime<Utc>>,
    unreachable: bool,
    next_sha: u64,
    commit_messages: Vec<String>,
    collaborator_checks: usize,
}

impl RepoState {
    fn issue_sha(&mut self) -> String {
        self.next_sha += 1;
        format!("{:040x}", self.next_sha)
    }
}

/// Repository host keeping files, users and collaborators in memory.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<RepoState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a token belonging to `login`.
    pub fn add_user(&self, token: impl Into<String>, login: impl Into<String>) {
        let login = login.into();
        let profile = UserProfile {
            name: Some(format!("{login} (test)")),
            avatar_url: Some(format!("https://avatars.example/{login}")),
            login,
        };
        self.state.lock().users.insert(token.into(), profile);
    }

    /// Registers a token whose owner is also a repository collaborator.
    pub fn add_collaborator(&self, token: impl Into<String>, login: impl Into<String>) {
        let login = login.into();
        self.add_user(token, login.clone());
        self.state.lock().collaborators.insert(login);
    }

    pub fn remove_collaborator(&self, login: &str) {
        self.state.lock().collaborators.remove(login);
    }

    /// Seeds a file and returns its sha.
    pub fn add_file(&self, path: impl Into<String>, content: &[u8]) -> String {
        let mut state = self.state.lock();
        let sha = state.issue_sha();
        state.files.insert(
            path.into(),
            StoredFile {
                sha: sha.clone(),
                content: content.to_vec(),
            },
        );
        sha
    }

    pub fn set_pushed_at(&self, pushed_at: DateTime<Utc>) {
        self.state.lock().pushed_at = Some(pushed_at);
    }

    /// Makes every subsequent call fail as if the host were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock()
            .files
            .get(path)
            .map(|file| file.content.clone())
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.file_bytes(path)
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.state.lock().commit_messages.clone()
    }

    pub fn collaborator_checks(&self) -> usize {
        self.state.lock().collaborator_checks
    }

    fn guard(&self, token: &str) -> Result<MutexGuard<'_, RepoState>, RepoError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(RepoError::Transport("connection refused".into()));
        }
        if !state.users.contains_key(token) {
            return Err(RepoError::Unauthenticated);
        }
        Ok(state)
    }
}

#[async_trait]
impl RepositoryHost for MemoryRepository {
    async fn authenticated_user(&self, token: &str) -> Result<UserProfile, RepoError> {
        let state = self.guard(token)?;
        state
            .users
            .get(token)
            .cloned()
            .ok_or(RepoError::Unauthenticated)
    }

    async fn is_collaborator(&self, token: &str, login: &str) -> Result<bool, RepoError> {
        let mut state = self.guard(token)?;
        state.collaborator_checks += 1;
        Ok(state.collaborators.contains(login))
    }

    async fn repository(&self, token: &str) -> Result<RepoInfo, RepoError> {
        let state = self.guard(token)?;
        Ok(RepoInfo {
            pushed_at: state.pushed_at,
        })
    }

    async fn get_file(&self, token: &str, path: &str) -> Result<Option<ContentFile>, RepoError> {
        let state = self.guard(token)?;
        Ok(state.files.get(path).map(|file| ContentFile {
            path: path.to_string(),
            sha: file.sha.clone(),
            content: file.content.clone(),
        }))
    }

    async fn list_dir(&self, token: &str, path: &str) -> Result<Option<Vec<DirEntry>>, RepoError> {
        let state = self.guard(token)?;
        let prefix = format!("{}/", path.trim_end_matches('/'));

        let mut entries = Vec::new();
        let mut subdirs = BTreeSet::new();
        for (file_path, file) in state.files.range(prefix.clone()..) {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    subdirs.insert(dir.to_string());
                }
                None => entries.push(DirEntry {
                    name: rest.to_string(),
                    path: file_path.clone(),
                    sha: file.sha.clone(),
                    kind: EntryKind::File,
                }),
            }
        }
        entries.extend(subdirs.into_iter().map(|dir| DirEntry {
            path: format!("{prefix}{dir}"),
            sha: String::new(),
            name: dir,
            kind: EntryKind::Dir,
        }));

        if entries.is_empty() {
            Ok(None)
        } else {
            Ok(Some(entries))
        }
    }

    async fn put_file(&self, token: &str, write: FileWrite<'_>) -> Result<String, RepoError> {
        let mut state = self.guard(token)?;
        let current = state.files.get(write.path).map(|file| file.sha.clone());
        if current.as_deref() != write.sha {
            return Err(RepoError::Conflict(write.path.to_string()));
        }

        let sha = state.issue_sha();
        state.files.insert(
            write.path.to_string(),
            StoredFile {
                sha: sha.clone(),
                content: write.content.to_vec(),
            },
        );
        state.commit_messages.push(write.message.to_string());
        Ok(sha)
    }

    async fn delete_file(
        &self,
        token: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), RepoError> {
        let mut state = self.guard(token)?;
        match state.files.get(path) {
            None => return Err(RepoError::NotFound(path.to_string())),
            Some(file) if file.sha != sha => return Err(RepoError::Conflict(path.to_string())),
            Some(_) => {}
        }
        state.files.remove(path);
        state.commit_messages.push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<String, Vec<u8>>,
    denied_keys: HashSet<String>,
    transport_failure: Option<String>,
    delete_requests: Vec<Vec<String>>,
}

/// Bucket kept in memory. Deletes follow S3 semantics: missing keys are not
/// errors, denied keys are reported per object.
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    state: Arc<Mutex<StoreState>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Arc::default(),
        }
    }

    pub fn add_object(&self, key: impl Into<String>, content: Vec<u8>) {
        self.state.lock().objects.insert(key.into(), content);
    }

    /// Makes deletes of `key` fail with `AccessDenied`.
    pub fn deny_delete(&self, key: impl Into<String>) {
        self.state.lock().denied_keys.insert(key.into());
    }

    /// Makes every subsequent call fail before reaching the bucket.
    pub fn fail_transport(&self, reason: impl Into<String>) {
        self.state.lock().transport_failure = Some(reason.into());
    }

    pub fn exists(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Keys of every bulk delete received, one entry per request.
    pub fn delete_requests(&self) -> Vec<Vec<String>> {
        self.state.lock().delete_requests.clone()
    }

    fn check_transport(state: &StoreState, operation: &'static str) -> Result<(), StoreError> {
        match &state.transport_failure {
            Some(reason) => Err(StoreError::transport(operation, reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn delete_objects(&self, keys: &[StorageKey]) -> Result<DeleteOutcome, StoreError> {
        let mut state = self.state.lock();
        Self::check_transport(&state, "DeleteObjects")?;
        state
            .delete_requests
            .push(keys.iter().map(|key| key.as_str().to_string()).collect());

        let mut errors = Vec::new();
        for key in keys {
            if state.denied_keys.contains(key.as_str()) {
                errors.push(ObjectError {
                    key: key.as_str().to_string(),
                    code: "AccessDenied".to_string(),
                    message: "Access Denied".to_string(),
                    version_id: None,
                });
                continue;
            }
            state.objects.remove(key.as_str());
        }
        Ok(DeleteOutcome { errors })
    }

    async fn list_objects(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let state = self.state.lock();
        Self::check_transport(&state, "ListObjectsV2")?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| {
                key.strip_prefix(prefix).is_some_and(|rest| match delimiter {
                    Some(delimiter) => !rest.contains(delimiter),
                    None => true,
                })
            })
            .map(|(key, content)| ObjectSummary {
                key: key.clone(),
                size: content.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.state.lock();
        Self::check_transport(&state, "GetObject")?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn presign_put(
        &self,
        key: &StorageKey,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        let state = self.state.lock();
        Self::check_transport(&state, "PutObject presign")?;
        Ok(format!(
            "https://{}.storage.test/{}?content-type={}&X-Amz-Expires={}",
            self.bucket,
            key,
            urlencoding::encode(content_type),
            expires_in.as_secs()
        ))
    }
}

#[derive(Default)]
struct DeployState {
    last_deploy: Option<DateTime<Utc>>,
    triggered: usize,
    failure: Option<String>,
}

/// Deploy target that records triggers instead of calling a build hook.
#[derive(Clone, Default)]
pub struct MemoryDeployer {
    state: Arc<Mutex<DeployState>>,
}

impl MemoryDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_last_deploy(&self, at: DateTime<Utc>) {
        self.state.lock().last_deploy = Some(at);
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        self.state.lock().failure = Some(reason.into());
    }

    pub fn triggered(&self) -> usize {
        self.state.lock().triggered
    }
}

#[async_trait]
impl SiteDeployer for MemoryDeployer {
    async fn last_deploy(&self) -> Result<Option<DateTime<Utc>>, DeployError> {
        Ok(self.state.lock().last_deploy)
    }

    async fn trigger(&self) -> Result<(), DeployError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.failure {
            return Err(DeployError::Transport(reason.clone()));
        }
        state.triggered += 1;
        Ok(())
    }
}
