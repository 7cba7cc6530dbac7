//! Storage layer behind the content admin panel.
//!
//! Two external systems hold the panel's content: a hosted Git repository
//! used as a document database (reached through its REST contents API) and an
//! object-storage bucket holding large binary files such as map tiles. This
//! crate wraps both behind the [`RepositoryHost`] and [`ObjectStore`] traits,
//! provides production clients for each (`GitHubClient`, `S3ObjectStore`) and
//! implements the document-level operations the panel needs on top of them in
//! [`ContentService`].
//!
//! The [`mock`] module ships in-memory implementations of every trait so that
//! callers can exercise request handling without network access.

pub mod content;
pub mod deploy;
pub mod github;
pub mod mock;
pub mod objects;
pub mod repo;
pub mod s3;

pub use content::{
    list_published_news, strip_front_matter, AboutItem, ContentError, ContentLayout,
    ContentService, Document, DocumentKind, MetaEntry,
};
pub use deploy::{parse_deploy_date, publish_due, DeployError, HookDeployer, SiteDeployer};
pub use github::{GitHubClient, GitHubConfig};
pub use objects::{
    list_files, DeleteOutcome, FileEntry, ObjectError, ObjectStore, ObjectSummary, StorageKey,
    StoreError, Visibility,
};
pub use repo::{
    ContentFile, DirEntry, EntryKind, FileWrite, RepoError, RepoInfo, RepositoryHost, UserProfile,
};
pub use s3::{S3ObjectStore, S3Settings};
