//! Document-level operations over the repository content store.
//!
//! Every document lives as a file in the configured repository. JSON
//! documents are returned to callers with the blob `sha` attached so the next
//! save can be a conditional update; a save with a stale sha fails with
//! [`RepoError::Conflict`] instead of overwriting a concurrent edit.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::objects::{ObjectStore, StoreError};
use crate::repo::{ContentFile, EntryKind, FileWrite, RepoError, RepositoryHost};

/// Free-form JSON object as edited by the panel.
pub type Document = Map<String, Value>;

const SHA_FIELD: &str = "sha";
const TILE_INFO_FIELD: &str = "tileInfo";
const FRONT_MATTER_DELIMITER: &str = "---\n";
const NEWS_SEGMENT: &str = "news/";
const NEWS_THUMBS_SEGMENT: &str = "news/thumbs/";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} is not valid UTF-8")]
    Utf8(String),
    #[error("{path} does not hold valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid document: {0}")]
    Invalid(String),
}

/// Repository paths of every document family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentLayout {
    pub meta_dir: String,
    pub survey_template_path: String,
    pub faq_path: String,
    pub contact_path: String,
    pub news_dir: String,
    pub about_dir: String,
    pub about_items: Vec<AboutItem>,
}

impl Default for ContentLayout {
    fn default() -> Self {
        Self {
            meta_dir: "meta".to_string(),
            survey_template_path: "survey/template.json".to_string(),
            faq_path: "content/faq.json".to_string(),
            contact_path: "content/contact.json".to_string(),
            news_dir: "news".to_string(),
            about_dir: "content/about".to_string(),
            about_items: vec![AboutItem {
                field_name: "about".to_string(),
                file_path: "/index.md".to_string(),
                front_matter: "---\ntitle: About\n---\n".to_string(),
            }],
        }
    }
}

/// One localized section of the about page, stored as a markdown file with
/// a fixed front-matter header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutItem {
    pub field_name: String,
    pub file_path: String,
    pub front_matter: String,
}

/// Tile metadata listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub file: String,
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    SurveyTemplate,
    Faq,
    Contact,
}

impl DocumentKind {
    fn path(self, layout: &ContentLayout) -> &str {
        match self {
            DocumentKind::SurveyTemplate => &layout.survey_template_path,
            DocumentKind::Faq => &layout.faq_path,
            DocumentKind::Contact => &layout.contact_path,
        }
    }

    fn commit_message(self) -> &'static str {
        match self {
            DocumentKind::SurveyTemplate => "Updated survey template",
            DocumentKind::Faq => "Updated FAQ",
            DocumentKind::Contact => "Updated contact",
        }
    }
}

#[derive(Clone)]
pub struct ContentService {
    repo: Arc<dyn RepositoryHost>,
    layout: ContentLayout,
}

impl ContentService {
    pub fn new(repo: Arc<dyn RepositoryHost>, layout: ContentLayout) -> Self {
        Self { repo, layout }
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    fn meta_path(&self, file: &str) -> String {
        format!("{}/{}.json", self.layout.meta_dir, file)
    }

    pub async fn list_meta(&self, token: &str) -> Result<Vec<MetaEntry>, ContentError> {
        let Some(entries) = self.repo.list_dir(token, &self.layout.meta_dir).await? else {
            return Ok(Vec::new());
        };

        Ok(entries
            .into_iter()
            .map(|entry| MetaEntry {
                file: strip_extension(&entry.name).to_string(),
                sha: entry.sha,
            })
            .collect())
    }

    /// Loads tile metadata with `tileInfo` unpacked from its stored string
    /// form. A missing file yields a fresh `{ "file": <file> }` document.
    pub async fn get_meta(&self, token: &str, file: &str) -> Result<Document, ContentError> {
        let path = self.meta_path(file);
        let Some(stored) = self.repo.get_file(token, &path).await? else {
            let mut fresh = Document::new();
            fresh.insert("file".to_string(), Value::String(file.to_string()));
            return Ok(fresh);
        };

        let mut document = parse_document(&stored)?;
        if let Some(Value::String(raw)) = document.get(TILE_INFO_FIELD) {
            let tile_info: Value =
                serde_json::from_str(raw).map_err(|source| ContentError::Json {
                    path: path.clone(),
                    source,
                })?;
            document.insert(TILE_INFO_FIELD.to_string(), tile_info);
        }
        document.insert(SHA_FIELD.to_string(), Value::String(stored.sha));
        Ok(document)
    }

    /// Saves tile metadata. `tileInfo` is stored as an embedded JSON string.
    pub async fn save_meta(&self, token: &str, mut document: Document) -> Result<String, ContentError> {
        let file = document
            .get("file")
            .and_then(Value::as_str)
            .filter(|file| !file.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ContentError::Invalid("meta requires a file name".into()))?;

        let sha = take_sha(&mut document);
        if let Some(tile_info) = document.get(TILE_INFO_FIELD) {
            let packed = serde_json::to_string(tile_info).map_err(|source| ContentError::Json {
                path: self.meta_path(&file),
                source,
            })?;
            document.insert(TILE_INFO_FIELD.to_string(), Value::String(packed));
        }

        self.write_document(token, &self.meta_path(&file), &document, sha.as_deref(), "Updated meta")
            .await
    }

    /// Deletes metadata files one after another; stops at the first failure.
    pub async fn delete_meta(&self, token: &str, entries: &[MetaEntry]) -> Result<(), ContentError> {
        for entry in entries {
            self.repo
                .delete_file(token, &self.meta_path(&entry.file), &entry.sha, "Deleted meta")
                .await?;
        }
        info!(count = entries.len(), "deleted meta entries");
        Ok(())
    }

    pub async fn get_document(&self, token: &str, kind: DocumentKind) -> Result<Document, ContentError> {
        let path = kind.path(&self.layout);
        let stored = self
            .repo
            .get_file(token, path)
            .await?
            .ok_or_else(|| RepoError::NotFound(path.to_string()))?;

        let mut document = parse_document(&stored)?;
        document.insert(SHA_FIELD.to_string(), Value::String(stored.sha));
        Ok(document)
    }

    pub async fn save_document(
        &self,
        token: &str,
        kind: DocumentKind,
        mut document: Document,
    ) -> Result<String, ContentError> {
        let sha = take_sha(&mut document);
        self.write_document(
            token,
            kind.path(&self.layout),
            &document,
            sha.as_deref(),
            kind.commit_message(),
        )
        .await
    }

    /// Loads every about-page section concurrently. Each section appears as
    /// `<field>` (text without front matter) and, when the file exists,
    /// `<field>_sha`.
    pub async fn get_about(&self, token: &str) -> Result<Document, ContentError> {
        let reads = self.layout.about_items.iter().map(|item| {
            let path = format!("{}{}", self.layout.about_dir, item.file_path);
            async move { self.repo.get_file(token, &path).await }
        });
        let files = try_join_all(reads).await?;

        let mut about = Document::new();
        for (item, file) in self.layout.about_items.iter().zip(files) {
            match file {
                Some(file) => {
                    let text = file
                        .text()
                        .ok_or_else(|| ContentError::Utf8(file.path.clone()))?;
                    about.insert(
                        item.field_name.clone(),
                        Value::String(strip_front_matter(text).to_string()),
                    );
                    about.insert(sha_field(&item.field_name), Value::String(file.sha));
                }
                None => {
                    about.insert(item.field_name.clone(), Value::String(String::new()));
                }
            }
        }
        Ok(about)
    }

    pub async fn save_about(&self, token: &str, about: &Document) -> Result<(), ContentError> {
        for item in &self.layout.about_items {
            let body = about
                .get(&item.field_name)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ContentError::Invalid(format!("about section {} is missing", item.field_name))
                })?;
            let sha = about.get(&sha_field(&item.field_name)).and_then(Value::as_str);
            let text = format!("{}{}", item.front_matter, body);
            let path = format!("{}{}", self.layout.about_dir, item.file_path);

            self.repo
                .put_file(
                    token,
                    FileWrite {
                        path: &path,
                        content: text.as_bytes(),
                        sha,
                        message: "Updated about page",
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Loads every news item stored in the repository concurrently.
    pub async fn list_news(&self, token: &str) -> Result<Vec<Value>, ContentError> {
        let Some(entries) = self.repo.list_dir(token, &self.layout.news_dir).await? else {
            return Ok(Vec::new());
        };

        let reads = entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .map(|entry| async move { self.repo.get_file(token, &entry.path).await });
        let files = try_join_all(reads).await?;

        files
            .into_iter()
            .flatten()
            .map(|file| parse_json(&file))
            .collect()
    }

    /// Stores a news item. An inline `data:` thumbnail is split out into its
    /// own file under `news/thumbs/` and replaced by a relative link.
    pub async fn save_news_item(&self, token: &str, mut item: Document) -> Result<(), ContentError> {
        let key = item
            .get("key")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ContentError::Invalid("news item requires a key".into()))?;

        if let Some(thumb) = item.get("thumb").and_then(Value::as_str) {
            if let Some(inline) = InlineImage::parse(thumb)? {
                let thumb_key = format!(
                    "{}.{}",
                    key.replacen(NEWS_SEGMENT, NEWS_THUMBS_SEGMENT, 1),
                    inline.subtype
                );
                self.write_file(token, &thumb_key, &inline.bytes, "Saved news item thumbnail")
                    .await?;
                item.insert(
                    "thumb".to_string(),
                    Value::String(format!("./{}", thumb_key.replacen(NEWS_SEGMENT, "", 1))),
                );
            }
        }

        let body = serde_json::to_vec(&item).map_err(|source| ContentError::Json {
            path: key.clone(),
            source,
        })?;
        self.write_file(token, &key, &body, "Saved news item").await?;
        Ok(())
    }

    /// Returns a stored thumbnail as a `data:` URL.
    pub async fn news_thumb(&self, token: &str, key: &str) -> Result<String, ContentError> {
        let file = self
            .repo
            .get_file(token, key)
            .await?
            .ok_or_else(|| RepoError::NotFound(key.to_string()))?;
        let extension = key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or(key);
        Ok(format!(
            "data:image/{};base64,{}",
            extension,
            STANDARD.encode(&file.content)
        ))
    }

    /// Deletes arbitrary repository files by path, looking up each sha first.
    pub async fn delete_items(&self, token: &str, paths: &[String]) -> Result<(), ContentError> {
        for path in paths {
            let file = self
                .repo
                .get_file(token, path)
                .await?
                .ok_or_else(|| RepoError::NotFound(path.clone()))?;
            self.repo
                .delete_file(token, path, &file.sha, &format!("Deleted {path}"))
                .await?;
        }
        Ok(())
    }

    async fn write_document(
        &self,
        token: &str,
        path: &str,
        document: &Document,
        sha: Option<&str>,
        message: &str,
    ) -> Result<String, ContentError> {
        let body = serde_json::to_string_pretty(document).map_err(|source| ContentError::Json {
            path: path.to_string(),
            source,
        })?;
        let sha = self
            .repo
            .put_file(
                token,
                FileWrite {
                    path,
                    content: body.as_bytes(),
                    sha,
                    message,
                },
            )
            .await?;
        debug!(path, %sha, "document written");
        Ok(sha)
    }

    // Unconditional overwrite: the current sha is looked up right before the
    // write.
    async fn write_file(
        &self,
        token: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<String, ContentError> {
        let existing = self.repo.get_file(token, path).await?;
        let sha = self
            .repo
            .put_file(
                token,
                FileWrite {
                    path,
                    content,
                    sha: existing.as_ref().map(|file| file.sha.as_str()),
                    message,
                },
            )
            .await?;
        Ok(sha)
    }
}

/// Loads every JSON object directly under `prefix` in the bucket,
/// concurrently. This is the published view of the news feed.
pub async fn list_published_news(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<Value>, ContentError> {
    let objects = store.list_objects(prefix, Some("/")).await?;
    let reads = objects
        .iter()
        .filter(|object| object.key != prefix)
        .map(|object| store.get_object(&object.key));
    let bodies = try_join_all(reads).await?;

    objects
        .iter()
        .filter(|object| object.key != prefix)
        .zip(bodies)
        .map(|(object, body)| {
            serde_json::from_slice(&body).map_err(|source| ContentError::Json {
                path: object.key.clone(),
                source,
            })
        })
        .collect()
}

/// Drops a leading front-matter block (`---\n ... ---\n`). The closing
/// delimiter is searched from the fifth character on; text without one is
/// returned unchanged.
pub fn strip_front_matter(text: &str) -> &str {
    let offset = text
        .char_indices()
        .nth(4)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    match text[offset..].find(FRONT_MATTER_DELIMITER) {
        Some(position) => &text[offset + position + FRONT_MATTER_DELIMITER.len()..],
        None => text,
    }
}

struct InlineImage {
    subtype: String,
    bytes: Vec<u8>,
}

impl InlineImage {
    /// Parses `data:<type>/<subtype>;base64,<payload>`. Anything that is not
    /// a data URL returns `Ok(None)`.
    fn parse(value: &str) -> Result<Option<Self>, ContentError> {
        let Some(rest) = value.strip_prefix("data:") else {
            return Ok(None);
        };
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ContentError::Invalid("thumbnail data URL has no payload".into()))?;
        let mime = header.split(';').next().unwrap_or_default();
        let subtype = mime
            .split_once('/')
            .map(|(_, subtype)| subtype)
            .filter(|subtype| !subtype.is_empty())
            .ok_or_else(|| ContentError::Invalid(format!("unsupported thumbnail type {mime:?}")))?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|err| ContentError::Invalid(format!("thumbnail payload: {err}")))?;

        Ok(Some(Self {
            subtype: subtype.to_string(),
            bytes,
        }))
    }
}

fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

fn sha_field(field_name: &str) -> String {
    format!("{field_name}_sha")
}

fn take_sha(document: &mut Document) -> Option<String> {
    match document.remove(SHA_FIELD) {
        Some(Value::String(sha)) if !sha.is_empty() => Some(sha),
        _ => None,
    }
}

fn parse_json(file: &ContentFile) -> Result<Value, ContentError> {
    serde_json::from_slice(&file.content).map_err(|source| ContentError::Json {
        path: file.path.clone(),
        source,
    })
}

fn parse_document(file: &ContentFile) -> Result<Document, ContentError> {
    match parse_json(file)? {
        Value::Object(document) => Ok(document),
        _ => Err(ContentError::Invalid(format!("{} is not a JSON object", file.path))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mock::{MemoryObjectStore, MemoryRepository};

    const TOKEN: &str = "tok-editor";

    fn service() -> (MemoryRepository, ContentService) {
        let repo = MemoryRepository::new();
        repo.add_user(TOKEN, "editor");
        let service = ContentService::new(Arc::new(repo.clone()), ContentLayout::default());
        (repo, service)
    }

    fn object(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn front_matter_is_removed() {
        assert_eq!(strip_front_matter("---\ntitle: About\n---\nHello"), "Hello");
        assert_eq!(strip_front_matter("No header here"), "No header here");
        assert_eq!(strip_front_matter("---\n"), "---\n");
        assert_eq!(strip_front_matter(""), "");
        assert_eq!(strip_front_matter("---\na: b\n---\nx\n---\ny"), "x\n---\ny");
    }

    #[test]
    fn inline_image_parses_subtype_and_payload() {
        let image = InlineImage::parse("data:image/png;base64,aGk=")
            .expect("parse")
            .expect("is inline");
        assert_eq!(image.subtype, "png");
        assert_eq!(image.bytes, b"hi");

        assert!(InlineImage::parse("./thumbs/a.png").expect("parse").is_none());
        assert!(InlineImage::parse("data:image;base64,aGk=").is_err());
    }

    #[tokio::test]
    async fn meta_round_trips_tile_info_and_sha() {
        let (repo, service) = service();
        let sha = repo.add_file(
            "meta/coast.json",
            br#"{"file":"coast","tileInfo":"{\"type\":\"raster\",\"maxZoom\":9}"}"#,
        );

        let mut meta = service.get_meta(TOKEN, "coast").await.expect("get");
        assert_eq!(meta["tileInfo"], json!({"type": "raster", "maxZoom": 9}));
        assert_eq!(meta["sha"], json!(sha));

        meta.insert("title".into(), json!("Coastline"));
        let new_sha = service.save_meta(TOKEN, meta).await.expect("save");
        assert_ne!(new_sha, sha);

        let stored: Value =
            serde_json::from_str(&repo.file_text("meta/coast.json").unwrap()).unwrap();
        assert_eq!(stored["tileInfo"], json!(r#"{"type":"raster","maxZoom":9}"#));
        assert_eq!(stored["title"], json!("Coastline"));
        assert!(stored.get("sha").is_none());
        assert_eq!(repo.commit_messages(), vec!["Updated meta".to_string()]);
    }

    #[tokio::test]
    async fn missing_meta_yields_fresh_document() {
        let (_repo, service) = service();
        let meta = service.get_meta(TOKEN, "rivers").await.expect("get");
        assert_eq!(Value::Object(meta), json!({"file": "rivers"}));
    }

    #[tokio::test]
    async fn saving_with_stale_sha_conflicts() {
        let (repo, service) = service();
        repo.add_file("content/faq.json", br#"{"items":[]}"#);

        let mut faq = service.get_document(TOKEN, DocumentKind::Faq).await.expect("get");
        faq.insert("sha".into(), json!("stale"));
        let err = service
            .save_document(TOKEN, DocumentKind::Faq, faq)
            .await
            .expect_err("stale sha");
        assert!(matches!(err, ContentError::Repo(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn singleton_documents_require_existing_file() {
        let (_repo, service) = service();
        let err = service
            .get_document(TOKEN, DocumentKind::SurveyTemplate)
            .await
            .expect_err("missing");
        assert!(matches!(err, ContentError::Repo(RepoError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_and_delete_meta() {
        let (repo, service) = service();
        repo.add_file("meta/a.json", b"{}");
        repo.add_file("meta/b.json", b"{}");

        let entries = service.list_meta(TOKEN).await.expect("list");
        let files: Vec<_> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec!["a", "b"]);

        service.delete_meta(TOKEN, &entries[..1]).await.expect("delete");
        assert!(!repo.has_file("meta/a.json"));
        assert!(repo.has_file("meta/b.json"));
    }

    #[tokio::test]
    async fn about_sections_strip_and_restore_front_matter() {
        let (repo, service) = service();
        repo.add_file("content/about/index.md", b"---\ntitle: About\n---\nWe map coasts.");

        let mut about = service.get_about(TOKEN).await.expect("get");
        assert_eq!(about["about"], json!("We map coasts."));
        assert!(about.contains_key("about_sha"));

        about.insert("about".into(), json!("We map rivers."));
        service.save_about(TOKEN, &about).await.expect("save");
        assert_eq!(
            repo.file_text("content/about/index.md").unwrap(),
            "---\ntitle: About\n---\nWe map rivers."
        );
    }

    #[tokio::test]
    async fn news_item_thumbnail_is_split_out() {
        let (repo, service) = service();
        let item = object(json!({
            "key": "news/2024-storm.json",
            "title": "Storm surge layer",
            "thumb": "data:image/jpeg;base64,aGk="
        }));

        service.save_news_item(TOKEN, item).await.expect("save");

        assert_eq!(
            repo.file_bytes("news/thumbs/2024-storm.json.jpeg").unwrap(),
            b"hi".to_vec()
        );
        let stored: Value =
            serde_json::from_str(&repo.file_text("news/2024-storm.json").unwrap()).unwrap();
        assert_eq!(stored["thumb"], json!("./thumbs/2024-storm.json.jpeg"));

        let thumb = service
            .news_thumb(TOKEN, "news/thumbs/2024-storm.json.jpeg")
            .await
            .expect("thumb");
        assert_eq!(thumb, "data:image/jpeg;base64,aGk=");

        let items = service.list_news(TOKEN).await.expect("list");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], json!("Storm surge layer"));
    }

    #[tokio::test]
    async fn saving_existing_news_item_overwrites() {
        let (repo, service) = service();
        repo.add_file("news/a.json", br#"{"key":"news/a.json","title":"old"}"#);

        service
            .save_news_item(TOKEN, object(json!({"key": "news/a.json", "title": "new"})))
            .await
            .expect("save");
        let stored: Value = serde_json::from_str(&repo.file_text("news/a.json").unwrap()).unwrap();
        assert_eq!(stored["title"], json!("new"));
    }

    #[tokio::test]
    async fn delete_items_looks_up_sha() {
        let (repo, service) = service();
        repo.add_file("news/a.json", b"{}");

        service
            .delete_items(TOKEN, &["news/a.json".to_string()])
            .await
            .expect("delete");
        assert!(!repo.has_file("news/a.json"));

        let err = service
            .delete_items(TOKEN, &["news/missing.json".to_string()])
            .await
            .expect_err("missing");
        assert!(matches!(err, ContentError::Repo(RepoError::NotFound(_))));
    }

    #[tokio::test]
    async fn published_news_reads_direct_children() {
        let store = MemoryObjectStore::new("site");
        store.add_object("news/a.json", br#"{"title":"A"}"#.to_vec());
        store.add_object("news/b.json", br#"{"title":"B"}"#.to_vec());
        store.add_object("news/thumbs/a.png", vec![1, 2, 3]);

        let items = list_published_news(&store, "news/").await.expect("list");
        assert_eq!(items, vec![json!({"title": "A"}), json!({"title": "B"})]);
    }
}
