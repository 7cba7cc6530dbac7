//! [`RepositoryHost`] backed by the GitHub REST API.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, Method, RequestBuilder, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::repo::{
    ContentFile, DirEntry, FileWrite, RepoError, RepoInfo, RepositoryHost, UserProfile,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_BRANCH: &str = "master";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("admin-store/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, RepoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(API_VERSION),
        );

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|err| RepoError::Transport(err.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn api_url(&self, suffix: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), suffix)
    }

    fn repo_url(&self, suffix: &str) -> String {
        self.api_url(&format!(
            "/repos/{}/{}{}",
            urlencoding::encode(&self.config.owner),
            urlencoding::encode(&self.config.repo),
            suffix
        ))
    }

    fn contents_url(&self, path: &str) -> String {
        self.repo_url(&format!("/contents/{}", encode_path(path)))
    }

    fn request(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(token)
    }

    // Contents reads must not be served from an intermediate cache, otherwise
    // a save right after a load would carry a stale sha.
    fn uncached_get(&self, url: &str, token: &str) -> RequestBuilder {
        self.request(Method::GET, url, token)
            .header(header::IF_NONE_MATCH, "")
            .query(&[("ref", self.config.branch.as_str())])
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    #[instrument(skip_all)]
    async fn authenticated_user(&self, token: &str) -> Result<UserProfile, RepoError> {
        let response = send(self.request(Method::GET, &self.api_url("/user"), token)).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "authenticated user").await);
        }
        decode_json(response).await
    }

    #[instrument(skip(self, token))]
    async fn is_collaborator(&self, token: &str, login: &str) -> Result<bool, RepoError> {
        let url = self.repo_url(&format!("/collaborators/{}", urlencoding::encode(login)));
        let response = send(self.request(Method::GET, &url, token)).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response, "repository collaborators").await),
        }
    }

    #[instrument(skip_all)]
    async fn repository(&self, token: &str) -> Result<RepoInfo, RepoError> {
        let response = send(self.request(Method::GET, &self.repo_url(""), token)).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "repository").await);
        }
        let body: RepositoryBody = decode_json(response).await?;
        Ok(RepoInfo {
            pushed_at: body.pushed_at,
        })
    }

    #[instrument(skip(self, token))]
    async fn get_file(&self, token: &str, path: &str) -> Result<Option<ContentFile>, RepoError> {
        let response = send(self.uncached_get(&self.contents_url(path), token)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "repository file not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, path).await);
        }

        match decode_json::<ContentsResponse>(response).await? {
            ContentsResponse::File(file) => decode_file(file).map(Some),
            ContentsResponse::Dir(_) => Err(RepoError::Decode(format!("{path} is a directory"))),
        }
    }

    #[instrument(skip(self, token))]
    async fn list_dir(&self, token: &str, path: &str) -> Result<Option<Vec<DirEntry>>, RepoError> {
        let response = send(self.uncached_get(&self.contents_url(path), token)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "repository directory not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, path).await);
        }

        match decode_json::<ContentsResponse>(response).await? {
            ContentsResponse::Dir(entries) => Ok(Some(entries)),
            ContentsResponse::File(_) => Err(RepoError::Decode(format!("{path} is a file"))),
        }
    }

    #[instrument(skip(self, token, write), fields(path = write.path, message = write.message))]
    async fn put_file(&self, token: &str, write: FileWrite<'_>) -> Result<String, RepoError> {
        let body = PutBody {
            message: write.message,
            content: STANDARD.encode(write.content),
            sha: write.sha,
            branch: &self.config.branch,
        };
        let response = send(
            self.request(Method::PUT, &self.contents_url(write.path), token)
                .json(&body),
        )
        .await?;
        if !response.status().is_success() {
            return Err(status_error(response, write.path).await);
        }
        let written: PutResponse = decode_json(response).await?;
        Ok(written.content.sha)
    }

    #[instrument(skip(self, token, sha))]
    async fn delete_file(
        &self,
        token: &str,
        path: &str,
        sha: &str,
        message: &str,
    ) -> Result<(), RepoError> {
        let body = DeleteBody {
            message,
            sha,
            branch: &self.config.branch,
        };
        let response = send(
            self.request(Method::DELETE, &self.contents_url(path), token)
                .json(&body),
        )
        .await?;
        if !response.status().is_success() {
            return Err(status_error(response, path).await);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<DirEntry>),
    File(ContentsFile),
}

#[derive(Debug, Deserialize)]
struct ContentsFile {
    path: String,
    sha: String,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct RepositoryBody {
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn decode_file(file: ContentsFile) -> Result<ContentFile, RepoError> {
    let ContentsFile {
        path,
        sha,
        encoding,
        content,
    } = file;

    if encoding.as_deref() != Some("base64") {
        return Err(RepoError::Decode(format!(
            "{path} is not served inline (encoding {})",
            encoding.as_deref().unwrap_or("none")
        )));
    }

    // The API wraps the payload at 60 columns.
    let compact: String = content
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let content = STANDARD
        .decode(compact)
        .map_err(|err| RepoError::Decode(format!("{path}: {err}")))?;

    Ok(ContentFile { path, sha, content })
}

async fn send(builder: RequestBuilder) -> Result<Response, RepoError> {
    builder
        .send()
        .await
        .map_err(|err| RepoError::Transport(err.to_string()))
}

async fn decode_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RepoError> {
    response
        .json()
        .await
        .map_err(|err| RepoError::Decode(err.to_string()))
}

async fn status_error(response: Response, subject: &str) -> RepoError {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| {
            body.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    match status {
        StatusCode::UNAUTHORIZED => RepoError::Unauthenticated,
        StatusCode::FORBIDDEN => RepoError::Forbidden(subject.to_string()),
        StatusCode::NOT_FOUND => RepoError::NotFound(subject.to_string()),
        StatusCode::CONFLICT => RepoError::Conflict(subject.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY if message.contains("sha") => {
            RepoError::Conflict(subject.to_string())
        }
        _ => RepoError::Status {
            status: status.as_u16(),
            message,
        },
    }
}
