use std::{env, error::Error as StdError, net::SocketAddr, sync::Arc, time::Duration};

use admin_store::{
    AboutItem, ContentError, ContentLayout, ContentService, DeployError, GitHubClient,
    GitHubConfig, HookDeployer, ObjectStore, RepoError, RepositoryHost, S3ObjectStore, S3Settings,
    SiteDeployer, StoreError,
};
use anyhow::{Context, Result};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::auth::{credential_from_headers, AuthzError, CollaboratorGate, UNAUTHORIZED_MESSAGE};
use crate::{documents, files, site};

const DEFAULT_PRESIGN_TTL_SECONDS: u64 = 900;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let repo: Arc<dyn RepositoryHost> = Arc::new(
        GitHubClient::new(config.github.clone()).context("failed to build repository client")?,
    );
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&config.s3).await);
    let deployer: Arc<dyn SiteDeployer> = Arc::new(HookDeployer::new(
        config.deploy_hook_url.clone(),
        config.deploy_date_url.clone(),
    ));
    let state = Arc::new(AppState::new(
        repo,
        objects,
        deployer,
        config.layout.clone(),
        config.presign_ttl,
    ));

    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(
        addr = %config.listen_addr,
        owner = %config.github.owner,
        repo = %config.github.repo,
        bucket = %config.s3.bucket,
        "admin-daemon listening"
    );
    axum::serve(listener, app)
        .await
        .context("HTTP server exited")?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/v1/files/delete",
            get(files::delete_files).delete(files::delete_files),
        )
        .route("/api/v1/files", get(files::list_files))
        .route("/api/v1/files/presign", post(files::presign_upload))
        .route("/api/v1/session", get(site::session))
        .route(
            "/api/v1/meta",
            get(documents::list_meta).delete(documents::delete_meta),
        )
        .route(
            "/api/v1/meta/:file",
            get(documents::get_meta).put(documents::save_meta),
        )
        .route(
            "/api/v1/survey-template",
            get(documents::get_survey_template).put(documents::save_survey_template),
        )
        .route(
            "/api/v1/faq",
            get(documents::get_faq).put(documents::save_faq),
        )
        .route(
            "/api/v1/contact",
            get(documents::get_contact).put(documents::save_contact),
        )
        .route(
            "/api/v1/about",
            get(documents::get_about).put(documents::save_about),
        )
        .route(
            "/api/v1/news",
            get(documents::list_news).put(documents::save_news_item),
        )
        .route("/api/v1/news/published", get(documents::list_published_news))
        .route("/api/v1/news/thumb", get(documents::news_thumb))
        .route("/api/v1/items", delete(documents::delete_items))
        .route("/api/v1/publish/due", get(site::publish_due))
        .route("/api/v1/publish", post(site::publish))
        .with_state(state)
}

/// Shared handles, built once at start and read-only afterwards.
pub struct AppState {
    pub(crate) gate: CollaboratorGate,
    pub(crate) repo: Arc<dyn RepositoryHost>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) content: ContentService,
    pub(crate) deployer: Arc<dyn SiteDeployer>,
    pub(crate) presign_ttl: Duration,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn RepositoryHost>,
        objects: Arc<dyn ObjectStore>,
        deployer: Arc<dyn SiteDeployer>,
        layout: ContentLayout,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            gate: CollaboratorGate::new(repo.clone()),
            content: ContentService::new(repo.clone(), layout),
            repo,
            objects,
            deployer,
            presign_ttl,
        }
    }
}

#[derive(Debug, Clone)]
struct AppConfig {
    listen_addr: SocketAddr,
    github: GitHubConfig,
    s3: S3Settings,
    presign_ttl: Duration,
    layout: ContentLayout,
    deploy_hook_url: Option<String>,
    deploy_date_url: Option<String>,
}

impl AppConfig {
    fn from_env() -> Result<Self> {
        let listen_addr = env::var("ADMIN_API_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("invalid ADMIN_API_ADDR")?;

        let mut github = GitHubConfig::new(
            required_env("ADMIN_GITHUB_OWNER")?,
            required_env("ADMIN_GITHUB_REPO")?,
        );
        if let Some(branch) = optional_env("ADMIN_GITHUB_BRANCH") {
            github.branch = branch;
        }
        if let Some(api_url) = optional_env("ADMIN_GITHUB_API_URL") {
            github.api_url = api_url;
        }

        let s3 = S3Settings {
            bucket: required_env("ADMIN_S3_BUCKET")?,
            region: required_env("ADMIN_S3_REGION")?,
            endpoint: optional_env("ADMIN_S3_ENDPOINT"),
            access_key_id: optional_env("ADMIN_S3_ACCESS_KEY_ID"),
            secret_access_key: optional_env("ADMIN_S3_SECRET_ACCESS_KEY"),
        };
        if s3.access_key_id.is_some() != s3.secret_access_key.is_some() {
            warn!("only one of ADMIN_S3_ACCESS_KEY_ID / ADMIN_S3_SECRET_ACCESS_KEY is set; using the default credential chain");
        }

        let presign_ttl = match optional_env("ADMIN_PRESIGN_TTL_SECONDS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .context("ADMIN_PRESIGN_TTL_SECONDS must be a number of seconds")?,
            ),
            None => Duration::from_secs(DEFAULT_PRESIGN_TTL_SECONDS),
        };

        Ok(Self {
            listen_addr,
            github,
            s3,
            presign_ttl,
            layout: layout_from_env()?,
            deploy_hook_url: optional_env("ADMIN_DEPLOY_HOOK_URL"),
            deploy_date_url: optional_env("ADMIN_DEPLOY_DATE_URL"),
        })
    }
}

fn layout_from_env() -> Result<ContentLayout> {
    let mut layout = ContentLayout::default();
    let paths = [
        ("ADMIN_META_DIR", &mut layout.meta_dir),
        ("ADMIN_SURVEY_TEMPLATE_PATH", &mut layout.survey_template_path),
        ("ADMIN_FAQ_PATH", &mut layout.faq_path),
        ("ADMIN_CONTACT_PATH", &mut layout.contact_path),
        ("ADMIN_NEWS_DIR", &mut layout.news_dir),
        ("ADMIN_ABOUT_DIR", &mut layout.about_dir),
    ];
    for (key, slot) in paths {
        if let Some(value) = optional_env(key) {
            *slot = value.trim_matches('/').to_string();
        }
    }

    if let Some(raw) = optional_env("ADMIN_ABOUT_ITEMS") {
        layout.about_items = parse_about_items(&raw)?;
    }
    Ok(layout)
}

fn parse_about_items(raw: &str) -> Result<Vec<AboutItem>> {
    let items: Vec<AboutItem> =
        serde_json::from_str(raw).context("ADMIN_ABOUT_ITEMS must be a JSON array of items")?;
    anyhow::ensure!(!items.is_empty(), "ADMIN_ABOUT_ITEMS must list at least one item");
    Ok(items)
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).with_context(|| format!("{key} must be configured"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is healthy"))
)]
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// JSON error answer. The batch delete's fixed statuses are produced by
/// [`files::DeleteResponse`] instead.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }

    /// A downstream fault, reported with its whole source chain.
    fn upstream(err: &(dyn StdError + 'static)) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, error_chain(err))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthorized => ApiError::unauthorized(UNAUTHORIZED_MESSAGE),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match &err {
            RepoError::Unauthenticated => ApiError::unauthorized(err.to_string()),
            RepoError::Forbidden(_) => ApiError::new(StatusCode::FORBIDDEN, err.to_string()),
            RepoError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            RepoError::Conflict(_) => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            RepoError::Status { status, .. } if (400..500).contains(status) => ApiError::new(
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                err.to_string(),
            ),
            RepoError::Status { .. } | RepoError::Transport(_) | RepoError::Decode(_) => {
                ApiError::upstream(&err)
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Transport { .. } => ApiError::upstream(&err),
            StoreError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            StoreError::Invalid(_) => ApiError::bad_request(err.to_string()),
        }
    }
}

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::Repo(inner) => inner.into(),
            ContentError::Store(inner) => inner.into(),
            ContentError::Invalid(_) => ApiError::bad_request(err.to_string()),
            ContentError::Utf8(_) | ContentError::Json { .. } => ApiError::internal(err),
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Repo(inner) => inner.into(),
            DeployError::NotConfigured => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            DeployError::Transport(_) | DeployError::Status(_) => ApiError::upstream(&err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "api error");
        } else {
            warn!(status = %self.status, message = %self.message, "request rejected");
        }
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ErrorBody {
    error: String,
}

/// Credential for operations the repository host authorizes itself.
pub(crate) fn require_credential(headers: &HeaderMap) -> Result<&str, ApiError> {
    credential_from_headers(headers)
        .ok_or_else(|| ApiError::unauthorized("missing authorization credential"))
}

pub mod docs {
    use super::*;
    use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Content Admin API", version = "0.1.0"),
        paths(
            healthz,
            files::delete_files,
            files::list_files,
            files::presign_upload,
            site::session,
            site::publish_due,
            site::publish,
            documents::list_meta,
            documents::delete_meta,
            documents::get_meta,
            documents::save_meta,
            documents::get_survey_template,
            documents::save_survey_template,
            documents::get_faq,
            documents::save_faq,
            documents::get_contact,
            documents::save_contact,
            documents::get_about,
            documents::save_about,
            documents::list_news,
            documents::save_news_item,
            documents::list_published_news,
            documents::news_thumb,
            documents::delete_items
        ),
        components(schemas(
            ErrorBody,
            files::DeleteErrorRecord,
            files::FileResponse,
            files::PresignBody,
            files::PresignResponse,
            site::SessionResponse,
            site::PublishDueResponse,
            documents::DocumentBody,
            documents::MetaEntryBody,
            documents::ShaResponse,
            documents::ThumbResponse
        )),
        modifiers(&SecurityAddon)
    )]
    pub struct ApiDoc;

    struct SecurityAddon;

    impl Modify for SecurityAddon {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            let components = openapi.components.get_or_insert_with(Default::default);
            let bearer = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .description(Some("Repository host access token of a repository collaborator"))
                .build();
            components.add_security_scheme("bearerAuth", SecurityScheme::Http(bearer));
        }
    }
}
