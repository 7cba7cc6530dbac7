//! Repository-backed document handlers. Each forwards the caller's credential
//! to the repository host, which enforces its own permissions.

use std::sync::Arc;

use admin_store::{list_published_news as published_news, Document, DocumentKind, MetaEntry};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::server::{require_credential, ApiError, AppState};

/// Free-form JSON document. Responses carry the `sha` to send back on save.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub(crate) struct DocumentBody(#[schema(value_type = Object)] Document);

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(crate) struct MetaEntryBody {
    file: String,
    sha: String,
}

impl From<MetaEntry> for MetaEntryBody {
    fn from(entry: MetaEntry) -> Self {
        Self {
            file: entry.file,
            sha: entry.sha,
        }
    }
}

impl From<MetaEntryBody> for MetaEntry {
    fn from(body: MetaEntryBody) -> Self {
        Self {
            file: body.file,
            sha: body.sha,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct ThumbQuery {
    /// Repository path of the thumbnail.
    key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct ThumbResponse {
    thumb: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/meta",
    responses(
        (status = 200, description = "Tile metadata files", body = [MetaEntryBody]),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn list_meta(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<MetaEntryBody>>, ApiError> {
    let token = require_credential(&headers)?;
    let entries = state.content.list_meta(token).await?;
    Ok(Json(entries.into_iter().map(MetaEntryBody::from).collect()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/meta",
    request_body = [MetaEntryBody],
    responses(
        (status = 204, description = "Metadata files deleted"),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody),
        (status = 404, description = "A file does not exist", body = ErrorBody),
        (status = 409, description = "A file changed since it was listed", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn delete_meta(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(entries): Json<Vec<MetaEntryBody>>,
) -> Result<StatusCode, ApiError> {
    let token = require_credential(&headers)?;
    let entries: Vec<MetaEntry> = entries.into_iter().map(MetaEntry::from).collect();
    state.content.delete_meta(token, &entries).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/meta/{file}",
    params(("file" = String, Path, description = "Metadata name without extension")),
    responses(
        (status = 200, description = "Metadata document, or a fresh one", body = DocumentBody),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn get_meta(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(file): Path<String>,
) -> Result<Json<DocumentBody>, ApiError> {
    let token = require_credential(&headers)?;
    Ok(Json(DocumentBody(state.content.get_meta(token, &file).await?)))
}

#[utoipa::path(
    put,
    path = "/api/v1/meta/{file}",
    params(("file" = String, Path, description = "Metadata name without extension")),
    request_body = DocumentBody,
    responses(
        (status = 200, description = "Saved; new sha", body = ShaResponse),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody),
        (status = 409, description = "Stale sha", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_meta(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(file): Path<String>,
    Json(DocumentBody(mut document)): Json<DocumentBody>,
) -> Result<Json<ShaResponse>, ApiError> {
    let token = require_credential(&headers)?;
    document.insert("file".to_string(), Value::String(file));
    let sha = state.content.save_meta(token, document).await?;
    Ok(Json(ShaResponse { sha }))
}

async fn load(
    state: &AppState,
    headers: &HeaderMap,
    kind: DocumentKind,
) -> Result<Json<DocumentBody>, ApiError> {
    let token = require_credential(headers)?;
    Ok(Json(DocumentBody(state.content.get_document(token, kind).await?)))
}

async fn store(
    state: &AppState,
    headers: &HeaderMap,
    kind: DocumentKind,
    document: Document,
) -> Result<Json<ShaResponse>, ApiError> {
    let token = require_credential(headers)?;
    let sha = state.content.save_document(token, kind, document).await?;
    Ok(Json(ShaResponse { sha }))
}

#[utoipa::path(
    get,
    path = "/api/v1/survey-template",
    responses(
        (status = 200, description = "Survey template", body = DocumentBody),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody),
        (status = 404, description = "No template stored", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn get_survey_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DocumentBody>, ApiError> {
    load(&state, &headers, DocumentKind::SurveyTemplate).await
}

#[utoipa::path(
    put,
    path = "/api/v1/survey-template",
    request_body = DocumentBody,
    responses(
        (status = 200, description = "Saved; new sha", body = ShaResponse),
        (status = 409, description = "Stale sha", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_survey_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(DocumentBody(document)): Json<DocumentBody>,
) -> Result<Json<ShaResponse>, ApiError> {
    store(&state, &headers, DocumentKind::SurveyTemplate, document).await
}

#[utoipa::path(
    get,
    path = "/api/v1/faq",
    responses(
        (status = 200, description = "FAQ document", body = DocumentBody),
        (status = 404, description = "No FAQ stored", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn get_faq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DocumentBody>, ApiError> {
    load(&state, &headers, DocumentKind::Faq).await
}

#[utoipa::path(
    put,
    path = "/api/v1/faq",
    request_body = DocumentBody,
    responses(
        (status = 200, description = "Saved; new sha", body = ShaResponse),
        (status = 409, description = "Stale sha", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_faq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(DocumentBody(document)): Json<DocumentBody>,
) -> Result<Json<ShaResponse>, ApiError> {
    store(&state, &headers, DocumentKind::Faq, document).await
}

#[utoipa::path(
    get,
    path = "/api/v1/contact",
    responses(
        (status = 200, description = "Contact document", body = DocumentBody),
        (status = 404, description = "No contact document stored", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn get_contact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DocumentBody>, ApiError> {
    load(&state, &headers, DocumentKind::Contact).await
}

#[utoipa::path(
    put,
    path = "/api/v1/contact",
    request_body = DocumentBody,
    responses(
        (status = 200, description = "Saved; new sha", body = ShaResponse),
        (status = 409, description = "Stale sha", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_contact(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(DocumentBody(document)): Json<DocumentBody>,
) -> Result<Json<ShaResponse>, ApiError> {
    store(&state, &headers, DocumentKind::Contact, document).await
}

#[utoipa::path(
    get,
    path = "/api/v1/about",
    responses(
        (status = 200, description = "About page sections with their shas", body = DocumentBody),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn get_about(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DocumentBody>, ApiError> {
    let token = require_credential(&headers)?;
    Ok(Json(DocumentBody(state.content.get_about(token).await?)))
}

#[utoipa::path(
    put,
    path = "/api/v1/about",
    request_body = DocumentBody,
    responses(
        (status = 204, description = "About page saved"),
        (status = 409, description = "Stale sha", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_about(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(DocumentBody(about)): Json<DocumentBody>,
) -> Result<StatusCode, ApiError> {
    let token = require_credential(&headers)?;
    state.content.save_about(token, &about).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/news",
    responses(
        (status = 200, description = "Draft news items", body = [DocumentBody]),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn list_news(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Value>>, ApiError> {
    let token = require_credential(&headers)?;
    Ok(Json(state.content.list_news(token).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/news",
    request_body = DocumentBody,
    responses(
        (status = 204, description = "News item saved"),
        (status = 400, description = "Item has no key or a malformed thumbnail", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn save_news_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(DocumentBody(item)): Json<DocumentBody>,
) -> Result<StatusCode, ApiError> {
    let token = require_credential(&headers)?;
    state.content.save_news_item(token, item).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/news/published",
    responses(
        (status = 200, description = "News items live on the public site", body = [DocumentBody]),
        (status = 502, description = "Object store unreachable", body = ErrorBody)
    )
)]
pub(crate) async fn list_published_news(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let prefix = format!("{}/", state.content.layout().news_dir);
    Ok(Json(published_news(state.objects.as_ref(), &prefix).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/news/thumb",
    params(ThumbQuery),
    responses(
        (status = 200, description = "Thumbnail as a data URL", body = ThumbResponse),
        (status = 404, description = "Thumbnail not found", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn news_thumb(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ThumbQuery>,
) -> Result<Json<ThumbResponse>, ApiError> {
    let token = require_credential(&headers)?;
    let thumb = state.content.news_thumb(token, &query.key).await?;
    Ok(Json(ThumbResponse { thumb }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/items",
    request_body = [String],
    responses(
        (status = 204, description = "Files deleted"),
        (status = 404, description = "A path does not exist", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn delete_items(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(paths): Json<Vec<String>>,
) -> Result<StatusCode, ApiError> {
    let token = require_credential(&headers)?;
    state.content.delete_items(token, &paths).await?;
    Ok(StatusCode::NO_CONTENT)
}
