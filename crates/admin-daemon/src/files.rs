//! Bucket file operations: the gated batch delete and its response mapping,
//! listing, and presigned uploads.

use std::sync::Arc;

use admin_store::{
    list_files as list_bucket_files, DeleteOutcome, FileEntry, ObjectError, ObjectStore,
    StorageKey, StoreError, Visibility,
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{credential_from_headers, AuthzError, UNAUTHORIZED_MESSAGE};
use crate::server::{ApiError, AppState};

/// Query string of the batch delete.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteFilesQuery {
    /// URL-encoded JSON array of file names.
    #[serde(default)]
    pub files: Option<String>,
    /// `true` (any case) selects public storage.
    #[serde(default, rename = "isPublic")]
    pub is_public: Option<String>,
}

/// A validated batch delete: at least one name, all in one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub target_names: Vec<String>,
    pub visibility: Visibility,
}

impl DeleteRequest {
    /// One storage key per name, in request order, duplicates kept.
    pub fn keys(&self) -> Vec<StorageKey> {
        self.target_names
            .iter()
            .map(|name| self.visibility.key_for(name))
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedRequest {
    #[error("files parameter is required")]
    MissingFiles,
    #[error("files parameter must be a JSON array of file names: {0}")]
    InvalidFiles(String),
    #[error("files parameter must name at least one file")]
    NoFiles,
    #[error("file name {0:?} must be a relative path inside the namespace")]
    InvalidName(String),
    #[error("malformed query string: {0}")]
    InvalidQuery(String),
}

impl From<MalformedRequest> for ApiError {
    fn from(err: MalformedRequest) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

pub fn parse_delete_request(query: &DeleteFilesQuery) -> Result<DeleteRequest, MalformedRequest> {
    let raw = query
        .files
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .ok_or(MalformedRequest::MissingFiles)?;

    let decoded =
        urlencoding::decode(raw).map_err(|err| MalformedRequest::InvalidFiles(err.to_string()))?;
    let target_names: Vec<String> = serde_json::from_str(&decoded)
        .map_err(|err| MalformedRequest::InvalidFiles(err.to_string()))?;
    if target_names.is_empty() {
        return Err(MalformedRequest::NoFiles);
    }
    if let Some(name) = target_names.iter().find(|name| !is_relative_name(name)) {
        return Err(MalformedRequest::InvalidName(name.clone()));
    }

    Ok(DeleteRequest {
        target_names,
        visibility: Visibility::from_flag(query.is_public.as_deref()),
    })
}

fn is_relative_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && name.split('/').all(|segment| segment != "..")
}

/// Removes every key with a single bulk request. Keys that do not exist count
/// as deleted; per-key refusals come back in the outcome.
#[instrument(skip_all, fields(count = keys.len()))]
pub async fn delete_batch(
    store: &dyn ObjectStore,
    keys: &[StorageKey],
) -> Result<DeleteOutcome, StoreError> {
    let outcome = store.delete_objects(keys).await?;
    if outcome.is_complete() {
        info!("batch delete completed");
    } else {
        warn!(failed = outcome.errors.len(), "batch delete partially failed");
    }
    Ok(outcome)
}

/// Per-object failure exactly as the object store reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteErrorRecord {
    pub key: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl From<ObjectError> for DeleteErrorRecord {
    fn from(error: ObjectError) -> Self {
        let ObjectError {
            key,
            code,
            message,
            version_id,
        } = error;
        Self {
            key,
            code,
            message,
            version_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteResponse {
    /// 401 with the fixed plain-text message.
    Unauthorized,
    /// 406 with the store's per-object failures in reported order.
    Partial(Vec<DeleteErrorRecord>),
    /// 201 with an empty body.
    Deleted,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            DeleteResponse::Unauthorized => {
                (StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE).into_response()
            }
            DeleteResponse::Partial(errors) => {
                (StatusCode::NOT_ACCEPTABLE, Json(errors)).into_response()
            }
            DeleteResponse::Deleted => (StatusCode::CREATED, "").into_response(),
        }
    }
}

/// Maps the gate and executor results to the response, in priority order:
/// rejection, transport fault, partial failure, success. Transport faults
/// are not normalized into one of the delete statuses.
pub fn translate(
    result: Result<Result<DeleteOutcome, StoreError>, AuthzError>,
) -> Result<DeleteResponse, ApiError> {
    match result {
        Err(AuthzError::Unauthorized) => Ok(DeleteResponse::Unauthorized),
        Ok(Err(err)) => Err(ApiError::from(err)),
        Ok(Ok(outcome)) if outcome.is_complete() => Ok(DeleteResponse::Deleted),
        Ok(Ok(outcome)) => Ok(DeleteResponse::Partial(
            outcome.errors.into_iter().map(DeleteErrorRecord::from).collect(),
        )),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/files/delete",
    params(DeleteFilesQuery),
    responses(
        (status = 201, description = "Every named file is gone"),
        (status = 400, description = "Missing or malformed files parameter", body = ErrorBody),
        (status = 401, description = "User must be a repository collaborator", content_type = "text/plain"),
        (status = 406, description = "Some files could not be deleted", body = [DeleteErrorRecord]),
        (status = 502, description = "Object store unreachable", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn delete_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<DeleteFilesQuery>, QueryRejection>,
) -> Result<DeleteResponse, ApiError> {
    let executed = match state.gate.authorize(credential_from_headers(&headers)).await {
        Err(rejected) => Err(rejected),
        Ok(()) => {
            let Query(query) =
                query.map_err(|err| MalformedRequest::InvalidQuery(err.body_text()))?;
            let request = parse_delete_request(&query)?;
            Ok(delete_batch(state.objects.as_ref(), &request.keys()).await)
        }
    };
    translate(executed)
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct ListFilesQuery {
    #[serde(default, rename = "isPublic")]
    is_public: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct FileResponse {
    name: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<DateTime<Utc>>,
}

impl From<FileEntry> for FileResponse {
    fn from(entry: FileEntry) -> Self {
        Self {
            name: entry.name,
            size: entry.size,
            date: entry.date,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/files",
    params(ListFilesQuery),
    responses(
        (status = 200, description = "Files in the selected namespace", body = [FileResponse]),
        (status = 401, description = "Not a repository collaborator", body = ErrorBody),
        (status = 502, description = "Object store unreachable", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<Vec<FileResponse>>, ApiError> {
    state.gate.authorize(credential_from_headers(&headers)).await?;

    let visibility = Visibility::from_flag(query.is_public.as_deref());
    let files = list_bucket_files(state.objects.as_ref(), visibility).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct PresignBody {
    name: String,
    #[serde(rename = "type")]
    content_type: String,
    /// `true` (any case) selects public storage.
    #[serde(default, rename = "isPublic")]
    is_public: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct PresignResponse {
    url: String,
    key: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/files/presign",
    request_body = PresignBody,
    responses(
        (status = 200, description = "Presigned upload URL", body = PresignResponse),
        (status = 400, description = "Empty or escaping file name", body = ErrorBody),
        (status = 401, description = "Not a repository collaborator", body = ErrorBody),
        (status = 502, description = "Object store unreachable", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn presign_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PresignBody>,
) -> Result<Json<PresignResponse>, ApiError> {
    state.gate.authorize(credential_from_headers(&headers)).await?;
    if !is_relative_name(&body.name) {
        return Err(MalformedRequest::InvalidName(body.name).into());
    }

    let visibility = Visibility::from_flag(body.is_public.as_deref());
    let key = visibility.key_for(&body.name);
    let url = state
        .objects
        .presign_put(&key, &body.content_type, state.presign_ttl)
        .await?;

    info!(%key, "issued presigned upload");
    Ok(Json(PresignResponse {
        url,
        key: key.into_string(),
    }))
}
