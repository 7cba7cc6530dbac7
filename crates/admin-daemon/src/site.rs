use std::sync::Arc;

use admin_store::{publish_due as check_publish_due, UserProfile};
use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::credential_from_headers;
use crate::server::{require_credential, ApiError, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct SessionResponse {
    login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

impl From<UserProfile> for SessionResponse {
    fn from(user: UserProfile) -> Self {
        Self {
            login: user.login,
            name: user.name,
            avatar: user.avatar_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct PublishDueResponse {
    due: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/session",
    responses(
        (status = 200, description = "Signed-in collaborator", body = SessionResponse),
        (status = 401, description = "Not a repository collaborator", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let user = state.gate.session(credential_from_headers(&headers)).await?;
    Ok(Json(SessionResponse::from(user)))
}

#[utoipa::path(
    get,
    path = "/api/v1/publish/due",
    responses(
        (status = 200, description = "Whether the repository changed since the last deploy", body = PublishDueResponse),
        (status = 401, description = "Missing or rejected credential", body = ErrorBody),
        (status = 502, description = "Deploy endpoint unreachable", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn publish_due(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PublishDueResponse>, ApiError> {
    let token = require_credential(&headers)?;
    let due = check_publish_due(state.repo.as_ref(), state.deployer.as_ref(), token).await?;
    Ok(Json(PublishDueResponse { due }))
}

#[utoipa::path(
    post,
    path = "/api/v1/publish",
    responses(
        (status = 202, description = "Site rebuild started"),
        (status = 401, description = "Not a repository collaborator", body = ErrorBody),
        (status = 503, description = "No deploy hook configured", body = ErrorBody)
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn publish(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let user = state.gate.session(credential_from_headers(&headers)).await?;
    state.deployer.trigger().await?;
    info!(login = %user.login, "publish requested");
    Ok(StatusCode::ACCEPTED)
}
