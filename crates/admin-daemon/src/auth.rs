use std::sync::Arc;

use admin_store::{RepoError, RepositoryHost, UserProfile};
use axum::http::{header, HeaderMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Body returned for every rejected credential, whatever the cause.
pub const UNAUTHORIZED_MESSAGE: &str = "User must be a repository collaborator";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("User must be a repository collaborator")]
    Unauthorized,
}

/// Admits a credential only when its owner is a collaborator of the
/// configured repository. Membership is looked up on every call.
#[derive(Clone)]
pub struct CollaboratorGate {
    repo: Arc<dyn RepositoryHost>,
}

impl CollaboratorGate {
    pub fn new(repo: Arc<dyn RepositoryHost>) -> Self {
        Self { repo }
    }

    pub async fn authorize(&self, credential: Option<&str>) -> Result<(), AuthzError> {
        self.session(credential).await.map(|_| ())
    }

    /// Resolves the credential's identity and checks repository membership.
    /// The cause of a rejection is logged and never returned.
    pub async fn session(&self, credential: Option<&str>) -> Result<UserProfile, AuthzError> {
        let Some(token) = credential.filter(|token| !token.is_empty()) else {
            warn!("rejected request without credential");
            return Err(AuthzError::Unauthorized);
        };

        let user = self
            .repo
            .authenticated_user(token)
            .await
            .map_err(|err| reject(&err, "resolving credential owner"))?;

        match self.repo.is_collaborator(token, &user.login).await {
            Ok(true) => {
                debug!(login = %user.login, "collaborator admitted");
                Ok(user)
            }
            Ok(false) => {
                warn!(login = %user.login, "rejected non-collaborator");
                Err(AuthzError::Unauthorized)
            }
            Err(err) => Err(reject(&err, "checking collaborator membership")),
        }
    }
}

fn reject(err: &RepoError, stage: &str) -> AuthzError {
    warn!(error = %err, stage, "authorization failed");
    AuthzError::Unauthorized
}

/// Extracts the credential from the `authorization` header. A raw token,
/// `Bearer <token>` and `token <token>` are all accepted.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = ["Bearer ", "bearer ", "token ", "Token "]
        .iter()
        .find_map(|scheme| value.strip_prefix(scheme))
        .unwrap_or(value)
        .trim();
    (!token.is_empty()).then_some(token)
}
