//! Static-site publishing: the build hook and the "is a publish due" check.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::repo::{RepoError, RepositoryHost};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deploy hook is not configured")]
    NotConfigured,
    #[error("deploy request failed: {0}")]
    Transport(String),
    #[error("deploy endpoint answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[async_trait]
pub trait SiteDeployer: Send + Sync {
    /// Time of the last completed deploy, `None` when unknown.
    async fn last_deploy(&self) -> Result<Option<DateTime<Utc>>, DeployError>;

    /// Starts a rebuild of the public site.
    async fn trigger(&self) -> Result<(), DeployError>;
}

/// Deployer talking to a hosting provider's build hook over HTTP.
#[derive(Debug, Clone)]
pub struct HookDeployer {
    http: Client,
    hook_url: Option<String>,
    date_url: Option<String>,
}

impl HookDeployer {
    pub fn new(hook_url: Option<String>, date_url: Option<String>) -> Self {
        Self {
            http: Client::new(),
            hook_url,
            date_url,
        }
    }
}

#[async_trait]
impl SiteDeployer for HookDeployer {
    #[instrument(skip(self))]
    async fn last_deploy(&self) -> Result<Option<DateTime<Utc>>, DeployError> {
        let Some(url) = &self.date_url else {
            debug!("no deploy date endpoint configured");
            return Ok(None);
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DeployError::Status(response.status().as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;

        let parsed = parse_deploy_date(&body);
        if parsed.is_none() {
            warn!(body = %body.trim(), "unparseable deploy date");
        }
        Ok(parsed)
    }

    #[instrument(skip(self))]
    async fn trigger(&self) -> Result<(), DeployError> {
        let url = self.hook_url.as_ref().ok_or(DeployError::NotConfigured)?;
        let response = self
            .http
            .post(url)
            .body("publish")
            .send()
            .await
            .map_err(|err| DeployError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DeployError::Status(response.status().as_u16()));
        }
        info!("site deploy triggered");
        Ok(())
    }
}

/// Accepts RFC 3339, RFC 2822 and `YYYY-MM-DD HH:MM:SS` (taken as UTC).
pub fn parse_deploy_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// True when the repository received pushes after the last deploy.
pub async fn publish_due(
    repo: &dyn RepositoryHost,
    deployer: &dyn SiteDeployer,
    token: &str,
) -> Result<bool, DeployError> {
    let Some(deployed) = deployer.last_deploy().await? else {
        return Ok(false);
    };
    let info = repo.repository(token).await?;
    Ok(info.pushed_at.is_some_and(|pushed| deployed < pushed))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::mock::{MemoryDeployer, MemoryRepository};

    #[test]
    fn deploy_dates_in_common_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_deploy_date("2024-03-01T12:30:00Z"), Some(expected));
        assert_eq!(
            parse_deploy_date("Fri, 01 Mar 2024 12:30:00 +0000\n"),
            Some(expected)
        );
        assert_eq!(parse_deploy_date("2024-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_deploy_date("yesterday"), None);
        assert_eq!(parse_deploy_date("   "), None);
    }

    #[tokio::test]
    async fn publish_due_compares_against_last_push() {
        let repo = MemoryRepository::new();
        repo.add_user("tok", "editor");
        let deployer = MemoryDeployer::new();

        assert!(!publish_due(&repo, &deployer, "tok").await.unwrap());

        deployer.set_last_deploy(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(!publish_due(&repo, &deployer, "tok").await.unwrap());

        repo.set_pushed_at(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert!(!publish_due(&repo, &deployer, "tok").await.unwrap());

        repo.set_pushed_at(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
        assert!(publish_due(&repo, &deployer, "tok").await.unwrap());
    }

    #[tokio::test]
    async fn hook_deployer_posts_and_reads_date() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/build"))
            .and(body_string("publish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/deploy-date"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2024-03-01T12:30:00Z"))
            .mount(&server)
            .await;

        let deployer = HookDeployer::new(
            Some(format!("{}/hooks/build", server.uri())),
            Some(format!("{}/deploy-date", server.uri())),
        );
        deployer.trigger().await.expect("trigger");
        assert_eq!(
            deployer.last_deploy().await.expect("date"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn unconfigured_hook_is_reported() {
        let deployer = HookDeployer::new(None, None);
        assert!(matches!(
            deployer.trigger().await,
            Err(DeployError::NotConfigured)
        ));
        assert_eq!(deployer.last_deploy().await.expect("no url"), None);
    }
}
