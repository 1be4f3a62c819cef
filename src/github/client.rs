//! Octocrab-backed [`VcsHost`].

use octocrab::Octocrab;
use serde_json::json;
use tracing::debug;

use super::{GitHubApiError, PullRequest, User, VcsHost, collaborator_url};

/// A GitHub API client authenticated with one token.
///
/// Jobs carry the installation token that was current when they were
/// enqueued, so a client is built per job.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,
}

impl OctocrabClient {
    pub fn new(client: Octocrab) -> Self {
        Self { client }
    }

    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self::new(client))
    }

    /// Creates an unauthenticated client.
    pub fn anonymous() -> Result<Self, octocrab::Error> {
        Ok(Self::new(Octocrab::builder().build()?))
    }

    /// Returns a reference to the underlying octocrab client.
    pub fn inner(&self) -> &Octocrab {
        &self.client
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient").finish_non_exhaustive()
    }
}

impl VcsHost for OctocrabClient {
    async fn get_pull_request(&self, url: &str) -> Result<PullRequest, GitHubApiError> {
        self.client
            .get(url, None::<&()>)
            .await
            .map_err(|e| GitHubApiError::from_octocrab(format!("fetching {url}"), e))
    }

    async fn is_collaborator(
        &self,
        collaborators_url: &str,
        login: &str,
    ) -> Result<bool, GitHubApiError> {
        let url = collaborator_url(collaborators_url, login);
        let response = self
            .client
            ._get(url.as_str())
            .await
            .map_err(|e| GitHubApiError::from_octocrab(format!("checking collaborator {login}"), e))?;

        let status = response.status().as_u16();
        debug!(%login, status, "Collaborator lookup");
        match status {
            204 => Ok(true),
            404 => Ok(false),
            other => Err(GitHubApiError::unexpected_status(
                format!("checking collaborator {login}"),
                other,
            )),
        }
    }

    async fn post_comment(&self, comments_url: &str, body: &str) -> Result<(), GitHubApiError> {
        let payload = json!({ "body": body });
        let _: serde_json::Value = self
            .client
            .post(comments_url, Some(&payload))
            .await
            .map_err(|e| GitHubApiError::from_octocrab(format!("posting comment to {comments_url}"), e))?;
        Ok(())
    }

    async fn get_user(&self, login: &str) -> Result<User, GitHubApiError> {
        let route = format!("/users/{}", urlencoding::encode(login));
        self.client
            .get(&route, None::<&()>)
            .await
            .map_err(|e| GitHubApiError::from_octocrab(format!("fetching user {login}"), e))
    }
}
