//! GitLab CI collaborator.
//!
//! The CI system mirrors every PR into a branch named `github/pr{N}_{branch}`
//! and runs pipelines on it. Tasks reach it through [`CiSystem`]; the
//! production implementation is [`GitLabClient`].
//!
//! Responses are returned as raw JSON. GitLab reports many failures as JSON
//! bodies on non-2xx statuses, and the tasks turn a body missing the expected
//! fields into a user-facing comment rather than an error. Only transport
//! failures are errors.

mod client;

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::types::PrNumber;

pub use client::GitLabClient;

/// Errors talking to the CI system.
#[derive(Debug, Error)]
pub enum CiError {
    /// Request could not be sent or the response could not be read.
    #[error("GitLab request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The private token is not a valid header value.
    #[error("invalid GitLab token")]
    InvalidToken,
}

pub type CiResult<T> = Result<T, CiError>;

/// Prefix GitLab gives branches mirrored from GitHub.
pub const MIRRORED_BRANCH_PREFIX: &str = "github/";

/// CI operations needed by the tasks. `project_url` is the project's API base
/// (`.../api/v4/projects/<id>`); refs are passed already percent-encoded.
pub trait CiSystem {
    /// `GET {project}/repository/commits/{ref}`.
    fn branch_commit(
        &self,
        project_url: &str,
        encoded_ref: &str,
    ) -> impl Future<Output = CiResult<Value>> + Send;

    /// `POST {project}/pipeline?ref={ref}{extra_query}`.
    fn trigger_pipeline(
        &self,
        project_url: &str,
        encoded_ref: &str,
        extra_query: &str,
    ) -> impl Future<Output = CiResult<Value>> + Send;

    /// `GET {project}/pipelines?order_by=updated_at&ref={ref}`, newest first.
    fn list_pipelines(
        &self,
        project_url: &str,
        encoded_ref: &str,
    ) -> impl Future<Output = CiResult<Value>> + Send;

    /// `POST {project}/pipelines/{id}/retry`.
    fn retry_pipeline(
        &self,
        project_url: &str,
        pipeline_id: u64,
    ) -> impl Future<Output = CiResult<Value>> + Send;

    /// `DELETE {project}/repository/branches/{branch}`.
    fn delete_branch(
        &self,
        project_url: &str,
        encoded_branch: &str,
    ) -> impl Future<Output = CiResult<()>> + Send;
}

/// CI branch name for a PR, unencoded: `github/pr{N}_{branch}`.
pub fn pipeline_ref(pr: PrNumber, branch: &str) -> String {
    format!("{}{}", MIRRORED_BRANCH_PREFIX, Config::pr_mirror_key(pr, branch))
}

/// Percent-encoded CI ref for a PR, e.g. `github%2Fpr482_feature-x`.
pub fn encoded_pipeline_ref(pr: PrNumber, branch: &str) -> String {
    urlencoding::encode(&pipeline_ref(pr, branch)).into_owned()
}

/// Joins the CI web base with a `details_path` from a pipeline response.
pub fn pipeline_link(gitlab_url: &str, details_path: &str) -> String {
    format!(
        "{}/{}",
        gitlab_url.trim_end_matches('/'),
        details_path.trim_start_matches('/')
    )
}

/// Extracts `detailed_status.details_path` from a pipeline response.
pub fn details_path(response: &Value) -> Option<&str> {
    response.get("detailed_status")?.get("details_path")?.as_str()
}
