//! GitHub collaborator.
//!
//! Tasks talk to GitHub through the [`VcsHost`] trait: fetch a pull request,
//! check collaborator access, look up a user and post a comment. The
//! production implementation is [`OctocrabClient`]; tests use an in-memory
//! double. All resources are addressed by the absolute API URLs embedded in
//! webhook payloads.

mod client;
mod error;

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, Sha};

pub use client::OctocrabClient;
pub use error::GitHubApiError;

/// Placeholder in the `collaborators_url` template of a webhook payload.
const COLLABORATOR_PLACEHOLDER: &str = "{/collaborator}";

/// Accounts created after this date get id-prefixed noreply addresses.
const NOREPLY_ID_CUTOFF: (i32, u32, u32) = (2017, 7, 18);

/// A GitHub account as returned by the users API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

/// Author reference on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestUser {
    pub login: String,
}

/// Repository a PR head lives in (usually a fork).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRepository {
    pub name: String,
    pub ssh_url: String,
}

/// Head of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: Sha,

    /// Absent when the fork was deleted.
    #[serde(default)]
    pub repo: Option<HeadRepository>,
}

/// The subset of a pull request the tasks read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: PrNumber,
    pub user: PullRequestUser,
    pub head: PullRequestHead,
}

/// GitHub operations needed by the tasks.
pub trait VcsHost {
    /// Fetches a pull request by its API URL.
    fn get_pull_request(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<PullRequest, GitHubApiError>> + Send;

    /// Returns true if `login` is a collaborator, given the payload's
    /// `collaborators_url` template.
    fn is_collaborator(
        &self,
        collaborators_url: &str,
        login: &str,
    ) -> impl Future<Output = Result<bool, GitHubApiError>> + Send;

    /// Posts an issue comment.
    fn post_comment(
        &self,
        comments_url: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    /// Looks up a user by login.
    fn get_user(&self, login: &str) -> impl Future<Output = Result<User, GitHubApiError>> + Send;
}

/// Expands a `.../collaborators{/collaborator}` template for one login.
pub fn collaborator_url(template: &str, login: &str) -> String {
    let encoded = urlencoding::encode(login);
    if template.contains(COLLABORATOR_PLACEHOLDER) {
        template.replace(COLLABORATOR_PLACEHOLDER, &format!("/{}", encoded))
    } else {
        format!("{}/{}", template.trim_end_matches('/'), encoded)
    }
}

/// The noreply commit email GitHub associates with a user.
///
/// Accounts created after 2017-07-18 use `{id}+{login}@users.noreply.github.com`;
/// older ones use `{login}@users.noreply.github.com`.
pub fn noreply_email(user: &User) -> String {
    let (y, m, d) = NOREPLY_ID_CUTOFF;
    let cutoff = NaiveDate::from_ymd_opt(y, m, d);
    let created = user.created_at.date_naive();

    if cutoff.is_some_and(|cutoff| created > cutoff) {
        format!("{}+{}@users.noreply.github.com", user.id, user.login)
    } else {
        format!("{}@users.noreply.github.com", user.login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn user(created: DateTime<Utc>) -> User {
        User {
            login: "alice".to_string(),
            id: 4242,
            created_at: created,
        }
    }

    #[test]
    fn noreply_email_new_account_has_id() {
        let u = user(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(noreply_email(&u), "4242+alice@users.noreply.github.com");
    }

    #[test]
    fn noreply_email_old_account_is_login_only() {
        let u = user(Utc.with_ymd_and_hms(2012, 5, 3, 0, 0, 0).unwrap());
        assert_eq!(noreply_email(&u), "alice@users.noreply.github.com");
    }

    #[test]
    fn noreply_email_cutoff_day_is_old_form() {
        let u = user(Utc.with_ymd_and_hms(2017, 7, 18, 23, 0, 0).unwrap());
        assert_eq!(noreply_email(&u), "alice@users.noreply.github.com");
        let u = user(Utc.with_ymd_and_hms(2017, 7, 19, 0, 0, 0).unwrap());
        assert_eq!(noreply_email(&u), "4242+alice@users.noreply.github.com");
    }

    #[test]
    fn expands_collaborator_template() {
        assert_eq!(
            collaborator_url(
                "https://api.github.com/repos/spack/spack/collaborators{/collaborator}",
                "rando123"
            ),
            "https://api.github.com/repos/spack/spack/collaborators/rando123"
        );
        assert_eq!(
            collaborator_url("https://api.github.com/repos/spack/spack/collaborators/", "bob"),
            "https://api.github.com/repos/spack/spack/collaborators/bob"
        );
    }

    #[test]
    fn pull_request_deserializes_from_api_json() {
        let pr: PullRequest = serde_json::from_value(json!({
            "number": 482,
            "state": "open",
            "user": { "login": "alice", "id": 1 },
            "head": {
                "ref": "feature-x",
                "sha": "abcd1234abcd1234abcd1234abcd1234abcd1234",
                "repo": {
                    "name": "spack",
                    "ssh_url": "git@github.com:alice/spack.git",
                    "full_name": "alice/spack"
                }
            },
            "base": { "ref": "develop" }
        }))
        .unwrap();

        assert_eq!(pr.number, PrNumber(482));
        assert_eq!(pr.head.ref_name, "feature-x");
        assert_eq!(pr.head.sha.short(), "abcd123");
        assert_eq!(
            pr.head.repo.unwrap().ssh_url,
            "git@github.com:alice/spack.git"
        );
    }
}
