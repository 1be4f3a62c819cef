//! GitHub webhook payload subsets consumed by the job handlers.
//!
//! Only the fields the enqueue handlers and tasks read are modeled. The structs
//! deserialize straight from the raw webhook JSON and are stored verbatim inside
//! job descriptors, so a task sees exactly what the handler saw.
//!
//! - `issue_comment` (a bot command on a PR) becomes [`CommentEvent`]
//! - `pull_request` (lifecycle, used on close) becomes [`PullRequestEvent`]

use serde::{Deserialize, Serialize};

use super::{PrNumber, Sha};

/// A GitHub account reference (`{"login": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
}

/// Repository block of a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRepository {
    /// Short repository name (`spack`, `spack-packages`).
    pub name: String,

    /// Collaborator URL template, e.g. `.../collaborators{/collaborator}`.
    pub collaborators_url: String,
}

/// Link from an issue to its pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePullRequestLink {
    /// API URL of the pull request.
    pub url: String,
}

/// The issue a comment was made on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIssue {
    pub comments_url: String,

    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<IssuePullRequestLink>,
}

/// An `issue_comment` event carrying a bot command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub issue: EventIssue,
    pub repository: EventRepository,
    pub sender: Account,
}

impl CommentEvent {
    /// Returns the PR API URL, or `None` when the comment is on a plain issue.
    pub fn pull_request_url(&self) -> Option<&str> {
        self.issue.pull_request.as_ref().map(|pr| pr.url.as_str())
    }

    /// Returns the PR number parsed from the trailing segment of the PR URL.
    pub fn pr_number(&self) -> Option<PrNumber> {
        self.pull_request_url()?
            .rsplit('/')
            .next()?
            .parse::<u64>()
            .ok()
            .map(PrNumber)
    }
}

/// A branch reference inside a pull request (`head` or `base`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,

    #[serde(default)]
    pub sha: Option<Sha>,
}

/// Pull request block of a `pull_request` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPullRequest {
    pub state: String,

    #[serde(default)]
    pub merged: bool,

    pub head: BranchRef,
    pub base: BranchRef,
}

/// A `pull_request` webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub number: PrNumber,
    pub pull_request: EventPullRequest,
    pub repository: EventRepository,
}

impl PullRequestEvent {
    pub fn is_closed(&self) -> bool {
        self.pull_request.state == "closed"
    }
}
