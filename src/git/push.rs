//! Push operations.
//!
//! A rejected push is an expected outcome (the PR author did not allow
//! maintainer edits) and is returned as [`PushResult::Rejected`], not as an
//! error.

use std::path::Path;

use crate::types::Sha;

use super::{GitError, GitResult, rev_parse};

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success {
        /// The SHA that was pushed.
        pushed_sha: Sha,
    },

    /// Push was rejected (permissions or non-fast-forward).
    Rejected {
        /// Details about why the push was rejected.
        details: String,
    },

    /// Push was a no-op (remote already has this commit).
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the push succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, PushResult::Success { .. })
    }

    /// Returns true if the push was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PushResult::Rejected { .. })
    }
}

/// Returns true if push stderr indicates the remote refused the update.
fn is_rejection(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    [
        "non-fast-forward",
        "rejected",
        "failed to push",
        "permission denied",
        "permission to",
        "could not read from remote repository",
    ]
    .iter()
    .any(|marker| stderr.contains(marker))
}

/// Push `local_branch` to `remote_branch` on origin.
pub fn push_branch(workdir: &Path, local_branch: &str, remote_branch: &str) -> GitResult<PushResult> {
    let refspec = format!("{}:{}", local_branch, remote_branch);
    let local_sha = rev_parse(workdir, local_branch)?;

    let output = super::git_command(workdir)
        .args(["push", "origin", &refspec])
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        if stdout.contains("Everything up-to-date") || stderr.contains("Everything up-to-date") {
            return Ok(PushResult::AlreadyUpToDate);
        }
        return Ok(PushResult::Success {
            pushed_sha: local_sha,
        });
    }

    if is_rejection(&stderr) {
        return Ok(PushResult::Rejected {
            details: stderr.to_string(),
        });
    }

    Err(GitError::CommandFailed {
        command: format!("git push origin {}", refspec),
        stderr: stderr.to_string(),
    })
}
