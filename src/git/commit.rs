//! Committing formatter output.

use std::path::Path;

use crate::types::Sha;

use super::{CommitIdentity, GitError, GitResult, git_commit_command, rev_parse};

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created.
    Committed { sha: Sha },

    /// The working tree had no changes to tracked files.
    NothingToCommit,
}

/// Returns true if commit output says there was nothing to commit.
pub fn is_up_to_date(output: &str) -> bool {
    ["nothing to commit", "nothing added to commit", "no changes added to commit"]
        .iter()
        .any(|marker| output.contains(marker))
}

/// Commit all modified tracked files (`git commit -a`) under `identity`.
///
/// An empty change set is reported as [`CommitOutcome::NothingToCommit`]
/// rather than an error.
pub fn commit_all(
    workdir: &Path,
    identity: &CommitIdentity,
    message: &str,
) -> GitResult<CommitOutcome> {
    let output = git_commit_command(workdir, identity)
        .args(["commit", "-a", "-m", message])
        .output()?;

    if output.status.success() {
        let sha = rev_parse(workdir, "HEAD")?;
        return Ok(CommitOutcome::Committed { sha });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if is_up_to_date(&stdout) {
        return Ok(CommitOutcome::NothingToCommit);
    }

    Err(GitError::CommandFailed {
        command: format!("git commit -a -m {:?}", message),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
