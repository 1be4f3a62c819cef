//! Local git operations for the style-fix workflow and stack discovery.
//!
//! Every command runs with system and global config disabled and terminal
//! prompts off, so behavior does not depend on the host's git setup and a
//! missing credential fails fast instead of hanging the worker.
//!
//! - Clone, remote and fetch plumbing live here
//! - [`commit`] commits tracked changes and detects "nothing to commit"
//! - [`push`] pushes a local branch and classifies rejections

pub mod commit;
pub mod push;

use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use commit::{CommitOutcome, commit_all};
pub use push::{PushResult, push_branch};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for creating commits.
///
/// Passed via `-c` flags, so commits work even with global and system config
/// disabled and nothing is written to `.git/config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,
}

/// Create a git Command with clean environment (no system/user config).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    // Disable system and user config for reproducible behavior
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");

    // Disable terminal prompts
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Create a git Command configured for commit operations.
///
/// Extends [`git_command`] with `-c user.name=<name> -c user.email=<email>`.
pub(crate) fn git_commit_command(
    workdir: &Path,
    identity: &CommitIdentity,
) -> std::process::Command {
    let mut cmd = git_command(workdir);
    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));
    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<Sha> {
    let sha = run_git_stdout(workdir, &["rev-parse", rev])?;
    Ok(Sha::new(sha))
}

/// Options for [`clone`].
#[derive(Debug, Clone, Default)]
pub struct CloneOptions<'a> {
    /// Branch to check out instead of the remote HEAD.
    pub branch: Option<&'a str>,

    /// History depth for a shallow clone.
    pub depth: Option<u32>,
}

/// Clone `url` into `workdir/dest`.
///
/// `url` may be a local path, which is how the style task derives its working
/// clone from the trusted reference checkout.
pub fn clone(workdir: &Path, url: &str, dest: &str, options: &CloneOptions<'_>) -> GitResult<()> {
    let depth = options.depth.map(|d| d.to_string());

    let mut args = vec!["clone"];
    if let Some(branch) = options.branch {
        args.extend(["--branch", branch]);
    }
    if let Some(ref depth) = depth {
        args.extend(["--depth", depth.as_str()]);
    }
    args.extend([url, dest]);

    run_git_sync(workdir, &args)?;
    Ok(())
}

/// Add a named remote.
pub fn add_remote(workdir: &Path, name: &str, url: &str) -> GitResult<()> {
    run_git_sync(workdir, &["remote", "add", name, url])?;
    Ok(())
}

/// Point an existing remote at a new URL.
pub fn set_remote_url(workdir: &Path, name: &str, url: &str) -> GitResult<()> {
    run_git_sync(workdir, &["remote", "set-url", name, url])?;
    Ok(())
}

/// Fetch refs from origin.
pub fn fetch(workdir: &Path, refspecs: &[&str]) -> GitResult<()> {
    let mut args = vec!["fetch", "origin"];
    args.extend(refspecs);
    run_git_sync(workdir, &args)?;
    Ok(())
}

/// Check out a local branch.
pub fn checkout(workdir: &Path, branch: &str) -> GitResult<()> {
    run_git_sync(workdir, &["checkout", branch])?;
    Ok(())
}
