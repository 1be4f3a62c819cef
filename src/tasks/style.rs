//! Style fix: run the project formatter on a PR branch and push the result.
//!
//! The formatter always comes from a fresh clone of the trusted upstream
//! (`develop/`). The contributor's branch is fetched into a second clone
//! (`fork/`) that is only ever read and written as data.

use std::future::Future;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use crate::config::StyleTool;
use crate::git::{
    self, CloneOptions, CommitIdentity, CommitOutcome, PushResult, add_remote, checkout, clone,
    commit_all, fetch, push_branch, set_remote_url,
};
use crate::github::{VcsHost, noreply_email};
use crate::queue::JobMeta;
use crate::report::get_style_message;
use crate::types::CommentEvent;

use super::{Services, TaskError, TaskResult};

/// Local branch the PR head is fetched into.
pub const WORKING_BRANCH: &str = "spackbot-style-check-working-branch";

const ALLOW_EDITS_URL: &str = "https://docs.github.com/en/pull-requests/collaborating-with-pull-requests/working-with-forks/allowing-changes-to-a-pull-request-branch-created-from-a-fork#enabling-repository-maintainer-permissions-on-existing-pull-requests";

const ACKNOWLEDGEMENT: &str = "Let me see if I can fix that for you!";

const NO_FURTHER_CHANGES: &str = "\nI wasn't able to make any further changes, but please see the message above for remaining issues you can fix locally!";

const UPDATED_BRANCH: &str = "\n\nI've updated the branch with style fixes.";

/// Provisions isolated working copies for a style run.
pub trait StyleWorkspace {
    type Session: StyleSession + Send + Sync;

    /// Clones `upstream_url` as the trusted tool source and checks out
    /// `branch` from `fork_url` in a derived clone.
    fn prepare(
        &self,
        upstream_url: &str,
        fork_url: &str,
        branch: &str,
    ) -> impl Future<Output = TaskResult<Self::Session>> + Send;
}

/// A prepared pair of clones. Dropping it removes them.
pub trait StyleSession {
    /// Runs the formatter over the fork and returns its standard output.
    fn run_formatter(&self, tool: StyleTool) -> impl Future<Output = TaskResult<String>> + Send;

    /// Commits all tracked changes in the fork.
    fn commit(
        &self,
        identity: &CommitIdentity,
        message: &str,
    ) -> impl Future<Output = TaskResult<CommitOutcome>> + Send;

    /// Pushes the working branch to `branch` on the fork.
    fn push(&self, branch: &str) -> impl Future<Output = TaskResult<PushResult>> + Send;
}

/// [`StyleWorkspace`] backed by git clones in a temporary directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitStyleWorkspace;

impl StyleWorkspace for GitStyleWorkspace {
    type Session = GitStyleSession;

    async fn prepare(
        &self,
        upstream_url: &str,
        fork_url: &str,
        branch: &str,
    ) -> TaskResult<GitStyleSession> {
        let upstream_url = upstream_url.to_string();
        let fork_url = fork_url.to_string();
        let branch = branch.to_string();

        tokio::task::spawn_blocking(move || {
            GitStyleSession::create(&upstream_url, &fork_url, &branch)
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

/// Clones for one style run: `develop/` (trusted) and `fork/` (the PR).
#[derive(Debug)]
pub struct GitStyleSession {
    _dir: TempDir,
    develop: PathBuf,
    fork: PathBuf,
}

impl GitStyleSession {
    fn create(upstream_url: &str, fork_url: &str, branch: &str) -> TaskResult<Self> {
        let dir = TempDir::new()?;
        let root = dir.path();

        clone(root, upstream_url, "develop", &CloneOptions::default())?;
        clone(root, "develop", "fork", &CloneOptions::default())?;

        let fork = root.join("fork");
        add_remote(&fork, "upstream", fork_url)?;
        set_remote_url(&fork, "origin", fork_url)?;

        let refspec = format!("{}:{}", branch, WORKING_BRANCH);
        fetch(&fork, &[&refspec])?;
        checkout(&fork, WORKING_BRANCH)?;

        debug!(dir = %root.display(), %branch, "Prepared style workspace");
        Ok(GitStyleSession {
            develop: root.join("develop"),
            fork,
            _dir: dir,
        })
    }

    pub fn develop_dir(&self) -> &Path {
        &self.develop
    }

    pub fn fork_dir(&self) -> &Path {
        &self.fork
    }

    /// The formatter from the trusted clone, or the bare name on `PATH`.
    fn formatter_program(&self, tool: StyleTool) -> PathBuf {
        let trusted = self.develop.join(tool.program());
        if trusted.exists() {
            return trusted;
        }
        Path::new(tool.program())
            .file_name()
            .map(PathBuf::from)
            .unwrap_or(trusted)
    }
}

impl StyleSession for GitStyleSession {
    async fn run_formatter(&self, tool: StyleTool) -> TaskResult<String> {
        let program = self.formatter_program(tool);
        let root = self.fork.to_string_lossy().into_owned();

        let output = Command::new(&program)
            .args(tool.args(&root))
            .current_dir(&self.fork)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(program = %program.display(), code = ?output.status.code(), "Formatter finished");
        debug!("style [error]\n{}", stderr);

        // The formatter exits 1 when it reports issues it could not fix.
        match output.status.code() {
            Some(0) | Some(1) => Ok(stdout),
            code => Err(TaskError::FormatterFailed {
                program: program.display().to_string(),
                code,
                output: format!("{stdout}{stderr}"),
            }),
        }
    }

    async fn commit(&self, identity: &CommitIdentity, message: &str) -> TaskResult<CommitOutcome> {
        let fork = self.fork.clone();
        let identity = identity.clone();
        let message = message.to_string();

        let outcome =
            tokio::task::spawn_blocking(move || commit_all(&fork, &identity, &message))
                .await
                .map_err(std::io::Error::other)??;
        Ok(outcome)
    }

    async fn push(&self, branch: &str) -> TaskResult<PushResult> {
        let fork = self.fork.clone();
        let branch = branch.to_string();

        let result =
            tokio::task::spawn_blocking(move || push_branch(&fork, WORKING_BRANCH, &branch))
                .await
                .map_err(std::io::Error::other)??;
        Ok(result)
    }
}

fn push_rejected_note() -> String {
    format!(
        "\n\nBut it looks like I'm not able to push to your branch. 😭️ Did you check [Allow edits from maintainers]({ALLOW_EDITS_URL}) when you opened the PR?"
    )
}

/// Runs the formatter on a PR branch, commits as the PR author and pushes.
///
/// Refusals, "nothing to commit" and push rejections are reported in PR
/// comments. Clone, formatter and API failures are errors.
#[instrument(skip_all, fields(sender = %event.sender.login))]
pub async fn fix_style_task<S: Services>(
    services: &S,
    meta: &JobMeta,
    event: &CommentEvent,
) -> TaskResult<()> {
    let gh = services.vcs(meta.auth_token.as_deref())?;
    let comments_url = event.issue.comments_url.as_str();
    let pr_url = event.pull_request_url().ok_or(TaskError::NotAPullRequest)?;

    let pr = gh.get_pull_request(pr_url).await?;
    let sender = event.sender.login.as_str();
    let author = pr.user.login.as_str();

    if sender != author
        && !gh
            .is_collaborator(&event.repository.collaborators_url, sender)
            .await?
    {
        info!(%author, "Requester is neither the author nor a collaborator");
        let msg = format!(
            "Sorry {sender}, I cannot do that for you. Only {author} and users with write can make this request!"
        );
        gh.post_comment(comments_url, &msg).await?;
        return Ok(());
    }

    gh.post_comment(comments_url, ACKNOWLEDGEMENT).await?;

    let user = gh.get_user(author).await?;
    let identity = CommitIdentity {
        name: user.login.clone(),
        email: noreply_email(&user),
    };

    let repo_name = event.repository.name.as_str();
    let project = services
        .config()
        .project(repo_name)
        .ok_or_else(|| TaskError::UnknownProject(repo_name.to_string()))?;
    let fork_url = pr
        .head
        .repo
        .as_ref()
        .map(|repo| repo.ssh_url.as_str())
        .ok_or(TaskError::MissingHeadRepository)?;
    let branch = pr.head.ref_name.as_str();

    info!(user = %identity.name, email = %identity.email, fork = %fork_url, %branch, "Fixing style");

    let session = services
        .style()
        .prepare(&project.upstream_url, fork_url, branch)
        .await?;

    let output = session.run_formatter(project.style_tool).await?;
    let mut message = get_style_message(&output);

    let commit_message = format!(
        "[{}] updating style on behalf of {}",
        services.config().botname,
        identity.name
    );
    match session.commit(&identity, &commit_message).await? {
        CommitOutcome::NothingToCommit => {
            info!("Unable to make any further changes");
            message.push_str(NO_FURTHER_CHANGES);
            gh.post_comment(comments_url, &message).await?;
            return Ok(());
        }
        CommitOutcome::Committed { sha } => {
            debug!(sha = %sha.short(), "Committed style fixes");
        }
    }

    message.push_str(UPDATED_BRANCH);

    match session.push(branch).await {
        Ok(PushResult::Rejected { details }) => {
            error!(%details, "Unable to push to branch");
            message.push_str(&push_rejected_note());
        }
        Err(TaskError::Git(git::GitError::CommandFailed { command, stderr })) => {
            error!(%command, %stderr, "Unable to push to branch");
            message.push_str(&push_rejected_note());
        }
        Ok(_) => {}
        Err(e) => return Err(e),
    }

    gh.post_comment(comments_url, &message).await?;
    Ok(())
}
