//! Task bodies run by the worker.
//!
//! Each [`JobPayload`] variant maps to one task function. Tasks reach the
//! outside world only through the collaborators a [`Services`] value hands
//! out, which lets tests run them against in-memory doubles.
//!
//! Expected outcomes (permission refused, stale CI, nothing to commit) are
//! posted as comments and return `Ok`. Anything else is a [`TaskError`],
//! which the worker turns into a failure report.

pub mod mirrors;
pub mod pipeline;
pub mod style;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::config::Config;
use crate::git::GitError;
use crate::github::{GitHubApiError, OctocrabClient, VcsHost};
use crate::gitlab::{CiError, CiSystem, GitLabClient};
use crate::mirror::{ConfiguredStore, ObjectStore, StoreError};
use crate::queue::{BrokerError, Job, JobPayload, JobQueue};
use crate::stacks::{SpackStackCatalog, StackCatalog, StackError};

use style::{GitStyleWorkspace, StyleWorkspace};

/// Errors that fail a job.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    GitHub(#[from] GitHubApiError),

    #[error(transparent)]
    Ci(#[from] CiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stacks(#[from] StackError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("could not build GitHub client: {0}")]
    Client(#[from] octocrab::Error),

    #[error("formatter {program} exited with status {code:?}\n{output}")]
    FormatterFailed {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("no project configured for repository {0}")]
    UnknownProject(String),

    #[error("comment is not on a pull request")]
    NotAPullRequest,

    #[error("head repository of the pull request is unavailable")]
    MissingHeadRepository,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    #[error("job abandoned: worker {0} exited before it finished")]
    Abandoned(String),
}

impl TaskError {
    /// Short error type name shown in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::GitHub(_) => "GitHubApiError",
            TaskError::Ci(_) => "CiError",
            TaskError::Store(_) => "StoreError",
            TaskError::Stacks(_) => "StackError",
            TaskError::Git(_) => "GitError",
            TaskError::Broker(_) => "BrokerError",
            TaskError::Client(_) => "ClientError",
            TaskError::FormatterFailed { .. } => "FormatterFailed",
            TaskError::UnknownProject(_) => "UnknownProject",
            TaskError::NotAPullRequest => "NotAPullRequest",
            TaskError::MissingHeadRepository => "MissingHeadRepository",
            TaskError::Io(_) => "IoError",
            TaskError::Timeout(_) => "JobTimeoutException",
            TaskError::Abandoned(_) => "AbandonedJobException",
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Collaborators available to tasks.
pub trait Services {
    type Vcs: VcsHost + Send + Sync;
    type Ci: CiSystem + Send + Sync;
    type Store: ObjectStore + Send + Sync;
    type Stacks: StackCatalog + Send + Sync;
    type Style: StyleWorkspace + Send + Sync;

    fn config(&self) -> &Config;

    /// A GitHub client authenticated with the job's token.
    fn vcs(&self, token: Option<&str>) -> TaskResult<Self::Vcs>;

    /// The CI client, or `None` when no CI token is configured.
    fn ci(&self) -> Option<&Self::Ci>;

    fn store(&self) -> &Self::Store;

    fn stacks(&self) -> &Self::Stacks;

    fn style(&self) -> &Self::Style;
}

/// Production collaborators built from configuration.
#[derive(Debug)]
pub struct LiveServices {
    config: Config,
    ci: Option<GitLabClient>,
    store: ConfiguredStore,
    stacks: SpackStackCatalog,
    style: GitStyleWorkspace,
}

impl LiveServices {
    pub fn new(config: Config) -> TaskResult<Self> {
        let ci = config
            .gitlab_token
            .as_deref()
            .map(GitLabClient::new)
            .transpose()?;
        let store = ConfiguredStore::from_backend(&config.store_backend);
        let stacks = SpackStackCatalog::new(&config.stacks_upstream_url, &config.pr_expected_base);

        Ok(LiveServices {
            config,
            ci,
            store,
            stacks,
            style: GitStyleWorkspace,
        })
    }
}

impl Services for LiveServices {
    type Vcs = OctocrabClient;
    type Ci = GitLabClient;
    type Store = ConfiguredStore;
    type Stacks = SpackStackCatalog;
    type Style = GitStyleWorkspace;

    fn config(&self) -> &Config {
        &self.config
    }

    fn vcs(&self, token: Option<&str>) -> TaskResult<OctocrabClient> {
        let client = match token {
            Some(token) => OctocrabClient::from_token(token)?,
            None => OctocrabClient::anonymous()?,
        };
        Ok(client)
    }

    fn ci(&self) -> Option<&GitLabClient> {
        self.ci.as_ref()
    }

    fn store(&self) -> &ConfiguredStore {
        &self.store
    }

    fn stacks(&self) -> &SpackStackCatalog {
        &self.stacks
    }

    fn style(&self) -> &GitStyleWorkspace {
        &self.style
    }
}

/// Runs the task for a claimed job.
#[instrument(skip_all, fields(job_id = %job.id, job_type = %job.job_type()))]
pub async fn run_task<S: Services>(services: &S, queue: &JobQueue, job: &Job) -> TaskResult<()> {
    info!("Running task");
    match &job.spec.payload {
        JobPayload::RunPipeline { event, retry } => {
            pipeline::run_pipeline_task(services, job.meta(), event, *retry).await
        }
        JobPayload::FixStyle { event } => style::fix_style_task(services, job.meta(), event).await,
        JobPayload::CopyMirror {
            pr_mirror_url,
            shared_mirror_url,
        } => mirrors::copy_pr_mirror_task(services, pr_mirror_url, shared_mirror_url).await,
        JobPayload::PruneMirror {
            shared_mirror_url,
            publish_mirror_url,
        } => {
            mirrors::prune_mirror_duplicates_task(
                services,
                queue,
                job,
                shared_mirror_url,
                publish_mirror_url,
            )
            .await
        }
        JobPayload::ReindexMirror { mirror_url } => {
            mirrors::update_mirror_index_task(services, queue, job, mirror_url).await
        }
        JobPayload::DeleteMirror { mirror_url } => {
            mirrors::delete_pr_mirror_task(services, mirror_url).await
        }
    }
}
