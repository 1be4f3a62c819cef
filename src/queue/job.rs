//! Job descriptors.
//!
//! A [`JobSpec`] is what a handler hands to the broker: the task to run
//! ([`JobPayload`]), the metadata the task and its failure hook read
//! ([`JobMeta`]), a wall-clock timeout, an optional failure hook and an
//! optional dependency. Once enqueued it is wrapped in a [`Job`] and never
//! modified again.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CommentEvent, JobId, PrNumber, QueueName};

/// Kind of work a job performs. Used for dedup scans and in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Copy,
    Prune,
    Reindex,
    Delete,
    Style,
    Pipeline,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Copy => "copy",
            JobType::Prune => "prune",
            JobType::Reindex => "reindex",
            JobType::Delete => "delete",
            JobType::Style => "style",
            JobType::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The task a job runs, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum JobPayload {
    /// Trigger (or retry) the CI pipeline for the PR a comment was made on.
    RunPipeline {
        event: CommentEvent,
        #[serde(default)]
        retry: bool,
    },

    /// Run the auto-formatter on a PR branch and push the result.
    FixStyle { event: CommentEvent },

    /// Copy build artifacts from a PR mirror into the shared mirror.
    CopyMirror {
        pr_mirror_url: String,
        shared_mirror_url: String,
    },

    /// Prune expired and already-published artifacts from the shared mirror.
    /// Both URLs may contain a `{stack}` placeholder.
    PruneMirror {
        shared_mirror_url: String,
        publish_mirror_url: String,
    },

    /// Rebuild the build-cache index of each stack mirror (`{stack}` template).
    ReindexMirror { mirror_url: String },

    /// Delete every object under a mirror prefix.
    DeleteMirror { mirror_url: String },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::RunPipeline { .. } => JobType::Pipeline,
            JobPayload::FixStyle { .. } => JobType::Style,
            JobPayload::CopyMirror { .. } => JobType::Copy,
            JobPayload::PruneMirror { .. } => JobType::Prune,
            JobPayload::ReindexMirror { .. } => JobType::Reindex,
            JobPayload::DeleteMirror { .. } => JobType::Delete,
        }
    }
}

/// Hook run when a job fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHook {
    ReportPipelineFailure,
    ReportStyleFailure,
}

impl FailureHook {
    /// Lead sentence of the posted error report.
    pub fn headline(&self) -> &'static str {
        match self {
            FailureHook::ReportPipelineFailure => {
                "I encountered an error attempting to run the pipeline."
            }
            FailureHook::ReportStyleFailure => "I encountered an error attempting to format style.",
        }
    }
}

/// Metadata attached to a job.
///
/// Read by the task while it runs and by the failure hook afterwards, which
/// needs to know where to post and with which credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    #[serde(rename = "type")]
    pub job_type: JobType,

    #[serde(default)]
    pub pr_number: Option<PrNumber>,

    #[serde(default)]
    pub pr_branch: Option<String>,

    #[serde(default)]
    pub post_comments_url: Option<String>,

    #[serde(default, rename = "token")]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub rebuild_everything: bool,
}

impl JobMeta {
    pub fn new(job_type: JobType) -> Self {
        JobMeta {
            job_type,
            pr_number: None,
            pr_branch: None,
            post_comments_url: None,
            auth_token: None,
            rebuild_everything: false,
        }
    }

    pub fn with_pr(mut self, number: PrNumber, branch: impl Into<String>) -> Self {
        self.pr_number = Some(number);
        self.pr_branch = Some(branch.into());
        self
    }

    pub fn with_comments(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.post_comments_url = Some(url.into());
        self.auth_token = token;
        self
    }

    pub fn with_rebuild_everything(mut self, rebuild: bool) -> Self {
        self.rebuild_everything = rebuild;
        self
    }
}

impl fmt::Debug for JobMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobMeta")
            .field("job_type", &self.job_type)
            .field("pr_number", &self.pr_number)
            .field("pr_branch", &self.pr_branch)
            .field("post_comments_url", &self.post_comments_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("rebuild_everything", &self.rebuild_everything)
            .finish()
    }
}

/// Fully-qualified reference to an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    pub queue: QueueName,
    pub id: JobId,
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.queue, self.id)
    }
}

/// A job as submitted to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub payload: JobPayload,
    pub meta: JobMeta,
    pub timeout_secs: u64,

    #[serde(default)]
    pub on_failure: Option<FailureHook>,

    #[serde(default)]
    pub depends_on: Option<JobRef>,
}

impl JobSpec {
    /// Creates a descriptor. `meta.job_type` is forced to match the payload.
    pub fn new(payload: JobPayload, mut meta: JobMeta, timeout: Duration) -> Self {
        meta.job_type = payload.job_type();
        JobSpec {
            payload,
            meta,
            timeout_secs: timeout.as_secs(),
            on_failure: None,
            depends_on: None,
        }
    }

    pub fn with_on_failure(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

/// An enqueued job, as stored in the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub enqueued_at: DateTime<Utc>,
    pub spec: JobSpec,
}

impl Job {
    pub fn job_ref(&self) -> JobRef {
        JobRef {
            queue: self.queue.clone(),
            id: self.id.clone(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.spec.job_type()
    }

    pub fn meta(&self) -> &JobMeta {
        &self.spec.meta
    }
}

/// Terminal outcome recorded for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The task returned normally (this includes dedup skips and policy refusals).
    Finished,

    /// The task raised an error or timed out.
    Failed { error: String },
}
