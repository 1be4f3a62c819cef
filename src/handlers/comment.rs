//! Handlers for bot commands left as PR comments.
//!
//! Each enqueues one job on the short queue. The job carries the comments
//! URL and the installation token so the failure hook can report back to
//! the PR even though the task's own client is gone.

use tracing::info;

use crate::config::Config;
use crate::queue::{Broker, FailureHook, Job, JobMeta, JobPayload, JobSpec, JobType};
use crate::types::CommentEvent;

use super::HandlerResult;

fn comment_meta(job_type: JobType, event: &CommentEvent, token: Option<&str>) -> JobMeta {
    JobMeta::new(job_type).with_comments(&event.issue.comments_url, token.map(str::to_string))
}

fn enqueue_short(config: &Config, broker: &Broker, spec: JobSpec) -> HandlerResult<Job> {
    let queue = broker.queue(&config.short_queue)?;
    Ok(queue.enqueue(spec)?)
}

fn pipeline_spec(
    config: &Config,
    event: &CommentEvent,
    token: Option<&str>,
    retry: bool,
    rebuild_everything: bool,
) -> JobSpec {
    let meta = comment_meta(JobType::Pipeline, event, token)
        .with_rebuild_everything(rebuild_everything);
    JobSpec::new(
        JobPayload::RunPipeline {
            event: event.clone(),
            retry,
        },
        meta,
        config.job_timeout,
    )
    .with_on_failure(FailureHook::ReportPipelineFailure)
}

/// Queues a pipeline run for the commented PR.
pub fn run_pipeline(
    config: &Config,
    broker: &Broker,
    event: &CommentEvent,
    token: Option<&str>,
) -> HandlerResult<Job> {
    let job = enqueue_short(config, broker, pipeline_spec(config, event, token, false, false))?;
    info!(job_id = %job.id, "Run pipeline job enqueued");
    Ok(job)
}

/// Queues a pipeline run that rebuilds every package from source.
pub fn run_pipeline_rebuild_all(
    config: &Config,
    broker: &Broker,
    event: &CommentEvent,
    token: Option<&str>,
) -> HandlerResult<Job> {
    let job = enqueue_short(config, broker, pipeline_spec(config, event, token, false, true))?;
    info!(job_id = %job.id, "Rebuild everything job enqueued");
    Ok(job)
}

/// Queues a retry of the PR's most recent failed pipeline.
pub fn retry_pipeline(
    config: &Config,
    broker: &Broker,
    event: &CommentEvent,
    token: Option<&str>,
) -> HandlerResult<Job> {
    let job = enqueue_short(config, broker, pipeline_spec(config, event, token, true, false))?;
    info!(job_id = %job.id, "Retry pipeline job enqueued");
    Ok(job)
}

/// Queues a style fix for the commented PR.
pub fn fix_style(
    config: &Config,
    broker: &Broker,
    event: &CommentEvent,
    token: Option<&str>,
) -> HandlerResult<Job> {
    let spec = JobSpec::new(
        JobPayload::FixStyle {
            event: event.clone(),
        },
        comment_meta(JobType::Style, event, token),
        config.job_timeout,
    )
    .with_on_failure(FailureHook::ReportStyleFailure);

    let job = enqueue_short(config, broker, spec)?;
    info!(job_id = %job.id, "Fix style job enqueued");
    Ok(job)
}
