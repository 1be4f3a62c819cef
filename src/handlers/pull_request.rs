//! Handlers for closed pull requests.
//!
//! A closed PR leaves behind a dedicated binary mirror and a mirrored CI
//! branch. The mirror is always deleted. When graduation is enabled and the
//! PR merged into the expected base, its binaries are first copied into the
//! shared PR mirror, which is then pruned and reindexed:
//!
//! ```text
//! copy ──> prune ──> reindex
//!   └────> delete
//! ```
//!
//! Without graduation only the delete job is queued.

use tracing::{debug, info, instrument};

use crate::config::{Config, MIRROR_JOB_TIMEOUT};
use crate::gitlab::CiSystem;
use crate::queue::{Broker, Job, JobMeta, JobPayload, JobSpec};
use crate::types::PullRequestEvent;

use super::{HandlerError, HandlerResult};

/// Jobs queued for a closed PR.
#[derive(Debug, Clone, Default)]
pub struct ClosedPrJobs {
    pub copy: Option<Job>,
    pub prune: Option<Job>,
    pub reindex: Option<Job>,
    pub delete: Option<Job>,
}

impl ClosedPrJobs {
    /// All queued jobs in enqueue order.
    pub fn all(&self) -> impl Iterator<Item = &Job> {
        [&self.copy, &self.prune, &self.reindex, &self.delete]
            .into_iter()
            .flatten()
    }
}

fn mirror_spec(payload: JobPayload, event: &PullRequestEvent) -> JobSpec {
    let meta = JobMeta::new(payload.job_type())
        .with_pr(event.number, &event.pull_request.head.ref_name);
    JobSpec::new(payload, meta, MIRROR_JOB_TIMEOUT)
}

fn graduates(config: &Config, event: &PullRequestEvent) -> bool {
    config.graduation_enabled
        && event.pull_request.merged
        && event.pull_request.base.ref_name == config.pr_expected_base
}

/// Queues mirror cleanup for a closed PR on the long queue.
///
/// Events for PRs that are not closed queue nothing.
#[instrument(skip_all, fields(pr = %event.number))]
pub fn close_pr_mirror(
    config: &Config,
    broker: &Broker,
    event: &PullRequestEvent,
) -> HandlerResult<ClosedPrJobs> {
    let mut jobs = ClosedPrJobs::default();
    if !event.is_closed() {
        debug!(state = %event.pull_request.state, "PR is not closed");
        return Ok(jobs);
    }

    let branch = &event.pull_request.head.ref_name;
    let pr_mirror_url = config.pr_mirror_url(event.number, branch);
    let shared_mirror_url = config.shared_mirror_url();
    let queue = broker.queue(&config.long_queue)?;

    if graduates(config, event) {
        info!(%branch, base = %config.pr_expected_base, "PR merged, graduating binaries");

        let copy = queue.enqueue(mirror_spec(
            JobPayload::CopyMirror {
                pr_mirror_url: pr_mirror_url.clone(),
                shared_mirror_url: shared_mirror_url.clone(),
            },
            event,
        ))?;
        info!(job_id = %copy.id, "Copy job queued");

        // Copying can reintroduce binaries that are already published.
        let shared_stack_url = format!("{shared_mirror_url}/{{stack}}");
        let publish_stack_url = format!(
            "{}/{{stack}}/{}",
            config.publish_mirror_base_url, config.pr_expected_base
        );
        let prune = queue.enqueue_after(
            mirror_spec(
                JobPayload::PruneMirror {
                    shared_mirror_url: shared_stack_url.clone(),
                    publish_mirror_url: publish_stack_url,
                },
                event,
            ),
            &copy.job_ref(),
        )?;
        info!(job_id = %prune.id, "Prune job queued");

        let reindex = queue.enqueue_after(
            mirror_spec(
                JobPayload::ReindexMirror {
                    mirror_url: shared_stack_url,
                },
                event,
            ),
            &prune.job_ref(),
        )?;
        info!(job_id = %reindex.id, "Reindex job queued");

        jobs.copy = Some(copy);
        jobs.prune = Some(prune);
        jobs.reindex = Some(reindex);
    }

    let delete_spec = mirror_spec(
        JobPayload::DeleteMirror {
            mirror_url: pr_mirror_url,
        },
        event,
    );
    let delete = match &jobs.copy {
        Some(copy) => queue.enqueue_after(delete_spec, &copy.job_ref())?,
        None => queue.enqueue(delete_spec)?,
    };
    info!(job_id = %delete.id, "Delete job queued");
    jobs.delete = Some(delete);

    Ok(jobs)
}

/// Deletes the CI branch mirrored from a closed PR.
#[instrument(skip_all, fields(pr = %event.number))]
pub async fn close_pr_gitlab_branch<C: CiSystem>(
    config: &Config,
    ci: &C,
    event: &PullRequestEvent,
) -> HandlerResult<()> {
    let repo = event.repository.name.as_str();
    let project = config
        .project(repo)
        .ok_or_else(|| HandlerError::UnknownProject(repo.to_string()))?;

    let branch = Config::pr_mirror_key(event.number, &event.pull_request.head.ref_name);
    let encoded = urlencoding::encode(&branch);
    info!(%branch, "Deleting CI branch");
    ci.delete_branch(&project.gitlab_project_url, &encoded).await?;
    Ok(())
}
