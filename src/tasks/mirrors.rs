//! Mirror maintenance tasks run on the long queue.
//!
//! Prune and reindex first check for a pending job of the same type and
//! return early if one exists. Both operate per stack, with `{stack}` in
//! their URL templates expanded for each stack the catalog lists.

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::mirror::{
    copy_pr_mirror, delete_mirror, expand_stack, parse_mirror_url, prune_stack,
};
use crate::queue::{Job, JobQueue, check_skip_job};
use crate::stacks::{StackCatalog, StackCheckout};

use super::{Services, TaskResult};

/// Copies build artifacts from a PR mirror into the shared mirror.
#[instrument(skip(services))]
pub async fn copy_pr_mirror_task<S: Services>(
    services: &S,
    pr_mirror_url: &str,
    shared_mirror_url: &str,
) -> TaskResult<()> {
    let pr = parse_mirror_url(pr_mirror_url);
    let shared = parse_mirror_url(shared_mirror_url);

    let copied = copy_pr_mirror(services.store(), &pr, &shared).await?;
    info!(copied, "Copied PR binaries to shared mirror");
    Ok(())
}

/// Deletes every object under a mirror prefix.
#[instrument(skip(services))]
pub async fn delete_pr_mirror_task<S: Services>(services: &S, mirror_url: &str) -> TaskResult<()> {
    let mirror = parse_mirror_url(mirror_url);
    let deleted = delete_mirror(services.store(), &mirror).await?;
    info!(deleted, "Deleted mirror");
    Ok(())
}

/// Prunes expired and already-published artifacts from each stack's
/// shared mirror.
#[instrument(skip(services, queue, job), fields(job_id = %job.id))]
pub async fn prune_mirror_duplicates_task<S: Services>(
    services: &S,
    queue: &JobQueue,
    job: &Job,
    shared_mirror_url: &str,
    publish_mirror_url: &str,
) -> TaskResult<()> {
    if check_skip_job(queue, job)? {
        return Ok(());
    }

    let retire_after_days = services.config().retire_after_days;
    let checkout = services.stacks().checkout().await?;

    let mut total = 0;
    for stack in checkout.stacks() {
        let shared = parse_mirror_url(&expand_stack(shared_mirror_url, stack));
        let publish = parse_mirror_url(&expand_stack(publish_mirror_url, stack));

        let report = prune_stack(
            services.store(),
            &shared,
            &publish,
            retire_after_days,
            Utc::now(),
        )
        .await?;
        debug!(
            %stack,
            expired = report.expired.len(),
            published = report.published.len(),
            "Pruned stack"
        );
        total += report.total();
    }

    info!(stacks = checkout.stacks().len(), pruned = total, "Pruned shared mirror");
    Ok(())
}

/// Rebuilds the build-cache index of each stack's mirror.
#[instrument(skip(services, queue, job), fields(job_id = %job.id))]
pub async fn update_mirror_index_task<S: Services>(
    services: &S,
    queue: &JobQueue,
    job: &Job,
    mirror_url: &str,
) -> TaskResult<()> {
    if check_skip_job(queue, job)? {
        return Ok(());
    }

    let checkout = services.stacks().checkout().await?;
    for stack in checkout.stacks() {
        let stack_mirror = expand_stack(mirror_url, stack);
        info!(%stack, mirror = %stack_mirror, "Updating build cache index");
        checkout.update_index(&stack_mirror).await?;
    }
    Ok(())
}
