//! Cooperative dedup for maintenance jobs.
//!
//! Prune and reindex are idempotent in intent, so a queued job of the same type
//! supersedes the one about to run. The running job scans its own queue and
//! bails out if it finds one. The scan races with concurrent enqueues; the
//! worst case is one redundant run.

use tracing::debug;

use super::broker::{JobQueue, Result};
use super::job::Job;

/// Returns true if another job of the same type is pending on `job`'s queue.
pub fn check_skip_job(queue: &JobQueue, job: &Job) -> Result<bool> {
    let job_type = job.job_type();
    debug!(job_id = %job.id, %job_type, "Checking for superseding job");

    let superseded = queue
        .list_pending()?
        .iter()
        .filter(|pending| pending.id != job.id)
        .any(|pending| pending.meta().job_type == job_type);

    if superseded {
        debug!(
            job_id = %job.id,
            %job_type,
            pr = ?job.meta().pr_number,
            "Skipping job, an equivalent job is queued"
        );
    }

    Ok(superseded)
}
