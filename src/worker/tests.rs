//! Executor tests against a real broker directory and in-memory collaborators.

use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, MIRROR_JOB_TIMEOUT};
use crate::queue::{
    Broker, FailureHook, JobMeta, JobOutcome, JobPayload, JobSpec, JobStatus, JobType,
};
use crate::test_utils::{
    LiveProcess, MockCi, MockServices, claim_owner, comment_event, exited_pid,
};
use crate::types::QueueName;

use super::Executor;

// ─── Test Helpers ───

fn executor(dir: &TempDir, services: MockServices) -> (Executor<MockServices>, Broker) {
    let broker = Broker::new(dir.path());
    let queues = [QueueName::new("tasks"), QueueName::new("tasks_long")];
    let executor = Executor::new(services, &broker, &queues).unwrap();
    (executor, broker)
}

fn services() -> MockServices {
    let mut config = Config::new();
    config.worker_name = "test-worker".to_string();
    config.poll_interval = Duration::from_millis(10);
    MockServices::new().with_config(config)
}

fn delete_spec(url: &str) -> JobSpec {
    JobSpec::new(
        JobPayload::DeleteMirror {
            mirror_url: url.to_string(),
        },
        JobMeta::new(JobType::Delete),
        MIRROR_JOB_TIMEOUT,
    )
}

fn reindex_spec(timeout: Duration) -> JobSpec {
    JobSpec::new(
        JobPayload::ReindexMirror {
            mirror_url: "s3://spack-binaries-prs/shared_pr_mirror/{stack}".to_string(),
        },
        JobMeta::new(JobType::Reindex),
        timeout,
    )
}

fn pipeline_spec(comments_url: Option<String>) -> JobSpec {
    let event = comment_event(
        "alice",
        "https://api.github.com/repos/spack/spack/pulls/404",
    );
    let mut meta = JobMeta::new(JobType::Pipeline);
    if let Some(url) = comments_url {
        meta = meta.with_comments(url, Some("t0k".to_string()));
    }
    JobSpec::new(
        JobPayload::RunPipeline {
            event,
            retry: false,
        },
        meta,
        Duration::from_secs(60),
    )
    .with_on_failure(FailureHook::ReportPipelineFailure)
}

// ─── Execution ───

#[tokio::test]
async fn empty_queues_yield_nothing() {
    let dir = tempdir().unwrap();
    let (executor, _) = executor(&dir, services());
    assert!(executor.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn successful_job_is_finished() {
    let dir = tempdir().unwrap();
    let services = services();
    services
        .store
        .put("spack-binaries-prs", "pr1_fix/build_cache/a.spack", Utc::now());
    let (executor, broker) = executor(&dir, services);

    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();
    let job = long
        .enqueue(delete_spec("s3://spack-binaries-prs/pr1_fix"))
        .unwrap();

    let executed = executor.run_once().await.unwrap().unwrap();
    assert_eq!(executed.job.id, job.id);
    assert_eq!(executed.outcome, JobOutcome::Finished);
    assert_eq!(long.status(&job.id).unwrap(), JobStatus::Finished);
    assert!(executor.services().store.keys("spack-binaries-prs").is_empty());
}

#[tokio::test]
async fn short_queue_is_drained_first() {
    let dir = tempdir().unwrap();
    let (executor, broker) = executor(&dir, services());

    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();
    let short = broker.queue(&QueueName::new("tasks")).unwrap();
    long.enqueue(delete_spec("s3://b/pr1_a")).unwrap();
    let first = short.enqueue(pipeline_spec(None)).unwrap();

    let executed = executor.run_once().await.unwrap().unwrap();
    assert_eq!(executed.job.id, first.id);
}

#[tokio::test]
async fn dependent_job_runs_after_its_dependency() {
    let dir = tempdir().unwrap();
    let (executor, broker) = executor(&dir, services());
    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();

    let copy = long
        .enqueue(JobSpec::new(
            JobPayload::CopyMirror {
                pr_mirror_url: "s3://b/pr1_a".to_string(),
                shared_mirror_url: "s3://b/shared_pr_mirror".to_string(),
            },
            JobMeta::new(JobType::Copy),
            MIRROR_JOB_TIMEOUT,
        ))
        .unwrap();
    let delete = long
        .enqueue_after(delete_spec("s3://b/pr1_a"), &copy.job_ref())
        .unwrap();

    let order: Vec<_> = [
        executor.run_once().await.unwrap().unwrap().job.id,
        executor.run_once().await.unwrap().unwrap().job.id,
    ]
    .into();
    assert_eq!(order, vec![copy.id, delete.id]);
}

// ─── Failure ───

#[tokio::test]
async fn task_error_fails_job_and_posts_report() {
    let dir = tempdir().unwrap();
    let services = services().with_ci(Some(MockCi::new()));
    let (executor, broker) = executor(&dir, services);
    let server = MockServer::start();
    let comments = server.mock(|when, then| {
        when.method(POST)
            .path("/comments")
            .header("authorization", "Bearer t0k")
            .body_includes(r#""body":"\nI encountered an error attempting to run the pipeline."#)
            .body_includes("Error: GitHubApiError, GitHub API error (HTTP 404)");
        then.status(201);
    });

    let short = broker.queue(&QueueName::new("tasks")).unwrap();
    let job = short.enqueue(pipeline_spec(Some(server.url("/comments")))).unwrap();

    let executed = executor.run_once().await.unwrap().unwrap();
    assert!(matches!(executed.outcome, JobOutcome::Failed { .. }));
    assert_eq!(short.status(&job.id).unwrap(), JobStatus::Failed);
    let reason = short.failure_reason(&job.id).unwrap().unwrap();
    assert!(reason.contains("GitHub API error (HTTP 404)"));
    comments.assert_calls(1);
}

#[tokio::test]
async fn failed_job_without_comments_url_still_finishes() {
    let dir = tempdir().unwrap();
    let services = services().with_ci(Some(MockCi::new()));
    let (executor, broker) = executor(&dir, services);

    let short = broker.queue(&QueueName::new("tasks")).unwrap();
    let job = short.enqueue(pipeline_spec(None)).unwrap();

    executor.run_once().await.unwrap();
    assert_eq!(short.status(&job.id).unwrap(), JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_the_job() {
    let dir = tempdir().unwrap();
    let services = services();
    services.stacks.set_stacks(&["e4s"]);
    services.stacks.set_checkout_delay(Duration::from_secs(600));
    let (executor, broker) = executor(&dir, services);

    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();
    let job = long.enqueue(reindex_spec(Duration::from_secs(5))).unwrap();

    let executed = executor.run_once().await.unwrap().unwrap();
    assert_eq!(
        executed.outcome,
        JobOutcome::Failed {
            error: "job timed out after 5s".to_string()
        }
    );
    assert_eq!(long.status(&job.id).unwrap(), JobStatus::Failed);
    assert!(executor.services().stacks.reindexed().is_empty());
}

// ─── Lifecycle ───

#[tokio::test]
async fn abandoned_claims_are_failed_on_recover() {
    let dir = tempdir().unwrap();
    let (executor, broker) = executor(&dir, services());
    let server = MockServer::start();
    let comments = server.mock(|when, then| {
        when.method(POST)
            .path("/comments")
            .body_includes("I encountered an error attempting to run the pipeline.")
            .body_includes("Error: AbandonedJobException, job abandoned: worker test-worker exited");
        then.status(201);
    });

    let short = broker.queue(&QueueName::new("tasks")).unwrap();
    let job = short
        .enqueue(pipeline_spec(Some(server.url("/comments"))))
        .unwrap();
    short
        .claim_next_as(&claim_owner("test-worker", exited_pid()))
        .unwrap()
        .unwrap();

    let recovered = executor.recover().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, job.id);
    assert_eq!(short.status(&job.id).unwrap(), JobStatus::Failed);
    comments.assert_calls(1);
    assert!(executor.run_once().await.unwrap().is_none());
}

#[tokio::test]
async fn recover_leaves_running_peer_alone() {
    let dir = tempdir().unwrap();
    let services = services();
    services
        .store
        .put("spack-binaries-prs", "pr1_a/build_cache/a.spack", Utc::now());
    let (executor, broker) = executor(&dir, services);
    let peer = LiveProcess::spawn();

    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();
    let copy = long
        .enqueue(JobSpec::new(
            JobPayload::CopyMirror {
                pr_mirror_url: "s3://spack-binaries-prs/pr1_a".to_string(),
                shared_mirror_url: "s3://spack-binaries-prs/shared_pr_mirror".to_string(),
            },
            JobMeta::new(JobType::Copy),
            MIRROR_JOB_TIMEOUT,
        ))
        .unwrap();
    let delete = long
        .enqueue_after(delete_spec("s3://spack-binaries-prs/pr1_a"), &copy.job_ref())
        .unwrap();
    let peer_claim = long
        .claim_next_as(&claim_owner("test-worker", peer.pid()))
        .unwrap()
        .unwrap();

    assert!(executor.recover().await.unwrap().is_empty());
    assert_eq!(long.status(&copy.id).unwrap(), JobStatus::Started);
    assert!(executor.run_once().await.unwrap().is_none());
    assert_eq!(long.status(&delete.id).unwrap(), JobStatus::Deferred);

    long.finish(&peer_claim, &JobOutcome::Finished).unwrap();
    assert_eq!(long.status(&copy.id).unwrap(), JobStatus::Finished);
    let executed = executor.run_once().await.unwrap().unwrap();
    assert_eq!(executed.job.id, delete.id);
}

#[tokio::test]
async fn run_drains_queue_and_stops_on_cancel() {
    let dir = tempdir().unwrap();
    let services = services();
    services.stacks.set_stacks(&["e4s"]);
    let (executor, broker) = executor(&dir, services);

    let long = broker.queue(&QueueName::new("tasks_long")).unwrap();
    let a = long.enqueue(reindex_spec(MIRROR_JOB_TIMEOUT)).unwrap();
    let b = long.enqueue(reindex_spec(MIRROR_JOB_TIMEOUT)).unwrap();

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    let run = executor.run(shutdown);
    let stop = async {
        while !long.status(&b.id).unwrap().is_terminal() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stopper.cancel();
    };
    let (result, ()) = tokio::join!(run, stop);
    result.unwrap();

    assert_eq!(long.status(&a.id).unwrap(), JobStatus::Finished);
    assert_eq!(long.status(&b.id).unwrap(), JobStatus::Finished);
    // The first reindex saw the second one queued and stood down.
    assert_eq!(executor.services().stacks.reindexed().len(), 1);
}

#[tokio::test]
async fn cancelled_worker_exits_immediately() {
    let dir = tempdir().unwrap();
    let (executor, _) = executor(&dir, services());
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    executor.run(shutdown).await.unwrap();
}
