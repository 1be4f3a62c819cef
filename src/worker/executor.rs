use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::queue::{Broker, BrokerError, Job, JobOutcome, JobQueue};
use crate::report::{render_trace, report_failure};
use crate::tasks::{Services, TaskError, run_task};
use crate::types::QueueName;

/// Terminal records older than this are removed when the worker starts.
pub const FINISHED_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A job the executor ran, with its recorded outcome.
#[derive(Debug, Clone)]
pub struct ExecutedJob {
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Runs jobs from an ordered list of queues.
///
/// Queues earlier in the list are drained first.
#[derive(Debug)]
pub struct Executor<S> {
    services: S,
    queues: Vec<JobQueue>,
    worker_name: String,
    poll_interval: Duration,
}

impl<S: Services + Sync> Executor<S> {
    /// Creates an executor over `queue_names` using the worker name and poll
    /// interval from the services' configuration.
    pub fn new(services: S, broker: &Broker, queue_names: &[QueueName]) -> Result<Self, BrokerError> {
        let queues = queue_names
            .iter()
            .map(|name| broker.queue(name))
            .collect::<Result<Vec<_>, _>>()?;
        let worker_name = services.config().worker_name.clone();
        let poll_interval = services.config().poll_interval;

        Ok(Executor {
            services,
            queues,
            worker_name,
            poll_interval,
        })
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    /// Fails jobs left behind by an exited worker of the same name, runs their
    /// failure hooks and removes old terminal records. Returns the recovered
    /// jobs.
    pub async fn recover(&self) -> Result<Vec<Job>, BrokerError> {
        let mut recovered = Vec::new();
        for queue in &self.queues {
            recovered.extend(queue.recover_abandoned(&self.worker_name)?);
            queue.cleanup_finished(FINISHED_RETENTION)?;
        }

        for job in &recovered {
            let err = TaskError::Abandoned(self.worker_name.clone());
            self.handle_failure(job, &err).await;
        }
        Ok(recovered)
    }

    /// Claims and runs the next runnable job, if any.
    pub async fn run_once(&self) -> Result<Option<ExecutedJob>, BrokerError> {
        for queue in &self.queues {
            if let Some(job) = queue.claim_next(&self.worker_name)? {
                let outcome = self.execute(queue, &job).await?;
                return Ok(Some(ExecutedJob { job, outcome }));
            }
        }
        Ok(None)
    }

    /// Runs a claimed job to completion and records its outcome.
    #[instrument(skip(self, queue, job), fields(queue = %queue.name(), job_id = %job.id, job_type = %job.job_type()))]
    pub async fn execute(&self, queue: &JobQueue, job: &Job) -> Result<JobOutcome, BrokerError> {
        let timeout = job.spec.timeout();
        debug!(?timeout, "Starting job");

        let result = match tokio::time::timeout(timeout, run_task(&self.services, queue, job)).await
        {
            Ok(result) => result,
            Err(_) => Err(TaskError::Timeout(timeout)),
        };

        let outcome = match &result {
            Ok(()) => JobOutcome::Finished,
            Err(e) => JobOutcome::Failed {
                error: e.to_string(),
            },
        };
        queue.finish(job, &outcome)?;

        match result {
            Ok(()) => info!("Job finished"),
            Err(e) => self.handle_failure(job, &e).await,
        }
        Ok(outcome)
    }

    /// Runs the job's failure hook. Delivery problems are logged only.
    async fn handle_failure(&self, job: &Job, err: &TaskError) {
        error!(job_id = %job.id, error = %err, kind = err.kind(), "Job failed");

        let Some(hook) = job.spec.on_failure else {
            return;
        };

        let trace = render_trace(err);
        if let Err(report_err) =
            report_failure(hook, job.meta(), err.kind(), &err.to_string(), &trace).await
        {
            warn!(error = %report_err, "Could not deliver failure report");
        }
    }

    /// Polls the queues until `shutdown` is cancelled.
    #[instrument(skip(self, shutdown), fields(worker = %self.worker_name))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let recovered = self.recover().await?;
        info!(
            queues = ?self.queues.iter().map(|q| q.name().as_str()).collect::<Vec<_>>(),
            recovered = recovered.len(),
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(error = %e, "Broker error while polling");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }
}
