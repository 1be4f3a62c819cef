//! Filesystem-backed job broker.
//!
//! Each named queue is a directory under the broker root. A job is a JSON
//! descriptor plus marker files that record its progress:
//!
//! ```text
//! <job-id>.json         descriptor (pending while no marker exists)
//! <job-id>.json.proc    claimed by a worker (contains the ClaimOwner JSON)
//! <job-id>.json.done    finished
//! <job-id>.json.failed  failed or timed out (contains the error text)
//! <job-id>.json.tmp     transient, during the atomic descriptor write
//! ```
//!
//! Claim markers are created with exclusive-create semantics, so when several
//! worker processes poll the same queue directory each job is handed to at most
//! one of them. A claim records the worker name, host and pid of its owner,
//! so that recovery after a crash only touches claims whose process is gone.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{Pid, gethostname};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::job::{Job, JobOutcome, JobRef, JobSpec};
use crate::types::{JobId, QueueName};

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker directory could not be read or written.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] io::Error),

    /// A job descriptor could not be serialized or parsed.
    #[error("corrupt job record: {0}")]
    Json(#[from] serde_json::Error),

    /// Job id contains path separators or other unsafe characters.
    #[error("invalid job id: {0}")]
    InvalidJobId(JobId),

    /// Queue name contains path separators or other unsafe characters.
    #[error("invalid queue name: {0}")]
    InvalidQueueName(QueueName),

    /// A record with this id already exists.
    #[error("duplicate job id: {0}")]
    DuplicateJob(JobId),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Progress of a job as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Pending and runnable.
    Queued,

    /// Pending, waiting for its dependency to reach a terminal state.
    Deferred,

    /// Claimed by a worker.
    Started,

    Finished,
    Failed,

    /// No record (never existed, or cleaned up after finishing).
    Missing,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

/// The process holding a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOwner {
    pub worker: String,
    pub host: String,
    pub pid: u32,
}

impl ClaimOwner {
    /// This process, claiming as `worker`.
    pub fn current(worker: &str) -> Self {
        ClaimOwner {
            worker: worker.to_string(),
            host: local_host(),
            pid: std::process::id(),
        }
    }

    /// Reads a claim marker. A marker holding only a worker name has no pid
    /// and is attributed to an exited process on this host.
    fn parse(contents: &str) -> Self {
        serde_json::from_str(contents).unwrap_or_else(|_| ClaimOwner {
            worker: contents.trim().to_string(),
            host: local_host(),
            pid: 0,
        })
    }

    /// Whether the owning process may still be running. Claims made on
    /// another host cannot be checked and count as live.
    pub fn is_alive(&self) -> bool {
        if self.host != local_host() {
            return true;
        }
        if self.pid == std::process::id() {
            return true;
        }
        let Ok(raw) = i32::try_from(self.pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        // Signal 0 only checks that the pid exists.
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

fn local_host() -> String {
    gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Queue names and job ids become file names, so they must not be able to
/// escape the broker directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\', '\0']) && !name.starts_with('.')
}

fn validate_job_id(id: &JobId) -> Result<()> {
    if is_safe_name(id.as_str()) {
        Ok(())
    } else {
        Err(BrokerError::InvalidJobId(id.clone()))
    }
}

/// Paths belonging to a single job record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JobRecord {
    payload_path: PathBuf,
}

impl JobRecord {
    fn new(queue_dir: &Path, id: &JobId) -> Self {
        JobRecord {
            payload_path: queue_dir.join(format!("{}.json", id.as_str())),
        }
    }

    fn claim_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.proc")
    }

    fn done_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.done")
    }

    fn failed_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.failed")
    }

    fn temp_path(&self) -> PathBuf {
        self.payload_path.with_extension("json.tmp")
    }

    fn exists(&self) -> bool {
        self.payload_path.exists()
    }

    fn is_claimed(&self) -> bool {
        self.claim_path().exists()
    }

    fn is_terminal(&self) -> bool {
        self.done_path().exists() || self.failed_path().exists()
    }

    fn is_pending(&self) -> bool {
        self.exists() && !self.is_claimed() && !self.is_terminal()
    }

    fn read(&self) -> Result<Job> {
        let bytes = fs::read(&self.payload_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn remove(&self) {
        // Partial cleanup is fine: a stray marker without a descriptor is inert.
        let _ = fs::remove_file(self.done_path());
        let _ = fs::remove_file(self.failed_path());
        let _ = fs::remove_file(self.claim_path());
        let _ = fs::remove_file(&self.payload_path);
        let _ = fs::remove_file(self.temp_path());
    }
}

/// Syncs a directory so that created, renamed or removed entries are durable.
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Writes `bytes` to `dest` via a synced temp file and rename.
fn write_atomic(temp: &Path, dest: &Path, bytes: &[u8], dir: &Path) -> io::Result<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(temp, dest)?;
    sync_dir(dir)
}

/// Extracts the job id from `<id>.json` or `<id>.json.<marker>`.
fn job_id_from_path(path: &Path) -> Option<JobId> {
    let mut name = path.file_name()?.to_str()?;
    if let Some((stem, _marker)) = name.split_once(".json.") {
        name = stem;
    } else {
        name = name.strip_suffix(".json")?;
    }
    is_safe_name(name).then(|| JobId::new(name))
}

/// Handle on the broker root directory.
#[derive(Debug, Clone)]
pub struct Broker {
    root: PathBuf,
}

impl Broker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Broker { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens the named queue. The directory is created lazily on first enqueue.
    pub fn queue(&self, name: &QueueName) -> Result<JobQueue> {
        if !is_safe_name(name.as_str()) {
            return Err(BrokerError::InvalidQueueName(name.clone()));
        }
        Ok(JobQueue {
            broker: self.clone(),
            dir: self.root.join(name.as_str()),
            name: name.clone(),
        })
    }

    /// Returns the status of any job in any queue.
    pub fn job_status(&self, job: &JobRef) -> Result<JobStatus> {
        self.queue(&job.queue)?.status(&job.id)
    }

    /// Loads a job descriptor, or `None` if the record does not exist.
    pub fn fetch(&self, job: &JobRef) -> Result<Option<Job>> {
        let queue = self.queue(&job.queue)?;
        validate_job_id(&job.id)?;
        let record = JobRecord::new(&queue.dir, &job.id);
        match record.read() {
            Ok(job) => Ok(Some(job)),
            Err(BrokerError::BrokerUnavailable(e)) if e.kind() == io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// A dependency is released once it is terminal, successful or not. A
    /// dependency whose record is gone has already been cleaned up after
    /// finishing and is released as well.
    fn is_released(&self, dependency: &JobRef) -> Result<bool> {
        let queue = self.queue(&dependency.queue)?;
        validate_job_id(&dependency.id)?;
        let record = JobRecord::new(&queue.dir, &dependency.id);
        Ok(record.is_terminal() || !record.exists())
    }
}

/// A named queue within the broker.
#[derive(Debug, Clone)]
pub struct JobQueue {
    broker: Broker,
    name: QueueName,
    dir: PathBuf,
}

impl JobQueue {
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enqueues a job and returns the stored record (its `id` is the job id).
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::BrokerUnavailable` if the queue directory cannot
    /// be written. The failure is not retried.
    pub fn enqueue(&self, spec: JobSpec) -> Result<Job> {
        let job = Job {
            id: JobId::generate(),
            queue: self.name.clone(),
            enqueued_at: Utc::now(),
            spec,
        };

        fs::create_dir_all(&self.dir)?;

        let record = JobRecord::new(&self.dir, &job.id);
        if record.exists() || record.is_terminal() {
            return Err(BrokerError::DuplicateJob(job.id));
        }

        let bytes = serde_json::to_vec_pretty(&job)?;
        write_atomic(&record.temp_path(), &record.payload_path, &bytes, &self.dir)?;

        debug!(
            queue = %self.name,
            job_id = %job.id,
            job_type = %job.job_type(),
            depends_on = ?job.spec.depends_on,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Enqueues a job that is held back until `depends_on` reaches a terminal
    /// state. Failure of the dependency still releases it.
    pub fn enqueue_after(&self, mut spec: JobSpec, depends_on: &JobRef) -> Result<Job> {
        spec.depends_on = Some(depends_on.clone());
        self.enqueue(spec)
    }

    /// Returns jobs that have not started, oldest first.
    ///
    /// Includes jobs still waiting on a dependency. Unreadable descriptors are
    /// skipped with a warning.
    pub fn list_pending(&self) -> Result<Vec<Job>> {
        let mut pending = Vec::new();

        if !self.dir.exists() {
            return Ok(pending);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();

            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Some(id) = job_id_from_path(&path) else {
                continue;
            };

            let record = JobRecord::new(&self.dir, &id);
            if !record.is_pending() {
                continue;
            }

            match record.read() {
                Ok(job) => pending.push(job),
                // Raced with cleanup of a finished job.
                Err(BrokerError::BrokerUnavailable(e)) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(queue = %self.name, job_id = %id, error = %e, "Skipping unreadable job record");
                }
            }
        }

        pending.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(pending)
    }

    /// Claims the oldest runnable job for `worker` in this process.
    ///
    /// Returns `None` when every pending job is either waiting on a dependency
    /// or has been claimed by another worker in the meantime.
    pub fn claim_next(&self, worker: &str) -> Result<Option<Job>> {
        self.claim_next_as(&ClaimOwner::current(worker))
    }

    /// Claims the oldest runnable job on behalf of `owner`.
    pub fn claim_next_as(&self, owner: &ClaimOwner) -> Result<Option<Job>> {
        let marker = serde_json::to_vec(owner)?;

        for job in self.list_pending()? {
            if let Some(dependency) = &job.spec.depends_on
                && !self.broker.is_released(dependency)?
            {
                trace!(job_id = %job.id, dependency = %dependency, "Job deferred");
                continue;
            }

            let record = JobRecord::new(&self.dir, &job.id);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(record.claim_path())
            {
                Ok(mut file) => {
                    file.write_all(&marker)?;
                    file.sync_all()?;
                    sync_dir(&self.dir)?;
                    debug!(
                        queue = %self.name,
                        job_id = %job.id,
                        worker = %owner.worker,
                        pid = owner.pid,
                        "Job claimed"
                    );
                    return Ok(Some(job));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    trace!(job_id = %job.id, "Job claimed by another worker");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Records the terminal outcome of a claimed job. Idempotent.
    pub fn finish(&self, job: &Job, outcome: &JobOutcome) -> Result<()> {
        validate_job_id(&job.id)?;
        let record = JobRecord::new(&self.dir, &job.id);
        if record.is_terminal() {
            return Ok(());
        }

        match outcome {
            JobOutcome::Finished => {
                write_atomic(&record.temp_path(), &record.done_path(), b"", &self.dir)?;
            }
            JobOutcome::Failed { error } => {
                write_atomic(
                    &record.temp_path(),
                    &record.failed_path(),
                    error.as_bytes(),
                    &self.dir,
                )?;
            }
        }
        Ok(())
    }

    /// Returns the status of a job in this queue.
    pub fn status(&self, id: &JobId) -> Result<JobStatus> {
        validate_job_id(id)?;
        let record = JobRecord::new(&self.dir, id);

        if record.done_path().exists() {
            return Ok(JobStatus::Finished);
        }
        if record.failed_path().exists() {
            return Ok(JobStatus::Failed);
        }
        if !record.exists() {
            return Ok(JobStatus::Missing);
        }
        if record.is_claimed() {
            return Ok(JobStatus::Started);
        }

        let job = record.read()?;
        match &job.spec.depends_on {
            Some(dependency) if !self.broker.is_released(dependency)? => Ok(JobStatus::Deferred),
            _ => Ok(JobStatus::Queued),
        }
    }

    /// Reads the recorded error of a failed job.
    pub fn failure_reason(&self, id: &JobId) -> Result<Option<String>> {
        validate_job_id(id)?;
        let record = JobRecord::new(&self.dir, id);
        match fs::read_to_string(record.failed_path()) {
            Ok(reason) => Ok(Some(reason)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Marks jobs claimed under the name `worker` by a process that is no
    /// longer running as failed, and returns them.
    ///
    /// Claims held by live processes are left alone, so workers sharing a name
    /// do not fail each other's jobs. Abandoned jobs are not retried.
    pub fn recover_abandoned(&self, worker: &str) -> Result<Vec<Job>> {
        let mut recovered = Vec::new();

        if !self.dir.exists() {
            return Ok(recovered);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|e| e != "proc") {
                continue;
            }
            let Some(id) = job_id_from_path(&path) else {
                continue;
            };

            let record = JobRecord::new(&self.dir, &id);
            if record.is_terminal() {
                continue;
            }

            let owner = match fs::read_to_string(&path) {
                Ok(contents) => ClaimOwner::parse(&contents),
                // Finished and cleaned up since the listing.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if owner.worker != worker || owner.is_alive() {
                continue;
            }

            let reason = format!(
                "abandoned: worker {} (pid {}) exited while the job was running",
                owner.worker, owner.pid
            );
            write_atomic(
                &record.temp_path(),
                &record.failed_path(),
                reason.as_bytes(),
                &self.dir,
            )?;
            warn!(queue = %self.name, job_id = %id, pid = owner.pid, "Marked abandoned job as failed");

            match record.read() {
                Ok(job) => recovered.push(job),
                Err(e) => {
                    warn!(queue = %self.name, job_id = %id, error = %e, "Abandoned job record is unreadable");
                }
            }
        }

        Ok(recovered)
    }

    /// Removes finished and failed jobs whose terminal marker is older than
    /// `grace`. Returns the number of records removed.
    pub fn cleanup_finished(&self, grace: Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let cutoff = SystemTime::now()
            .checked_sub(grace)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();

            if path.extension().is_some_and(|e| e == "done" || e == "failed")
                && let Ok(metadata) = path.metadata()
                && let Ok(modified) = metadata.modified()
                && modified <= cutoff
                && let Some(id) = job_id_from_path(&path)
            {
                JobRecord::new(&self.dir, &id).remove();
                removed += 1;
            }
        }

        if removed > 0 {
            sync_dir(&self.dir)?;
            info!(queue = %self.name, removed, "Cleaned up finished jobs");
        }

        Ok(removed)
    }
}
