//! Durable named job queues.
//!
//! Handlers enqueue [`JobSpec`]s onto a named [`JobQueue`]; workers claim them
//! one at a time. The broker is a plain directory tree (see [`broker`]) so it
//! needs no server process, and several worker processes can share it.
//!
//! Two queues are used by default: `tasks` for comment-driven jobs (pipeline,
//! style) and `tasks_long` for mirror maintenance.

pub mod broker;
pub mod dedupe;
pub mod job;

pub use broker::{Broker, BrokerError, ClaimOwner, JobQueue, JobStatus};
pub use dedupe::check_skip_job;
pub use job::{FailureHook, Job, JobMeta, JobOutcome, JobPayload, JobRef, JobSpec, JobType};
