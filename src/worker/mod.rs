//! Job executor.
//!
//! A worker process polls its queues in order and runs one job at a time.
//! Several processes can share the broker directory; the broker hands each
//! job to at most one of them.
//!
//! # Job lifecycle
//!
//! - Claimed jobs run under their own wall-clock timeout
//! - A task error or a timeout fails the job and runs its failure hook
//! - Failed jobs are never retried
//! - Shutdown is only observed between jobs; a running job always completes
//!
//! # Module Structure
//!
//! - [`executor`]: the claim/run/finish loop

mod executor;

pub use executor::{ExecutedJob, Executor, FINISHED_RETENTION};

#[cfg(test)]
mod tests;
