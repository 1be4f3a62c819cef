//! Spackbot worker - background jobs for a GitHub maintenance bot.
//!
//! Webhook handlers enqueue job descriptors onto durable named queues; a
//! worker process claims them one at a time and runs pipeline triggers,
//! style fixes and binary-mirror maintenance against GitHub, GitLab CI and
//! object storage.

pub mod config;
pub mod git;
pub mod github;
pub mod gitlab;
pub mod handlers;
pub mod mirror;
pub mod queue;
pub mod report;
pub mod stacks;
pub mod tasks;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
