//! Enqueue side: turn webhook payloads into job descriptors.
//!
//! Handlers run on the webhook response path, so they only build
//! descriptors and hand them to the broker. All slow work happens in the
//! worker. The one exception is [`close_pr_gitlab_branch`], a single CI
//! request that is not worth a queue round trip.
//!
//! | Event | Handler | Queue |
//! |-------|---------|-------|
//! | `run pipeline` comment | [`run_pipeline`] | short |
//! | `rebuild everything` comment | [`run_pipeline_rebuild_all`] | short |
//! | `retry pipeline` comment | [`retry_pipeline`] | short |
//! | `fix style` comment | [`fix_style`] | short |
//! | `pull_request` closed | [`close_pr_mirror`] | long |
//! | `pull_request` closed | [`close_pr_gitlab_branch`] | none |

mod comment;
mod pull_request;

use thiserror::Error;

use crate::gitlab::CiError;
use crate::queue::BrokerError;

pub use comment::{fix_style, retry_pipeline, run_pipeline, run_pipeline_rebuild_all};
pub use pull_request::{ClosedPrJobs, close_pr_gitlab_branch, close_pr_mirror};

/// Errors that can occur while handling an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Ci(#[from] CiError),

    /// The event's repository has no project settings.
    #[error("no project configured for repository {0}")]
    UnknownProject(String),
}

pub type HandlerResult<T> = Result<T, HandlerError>;
