//! Core domain types shared across the queue, tasks and handlers.

pub mod event;
pub mod ids;

pub use event::{CommentEvent, PullRequestEvent};
pub use ids::{JobId, PrNumber, QueueName, Sha};
