//! Object storage collaborator.
//!
//! The mirror tasks only need four primitives: list a prefix (with
//! last-modified times), delete a key, and copy a key between buckets.
//! Backends implement [`ObjectStore`]; the worker picks one at startup.

use std::future::Future;
use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from object storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The storage command-line tool exited unsuccessfully.
    #[error("object store command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The storage backend returned output that could not be parsed.
    #[error("unexpected object store response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Key would escape its bucket (absolute path or `..` component).
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

/// Result type for object storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// An object in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Prefix-addressed blob storage.
///
/// Deleting a missing key is not an error, matching object storage semantics.
pub trait ObjectStore {
    /// Lists every object whose key starts with `prefix`.
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> impl Future<Output = StoreResult<Vec<StoredObject>>> + Send;

    /// Deletes one object.
    fn delete(&self, bucket: &str, key: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// Copies an object, leaving the source intact.
    fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;
}
