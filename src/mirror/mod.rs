//! Binary mirrors in object storage.
//!
//! A mirror is a bucket plus key prefix holding build artifacts: one per open
//! PR, one shared mirror collecting binaries from merged PRs, and the
//! published mirror per stack. This module parses mirror URLs, extracts spec
//! hashes from artifact keys and implements the copy, prune and delete
//! operations over an [`ObjectStore`].

pub mod aws;
pub mod fs;
pub mod hash;
pub mod lifecycle;
pub mod store;
pub mod url;

pub use aws::AwsCliStore;
pub use fs::FsObjectStore;
pub use hash::hash_from_key;
pub use lifecycle::{PruneReport, copy_pr_mirror, delete_mirror, prune_stack};
pub use store::{ObjectStore, StoreError, StoreResult, StoredObject};
pub use url::{MirrorRef, expand_stack, parse_mirror_url};

use crate::config::StoreBackend;

/// The object store selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredStore {
    Aws(AwsCliStore),
    Fs(FsObjectStore),
}

impl ConfiguredStore {
    pub fn from_backend(backend: &StoreBackend) -> Self {
        match backend {
            StoreBackend::AwsCli => ConfiguredStore::Aws(AwsCliStore::new()),
            StoreBackend::Filesystem(root) => ConfiguredStore::Fs(FsObjectStore::new(root)),
        }
    }
}

impl ObjectStore for ConfiguredStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<StoredObject>> {
        match self {
            ConfiguredStore::Aws(store) => store.list(bucket, prefix).await,
            ConfiguredStore::Fs(store) => store.list(bucket, prefix).await,
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        match self {
            ConfiguredStore::Aws(store) => store.delete(bucket, key).await,
            ConfiguredStore::Fs(store) => store.delete(bucket, key).await,
        }
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        match self {
            ConfiguredStore::Aws(store) => store.copy(src_bucket, src_key, dst_bucket, dst_key).await,
            ConfiguredStore::Fs(store) => store.copy(src_bucket, src_key, dst_bucket, dst_key).await,
        }
    }
}
