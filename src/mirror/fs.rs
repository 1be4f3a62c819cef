//! Filesystem-backed object store.
//!
//! Each bucket is a directory under the store root and each key is a relative
//! path inside it. Last-modified times come from file mtimes. Used for local
//! mirrors and in tests.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use super::store::{ObjectStore, StoreError, StoreResult, StoredObject};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a bucket/key pair to a path, refusing keys that would escape
    /// the bucket directory.
    pub fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let relative = Path::new(key);
        let normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !normal {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(bucket_dir.join(relative))
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(StoreError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }
}

/// Recursively collects files under `dir`, keyed relative to `base`.
fn walk(base: &Path, dir: &Path, out: &mut Vec<StoredObject>) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(base, &path, out)?;
        } else if file_type.is_file() {
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let modified = entry.metadata()?.modified()?;
            out.push(StoredObject {
                key,
                last_modified: DateTime::<Utc>::from(modified),
            });
        }
    }
    Ok(())
}

impl ObjectStore for FsObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<StoredObject>> {
        let base = self.bucket_dir(bucket)?;
        let prefix = prefix.to_string();

        let mut objects = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            walk(&base, &base, &mut out)?;
            Ok::<_, io::Error>(out)
        })
        .await
        .map_err(io::Error::other)??;

        objects.retain(|object| object.key.starts_with(&prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let src = self.object_path(src_bucket, src_key)?;
        let dst = self.object_path(dst_bucket, dst_key)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, &dst).await?;
        Ok(())
    }
}
