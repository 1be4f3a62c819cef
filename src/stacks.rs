//! CI stack discovery and build-cache index rebuilds.
//!
//! The set of stacks is whatever the packages repository defines on the
//! expected base branch: every directory under
//! `share/spack/gitlab/cloud_pipelines/stacks/` containing a `spack.yaml`.
//! Prune and reindex jobs take a fresh shallow clone per run and work
//! through each stack's mirror.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::git::{self, CloneOptions, GitError};

/// Directory holding stack definitions, relative to the checkout root.
pub const STACKS_DIR: &str = "share/spack/gitlab/cloud_pipelines/stacks";

/// Errors from stack discovery and index rebuilds.
#[derive(Debug, Error)]
pub enum StackError {
    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `spack buildcache update-index` exited unsuccessfully.
    #[error("index update for {mirror_url} failed (exit {code:?})\nstderr: {stderr}")]
    IndexUpdateFailed {
        mirror_url: String,
        code: Option<i32>,
        stderr: String,
    },
}

pub type StackResult<T> = Result<T, StackError>;

/// A source of CI stacks.
pub trait StackCatalog {
    type Checkout: StackCheckout + Send + Sync;

    /// Fetches the current stack definitions.
    fn checkout(&self) -> impl Future<Output = StackResult<Self::Checkout>> + Send;
}

/// A fetched set of stack definitions, able to rebuild mirror indexes.
pub trait StackCheckout {
    /// Stack names, sorted.
    fn stacks(&self) -> &[String];

    /// Rebuilds the build-cache index of one mirror.
    fn update_index(&self, mirror_url: &str) -> impl Future<Output = StackResult<()>> + Send;
}

/// Lists stacks under a checkout root.
pub fn list_ci_stacks(root: &Path) -> io::Result<Vec<String>> {
    let stacks_dir = root.join(STACKS_DIR);
    let mut stacks = Vec::new();

    for entry in std::fs::read_dir(&stacks_dir)? {
        let entry = entry?;
        if !entry.path().join("spack.yaml").is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            stacks.push(name.to_string());
        }
    }

    stacks.sort();
    Ok(stacks)
}

/// Stack catalog backed by a shallow clone of the packages repository.
#[derive(Debug, Clone)]
pub struct SpackStackCatalog {
    upstream_url: String,
    branch: String,
}

impl SpackStackCatalog {
    pub fn new(upstream_url: impl Into<String>, branch: impl Into<String>) -> Self {
        SpackStackCatalog {
            upstream_url: upstream_url.into(),
            branch: branch.into(),
        }
    }
}

impl StackCatalog for SpackStackCatalog {
    type Checkout = SpackCheckout;

    async fn checkout(&self) -> StackResult<SpackCheckout> {
        let upstream_url = self.upstream_url.clone();
        let branch = self.branch.clone();

        tokio::task::spawn_blocking(move || {
            let dir = TempDir::new()?;
            info!(url = %upstream_url, %branch, "Cloning stack definitions");
            git::clone(
                dir.path(),
                &upstream_url,
                "spack",
                &CloneOptions {
                    branch: Some(&branch),
                    depth: Some(1),
                },
            )?;
            SpackCheckout::open(dir)
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// A temporary clone of the packages repository.
///
/// The clone is removed when this value is dropped.
#[derive(Debug)]
pub struct SpackCheckout {
    _dir: TempDir,
    root: PathBuf,
    stacks: Vec<String>,
}

impl SpackCheckout {
    fn open(dir: TempDir) -> StackResult<Self> {
        let root = dir.path().join("spack");
        let stacks = list_ci_stacks(&root)?;
        debug!(count = stacks.len(), "Discovered stacks");
        Ok(SpackCheckout {
            _dir: dir,
            root,
            stacks,
        })
    }

    /// The `spack` executable: the clone's own `bin/spack`, else `spack` on `PATH`.
    pub fn spack_program(&self) -> PathBuf {
        let bundled = self.root.join("bin/spack");
        if bundled.is_file() {
            bundled
        } else {
            PathBuf::from("spack")
        }
    }
}

impl StackCheckout for SpackCheckout {
    fn stacks(&self) -> &[String] {
        &self.stacks
    }

    async fn update_index(&self, mirror_url: &str) -> StackResult<()> {
        info!(%mirror_url, "Updating binary index");
        let output = Command::new(self.spack_program())
            .args(["-d", "buildcache", "update-index", mirror_url])
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(StackError::IndexUpdateFailed {
                mirror_url: mirror_url.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}
