//! S3 access through the `aws` command-line tool.
//!
//! Uses the low-level `s3api` subcommands with JSON output. The CLI handles
//! credentials and region, so the worker needs no SDK. Listings are fetched a
//! page at a time with the CLI's `--starting-token`.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::store::{ObjectStore, StoreError, StoreResult, StoredObject};

/// Keys requested per `list-objects-v2` call.
const LIST_PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsOutput {
    #[serde(default)]
    contents: Vec<ListedObject>,

    /// Present when more keys remain.
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    last_modified: DateTime<Utc>,
}

/// Object store that shells out to `aws s3api`.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: PathBuf,
}

impl Default for AwsCliStore {
    fn default() -> Self {
        AwsCliStore::new()
    }
}

impl AwsCliStore {
    pub fn new() -> Self {
        AwsCliStore {
            program: PathBuf::from("aws"),
        }
    }

    /// Uses a specific `aws` executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        AwsCliStore {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("AWS_PAGER", "");
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: &[&str]) -> StoreResult<String> {
        debug!(args = ?args, "Running aws");
        let output = self.command().args(args).output().await?;

        if !output.status.success() {
            return Err(StoreError::CommandFailed {
                command: format!("aws {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One page of a listing.
#[derive(Debug, Default)]
struct ListingPage {
    objects: Vec<StoredObject>,
    next_token: Option<String>,
}

/// Parses `list-objects-v2` JSON. An empty prefix produces no output at all.
fn parse_listing(stdout: &str) -> StoreResult<ListingPage> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(ListingPage::default());
    }

    let parsed: ListObjectsOutput = serde_json::from_str(trimmed)?;
    Ok(ListingPage {
        objects: parsed
            .contents
            .into_iter()
            .map(|object| StoredObject {
                key: object.key,
                last_modified: object.last_modified,
            })
            .collect(),
        next_token: parsed.next_token,
    })
}

/// Builds the `--copy-source` argument. Keys are percent-encoded per path
/// segment so that the separators survive.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

impl ObjectStore for AwsCliStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut args = vec![
                "s3api",
                "list-objects-v2",
                "--bucket",
                bucket,
                "--prefix",
                prefix,
                "--max-items",
                LIST_PAGE_SIZE,
                "--output",
                "json",
            ];
            if let Some(token) = &token {
                args.extend(["--starting-token", token.as_str()]);
            }

            let page = parse_listing(&self.run(&args).await?)?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.run(&["s3api", "delete-object", "--bucket", bucket, "--key", key])
            .await?;
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let source = copy_source(src_bucket, src_key);
        self.run(&[
            "s3api",
            "copy-object",
            "--copy-source",
            &source,
            "--bucket",
            dst_bucket,
            "--key",
            dst_key,
        ])
        .await?;
        Ok(())
    }
}
