//! User-facing report formatting and the failure side channel.
//!
//! When a job fails, its failure hook renders the error into a collapsible
//! PR comment and posts it with a blocking HTTP client on a blocking thread.
//! The failed task's own GitHub client is never reused for this.

use std::error::Error as StdError;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::queue::{FailureHook, JobMeta};

/// Maximum number of trace lines included in a failure report.
pub const MAX_TRACE_LINES: usize = 50;

/// Formatter output at or above this many characters is truncated.
const STYLE_OUTPUT_LIMIT: usize = 64_700;

/// Characters of formatter output kept when truncating.
const STYLE_OUTPUT_KEEP: usize = 64_682;

const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors delivering a failure report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to post failure report: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failure report thread panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Renders an error and its causes, one per line, capped at
/// [`MAX_TRACE_LINES`].
pub fn render_trace(err: &(dyn StdError + 'static)) -> String {
    let mut lines = Vec::new();
    let mut current = err.source();
    let mut depth = 0;
    while let Some(cause) = current {
        for line in cause.to_string().lines() {
            lines.push(format!("  {depth}: {line}"));
        }
        depth += 1;
        current = cause.source();
    }

    if lines.is_empty() {
        lines.push("  (no further causes)".to_string());
    }
    lines.truncate(MAX_TRACE_LINES);
    lines.join("\n")
}

/// Formats a failure report with a collapsible details block.
pub fn format_error_message(msg: &str, kind: &str, value: &str, trace: &str) -> String {
    format!(
        "\n{msg}\n<details>\n<summary><b>Details</b></summary>\n\n```bash\nError: {kind}, {value}\nStack trace:\n{trace}\n```\n</details>\n"
    )
}

/// Formats a policy message with supporting details.
pub fn format_details_message(msg: &str, details: &str) -> String {
    format!("\n{msg}\n<details>\n<summary><b>Details</b></summary>\n\n```\n{details}\n```\n</details>\n")
}

/// Wraps formatter output into the style report comment.
///
/// Output is capped to fit GitHub's comment size limit.
pub fn get_style_message(output: &str) -> String {
    let output = if output.chars().count() >= STYLE_OUTPUT_LIMIT {
        let kept: String = output.chars().take(STYLE_OUTPUT_KEEP).collect();
        format!("{kept}\n... truncated ...")
    } else {
        output.to_string()
    };

    format!(
        "\nI was able to run `spack style --fix` for you!\n<details>\n<summary><b>spack style --fix</b></summary>\n\n```bash\n{output}\n```\n</details>\nKeep in mind that I cannot fix your flake8 or mypy errors, so if you have any you'll need to fix them and update the pull request.\nIf I was able to push to your branch, if you make further changes you will need to pull from your updated branch before pushing again.\n"
    )
}

/// POSTs `{"body": body}` to `url`, with a bearer token when given.
/// A non-success status is an error.
///
/// Blocking; must not be called from an async context.
pub fn post_comment_blocking(url: &str, token: Option<&str>, body: &str) -> Result<u16, ReportError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(REPORT_TIMEOUT)
        .user_agent("spackbot-worker")
        .build()?;

    let mut request = client.post(url).json(&json!({ "body": body }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let status = request.send()?.error_for_status()?.status().as_u16();
    debug!(%url, status, "Posted failure report");
    Ok(status)
}

/// Posts a failure report for a job on a blocking thread.
///
/// A job without `post_comments_url` only logs the report.
pub async fn post_failure_message(meta: &JobMeta, message: String) -> Result<(), ReportError> {
    error!(job_type = %meta.job_type, pr = ?meta.pr_number, "{}", message);

    let Some(url) = meta.post_comments_url.clone() else {
        error!("No url provided for failure report");
        return Ok(());
    };
    let token = meta.auth_token.clone();

    tokio::task::spawn_blocking(move || post_comment_blocking(&url, token.as_deref(), &message))
        .await??;
    Ok(())
}

/// Runs a failure hook: formats the report and posts it.
pub async fn report_failure(
    hook: FailureHook,
    meta: &JobMeta,
    kind: &str,
    value: &str,
    trace: &str,
) -> Result<(), ReportError> {
    let message = format_error_message(hook.headline(), kind, value, trace);
    post_failure_message(meta, message).await
}
