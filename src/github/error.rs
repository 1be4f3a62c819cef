//! GitHub API error type.
//!
//! Failed calls propagate out of the task and into the failure report, so the
//! error keeps the HTTP status (when one can be recovered) and the underlying
//! octocrab error as its source.

use std::fmt;
use thiserror::Error;

/// A GitHub API error.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Wraps an octocrab error with context.
    pub fn from_octocrab(context: impl Into<String>, err: octocrab::Error) -> Self {
        let status_code = match &err {
            octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
            other => extract_status_code(&other.to_string()),
        };
        Self {
            status_code,
            message: context.into(),
            source: Some(err),
        }
    }

    /// An error for an unexpected HTTP status on a raw request.
    pub fn unexpected_status(context: impl Into<String>, status: u16) -> Self {
        Self {
            status_code: Some(status),
            message: context.into(),
            source: None,
        }
    }

    /// Returns true for HTTP 404.
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }
}

/// Extracts the HTTP status code from an octocrab error message, if present.
///
/// Only API errors carry a structured status; for the other octocrab error
/// variants this parses the rendered message. `None` is the fallback.
fn extract_status_code(err_str: &str) -> Option<u16> {
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    let lower = err_str.to_lowercase();
    if err_str.contains("404") && lower.contains("not found") {
        return Some(404);
    }
    [401u16, 403, 422, 429, 500, 502, 503]
        .into_iter()
        .find(|code| err_str.contains(&code.to_string()))
}
