//! Mirror URL parsing.
//!
//! Mirrors are addressed as `s3://<bucket>/<prefix...>`. URL templates for
//! per-stack mirrors carry a `{stack}` placeholder that is expanded once the
//! stack list is known.

use std::fmt;

/// Bucket used when a URL is not an `s3://` URL.
pub const DEFAULT_BUCKET: &str = "spack-binaries-prs";

/// Prefix used when a URL is not an `s3://` URL.
pub const DEFAULT_PREFIX: &str = "dummy";

/// Placeholder replaced by the stack name in per-stack URL templates.
pub const STACK_PLACEHOLDER: &str = "{stack}";

/// A bucket plus key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirrorRef {
    pub bucket: String,

    /// Key prefix without leading or trailing slashes.
    pub prefix: String,
}

impl MirrorRef {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        MirrorRef {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    /// Prefix used when listing, ending at a path boundary so that
    /// `pr1_fix` does not also match `pr1_fix-other/...`.
    pub fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

impl fmt::Display for MirrorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Parses a mirror URL into bucket and prefix.
///
/// For `s3://` URLs the bucket is the authority and the prefix is the path
/// with surrounding slashes removed. Anything else yields the defaults
/// ([`DEFAULT_BUCKET`], [`DEFAULT_PREFIX`]).
pub fn parse_mirror_url(url: &str) -> MirrorRef {
    let Some(rest) = url.strip_prefix("s3://") else {
        return MirrorRef::new(DEFAULT_BUCKET, DEFAULT_PREFIX);
    };

    let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
    MirrorRef::new(bucket, path.trim_matches('/'))
}

/// Expands the `{stack}` placeholder in a per-stack URL template.
pub fn expand_stack(template: &str, stack: &str) -> String {
    template.replace(STACK_PLACEHOLDER, stack)
}
