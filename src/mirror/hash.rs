//! Content-hash extraction from artifact keys.
//!
//! Artifact keys embed the 32-character spec hash right before the suffix:
//!
//! ```text
//! linux-ubuntu18.04-x86_64-gcc-8.4.0-armadillo-10.5.0-gq3ijjrtnzgpm4bvuamjr6wa7hzxkypz.spack
//! linux-ubuntu18.04-x86_64-gcc-8.4.0-armadillo-10.5.0-gq3ijjrtnzgpm4bvuamjr6wa7hzxkypz.spec.json
//! ```
//!
//! A key with no candidate, or with more than one, is indeterminate and is left
//! out of every hash-based decision.

use std::sync::LazyLock;

use regex::Regex;

/// Suffixes copied from a PR mirror into the shared mirror.
pub const COPY_SUFFIXES: &[&str] = &[".spack", ".spec.json", ".spec.yaml", ".spec.json.sig"];

/// Spec metadata suffixes.
pub const SPEC_SUFFIXES: &[&str] = &[".spec.json", ".spec.yaml", ".spec.json.sig"];

/// Spec metadata plus archives; everything that shares a hash and must be
/// deleted together.
pub const ARTIFACT_SUFFIXES: &[&str] = &[".spack", ".spec.json", ".spec.yaml", ".spec.json.sig"];

static HASH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-([a-zA-Z0-9]{32})\.").expect("constant regex pattern is valid")
});

/// Returns true if `key` ends with one of `suffixes`.
pub fn has_suffix(key: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| key.ends_with(suffix))
}

/// Extracts the spec hash from an object key.
///
/// Matching is case-insensitive and the result is lowercase. Returns `None`
/// when the key holds zero or several candidates.
pub fn hash_from_key(key: &str) -> Option<String> {
    let lowered = key.to_lowercase();
    let mut matches = HASH_PATTERN
        .captures_iter(&lowered)
        .filter_map(|caps| caps.get(1));

    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.as_str().to_string())
}
