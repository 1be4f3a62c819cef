//! Copy, prune and delete operations on binary mirrors.
//!
//! These are the object-level halves of the mirror tasks. Stack iteration,
//! dedup skipping and index rebuilds live in `tasks::mirrors`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::hash::{ARTIFACT_SUFFIXES, COPY_SUFFIXES, SPEC_SUFFIXES, has_suffix, hash_from_key};
use super::store::{ObjectStore, StoreResult};
use super::url::MirrorRef;

/// Objects removed by a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Deleted for exceeding the retirement age.
    pub expired: Vec<String>,

    /// Deleted because their hash was expired or already published.
    pub published: Vec<String>,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.expired.len() + self.published.len()
    }
}

/// Whole days elapsed since `last_modified`, rounded down.
pub fn age_in_days(now: DateTime<Utc>, last_modified: DateTime<Utc>) -> i64 {
    (now - last_modified).num_days()
}

/// Rewrites a source key into the destination mirror by substituting the first
/// occurrence of the source prefix.
fn rebase_key(key: &str, from: &MirrorRef, to: &MirrorRef) -> String {
    if from.prefix.is_empty() {
        return if to.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", to.prefix, key)
        };
    }
    key.replacen(&from.prefix, &to.prefix, 1)
}

/// Copies build artifacts from a PR mirror into the shared mirror, leaving
/// the source intact. Returns the number of objects copied.
pub async fn copy_pr_mirror<S: ObjectStore>(
    store: &S,
    pr_mirror: &MirrorRef,
    shared_mirror: &MirrorRef,
) -> StoreResult<usize> {
    let objects = store
        .list(&pr_mirror.bucket, &pr_mirror.list_prefix())
        .await?;

    let mut copied = 0;
    for object in objects
        .iter()
        .filter(|o| has_suffix(&o.key, COPY_SUFFIXES))
    {
        let dst_key = rebase_key(&object.key, pr_mirror, shared_mirror);
        debug!(src = %object.key, dst = %dst_key, "Copying artifact");
        store
            .copy(&pr_mirror.bucket, &object.key, &shared_mirror.bucket, &dst_key)
            .await?;
        copied += 1;
    }

    info!(from = %pr_mirror, to = %shared_mirror, copied, "Copied PR mirror");
    Ok(copied)
}

/// Deletes every object under a mirror prefix. Returns the number deleted.
pub async fn delete_mirror<S: ObjectStore>(store: &S, mirror: &MirrorRef) -> StoreResult<usize> {
    let objects = store.list(&mirror.bucket, &mirror.list_prefix()).await?;
    for object in &objects {
        store.delete(&mirror.bucket, &object.key).await?;
    }
    info!(%mirror, deleted = objects.len(), "Deleted mirror");
    Ok(objects.len())
}

/// Prunes one stack's shared mirror against its published mirror.
///
/// Pass one deletes anything at least `retire_after_days` old and collects
/// the hashes of the remaining spec files. Hashes of expired objects, and of
/// shared specs that also appear in the published mirror, are then deleted
/// in a second pass over every artifact suffix, so an archive goes with its
/// spec even when only one of them matched.
pub async fn prune_stack<S: ObjectStore>(
    store: &S,
    shared: &MirrorRef,
    publish: &MirrorRef,
    retire_after_days: i64,
    now: DateTime<Utc>,
) -> StoreResult<PruneReport> {
    let mut report = PruneReport::default();
    let mut delete_specs: HashSet<String> = HashSet::new();
    let mut shared_specs: HashSet<String> = HashSet::new();

    for object in store.list(&shared.bucket, &shared.list_prefix()).await? {
        if age_in_days(now, object.last_modified) >= retire_after_days {
            debug!(key = %object.key, bucket = %shared.bucket, reason = "age", "Pruning");
            store.delete(&shared.bucket, &object.key).await?;
            if let Some(hash) = hash_from_key(&object.key) {
                delete_specs.insert(hash);
            }
            report.expired.push(object.key);
            continue;
        }

        if !has_suffix(&object.key, SPEC_SUFFIXES) {
            continue;
        }

        match hash_from_key(&object.key) {
            Some(hash) => {
                shared_specs.insert(hash);
            }
            None => error!(key = %object.key, "Encountered spec file without hash in name"),
        }
    }

    for object in store.list(&publish.bucket, &publish.list_prefix()).await? {
        if !has_suffix(&object.key, SPEC_SUFFIXES) {
            continue;
        }
        if let Some(hash) = hash_from_key(&object.key) {
            if shared_specs.contains(&hash) {
                delete_specs.insert(hash);
            }
        }
    }

    if delete_specs.is_empty() {
        return Ok(report);
    }

    for object in store.list(&shared.bucket, &shared.list_prefix()).await? {
        if !has_suffix(&object.key, ARTIFACT_SUFFIXES) {
            continue;
        }
        let marked = hash_from_key(&object.key).is_some_and(|hash| delete_specs.contains(&hash));
        if marked {
            debug!(key = %object.key, bucket = %shared.bucket, reason = "published", "Pruning");
            store.delete(&shared.bucket, &object.key).await?;
            report.published.push(object.key);
        }
    }

    Ok(report)
}
