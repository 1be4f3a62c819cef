//! Shared test utilities: in-memory collaborator doubles, payload builders and
//! arbitrary generators for property-based testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Value, json};

use crate::config::{Config, StyleTool};
use crate::git::{CommitIdentity, CommitOutcome, PushResult};
use crate::github::{
    GitHubApiError, HeadRepository, PullRequest, PullRequestHead, PullRequestUser, User, VcsHost,
};
use crate::gitlab::{CiResult, CiSystem};
use crate::mirror::{ObjectStore, StoreError, StoreResult, StoredObject};
use crate::queue::broker::ClaimOwner;
use crate::stacks::{StackCatalog, StackCheckout, StackError, StackResult};
use crate::tasks::style::{StyleSession, StyleWorkspace};
use crate::tasks::{Services, TaskResult};
use crate::types::{CommentEvent, PrNumber, Sha};

/// Head SHA used by [`pull_request`].
pub const TEST_HEAD_SHA: &str = "abcd1234abcd1234abcd1234abcd1234abcd1234";

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1u64..1_000_000).prop_map(PrNumber)
}

pub fn arb_branch_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9/-]{0,30}".prop_map(String::from)
}

/// An `issue_comment` event on the PR at `pr_url`, sent by `sender`.
pub fn comment_event(sender: &str, pr_url: &str) -> CommentEvent {
    let comments_url = pr_url.replace("/pulls/", "/issues/") + "/comments";
    serde_json::from_value(json!({
        "issue": {
            "comments_url": comments_url,
            "pull_request": { "url": pr_url },
        },
        "repository": {
            "name": "spack",
            "collaborators_url": "https://api.github.com/repos/spack/spack/collaborators{/collaborator}",
        },
        "sender": { "login": sender },
    }))
    .unwrap()
}

/// A PR authored by `author` from a fork, with head [`TEST_HEAD_SHA`].
pub fn pull_request(number: u64, author: &str, branch: &str) -> PullRequest {
    PullRequest {
        number: PrNumber(number),
        user: PullRequestUser {
            login: author.to_string(),
        },
        head: PullRequestHead {
            ref_name: branch.to_string(),
            sha: Sha::new(TEST_HEAD_SHA),
            repo: Some(HeadRepository {
                name: "spack".to_string(),
                ssh_url: format!("git@github.com:{author}/spack.git"),
            }),
        },
    }
}

// ─── Processes ───

/// Pid of a process that has already exited.
pub fn exited_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// A sleeping child process, killed on drop.
pub struct LiveProcess(std::process::Child);

impl LiveProcess {
    pub fn spawn() -> Self {
        LiveProcess(
            std::process::Command::new("sleep")
                .arg("300")
                .spawn()
                .unwrap(),
        )
    }

    pub fn pid(&self) -> u32 {
        self.0.id()
    }
}

impl Drop for LiveProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// A claim owner on this host with the given pid.
pub fn claim_owner(worker: &str, pid: u32) -> ClaimOwner {
    ClaimOwner {
        pid,
        ..ClaimOwner::current(worker)
    }
}

// ─── Object store ───

#[derive(Debug, Default)]
struct StoreState {
    buckets: BTreeMap<String, BTreeMap<String, DateTime<Utc>>>,
    deleted: Vec<(String, String)>,
}

/// In-memory [`ObjectStore`] recording deletions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, last_modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), last_modified);
    }

    /// All keys in a bucket, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.keys_with_prefix(bucket, "")
    }

    pub fn keys_with_prefix(&self, bucket: &str, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every (bucket, key) deleted so far, in order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<StoredObject>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, last_modified)| StoredObject {
                        key: key.clone(),
                        last_modified: *last_modified,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        state.deleted.push((bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let exists = state
            .buckets
            .get(src_bucket)
            .is_some_and(|objects| objects.contains_key(src_key));
        if !exists {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{src_bucket}/{src_key}"),
            )));
        }
        state
            .buckets
            .entry(dst_bucket.to_string())
            .or_default()
            .insert(dst_key.to_string(), Utc::now());
        Ok(())
    }
}

// ─── GitHub ───

#[derive(Debug, Default)]
struct VcsState {
    pull_requests: HashMap<String, PullRequest>,
    collaborators: HashSet<String>,
    users: HashMap<String, User>,
    comments: Vec<(String, String)>,
}

/// In-memory [`VcsHost`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockVcs {
    state: Arc<Mutex<VcsState>>,
}

impl MockVcs {
    pub fn add_pull_request(&self, url: &str, pr: PullRequest) {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .insert(url.to_string(), pr);
    }

    pub fn add_collaborator(&self, login: &str) {
        self.state
            .lock()
            .unwrap()
            .collaborators
            .insert(login.to_string());
    }

    pub fn add_user(&self, user: User) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user.login.clone(), user);
    }

    /// Posted comments as (comments_url, body).
    pub fn comments(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn comment_bodies(&self) -> Vec<String> {
        self.comments().into_iter().map(|(_, body)| body).collect()
    }
}

impl VcsHost for MockVcs {
    async fn get_pull_request(&self, url: &str) -> Result<PullRequest, GitHubApiError> {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .get(url)
            .cloned()
            .ok_or_else(|| GitHubApiError::unexpected_status(format!("fetching {url}"), 404))
    }

    async fn is_collaborator(
        &self,
        _collaborators_url: &str,
        login: &str,
    ) -> Result<bool, GitHubApiError> {
        Ok(self.state.lock().unwrap().collaborators.contains(login))
    }

    async fn post_comment(&self, comments_url: &str, body: &str) -> Result<(), GitHubApiError> {
        self.state
            .lock()
            .unwrap()
            .comments
            .push((comments_url.to_string(), body.to_string()));
        Ok(())
    }

    /// Unknown logins get an account created in 2020 with id 1000.
    async fn get_user(&self, login: &str) -> Result<User, GitHubApiError> {
        let state = self.state.lock().unwrap();
        Ok(state.users.get(login).cloned().unwrap_or_else(|| User {
            login: login.to_string(),
            id: 1000,
            created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        }))
    }
}

// ─── CI ───

/// A request made to [`MockCi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiCall {
    BranchCommit {
        project: String,
        encoded_ref: String,
    },
    Trigger {
        project: String,
        encoded_ref: String,
        extra_query: String,
    },
    ListPipelines {
        project: String,
        encoded_ref: String,
    },
    Retry {
        project: String,
        pipeline_id: u64,
    },
    DeleteBranch {
        project: String,
        encoded_branch: String,
    },
}

#[derive(Debug, Default)]
struct CiState {
    branch_commit: Value,
    trigger: Value,
    pipelines: Value,
    retry: Value,
    calls: Vec<CiCall>,
}

/// Scripted [`CiSystem`]. Every response defaults to JSON `null`.
#[derive(Debug, Clone, Default)]
pub struct MockCi {
    state: Arc<Mutex<CiState>>,
}

impl MockCi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_branch_commit(&self, response: Value) {
        self.state.lock().unwrap().branch_commit = response;
    }

    pub fn set_trigger_response(&self, response: Value) {
        self.state.lock().unwrap().trigger = response;
    }

    pub fn set_pipelines(&self, response: Value) {
        self.state.lock().unwrap().pipelines = response;
    }

    pub fn set_retry_response(&self, response: Value) {
        self.state.lock().unwrap().retry = response;
    }

    pub fn calls(&self) -> Vec<CiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: CiCall, pick: impl FnOnce(&CiState) -> Value) -> Value {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        pick(&state)
    }
}

impl CiSystem for MockCi {
    async fn branch_commit(&self, project_url: &str, encoded_ref: &str) -> CiResult<Value> {
        let call = CiCall::BranchCommit {
            project: project_url.to_string(),
            encoded_ref: encoded_ref.to_string(),
        };
        Ok(self.record(call, |s| s.branch_commit.clone()))
    }

    async fn trigger_pipeline(
        &self,
        project_url: &str,
        encoded_ref: &str,
        extra_query: &str,
    ) -> CiResult<Value> {
        let call = CiCall::Trigger {
            project: project_url.to_string(),
            encoded_ref: encoded_ref.to_string(),
            extra_query: extra_query.to_string(),
        };
        Ok(self.record(call, |s| s.trigger.clone()))
    }

    async fn list_pipelines(&self, project_url: &str, encoded_ref: &str) -> CiResult<Value> {
        let call = CiCall::ListPipelines {
            project: project_url.to_string(),
            encoded_ref: encoded_ref.to_string(),
        };
        Ok(self.record(call, |s| s.pipelines.clone()))
    }

    async fn retry_pipeline(&self, project_url: &str, pipeline_id: u64) -> CiResult<Value> {
        let call = CiCall::Retry {
            project: project_url.to_string(),
            pipeline_id,
        };
        Ok(self.record(call, |s| s.retry.clone()))
    }

    async fn delete_branch(&self, project_url: &str, encoded_branch: &str) -> CiResult<()> {
        let call = CiCall::DeleteBranch {
            project: project_url.to_string(),
            encoded_branch: encoded_branch.to_string(),
        };
        self.record(call, |_| Value::Null);
        Ok(())
    }
}

// ─── Stacks ───

#[derive(Debug, Default)]
struct StacksState {
    stacks: Vec<String>,
    reindexed: Vec<String>,
    checkouts: usize,
    fail_update_index: bool,
    checkout_delay: Option<std::time::Duration>,
}

/// [`StackCatalog`] with a fixed stack list, recording index updates.
#[derive(Debug, Clone, Default)]
pub struct MockStacks {
    state: Arc<Mutex<StacksState>>,
}

impl MockStacks {
    pub fn set_stacks(&self, stacks: &[&str]) {
        self.state.lock().unwrap().stacks = stacks.iter().map(|s| s.to_string()).collect();
    }

    /// Makes every checkout take `delay` before returning.
    pub fn set_checkout_delay(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().checkout_delay = Some(delay);
    }

    pub fn fail_update_index(&self, fail: bool) {
        self.state.lock().unwrap().fail_update_index = fail;
    }

    /// Mirror URLs whose index was rebuilt, in order.
    pub fn reindexed(&self) -> Vec<String> {
        self.state.lock().unwrap().reindexed.clone()
    }

    pub fn checkouts(&self) -> usize {
        self.state.lock().unwrap().checkouts
    }
}

#[derive(Debug)]
pub struct MockCheckout {
    stacks: Vec<String>,
    state: Arc<Mutex<StacksState>>,
}

impl StackCatalog for MockStacks {
    type Checkout = MockCheckout;

    async fn checkout(&self) -> StackResult<MockCheckout> {
        let delay = self.state.lock().unwrap().checkout_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.checkouts += 1;
        Ok(MockCheckout {
            stacks: state.stacks.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

impl StackCheckout for MockCheckout {
    fn stacks(&self) -> &[String] {
        &self.stacks
    }

    async fn update_index(&self, mirror_url: &str) -> StackResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_update_index {
            return Err(StackError::IndexUpdateFailed {
                mirror_url: mirror_url.to_string(),
                code: Some(1),
                stderr: "Error: no such bucket".to_string(),
            });
        }
        state.reindexed.push(mirror_url.to_string());
        Ok(())
    }
}

// ─── Style workspace ───

#[derive(Debug)]
struct StyleState {
    formatter_output: String,
    commit_outcome: CommitOutcome,
    push_result: PushResult,
    prepared: Vec<(String, String, String)>,
    commits: Vec<(CommitIdentity, String)>,
    pushes: Vec<String>,
}

impl Default for StyleState {
    fn default() -> Self {
        StyleState {
            formatter_output: String::new(),
            commit_outcome: CommitOutcome::Committed {
                sha: Sha::new("0123456789abcdef0123456789abcdef01234567"),
            },
            push_result: PushResult::Success {
                pushed_sha: Sha::new("0123456789abcdef0123456789abcdef01234567"),
            },
            prepared: Vec::new(),
            commits: Vec::new(),
            pushes: Vec::new(),
        }
    }
}

/// Scripted [`StyleWorkspace`]. Commits succeed and pushes land by default.
#[derive(Debug, Clone, Default)]
pub struct MockStyleWorkspace {
    state: Arc<Mutex<StyleState>>,
}

impl MockStyleWorkspace {
    pub fn set_formatter_output(&self, output: &str) {
        self.state.lock().unwrap().formatter_output = output.to_string();
    }

    pub fn set_commit_outcome(&self, outcome: CommitOutcome) {
        self.state.lock().unwrap().commit_outcome = outcome;
    }

    pub fn set_push_result(&self, result: PushResult) {
        self.state.lock().unwrap().push_result = result;
    }

    /// Prepared workspaces as (upstream_url, fork_url, branch).
    pub fn prepared(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().prepared.clone()
    }

    pub fn commits(&self) -> Vec<(CommitIdentity, String)> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.state.lock().unwrap().pushes.clone()
    }
}

#[derive(Debug)]
pub struct MockStyleSession {
    state: Arc<Mutex<StyleState>>,
}

impl StyleWorkspace for MockStyleWorkspace {
    type Session = MockStyleSession;

    async fn prepare(
        &self,
        upstream_url: &str,
        fork_url: &str,
        branch: &str,
    ) -> TaskResult<MockStyleSession> {
        self.state.lock().unwrap().prepared.push((
            upstream_url.to_string(),
            fork_url.to_string(),
            branch.to_string(),
        ));
        Ok(MockStyleSession {
            state: Arc::clone(&self.state),
        })
    }
}

impl StyleSession for MockStyleSession {
    async fn run_formatter(&self, _tool: StyleTool) -> TaskResult<String> {
        Ok(self.state.lock().unwrap().formatter_output.clone())
    }

    async fn commit(&self, identity: &CommitIdentity, message: &str) -> TaskResult<CommitOutcome> {
        let mut state = self.state.lock().unwrap();
        state.commits.push((identity.clone(), message.to_string()));
        Ok(state.commit_outcome.clone())
    }

    async fn push(&self, branch: &str) -> TaskResult<PushResult> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push(branch.to_string());
        Ok(state.push_result.clone())
    }
}

// ─── Services ───

/// [`Services`] built from the doubles above, with default configuration and
/// no CI client.
#[derive(Debug, Default)]
pub struct MockServices {
    pub config: Config,
    pub vcs: MockVcs,
    pub ci: Option<MockCi>,
    pub store: MemoryStore,
    pub stacks: MockStacks,
    pub style: MockStyleWorkspace,
    vcs_tokens: Mutex<Vec<Option<String>>>,
}

impl MockServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ci(mut self, ci: Option<MockCi>) -> Self {
        self.ci = ci;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn ci_calls(&self) -> Vec<CiCall> {
        self.ci.as_ref().map(MockCi::calls).unwrap_or_default()
    }

    /// Tokens GitHub clients were requested with.
    pub fn vcs_tokens(&self) -> Vec<Option<String>> {
        self.vcs_tokens.lock().unwrap().clone()
    }
}

impl Services for MockServices {
    type Vcs = MockVcs;
    type Ci = MockCi;
    type Store = MemoryStore;
    type Stacks = MockStacks;
    type Style = MockStyleWorkspace;

    fn config(&self) -> &Config {
        &self.config
    }

    fn vcs(&self, token: Option<&str>) -> TaskResult<MockVcs> {
        self.vcs_tokens
            .lock()
            .unwrap()
            .push(token.map(str::to_string));
        Ok(self.vcs.clone())
    }

    fn ci(&self) -> Option<&MockCi> {
        self.ci.as_ref()
    }

    fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn stacks(&self) -> &MockStacks {
        &self.stacks
    }

    fn style(&self) -> &MockStyleWorkspace {
        &self.style
    }
}
