//! Runtime configuration.
//!
//! All settings live in an explicit [`Config`] value that is built once at
//! startup and handed to the broker, the worker and the handlers. Nothing here
//! is a process-wide global.
//!
//! [`Config::new`] carries the defaults; [`Config::from_env`] overlays the
//! environment variables documented on each field.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{PrNumber, QueueName};

const DEFAULT_QUEUE_DIR: &str = "/var/lib/spackbot/queues";
const DEFAULT_SHORT_QUEUE: &str = "tasks";
const DEFAULT_LONG_QUEUE: &str = "tasks_long";

/// Default timeout for pipeline and style jobs (6 hours).
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 21_600;

/// Mirror maintenance jobs always get 6 hours.
pub const MIRROR_JOB_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_WORKER_NAME: &str = "spackbot-worker";
const DEFAULT_BOTNAME: &str = "@spackbot";
const DEFAULT_GITLAB_URL: &str = "https://gitlab.spack.io";
const DEFAULT_SPACK_PROJECT_URL: &str = "https://gitlab.spack.io/api/v4/projects/2";
const DEFAULT_PACKAGES_PROJECT_URL: &str =
    "https://gitlab.spack.io/api/v4/projects/spack%2Fspack-packages";
const DEFAULT_PR_MIRROR_BASE_URL: &str = "s3://spack-binaries-prs";
const DEFAULT_PUBLISH_MIRROR_BASE_URL: &str = "s3://spack-binaries";
const DEFAULT_EXPECTED_BASE: &str = "develop";
const DEFAULT_RETIRE_AFTER_DAYS: i64 = 7;
const DEFAULT_SPACK_UPSTREAM: &str = "https://github.com/spack/spack.git";
const DEFAULT_PACKAGES_UPSTREAM: &str = "https://github.com/spack/spack-packages.git";

/// Name of the shared PR mirror directory under the PR mirror base.
pub const SHARED_PR_MIRROR: &str = "shared_pr_mirror";

/// The auto-formatter invocation for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleTool {
    /// `bin/spack --color never style --fix --root <dir>`
    SpackStyle,

    /// `.ci/style_check.sh --fix`
    PackagesStyleCheck,
}

impl StyleTool {
    /// Path of the tool relative to the root of a trusted checkout.
    pub fn program(&self) -> &'static str {
        match self {
            StyleTool::SpackStyle => "bin/spack",
            StyleTool::PackagesStyleCheck => ".ci/style_check.sh",
        }
    }

    /// Arguments for a run against the checkout at `root`.
    pub fn args(&self, root: &str) -> Vec<String> {
        match self {
            StyleTool::SpackStyle => ["--color", "never", "style", "--fix", "--root", root]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            StyleTool::PackagesStyleCheck => vec!["--fix".to_string()],
        }
    }
}

/// Settings for one repository the bot serves.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Trusted upstream clone URL.
    pub upstream_url: String,

    /// GitLab project API base (`.../api/v4/projects/<id>`).
    pub gitlab_project_url: String,

    pub style_tool: StyleTool,
}

/// Where mirror objects are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Real object storage through the `aws` command-line tool.
    AwsCli,

    /// A local directory whose subdirectories act as buckets.
    Filesystem(PathBuf),
}

impl StoreBackend {
    /// Parses `aws` or `fs:<root>`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" | "s3" => Some(StoreBackend::AwsCli),
            other => other
                .strip_prefix("fs:")
                .filter(|root| !root.is_empty())
                .map(|root| StoreBackend::Filesystem(PathBuf::from(root))),
        }
    }
}

/// Process configuration for the worker and the enqueue handlers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker root directory. Env: `SPACKBOT_QUEUE_DIR`.
    pub queue_dir: PathBuf,

    /// Env: `TASK_QUEUE_SHORT`.
    pub short_queue: QueueName,

    /// Env: `TASK_QUEUE_LONG`.
    pub long_queue: QueueName,

    /// Timeout for pipeline and style jobs. Env: `WORKER_JOB_TIMEOUT` (seconds).
    pub job_timeout: Duration,

    /// Identity written into claim markers. Env: `WORKER_NAME`.
    pub worker_name: String,

    /// Sleep between polls of empty queues. Env: `WORKER_POLL_INTERVAL_SECS`.
    pub poll_interval: Duration,

    /// CI private token. Env: `GITLAB_TOKEN`.
    pub gitlab_token: Option<String>,

    /// CI web base used for pipeline links. Env: `GITLAB_URL`.
    pub gitlab_url: String,

    /// Env: `SPACKBOT_NAME`.
    pub botname: String,

    /// Env: `PR_BINARIES_MIRROR_BASE_URL`.
    pub pr_mirror_base_url: String,

    /// Env: `PUBLISH_MIRROR_BASE_URL`.
    pub publish_mirror_base_url: String,

    /// Env: `PR_BINARIES_BASE_BRANCH`.
    pub pr_expected_base: String,

    /// Env: `SHARED_PR_MIRROR_RETIRE_AFTER_DAYS`.
    pub retire_after_days: i64,

    /// Graduate PR binaries into the shared mirror on merge.
    /// Off unless `PR_MIRROR_GRADUATION` is truthy.
    pub graduation_enabled: bool,

    /// Env: `SPACKBOT_OBJECT_STORE` (`aws` or `fs:<root>`).
    pub store_backend: StoreBackend,

    /// Repository holding the CI stack definitions. Env: `SPACK_PACKAGES_UPSTREAM_URL`.
    pub stacks_upstream_url: String,

    /// Per-repository settings keyed by short repository name.
    pub projects: HashMap<String, ProjectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::build(
            DEFAULT_SPACK_UPSTREAM.to_string(),
            DEFAULT_PACKAGES_UPSTREAM.to_string(),
            DEFAULT_SPACK_PROJECT_URL.to_string(),
            DEFAULT_PACKAGES_PROJECT_URL.to_string(),
        )
    }

    fn build(
        spack_upstream: String,
        packages_upstream: String,
        spack_project_url: String,
        packages_project_url: String,
    ) -> Self {
        let mut projects = HashMap::new();
        projects.insert(
            "spack".to_string(),
            ProjectConfig {
                upstream_url: spack_upstream,
                gitlab_project_url: spack_project_url,
                style_tool: StyleTool::SpackStyle,
            },
        );
        projects.insert(
            "spack-packages".to_string(),
            ProjectConfig {
                upstream_url: packages_upstream.clone(),
                gitlab_project_url: packages_project_url,
                style_tool: StyleTool::PackagesStyleCheck,
            },
        );

        Config {
            queue_dir: PathBuf::from(DEFAULT_QUEUE_DIR),
            short_queue: QueueName::new(DEFAULT_SHORT_QUEUE),
            long_queue: QueueName::new(DEFAULT_LONG_QUEUE),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            gitlab_token: None,
            gitlab_url: DEFAULT_GITLAB_URL.to_string(),
            botname: DEFAULT_BOTNAME.to_string(),
            pr_mirror_base_url: DEFAULT_PR_MIRROR_BASE_URL.to_string(),
            publish_mirror_base_url: DEFAULT_PUBLISH_MIRROR_BASE_URL.to_string(),
            pr_expected_base: DEFAULT_EXPECTED_BASE.to_string(),
            retire_after_days: DEFAULT_RETIRE_AFTER_DAYS,
            graduation_enabled: false,
            store_backend: StoreBackend::AwsCli,
            stacks_upstream_url: packages_upstream,
            projects,
        }
    }

    /// Creates a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let mut config = Self::build(
            var("SPACK_UPSTREAM_URL", DEFAULT_SPACK_UPSTREAM),
            var("SPACK_PACKAGES_UPSTREAM_URL", DEFAULT_PACKAGES_UPSTREAM),
            var("GITLAB_SPACK_PROJECT_URL", DEFAULT_SPACK_PROJECT_URL),
            var("GITLAB_PACKAGES_PROJECT_URL", DEFAULT_PACKAGES_PROJECT_URL),
        );

        config.queue_dir = PathBuf::from(var("SPACKBOT_QUEUE_DIR", DEFAULT_QUEUE_DIR));
        config.short_queue = QueueName::new(var("TASK_QUEUE_SHORT", DEFAULT_SHORT_QUEUE));
        config.long_queue = QueueName::new(var("TASK_QUEUE_LONG", DEFAULT_LONG_QUEUE));
        config.job_timeout = Duration::from_secs(
            lookup("WORKER_JOB_TIMEOUT")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
        );
        config.worker_name = var("WORKER_NAME", DEFAULT_WORKER_NAME);
        config.poll_interval = Duration::from_secs(
            lookup("WORKER_POLL_INTERVAL_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );
        config.gitlab_token = lookup("GITLAB_TOKEN").filter(|t| !t.is_empty());
        config.gitlab_url = var("GITLAB_URL", DEFAULT_GITLAB_URL);
        config.botname = var("SPACKBOT_NAME", DEFAULT_BOTNAME);
        config.pr_mirror_base_url = var("PR_BINARIES_MIRROR_BASE_URL", DEFAULT_PR_MIRROR_BASE_URL);
        config.publish_mirror_base_url =
            var("PUBLISH_MIRROR_BASE_URL", DEFAULT_PUBLISH_MIRROR_BASE_URL);
        config.pr_expected_base = var("PR_BINARIES_BASE_BRANCH", DEFAULT_EXPECTED_BASE);
        config.retire_after_days = lookup("SHARED_PR_MIRROR_RETIRE_AFTER_DAYS")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(DEFAULT_RETIRE_AFTER_DAYS);
        config.graduation_enabled = lookup("PR_MIRROR_GRADUATION")
            .map(|s| is_truthy(&s))
            .unwrap_or(false);
        if let Some(backend) = lookup("SPACKBOT_OBJECT_STORE").and_then(|s| StoreBackend::parse(&s))
        {
            config.store_backend = backend;
        }

        config
    }

    /// Settings for the repository with the given short name.
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }

    /// Key of a PR's dedicated mirror under the mirror base: `pr{N}_{branch}`.
    pub fn pr_mirror_key(pr: PrNumber, branch: &str) -> String {
        format!("pr{}_{}", pr.0, branch)
    }

    /// URL of a PR's dedicated mirror.
    pub fn pr_mirror_url(&self, pr: PrNumber, branch: &str) -> String {
        format!(
            "{}/{}",
            self.pr_mirror_base_url,
            Self::pr_mirror_key(pr, branch)
        )
    }

    /// URL of the shared PR mirror.
    pub fn shared_mirror_url(&self) -> String {
        format!("{}/{}", self.pr_mirror_base_url, SHARED_PR_MIRROR)
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
