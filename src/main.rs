use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spackbot_worker::config::Config;
use spackbot_worker::gitlab::GitLabClient;
use spackbot_worker::handlers;
use spackbot_worker::queue::{Broker, Job};
use spackbot_worker::tasks::LiveServices;
use spackbot_worker::types::{CommentEvent, PullRequestEvent, QueueName};
use spackbot_worker::worker::Executor;

#[derive(Parser, Debug)]
#[command(name = "spackbot-worker")]
#[command(about = "Background job worker for spackbot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run jobs until interrupted.
    Work {
        /// Queues to poll, in priority order. Defaults to the short then the long queue.
        #[arg(long = "queue")]
        queues: Vec<String>,
    },

    /// Feed a webhook payload to its enqueue handler.
    Dispatch {
        event: EventKind,

        /// Path to the webhook JSON payload.
        payload: PathBuf,

        /// Installation token used by the job and its failure report.
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EventKind {
    RunPipeline,
    RebuildEverything,
    RetryPipeline,
    FixStyle,
    PrClosed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spackbot_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Work { queues } => work(config, queues).await,
        Command::Dispatch {
            event,
            payload,
            token,
        } => dispatch(config, event, &payload, token.as_deref()).await,
    }
}

async fn work(config: Config, queues: Vec<String>) -> Result<()> {
    let queues = if queues.is_empty() {
        vec![config.short_queue.clone(), config.long_queue.clone()]
    } else {
        queues.into_iter().map(QueueName::new).collect()
    };

    let broker = Broker::new(&config.queue_dir);
    let services = LiveServices::new(config).context("building service clients")?;
    let executor = Executor::new(services, &broker, &queues)?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing current job");
            on_signal.cancel();
        }
    });

    executor.run(shutdown).await?;
    Ok(())
}

async fn dispatch(config: Config, kind: EventKind, payload: &Path, token: Option<&str>) -> Result<()> {
    let raw = std::fs::read(payload)
        .with_context(|| format!("reading payload {}", payload.display()))?;
    let broker = Broker::new(&config.queue_dir);

    let jobs = match kind {
        EventKind::RunPipeline => {
            vec![handlers::run_pipeline(&config, &broker, &comment_event(&raw)?, token)?]
        }
        EventKind::RebuildEverything => {
            let event = comment_event(&raw)?;
            vec![handlers::run_pipeline_rebuild_all(&config, &broker, &event, token)?]
        }
        EventKind::RetryPipeline => {
            vec![handlers::retry_pipeline(&config, &broker, &comment_event(&raw)?, token)?]
        }
        EventKind::FixStyle => {
            vec![handlers::fix_style(&config, &broker, &comment_event(&raw)?, token)?]
        }
        EventKind::PrClosed => pr_closed(&config, &broker, &raw).await?,
    };

    for job in jobs {
        println!("{} {}", job.id, job.job_type());
    }
    Ok(())
}

async fn pr_closed(config: &Config, broker: &Broker, raw: &[u8]) -> Result<Vec<Job>> {
    let event: PullRequestEvent =
        serde_json::from_slice(raw).context("parsing pull_request payload")?;

    match &config.gitlab_token {
        Some(gitlab_token) => {
            let ci = GitLabClient::new(gitlab_token)?;
            if let Err(e) = handlers::close_pr_gitlab_branch(config, &ci, &event).await {
                warn!(error = %e, "Could not delete CI branch");
            }
        }
        None => warn!("No GitLab token, leaving CI branch in place"),
    }

    let jobs = handlers::close_pr_mirror(config, broker, &event)?;
    Ok(jobs.all().cloned().collect())
}

fn comment_event(raw: &[u8]) -> Result<CommentEvent> {
    serde_json::from_slice(raw).context("parsing issue_comment payload")
}
