//! Pipeline trigger: start or retry the CI pipeline for a PR.

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::github::VcsHost;
use crate::gitlab::{CiSystem, details_path, encoded_pipeline_ref, pipeline_link};
use crate::mirror::{delete_mirror, parse_mirror_url};
use crate::queue::JobMeta;
use crate::report::format_details_message;
use crate::types::{CommentEvent, Sha};

use super::{Services, TaskError, TaskResult};

const NO_AUTHENTICATION: &str =
    "I'm not able to run the pipeline now because I don't have authentication.";

const CANNOT_RUN_PIPELINE: &str = "I'm sorry, I cannot run the pipeline right now because GitLab does not have the latest commit from this pull request. Please wait for the branch to sync, or push a new commit, and then try again.";

const NOTHING_TO_RETRY: &str = "The last pipeline was run successfully.  There is nothing to retry";

const TRIGGER_PROBLEM: &str = "I had a problem triggering the pipeline.";

/// Pipeline states a retry may be applied to.
const RETRYABLE_STATUSES: [&str; 3] = ["canceled", "skipped", "failed"];

/// Query appended to a trigger so pipeline generation prunes nothing and
/// every spec is rebuilt from source.
fn rebuild_everything_query() -> String {
    format!(
        "&variables[][key]=SPACK_PRUNE_UNTOUCHED&variables[][value]=False\
         &variables[][key]=SPACK_PRUNE_UP_TO_DATE&variables[][value]=False\
         &variables[][key]=PIPELINE_MIRROR_TEMPLATE&variables[][value]={}",
        urlencoding::encode("single-src-pr-mirrors.yaml.in")
    )
}

/// Outcome of comparing the CI branch against the PR head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The CI branch commit has the PR head among its parents.
    UpToDate,

    /// CI is behind (or answered unexpectedly); the string explains why.
    Stale(String),
}

/// Checks a `repository/commits/{ref}` response against the PR head.
pub fn check_freshness(commit: &Value, head: &Sha) -> Freshness {
    let Some(parents) = commit.get("parent_ids").and_then(Value::as_array) else {
        return Freshness::Stale(format!("Unexpected response from gitlab: {}", commit));
    };

    let parent_ids: Vec<&str> = parents.iter().filter_map(Value::as_str).collect();
    if parent_ids.contains(&head.as_str()) {
        return Freshness::UpToDate;
    }

    let abbreviated: Vec<String> = parent_ids
        .iter()
        .map(|pid| Sha::new(*pid).short().to_string())
        .collect();
    Freshness::Stale(format!(
        "pr head: {}, gitlab commit parents: {:?}",
        head.short(),
        abbreviated
    ))
}

fn status(pipeline: &Value) -> &str {
    pipeline
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Picks the pipeline to retry from a newest-first listing.
///
/// `Err` carries the comment to post instead.
fn pipeline_to_retry(pipelines: &Value) -> Result<u64, &'static str> {
    let Some(list) = pipelines.as_array().filter(|list| !list.is_empty()) else {
        return Err(TRIGGER_PROBLEM);
    };

    if status(&list[0]) == "success" {
        return Err(NOTHING_TO_RETRY);
    }

    list.iter()
        .find(|p| RETRYABLE_STATUSES.contains(&status(p)))
        .and_then(|p| p.get("id"))
        .and_then(Value::as_u64)
        .ok_or(TRIGGER_PROBLEM)
}

/// Starts (or retries) the CI pipeline for the PR a comment was made on.
///
/// Permission refusals, a stale CI branch and CI responses without a
/// pipeline link are reported in PR comments. Transport failures are errors.
#[instrument(skip_all, fields(sender = %event.sender.login, retry = retry))]
pub async fn run_pipeline_task<S: Services>(
    services: &S,
    meta: &JobMeta,
    event: &CommentEvent,
    retry: bool,
) -> TaskResult<()> {
    let config = services.config();
    let gh = services.vcs(meta.auth_token.as_deref())?;
    let comments_url = event.issue.comments_url.as_str();

    let Some(ci) = services.ci() else {
        gh.post_comment(comments_url, NO_AUTHENTICATION).await?;
        return Ok(());
    };

    let pr_url = event.pull_request_url().ok_or(TaskError::NotAPullRequest)?;
    let number = event.pr_number().ok_or(TaskError::NotAPullRequest)?;
    let pr = gh.get_pull_request(pr_url).await?;

    let sender = event.sender.login.as_str();
    let author = pr.user.login.as_str();
    if author == sender {
        info!(pr = %number, "Author is requesting a pipeline run");
    } else if !gh
        .is_collaborator(&event.repository.collaborators_url, sender)
        .await?
    {
        info!(pr = %number, "Not found: {}", sender);
        let msg = format!(
            "Sorry {sender}, I cannot do that for you. Only users with write can make this request!"
        );
        gh.post_comment(comments_url, &msg).await?;
        return Ok(());
    }

    let repo_name = event.repository.name.as_str();
    let project = config
        .project(repo_name)
        .ok_or_else(|| TaskError::UnknownProject(repo_name.to_string()))?;
    let branch = pr.head.ref_name.as_str();
    let ci_ref = encoded_pipeline_ref(number, branch);

    let (result, verb) = if retry {
        let pipelines = ci.list_pipelines(&project.gitlab_project_url, &ci_ref).await?;
        match pipeline_to_retry(&pipelines) {
            Ok(id) => {
                debug!(pipeline_id = id, %ci_ref, "Retrying pipeline");
                let result = ci.retry_pipeline(&project.gitlab_project_url, id).await?;
                (result, "retried")
            }
            Err(msg) => {
                info!(%ci_ref, "No pipeline to retry");
                gh.post_comment(comments_url, msg).await?;
                return Ok(());
            }
        }
    } else {
        let commit = ci.branch_commit(&project.gitlab_project_url, &ci_ref).await?;
        if let Freshness::Stale(details) = check_freshness(&commit, &pr.head.sha) {
            debug!(%ci_ref, %details, "CI branch is stale");
            let msg = format_details_message(CANNOT_RUN_PIPELINE, &details);
            gh.post_comment(comments_url, &msg).await?;
            return Ok(());
        }

        let mut extra_query = String::new();
        if meta.rebuild_everything {
            extra_query = rebuild_everything_query();
            let mirror_url = config.pr_mirror_url(number, branch);
            info!(%mirror_url, %sender, "Deleting PR mirror for rebuild request");
            let deleted = delete_mirror(services.store(), &parse_mirror_url(&mirror_url)).await?;
            debug!(deleted, "Purged PR mirror");
        }

        info!(%ci_ref, "{} triggering pipeline", sender);
        let result = ci
            .trigger_pipeline(&project.gitlab_project_url, &ci_ref, &extra_query)
            .await?;
        (result, "started")
    };

    let msg = match details_path(&result) {
        Some(path) => {
            let link = pipeline_link(&config.gitlab_url, path);
            info!(%ci_ref, %link, "Pipeline {}", verb);
            format!("I've {verb} that [pipeline]({link}) for you!")
        }
        None => {
            warn!(%ci_ref, response = %result, "Problem triggering pipeline");
            TRIGGER_PROBLEM.to_string()
        }
    };
    gh.post_comment(comments_url, &msg).await?;
    Ok(())
}
