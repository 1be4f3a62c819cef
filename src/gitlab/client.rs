//! reqwest-backed [`CiSystem`].

use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;

use super::{CiError, CiResult, CiSystem};

/// A GitLab API client authenticated with a private token.
#[derive(Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
}

impl std::fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabClient").finish_non_exhaustive()
    }
}

impl GitLabClient {
    /// Creates a client sending `PRIVATE-TOKEN: {token}` on every request.
    pub fn new(token: &str) -> CiResult<Self> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(token).map_err(|_| CiError::InvalidToken)?;
        value.set_sensitive(true);
        headers.insert("PRIVATE-TOKEN", value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|source| CiError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { http })
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> CiResult<Value> {
        let transport = |source| CiError::Transport {
            url: url.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        debug!(%url, %status, "GitLab response");
        Ok(parse_body(&text))
    }
}

/// Parses a response body, keeping non-JSON bodies as a string value.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl CiSystem for GitLabClient {
    async fn branch_commit(&self, project_url: &str, encoded_ref: &str) -> CiResult<Value> {
        let url = format!("{project_url}/repository/commits/{encoded_ref}");
        self.send(self.http.get(&url), &url).await
    }

    async fn trigger_pipeline(
        &self,
        project_url: &str,
        encoded_ref: &str,
        extra_query: &str,
    ) -> CiResult<Value> {
        let url = format!("{project_url}/pipeline?ref={encoded_ref}{extra_query}");
        self.send(self.http.post(&url), &url).await
    }

    async fn list_pipelines(&self, project_url: &str, encoded_ref: &str) -> CiResult<Value> {
        let url = format!("{project_url}/pipelines?order_by=updated_at&ref={encoded_ref}");
        self.send(self.http.get(&url), &url).await
    }

    async fn retry_pipeline(&self, project_url: &str, pipeline_id: u64) -> CiResult<Value> {
        let url = format!("{project_url}/pipelines/{pipeline_id}/retry");
        self.send(self.http.post(&url), &url).await
    }

    async fn delete_branch(&self, project_url: &str, encoded_branch: &str) -> CiResult<()> {
        let url = format!("{project_url}/repository/branches/{encoded_branch}");
        self.send(self.http.delete(&url), &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const TOKEN: &str = "glpat-abc";
    const REF: &str = "github%2Fpr482_feature";

    fn project(server: &MockServer) -> String {
        server.url("/api/v4/projects/2")
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"id\": 3}"), json!({ "id": 3 }));
        assert_eq!(
            parse_body("<html>502</html>"),
            Value::String("<html>502</html>".to_string())
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        assert!(matches!(
            GitLabClient::new("bad\ntoken"),
            Err(CiError::InvalidToken)
        ));
        assert!(GitLabClient::new("glpat-abc").is_ok());
    }

    // ─── Requests ───

    #[tokio::test]
    async fn branch_commit_gets_commit_with_private_token() {
        let server = MockServer::start();
        let commit = server.mock(|when, then| {
            when.method(GET)
                .path_includes("/api/v4/projects/2/repository/commits/github")
                .path_includes("pr482_feature")
                .header("PRIVATE-TOKEN", TOKEN);
            then.status(200)
                .json_body(json!({ "id": "abc", "parent_ids": ["def"] }));
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        let body = client.branch_commit(&project(&server), REF).await.unwrap();

        assert_eq!(body, json!({ "id": "abc", "parent_ids": ["def"] }));
        commit.assert_calls(1);
    }

    #[tokio::test]
    async fn error_status_body_is_returned_as_value() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path_includes("/repository/commits/");
            then.status(404)
                .json_body(json!({ "message": "404 Commit Not Found" }));
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        let body = client.branch_commit(&project(&server), REF).await.unwrap();
        assert_eq!(body, json!({ "message": "404 Commit Not Found" }));
    }

    #[tokio::test]
    async fn trigger_pipeline_posts_ref_and_variables() {
        let server = MockServer::start();
        let trigger = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v4/projects/2/pipeline")
                .query_param("ref", "github/pr482_feature")
                .query_param_exists("variables[][key]")
                .header("PRIVATE-TOKEN", TOKEN);
            then.status(201)
                .json_body(json!({ "id": 9, "detailed_status": { "details_path": "/p/9" } }));
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        let body = client
            .trigger_pipeline(
                &project(&server),
                REF,
                "&variables[][key]=SPACK_PRUNE_UNTOUCHED&variables[][value]=False",
            )
            .await
            .unwrap();

        assert_eq!(body["id"], json!(9));
        trigger.assert_calls(1);
    }

    #[tokio::test]
    async fn list_pipelines_orders_by_update_time() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v4/projects/2/pipelines")
                .query_param("order_by", "updated_at")
                .query_param("ref", "github/pr482_feature")
                .header("PRIVATE-TOKEN", TOKEN);
            then.status(200)
                .json_body(json!([{ "id": 7, "status": "failed" }]));
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        let body = client.list_pipelines(&project(&server), REF).await.unwrap();

        assert_eq!(body, json!([{ "id": 7, "status": "failed" }]));
        list.assert_calls(1);
    }

    #[tokio::test]
    async fn retry_pipeline_posts_to_retry_endpoint() {
        let server = MockServer::start();
        let retry = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v4/projects/2/pipelines/7/retry")
                .header("PRIVATE-TOKEN", TOKEN);
            then.status(201).json_body(json!({ "id": 7, "status": "pending" }));
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        let body = client.retry_pipeline(&project(&server), 7).await.unwrap();

        assert_eq!(body["status"], json!("pending"));
        retry.assert_calls(1);
    }

    #[tokio::test]
    async fn delete_branch_sends_delete() {
        let server = MockServer::start();
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path_includes("/api/v4/projects/2/repository/branches/github")
                .path_includes("pr482_feature")
                .header("PRIVATE-TOKEN", TOKEN);
            then.status(204);
        });

        let client = GitLabClient::new(TOKEN).unwrap();
        client.delete_branch(&project(&server), REF).await.unwrap();
        delete.assert_calls(1);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let url = "http://127.0.0.1:1/api/v4/projects/2";

        let client = GitLabClient::new(TOKEN).unwrap();
        let err = client.retry_pipeline(url, 1).await.unwrap_err();
        match err {
            CiError::Transport { url: failed, .. } => {
                assert!(failed.ends_with("/api/v4/projects/2/pipelines/1/retry"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
