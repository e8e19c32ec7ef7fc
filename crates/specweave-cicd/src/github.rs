//! GitHub Actions implementation of [`RunsProvider`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use serde::Deserialize;
use std::str::FromStr;
use specweave_core::config::GithubConfig;

use crate::provider::{ListRunsRequest, ProviderError, RunsProvider, RunsResponse, WorkflowRun};

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("specweave/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn runs_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{owner}/{repo}/actions/runs", self.api_url)
    }
}

#[async_trait]
impl RunsProvider for GithubClient {
    async fn list_workflow_runs(&self, req: &ListRunsRequest) -> Result<RunsResponse, ProviderError> {
        let mut builder = self
            .http
            .get(self.runs_url(&req.owner, &req.repo))
            .query(&[("status", req.status.as_str())])
            .query(&[("per_page", req.per_page)])
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(since) = &req.if_modified_since {
            builder = builder.header(IF_MODIFIED_SINCE, since);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let remaining = header_value::<u32>(&headers, "x-ratelimit-remaining");
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status == StatusCode::NOT_MODIFIED {
            return Ok(RunsResponse {
                status: status.as_u16(),
                last_modified,
                rate_limit_remaining: remaining,
                workflow_runs: Vec::new(),
            });
        }

        // Secondary limits answer 429; the primary limit answers 403 with an
        // exhausted quota.
        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && remaining == Some(0))
        {
            return Err(ProviderError::RateLimited {
                retry_after: header_value::<u64>(&headers, "retry-after"),
            });
        }

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let page: RunsPage = resp.json().await.map_err(|e| ProviderError::Http {
            status: status.as_u16(),
            message: format!("invalid workflow runs payload: {e}"),
        })?;

        Ok(RunsResponse {
            status: status.as_u16(),
            last_modified,
            rate_limit_remaining: remaining,
            workflow_runs: page.workflow_runs,
        })
    }
}

/// Numeric header value; absent, malformed or out-of-range values are `None`.
fn header_value<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GithubClient {
        GithubClient::new(&GithubConfig {
            token: "test-token".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            api_url: server.url(),
        })
        .unwrap()
    }

    fn request(since: Option<&str>) -> ListRunsRequest {
        ListRunsRequest {
            owner: "acme".into(),
            repo: "widgets".into(),
            status: "completed".into(),
            per_page: 100,
            if_modified_since: since.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn lists_runs_with_auth_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("status".into(), "completed".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("last-modified", "Mon, 19 Oct 2026 10:00:00 GMT")
            .with_header("x-ratelimit-remaining", "4999")
            .with_body(
                r#"{"total_count": 2, "workflow_runs": [
                    {"id": 1, "name": "CI", "head_sha": "aaa", "head_branch": "main",
                     "status": "completed", "conclusion": "failure", "html_url": "https://gh/1"},
                    {"id": 2, "name": "CI", "head_sha": "bbb", "head_branch": "main",
                     "status": "completed", "conclusion": "success", "html_url": "https://gh/2"}
                ]}"#,
            )
            .create_async()
            .await;

        let resp = client(&server).list_workflow_runs(&request(None)).await.unwrap();
        mock.assert_async().await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.workflow_runs.len(), 2);
        assert_eq!(resp.rate_limit_remaining, Some(4999));
        assert_eq!(resp.last_modified.as_deref(), Some("Mon, 19 Oct 2026 10:00:00 GMT"));
    }

    #[tokio::test]
    async fn sends_conditional_header_and_maps_304() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::Any)
            .match_header("if-modified-since", "Mon, 19 Oct 2026 10:00:00 GMT")
            .with_status(304)
            .create_async()
            .await;

        let resp = client(&server)
            .list_workflow_runs(&request(Some("Mon, 19 Oct 2026 10:00:00 GMT")))
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(resp.is_not_modified());
        assert!(resp.workflow_runs.is_empty());
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let err = client(&server).list_workflow_runs(&request(None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after: Some(7) }));
    }

    #[tokio::test]
    async fn maps_exhausted_quota_403_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .create_async()
            .await;

        let err = client(&server).list_workflow_runs(&request(None)).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after: None }));
    }

    #[tokio::test]
    async fn oversized_rate_limit_header_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining", "4294967296")
            .with_body(r#"{"workflow_runs": []}"#)
            .create_async()
            .await;

        let resp = client(&server).list_workflow_runs(&request(None)).await.unwrap();
        assert_eq!(resp.rate_limit_remaining, None);
    }

    #[tokio::test]
    async fn other_errors_keep_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/widgets/actions/runs")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let err = client(&server).list_workflow_runs(&request(None)).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
