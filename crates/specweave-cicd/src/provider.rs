//! The narrow seam between the monitor and a CI provider's HTTP API.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use specweave_core::types::FailureRecord;
use thiserror::Error;

/// Parameters for one "list workflow runs" call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRunsRequest {
    pub owner: String,
    pub repo: String,
    pub status: String,
    pub per_page: u32,
    /// Value for `If-Modified-Since`, taken from the previous `Last-Modified`.
    pub if_modified_since: Option<String>,
}

/// A provider response. `status == 304` means nothing changed since
/// `if_modified_since` and `workflow_runs` is empty.
#[derive(Debug, Clone, Default)]
pub struct RunsResponse {
    pub status: u16,
    pub last_modified: Option<String>,
    pub rate_limit_remaining: Option<u32>,
    pub workflow_runs: Vec<WorkflowRun>,
}

impl RunsResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// The subset of a workflow run the monitor cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: String,
}

impl WorkflowRun {
    pub fn is_failure(&self) -> bool {
        self.conclusion.as_deref() == Some("failure")
    }

    pub fn to_failure_record(&self) -> FailureRecord {
        FailureRecord {
            run_id: self.id,
            workflow_name: self.name.clone().unwrap_or_else(|| "unknown".to_string()),
            commit_sha: self.head_sha.clone(),
            branch: self.head_branch.clone().unwrap_or_else(|| "unknown".to_string()),
            detected_at: Utc::now(),
            processed: false,
            analyzed: false,
            fixed: false,
            url: self.html_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Status code to report for this error; 500 when none was observed.
    pub fn status(&self) -> u16 {
        match self {
            ProviderError::RateLimited { .. } => 429,
            ProviderError::Http { status, .. } => *status,
            ProviderError::Transport(_) => 500,
        }
    }
}

#[async_trait]
pub trait RunsProvider: Send + Sync {
    async fn list_workflow_runs(&self, req: &ListRunsRequest) -> Result<RunsResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_deserializes_with_missing_optionals() {
        let run: WorkflowRun = serde_json::from_str(
            r#"{"id": 9, "head_sha": "abc", "conclusion": "failure", "html_url": "https://x"}"#,
        )
        .unwrap();
        assert!(run.is_failure());
        let rec = run.to_failure_record();
        assert_eq!(rec.run_id, 9);
        assert_eq!(rec.workflow_name, "unknown");
        assert_eq!(rec.branch, "unknown");
        assert!(!rec.processed);
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(ProviderError::RateLimited { retry_after: None }.status(), 429);
        assert_eq!(ProviderError::Transport("reset".into()).status(), 500);
        assert_eq!(
            ProviderError::Http { status: 404, message: "nope".into() }.status(),
            404
        );
    }
}
