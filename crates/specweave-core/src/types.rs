use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const STATE_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// FailureRecord
// ---------------------------------------------------------------------------

/// One failed CI run, keyed by the provider's run id.
///
/// Records are never removed; the three flags only move from `false` to
/// `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub run_id: u64,
    pub workflow_name: String,
    pub commit_sha: String,
    pub branch: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub analyzed: bool,
    #[serde(default)]
    pub fixed: bool,
    pub url: String,
}

impl FailureRecord {
    pub fn new(
        run_id: u64,
        workflow_name: impl Into<String>,
        commit_sha: impl Into<String>,
        branch: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            workflow_name: workflow_name.into(),
            commit_sha: commit_sha.into(),
            branch: branch.into(),
            detected_at: Utc::now(),
            processed: false,
            analyzed: false,
            fixed: false,
            url: url.into(),
        }
    }

    pub fn short_sha(&self) -> &str {
        self.commit_sha.get(..7).unwrap_or(&self.commit_sha)
    }
}

// ---------------------------------------------------------------------------
// MonitorState
// ---------------------------------------------------------------------------

/// The persisted monitor document (`cicd-monitor.json`).
///
/// `failures` and `version` are required when reading; a document missing
/// either is treated as corrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    #[serde(default)]
    pub last_poll: Option<DateTime<Utc>>,
    pub failures: BTreeMap<u64, FailureRecord>,
    #[serde(default)]
    pub total_failures: u64,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_fixed: u64,
    pub version: String,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            last_poll: None,
            failures: BTreeMap::new(),
            total_failures: 0,
            total_processed: 0,
            total_fixed: 0,
            version: STATE_VERSION.to_string(),
        }
    }
}

impl MonitorState {
    /// Insert a record unless its run id is already known. Returns whether it
    /// was inserted.
    pub fn insert_failure(&mut self, record: FailureRecord) -> bool {
        if self.failures.contains_key(&record.run_id) {
            return false;
        }
        self.failures.insert(record.run_id, record);
        self.total_failures += 1;
        true
    }

    pub fn mark_processed(&mut self, run_id: u64) -> bool {
        let Some(record) = self.failures.get_mut(&run_id) else {
            return false;
        };
        if !record.processed {
            record.processed = true;
            self.total_processed += 1;
        }
        true
    }

    pub fn mark_analyzed(&mut self, run_id: u64) -> bool {
        let Some(record) = self.failures.get_mut(&run_id) else {
            return false;
        };
        record.analyzed = true;
        true
    }

    pub fn mark_fixed(&mut self, run_id: u64) -> bool {
        let Some(record) = self.failures.get_mut(&run_id) else {
            return false;
        };
        if !record.fixed {
            record.fixed = true;
            self.total_fixed += 1;
        }
        true
    }

    pub fn unprocessed(&self) -> Vec<FailureRecord> {
        self.failures
            .values()
            .filter(|f| !f.processed)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FailureDetected,
    AnalysisComplete,
    FixApplied,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::FailureDetected => "failure_detected",
            NotificationKind::AnalysisComplete => "analysis_complete",
            NotificationKind::FixApplied => "fix_applied",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event about one failure, built per send and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub failure: FailureRecord,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, failure: &FailureRecord) -> Self {
        let message = match kind {
            NotificationKind::FailureDetected => format!(
                "Workflow '{}' failed on branch '{}' (run #{}, commit {})",
                failure.workflow_name,
                failure.branch,
                failure.run_id,
                failure.short_sha()
            ),
            NotificationKind::AnalysisComplete => format!(
                "Analysis complete for workflow '{}' (run #{})",
                failure.workflow_name, failure.run_id
            ),
            NotificationKind::FixApplied => format!(
                "Fix applied for workflow '{}' (run #{})",
                failure.workflow_name, failure.run_id
            ),
        };
        Self {
            kind,
            failure: failure.clone(),
            message,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Console,
    File,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::File => "file",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = crate::SpecweaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(ChannelKind::Console),
            "file" => Ok(ChannelKind::File),
            "webhook" => Ok(ChannelKind::Webhook),
            other => Err(crate::SpecweaveError::UnknownChannel(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
