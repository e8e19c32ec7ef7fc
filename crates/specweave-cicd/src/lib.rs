//! `specweave-cicd`: watches a repository's CI runs and reports failures.
//!
//! ```text
//! WorkflowMonitor ── poll() ──► RunsProvider (GitHub Actions)
//!       │
//!       ├── record_poll() ──► StateManager (.specweave/state/cicd-monitor.json)
//!       │
//!       └── broadcast<PollResult> ──► MonitorService auto-notify ──► Notifier
//!                                                                   ├─ console
//!                                                                   ├─ file
//!                                                                   └─ webhook
//! ```

pub mod error;
pub mod github;
pub mod monitor;
pub mod notifier;
pub mod provider;
pub mod service;

pub use error::{CicdError, Result};
pub use github::GithubClient;
pub use monitor::{PollResult, RetryPolicy, WorkflowMonitor};
pub use notifier::{DeliveryReport, NotificationChannel, Notifier};
pub use provider::{ListRunsRequest, ProviderError, RunsProvider, RunsResponse, WorkflowRun};
pub use service::{MonitorService, MonitorStatus};

/// Run a blocking state operation off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> specweave_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
