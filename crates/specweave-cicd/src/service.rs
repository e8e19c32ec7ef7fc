use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use specweave_core::config::CicdConfig;
use specweave_core::state::StateManager;
use specweave_core::types::{FailureRecord, NotificationKind};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::github::GithubClient;
use crate::monitor::{PollResult, WorkflowMonitor};
use crate::notifier::{DeliveryReport, Notifier};
use crate::provider::RunsProvider;
use crate::{blocking, CicdError, Result};

/// Snapshot reported by [`MonitorService::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
    pub total_failures: u64,
    pub unprocessed_failures: usize,
    pub total_processed: u64,
    pub total_fixed: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

/// Owns the monitor, the state store and the notifier for one project.
pub struct MonitorService {
    config: CicdConfig,
    state: StateManager,
    monitor: Arc<WorkflowMonitor>,
    notifier: Arc<Notifier>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    auto_notify: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorService {
    /// Build a service talking to GitHub with the configured token.
    pub fn new(root: &Path, config: CicdConfig) -> Result<Self> {
        let provider = Arc::new(GithubClient::new(&config.github)?);
        Ok(Self::with_provider(root, config, provider))
    }

    pub fn with_provider(root: &Path, config: CicdConfig, provider: Arc<dyn RunsProvider>) -> Self {
        let state = StateManager::new(root);
        let notifier = Notifier::from_config(root, &config.notifications);
        Self::with_parts(config, state, provider, notifier)
    }

    pub fn with_parts(
        config: CicdConfig,
        state: StateManager,
        provider: Arc<dyn RunsProvider>,
        notifier: Notifier,
    ) -> Self {
        let monitor = WorkflowMonitor::new(
            provider,
            state.clone(),
            config.github.owner.clone(),
            config.github.repo.clone(),
            Duration::from_millis(config.monitoring.poll_interval_ms),
        );
        Self {
            config,
            state,
            monitor: Arc::new(monitor),
            notifier: Arc::new(notifier),
            started_at: Mutex::new(None),
            auto_notify: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CicdConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn start(&self) -> Result<()> {
        // Subscribe before the first poll fires so its result is seen.
        let rx = self.monitor.subscribe();
        if !self.monitor.start() {
            return Err(CicdError::AlreadyRunning);
        }
        *locked(&self.started_at) = Some(Utc::now());

        if self.config.monitoring.auto_notify {
            let handle = tokio::spawn(auto_notify_loop(
                rx,
                self.state.clone(),
                Arc::clone(&self.notifier),
            ));
            if let Some(old) = locked(&self.auto_notify).replace(handle) {
                old.abort();
            }
        }

        tracing::info!(
            owner = %self.config.github.owner,
            repo = %self.config.github.repo,
            auto_notify = self.config.monitoring.auto_notify,
            "CI/CD monitor service started"
        );
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.monitor.is_running() {
            return Err(CicdError::NotRunning);
        }
        self.monitor.stop();
        if let Some(handle) = locked(&self.auto_notify).take() {
            handle.abort();
        }
        *locked(&self.started_at) = None;
        tracing::info!("CI/CD monitor service stopped");
        Ok(())
    }

    /// One poll outside the timer loop.
    pub async fn poll_once(&self) -> PollResult {
        self.monitor.poll().await
    }

    /// Send `failure_detected` for every unprocessed failure and mark it
    /// processed once at least one channel took it. Returns how many were
    /// marked.
    pub async fn notify_unprocessed(&self) -> Result<usize> {
        notify_unprocessed(&self.state, &self.notifier).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn status(&self) -> MonitorStatus {
        let state = self.state.load_state();
        let started_at = *locked(&self.started_at);
        MonitorStatus {
            running: self.monitor.is_running(),
            started_at,
            uptime_secs: started_at.map(|t| (Utc::now() - t).num_seconds()),
            total_failures: state.total_failures,
            unprocessed_failures: state.unprocessed().len(),
            total_processed: state.total_processed,
            total_fixed: state.total_fixed,
            last_poll: state.last_poll,
        }
    }

    pub fn unprocessed_failures(&self) -> Vec<FailureRecord> {
        self.state.get_unprocessed_failures()
    }

    pub fn mark_processed(&self, run_id: u64) -> Result<bool> {
        Ok(self.state.mark_processed(run_id)?)
    }

    pub fn mark_analyzed(&self, run_id: u64) -> Result<bool> {
        Ok(self.state.mark_analyzed(run_id)?)
    }

    pub fn mark_fixed(&self, run_id: u64) -> Result<bool> {
        Ok(self.state.mark_fixed(run_id)?)
    }

    /// Send a notification for a stored failure by hand. Analysis and fix
    /// notifications also set the matching flag on the record.
    pub async fn notify(&self, run_id: u64, kind: NotificationKind) -> Result<DeliveryReport> {
        let state = self.state.clone();
        let failure = blocking(move || Ok(state.get_failure(run_id)))
            .await?
            .ok_or(CicdError::FailureNotFound(run_id))?;

        let report = self.notifier.notify(kind, &failure).await;

        let state = self.state.clone();
        match kind {
            NotificationKind::FailureDetected => {}
            NotificationKind::AnalysisComplete => {
                blocking(move || state.mark_analyzed(run_id)).await?;
            }
            NotificationKind::FixApplied => {
                blocking(move || state.mark_fixed(run_id)).await?;
            }
        }
        Ok(report)
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        if self.monitor.is_running() {
            self.monitor.stop();
        }
        if let Some(handle) = locked(&self.auto_notify).take() {
            handle.abort();
        }
    }
}

/// After each successful poll, notify every unprocessed failure and mark it
/// processed.
async fn auto_notify_loop(
    mut rx: tokio::sync::broadcast::Receiver<PollResult>,
    state: StateManager,
    notifier: Arc<Notifier>,
) {
    loop {
        match rx.recv().await {
            Ok(result) if result.is_ok() => {
                if let Err(e) = notify_unprocessed(&state, &notifier).await {
                    tracing::warn!(error = %e, "auto-notify failed");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "auto-notify fell behind poll results");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn notify_unprocessed(state: &StateManager, notifier: &Notifier) -> Result<usize> {
    let reader = state.clone();
    let pending = blocking(move || Ok(reader.get_unprocessed_failures())).await?;
    let mut marked = 0;
    for failure in &pending {
        let report = notifier.notify_failure_detected(failure).await;
        if report.delivered.is_empty() {
            tracing::warn!(
                run_id = failure.run_id,
                "no channel delivered the failure notification, will retry after next poll"
            );
            continue;
        }
        let writer = state.clone();
        let run_id = failure.run_id;
        blocking(move || writer.mark_processed(run_id)).await?;
        marked += 1;
    }
    Ok(marked)
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
