use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use specweave_core::state::StateManager;
use specweave_core::types::FailureRecord;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::provider::{ListRunsRequest, ProviderError, RunsProvider, WorkflowRun};
use crate::CicdError;

/// Largest page size the runs endpoint accepts.
pub const RUNS_PER_PAGE: u32 = 100;

// ─── RetryPolicy ──────────────────────────────────────────────────────────

/// Backoff for rate-limited polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Wait used when the provider sends no `retry-after`; doubled per attempt.
    pub default_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            default_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let delay = match retry_after {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let factor = 1u32 << attempt.saturating_sub(1).min(16);
                self.default_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

// ─── PollResult ───────────────────────────────────────────────────────────

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub total_runs: usize,
    pub new_failures: usize,
    pub duplicates: usize,
    pub status: u16,
    pub rate_limit_remaining: Option<u32>,
    pub new_records: Vec<FailureRecord>,
    /// Set when the poll failed; counts are zero in that case.
    pub error: Option<String>,
}

impl PollResult {
    fn failed(status: u16, error: &CicdError) -> Self {
        Self {
            status,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ─── WorkflowMonitor ──────────────────────────────────────────────────────

struct PollerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls a repository's completed runs on a timer and records failures.
///
/// Every [`PollResult`] produced by the timer loop is published to
/// [`WorkflowMonitor::subscribe`] receivers.
pub struct WorkflowMonitor {
    provider: Arc<dyn RunsProvider>,
    state: StateManager,
    owner: String,
    repo: String,
    poll_interval: Duration,
    retry: RetryPolicy,
    last_modified: Mutex<Option<String>>,
    task: Mutex<Option<PollerTask>>,
    events: broadcast::Sender<PollResult>,
}

impl WorkflowMonitor {
    pub fn new(
        provider: Arc<dyn RunsProvider>,
        state: StateManager,
        owner: impl Into<String>,
        repo: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            provider,
            state,
            owner: owner.into(),
            repo: repo.into(),
            poll_interval,
            retry: RetryPolicy::default(),
            last_modified: Mutex::new(None),
            task: Mutex::new(None),
            events,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollResult> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        locked(&self.task)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Poll once right away, then every `poll_interval`. Returns `false` if
    /// the loop was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = locked(&self.task);
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            tracing::info!("workflow monitor already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // Not raced against shutdown: a poll in flight runs to completion.
                let result = this.poll().await;
                let _ = this.events.send(result);
            }
            tracing::debug!("poll loop exited");
        });

        *slot = Some(PollerTask { shutdown, handle });
        tracing::info!(
            owner = %self.owner,
            repo = %self.repo,
            interval_ms = self.poll_interval.as_millis() as u64,
            "workflow monitor started"
        );
        true
    }

    /// Cancel the timer. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let Some(task) = locked(&self.task).take() else {
            tracing::info!("workflow monitor not running");
            return false;
        };
        if task.handle.is_finished() {
            return false;
        }
        let _ = task.shutdown.send(true);
        tracing::info!("workflow monitor stopped");
        true
    }

    /// Run one poll cycle. Never fails: provider and state errors are logged
    /// and reported through [`PollResult::error`].
    pub async fn poll(&self) -> PollResult {
        let mut attempt = 0;
        loop {
            match self.poll_once().await {
                Ok(result) => return result,
                Err(CicdError::Provider(ProviderError::RateLimited { retry_after }))
                    if attempt < self.retry.max_retries =>
                {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt, retry_after);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited by CI provider, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let status = match &e {
                        CicdError::Provider(p) => p.status(),
                        _ => 500,
                    };
                    tracing::error!(status, error = %e, "poll failed");
                    return PollResult::failed(status, &e);
                }
            }
        }
    }

    async fn poll_once(&self) -> crate::Result<PollResult> {
        let req = ListRunsRequest {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            status: "completed".to_string(),
            per_page: RUNS_PER_PAGE,
            if_modified_since: locked(&self.last_modified).clone(),
        };
        let resp = self.provider.list_workflow_runs(&req).await?;

        if resp.is_not_modified() {
            tracing::debug!("workflow runs not modified since last poll");
            return Ok(PollResult {
                status: resp.status,
                rate_limit_remaining: resp.rate_limit_remaining,
                ..Default::default()
            });
        }

        let failed: Vec<FailureRecord> = resp
            .workflow_runs
            .iter()
            .filter(|r| r.is_failure())
            .map(WorkflowRun::to_failure_record)
            .collect();
        let seen = failed.len();

        let state = self.state.clone();
        let new_records = crate::blocking(move || state.record_poll(failed)).await?;

        // Only remember Last-Modified once the page is persisted, otherwise a
        // failed write would be hidden behind the next 304.
        if let Some(lm) = resp.last_modified {
            *locked(&self.last_modified) = Some(lm);
        }

        for record in &new_records {
            tracing::info!(
                run_id = record.run_id,
                workflow = %record.workflow_name,
                branch = %record.branch,
                "new workflow failure"
            );
        }

        Ok(PollResult {
            total_runs: resp.workflow_runs.len(),
            new_failures: new_records.len(),
            duplicates: seen - new_records.len(),
            status: resp.status,
            rate_limit_remaining: resp.rate_limit_remaining,
            new_records,
            error: None,
        })
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Tests ────────────────────────────────────────────────────────────────
