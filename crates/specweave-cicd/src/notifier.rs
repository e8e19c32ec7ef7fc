//! Best-effort notification fan-out.
//!
//! Each configured channel gets every notification concurrently; a channel
//! that fails is logged and reported but never affects the others. There is
//! no retry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use console::style;
use futures::future::join_all;
use serde::Serialize;
use specweave_core::config::NotificationsConfig;
use specweave_core::io::append_text;
use specweave_core::paths;
use specweave_core::types::{ChannelKind, FailureRecord, Notification, NotificationKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("write failed: {0}")]
    Write(#[from] specweave_core::SpecweaveError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered HTTP {0}")]
    Status(u16),

    #[error("delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A destination for notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError>;
}

// ─── Console ──────────────────────────────────────────────────────────────

/// Colored one-line summary on stderr.
pub struct ConsoleChannel {
    debug: bool,
}

impl ConsoleChannel {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        ChannelKind::Console.as_str()
    }

    async fn deliver(&self, n: &Notification) -> Result<(), ChannelError> {
        let (icon, message) = match n.kind {
            NotificationKind::FailureDetected => ("❌", style(&n.message).red()),
            NotificationKind::AnalysisComplete => ("🔍", style(&n.message).yellow()),
            NotificationKind::FixApplied => ("✅", style(&n.message).green()),
        };
        eprintln!(
            "{icon} {} {}",
            style(n.timestamp.format("%Y-%m-%d %H:%M:%S")).dim().for_stderr(),
            message.bold().for_stderr()
        );
        if !n.failure.url.is_empty() {
            eprintln!("   {}", style(&n.failure.url).dim().for_stderr());
        }
        if self.debug {
            eprintln!("{}", serde_json::to_string_pretty(n).unwrap_or_default());
        }
        Ok(())
    }
}

// ─── File ─────────────────────────────────────────────────────────────────

/// Appends one timestamped line per notification to a log file.
pub struct FileChannel {
    path: PathBuf,
    debug: bool,
}

impl FileChannel {
    pub fn new(path: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            path: path.into(),
            debug,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        ChannelKind::File.as_str()
    }

    async fn deliver(&self, n: &Notification) -> Result<(), ChannelError> {
        let mut text = format!(
            "[{}] {} {}",
            n.timestamp.to_rfc3339(),
            n.kind.as_str().to_uppercase(),
            n.message
        );
        if !n.failure.url.is_empty() {
            text.push_str(&format!(" ({})", n.failure.url));
        }
        text.push('\n');
        if self.debug {
            text.push_str(&serde_json::to_string(n).unwrap_or_default());
            text.push('\n');
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || append_text(&path, &text)).await??;
        Ok(())
    }
}

// ─── Webhook ──────────────────────────────────────────────────────────────

/// POSTs the notification JSON to a URL. Without a URL it does nothing.
pub struct WebhookChannel {
    http: reqwest::Client,
    url: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        ChannelKind::Webhook.as_str()
    }

    async fn deliver(&self, n: &Notification) -> Result<(), ChannelError> {
        let Some(url) = &self.url else {
            tracing::warn!("webhook channel enabled but no webhook URL configured");
            return Ok(());
        };
        let resp = self.http.post(url).json(n).send().await?;
        if !resp.status().is_success() {
            return Err(ChannelError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

// ─── Notifier ─────────────────────────────────────────────────────────────

/// Per-channel outcome of one send.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Notifier {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn from_config(root: &Path, config: &NotificationsConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|kind| -> Box<dyn NotificationChannel> {
                match kind {
                    ChannelKind::Console => Box::new(ConsoleChannel::new(config.debug)),
                    ChannelKind::File => Box::new(FileChannel::new(
                        paths::resolve(root, &config.log_file),
                        config.debug,
                    )),
                    ChannelKind::Webhook => Box::new(WebhookChannel::new(config.webhook_url.clone())),
                }
            })
            .collect();
        Self { channels }
    }

    pub fn with_channels(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub async fn notify_failure_detected(&self, failure: &FailureRecord) -> DeliveryReport {
        self.notify(NotificationKind::FailureDetected, failure).await
    }

    pub async fn notify_analysis_complete(&self, failure: &FailureRecord) -> DeliveryReport {
        self.notify(NotificationKind::AnalysisComplete, failure).await
    }

    pub async fn notify_fix_applied(&self, failure: &FailureRecord) -> DeliveryReport {
        self.notify(NotificationKind::FixApplied, failure).await
    }

    pub async fn notify(&self, kind: NotificationKind, failure: &FailureRecord) -> DeliveryReport {
        self.send(&Notification::new(kind, failure)).await
    }

    /// Deliver to every channel and wait for all of them to settle.
    async fn send(&self, notification: &Notification) -> DeliveryReport {
        let outcomes = join_all(self.channels.iter().map(|channel| async move {
            (channel.name().to_string(), channel.deliver(notification).await)
        }))
        .await;

        let mut report = DeliveryReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(name),
                Err(e) => {
                    tracing::warn!(
                        channel = %name,
                        run_id = notification.failure.run_id,
                        error = %e,
                        "notification delivery failed"
                    );
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
