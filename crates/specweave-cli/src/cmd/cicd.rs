use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::{Subcommand, ValueEnum};
use specweave_cicd::{DeliveryReport, MonitorService, MonitorStatus};
use specweave_core::config::CicdConfig;
use specweave_core::state::StateManager;
use specweave_core::types::{FailureRecord, NotificationKind};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum CicdSubcommand {
    /// Poll workflow runs until Ctrl-C
    Start {
        /// Poll once, print the result and exit
        #[arg(long)]
        once: bool,
    },

    /// Show failure counters and last poll time
    Status,

    /// List unprocessed failures
    Failures {
        /// Include processed failures
        #[arg(long)]
        all: bool,
    },

    /// Mark a failure as processed
    MarkProcessed { run_id: u64 },

    /// Mark a failure as analyzed
    MarkAnalyzed { run_id: u64 },

    /// Mark a failure as fixed
    MarkFixed { run_id: u64 },

    /// Send a notification for a recorded failure
    Notify {
        run_id: u64,
        #[arg(long, value_enum, default_value = "failure-detected")]
        kind: KindArg,
    },

    /// Show the resolved configuration and validate it
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    FailureDetected,
    AnalysisComplete,
    FixApplied,
}

impl From<KindArg> for NotificationKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::FailureDetected => NotificationKind::FailureDetected,
            KindArg::AnalysisComplete => NotificationKind::AnalysisComplete,
            KindArg::FixApplied => NotificationKind::FixApplied,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: CicdSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        CicdSubcommand::Start { once } => start(root, once, json),
        CicdSubcommand::Status => status(root, json),
        CicdSubcommand::Failures { all } => failures(root, all, json),
        CicdSubcommand::MarkProcessed { run_id } => {
            mark(root, run_id, "processed", json, |s, id| s.mark_processed(id))
        }
        CicdSubcommand::MarkAnalyzed { run_id } => {
            mark(root, run_id, "analyzed", json, |s, id| s.mark_analyzed(id))
        }
        CicdSubcommand::MarkFixed { run_id } => {
            mark(root, run_id, "fixed", json, |s, id| s.mark_fixed(id))
        }
        CicdSubcommand::Notify { run_id, kind } => notify(root, run_id, kind.into(), json),
        CicdSubcommand::Config => config(root, json),
    }
}

fn resolve_config(root: &Path) -> anyhow::Result<CicdConfig> {
    CicdConfig::resolve(root, |var| std::env::var(var).ok())
        .context("failed to resolve CI/CD monitor configuration")
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

fn start(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let config = CicdConfig::load(root).context("invalid CI/CD monitor configuration")?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_monitor(root, config, once, json))
}

async fn run_monitor(root: &Path, config: CicdConfig, once: bool, json: bool) -> anyhow::Result<()> {
    let svc = MonitorService::new(root, config)?;
    let config = svc.config();
    let auto_notify = config.monitoring.auto_notify;
    let interval_secs = config.monitoring.poll_interval_ms / 1000;
    let target = format!("{}/{}", config.github.owner, config.github.repo);

    if once {
        let result = svc.poll_once().await;
        if result.is_ok() && auto_notify {
            svc.notify_unprocessed().await?;
        }
        if json {
            print_json(&result)?;
        } else {
            println!(
                "{target}: {} runs, {} new failures, {} duplicates (HTTP {})",
                result.total_runs, result.new_failures, result.duplicates, result.status
            );
        }
        if let Some(err) = result.error {
            anyhow::bail!("poll failed: {err}");
        }
        return Ok(());
    }

    svc.start()?;
    if !json {
        println!("Monitoring {target} every {interval_secs}s. Press Ctrl-C to stop.");
    }
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    svc.stop()?;
    if json {
        print_json(&svc.status())?;
    } else {
        println!("Stopped.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// status / failures
// ---------------------------------------------------------------------------

fn status(root: &Path, json: bool) -> anyhow::Result<()> {
    let svc = MonitorService::new(root, resolve_config(root)?)?;
    let status = svc.status();
    if json {
        return print_json(&status);
    }
    print_status(&status);
    Ok(())
}

fn print_status(status: &MonitorStatus) {
    println!("Running:         {}", if status.running { "yes" } else { "no" });
    if let Some(uptime) = status.uptime_secs {
        println!("Uptime:          {uptime}s");
    }
    println!("Total failures:  {}", status.total_failures);
    println!("Unprocessed:     {}", status.unprocessed_failures);
    println!("Processed:       {}", status.total_processed);
    println!("Fixed:           {}", status.total_fixed);
    match status.last_poll {
        Some(t) => println!("Last poll:       {}", t.to_rfc3339()),
        None => println!("Last poll:       never"),
    }
}

fn failures(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    let state = StateManager::new(root);
    let records: Vec<FailureRecord> = if all {
        state.load_state().failures.into_values().collect()
    } else {
        state.get_unprocessed_failures()
    };

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No {}failures.", if all { "" } else { "unprocessed " });
        return Ok(());
    }

    let rows = records
        .iter()
        .map(|f| {
            vec![
                f.run_id.to_string(),
                f.workflow_name.clone(),
                f.branch.clone(),
                f.short_sha().to_string(),
                f.detected_at.format("%Y-%m-%d %H:%M").to_string(),
                flags(f),
            ]
        })
        .collect();
    print_table(
        &["RUN", "WORKFLOW", "BRANCH", "COMMIT", "DETECTED", "FLAGS"],
        rows,
    );
    Ok(())
}

fn flags(f: &FailureRecord) -> String {
    let set: Vec<&str> = [
        (f.processed, "processed"),
        (f.analyzed, "analyzed"),
        (f.fixed, "fixed"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();
    if set.is_empty() {
        "-".to_string()
    } else {
        set.join(",")
    }
}

// ---------------------------------------------------------------------------
// mark-*
// ---------------------------------------------------------------------------

fn mark(
    root: &Path,
    run_id: u64,
    flag: &str,
    json: bool,
    apply: impl FnOnce(&StateManager, u64) -> specweave_core::Result<bool>,
) -> anyhow::Result<()> {
    let state = StateManager::new(root);
    let found = apply(&state, run_id).with_context(|| format!("failed to mark run {run_id} {flag}"))?;
    if json {
        return print_json(&serde_json::json!({ "runId": run_id, "flag": flag, "found": found }));
    }
    if found {
        println!("Run {run_id} marked {flag}.");
    } else {
        println!("No failure recorded for run {run_id}; nothing changed.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// notify
// ---------------------------------------------------------------------------

fn notify(root: &Path, run_id: u64, kind: NotificationKind, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(root)?;
    config
        .validate_notifications()
        .context("invalid notification configuration")?;
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(send_notification(root, config, run_id, kind))?;

    if json {
        return print_json(&report);
    }
    println!("Sent {kind} for run {run_id} via {}.", report.delivered.join(", "));
    for (channel, err) in &report.failed {
        println!("  {channel}: {err}");
    }
    Ok(())
}

async fn send_notification(
    root: &Path,
    config: CicdConfig,
    run_id: u64,
    kind: NotificationKind,
) -> specweave_cicd::Result<DeliveryReport> {
    let svc = MonitorService::new(root, config)?;
    svc.notify(run_id, kind).await
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn config(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(root)?;
    let validation = config.validate();

    if json {
        print_json(&serde_json::json!({
            "config": config.redacted(),
            "valid": validation.is_ok(),
            "error": validation.as_ref().err().map(|e| e.to_string()),
        }))?;
    } else {
        let shown = config.redacted();
        println!("Repository:     {}/{}", shown.github.owner, shown.github.repo);
        println!("API:            {}", shown.github.api_url);
        println!("Token:          {}", if shown.github.token.is_empty() { "(missing)" } else { "***" });
        println!("Poll interval:  {}ms", shown.monitoring.poll_interval_ms);
        println!("Auto-notify:    {}", shown.monitoring.auto_notify);
        let channels: Vec<&str> = shown.notifications.channels.iter().map(|c| c.as_str()).collect();
        println!("Channels:       {}", channels.join(", "));
        println!("Log file:       {}", shown.notifications.log_file);
        if let Some(url) = &shown.notifications.webhook_url {
            println!("Webhook:        {url}");
        }
    }

    validation.context("CI/CD monitor configuration is invalid")
}
