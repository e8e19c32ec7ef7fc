use crate::error::{Result, SpecweaveError};
use crate::paths;
use crate::types::ChannelKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_API_URL: &str = "https://api.github.com";

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubConfig {
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    pub poll_interval_ms: u64,
    pub auto_notify: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            auto_notify: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfig {
    pub channels: Vec<ChannelKind>,
    pub webhook_url: Option<String>,
    pub log_file: String,
    /// Also emit the raw notification JSON on console and file channels.
    pub debug: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channels: vec![ChannelKind::Console, ChannelKind::File],
            webhook_url: None,
            log_file: paths::CICD_NOTIFICATION_LOG.to_string(),
            debug: false,
        }
    }
}

/// Fully layered CI/CD monitor configuration.
///
/// Precedence, highest first: environment variables, the `cicd` section of
/// `.specweave/config.json`, built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CicdConfig {
    pub github: GithubConfig,
    pub monitoring: MonitoringConfig,
    pub notifications: NotificationsConfig,
}

// ---------------------------------------------------------------------------
// File layer (.specweave/config.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cicd: CicdSection,
}

#[derive(Debug, Default, Deserialize)]
struct CicdSection {
    #[serde(default)]
    github: GithubSection,
    #[serde(default)]
    monitoring: MonitoringSection,
    #[serde(default)]
    notifications: NotificationsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GithubSection {
    token: Option<String>,
    owner: Option<String>,
    repo: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitoringSection {
    poll_interval: Option<u64>,
    auto_notify: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationsSection {
    channels: Option<Vec<String>>,
    webhook_url: Option<String>,
    log_file: Option<String>,
    debug: Option<bool>,
}

fn read_config_file(root: &Path) -> Result<ConfigFile> {
    let path = paths::config_path(root);
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let data = std::fs::read_to_string(&path)?;
    serde_json::from_str(&data).map_err(|source| SpecweaveError::ConfigParse { path, source })
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl CicdConfig {
    /// Load and validate using the process environment.
    pub fn load(root: &Path) -> Result<Self> {
        let cfg = Self::resolve(root, |var| std::env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Layer env, file and defaults without validating. `env` looks up a
    /// variable by name.
    pub fn resolve(root: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = read_config_file(root)?.cicd;
        let env = |var: &str| env(var).filter(|v| !v.trim().is_empty());

        let github = GithubConfig {
            token: env("GITHUB_TOKEN").or(file.github.token).unwrap_or_default(),
            owner: env("GITHUB_OWNER").or(file.github.owner).unwrap_or_default(),
            repo: env("GITHUB_REPO").or(file.github.repo).unwrap_or_default(),
            api_url: env("GITHUB_API_URL")
                .or(file.github.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        };

        let defaults = MonitoringConfig::default();
        let poll_interval_ms = match env("CICD_POLL_INTERVAL") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| SpecweaveError::InvalidEnv {
                var: "CICD_POLL_INTERVAL".to_string(),
                value: raw.clone(),
            })?,
            None => file.monitoring.poll_interval.unwrap_or(defaults.poll_interval_ms),
        };
        let auto_notify = match env("CICD_AUTO_NOTIFY") {
            Some(raw) => raw == "true",
            None => file.monitoring.auto_notify.unwrap_or(defaults.auto_notify),
        };

        let defaults = NotificationsConfig::default();
        let channels = match env("CICD_NOTIFICATION_CHANNELS") {
            Some(raw) => parse_channels(raw.split(','))?,
            None => match file.notifications.channels {
                Some(list) => parse_channels(list.iter().map(String::as_str))?,
                None => defaults.channels,
            },
        };

        Ok(Self {
            github,
            monitoring: MonitoringConfig {
                poll_interval_ms,
                auto_notify,
            },
            notifications: NotificationsConfig {
                channels,
                webhook_url: env("CICD_WEBHOOK_URL").or(file.notifications.webhook_url),
                log_file: file.notifications.log_file.unwrap_or(defaults.log_file),
                debug: file.notifications.debug.unwrap_or(defaults.debug),
            },
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Result<()> {
        if self.github.token.trim().is_empty() {
            return Err(SpecweaveError::MissingToken);
        }
        if self.github.owner.trim().is_empty() || self.github.repo.trim().is_empty() {
            return Err(SpecweaveError::MissingRepository);
        }
        if self.monitoring.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(SpecweaveError::PollIntervalTooLow(
                self.monitoring.poll_interval_ms,
            ));
        }
        self.validate_notifications()
    }

    pub fn validate_notifications(&self) -> Result<()> {
        if self.notifications.channels.is_empty() {
            return Err(SpecweaveError::NoChannels);
        }
        Ok(())
    }

    /// Copy with the token replaced, safe to print.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if !cfg.github.token.is_empty() {
            cfg.github.token = "***".to_string();
        }
        cfg
    }
}

fn parse_channels<'a>(items: impl Iterator<Item = &'a str>) -> Result<Vec<ChannelKind>> {
    let mut channels = Vec::new();
    for item in items.map(str::trim).filter(|s| !s.is_empty()) {
        let kind: ChannelKind = item.parse()?;
        if !channels.contains(&kind) {
            channels.push(kind);
        }
    }
    Ok(channels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    fn write_config(dir: &TempDir, json: &str) {
        std::fs::create_dir_all(dir.path().join(".specweave")).unwrap();
        std::fs::write(dir.path().join(".specweave/config.json"), json).unwrap();
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let dir = TempDir::new().unwrap();
        let cfg = CicdConfig::resolve(dir.path(), env_of(&[])).unwrap();
        assert_eq!(cfg.monitoring.poll_interval_ms, 60_000);
        assert!(cfg.monitoring.auto_notify);
        assert_eq!(cfg.notifications.channels, vec![ChannelKind::Console, ChannelKind::File]);
        assert_eq!(cfg.notifications.log_file, ".specweave/logs/cicd-notifications.log");
        assert_eq!(cfg.github.api_url, DEFAULT_API_URL);
        assert!(matches!(cfg.validate(), Err(SpecweaveError::MissingToken)));
    }

    #[test]
    fn file_layer_is_read() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"{
                "project": "ignored",
                "cicd": {
                    "github": {"token": "file-token", "owner": "acme", "repo": "widgets"},
                    "monitoring": {"pollInterval": 30000, "autoNotify": false},
                    "notifications": {"channels": ["webhook"], "webhookUrl": "https://hooks/x"}
                }
            }"#,
        );
        let cfg = CicdConfig::resolve(dir.path(), env_of(&[])).unwrap();
        assert_eq!(cfg.github.token, "file-token");
        assert_eq!(cfg.monitoring.poll_interval_ms, 30_000);
        assert!(!cfg.monitoring.auto_notify);
        assert_eq!(cfg.notifications.channels, vec![ChannelKind::Webhook]);
        assert_eq!(cfg.notifications.webhook_url.as_deref(), Some("https://hooks/x"));
        cfg.validate().unwrap();
    }

    #[test]
    fn env_overrides_file() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"{"cicd": {"github": {"token": "file-token", "owner": "acme", "repo": "widgets"},
                         "monitoring": {"autoNotify": true}}}"#,
        );
        let cfg = CicdConfig::resolve(
            dir.path(),
            env_of(&[
                ("GITHUB_TOKEN", "env-token"),
                ("GITHUB_REPO", "gadgets"),
                ("CICD_POLL_INTERVAL", "15000"),
                ("CICD_NOTIFICATION_CHANNELS", "console, webhook,,"),
                ("CICD_AUTO_NOTIFY", "yes"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.github.token, "env-token");
        assert_eq!(cfg.github.owner, "acme");
        assert_eq!(cfg.github.repo, "gadgets");
        assert_eq!(cfg.monitoring.poll_interval_ms, 15_000);
        assert!(!cfg.monitoring.auto_notify);
        assert_eq!(
            cfg.notifications.channels,
            vec![ChannelKind::Console, ChannelKind::Webhook]
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let dir = TempDir::new().unwrap();
        let base = [("GITHUB_TOKEN", "t"), ("GITHUB_OWNER", "o"), ("GITHUB_REPO", "r")];

        let cfg = CicdConfig::resolve(dir.path(), env_of(&[("GITHUB_TOKEN", "t")])).unwrap();
        assert!(matches!(cfg.validate(), Err(SpecweaveError::MissingRepository)));

        let mut pairs = base.to_vec();
        pairs.push(("CICD_POLL_INTERVAL", "5000"));
        let cfg = CicdConfig::resolve(dir.path(), env_of(&pairs)).unwrap();
        assert!(matches!(cfg.validate(), Err(SpecweaveError::PollIntervalTooLow(5000))));

        let mut pairs = base.to_vec();
        pairs.push(("CICD_NOTIFICATION_CHANNELS", " , "));
        let cfg = CicdConfig::resolve(dir.path(), env_of(&pairs)).unwrap();
        assert!(matches!(cfg.validate(), Err(SpecweaveError::NoChannels)));

        let cfg = CicdConfig::resolve(dir.path(), env_of(&base)).unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_env_values_are_errors() {
        let dir = TempDir::new().unwrap();
        let err = CicdConfig::resolve(dir.path(), env_of(&[("CICD_POLL_INTERVAL", "soon")])).unwrap_err();
        assert!(matches!(err, SpecweaveError::InvalidEnv { .. }));
        let err = CicdConfig::resolve(dir.path(), env_of(&[("CICD_NOTIFICATION_CHANNELS", "pager")])).unwrap_err();
        assert!(matches!(err, SpecweaveError::UnknownChannel(_)));
        assert!(err.is_config());
    }

    #[test]
    fn malformed_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "{ nope");
        let err = CicdConfig::resolve(dir.path(), env_of(&[])).unwrap_err();
        assert!(matches!(err, SpecweaveError::ConfigParse { .. }));
    }

    #[test]
    fn redacted_hides_token() {
        let dir = TempDir::new().unwrap();
        let cfg = CicdConfig::resolve(dir.path(), env_of(&[("GITHUB_TOKEN", "ghp_secret")])).unwrap();
        let shown = serde_json::to_string(&cfg.redacted()).unwrap();
        assert!(!shown.contains("ghp_secret"));
    }
}
