use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const SPECWEAVE_DIR: &str = ".specweave";

pub const CONFIG_FILE: &str = ".specweave/config.json";
pub const CICD_STATE_FILE: &str = ".specweave/state/cicd-monitor.json";
pub const CICD_LOCK_FILE: &str = ".specweave/state/cicd-monitor.lock";
pub const CICD_NOTIFICATION_LOG: &str = ".specweave/logs/cicd-notifications.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn cicd_state_path(root: &Path) -> PathBuf {
    root.join(CICD_STATE_FILE)
}

pub fn cicd_lock_path(root: &Path) -> PathBuf {
    root.join(CICD_LOCK_FILE)
}

/// Resolve a configured path against the project root unless it is absolute.
pub fn resolve(root: &Path, configured: &str) -> PathBuf {
    let p = Path::new(configured);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            cicd_state_path(root),
            PathBuf::from("/tmp/proj/.specweave/state/cicd-monitor.json")
        );
        assert_eq!(
            cicd_lock_path(root),
            PathBuf::from("/tmp/proj/.specweave/state/cicd-monitor.lock")
        );
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.specweave/config.json")
        );
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let root = Path::new("/tmp/proj");
        assert_eq!(resolve(root, "/var/log/x.log"), PathBuf::from("/var/log/x.log"));
        assert_eq!(
            resolve(root, CICD_NOTIFICATION_LOG),
            PathBuf::from("/tmp/proj/.specweave/logs/cicd-notifications.log")
        );
    }
}
