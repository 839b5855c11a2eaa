use std::path::{Path, PathBuf};

/// Canonical XDG app name.
pub const APP_NAME: &str = "cli-agent-orchestrator";

/// Resolve the configuration root.
///
/// Order: `CAO_CONFIG_DIR` env override -> XDG config dir -> `~/.cao`
/// fallback when no project directories can be determined (e.g. containers
/// without HOME).
pub fn config_root() -> PathBuf {
    if let Ok(root) = std::env::var(crate::ENV_CONFIG_DIR) {
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", APP_NAME) {
        return dirs.config_dir().to_path_buf();
    }
    std::env::temp_dir().join(format!("{APP_NAME}-config"))
}

/// `<config-root>/tasks`
pub fn tasks_root() -> PathBuf {
    config_root().join("tasks")
}

/// `<config-root>/tasks/<task_id>`
pub fn task_dir(task_id: &str) -> PathBuf {
    tasks_root().join(task_id)
}

/// `<config-root>/help-cache.json` — the help analyzer's cache file.
pub fn help_cache_path() -> PathBuf {
    config_root().join("help-cache.json")
}

/// `<config-root>/sessions-index.cache` — the session index's last scan.
pub fn sessions_index_cache_path() -> PathBuf {
    config_root().join("sessions-index.cache")
}

/// Subdirectory names inside a task directory.
pub const TASK_EVENTS_FILE: &str = "events.log";
pub const TASK_LOCKS_FILE: &str = "locks.json";
pub const TASK_OUTPUT_DIR: &str = "output";
pub const TASK_WORKTREES_DIR: &str = "worktrees";
pub const TASK_LOGS_DIR: &str = "logs";

/// `<task-dir>/events.log`
pub fn events_log_path(task_dir: &Path) -> PathBuf {
    task_dir.join(TASK_EVENTS_FILE)
}

/// `<task-dir>/locks.json`
pub fn locks_snapshot_path(task_dir: &Path) -> PathBuf {
    task_dir.join(TASK_LOCKS_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_override_relocates_root() {
        let tmp = tempfile::tempdir().unwrap();
        // SAFETY: serial test; no concurrent env access.
        unsafe { std::env::set_var(crate::ENV_CONFIG_DIR, tmp.path()) };
        assert_eq!(config_root(), tmp.path());
        assert_eq!(tasks_root(), tmp.path().join("tasks"));
        assert_eq!(
            task_dir("01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            tmp.path().join("tasks").join("01ARZ3NDEKTSV4RRFFQ69G5FAV")
        );
        assert_eq!(help_cache_path(), tmp.path().join("help-cache.json"));
        unsafe { std::env::remove_var(crate::ENV_CONFIG_DIR) };
    }

    #[test]
    #[serial]
    fn test_empty_env_override_is_ignored() {
        unsafe { std::env::set_var(crate::ENV_CONFIG_DIR, "") };
        let root = config_root();
        assert!(!root.as_os_str().is_empty());
        unsafe { std::env::remove_var(crate::ENV_CONFIG_DIR) };
    }

    #[test]
    fn test_task_file_helpers() {
        let dir = PathBuf::from("/x/tasks/t1");
        assert_eq!(events_log_path(&dir), PathBuf::from("/x/tasks/t1/events.log"));
        assert_eq!(
            locks_snapshot_path(&dir),
            PathBuf::from("/x/tasks/t1/locks.json")
        );
    }
}
