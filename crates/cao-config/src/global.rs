//! Global configuration (`<config-root>/config.toml`).
//!
//! User-level settings that apply across all tasks: the default concurrency
//! cap, the default assistant for unrouted prompts, and per-assistant
//! overrides (executable path, extra environment, disabled flag).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use cao_core::AssistantName;

/// Global configuration loaded from `<config-root>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub defaults: GlobalDefaults,
    #[serde(default)]
    pub assistants: HashMap<String, AssistantOverride>,
}

/// Global defaults section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDefaults {
    /// Maximum concurrent subtasks in a fan-out (default: 3).
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Assistant used when the router finds no target and the caller named
    /// no candidates. None = report a usage error instead.
    #[serde(default)]
    pub default_assistant: Option<AssistantName>,
    /// Per-subtask timeout in seconds (default: 600).
    #[serde(default = "default_subtask_timeout")]
    pub subtask_timeout_secs: u64,
    /// Per-task timeout in seconds (default: 1800).
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    /// Captured-output cap per stream, in bytes (default: 4 MiB).
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_assistant: None,
            subtask_timeout_secs: default_subtask_timeout(),
            task_timeout_secs: default_task_timeout(),
            output_cap_bytes: default_output_cap(),
        }
    }
}

/// Per-assistant configuration overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantOverride {
    /// Replacement executable (absolute path or PATH name).
    #[serde(default)]
    pub executable: Option<String>,
    /// Environment variables injected into this assistant's child processes.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Exclude this assistant from routing and fan-out.
    #[serde(default)]
    pub disabled: bool,
}

fn default_max_parallel() -> usize {
    crate::DEFAULT_MAX_PARALLEL
}

fn default_subtask_timeout() -> u64 {
    600
}

fn default_task_timeout() -> u64 {
    1800
}

fn default_output_cap() -> usize {
    4 * 1024 * 1024
}

impl GlobalConfig {
    /// Load from `<config-root>/config.toml`. Missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&crate::config_root().join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Override lookup for an assistant, if any.
    pub fn assistant(&self, name: AssistantName) -> Option<&AssistantOverride> {
        self.assistants.get(name.as_str())
    }

    /// Effective executable for an assistant (override or descriptor value).
    pub fn executable(&self, name: AssistantName) -> String {
        self.assistant(name)
            .and_then(|o| o.executable.clone())
            .unwrap_or_else(|| cao_core::descriptor(name).executable.to_string())
    }

    pub fn is_enabled(&self, name: AssistantName) -> bool {
        self.assistant(name).is_none_or(|o| !o.disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&tmp.path().join("config.toml")).unwrap();
        assert_eq!(config.defaults.max_parallel, 3);
        assert_eq!(config.defaults.subtask_timeout_secs, 600);
        assert!(config.defaults.default_assistant.is_none());
        assert!(config.assistants.is_empty());
    }

    #[test]
    fn test_load_parses_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[defaults]
max_parallel = 5
default_assistant = "claude"

[assistants.gemini]
executable = "/opt/gemini/bin/gemini"
disabled = true

[assistants.codex.env]
CODEX_HOME = "/srv/codex"
"#,
        )
        .unwrap();

        let config = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(config.defaults.max_parallel, 5);
        assert_eq!(
            config.defaults.default_assistant,
            Some(AssistantName::Claude)
        );
        assert_eq!(
            config.executable(AssistantName::Gemini),
            "/opt/gemini/bin/gemini"
        );
        assert!(!config.is_enabled(AssistantName::Gemini));
        assert!(config.is_enabled(AssistantName::Claude));
        assert_eq!(
            config
                .assistant(AssistantName::Codex)
                .unwrap()
                .env
                .get("CODEX_HOME")
                .map(String::as_str),
            Some("/srv/codex")
        );
    }

    #[test]
    fn test_executable_falls_back_to_descriptor() {
        let config = GlobalConfig::default();
        assert_eq!(config.executable(AssistantName::Claude), "claude");
        assert_eq!(config.executable(AssistantName::Qodercli), "qodercli");
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "defaults = not toml").unwrap();
        assert!(GlobalConfig::load_from(&path).is_err());
    }
}
