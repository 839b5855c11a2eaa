//! Configuration root resolution and the global config file.
//!
//! Exactly two environment variables are consulted:
//! - `CAO_CONFIG_DIR` relocates the configuration root;
//! - `CAO_MAX_PARALLEL` overrides the fan-out concurrency cap.
//!
//! Everything else comes from `<config-root>/config.toml` or from function
//! arguments.

pub mod global;
pub mod paths;

pub use global::{AssistantOverride, GlobalConfig};
pub use paths::{
    config_root, help_cache_path, sessions_index_cache_path, task_dir, tasks_root,
};

/// Env var that relocates the configuration root.
pub const ENV_CONFIG_DIR: &str = "CAO_CONFIG_DIR";
/// Env var that overrides the default concurrency cap.
pub const ENV_MAX_PARALLEL: &str = "CAO_MAX_PARALLEL";

/// Default fan-out concurrency cap.
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Resolve the effective concurrency cap.
///
/// Lookup order: `CAO_MAX_PARALLEL` env var -> global config -> built-in
/// default. Zero and unparsable values are ignored.
pub fn max_parallel(config: &GlobalConfig) -> usize {
    if let Ok(raw) = std::env::var(ENV_MAX_PARALLEL) {
        match raw.parse::<usize>() {
            Ok(n) if n > 0 => return n,
            _ => {
                tracing::warn!(value = %raw, "ignoring invalid {}", ENV_MAX_PARALLEL);
            }
        }
    }
    config.defaults.max_parallel
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_max_parallel_env_override_wins() {
        // SAFETY: test runs serially; no other thread reads the env here.
        unsafe { std::env::set_var(ENV_MAX_PARALLEL, "7") };
        let got = max_parallel(&GlobalConfig::default());
        unsafe { std::env::remove_var(ENV_MAX_PARALLEL) };
        assert_eq!(got, 7);
    }

    #[test]
    #[serial]
    fn test_max_parallel_ignores_zero_and_garbage() {
        for bad in ["0", "-2", "lots"] {
            unsafe { std::env::set_var(ENV_MAX_PARALLEL, bad) };
            let got = max_parallel(&GlobalConfig::default());
            assert_eq!(got, DEFAULT_MAX_PARALLEL, "value {bad:?} should fall back");
        }
        unsafe { std::env::remove_var(ENV_MAX_PARALLEL) };
    }

    #[test]
    #[serial]
    fn test_max_parallel_uses_config_when_no_env() {
        unsafe { std::env::remove_var(ENV_MAX_PARALLEL) };
        let mut config = GlobalConfig::default();
        config.defaults.max_parallel = 5;
        assert_eq!(max_parallel(&config), 5);
    }
}
