//! Help-cache analyzer: learn each assistant's non-interactive invocation
//! shape from its `--help` output, and cache it with a TTL and version pin.
//!
//! Downstream code never hard-codes argv templates; it asks the cache for a
//! pattern and feeds it to [`build_argv`].

mod analyzer;
mod argv;
mod cache;
mod pattern;

pub use analyzer::{ParsedHelp, analyze, parse_help, probe_version};
pub use argv::{BuiltArgv, build_argv};
pub use cache::HelpCache;
pub use pattern::{DEFAULT_TTL_DAYS, HelpCategory, HelpOption, InvocationPattern};

/// Exit codes conventionally meaning "bad usage"; an invocation failing
/// with one of these invalidates the assistant's cache entry.
pub fn is_usage_error(exit_code: i32) -> bool {
    matches!(exit_code, 2 | 64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_classification() {
        assert!(is_usage_error(2));
        assert!(is_usage_error(64));
        assert!(!is_usage_error(0));
        assert!(!is_usage_error(1));
        assert!(!is_usage_error(124));
    }
}
