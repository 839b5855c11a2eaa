use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cao_core::PromptConvention;

/// Cache lifetime before a pattern must be re-probed.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Broad shape of an assistant's CLI surface, detected by keyword scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelpCategory {
    /// Flat option list, no subcommands.
    Generic,
    /// Help advertises an interactive/REPL mode and no obvious prompt flag.
    ReplLike,
    /// Help carries a `Commands:`/`Subcommands:` section.
    Subcommand,
}

/// One recognised option from the help output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpOption {
    pub name: String,
    pub takes_value: bool,
}

/// Cached invocation shape for one assistant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvocationPattern {
    pub assistant: String,
    pub category: HelpCategory,
    pub subcommands: Vec<String>,
    pub options: Vec<HelpOption>,
    pub convention: PromptConvention,
    /// Assistant version the pattern was derived from.
    pub version: String,
    pub analyzed_at: DateTime<Utc>,
    /// Probe diagnostics, retained verbatim when the probe failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_note: Option<String>,
}

impl InvocationPattern {
    /// Pattern recording a failed probe; downstream falls back to the
    /// descriptor default convention.
    pub fn unknown(assistant: &str, version: &str, note: String) -> Self {
        Self {
            assistant: assistant.to_string(),
            category: HelpCategory::Generic,
            subcommands: Vec::new(),
            options: Vec::new(),
            convention: PromptConvention::Unknown,
            version: version.to_string(),
            analyzed_at: Utc::now(),
            probe_note: Some(note),
        }
    }

    /// A cached entry is served only while inside the TTL and pinned to the
    /// currently installed version.
    pub fn is_fresh(&self, ttl: chrono::Duration, current_version: &str) -> bool {
        if self.version != current_version {
            return false;
        }
        Utc::now().signed_duration_since(self.analyzed_at) < ttl
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name == name)
    }
}
