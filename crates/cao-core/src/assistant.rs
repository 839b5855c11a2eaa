use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Supported assistant CLIs.
///
/// The set is closed at build time; per-assistant constants live in the
/// descriptor table below so that adding an assistant is a table change,
/// not a code change elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantName {
    Claude,
    Gemini,
    Qwen,
    Iflow,
    Codex,
    Codebuddy,
    Copilot,
    Qodercli,
}

/// All supported assistants, in built-in preference order.
pub const ALL_ASSISTANTS: &[AssistantName] = &[
    AssistantName::Claude,
    AssistantName::Gemini,
    AssistantName::Qwen,
    AssistantName::Iflow,
    AssistantName::Codex,
    AssistantName::Codebuddy,
    AssistantName::Copilot,
    AssistantName::Qodercli,
];

impl AssistantName {
    /// Returns the stable short name used on the CLI, in routing patterns,
    /// and in on-disk records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Qwen => "qwen",
            Self::Iflow => "iflow",
            Self::Codex => "codex",
            Self::Codebuddy => "codebuddy",
            Self::Copilot => "copilot",
            Self::Qodercli => "qodercli",
        }
    }

    /// Parse a short name, case-insensitively. Returns `None` for names
    /// outside the known set (the router relies on this to reject captures).
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        ALL_ASSISTANTS
            .iter()
            .copied()
            .find(|a| a.as_str() == lower)
    }
}

impl std::fmt::Display for AssistantName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssistantName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!(
                "Unknown assistant '{}'. Valid values: {}",
                s,
                ALL_ASSISTANTS
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

/// How a prompt is delivered to an assistant in non-interactive mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PromptConvention {
    /// `<exe> <flag> <prompt>` (e.g. `claude -p "..."`).
    Flagged { flag: String },
    /// `<exe> <subcommand> <prompt>` (e.g. `codex exec "..."`).
    SubcommandPositional { subcommand: String },
    /// `<exe> <prompt>`.
    Positional,
    /// The help probe could not determine the convention.
    Unknown,
}

impl PromptConvention {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Static per-assistant facts: how to find it, probe it, and where it
/// keeps its session history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub name: AssistantName,
    pub display_name: &'static str,
    /// Executable looked up on PATH (overridable via config).
    pub executable: &'static str,
    /// Argv appended to the executable to verify the install.
    pub verify_args: &'static [&'static str],
    /// Argv appended to the executable for the help probe.
    pub probe_args: &'static [&'static str],
    /// Argv appended to the executable to read the version string.
    pub version_args: &'static [&'static str],
    /// Session history directories, relative to the user home.
    pub session_dirs: &'static [&'static str],
    /// Whether session files record the project path they belong to.
    pub records_project_path: bool,
}

impl Descriptor {
    /// Hard-coded fallback used when the help probe yields `Unknown`.
    pub fn default_convention(&self) -> PromptConvention {
        match self.name {
            AssistantName::Codex => PromptConvention::SubcommandPositional {
                subcommand: "exec".to_string(),
            },
            AssistantName::Qodercli => PromptConvention::Positional,
            _ => PromptConvention::Flagged {
                flag: "-p".to_string(),
            },
        }
    }
}

/// Look up the descriptor for an assistant.
pub fn descriptor(name: AssistantName) -> &'static Descriptor {
    &DESCRIPTORS[ALL_ASSISTANTS
        .iter()
        .position(|a| *a == name)
        .unwrap_or_default()]
}

static DESCRIPTORS: &[Descriptor] = &[
    Descriptor {
        name: AssistantName::Claude,
        display_name: "Claude Code",
        executable: "claude",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".claude/projects"],
        records_project_path: true,
    },
    Descriptor {
        name: AssistantName::Gemini,
        display_name: "Gemini CLI",
        executable: "gemini",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".gemini/tmp"],
        records_project_path: false,
    },
    Descriptor {
        name: AssistantName::Qwen,
        display_name: "Qwen Code",
        executable: "qwen",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".qwen/tmp"],
        records_project_path: false,
    },
    Descriptor {
        name: AssistantName::Iflow,
        display_name: "iFlow CLI",
        executable: "iflow",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".iflow/tmp"],
        records_project_path: false,
    },
    Descriptor {
        name: AssistantName::Codex,
        display_name: "OpenAI Codex CLI",
        executable: "codex",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".codex/sessions"],
        records_project_path: true,
    },
    Descriptor {
        name: AssistantName::Codebuddy,
        display_name: "CodeBuddy",
        executable: "codebuddy",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".codebuddy/sessions"],
        records_project_path: false,
    },
    Descriptor {
        name: AssistantName::Copilot,
        display_name: "GitHub Copilot CLI",
        executable: "copilot",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".copilot/history-session-state"],
        records_project_path: false,
    },
    Descriptor {
        name: AssistantName::Qodercli,
        display_name: "Qoder CLI",
        executable: "qodercli",
        verify_args: &["--version"],
        probe_args: &["--help"],
        version_args: &["--version"],
        session_dirs: &[".qodercli/sessions"],
        records_project_path: false,
    },
];
