//! Parameter builder: turn (descriptor, pattern, prompt) into an argv
//! vector. The prompt is always a single argv element; no shell is involved.

use cao_core::{Descriptor, PromptConvention};

use crate::pattern::InvocationPattern;

/// An argv vector plus whether the descriptor's hard-coded default had to
/// stand in for an `Unknown` convention (callers emit a warning event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArgv {
    pub argv: Vec<String>,
    pub used_fallback: bool,
}

/// Build the non-interactive invocation for one assistant.
pub fn build_argv(
    descriptor: &Descriptor,
    executable: &str,
    pattern: &InvocationPattern,
    prompt: &str,
) -> BuiltArgv {
    let (convention, used_fallback) = match &pattern.convention {
        PromptConvention::Unknown => (descriptor.default_convention(), true),
        other => (other.clone(), false),
    };

    let mut argv = vec![executable.to_string()];
    match convention {
        PromptConvention::Flagged { flag } => {
            argv.push(flag);
            argv.push(prompt.to_string());
        }
        PromptConvention::SubcommandPositional { subcommand } => {
            argv.push(subcommand);
            argv.push(prompt.to_string());
        }
        PromptConvention::Positional => {
            argv.push(prompt.to_string());
        }
        // Descriptor defaults never yield Unknown.
        PromptConvention::Unknown => {
            argv.push(prompt.to_string());
        }
    }

    BuiltArgv {
        argv,
        used_fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cao_core::{AssistantName, descriptor};
    use chrono::Utc;

    use crate::pattern::{HelpCategory, InvocationPattern};

    fn pattern_with(convention: PromptConvention) -> InvocationPattern {
        InvocationPattern {
            assistant: "claude".to_string(),
            category: HelpCategory::Generic,
            subcommands: vec![],
            options: vec![],
            convention,
            version: "1.0".to_string(),
            analyzed_at: Utc::now(),
            probe_note: None,
        }
    }

    #[test]
    fn test_flagged_prompt_layout() {
        let desc = descriptor(AssistantName::Claude);
        let pattern = pattern_with(PromptConvention::Flagged {
            flag: "-p".to_string(),
        });
        let built = build_argv(desc, "claude", &pattern, "write a python factorial function");
        assert_eq!(
            built.argv,
            vec!["claude", "-p", "write a python factorial function"]
        );
        assert!(!built.used_fallback);
    }

    #[test]
    fn test_subcommand_positional_layout() {
        let desc = descriptor(AssistantName::Codex);
        let pattern = pattern_with(PromptConvention::SubcommandPositional {
            subcommand: "exec".to_string(),
        });
        let built = build_argv(desc, "codex", &pattern, "explain closures");
        assert_eq!(built.argv, vec!["codex", "exec", "explain closures"]);
    }

    #[test]
    fn test_positional_layout() {
        let desc = descriptor(AssistantName::Qodercli);
        let pattern = pattern_with(PromptConvention::Positional);
        let built = build_argv(desc, "qodercli", &pattern, "hi there");
        assert_eq!(built.argv, vec!["qodercli", "hi there"]);
    }

    #[test]
    fn test_unknown_falls_back_to_descriptor_default() {
        let desc = descriptor(AssistantName::Claude);
        let pattern = pattern_with(PromptConvention::Unknown);
        let built = build_argv(desc, "claude", &pattern, "task");
        assert_eq!(built.argv, vec!["claude", "-p", "task"]);
        assert!(built.used_fallback);

        let desc = descriptor(AssistantName::Codex);
        let built = build_argv(desc, "codex", &pattern_with(PromptConvention::Unknown), "task");
        assert_eq!(built.argv, vec!["codex", "exec", "task"]);
        assert!(built.used_fallback);
    }

    #[test]
    fn test_prompt_is_one_argv_element() {
        let desc = descriptor(AssistantName::Claude);
        let pattern = pattern_with(PromptConvention::Flagged {
            flag: "-p".to_string(),
        });
        let prompt = "echo $(rm -rf /); \"quoted\" 'words'";
        let built = build_argv(desc, "claude", &pattern, prompt);
        assert_eq!(built.argv.len(), 3);
        assert_eq!(built.argv[2], prompt);
    }

    #[test]
    fn test_executable_override_is_respected() {
        let desc = descriptor(AssistantName::Claude);
        let pattern = pattern_with(PromptConvention::Flagged {
            flag: "-p".to_string(),
        });
        let built = build_argv(desc, "/opt/bin/claude-next", &pattern, "x");
        assert_eq!(built.argv[0], "/opt/bin/claude-next");
    }
}
