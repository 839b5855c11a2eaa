//! Probe an assistant's `--help` output and derive its invocation pattern.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use cao_core::{Descriptor, PromptConvention};
use cao_process::{ExecRequest, StreamMode, TermSink, execute};

use crate::pattern::{HelpCategory, HelpOption, InvocationPattern};

/// Bound on both the version probe and the help probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Subcommands that take a positional prompt, in detection priority order.
const PROMPT_SUBCOMMANDS: &[&str] = &["exec", "run", "chat", "ask"];

fn subcommand_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^\s*(?:subcommands|commands):\s*$").unwrap())
}

fn option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s+(-[a-zA-Z])?(?:,\s*)?(--[a-zA-Z][\w-]*)?\s*(<[^>]+>|\[[^\]]+\]|=\S+)?")
            .unwrap()
    })
}

fn repl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(repl|interactive (?:mode|session))\b").unwrap())
}

fn positional_usage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^\s*usage:.*(\[prompt\]|<prompt>)").unwrap())
}

/// Run the version and help probes for one assistant and build its pattern.
///
/// A failed or timed-out probe yields a pattern with the `Unknown`
/// convention and the probe's textual output retained verbatim.
pub async fn analyze(descriptor: &Descriptor, executable: &str) -> InvocationPattern {
    let assistant = descriptor.name.as_str();
    let version = probe_version(descriptor, executable).await;

    let mut argv = vec![executable.to_string()];
    argv.extend(descriptor.probe_args.iter().map(|s| s.to_string()));

    let mut req = ExecRequest::new(assistant, argv, std::env::temp_dir());
    req.timeout = PROBE_TIMEOUT;
    req.stream_mode = StreamMode::BufferOnly;

    let outcome = match execute(req, &TermSink::stderr()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(assistant, error = %e, "help probe failed to spawn");
            return InvocationPattern::unknown(assistant, &version, format!("spawn failed: {e:#}"));
        }
    };

    if outcome.timed_out || outcome.exit_code != 0 {
        let note = format!(
            "probe exited {} (timed_out={})\n{}{}",
            outcome.exit_code, outcome.timed_out, outcome.stdout, outcome.stderr
        );
        warn!(assistant, exit_code = outcome.exit_code, "help probe failed");
        return InvocationPattern::unknown(assistant, &version, note);
    }

    let parsed = parse_help(&outcome.stdout);
    debug!(
        assistant,
        category = ?parsed.category,
        subcommands = parsed.subcommands.len(),
        options = parsed.options.len(),
        "help probe analyzed"
    );

    InvocationPattern {
        assistant: assistant.to_string(),
        category: parsed.category,
        subcommands: parsed.subcommands,
        options: parsed.options,
        convention: parsed.convention,
        version,
        analyzed_at: Utc::now(),
        probe_note: None,
    }
}

/// Probe the assistant's version string (first non-empty output line).
pub async fn probe_version(descriptor: &Descriptor, executable: &str) -> String {
    let mut argv = vec![executable.to_string()];
    argv.extend(descriptor.version_args.iter().map(|s| s.to_string()));

    let mut req = ExecRequest::new(descriptor.name.as_str(), argv, std::env::temp_dir());
    req.timeout = PROBE_TIMEOUT;
    req.stream_mode = StreamMode::BufferOnly;

    match execute(req, &TermSink::stderr()).await {
        Ok(outcome) if outcome.exit_code == 0 => outcome
            .stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "unknown".to_string(),
    }
}

/// Deterministic parse of a help text.
#[derive(Debug, Clone)]
pub struct ParsedHelp {
    pub category: HelpCategory,
    pub subcommands: Vec<String>,
    pub options: Vec<HelpOption>,
    pub convention: PromptConvention,
}

pub fn parse_help(text: &str) -> ParsedHelp {
    let subcommands = extract_subcommands(text);
    let options = extract_options(text);
    let has_prompt_flag = options
        .iter()
        .any(|o| o.name == "-p" || o.name == "--prompt");

    let category = if subcommand_header_re().is_match(text) {
        HelpCategory::Subcommand
    } else if repl_re().is_match(text) && !has_prompt_flag {
        HelpCategory::ReplLike
    } else {
        HelpCategory::Generic
    };

    let convention = if has_prompt_flag {
        let flag = if options.iter().any(|o| o.name == "-p") {
            "-p"
        } else {
            "--prompt"
        };
        PromptConvention::Flagged {
            flag: flag.to_string(),
        }
    } else if category == HelpCategory::Subcommand {
        match PROMPT_SUBCOMMANDS
            .iter()
            .find(|s| subcommands.iter().any(|sub| sub == *s))
        {
            Some(sub) => PromptConvention::SubcommandPositional {
                subcommand: sub.to_string(),
            },
            None => PromptConvention::Unknown,
        }
    } else if positional_usage_re().is_match(text) {
        PromptConvention::Positional
    } else {
        PromptConvention::Unknown
    };

    ParsedHelp {
        category,
        subcommands,
        options,
        convention,
    }
}

/// Collect entries from a `Commands:`/`Subcommands:` section: indented lines
/// whose first token is a plausible command name, up to the next unindented
/// line.
fn extract_subcommands(text: &str) -> Vec<String> {
    let Some(header) = subcommand_header_re().find(text) else {
        return Vec::new();
    };

    let mut subcommands = Vec::new();
    for line in text[header.end()..].lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            break;
        }
        let Some(first) = line.split_whitespace().next() else {
            continue;
        };
        if first.starts_with('-') {
            continue;
        }
        if first
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            subcommands.push(first.to_string());
        }
    }
    subcommands
}

fn extract_options(text: &str) -> Vec<HelpOption> {
    let mut options = Vec::new();
    for caps in option_re().captures_iter(text) {
        let short = caps.get(1).map(|m| m.as_str().to_string());
        let long = caps.get(2).map(|m| m.as_str().to_string());
        let takes_value = caps.get(3).is_some();
        for name in [short, long].into_iter().flatten() {
            if !options.iter().any(|o: &HelpOption| o.name == name) {
                options.push(HelpOption { name, takes_value });
            }
        }
    }
    options
}
