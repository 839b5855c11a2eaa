use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cao_core::{AssistantName, ExecutionMode, OutputFormat};
use cao_sessions::RenderFormat;
use cao_worktree::MergeStrategy;

#[derive(Parser)]
#[command(name = "cao", version)]
#[command(about = "CLI Agent Orchestrator: one front door for heterogeneous AI coding assistants")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route a prompt and execute it on one or more assistants
    Run {
        /// The natural-language instruction (may embed a delegation phrase)
        prompt: String,

        /// Execution mode for fan-outs
        #[arg(long, value_enum, default_value = "parallel")]
        mode: ExecutionMode,

        /// Explicit candidate assistants (comma-separated); skips routing
        #[arg(long, value_delimiter = ',')]
        candidates: Option<Vec<AssistantName>>,

        /// Declared file set per assistant: `<assistant>=<path>[,<path>…]`.
        /// Repeatable. Assistants without a declaration are read-only.
        #[arg(long = "files")]
        files: Vec<String>,

        /// Concurrency cap for the fan-out (default from config/env)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Per-task timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Per-subtask timeout in seconds
        #[arg(long)]
        subtask_timeout: Option<u64>,

        /// Run declared-file subtasks in isolated git worktrees and merge
        /// back with this strategy
        #[arg(long, value_enum)]
        merge: Option<MergeStrategy>,

        /// Working directory for assistant children (defaults to CWD)
        #[arg(long)]
        cd: Option<PathBuf>,

        /// Suppress real-time prefixed streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Show how a prompt would be routed, without executing anything
    Route {
        input: String,
    },

    /// Probe assistants and show their cached invocation patterns
    Probe {
        /// Limit to one assistant (default: all)
        assistant: Option<AssistantName>,

        /// Drop cache entries first, forcing a fresh probe
        #[arg(long)]
        refresh: bool,
    },

    /// Inspect and clean up recorded tasks
    Task {
        #[command(subcommand)]
        cmd: TaskCommands,
    },

    /// Browse assistants' own session histories
    Sessions {
        #[command(subcommand)]
        cmd: SessionCommands,
    },

    /// Check assistant installations and cache health
    Doctor,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List recorded tasks, most recent first
    List,

    /// Print a task's plan, findings, and progress documents
    Show {
        task_id: String,
    },

    /// Query a task's event log
    Events {
        task_id: String,

        /// Filter by event kind (e.g. lock-denied)
        #[arg(long)]
        kind: Option<String>,

        /// Filter by subtask id
        #[arg(long)]
        subtask: Option<String>,
    },

    /// Remove a task directory and its derived artefacts
    Cleanup {
        /// Task to remove; omit with --all to sweep old tasks
        task_id: Option<String>,

        /// Remove all tasks older than --max-age-days
        #[arg(long, conflicts_with = "task_id")]
        all: bool,

        /// Age threshold for --all (default: 30)
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Print what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List discovered sessions across assistants
    List {
        /// Limit to one assistant
        #[arg(long)]
        assistant: Option<AssistantName>,

        /// Keep only sessions of the current project
        #[arg(long)]
        project: bool,

        /// Only sessions touched today
        #[arg(long, conflicts_with = "last_days")]
        today: bool,

        /// Only sessions touched in the last N days
        #[arg(long)]
        last_days: Option<u32>,

        /// Substring match on the content digest
        #[arg(long)]
        contains: Option<String>,

        /// Rendering format
        #[arg(long, value_enum, default_value = "summary")]
        render: RenderFormat,

        /// Ignore the scan cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Most recent session per assistant, formatted for pasting into a
    /// new conversation
    Context,
}
