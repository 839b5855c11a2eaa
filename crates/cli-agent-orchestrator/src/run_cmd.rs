//! `cao run`: route, fan out, stream, report.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use cao_core::{AssistantName, ExecutionMode, OrchestratorError, OutputFormat};
use cao_engine::{Engine, TaskRequest, resolve_candidates};
use cao_probe::HelpCache;
use cao_process::{StreamMode, TermSink};
use cao_worktree::MergeStrategy;

pub struct RunArgs {
    pub task_id: String,
    pub prompt: String,
    pub mode: ExecutionMode,
    pub candidates: Option<Vec<AssistantName>>,
    pub files: Vec<String>,
    pub max_parallel: Option<usize>,
    pub timeout: Option<u64>,
    pub subtask_timeout: Option<u64>,
    pub merge: Option<MergeStrategy>,
    pub cd: Option<PathBuf>,
    pub no_stream: bool,
    pub output_format: OutputFormat,
}

pub async fn handle_run(args: RunArgs) -> Result<i32> {
    let config = cao_config::GlobalConfig::load()?;

    let (candidates, residual) =
        match resolve_candidates(&config, &args.prompt, args.candidates.clone()) {
            Ok(resolved) => resolved,
            Err(e) => {
                eprintln!("cao: {e}");
                return Ok(e.exit_code());
            }
        };
    debug!(?candidates, residual, "routing resolved");

    let declared_files = match parse_file_declarations(&args.files) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("cao: {e}");
            return Ok(e.exit_code());
        }
    };

    let work_dir = match &args.cd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine working directory")?,
    };

    let mut request = TaskRequest::new(residual, candidates, work_dir);
    request.task_id = Some(args.task_id.clone());
    request.mode = args.mode;
    request.declared_files = declared_files;
    request.max_parallel = args
        .max_parallel
        .unwrap_or_else(|| cao_config::max_parallel(&config));
    request.subtask_timeout = Duration::from_secs(
        args.subtask_timeout
            .unwrap_or(config.defaults.subtask_timeout_secs),
    );
    request.task_timeout =
        Duration::from_secs(args.timeout.unwrap_or(config.defaults.task_timeout_secs));
    request.merge_strategy = args.merge;
    request.stream_mode = if args.no_stream {
        StreamMode::BufferOnly
    } else {
        StreamMode::TeePrefixed
    };

    // Ctrl-C flips the abort switch; the engine soft-terminates children.
    let (abort_tx, abort_rx) = tokio::sync::watch::channel(false);
    request.abort = Some(abort_rx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = abort_tx.send(true);
        }
    });

    let help_cache = Arc::new(HelpCache::new(cao_config::help_cache_path()));
    let engine = Engine::new(config, help_cache, TermSink::stderr());

    let report = match engine.run_task(request).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("cao: {e:#}");
            let code = e
                .downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::exit_code)
                .unwrap_or(70);
            return Ok(code);
        }
    };

    match args.output_format {
        OutputFormat::Text => print!("{}", report.render_summary()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(report.exit_code())
}

/// Parse repeated `--files <assistant>=<path>[,<path>…]` declarations.
fn parse_file_declarations(
    declarations: &[String],
) -> Result<HashMap<AssistantName, BTreeSet<String>>, OrchestratorError> {
    let mut parsed: HashMap<AssistantName, BTreeSet<String>> = HashMap::new();
    for declaration in declarations {
        let Some((assistant, paths)) = declaration.split_once('=') else {
            return Err(OrchestratorError::Usage(format!(
                "invalid --files value '{declaration}': expected <assistant>=<path>[,<path>…]"
            )));
        };
        let assistant = AssistantName::parse(assistant)
            .ok_or_else(|| OrchestratorError::UnknownAssistant(assistant.to_string()))?;
        let entry = parsed.entry(assistant).or_default();
        for path in paths.split(',') {
            let path = path.trim();
            if !path.is_empty() {
                entry.insert(path.to_string());
            }
        }
    }
    Ok(parsed)
}

/// `cao route`: show the routing decision without executing.
pub fn handle_route(input: &str, output_format: OutputFormat) -> Result<()> {
    let routing = cao_router::route(input);
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&routing)?),
        OutputFormat::Text => match &routing.target {
            Some(target) => println!(
                "target:   {target}\nresidual: {}\npattern:  {}",
                routing.residual,
                routing.pattern.unwrap_or("-"),
            ),
            None => println!("target:   (none)\nresidual: {}", routing.residual),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_declarations() {
        let parsed = parse_file_declarations(&[
            "claude=src/util.js,README.md".to_string(),
            "gemini=src/util.js".to_string(),
            "claude=extra.txt".to_string(),
        ])
        .unwrap();

        let claude = &parsed[&AssistantName::Claude];
        assert!(claude.contains("src/util.js"));
        assert!(claude.contains("README.md"));
        assert!(claude.contains("extra.txt"));
        assert_eq!(parsed[&AssistantName::Gemini].len(), 1);
    }

    #[test]
    fn test_parse_file_declarations_rejects_bad_shapes() {
        let err = parse_file_declarations(&["no-equals".to_string()]).unwrap_err();
        assert_eq!(err.exit_code(), 64);

        let err = parse_file_declarations(&["cursor=x".to_string()]).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAssistant(_)));
    }

    #[test]
    fn test_empty_paths_are_ignored() {
        let parsed = parse_file_declarations(&["claude=a, ,b,".to_string()]).unwrap();
        assert_eq!(parsed[&AssistantName::Claude].len(), 2);
    }
}
