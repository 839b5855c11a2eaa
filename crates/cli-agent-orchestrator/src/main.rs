use anyhow::Result;
use clap::Parser;

mod cli;
mod doctor;
mod logging;
mod probe_cmd;
mod run_cmd;
mod session_cmds;
mod task_cmds;

use cli::{Cli, Commands, SessionCommands, TaskCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output_format = cli.format;

    // Run sets up its own per-task file logging; everything else logs to
    // stderr only.
    if !matches!(cli.command, Commands::Run { .. }) {
        logging::init_stderr();
    }

    match cli.command {
        Commands::Run {
            prompt,
            mode,
            candidates,
            files,
            max_parallel,
            timeout,
            subtask_timeout,
            merge,
            cd,
            no_stream,
        } => {
            // The task id is fixed up front so the run's log file can live
            // inside the task directory from the first line on.
            let task_id = cao_core::id::new_task_id();
            let task_dir = cao_config::task_dir(&task_id);
            let _log_guard = match logging::init_task_logging(&task_dir) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    logging::init_stderr();
                    tracing::debug!(error = %e, "falling back to stderr-only logging");
                    None
                }
            };

            let exit_code = run_cmd::handle_run(run_cmd::RunArgs {
                task_id,
                prompt,
                mode,
                candidates,
                files,
                max_parallel,
                timeout,
                subtask_timeout,
                merge,
                cd,
                no_stream,
                output_format,
            })
            .await?;
            std::process::exit(exit_code);
        }
        Commands::Route { input } => {
            run_cmd::handle_route(&input, output_format)?;
        }
        Commands::Probe { assistant, refresh } => {
            probe_cmd::handle_probe(assistant, refresh, output_format).await?;
        }
        Commands::Task { cmd } => match cmd {
            TaskCommands::List => task_cmds::handle_list(output_format)?,
            TaskCommands::Show { task_id } => task_cmds::handle_show(&task_id)?,
            TaskCommands::Events {
                task_id,
                kind,
                subtask,
            } => task_cmds::handle_events(&task_id, kind.as_deref(), subtask.as_deref())?,
            TaskCommands::Cleanup {
                task_id,
                all,
                max_age_days,
                dry_run,
            } => task_cmds::handle_cleanup(task_id.as_deref(), all, max_age_days, dry_run)?,
        },
        Commands::Sessions { cmd } => match cmd {
            SessionCommands::List {
                assistant,
                project,
                today,
                last_days,
                contains,
                render,
                no_cache,
            } => session_cmds::handle_list(session_cmds::ListArgs {
                assistant,
                project,
                today,
                last_days,
                contains,
                render,
                no_cache,
            })?,
            SessionCommands::Context => session_cmds::handle_context()?,
        },
        Commands::Doctor => {
            doctor::run_doctor(output_format).await?;
        }
    }

    Ok(())
}
