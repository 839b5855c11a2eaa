//! `cao sessions`: the unified session recovery index.

use anyhow::{Context, Result};

use cao_core::AssistantName;
use cao_sessions::{RenderFormat, ScanOptions, SessionRecord, TimeWindow, render, scan};

pub struct ListArgs {
    pub assistant: Option<AssistantName>,
    pub project: bool,
    pub today: bool,
    pub last_days: Option<u32>,
    pub contains: Option<String>,
    pub render: RenderFormat,
    pub no_cache: bool,
}

const CACHE_MAX_AGE_MINUTES: i64 = 5;

fn home_dir() -> Result<std::path::PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .context("failed to determine home directory")
}

fn scan_with_cache(options: &ScanOptions, no_cache: bool) -> Result<Vec<SessionRecord>> {
    let cache_path = cao_config::sessions_index_cache_path();
    let filtered = options.assistants.is_some()
        || options.project.is_some()
        || options.window.is_some()
        || options.digest_contains.is_some();

    // Only unfiltered scans are cacheable; filters change the record set.
    if !no_cache && !filtered {
        if let Some(cache) = cao_sessions::load_cache(&cache_path) {
            if cache.is_fresh(chrono::Duration::minutes(CACHE_MAX_AGE_MINUTES)) {
                return Ok(cache.records);
            }
        }
    }

    let records = scan(&home_dir()?, options)?;
    if !filtered {
        if let Err(e) = cao_sessions::save_cache(&cache_path, &records) {
            tracing::debug!(error = %e, "failed to write session index cache");
        }
    }
    Ok(records)
}

pub fn handle_list(args: ListArgs) -> Result<()> {
    let options = ScanOptions {
        assistants: args.assistant.map(|a| vec![a]),
        project: args
            .project
            .then(|| std::env::current_dir())
            .transpose()
            .context("failed to determine working directory")?,
        window: if args.today {
            Some(TimeWindow::Today)
        } else {
            args.last_days.map(TimeWindow::LastDays)
        },
        digest_contains: args.contains.clone(),
    };

    let records = scan_with_cache(&options, args.no_cache)?;
    if records.is_empty() {
        println!("no sessions found");
        return Ok(());
    }
    print!("{}", render(&records, args.render));
    Ok(())
}

pub fn handle_context() -> Result<()> {
    let options = ScanOptions {
        project: std::env::current_dir().ok(),
        ..Default::default()
    };
    let records = scan(&home_dir()?, &options)?;
    if records.is_empty() {
        println!("no sessions found");
        return Ok(());
    }
    print!("{}", render(&records, RenderFormat::Context));
    Ok(())
}
