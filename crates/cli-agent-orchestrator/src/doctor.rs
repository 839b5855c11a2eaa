//! `cao doctor`: per-assistant install check and cache health report.

use anyhow::Result;
use chrono::Utc;

use cao_core::{ALL_ASSISTANTS, OutputFormat};
use cao_probe::HelpCache;

pub async fn run_doctor(output_format: OutputFormat) -> Result<()> {
    let config = cao_config::GlobalConfig::load()?;
    let cache = HelpCache::new(cao_config::help_cache_path());

    let mut rows = Vec::new();
    for assistant in ALL_ASSISTANTS {
        let executable = config.executable(*assistant);
        let installed = which::which(&executable).is_ok();
        let enabled = config.is_enabled(*assistant);
        let cached = cache.peek(assistant.as_str());

        rows.push(serde_json::json!({
            "assistant": assistant.as_str(),
            "executable": executable,
            "installed": installed,
            "enabled": enabled,
            "cachedConvention": cached.as_ref().map(|p| &p.convention),
            "cacheAgeHours": cached.as_ref().map(|p| {
                Utc::now().signed_duration_since(p.analyzed_at).num_hours()
            }),
        }));
    }

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            println!("config root: {}", cao_config::config_root().display());
            for row in rows {
                let status = match (row["installed"].as_bool(), row["enabled"].as_bool()) {
                    (Some(true), Some(true)) => "ok",
                    (Some(true), Some(false)) => "disabled",
                    _ => "missing",
                };
                let cache_note = match row["cacheAgeHours"].as_i64() {
                    Some(hours) => format!("cached {hours}h ago"),
                    None => "not probed".to_string(),
                };
                println!(
                    "{:<10} {:<9} {:<24} {}",
                    row["assistant"].as_str().unwrap_or("?"),
                    status,
                    row["executable"].as_str().unwrap_or("?"),
                    cache_note,
                );
            }
        }
    }
    Ok(())
}
