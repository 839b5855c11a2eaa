//! `cao probe`: run or refresh the help-cache analyzer.

use anyhow::Result;

use cao_core::{ALL_ASSISTANTS, AssistantName, OutputFormat, descriptor};
use cao_probe::HelpCache;

pub async fn handle_probe(
    assistant: Option<AssistantName>,
    refresh: bool,
    output_format: OutputFormat,
) -> Result<()> {
    let config = cao_config::GlobalConfig::load()?;
    let cache = HelpCache::new(cao_config::help_cache_path());

    let targets: Vec<AssistantName> = match assistant {
        Some(one) => vec![one],
        None => ALL_ASSISTANTS.to_vec(),
    };

    let mut patterns = Vec::new();
    for target in targets {
        if refresh {
            cache.invalidate(target.as_str(), "manual refresh")?;
        }
        let pattern = cache
            .get_pattern(descriptor(target), &config.executable(target))
            .await?;
        patterns.push(pattern);
    }

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&patterns)?),
        OutputFormat::Text => {
            for pattern in patterns {
                println!(
                    "{:<10} {:?} v{} — {:?}",
                    pattern.assistant, pattern.category, pattern.version, pattern.convention,
                );
                if let Some(note) = &pattern.probe_note {
                    for line in note.lines().take(3) {
                        println!("           ! {line}");
                    }
                }
            }
        }
    }
    Ok(())
}
