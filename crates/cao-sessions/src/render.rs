//! Rendering the unified session list for humans.

use clap::ValueEnum;

use crate::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderFormat {
    /// One line per record.
    Summary,
    /// Grouped by date, newest group first.
    Timeline,
    /// Per-record block with the content excerpt.
    Detailed,
    /// Most recent record per assistant, formatted for pasting into a new
    /// session.
    Context,
}

pub fn render(records: &[SessionRecord], format: RenderFormat) -> String {
    match format {
        RenderFormat::Summary => render_summary(records),
        RenderFormat::Timeline => render_timeline(records),
        RenderFormat::Detailed => render_detailed(records),
        RenderFormat::Context => render_context(records),
    }
}

fn project_note(record: &SessionRecord) -> &'static str {
    if record.project_known { "" } else { " [project?]" }
}

fn render_summary(records: &[SessionRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!(
            "{}  {:<9} {}  {}{}\n",
            record.modified.format("%Y-%m-%d %H:%M"),
            record.assistant.as_str(),
            record.session_id,
            record.excerpt,
            project_note(record),
        ));
    }
    out
}

fn render_timeline(records: &[SessionRecord]) -> String {
    let mut out = String::new();
    let mut current_date = None;
    for record in records {
        let date = record.modified.format("%Y-%m-%d").to_string();
        if current_date.as_deref() != Some(date.as_str()) {
            if current_date.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("## {date}\n"));
            current_date = Some(date);
        }
        out.push_str(&format!(
            "  {}  {:<9} {}  {}{}\n",
            record.modified.format("%H:%M"),
            record.assistant.as_str(),
            record.session_id,
            record.excerpt,
            project_note(record),
        ));
    }
    out
}

fn render_detailed(records: &[SessionRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!(
            "— {} ({})\n  session:  {}\n  modified: {}\n  path:     {}\n",
            record.assistant.as_str(),
            record
                .project_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "project unknown".to_string()),
            record.session_id,
            record.modified.format("%Y-%m-%d %H:%M:%S"),
            record.path.display(),
        ));
        if let Some(count) = record.message_count {
            out.push_str(&format!("  messages: ~{count}\n"));
        }
        if !record.excerpt.is_empty() {
            out.push_str(&format!("  digest:   {}\n", record.excerpt));
        }
        out.push('\n');
    }
    out
}

fn render_context(records: &[SessionRecord]) -> String {
    // Records arrive sorted most recent first; keep the first per assistant.
    let mut seen = std::collections::BTreeSet::new();
    let mut out = String::from("# Previous sessions\n\n");
    for record in records {
        if !seen.insert(record.assistant) {
            continue;
        }
        out.push_str(&format!(
            "## {} — last activity {}\n- session: {}\n- project: {}\n",
            record.assistant.as_str(),
            record.modified.format("%Y-%m-%d %H:%M"),
            record.session_id,
            record
                .project_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ));
        if !record.excerpt.is_empty() {
            out.push_str(&format!("- digest: {}\n", record.excerpt));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cao_core::AssistantName;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn record(assistant: AssistantName, hour: u32, day: u32) -> SessionRecord {
        SessionRecord {
            assistant,
            session_id: format!("sess-{hour}"),
            project_path: Some(PathBuf::from("/root/crate")),
            project_known: true,
            modified: Utc.with_ymd_and_hms(2026, 2, day, hour, 30, 0).unwrap(),
            message_count: Some(4),
            excerpt: "explain closures".to_string(),
            fingerprint: "abcd".to_string(),
            path: PathBuf::from("/x/sess.jsonl"),
        }
    }

    #[test]
    fn test_summary_one_line_per_record() {
        let records = vec![
            record(AssistantName::Claude, 10, 2),
            record(AssistantName::Gemini, 9, 2),
        ];
        let out = render(&records, RenderFormat::Summary);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("claude"));
        assert!(out.contains("sess-10"));
    }

    #[test]
    fn test_timeline_groups_by_date() {
        let records = vec![
            record(AssistantName::Claude, 10, 2),
            record(AssistantName::Gemini, 9, 1),
        ];
        let out = render(&records, RenderFormat::Timeline);
        assert!(out.contains("## 2026-02-02"));
        assert!(out.contains("## 2026-02-01"));
        let first = out.find("2026-02-02").unwrap();
        let second = out.find("2026-02-01").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_detailed_includes_path_and_messages() {
        let out = render(
            &[record(AssistantName::Codex, 8, 2)],
            RenderFormat::Detailed,
        );
        assert!(out.contains("/x/sess.jsonl"));
        assert!(out.contains("messages: ~4"));
        assert!(out.contains("digest:   explain closures"));
    }

    #[test]
    fn test_context_keeps_most_recent_per_assistant() {
        let records = vec![
            record(AssistantName::Claude, 12, 2),
            record(AssistantName::Claude, 9, 2),
            record(AssistantName::Gemini, 11, 2),
        ];
        let out = render(&records, RenderFormat::Context);
        assert_eq!(out.matches("## claude").count(), 1);
        assert!(out.contains("sess-12"));
        assert!(!out.contains("sess-9\n"));
        assert!(out.contains("## gemini"));
    }

    #[test]
    fn test_unknown_project_is_flagged_in_summary() {
        let mut r = record(AssistantName::Qwen, 7, 2);
        r.project_known = false;
        r.project_path = None;
        let out = render(&[r], RenderFormat::Summary);
        assert!(out.contains("[project?]"));
    }
}
