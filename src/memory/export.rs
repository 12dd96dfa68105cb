// src/memory/export.rs
// Markdown export/import for session memory. The exported document is the
// canonical human-readable form: export(import(export(m))) == export(m).

use chrono::{DateTime, Utc};

use super::{CurrentStatus, Learning, SessionMemory, TimeStamps};
use crate::error::{DriftError, Result};

/// Render session memory as a markdown document
pub fn export_as_markdown(memory: &SessionMemory) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", memory.title));
    out.push_str(&format!("- Session: {}\n", memory.session_id));
    out.push_str(&format!("- Project: {}\n", memory.project_id));
    if let Some(parent) = &memory.parent_id {
        out.push_str(&format!("- Parent: {parent}\n"));
    }
    out.push_str(&format!("- Created: {}\n", memory.time.created.to_rfc3339()));
    out.push_str(&format!("- Updated: {}\n", memory.time.updated.to_rfc3339()));
    out.push_str(&format!("- Title generated: {}\n", memory.title_generated));
    out.push_str(&format!("- Shared: {}\n", memory.shared));

    push_section(&mut out, "Completed", &memory.current_status.completed);
    push_section(
        &mut out,
        "Discussion Points",
        &memory.current_status.discussion_points,
    );
    push_section(&mut out, "Open Questions", &memory.current_status.open_questions);
    push_section(&mut out, "Key Results", &memory.key_results);

    if !memory.learnings.is_empty() {
        out.push_str("\n## Learnings\n");
        for learning in &memory.learnings {
            match &learning.context {
                Some(context) => out.push_str(&format!(
                    "- [{}] {} (context: {})\n",
                    learning.category, learning.insight, context
                )),
                None => out.push_str(&format!("- [{}] {}\n", learning.category, learning.insight)),
            }
        }
    }

    out
}

fn push_section(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// Parse a markdown document produced by `export_as_markdown` back into
/// session memory. Learning ids and timestamps are not part of the canonical
/// form and are regenerated deterministically from the document order.
pub fn import_from_markdown(markdown: &str) -> Result<SessionMemory> {
    let mut title = None;
    let mut session_id = None;
    let mut project_id = None;
    let mut parent_id = None;
    let mut created: Option<DateTime<Utc>> = None;
    let mut updated: Option<DateTime<Utc>> = None;
    let mut title_generated = false;
    let mut shared = false;

    let mut status = CurrentStatus::default();
    let mut key_results = Vec::new();
    let mut learnings: Vec<Learning> = Vec::new();
    let mut section = None;

    for line in markdown.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("# ") {
            title = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("## ") {
            section = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("- ") {
            match section.as_deref() {
                None => parse_header_field(
                    rest,
                    &mut session_id,
                    &mut project_id,
                    &mut parent_id,
                    &mut created,
                    &mut updated,
                    &mut title_generated,
                    &mut shared,
                )?,
                Some("Completed") => status.completed.push(rest.to_string()),
                Some("Discussion Points") => status.discussion_points.push(rest.to_string()),
                Some("Open Questions") => status.open_questions.push(rest.to_string()),
                Some("Key Results") => key_results.push(rest.to_string()),
                Some("Learnings") => learnings.push(parse_learning(rest)?),
                Some(other) => {
                    return Err(DriftError::validation(format!(
                        "unknown memory export section '{other}'"
                    )));
                }
            }
        }
    }

    let session_id =
        session_id.ok_or_else(|| DriftError::validation("memory export missing Session field"))?;
    let project_id =
        project_id.ok_or_else(|| DriftError::validation("memory export missing Project field"))?;
    let created =
        created.ok_or_else(|| DriftError::validation("memory export missing Created field"))?;
    let updated =
        updated.ok_or_else(|| DriftError::validation("memory export missing Updated field"))?;

    for learning in &mut learnings {
        learning.session_id = Some(session_id.clone());
        learning.timestamp = updated;
    }

    Ok(SessionMemory {
        session_id,
        project_id,
        title: title.unwrap_or_default(),
        title_generated,
        parent_id,
        shared,
        current_status: status,
        learnings,
        key_results,
        time: TimeStamps { created, updated },
    })
}

#[allow(clippy::too_many_arguments)]
fn parse_header_field(
    rest: &str,
    session_id: &mut Option<String>,
    project_id: &mut Option<String>,
    parent_id: &mut Option<String>,
    created: &mut Option<DateTime<Utc>>,
    updated: &mut Option<DateTime<Utc>>,
    title_generated: &mut bool,
    shared: &mut bool,
) -> Result<()> {
    let Some((field, value)) = rest.split_once(": ") else {
        return Ok(());
    };
    match field {
        "Session" => *session_id = Some(value.to_string()),
        "Project" => *project_id = Some(value.to_string()),
        "Parent" => *parent_id = Some(value.to_string()),
        "Created" => *created = Some(parse_timestamp(value)?),
        "Updated" => *updated = Some(parse_timestamp(value)?),
        "Title generated" => *title_generated = value == "true",
        "Shared" => *shared = value == "true",
        _ => {}
    }
    Ok(())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| DriftError::validation(format!("bad timestamp '{value}': {err}")))
}

fn parse_learning(rest: &str) -> Result<Learning> {
    let Some(bracket_end) = rest.find("] ") else {
        return Err(DriftError::validation(format!("bad learning line '{rest}'")));
    };
    let category = rest[..bracket_end]
        .strip_prefix('[')
        .ok_or_else(|| DriftError::validation(format!("bad learning line '{rest}'")))?;
    let body = &rest[bracket_end + 2..];

    let (insight, context) = match body.rfind(" (context: ") {
        Some(idx) if body.ends_with(')') => {
            let context = &body[idx + " (context: ".len()..body.len() - 1];
            (&body[..idx], Some(context.to_string()))
        }
        _ => (body, None),
    };

    let mut learning = Learning::new(category, insight);
    learning.context = context;
    Ok(learning)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory() -> SessionMemory {
        let mut memory = SessionMemory::new("proj-1", "sess-1", "Incident widget build");
        memory.title_generated = true;
        memory.parent_id = Some("sess-0".into());
        memory.current_status.completed.push("researched table schema".into());
        memory.current_status.open_questions.push("which roles see the widget?".into());
        memory.key_results.push("widget deployed to dev".into());
        memory.learnings.push(
            Learning::new("pattern", "query tables before designing")
                .with_context("saved a rework cycle"),
        );
        memory.learnings.push(Learning::new("gotcha", "rate limits bite at 50 rps"));
        memory
    }

    #[test]
    fn test_export_contains_all_sections() {
        let markdown = export_as_markdown(&sample_memory());
        assert!(markdown.starts_with("# Incident widget build"));
        assert!(markdown.contains("- Session: sess-1"));
        assert!(markdown.contains("- Parent: sess-0"));
        assert!(markdown.contains("## Completed"));
        assert!(markdown.contains("## Open Questions"));
        assert!(markdown.contains("## Key Results"));
        assert!(markdown.contains("- [pattern] query tables before designing (context: saved a rework cycle)"));
    }

    #[test]
    fn test_round_trip_is_canonical() {
        let memory = sample_memory();
        let first = export_as_markdown(&memory);
        let imported = import_from_markdown(&first).unwrap();
        let second = export_as_markdown(&imported);
        assert_eq!(first, second);
    }

    #[test]
    fn test_import_restores_fields() {
        let markdown = export_as_markdown(&sample_memory());
        let imported = import_from_markdown(&markdown).unwrap();

        assert_eq!(imported.session_id, "sess-1");
        assert_eq!(imported.project_id, "proj-1");
        assert_eq!(imported.parent_id.as_deref(), Some("sess-0"));
        assert!(imported.title_generated);
        assert_eq!(imported.learnings.len(), 2);
        assert_eq!(imported.learnings[1].category, "gotcha");
        assert_eq!(imported.learnings[1].context, None);
        assert_eq!(imported.learnings[0].session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_import_rejects_missing_session() {
        let err = import_from_markdown("# Title\n\n- Project: p\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }
}
