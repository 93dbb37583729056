use super::classify::{MessagePointer, SessionClassification};
use super::registry::Entity;
use super::segment::TurnEntityClassifier;
use super::session::{JsonlReader, Session};
use super::turns::{extract_person, Turn, TurnExtractor};
use crate::store::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One session's membership in an entity index.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SessionRef {
    pub session_id: String,
    pub file_path: String,
    pub confidence: f64,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub matched_message_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_messages: Vec<MessagePointer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

/// `<entity>/history/sessions-index.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EntityIndex {
    pub entity_id: String,
    pub entity_type: String,
    pub display_name: String,
    pub directory: String,
    pub session_count: usize,
    pub sessions: Vec<SessionRef>,
    pub last_updated: String,
}

/// Entries sort by start time descending; equal timestamps fall back to the
/// session id so the order is stable across runs.
pub fn build_entity_index(entity: &Entity, mut refs: Vec<SessionRef>) -> EntityIndex {
    refs.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    EntityIndex {
        entity_id: entity.id(),
        entity_type: entity.entity_type.as_str().to_string(),
        display_name: entity.display_name.clone(),
        directory: entity.directory.clone(),
        session_count: refs.len(),
        sessions: refs,
        last_updated: chrono::Utc::now().to_rfc3339(),
    }
}

pub fn entity_index_path(project_root: &Path, entity: &Entity) -> PathBuf {
    project_root
        .join(entity.history_dir())
        .join("sessions-index.json")
}

pub fn write_entity_index(
    project_root: &Path,
    entity: &Entity,
    index: &EntityIndex,
) -> Result<PathBuf> {
    let path = entity_index_path(project_root, entity);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(index)?;
    write_atomic(&path, json.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn load_entity_index(project_root: &Path, entity: &Entity) -> Option<EntityIndex> {
    let path = entity_index_path(project_root, entity);
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Deletes the index of an entity that no longer has sessions.
pub fn remove_entity_index(project_root: &Path, entity: &Entity) -> bool {
    let path = entity_index_path(project_root, entity);
    path.exists() && fs::remove_file(path).is_ok()
}

/// `all-sessions.json` at the history root.
pub fn write_master_index(
    classifications: &[SessionClassification],
    history_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(history_dir)?;
    let path = history_dir.join("all-sessions.json");

    let mut sessions: Vec<serde_json::Value> = Vec::new();
    for c in classifications {
        let mut v = serde_json::to_value(c)?;
        v["primary_entity"] = serde_json::json!(c.primary_entity());
        sessions.push(v);
    }

    let uncategorized = classifications.iter().filter(|c| c.is_uncategorized()).count();
    let data = serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "total_sessions": classifications.len(),
        "categorized": classifications.len() - uncategorized,
        "uncategorized": uncategorized,
        "sessions": sessions,
    });

    write_atomic(&path, serde_json::to_string_pretty(&data)?.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn load_master_index(history_dir: &Path) -> Option<Vec<SessionClassification>> {
    let content = fs::read_to_string(history_dir.join("all-sessions.json")).ok()?;
    let data: serde_json::Value = serde_json::from_str(&content).ok()?;
    let sessions = data.get("sessions")?.as_array()?;
    Some(
        sessions
            .iter()
            .filter_map(|s| serde_json::from_value(s.clone()).ok())
            .collect(),
    )
}

/// `categorization-report.md`: overview, per-entity table, session details.
pub fn write_report(
    classifications: &[SessionClassification],
    history_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(history_dir)?;
    let path = history_dir.join("categorization-report.md");

    let uncategorized = classifications.iter().filter(|c| c.is_uncategorized()).count();
    let mut lines = vec![
        "# Session categorization report".to_string(),
        String::new(),
        format!(
            "> Generated: {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
        "## Overview".to_string(),
        String::new(),
        format!("- Total sessions: {}", classifications.len()),
        format!("- Categorized: {}", classifications.len() - uncategorized),
        format!("- Uncategorized: {uncategorized}"),
        String::new(),
        "## By entity".to_string(),
        String::new(),
        "| Entity | Type | Sessions | Max confidence |".to_string(),
        "|--------|------|----------|----------------|".to_string(),
    ];

    #[derive(Default)]
    struct Row {
        display_name: String,
        count: usize,
        max_confidence: f64,
    }
    let mut by_entity: BTreeMap<String, Row> = BTreeMap::new();
    for c in classifications {
        for m in &c.matches {
            let row = by_entity.entry(m.entity_id.clone()).or_default();
            row.display_name = m.display_name.clone();
            row.count += 1;
            if m.confidence > row.max_confidence {
                row.max_confidence = m.confidence;
            }
        }
    }
    let mut rows: Vec<(String, Row)> = by_entity.into_iter().collect();
    rows.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(&b.0)));
    for (entity_id, row) in &rows {
        let entity_type = entity_id.split(':').next().unwrap_or("");
        lines.push(format!(
            "| {} | {} | {} | {:.2} |",
            row.display_name, entity_type, row.count, row.max_confidence
        ));
    }

    lines.push(String::new());
    lines.push("## Sessions".to_string());
    lines.push(String::new());

    let mut sorted: Vec<&SessionClassification> = classifications.iter().collect();
    sorted.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    for c in sorted {
        let matches = if c.matches.is_empty() {
            "Uncategorized".to_string()
        } else {
            c.matches
                .iter()
                .take(3)
                .map(|m| format!("{} ({:.2})", m.display_name, m.confidence))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!("### {}...", &c.session_id[..8.min(c.session_id.len())]));
        lines.push(format!("- File: `{}`", c.file_path));
        lines.push(format!(
            "- Time: {} ~ {}",
            c.start_time.get(..19).unwrap_or("N/A"),
            c.end_time.get(..19).unwrap_or("N/A")
        ));
        lines.push(format!(
            "- Messages: {} (user: {})",
            c.message_count, c.user_message_count
        ));
        lines.push(format!("- Classified: {matches}"));
        lines.push(String::new());
    }

    write_atomic(&path, lines.join("\n").as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Writes per-session Markdown replays for one entity: only the turns whose
/// segment belongs to the entity, one file per session.
pub struct ReplayWriter {
    pub reader: JsonlReader,
    pub extractor: TurnExtractor,
}

impl ReplayWriter {
    pub fn generate(
        &self,
        entity: &Entity,
        index: &EntityIndex,
        all_entities: &[Entity],
        history_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let replay_dir = history_dir.join("replay");
        clear_markdown(&replay_dir)?;

        let entity_id = entity.id();
        let mut turn_classifier = TurnEntityClassifier::new();
        let mut generated = Vec::new();

        for session_ref in &index.sessions {
            let source = Path::new(&session_ref.file_path);
            if !source.exists() {
                continue;
            }
            let session = self.reader.read_session(source)?;
            let person = extract_person(&session);
            let turns = self.extractor.extract_turns(&session);
            if turns.is_empty() {
                continue;
            }

            let segments = turn_classifier.classify_turns(&turns, all_entities);
            let matching: Vec<Turn> = segments
                .into_iter()
                .filter(|s| s.entity_id.as_deref() == Some(entity_id.as_str()))
                .flat_map(|s| s.turns)
                .collect();
            // the session-level classifier put this session here; when the
            // per-turn pass finds nothing specific, keep everything rather
            // than dropping the session
            let turns_out = if matching.is_empty() { turns } else { matching };

            let filename = replay_filename(
                &person,
                turns_out.first().map(|t| t.timestamp.as_str()).unwrap_or(""),
                &session.session_id,
            );
            let path = replay_dir.join(filename);
            write_session_file(&path, &entity.display_name, &session, &person, &turns_out)?;
            generated.push(path);
        }

        Ok(generated)
    }

    pub fn generate_uncategorized(
        &self,
        sessions: &[Session],
        history_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let replay_dir = history_dir.join("uncategorized").join("replay");
        clear_markdown(&replay_dir)?;

        let mut generated = Vec::new();
        for session in sessions {
            let person = extract_person(session);
            let turns = self.extractor.extract_turns(session);
            if turns.is_empty() {
                continue;
            }
            let filename = replay_filename(&person, &session.start_time, &session.session_id);
            let path = replay_dir.join(filename);
            write_session_file(&path, "Uncategorized", session, &person, &turns)?;
            generated.push(path);
        }
        Ok(generated)
    }
}

impl Default for ReplayWriter {
    fn default() -> Self {
        ReplayWriter {
            reader: JsonlReader::default(),
            extractor: TurnExtractor::default(),
        }
    }
}

/// `replay-index.md` listing the generated session files.
pub fn write_replay_index(
    display_name: &str,
    files: &[PathBuf],
    history_dir: &Path,
) -> Result<PathBuf> {
    let path = history_dir.join("replay-index.md");
    let mut lines = vec![
        format!("# {display_name} - Replays"),
        String::new(),
        format!("{} session file(s)", files.len()),
        String::new(),
    ];
    for f in files {
        let name = f.file_name().and_then(|n| n.to_str()).unwrap_or("");
        lines.push(format!("- [{name}](replay/{name})"));
    }
    write_atomic(&path, lines.join("\n").as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// `<person>_<YYYY-MM-DD>_<HH-MM>.md`, degrading to the date or the session
/// id when the timestamp is short.
pub fn replay_filename(person: &str, ts: &str, session_id: &str) -> String {
    if ts.len() >= 16 {
        let date = &ts[..10];
        let time = ts[11..16].replace(':', "-");
        format!("{person}_{date}_{time}.md")
    } else if ts.len() >= 10 {
        format!("{person}_{}_00-00.md", &ts[..10])
    } else {
        format!("{person}_{}.md", &session_id[..8.min(session_id.len())])
    }
}

fn clear_markdown(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

fn write_session_file(
    path: &Path,
    entity_name: &str,
    session: &Session,
    person: &str,
    turns: &[Turn],
) -> Result<()> {
    let start = session.start_time.get(..16).unwrap_or(&session.start_time);
    let end = session.end_time.get(..16).unwrap_or(&session.end_time);
    let end_short = if start.get(..10) == end.get(..10) && end.len() >= 16 {
        &end[11..16]
    } else {
        end
    };

    let mut lines = vec![
        format!("# {entity_name} - Session Replay"),
        String::new(),
        format!("## Session: {start} ~ {end_short}"),
        format!(
            "> Person: {person} | Messages: {} | Turns: {}",
            session.message_count(),
            turns.len()
        ),
        String::new(),
        "---".to_string(),
        String::new(),
    ];

    for turn in turns {
        render_turn(turn, &mut lines);
    }

    write_atomic(path, lines.join("\n").as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn render_turn(turn: &Turn, lines: &mut Vec<String>) {
    lines.push(format!("### {} - {}", turn.time_short(), turn.title));
    lines.push(String::new());

    lines.push("**Prompt:**".to_string());
    if turn.is_long_prompt {
        let preview: Vec<&str> = turn.prompt.lines().take(5).collect();
        lines.push(format!("> {}", blockquote(&preview.join("\n"))));
        lines.push(String::new());
        lines.push("<details>".to_string());
        lines.push(format!(
            "<summary>Full prompt ({} chars)</summary>",
            turn.prompt.chars().count()
        ));
        lines.push(String::new());
        lines.push(turn.prompt.clone());
        lines.push(String::new());
        lines.push("</details>".to_string());
    } else {
        lines.push(format!("> {}", blockquote(&turn.prompt)));
    }
    lines.push(String::new());

    lines.push("**Result:**".to_string());
    if turn.response.is_empty() {
        lines.push("*(no text response — tools only)*".to_string());
    } else {
        lines.push(turn.response.clone());
    }
    lines.push(String::new());

    if !turn.tool_counts.is_empty() {
        let mut tool_line = format!("*Tools: {}", turn.tool_summary_line());
        if !turn.tool_narrative.is_empty() {
            tool_line.push_str(&format!(" -- {}", turn.tool_narrative));
        }
        tool_line.push('*');
        lines.push(tool_line);
        lines.push(String::new());
    }

    lines.push("---".to_string());
    lines.push(String::new());
}

fn blockquote(text: &str) -> String {
    text.replace('\n', "\n> ")
}
