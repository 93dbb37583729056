pub mod classify;
pub mod registry;
pub mod replay;
pub mod segment;
pub mod session;
pub mod turns;

use crate::error::Result as CoreResult;
use crate::fmt::{cprintln, short_id, BOLD, CYAN, DIM, GREEN, RESET, YELLOW};
use crate::models;
use crate::store::write_atomic;
use anyhow::{Context, Result};
use classify::{
    session_features, CompositeClassifier, MessagePointer, SessionClassification, Weights,
};
use registry::{Entity, EntityDirs, EntityRegistry};
use replay::{ReplayWriter, SessionRef};
use serde::{Deserialize, Serialize};
use session::JsonlReader;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use turns::TurnExtractor;

/// Settings for the session-history engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    pub sessions_dir: PathBuf,
    /// Directory under the project root for cross-entity outputs.
    pub history_root: String,
    pub threshold: f64,
    pub weights: Weights,
    pub exclude_thinking: bool,
    pub exclude_sidechains: bool,
    pub entity_dirs: EntityDirs,
}

impl Settings {
    pub fn new(project_root: PathBuf, sessions_dir: Option<PathBuf>) -> Settings {
        let sessions_dir =
            sessions_dir.unwrap_or_else(|| derive_sessions_dir(&project_root));
        Settings {
            project_root,
            sessions_dir,
            history_root: "session-history".into(),
            threshold: classify::DEFAULT_THRESHOLD,
            weights: Weights::default(),
            exclude_thinking: true,
            exclude_sidechains: true,
            entity_dirs: EntityDirs::default(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.weights.validate()
    }

    pub fn history_dir(&self) -> PathBuf {
        self.project_root.join(&self.history_root)
    }

    pub fn scan_state_path(&self) -> PathBuf {
        self.history_dir().join(".scan-state.json")
    }

    fn reader(&self) -> JsonlReader {
        JsonlReader {
            exclude_thinking: self.exclude_thinking,
            exclude_sidechains: self.exclude_sidechains,
        }
    }

    fn turn_extractor(&self) -> TurnExtractor {
        TurnExtractor {
            project_root: Some(self.project_root.to_string_lossy().into_owned()),
        }
    }

    fn replay_writer(&self) -> ReplayWriter {
        ReplayWriter {
            reader: self.reader(),
            extractor: self.turn_extractor(),
        }
    }
}

/// Claude Code keeps transcripts under
/// `~/.claude/projects/-<abs-path-with-dashes>/`.
fn derive_sessions_dir(project_root: &Path) -> PathBuf {
    let slug = project_root
        .to_string_lossy()
        .replace('/', "-")
        .trim_start_matches('-')
        .to_string();
    models::home_dir()
        .join(".claude")
        .join("projects")
        .join(format!("-{slug}"))
}

/// Mtime-keyed scan state for incremental history scans.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct HistoryScanState {
    #[serde(default)]
    pub last_scan: String,
    #[serde(default)]
    pub file_mtimes: BTreeMap<String, f64>,
}

impl HistoryScanState {
    pub fn load(path: &Path) -> HistoryScanState {
        let Ok(content) = fs::read_to_string(path) else {
            return HistoryScanState::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_scan = chrono::Utc::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, serde_json::to_string_pretty(self)?.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn mtime_seconds(path: &Path) -> f64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Scans all transcripts, classifies them against the discovered entities
/// and writes the per-entity indexes, the master index, the report and the
/// uncategorized outputs. Incremental runs reclassify only files whose mtime
/// moved and merge with the previous master index.
pub fn scan(settings: &Settings, incremental: bool) -> Result<()> {
    settings.validate()?;

    cprintln!("{BOLD}session history scan{RESET}");
    cprintln!("{DIM}sessions: {}{RESET}", settings.sessions_dir.display());
    cprintln!("{DIM}project:  {}{RESET}", settings.project_root.display());

    // 1. entities
    let registry = EntityRegistry::new(&settings.project_root, settings.entity_dirs.clone());
    let entities = registry.discover_all();
    cprintln!("\n[1/4] {} entities", entities.len());
    for e in &entities {
        cprintln!("  {DIM}-{RESET} {} {DIM}({}){RESET}", e.display_name, e.entity_type.as_str());
    }

    // 2. session files, mtime-gated in incremental mode
    let reader = settings.reader();
    let all_files = reader.list_session_files(&settings.sessions_dir);
    let state_path = settings.scan_state_path();
    let prior_state = HistoryScanState::load(&state_path);

    let files: Vec<PathBuf> = if incremental {
        all_files
            .iter()
            .filter(|f| {
                let key = f.to_string_lossy().into_owned();
                let recorded = prior_state.file_mtimes.get(&key).copied().unwrap_or(0.0);
                mtime_seconds(f) > recorded
            })
            .cloned()
            .collect()
    } else {
        all_files.clone()
    };

    if incremental && files.is_empty() {
        cprintln!("\n[2/4] no new or modified session files");
        return Ok(());
    }
    cprintln!("\n[2/4] reading {}/{} session file(s)", files.len(), all_files.len());

    let mut sessions = Vec::new();
    for path in &files {
        match reader.read_session(path) {
            Ok(session) => {
                cprintln!(
                    "  {GREEN}✓{RESET} {}... {DIM}({} msgs){RESET}",
                    short_id(&session.session_id),
                    session.message_count()
                );
                sessions.push(session);
            }
            Err(e) => {
                cprintln!("  {YELLOW}✗{RESET} {}: {e}", path.display());
            }
        }
    }

    // 3. classify
    cprintln!("\n[3/4] classifying {} session(s)...", sessions.len());
    let extractor = classify::MessageExtractor::new(
        &settings.project_root,
        &settings.entity_dirs.all(),
    );
    let mut classifier = CompositeClassifier::new(settings.weights, settings.threshold)?;

    let mut loaded: HashMap<String, Vec<classify::MsgFeatures>> = HashMap::new();
    let mut fresh = Vec::new();
    for session in &sessions {
        let features = session_features(&extractor, session);
        let classification = classifier.classify(session, &features, &entities);
        match classification.matches.first() {
            Some(top) => cprintln!(
                "  {}... {CYAN}→{RESET} {} {DIM}({:.2}){RESET}",
                short_id(&classification.session_id),
                top.display_name,
                top.confidence
            ),
            None => cprintln!(
                "  {}... {DIM}→ Uncategorized{RESET}",
                short_id(&classification.session_id)
            ),
        }
        loaded.insert(classification.session_id.clone(), features);
        fresh.push(classification);
    }

    let history_dir = settings.history_dir();
    let classifications = if incremental {
        merge_classifications(fresh, &history_dir)
    } else {
        fresh
    };

    // 4. indexes
    cprintln!("\n[4/4] writing indexes...");
    let entity_by_id: HashMap<String, &Entity> =
        entities.iter().map(|e| (e.id(), e)).collect();

    let mut refs_by_entity: BTreeMap<String, Vec<SessionRef>> = BTreeMap::new();
    for classification in &classifications {
        for m in &classification.matches {
            if !entity_by_id.contains_key(&m.entity_id) {
                continue; // entity went away since the previous scan
            }
            // pointer lists are only available for sessions read this run;
            // merged-in classifications keep their summary fields only
            let pointers: Vec<MessagePointer> = match loaded.get(&classification.session_id) {
                Some(features) => classifier
                    .matched_pointers(features, entity_by_id[&m.entity_id])
                    .into_iter()
                    .take(50)
                    .collect(),
                None => Vec::new(),
            };

            refs_by_entity.entry(m.entity_id.clone()).or_default().push(SessionRef {
                session_id: classification.session_id.clone(),
                file_path: classification.file_path.clone(),
                confidence: m.confidence,
                start_time: classification.start_time.clone(),
                end_time: classification.end_time.clone(),
                message_count: classification.message_count,
                matched_message_count: m.matched_messages,
                matched_messages: pointers,
                evidence: m.evidence.clone(),
            });
        }
    }

    for (entity_id, refs) in refs_by_entity.iter() {
        let entity = entity_by_id[entity_id];
        let count = refs.len();
        let index = replay::build_entity_index(entity, refs.clone());
        replay::write_entity_index(&settings.project_root, entity, &index)?;
        cprintln!("  {GREEN}✓{RESET} {}: {count} session(s)", entity.display_name);
    }

    // indexes of entities that no longer have sessions are stale
    for entity in &entities {
        if !refs_by_entity.contains_key(&entity.id())
            && replay::remove_entity_index(&settings.project_root, entity)
        {
            cprintln!("  {YELLOW}✗{RESET} {}: removed empty index", entity.display_name);
        }
    }

    replay::write_master_index(&classifications, &history_dir)?;
    replay::write_report(&classifications, &history_dir)?;

    write_uncategorized(settings, &classifications, &sessions, &reader, &history_dir)?;

    // record mtimes only after everything above landed
    let mut scan_state = HistoryScanState::default();
    for f in reader.list_session_files(&settings.sessions_dir) {
        scan_state
            .file_mtimes
            .insert(f.to_string_lossy().into_owned(), mtime_seconds(&f));
    }
    scan_state.save(&state_path)?;

    let uncategorized = classifications.iter().filter(|c| c.is_uncategorized()).count();
    cprintln!("\n{BOLD}done{RESET}: {} session(s) classified", classifications.len());
    cprintln!("  categorized: {}", classifications.len() - uncategorized);
    cprintln!("  uncategorized: {uncategorized}");
    cprintln!("  master index: {}", history_dir.join("all-sessions.json").display());
    Ok(())
}

fn write_uncategorized(
    settings: &Settings,
    classifications: &[SessionClassification],
    sessions: &[session::Session],
    reader: &JsonlReader,
    history_dir: &Path,
) -> Result<()> {
    let uncategorized: Vec<&SessionClassification> = classifications
        .iter()
        .filter(|c| c.is_uncategorized())
        .collect();

    let uncat_dir = history_dir.join("uncategorized");
    fs::create_dir_all(&uncat_dir)?;
    let sessions_json = uncat_dir.join("sessions.json");

    if uncategorized.is_empty() {
        write_atomic(
            &sessions_json,
            serde_json::to_string_pretty(&serde_json::json!({"sessions": [], "count": 0}))?
                .as_bytes(),
        )?;
        let replay_dir = uncat_dir.join("replay");
        if replay_dir.exists() {
            for entry in fs::read_dir(&replay_dir)?.flatten() {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("md") {
                    fs::remove_file(entry.path())?;
                }
            }
        }
        return Ok(());
    }

    let data = serde_json::json!({
        "sessions": uncategorized.iter().map(|c| serde_json::to_value(c).unwrap_or_default()).collect::<Vec<_>>(),
        "count": uncategorized.len(),
    });
    write_atomic(&sessions_json, serde_json::to_string_pretty(&data)?.as_bytes())?;

    // replays need full sessions; reload the ones the incremental merge kept
    let by_id: HashMap<&str, &session::Session> = sessions
        .iter()
        .map(|s| (s.session_id.as_str(), s))
        .collect();
    let mut uncat_sessions: Vec<session::Session> = Vec::new();
    for c in &uncategorized {
        if let Some(s) = by_id.get(c.session_id.as_str()) {
            uncat_sessions.push((*s).clone());
        } else if Path::new(&c.file_path).exists() {
            if let Ok(s) = reader.read_session(Path::new(&c.file_path)) {
                uncat_sessions.push(s);
            }
        }
    }
    if !uncat_sessions.is_empty() {
        let files = settings
            .replay_writer()
            .generate_uncategorized(&uncat_sessions, history_dir)?;
        cprintln!(
            "  {GREEN}✓{RESET} Uncategorized: {} session(s), {} replay file(s)",
            uncategorized.len(),
            files.len()
        );
    }
    Ok(())
}

/// Keeps the previous master index's entries for sessions that were not
/// reclassified this run; newer classifications win per session id.
fn merge_classifications(
    fresh: Vec<SessionClassification>,
    history_dir: &Path,
) -> Vec<SessionClassification> {
    let Some(existing) = replay::load_master_index(history_dir) else {
        return fresh;
    };
    let new_ids: HashSet<String> = fresh.iter().map(|c| c.session_id.clone()).collect();
    let mut merged = fresh;
    merged.extend(
        existing
            .into_iter()
            .filter(|c| !new_ids.contains(&c.session_id)),
    );
    merged
}

/// Generates the per-session replays for one entity (matched by substring
/// against name, id or display name) or for the uncategorized bucket.
pub fn replay_cmd(settings: &Settings, entity_query: &str) -> Result<()> {
    if matches!(entity_query.to_lowercase().as_str(), "uncategorized" | "uncat") {
        return replay_uncategorized(settings);
    }

    let registry = EntityRegistry::new(&settings.project_root, settings.entity_dirs.clone());
    let entities = registry.discover_all();

    let needle = entity_query.to_lowercase();
    let Some(entity) = entities.iter().find(|e| {
        e.name.contains(entity_query)
            || e.id().contains(entity_query)
            || e.display_name.to_lowercase().contains(&needle)
    }) else {
        cprintln!("no entity matches {BOLD}{entity_query}{RESET}. available:");
        for e in &entities {
            cprintln!("  {DIM}{}{RESET} - {}", e.id(), e.display_name);
        }
        anyhow::bail!("unknown entity '{entity_query}'");
    };

    let Some(index) = replay::load_entity_index(&settings.project_root, entity) else {
        anyhow::bail!(
            "{} has no sessions-index.json — run 'colligo history scan' first",
            entity.display_name
        );
    };

    let history_dir = settings.project_root.join(entity.history_dir());
    let files = settings
        .replay_writer()
        .generate(entity, &index, &entities, &history_dir)?;
    replay::write_replay_index(&entity.display_name, &files, &history_dir)?;

    cprintln!("replays for {BOLD}{}{RESET}:", entity.display_name);
    for f in &files {
        cprintln!("  {}", f.file_name().and_then(|n| n.to_str()).unwrap_or(""));
    }
    cprintln!("index: {}", history_dir.join("replay-index.md").display());
    cprintln!("{} session file(s)", files.len());
    Ok(())
}

fn replay_uncategorized(settings: &Settings) -> Result<()> {
    let history_dir = settings.history_dir();
    let sessions_json = history_dir.join("uncategorized").join("sessions.json");
    let content = fs::read_to_string(&sessions_json)
        .context("no uncategorized sessions — run 'colligo history scan' first")?;
    let data: serde_json::Value = serde_json::from_str(&content)?;

    let reader = settings.reader();
    let mut sessions = Vec::new();
    let empty = Vec::new();
    let entries = data.get("sessions").and_then(|v| v.as_array()).unwrap_or(&empty);
    for s in entries {
        let Some(fp) = s.get("file_path").and_then(|v| v.as_str()) else {
            continue;
        };
        if Path::new(fp).exists() {
            if let Ok(session) = reader.read_session(Path::new(fp)) {
                sessions.push(session);
            }
        }
    }

    if sessions.is_empty() {
        cprintln!("no uncategorized session transcripts found.");
        return Ok(());
    }

    let files = settings
        .replay_writer()
        .generate_uncategorized(&sessions, &history_dir)?;
    cprintln!("replays for {BOLD}Uncategorized{RESET}:");
    for f in &files {
        cprintln!("  {}", f.file_name().and_then(|n| n.to_str()).unwrap_or(""));
    }
    cprintln!("{} session file(s)", files.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_dir_is_derived_from_project_path() {
        let settings = Settings::new(PathBuf::from("/Users/kay/AI/harvest"), None);
        let dir = settings.sessions_dir.to_string_lossy().into_owned();
        assert!(dir.ends_with(".claude/projects/-Users-kay-AI-harvest"));
    }

    #[test]
    fn explicit_sessions_dir_wins() {
        let settings = Settings::new(
            PathBuf::from("/proj"),
            Some(PathBuf::from("/transcripts")),
        );
        assert_eq!(settings.sessions_dir, PathBuf::from("/transcripts"));
    }

    #[test]
    fn scan_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".scan-state.json");

        let mut state = HistoryScanState::default();
        state.file_mtimes.insert("/a.jsonl".into(), 1234.5);
        state.save(&path).unwrap();

        let loaded = HistoryScanState::load(&path);
        assert_eq!(loaded.file_mtimes.get("/a.jsonl"), Some(&1234.5));
        assert!(!loaded.last_scan.is_empty());
    }

    #[test]
    fn merge_keeps_unscanned_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let old = SessionClassification {
            session_id: "old-1".into(),
            file_path: "/t/old-1.jsonl".into(),
            ..Default::default()
        };
        let updated_old = SessionClassification {
            session_id: "old-2".into(),
            file_path: "/t/old-2.jsonl".into(),
            ..Default::default()
        };
        replay::write_master_index(&[old, updated_old], dir.path()).unwrap();

        let fresh = vec![SessionClassification {
            session_id: "old-2".into(),
            file_path: "/t/old-2-rescanned.jsonl".into(),
            ..Default::default()
        }];
        let merged = merge_classifications(fresh, dir.path());
        assert_eq!(merged.len(), 2);
        let old2 = merged.iter().find(|c| c.session_id == "old-2").unwrap();
        assert_eq!(old2.file_path, "/t/old-2-rescanned.jsonl");
    }
}
