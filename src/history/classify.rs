use super::registry::Entity;
use super::session::{Session, SessionMessage};
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

/// Signal weights. Must be non-negative and sum to 1.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct Weights {
    pub file_path: f64,
    pub text_pattern: f64,
    pub keyword: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            file_path: 0.50,
            text_pattern: 0.35,
            keyword: 0.15,
        }
    }
}

impl Weights {
    pub fn validate(&self) -> Result<()> {
        if self.file_path < 0.0 || self.text_pattern < 0.0 || self.keyword < 0.0 {
            return Err(Error::Config("signal weights must be non-negative".into()));
        }
        let sum = self.file_path + self.text_pattern + self.keyword;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "signal weights must sum to 1 (got {sum})"
            )));
        }
        Ok(())
    }
}

pub const DEFAULT_THRESHOLD: f64 = 0.15;

/// Extracts classification features from messages: normalized project paths,
/// plain text, and keyword tokens.
pub struct MessageExtractor {
    prefixes: Vec<String>,
    rel_path_re: Regex,
    command_path_re: Regex,
}

impl MessageExtractor {
    pub fn new(project_root: &Path, top_dirs: &[&str]) -> Self {
        let root = project_root.to_string_lossy().trim_end_matches('/').to_string();
        let dirs_alt = top_dirs
            .iter()
            .map(|d| regex::escape(d))
            .collect::<Vec<_>>()
            .join("|");
        // relative references like `specs/01_foo/plan.md` inside prose
        let rel_path_re =
            Regex::new(&format!(r#"(?:{dirs_alt})/[^\s'"`,;)\]}}>]+"#)).unwrap();
        // absolute or project-relative paths inside bash command strings
        let command_path_re =
            Regex::new(&format!(r"(?:/Users/\S+|(?:{dirs_alt})/\S+)")).unwrap();

        MessageExtractor {
            prefixes: vec![format!("{root}/")],
            rel_path_re,
            command_path_re,
        }
    }

    /// All file paths a message references, normalized to project-relative
    /// form, deduplicated in order of appearance.
    pub fn extract_file_paths(&self, msg: &SessionMessage) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |p: String| {
            if !p.is_empty() && seen.insert(p.clone()) {
                out.push(p);
            }
        };

        for (_, input) in msg.tool_uses() {
            for key in ["file_path", "path", "notebook_path"] {
                if let Some(val) = input.get(key).and_then(|v| v.as_str()) {
                    if val.contains('/') {
                        if let Some(rel) = self.normalize(val) {
                            push(rel);
                        }
                    }
                }
            }
            if let Some(cmd) = input.get("command").and_then(|v| v.as_str()) {
                for m in self.command_path_re.find_iter(cmd) {
                    let path = m.as_str().trim_end_matches(['\'', '"', '`', ';', ',', ')']);
                    if let Some(rel) = self.normalize(path) {
                        push(rel);
                    }
                }
            }
            if let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) {
                if pattern.contains('/') {
                    if let Some(rel) = self.normalize(pattern) {
                        push(rel);
                    }
                }
            }
        }

        let text = msg.text_content();
        if !text.is_empty() {
            for m in self.rel_path_re.find_iter(&text) {
                let path = m.as_str().trim_end_matches(['.', ',', ';', ':', ')']);
                push(path.to_string());
            }
        }

        out
    }

    /// Project-relative form of a path, or `None` when it points outside the
    /// project.
    fn normalize(&self, path: &str) -> Option<String> {
        for prefix in &self.prefixes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                return Some(rest.to_string());
            }
        }
        if self.rel_path_re.is_match(path) && !path.starts_with('/') {
            return Some(path.to_string());
        }
        None
    }

    pub fn extract_text(&self, msg: &SessionMessage) -> String {
        msg.text_content()
    }

    /// CJK runs of length ≥ 2 plus ASCII word tokens of length ≥ 3,
    /// lowercased.
    pub fn extract_keywords(&self, msg: &SessionMessage) -> HashSet<String> {
        let text = self.extract_text(msg);
        if text.is_empty() {
            return HashSet::new();
        }
        let mut keywords = HashSet::new();
        for m in cjk_re().find_iter(&text) {
            keywords.insert(m.as_str().to_string());
        }
        for m in ascii_word_re().find_iter(&text) {
            keywords.insert(m.as_str().to_lowercase());
        }
        keywords
    }
}

fn cjk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x{4e00}-\x{9fff}]{2,}").unwrap())
}

fn ascii_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_]{3,}").unwrap())
}

/// Per-message features, computed once per session and shared by all
/// signals.
pub struct MsgFeatures {
    pub uuid: String,
    pub line_number: usize,
    pub kind: String,
    pub timestamp: String,
    pub paths: Vec<String>,
    pub text: String,
    pub keywords: HashSet<String>,
}

pub fn session_features(extractor: &MessageExtractor, session: &Session) -> Vec<MsgFeatures> {
    session
        .messages
        .iter()
        .map(|msg| MsgFeatures {
            uuid: msg.uuid.clone(),
            line_number: msg.line_number,
            kind: if msg.role.is_empty() {
                msg.msg_type.clone()
            } else {
                msg.role.clone()
            },
            timestamp: msg.timestamp.clone(),
            paths: extractor.extract_file_paths(msg),
            text: extractor.extract_text(msg),
            keywords: extractor.extract_keywords(msg),
        })
        .collect()
}

pub fn path_matches_entity(path: &str, entity: &Entity) -> bool {
    entity.path_patterns.iter().any(|pattern| {
        path.starts_with(pattern.as_str()) || path.contains(pattern.trim_end_matches('/'))
    })
}

/// File-path signal: ratio of path-bearing messages that matched, floored by
/// a step bonus on the absolute match count.
fn file_path_score(features: &[MsgFeatures], entity: &Entity) -> (f64, Vec<usize>) {
    if entity.path_patterns.is_empty() {
        return (0.0, Vec::new());
    }
    let mut matched_idx = Vec::new();
    let mut total_with_paths = 0usize;

    for (i, f) in features.iter().enumerate() {
        if f.paths.is_empty() {
            continue;
        }
        total_with_paths += 1;
        if f.paths.iter().any(|p| path_matches_entity(p, entity)) {
            matched_idx.push(i);
        }
    }

    if total_with_paths == 0 {
        return (0.0, Vec::new());
    }
    let matched = matched_idx.len();
    let count_bonus = match matched {
        n if n >= 20 => 0.6,
        n if n >= 10 => 0.5,
        n if n >= 5 => 0.4,
        n if n >= 3 => 0.3,
        n if n >= 1 => 0.2,
        _ => return (0.0, Vec::new()),
    };
    let ratio = matched as f64 / total_with_paths as f64;
    (ratio.max(count_bonus), matched_idx)
}

/// Text-pattern signal over the entity's compiled regexes.
fn text_pattern_score(features: &[MsgFeatures], patterns: &[Regex]) -> (f64, Vec<usize>) {
    if patterns.is_empty() {
        return (0.0, Vec::new());
    }
    let mut matched_idx = Vec::new();
    let mut total_with_text = 0usize;

    for (i, f) in features.iter().enumerate() {
        if f.text.is_empty() {
            continue;
        }
        total_with_text += 1;
        if patterns.iter().any(|p| p.is_match(&f.text)) {
            matched_idx.push(i);
        }
    }

    if total_with_text == 0 {
        return (0.0, Vec::new());
    }
    let matched = matched_idx.len();
    let count_bonus = match matched {
        n if n >= 15 => 0.5,
        n if n >= 8 => 0.4,
        n if n >= 4 => 0.3,
        n if n >= 2 => 0.2,
        n if n >= 1 => 0.1,
        _ => return (0.0, Vec::new()),
    };
    let ratio = matched as f64 / total_with_text as f64;
    (ratio.max(count_bonus), matched_idx)
}

/// Keyword-overlap signal; weakest, so its score is clamped to [0.1, 0.8].
fn keyword_score(features: &[MsgFeatures], entity_keywords: &HashSet<String>) -> f64 {
    if entity_keywords.is_empty() {
        return 0.0;
    }
    let mut matched = 0usize;
    let mut total_with_text = 0usize;

    for f in features {
        if f.keywords.is_empty() {
            continue;
        }
        total_with_text += 1;
        if f.keywords.iter().any(|k| entity_keywords.contains(&k.to_lowercase())) {
            matched += 1;
        }
    }

    if total_with_text == 0 || matched == 0 {
        return 0.0;
    }
    let ratio = matched as f64 / total_with_text as f64;
    ratio.clamp(0.1, 0.8)
}

/// Entity keywords, lowercased and supplemented with their `_`/`-`
/// fragments longer than 2 chars.
pub fn normalize_keywords(keywords: &[String]) -> HashSet<String> {
    let mut out = HashSet::new();
    for kw in keywords {
        out.insert(kw.to_lowercase());
        for part in kw.replace('-', "_").split('_') {
            if part.chars().count() > 2 {
                out.insert(part.to_lowercase());
            }
        }
    }
    out
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EntityMatch {
    pub entity_id: String,
    pub display_name: String,
    pub confidence: f64,
    pub file_path_score: f64,
    pub text_pattern_score: f64,
    pub keyword_score: f64,
    pub matched_messages: usize,
    pub total_messages: usize,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SessionClassification {
    pub session_id: String,
    pub file_path: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub user_message_count: usize,
    #[serde(default)]
    pub matches: Vec<EntityMatch>,
}

impl SessionClassification {
    pub fn is_uncategorized(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn primary_entity(&self) -> &str {
        self.matches
            .first()
            .map(|m| m.display_name.as_str())
            .unwrap_or("Uncategorized")
    }
}

/// A pointer back into the JSONL file for one matched message.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessagePointer {
    pub uuid: String,
    pub line_number: usize,
    pub msg_type: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub preview: String,
}

/// Combines the three signals into per-entity confidence and thresholds
/// into matches, sorted by descending confidence.
pub struct CompositeClassifier {
    pub weights: Weights,
    pub threshold: f64,
    compiled: HashMap<String, Vec<Regex>>,
}

impl CompositeClassifier {
    pub fn new(weights: Weights, threshold: f64) -> Result<Self> {
        weights.validate()?;
        Ok(CompositeClassifier {
            weights,
            threshold,
            compiled: HashMap::new(),
        })
    }

    pub fn classify(
        &mut self,
        session: &Session,
        features: &[MsgFeatures],
        entities: &[Entity],
    ) -> SessionClassification {
        let mut classification = SessionClassification {
            session_id: session.session_id.clone(),
            file_path: session.file_path.clone(),
            start_time: session.start_time.clone(),
            end_time: session.end_time.clone(),
            message_count: session.message_count(),
            user_message_count: session.user_message_count(),
            matches: Vec::new(),
        };

        for entity in entities {
            let (fp, fp_idx) = file_path_score(features, entity);
            let patterns = self.compiled_for(entity);
            let (tp, tp_idx) = text_pattern_score(features, &patterns);
            let kw = keyword_score(features, &normalize_keywords(&entity.keywords));

            let confidence = fp * self.weights.file_path
                + tp * self.weights.text_pattern
                + kw * self.weights.keyword;
            if confidence < self.threshold {
                continue;
            }

            let mut matched: Vec<usize> = fp_idx.iter().chain(tp_idx.iter()).copied().collect();
            matched.sort_unstable();
            matched.dedup();

            classification.matches.push(EntityMatch {
                entity_id: entity.id(),
                display_name: entity.display_name.clone(),
                confidence: round3(confidence),
                file_path_score: round3(fp),
                text_pattern_score: round3(tp),
                keyword_score: round3(kw),
                matched_messages: matched.len(),
                total_messages: features.len(),
                evidence: collect_evidence(features, entity, &fp_idx, &tp_idx),
            });
        }

        classification.matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        classification
    }

    /// Pointers into the JSONL for every message either path or text signal
    /// matched.
    pub fn matched_pointers(
        &mut self,
        features: &[MsgFeatures],
        entity: &Entity,
    ) -> Vec<MessagePointer> {
        let (_, fp_idx) = file_path_score(features, entity);
        let patterns = self.compiled_for(entity);
        let (_, tp_idx) = text_pattern_score(features, &patterns);

        let mut matched: Vec<usize> = fp_idx.into_iter().chain(tp_idx).collect();
        matched.sort_unstable();
        matched.dedup();

        matched
            .into_iter()
            .map(|i| {
                let f = &features[i];
                MessagePointer {
                    uuid: f.uuid.clone(),
                    line_number: f.line_number,
                    msg_type: f.kind.clone(),
                    timestamp: f.timestamp.clone(),
                    preview: f.text.chars().take(100).collect(),
                }
            })
            .collect()
    }

    fn compiled_for(&mut self, entity: &Entity) -> Vec<Regex> {
        let id = entity.id();
        if !self.compiled.contains_key(&id) {
            let patterns = compile_patterns(&entity.text_patterns);
            self.compiled.insert(id.clone(), patterns);
        }
        self.compiled[&id].clone()
    }
}

pub fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
}

fn collect_evidence(
    features: &[MsgFeatures],
    entity: &Entity,
    fp_idx: &[usize],
    tp_idx: &[usize],
) -> Vec<String> {
    const MAX_ITEMS: usize = 5;
    let mut evidence = Vec::new();

    'outer: for &i in fp_idx {
        for path in &features[i].paths {
            if path_matches_entity(path, entity) {
                evidence.push(format!("File: {path}"));
                if evidence.len() >= MAX_ITEMS {
                    break 'outer;
                }
                break;
            }
        }
    }

    for &i in tp_idx {
        if evidence.len() >= MAX_ITEMS {
            break;
        }
        let preview: String = features[i].text.chars().take(80).collect();
        evidence.push(format!("Text: ...{}...", preview.replace('\n', " ")));
    }

    evidence.truncate(MAX_ITEMS);
    evidence
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::registry::{EntityDirs, EntityType};
    use crate::history::session::ContentBlock;
    use serde_json::json;

    fn extractor() -> MessageExtractor {
        let dirs = EntityDirs::default();
        MessageExtractor::new(Path::new("/proj"), &dirs.all())
    }

    fn entity_with_paths(patterns: &[&str]) -> Entity {
        Entity {
            entity_type: EntityType::Spec,
            name: "01_foo".into(),
            display_name: "Spec 01: foo".into(),
            directory: "specs/01_foo".into(),
            keywords: vec![],
            path_patterns: patterns.iter().map(|s| s.to_string()).collect(),
            text_patterns: vec![],
        }
    }

    fn msg_with_tool_path(path: &str) -> SessionMessage {
        SessionMessage {
            uuid: format!("u-{path}"),
            msg_type: "assistant".into(),
            role: "assistant".into(),
            blocks: vec![ContentBlock::ToolUse {
                name: "Edit".into(),
                input: json!({ "file_path": path }),
                use_id: "t".into(),
            }],
            ..Default::default()
        }
    }

    fn text_msg(text: &str) -> SessionMessage {
        SessionMessage {
            uuid: format!("u-{}", text.len()),
            msg_type: "user".into(),
            role: "user".into(),
            blocks: vec![ContentBlock::Text { text: text.into() }],
            ..Default::default()
        }
    }

    fn session_of(messages: Vec<SessionMessage>) -> Session {
        Session {
            session_id: "s1".into(),
            file_path: "/tmp/s1.jsonl".into(),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(Weights::default().validate().is_ok());
        let bad = Weights {
            file_path: 0.9,
            text_pattern: 0.9,
            keyword: 0.0,
        };
        assert!(bad.validate().is_err());
        let negative = Weights {
            file_path: -0.5,
            text_pattern: 1.0,
            keyword: 0.5,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn extractor_normalizes_absolute_paths() {
        let ex = extractor();
        let msg = msg_with_tool_path("/proj/specs/01_foo/a.md");
        assert_eq!(ex.extract_file_paths(&msg), vec!["specs/01_foo/a.md"]);
    }

    #[test]
    fn extractor_drops_paths_outside_project() {
        let ex = extractor();
        let msg = msg_with_tool_path("/etc/passwd");
        assert!(ex.extract_file_paths(&msg).is_empty());
    }

    #[test]
    fn extractor_finds_relative_paths_in_text() {
        let ex = extractor();
        let msg = text_msg("please update specs/01_foo/plan.md, thanks");
        assert_eq!(ex.extract_file_paths(&msg), vec!["specs/01_foo/plan.md"]);
    }

    #[test]
    fn extractor_pulls_paths_from_bash_commands() {
        let ex = extractor();
        let msg = SessionMessage {
            msg_type: "assistant".into(),
            role: "assistant".into(),
            blocks: vec![ContentBlock::ToolUse {
                name: "Bash".into(),
                input: json!({ "command": "cat /proj/source/harvester/main.rs" }),
                use_id: "t".into(),
            }],
            ..Default::default()
        };
        assert_eq!(
            ex.extract_file_paths(&msg),
            vec!["source/harvester/main.rs"]
        );
    }

    #[test]
    fn keywords_split_cjk_and_ascii() {
        let ex = extractor();
        let kws = ex.extract_keywords(&text_msg("电池材料 research on Pipeline v2"));
        assert!(kws.contains("电池材料"));
        assert!(kws.contains("research"));
        assert!(kws.contains("pipeline"));
        assert!(!kws.contains("on")); // below the 3-char token minimum
        assert!(!kws.contains("v2"));
    }

    #[test]
    fn file_path_signal_spec_scenario() {
        // 3 of 5 path-bearing messages match: ratio 0.6 beats bonus 0.3
        let ex = extractor();
        let session = session_of(vec![
            msg_with_tool_path("/proj/specs/01_foo/a.md"),
            msg_with_tool_path("/proj/specs/01_foo/b.md"),
            msg_with_tool_path("/proj/specs/01_foo/c.md"),
            msg_with_tool_path("/proj/source/x/x.py"),
            msg_with_tool_path("/proj/source/x/y.py"),
        ]);
        let features = session_features(&ex, &session);
        let entity = entity_with_paths(&["specs/01_foo/"]);

        let (score, matched) = file_path_score(&features, &entity);
        assert_eq!(matched.len(), 3);
        assert!((score - 0.6).abs() < 1e-9);

        let mut classifier =
            CompositeClassifier::new(Weights::default(), DEFAULT_THRESHOLD).unwrap();
        let classification = classifier.classify(&session, &features, &[entity]);
        assert_eq!(classification.matches.len(), 1);
        let m = &classification.matches[0];
        assert!((m.confidence - 0.30).abs() < 1e-9);
        assert_eq!(m.matched_messages, 3);
    }

    #[test]
    fn count_bonus_floors_low_ratio() {
        // 3 matches among 30 path-bearing messages: ratio 0.1, bonus 0.3
        let ex = extractor();
        let mut msgs: Vec<SessionMessage> = (0..27)
            .map(|i| msg_with_tool_path(&format!("/proj/source/other/f{i}.rs")))
            .collect();
        msgs.extend((0..3).map(|i| msg_with_tool_path(&format!("/proj/specs/01_foo/{i}.md"))));
        let session = session_of(msgs);
        let features = session_features(&ex, &session);

        let (score, _) = file_path_score(&features, &entity_with_paths(&["specs/01_foo/"]));
        assert!((score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn no_paths_scores_zero() {
        let ex = extractor();
        let session = session_of(vec![text_msg("no paths here")]);
        let features = session_features(&ex, &session);
        let (score, _) = file_path_score(&features, &entity_with_paths(&["specs/01_foo/"]));
        assert_eq!(score, 0.0);
    }

    #[test]
    fn text_pattern_signal_matches_case_insensitively() {
        let ex = extractor();
        let session = session_of(vec![
            text_msg("working on SPEC #01 today"),
            text_msg("unrelated chatter"),
        ]);
        let features = session_features(&ex, &session);
        let patterns = compile_patterns(&[r"[Ss]pec\s*#?01\b".to_string()]);
        let (score, matched) = text_pattern_score(&features, &patterns);
        assert_eq!(matched, vec![0]);
        // ratio 0.5 beats the single-match bonus 0.1
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn invalid_regexes_are_skipped() {
        let patterns = compile_patterns(&["[broken".to_string(), "fine".to_string()]);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn keyword_signal_is_clamped() {
        let ex = extractor();
        let session = session_of(vec![
            text_msg("the harvester pipeline is ready"),
            text_msg("harvester again"),
        ]);
        let features = session_features(&ex, &session);
        let kws = normalize_keywords(&["data-harvester".to_string()]);
        // both messages hit via the "harvester" fragment: ratio 1.0 → 0.8 cap
        let score = keyword_score(&features, &kws);
        assert!((score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_sessions_are_uncategorized() {
        let ex = extractor();
        let session = session_of(vec![text_msg("nothing relevant at all")]);
        let features = session_features(&ex, &session);
        let mut classifier =
            CompositeClassifier::new(Weights::default(), DEFAULT_THRESHOLD).unwrap();
        let classification =
            classifier.classify(&session, &features, &[entity_with_paths(&["specs/01_foo/"])]);
        assert!(classification.is_uncategorized());
        assert_eq!(classification.primary_entity(), "Uncategorized");
    }

    #[test]
    fn matches_sort_by_descending_confidence() {
        let ex = extractor();
        let session = session_of(vec![
            msg_with_tool_path("/proj/specs/01_foo/a.md"),
            msg_with_tool_path("/proj/specs/01_foo/b.md"),
            msg_with_tool_path("/proj/specs/02_bar/c.md"),
        ]);
        let features = session_features(&ex, &session);
        let foo = entity_with_paths(&["specs/01_foo/"]);
        let mut bar = entity_with_paths(&["specs/02_bar/"]);
        bar.name = "02_bar".into();
        bar.display_name = "Spec 02: bar".into();

        let mut classifier =
            CompositeClassifier::new(Weights::default(), DEFAULT_THRESHOLD).unwrap();
        let classification = classifier.classify(&session, &features, &[bar, foo]);
        assert_eq!(classification.matches.len(), 2);
        assert!(classification.matches[0].confidence >= classification.matches[1].confidence);
        assert_eq!(classification.matches[0].display_name, "Spec 01: foo");
    }

    #[test]
    fn evidence_is_capped_and_descriptive() {
        let ex = extractor();
        let session = session_of(vec![
            msg_with_tool_path("/proj/specs/01_foo/a.md"),
            text_msg("see specs/01_foo/notes.md for details"),
        ]);
        let features = session_features(&ex, &session);
        let entity = entity_with_paths(&["specs/01_foo/"]);
        let (_, fp_idx) = file_path_score(&features, &entity);
        let evidence = collect_evidence(&features, &entity, &fp_idx, &[]);
        assert!(evidence.len() <= 5);
        assert!(evidence[0].starts_with("File: specs/01_foo/"));
    }
}
