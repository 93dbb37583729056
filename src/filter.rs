use crate::models::IndexEntry;
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The filter engine's decision for a conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Keep,
    Archive,
    Exclude,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Keep => "keep",
            Tier::Archive => "archive",
            Tier::Exclude => "exclude",
        }
    }
}

/// `username` accepts either a single string or a list.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn contains(&self, s: &str) -> bool {
        match self {
            OneOrMany::One(v) => v == s,
            OneOrMany::Many(vs) => vs.iter().any(|v| v == s),
        }
    }
}

/// A rule matches only when every present criterion holds.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Criteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_not_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_within_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dormant_days: Option<i64>,
}

fn default_priority() -> i64 {
    10
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FilterRule {
    pub name: String,
    #[serde(rename = "match")]
    pub criteria: Criteria,
    pub tier: Tier,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

fn default_version() -> u32 {
    1
}

fn default_tier() -> Tier {
    Tier::Archive
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FilterPolicy {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_tier")]
    pub default_tier: Tier,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        FilterPolicy {
            version: default_version(),
            default_tier: default_tier(),
            rules: Vec::new(),
        }
    }
}

/// The subset of index-entry data rules can see.
#[derive(Debug, Clone, Default)]
pub struct ConversationMeta {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub is_group: bool,
    pub username: String,
    pub last_message_time: String,
}

pub fn meta_from_entry(entry: &IndexEntry) -> ConversationMeta {
    ConversationMeta {
        id: entry.id.clone(),
        title: entry.title.clone(),
        message_count: entry.message_count,
        is_group: entry
            .metadata
            .get("is_group")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        username: entry
            .metadata
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        last_message_time: entry.last_message_time.clone(),
    }
}

impl FilterPolicy {
    pub fn load(path: &Path) -> Result<FilterPolicy> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading filter policy {}", path.display()))?;
        let policy: FilterPolicy = serde_json::from_str(&content)
            .with_context(|| format!("invalid filter policy {}", path.display()))?;
        Ok(policy)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::store::write_atomic(path, json.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Evaluates against the current clock.
    pub fn evaluate(&self, meta: &ConversationMeta) -> (Tier, String) {
        self.evaluate_at(meta, Utc::now())
    }

    /// Among matching rules, the strictly highest priority wins; ties keep
    /// the first match. No matching rule yields `(default_tier, "default")`.
    pub fn evaluate_at(&self, meta: &ConversationMeta, now: DateTime<Utc>) -> (Tier, String) {
        let mut tier = self.default_tier;
        let mut rule_name = "default".to_string();
        let mut best = i64::MIN;

        for rule in &self.rules {
            if rule.priority > best && matches(&rule.criteria, meta, now) {
                tier = rule.tier;
                rule_name = rule.name.clone();
                best = rule.priority;
            }
        }

        (tier, rule_name)
    }
}

fn matches(c: &Criteria, meta: &ConversationMeta, now: DateTime<Utc>) -> bool {
    if let Some(want) = c.is_group {
        if meta.is_group != want {
            return false;
        }
    }
    if let Some(usernames) = &c.username {
        if !usernames.contains(&meta.username) {
            return false;
        }
    }
    if let Some(kws) = &c.title_contains {
        if !kws.iter().any(|kw| meta.title.contains(kw.as_str())) {
            return false;
        }
    }
    if let Some(kws) = &c.title_not_contains {
        if kws.iter().any(|kw| meta.title.contains(kw.as_str())) {
            return false;
        }
    }
    if let Some(min) = c.min_messages {
        if meta.message_count < min {
            return false;
        }
    }
    if let Some(max) = c.max_messages {
        if meta.message_count > max {
            return false;
        }
    }
    if let Some(days) = c.active_within_days {
        // missing or unparseable timestamp means not recently active
        match parse_time(&meta.last_message_time) {
            Some(last) if last >= now - Duration::days(days) => {}
            _ => return false,
        }
    }
    if let Some(days) = c.dormant_days {
        // missing or unparseable timestamp counts as dormant
        if let Some(last) = parse_time(&meta.last_message_time) {
            if last >= now - Duration::days(days) {
                return false;
            }
        }
    }
    true
}

fn parse_time(ts: &str) -> Option<DateTime<Utc>> {
    if ts.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub kept: usize,
    pub archived: usize,
    pub excluded: usize,
    pub decisions: Vec<(String, Tier, String)>,
}

/// Walks the platform index, evaluates every entry, annotates surviving
/// entries with their tier and moves excluded conversation files into
/// `_excluded/`. With `dry_run` only the decisions are collected.
pub fn apply(
    store: &Store,
    platform: &str,
    policy: &FilterPolicy,
    dry_run: bool,
) -> Result<ApplyOutcome> {
    let index = store.load_index(platform);
    let mut outcome = ApplyOutcome::default();
    let mut surviving: Vec<IndexEntry> = Vec::new();

    for mut entry in index {
        let meta = meta_from_entry(&entry);
        let (tier, rule) = policy.evaluate(&meta);
        outcome
            .decisions
            .push((entry.id.clone(), tier, rule.clone()));

        match tier {
            Tier::Keep => outcome.kept += 1,
            Tier::Archive => outcome.archived += 1,
            Tier::Exclude => outcome.excluded += 1,
        }

        if dry_run {
            continue;
        }

        if tier == Tier::Exclude {
            let src = store.conversation_path(platform, &entry.id);
            if src.exists() {
                let dest_dir = store.excluded_dir(platform);
                fs::create_dir_all(&dest_dir)?;
                fs::rename(&src, dest_dir.join(format!("{}.jsonl", entry.id)))
                    .with_context(|| format!("moving {} to _excluded", entry.id))?;
            }
        } else {
            entry
                .metadata
                .insert("tier".into(), serde_json::json!(tier.as_str()));
            surviving.push(entry);
        }
    }

    if !dry_run {
        store.write_index(platform, &surviving)?;
    }

    Ok(outcome)
}
