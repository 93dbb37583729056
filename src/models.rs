use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Returns the user's home directory as a `PathBuf`.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns `~/.colligo`.
pub fn colligo_dir() -> PathBuf {
    home_dir().join(".colligo")
}

/// Loads `~/.colligo/config` as `key = value` lines. Missing file is fine.
pub fn load_config() -> HashMap<String, String> {
    let path = colligo_dir().join("config");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (k, v) = l.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Resolves the conversation-store root: CLI flag, then `COLLIGO_OUTPUT`,
/// then `output_root` in the config file, then `~/.colligo/harvest`.
pub fn output_root(cli: Option<&str>) -> PathBuf {
    if let Some(dir) = cli {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("COLLIGO_OUTPUT") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(dir) = load_config().get("output_root") {
        return PathBuf::from(dir);
    }
    colligo_dir().join("harvest")
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

fn default_content_type() -> String {
    "text".to_string()
}

fn is_text(s: &str) -> bool {
    s == "text"
}

/// A reference to a non-text payload attached to a message. Sparse: only
/// `type` always serializes; everything else is omitted when empty/zero.
/// `path` is the one field filled in after construction (by the media
/// resolver) — once the ref is attached to a message it is frozen.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MediaRef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

impl MediaRef {
    pub fn new(kind: &str) -> Self {
        MediaRef {
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

/// One message in a platform-neutral conversation. `content_type` is omitted
/// from serialization when it is the default `"text"`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(default = "default_content_type", skip_serializing_if = "is_text")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
}

impl Message {
    pub fn text(role: &str, content: &str, timestamp: &str) -> Self {
        Message {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
            message_id: String::new(),
            content_type: default_content_type(),
            media: Vec::new(),
        }
    }
}

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A platform-neutral conversation. Immutable once emitted by an extractor.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub id: String,
    pub platform: String,
    pub title: String,
    pub participants: Vec<String>,
    pub messages: Vec<Message>,
    pub metadata: Metadata,
}

impl Conversation {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn first_message_time(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.timestamp.as_str())
            .unwrap_or("")
    }

    pub fn last_message_time(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.timestamp.as_str())
            .unwrap_or("")
    }

    /// Index entry without the message bodies.
    pub fn to_index_entry(&self) -> IndexEntry {
        IndexEntry {
            id: self.id.clone(),
            platform: self.platform.clone(),
            title: self.title.clone(),
            participants: self.participants.clone(),
            message_count: self.message_count(),
            first_message_time: self.first_message_time().to_string(),
            last_message_time: self.last_message_time().to_string(),
            metadata: self.metadata.clone(),
        }
    }
}

/// One entry in a platform's `index.json`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IndexEntry {
    pub id: String,
    pub platform: String,
    pub title: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub first_message_time: String,
    #[serde(default)]
    pub last_message_time: String,
    #[serde(default)]
    pub metadata: Metadata,
}
