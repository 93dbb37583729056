use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Tool results are truncated to this many characters when flattened.
const TOOL_RESULT_CAP: usize = 500;

/// A typed content block of one transcript record.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { name: String, input: Value, use_id: String },
    ToolResult { text: String, use_id: String },
    Thinking { text: String },
}

impl ContentBlock {
    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

/// One retained JSONL record.
#[derive(Debug, Clone, Default)]
pub struct SessionMessage {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    /// `user`, `assistant`, `system`, `progress`, ...
    pub msg_type: String,
    pub role: String,
    pub blocks: Vec<ContentBlock>,
    pub timestamp: String,
    pub session_id: String,
    /// 0-based line ordinal in the JSONL file.
    pub line_number: usize,
    pub is_sidechain: bool,
    pub cwd: String,
}

impl SessionMessage {
    /// Joined text of all text blocks.
    pub fn text_content(&self) -> String {
        let parts: Vec<&str> = self
            .blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, input, .. } => Some((name.as_str(), input)),
            _ => None,
        })
    }
}

/// A whole transcript.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub session_id: String,
    pub file_path: String,
    pub messages: Vec<SessionMessage>,
    pub start_time: String,
    pub end_time: String,
    pub version: String,
}

impl Session {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == "user").count()
    }
}

/// Streams a JSONL transcript into `SessionMessage`s. Malformed lines are
/// skipped silently; `file-history-snapshot` records are dropped; thinking
/// blocks and sidechain records are dropped when the flags say so.
pub struct JsonlReader {
    pub exclude_thinking: bool,
    pub exclude_sidechains: bool,
}

impl Default for JsonlReader {
    fn default() -> Self {
        JsonlReader {
            exclude_thinking: true,
            exclude_sidechains: true,
        }
    }
}

impl JsonlReader {
    pub fn read_session(&self, file_path: &Path) -> Result<Session> {
        let file = File::open(file_path)
            .with_context(|| format!("opening {}", file_path.display()))?;

        let mut session = Session {
            session_id: file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_string(),
            file_path: file_path.to_string_lossy().into_owned(),
            ..Default::default()
        };

        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else { continue };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(obj) = serde_json::from_str::<Value>(line) else {
                continue;
            };

            if session.version.is_empty() {
                if let Some(v) = obj.get("version").and_then(|v| v.as_str()) {
                    session.version = v.to_string();
                }
            }

            let Some(msg) = self.parse_record(&obj, line_number) else {
                continue;
            };
            if self.exclude_sidechains && msg.is_sidechain {
                continue;
            }
            session.messages.push(msg);
        }

        if let Some(first) = session.messages.first() {
            session.start_time = first.timestamp.clone();
        }
        if let Some(last) = session.messages.last() {
            session.end_time = last.timestamp.clone();
        }
        if let Some(sid) = session
            .messages
            .iter()
            .find(|m| !m.session_id.is_empty())
            .map(|m| m.session_id.clone())
        {
            session.session_id = sid;
        }

        Ok(session)
    }

    fn parse_record(&self, obj: &Value, line_number: usize) -> Option<SessionMessage> {
        let msg_type = obj.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if msg_type == "file-history-snapshot" {
            return None;
        }

        let mut role = String::new();
        let mut blocks = Vec::new();

        if let Some(message) = obj.get("message").and_then(|v| v.as_object()) {
            role = message
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            match message.get("content") {
                Some(Value::String(text)) if !text.is_empty() => {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Some(block) = self.parse_block(item) {
                            blocks.push(block);
                        }
                    }
                }
                _ => {}
            }
        } else if let Some(text) = obj.get("content").and_then(|v| v.as_str()) {
            // system records carry their content at top level
            if !text.is_empty() {
                blocks.push(ContentBlock::Text { text: text.to_string() });
            }
        }

        if blocks.is_empty() && !matches!(msg_type, "user" | "assistant" | "system") {
            return None;
        }

        Some(SessionMessage {
            uuid: str_field(obj, "uuid"),
            parent_uuid: obj
                .get("parentUuid")
                .and_then(|v| v.as_str())
                .map(String::from),
            msg_type: msg_type.to_string(),
            role,
            blocks,
            timestamp: str_field(obj, "timestamp"),
            session_id: str_field(obj, "sessionId"),
            line_number,
            is_sidechain: obj
                .get("isSidechain")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            cwd: str_field(obj, "cwd"),
        })
    }

    fn parse_block(&self, block: &Value) -> Option<ContentBlock> {
        match block.get("type").and_then(|v| v.as_str())? {
            "text" => Some(ContentBlock::Text {
                text: str_field(block, "text"),
            }),
            "thinking" => {
                if self.exclude_thinking {
                    return None;
                }
                Some(ContentBlock::Thinking {
                    text: str_field(block, "thinking"),
                })
            }
            "tool_use" => Some(ContentBlock::ToolUse {
                name: str_field(block, "name"),
                input: block.get("input").cloned().unwrap_or(Value::Null),
                use_id: str_field(block, "id"),
            }),
            "tool_result" => {
                // content is polymorphic: a string, or a list of typed items
                let text = match block.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Array(items)) => {
                        let parts: Vec<String> = items
                            .iter()
                            .filter(|i| {
                                i.get("type").and_then(|t| t.as_str()) == Some("text")
                            })
                            .map(|i| str_field(i, "text"))
                            .collect();
                        parts.join("\n")
                    }
                    _ => String::new(),
                };
                Some(ContentBlock::ToolResult {
                    text: cap_chars(&text, TOOL_RESULT_CAP),
                    use_id: str_field(block, "tool_use_id"),
                })
            }
            _ => None,
        }
    }

    /// All `.jsonl` files in a transcript directory, sorted by name.
    pub fn list_session_files(&self, sessions_dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(sessions_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .collect();
        files.sort();
        files
    }
}

fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn cap_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
