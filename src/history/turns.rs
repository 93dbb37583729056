use super::session::{ContentBlock, Session, SessionMessage};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

pub const LONG_PROMPT_THRESHOLD: usize = 500;
pub const TITLE_MAX: usize = 60;

/// Tags injected by the agent harness, stripped from prompts together with
/// their content.
const STRIP_TAGS: &[&str] = &[
    "local-command-caveat",
    "local-command-stdout",
    "local-command-stderr",
    "system-reminder",
    "command-name",
    "command-args",
];

/// Tags whose inner text is kept.
const UNWRAP_TAGS: &[&str] = &["command-message"];

/// One user prompt plus the contiguous assistant activity that follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    /// 1-based and contiguous within a session.
    pub number: usize,
    pub timestamp: String,
    pub title: String,
    pub prompt: String,
    pub response: String,
    pub tool_counts: BTreeMap<String, usize>,
    pub tool_narrative: String,
    pub is_long_prompt: bool,
}

impl Turn {
    /// `Bash (1), Read (4)` — names sorted.
    pub fn tool_summary_line(&self) -> String {
        self.tool_counts
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `HH:MM` from the ISO timestamp.
    pub fn time_short(&self) -> &str {
        if self.timestamp.len() >= 16 {
            &self.timestamp[11..16]
        } else {
            &self.timestamp
        }
    }
}

/// Splits a linear message stream into turns. Tool-result user messages are
/// part of the running turn, not new prompts.
pub struct TurnExtractor {
    /// When set, file paths in tool narratives are shortened to
    /// project-relative form.
    pub project_root: Option<String>,
}

impl Default for TurnExtractor {
    fn default() -> Self {
        TurnExtractor { project_root: None }
    }
}

impl TurnExtractor {
    pub fn extract_turns(&self, session: &Session) -> Vec<Turn> {
        let mut turns: Vec<Turn> = Vec::new();
        let mut pending_prompt: Option<String> = None;
        let mut pending_ts = String::new();
        let mut pending_asst: Vec<&SessionMessage> = Vec::new();

        for msg in &session.messages {
            if matches!(msg.msg_type.as_str(), "progress" | "file-history-snapshot" | "system") {
                continue;
            }

            if msg.msg_type == "user" || msg.role == "user" {
                if is_tool_result_message(msg) {
                    pending_asst.push(msg);
                    continue;
                }
                if let Some(prompt) = pending_prompt.take() {
                    if let Some(turn) =
                        self.build_turn(turns.len() + 1, &pending_ts, &prompt, &pending_asst)
                    {
                        turns.push(turn);
                    }
                }
                pending_prompt = Some(msg.text_content());
                pending_ts = msg.timestamp.clone();
                pending_asst.clear();
            } else if msg.msg_type == "assistant" || msg.role == "assistant" {
                pending_asst.push(msg);
            }
        }

        if let Some(prompt) = pending_prompt {
            if let Some(turn) =
                self.build_turn(turns.len() + 1, &pending_ts, &prompt, &pending_asst)
            {
                turns.push(turn);
            }
        }

        turns
    }

    fn build_turn(
        &self,
        number: usize,
        timestamp: &str,
        prompt: &str,
        assistant_msgs: &[&SessionMessage],
    ) -> Option<Turn> {
        let prompt = clean_prompt(prompt);
        if prompt.is_empty() {
            return None;
        }

        let response = final_response(assistant_msgs);
        let tool_counts = count_tools(assistant_msgs);
        let tool_narrative = self.build_narrative(assistant_msgs);
        let is_long_prompt = prompt.chars().count() > LONG_PROMPT_THRESHOLD;
        let title = auto_title(&prompt);

        Some(Turn {
            number,
            timestamp: timestamp.to_string(),
            title,
            prompt,
            response,
            tool_counts,
            tool_narrative,
            is_long_prompt,
        })
    }

    /// File paths touched plus up to three Bash descriptions; at most five
    /// path entries are listed before a `+N more` suffix.
    fn build_narrative(&self, assistant_msgs: &[&SessionMessage]) -> String {
        let mut files: BTreeSet<String> = BTreeSet::new();
        let mut bash_descriptions: Vec<String> = Vec::new();

        for msg in assistant_msgs {
            if msg.role != "assistant" && msg.msg_type != "assistant" {
                continue;
            }
            for (name, input) in msg.tool_uses() {
                for key in ["file_path", "path", "notebook_path"] {
                    if let Some(val) = input.get(key).and_then(|v| v.as_str()) {
                        if !val.is_empty() {
                            files.insert(self.shorten_path(val));
                        }
                    }
                }
                if name == "Bash" {
                    if let Some(desc) = input.get("description").and_then(|v| v.as_str()) {
                        if !desc.is_empty() {
                            bash_descriptions.push(desc.to_string());
                        }
                    }
                }
                if name == "Glob" || name == "Grep" {
                    if let Some(pattern) = input.get("pattern").and_then(|v| v.as_str()) {
                        if !pattern.is_empty() {
                            let short: String = pattern.chars().take(40).collect();
                            files.insert(format!("pattern:{short}"));
                        }
                    }
                }
            }
        }

        let mut parts = Vec::new();
        if !files.is_empty() {
            let list: Vec<&String> = files.iter().collect();
            if list.len() > 5 {
                let head: Vec<&str> = list[..5].iter().map(|s| s.as_str()).collect();
                parts.push(format!("{} +{} more", head.join(", "), list.len() - 5));
            } else {
                let all: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
                parts.push(all.join(", "));
            }
        }
        if !bash_descriptions.is_empty() {
            let head: Vec<&str> = bash_descriptions
                .iter()
                .take(3)
                .map(|s| s.as_str())
                .collect();
            parts.push(head.join("; "));
        }

        parts.join(" -- ")
    }

    fn shorten_path(&self, path: &str) -> String {
        let Some(root) = &self.project_root else {
            return path.to_string();
        };
        let root_slash = format!("{}/", root.trim_end_matches('/'));
        if let Some(rest) = path.strip_prefix(&root_slash) {
            return rest.to_string();
        }
        // paths referencing the project dir from elsewhere
        if let Some(name) = root.trim_end_matches('/').rsplit('/').next() {
            let marker = format!("{name}/");
            if let Some(idx) = path.find(&marker) {
                return path[idx + marker.len()..].to_string();
            }
        }
        path.to_string()
    }
}

/// A user message that only carries tool results back to the assistant.
fn is_tool_result_message(msg: &SessionMessage) -> bool {
    if msg.blocks.is_empty() {
        return false;
    }
    let has_tool_result = msg.blocks.iter().any(|b| b.is_tool_result());
    let has_text = msg.blocks.iter().any(|b| match b {
        ContentBlock::Text { text } => !text.trim().is_empty(),
        _ => false,
    });
    has_tool_result && !has_text
}

fn strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let tags = STRIP_TAGS.join("|");
        Regex::new(&format!(r"<(?:{tags})>[\s\S]*?</(?:{tags})>")).unwrap()
    })
}

fn unwrap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let tags = UNWRAP_TAGS.join("|");
        Regex::new(&format!(r"<(?:{tags})>([\s\S]*?)</(?:{tags})>")).unwrap()
    })
}

/// Strips system-injected tags (tag + content) and unwraps command-message.
/// Returns empty when nothing human-readable remains.
pub fn clean_prompt(text: &str) -> String {
    let cleaned = strip_re().replace_all(text, "");
    let cleaned = unwrap_re().replace_all(&cleaned, "$1");
    cleaned.trim().to_string()
}

/// Text emitted after the last tool_use across the accumulated assistant
/// messages; falls back to all text blocks when no such text exists (which
/// can surface the assistant's pre-tool preamble — kept deliberately).
fn final_response(assistant_msgs: &[&SessionMessage]) -> String {
    let blocks: Vec<&ContentBlock> = assistant_msgs
        .iter()
        .filter(|m| m.role == "assistant" || m.msg_type == "assistant")
        .flat_map(|m| m.blocks.iter())
        .collect();
    if blocks.is_empty() {
        return String::new();
    }

    let last_tool_idx = blocks.iter().rposition(|b| b.is_tool_use());
    let start = last_tool_idx.map(|i| i + 1).unwrap_or(0);

    let texts_from = |blocks: &[&ContentBlock]| -> Vec<String> {
        blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } if !text.trim().is_empty() => {
                    Some(text.trim().to_string())
                }
                _ => None,
            })
            .collect()
    };

    let after = texts_from(&blocks[start..]);
    if !after.is_empty() {
        return after.join("\n\n");
    }
    texts_from(&blocks).join("\n\n")
}

fn count_tools(assistant_msgs: &[&SessionMessage]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for msg in assistant_msgs {
        if msg.role != "assistant" && msg.msg_type != "assistant" {
            continue;
        }
        for (name, _) in msg.tool_uses() {
            if !name.is_empty() {
                *counts.entry(name.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

/// First line of the prompt, `#` runs stripped, word-boundary truncated.
pub fn auto_title(prompt: &str) -> String {
    if prompt.is_empty() {
        return "(empty prompt)".to_string();
    }
    let first_line = prompt.lines().next().unwrap_or("").trim();
    let first_line = first_line.trim_start_matches('#').trim_start();

    let chars: Vec<char> = first_line.chars().collect();
    if chars.len() > TITLE_MAX {
        let truncated: String = chars[..TITLE_MAX].iter().collect();
        let cut = match truncated.rfind(' ') {
            // only break at a word when it does not cost half the title
            Some(pos) if pos > TITLE_MAX / 2 => &truncated[..pos],
            _ => truncated.as_str(),
        };
        return format!("{cut}...");
    }

    if first_line.is_empty() {
        prompt.chars().take(TITLE_MAX).collect()
    } else {
        first_line.to_string()
    }
}

/// Person owning the transcript: `/Users/<name>/` from the file path, then
/// from the first messages' cwd, else `unknown`.
pub fn extract_person(session: &Session) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/Users/([^/]+)/").unwrap());

    if let Some(caps) = re.captures(&session.file_path) {
        return caps[1].to_string();
    }
    for msg in session.messages.iter().take(5) {
        if let Some(caps) = re.captures(&msg.cwd) {
            return caps[1].to_string();
        }
    }
    "unknown".to_string()
}
