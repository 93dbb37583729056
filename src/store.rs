use crate::models::{Conversation, IndexEntry, Message};
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Per-platform conversation store: one JSONL file per conversation plus an
/// `index.json` of entries without bodies. One extraction writes a platform
/// at a time; there is no cross-process arbitration.
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn platform_dir(&self, platform: &str) -> PathBuf {
        self.root.join(platform)
    }

    pub fn conversation_path(&self, platform: &str, id: &str) -> PathBuf {
        self.platform_dir(platform).join(format!("{id}.jsonl"))
    }

    pub fn index_path(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("index.json")
    }

    pub fn state_path(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("state.json")
    }

    pub fn excluded_dir(&self, platform: &str) -> PathBuf {
        self.platform_dir(platform).join("_excluded")
    }

    /// Writes the conversation as one message JSON per line and updates the
    /// platform index, replacing any existing entry with the same id.
    pub fn save_conversation(&self, conv: &Conversation) -> Result<PathBuf> {
        let path = self.conversation_path(&conv.platform, &conv.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("creating platform directory")?;
        }

        let mut body = String::new();
        for msg in &conv.messages {
            body.push_str(&serde_json::to_string(msg).context("serializing message")?);
            body.push('\n');
        }
        write_atomic(&path, body.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;

        let mut index = self.load_index(&conv.platform);
        let entry = conv.to_index_entry();
        match index.iter_mut().find(|e| e.id == conv.id) {
            Some(existing) => *existing = entry,
            None => index.push(entry),
        }
        self.write_index(&conv.platform, &index)?;

        Ok(path)
    }

    /// Reads a conversation back; metadata comes from the index entry.
    pub fn load_conversation(&self, platform: &str, id: &str) -> Result<Conversation> {
        let path = self.conversation_path(platform, id);
        let file =
            File::open(&path).with_context(|| format!("opening {}", path.display()))?;

        let mut messages: Vec<Message> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(msg) => messages.push(msg),
                Err(_) => continue,
            }
        }

        let index = self.load_index(platform);
        let entry = index.into_iter().find(|e| e.id == id).unwrap_or_default();

        Ok(Conversation {
            id: id.to_string(),
            platform: platform.to_string(),
            title: entry.title,
            participants: entry.participants,
            messages,
            metadata: entry.metadata,
        })
    }

    pub fn load_index(&self, platform: &str) -> Vec<IndexEntry> {
        let path = self.index_path(platform);
        let Ok(content) = fs::read_to_string(&path) else {
            return Vec::new();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    pub fn write_index(&self, platform: &str, index: &[IndexEntry]) -> Result<()> {
        let path = self.index_path(platform);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(index).context("serializing index")?;
        write_atomic(&path, json.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Platforms that have an index file, sorted.
    pub fn list_platforms(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut platforms: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir() && e.path().join("index.json").exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        platforms.sort();
        platforms
    }
}

/// Write-temp-then-rename so an interrupted run never leaves a half-written
/// file visible.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn sample_conversation(id: &str, n: usize) -> Conversation {
        let mut metadata = Metadata::new();
        metadata.insert("is_group".into(), serde_json::json!(false));
        metadata.insert("username".into(), serde_json::json!("alice"));
        Conversation {
            id: id.to_string(),
            platform: "wechat".into(),
            title: "Alice".into(),
            participants: vec!["alice".into()],
            messages: (0..n)
                .map(|i| {
                    Message::text("user", &format!("msg {i}"), &format!("2026-01-0{}T00:00:00+00:00", i + 1))
                })
                .collect(),
            metadata,
        }
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let conv = sample_conversation("wechat-alice", 3);

        let path = store.save_conversation(&conv).unwrap();
        assert!(path.exists());

        let loaded = store.load_conversation("wechat", "wechat-alice").unwrap();
        assert_eq!(loaded.messages, conv.messages);
        assert_eq!(loaded.title, "Alice");
        assert_eq!(loaded.metadata["username"], "alice");
    }

    #[test]
    fn conversation_file_is_one_json_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.save_conversation(&sample_conversation("wechat-alice", 2)).unwrap();

        let content =
            fs::read_to_string(store.conversation_path("wechat", "wechat-alice")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            // sparse: text messages never carry content_type or media
            assert!(v.get("content_type").is_none());
            assert!(v.get("media").is_none());
        }
    }

    #[test]
    fn index_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        store.save_conversation(&sample_conversation("wechat-alice", 2)).unwrap();
        store.save_conversation(&sample_conversation("wechat-alice", 5)).unwrap();
        store.save_conversation(&sample_conversation("wechat-bob", 1)).unwrap();

        let index = store.load_index("wechat");
        assert_eq!(index.len(), 2);
        let alice = index.iter().find(|e| e.id == "wechat-alice").unwrap();
        assert_eq!(alice.message_count, 5);
    }

    #[test]
    fn list_platforms_requires_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        fs::create_dir_all(dir.path().join("empty-platform")).unwrap();
        store.save_conversation(&sample_conversation("wechat-alice", 1)).unwrap();

        assert_eq!(store.list_platforms(), vec!["wechat".to_string()]);
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn load_conversation_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.save_conversation(&sample_conversation("wechat-alice", 1)).unwrap();

        let path = store.conversation_path("wechat", "wechat-alice");
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        fs::write(&path, content).unwrap();

        let loaded = store.load_conversation("wechat", "wechat-alice").unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }
}
