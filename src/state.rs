use crate::models::Conversation;
use crate::store::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-platform incremental-extraction state, kept at
/// `<root>/<platform>/state.json`. Read at run start, rewritten once at run
/// end; a partial run never advances it.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ScanState {
    #[serde(default)]
    pub last_run: String,
    #[serde(default)]
    pub conversations: BTreeMap<String, ConversationState>,
}

#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub message_count: usize,
    #[serde(default)]
    pub last_message_time: String,
}

impl ScanState {
    pub fn load(path: &Path) -> ScanState {
        let Ok(content) = std::fs::read_to_string(path) else {
            return ScanState::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// New conversation, or message count / last timestamp moved.
    pub fn is_changed(&self, conv: &Conversation) -> bool {
        match self.conversations.get(&conv.id) {
            None => true,
            Some(existing) => {
                existing.message_count != conv.message_count()
                    || existing.last_message_time != conv.last_message_time()
            }
        }
    }

    pub fn record(&mut self, conv: &Conversation) {
        self.conversations.insert(
            conv.id.clone(),
            ConversationState {
                message_count: conv.message_count(),
                last_message_time: conv.last_message_time().to_string(),
            },
        );
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.last_run = chrono::Utc::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing state")?;
        write_atomic(path, json.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
