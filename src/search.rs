use crate::fmt::{ceprintln, cprintln, one_line, trunc, BOLD, CYAN, DIM, RESET};
use crate::models::{IndexEntry, Message};
use crate::store::Store;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

pub struct SearchResult {
    pub platform: String,
    pub conversation_id: String,
    pub title: String,
    pub message: Message,
    pub score: f64,
}

/// Multi-keyword AND search across the store. Keywords are lowercased and
/// whitespace-split; a message matches when every keyword occurs in its
/// content or in its media filenames/descriptions.
pub fn search(
    store: &Store,
    query: &str,
    platform: Option<&str>,
    max_results: usize,
) -> Vec<SearchResult> {
    let keywords: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    if keywords.is_empty() {
        return Vec::new();
    }

    let platforms = match platform {
        Some(p) => vec![p.to_string()],
        None => store.list_platforms(),
    };

    let mut results = Vec::new();
    'platforms: for plat in &platforms {
        for entry in store.load_index(plat) {
            search_conversation(store, plat, &entry, &keywords, &mut results);
            if results.len() >= max_results * 3 {
                break 'platforms;
            }
        }
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(max_results);
    results
}

fn search_conversation(
    store: &Store,
    platform: &str,
    entry: &IndexEntry,
    keywords: &[String],
    results: &mut Vec<SearchResult>,
) {
    let path = store.conversation_path(platform, &entry.id);
    let Ok(file) = File::open(&path) else {
        return;
    };

    let title_lower = entry.title.to_lowercase();
    let title_bonus = if keywords.iter().all(|kw| title_lower.contains(kw.as_str())) {
        0.5
    } else {
        0.0
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Message>(&line) else {
            continue;
        };

        let mut searchable = msg.content.to_lowercase();
        for m in &msg.media {
            if !m.filename.is_empty() {
                searchable.push(' ');
                searchable.push_str(&m.filename.to_lowercase());
            }
            if !m.description.is_empty() {
                searchable.push(' ');
                searchable.push_str(&m.description.to_lowercase());
            }
        }

        if keywords.iter().all(|kw| searchable.contains(kw.as_str())) {
            let occurrences: usize = keywords.iter().map(|kw| searchable.matches(kw.as_str()).count()).sum();
            let score = (occurrences as f64 / 10.0).min(1.0) + title_bonus;
            results.push(SearchResult {
                platform: platform.to_string(),
                conversation_id: entry.id.clone(),
                title: entry.title.clone(),
                message: msg,
                score,
            });
        }
    }
}

#[derive(Debug, Default)]
pub struct PlatformStats {
    pub conversations: usize,
    pub messages: usize,
}

pub fn stats(store: &Store) -> BTreeMap<String, PlatformStats> {
    let mut out = BTreeMap::new();
    for plat in store.list_platforms() {
        let index = store.load_index(&plat);
        let messages = index.iter().map(|e| e.message_count).sum();
        out.insert(
            plat,
            PlatformStats {
                conversations: index.len(),
                messages,
            },
        );
    }
    out
}

pub fn run_search(store: &Store, query: &str, platform: Option<&str>, limit: usize) -> Result<()> {
    cprintln!("search: {BOLD}\"{query}\"{RESET}{}", match platform {
        Some(p) => format!(" {DIM}(platform: {p}){RESET}"),
        None => String::new(),
    });

    let results = search(store, query, platform, limit);
    if results.is_empty() {
        println!("no matches.");
        return Ok(());
    }

    for r in &results {
        let ts = r.message.timestamp.get(..19).unwrap_or(&r.message.timestamp);
        let preview = trunc(&one_line(&r.message.content), 120);
        println!();
        cprintln!("  {DIM}[{}]{RESET} {CYAN}{}{RESET}", r.platform, trunc(&r.title, 40));
        cprintln!("  {:<9} {DIM}{ts}{RESET}  {preview}", r.message.role);
    }

    println!();
    println!("{} result(s)", results.len());
    Ok(())
}

pub fn run_list(store: &Store, platform: Option<&str>) -> Result<()> {
    let platforms = match platform {
        Some(p) => vec![p.to_string()],
        None => store.list_platforms(),
    };
    if platforms.is_empty() {
        println!("no conversations imported yet.");
        return Ok(());
    }

    for plat in &platforms {
        let index = store.load_index(plat);
        println!();
        cprintln!("{BOLD}[{plat}]{RESET} {} conversation(s)", index.len());
        for entry in &index {
            let title = if entry.title.is_empty() { "(untitled)" } else { &entry.title };
            cprintln!(
                "  {DIM}{}{RESET}  {}  {DIM}{} msgs{RESET}",
                trunc(&entry.id, 30),
                trunc(title, 50),
                entry.message_count
            );
        }
    }
    println!();
    Ok(())
}

pub fn run_view(store: &Store, query: &str, limit: usize, all: bool) -> Result<()> {
    let needle = query.to_lowercase();
    let mut matches: Vec<(String, IndexEntry)> = Vec::new();
    for plat in store.list_platforms() {
        for entry in store.load_index(&plat) {
            if entry.id.to_lowercase().contains(&needle)
                || entry.title.to_lowercase().contains(&needle)
            {
                matches.push((plat.clone(), entry));
            }
        }
    }

    if matches.is_empty() {
        println!("no conversation matches \"{query}\".");
        println!("hint: 'colligo list' shows all conversations, 'colligo search' scans content.");
        return Ok(());
    }

    if matches.len() > 1 && !all {
        println!("{} matching conversations:", matches.len());
        for (plat, entry) in matches.iter().take(20) {
            cprintln!(
                "  {DIM}[{plat}]{RESET} {}  {}  {DIM}{} msgs{RESET}",
                trunc(&entry.id, 30),
                trunc(&entry.title, 50),
                entry.message_count
            );
        }
        if matches.len() > 20 {
            println!("  ... and {} more", matches.len() - 20);
        }
        println!("\nuse a narrower query, or --all to view every match.");
        return Ok(());
    }

    let show: Vec<&(String, IndexEntry)> = if all {
        matches.iter().collect()
    } else {
        matches.iter().take(1).collect()
    };

    for (plat, entry) in show {
        println!();
        cprintln!("{BOLD}[{plat}] {}{RESET}", entry.title);
        cprintln!("{DIM}{} · {} message(s){RESET}", entry.id, entry.message_count);

        let Ok(conv) = store.load_conversation(plat, &entry.id) else {
            ceprintln!("{DIM}  (conversation file missing){RESET}");
            continue;
        };

        let mut shown = 0usize;
        for msg in &conv.messages {
            let ts = msg.timestamp.get(..19).unwrap_or(&msg.timestamp);
            let marker = if msg.role == "user" { "→" } else { "←" };
            let content = trunc(&msg.content, 500);
            println!();
            cprintln!("{marker} {DIM}[{ts}]{RESET} {}", msg.role);
            println!("  {content}");
            shown += 1;
            if limit > 0 && shown >= limit {
                let remaining = conv.messages.len().saturating_sub(shown);
                if remaining > 0 {
                    println!("\n  ... {remaining} more message(s) (use --limit 0 for all)");
                }
                break;
            }
        }
    }
    Ok(())
}

pub fn run_stats(store: &Store) -> Result<()> {
    let per_platform = stats(store);
    if per_platform.is_empty() {
        println!("no conversations imported yet.");
        return Ok(());
    }

    let mut total_convs = 0;
    let mut total_msgs = 0;
    println!();
    for (plat, s) in &per_platform {
        cprintln!(
            "  {CYAN}{plat}{RESET}: {} conversation(s), {} message(s)",
            s.conversations,
            s.messages
        );
        total_convs += s.conversations;
        total_msgs += s.messages;
    }
    println!();
    cprintln!(
        "{BOLD}total{RESET}: {total_convs} conversation(s), {total_msgs} message(s) across {} platform(s)",
        per_platform.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, MediaRef, Metadata};

    fn store_with_sample() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut file_msg = Message::text("user", "[file: plan.pdf (1.0MB)]", "2026-01-02T00:00:00+00:00");
        file_msg.content_type = "link".into();
        file_msg.media.push(MediaRef {
            kind: "file".into(),
            filename: "plan.pdf".into(),
            description: "quarterly plan".into(),
            ..Default::default()
        });

        let conv = Conversation {
            id: "wechat-alice".into(),
            platform: "wechat".into(),
            title: "Alice Zhang".into(),
            participants: vec!["alice".into()],
            messages: vec![
                Message::text("user", "did you see the decorator trick?", "2026-01-01T00:00:00+00:00"),
                Message::text("assistant", "the decorator trick is neat", "2026-01-01T00:01:00+00:00"),
                file_msg,
            ],
            metadata: Metadata::new(),
        };
        store.save_conversation(&conv).unwrap();
        (dir, store)
    }

    #[test]
    fn search_matches_all_keywords() {
        let (_dir, store) = store_with_sample();
        let results = search(&store, "decorator trick", None, 10);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_requires_every_keyword() {
        let (_dir, store) = store_with_sample();
        let results = search(&store, "decorator missingword", None, 10);
        assert!(results.is_empty());
    }

    #[test]
    fn search_covers_media_fields() {
        let (_dir, store) = store_with_sample();
        let by_name = search(&store, "plan.pdf", None, 10);
        assert_eq!(by_name.len(), 1);
        let by_desc = search(&store, "quarterly", None, 10);
        assert_eq!(by_desc.len(), 1);
    }

    #[test]
    fn title_match_boosts_score() {
        let (_dir, store) = store_with_sample();
        let results = search(&store, "alice", None, 10);
        // no message contains "alice"; title bonus alone does not create hits
        assert!(results.is_empty());

        let results = search(&store, "decorator", None, 10);
        assert!(results.iter().all(|r| r.score <= 1.0));
    }

    #[test]
    fn results_are_sorted_by_score() {
        let (_dir, store) = store_with_sample();
        let results = search(&store, "decorator", None, 10);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn stats_counts_messages() {
        let (_dir, store) = store_with_sample();
        let s = stats(&store);
        assert_eq!(s["wechat"].conversations, 1);
        assert_eq!(s["wechat"].messages, 3);
    }
}
