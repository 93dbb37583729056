use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::process::Command;

fn colligo() -> Command {
    Command::new(env!("CARGO_BIN_EXE_colligo"))
}

fn make_plain_chat_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE Msg_3fa9c1 (
             local_id INTEGER, server_id INTEGER, local_type INTEGER,
             real_sender_id INTEGER, create_time INTEGER, status INTEGER,
             message_content TEXT, WCDB_CT_message_content INTEGER
         );
         INSERT INTO Msg_3fa9c1 VALUES (1, 101, 1, 9, 1700000000, 3, 'hello there', 0);
         INSERT INTO Msg_3fa9c1 VALUES (2, 102, 1, 9, 1700000100, 2, 'hi, how are you', 0);
         INSERT INTO Msg_3fa9c1 VALUES (3, 103, 3, 9, 1700000200, 2, '<img/>', 0);",
    )
    .unwrap();
}

fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn extract_store_and_search_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("message_0.db");
    make_plain_chat_db(&db);
    let out = dir.path().join("harvest");

    let status = colligo()
        .args(["wechat", db.to_str().unwrap(), "--output", out.to_str().unwrap()])
        .status()
        .unwrap();
    assert!(status.success());

    // one conversation keyed by the table hash
    let conv_path = out.join("wechat/wechat-3fa9c1.jsonl");
    let messages = read_lines(&conv_path);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["content"], "hello there");
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    // sparse serialization: text rows carry no content_type/media
    assert!(messages[0].get("content_type").is_none());
    assert!(messages[0].get("media").is_none());
    // image placeholder row keeps both
    assert_eq!(messages[2]["content"], "[image]");
    assert_eq!(messages[2]["content_type"], "image");
    assert_eq!(messages[2]["media"][0]["type"], "image");

    // index entry
    let index: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(out.join("wechat/index.json")).unwrap()).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0]["id"], "wechat-3fa9c1");
    assert_eq!(index[0]["message_count"], 3);
    assert_eq!(index[0]["metadata"]["is_group"], false);

    // state written after the successful run
    let state: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("wechat/state.json")).unwrap()).unwrap();
    assert_eq!(state["conversations"]["wechat-3fa9c1"]["message_count"], 3);

    // search finds the message content
    let output = colligo()
        .args(["search", "hello", "--output", out.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello there"));
    assert!(stdout.contains("1 result(s)"));
}

#[test]
fn incremental_run_skips_unchanged_conversations() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("message_0.db");
    make_plain_chat_db(&db);
    let out = dir.path().join("harvest");

    let first = colligo()
        .args(["wechat", db.to_str().unwrap(), "--output", out.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(first.status.success());
    assert!(String::from_utf8_lossy(&first.stdout).contains("1 conversation(s) imported"));

    let second = colligo()
        .args([
            "wechat",
            db.to_str().unwrap(),
            "--incremental",
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("0 conversation(s) imported"));
    assert!(stdout.contains("1 unchanged skipped"));
}

#[test]
fn filter_moves_excluded_conversations() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("message_0.db");
    make_plain_chat_db(&db);
    let out = dir.path().join("harvest");

    assert!(colligo()
        .args(["wechat", db.to_str().unwrap(), "--output", out.to_str().unwrap()])
        .status()
        .unwrap()
        .success());

    let policy = dir.path().join("policy.json");
    fs::write(
        &policy,
        r#"{
            "version": 1,
            "default_tier": "keep",
            "rules": [
                {"name": "drop-hash-titles", "match": {"title_contains": ["3fa9c1"]}, "tier": "exclude", "priority": 50}
            ]
        }"#,
    )
    .unwrap();

    // dry run first: nothing moves
    let dry = colligo()
        .args([
            "filter",
            "--policy",
            policy.to_str().unwrap(),
            "--dry-run",
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(dry.status.success());
    assert!(String::from_utf8_lossy(&dry.stdout).contains("would apply: 0 keep, 0 archive, 1 exclude"));
    assert!(out.join("wechat/wechat-3fa9c1.jsonl").exists());

    // real apply moves the file and rewrites the index
    let apply = colligo()
        .args([
            "filter",
            "--policy",
            policy.to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(apply.status.success());
    assert!(!out.join("wechat/wechat-3fa9c1.jsonl").exists());
    assert!(out.join("wechat/_excluded/wechat-3fa9c1.jsonl").exists());

    let index: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(out.join("wechat/index.json")).unwrap()).unwrap();
    assert!(index.is_empty());
}

#[test]
fn unknown_command_exits_nonzero() {
    let output = colligo().arg("frobnicate").output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown command"));
}
