pub mod decoder;
pub mod keys;
pub mod media;

use crate::error::{Error, Result};
use crate::fmt::ceprintln;
use crate::models::{self, Conversation, Metadata};
use decoder::{sanitize_id, RawRow};
use keys::MasterKey;
use media::MediaResolver;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const PLATFORM: &str = "wechat";

/// One contact row; display name resolution is remark, then nickname, then
/// the raw username.
#[derive(Debug, Clone, Default)]
pub struct Contact {
    pub username: String,
    pub nick_name: String,
    pub remark: String,
}

impl Contact {
    pub fn display(&self) -> &str {
        if !self.remark.is_empty() {
            &self.remark
        } else if !self.nick_name.is_empty() {
            &self.nick_name
        } else {
            &self.username
        }
    }
}

/// Walks the messenger's data root, opens each message database with its
/// derived key and streams decoded conversations to the caller. Source
/// databases are opened read-only and never copied or modified.
pub struct Extractor {
    key: Option<MasterKey>,
    data_dir: Option<PathBuf>,
    contacts: HashMap<String, Contact>,
    account_root: Option<PathBuf>,
}

impl Extractor {
    pub fn new(key: Option<MasterKey>, data_dir: Option<PathBuf>) -> Self {
        Extractor {
            key,
            data_dir,
            contacts: HashMap::new(),
            account_root: None,
        }
    }

    /// Extracts every conversation, invoking `emit` as each one completes.
    /// Per-file failures (bad key, schema drift) are reported and skipped;
    /// `emit` errors abort the run.
    pub fn extract(
        &mut self,
        source: Option<&Path>,
        emit: &mut dyn FnMut(Conversation) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let db_files = match source {
            Some(p) if p.is_file() => vec![p.to_path_buf()],
            Some(p) if p.is_dir() => {
                if p.join("db_storage").is_dir() {
                    self.account_root = Some(p.to_path_buf());
                }
                find_dbs_under(p)
            }
            Some(p) => anyhow::bail!("invalid source: {}", p.display()),
            None => self.find_message_dbs(),
        };

        let msg_dbs = message_dbs(db_files);
        if msg_dbs.is_empty() {
            eprintln!("[colligo] no message databases found.");
            eprintln!("[colligo] expected under <account>/db_storage/message/ — is the messenger installed and logged in?");
            return Ok(());
        }
        eprintln!("[colligo] {} message database(s)", msg_dbs.len());

        self.load_contacts(&msg_dbs);

        // per-file failures were already reported and skipped inside;
        // anything propagating from here is an emit (output) failure
        for db_path in &msg_dbs {
            self.extract_db(db_path, emit)?;
        }
        Ok(())
    }

    fn open_db(&self, db_path: &Path) -> Result<Connection> {
        match &self.key {
            Some(master) => keys::open_encrypted(db_path, master),
            None => keys::open_plain(db_path),
        }
    }

    fn extract_db(
        &mut self,
        db_path: &Path,
        emit: &mut dyn FnMut(Conversation) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let name = db_path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
        let conn = match self.open_db(db_path) {
            Ok(conn) => conn,
            Err(e) => {
                ceprintln!("[colligo] ✗ {name}: {e}");
                return Ok(());
            }
        };

        let tables = match chat_tables(&conn, db_path) {
            Ok(tables) => tables,
            Err(e) => {
                ceprintln!("[colligo] ✗ {name}: {e}");
                return Ok(());
            }
        };

        for table in &tables {
            let (rows, corrupt) = match read_table(&conn, db_path, table) {
                Ok(rows) => rows,
                Err(e) => {
                    ceprintln!("[colligo] ✗ {name}/{table}: {e}");
                    continue;
                }
            };
            if corrupt > 0 {
                let e = Error::CorruptRecord(format!("skipped {corrupt} unreadable row(s)"));
                ceprintln!("[colligo] ⚠ {name}/{table}: {e}");
            }

            let mut messages: Vec<_> =
                rows.iter().filter_map(decoder::decode_row).collect();
            if messages.is_empty() {
                continue;
            }

            let table_hash = table.trim_start_matches("Msg_").to_string();
            if let Some(root) = &self.account_root {
                MediaResolver::new(root).resolve(&mut messages, &table_hash);
            }

            let contact = self.contacts.get(&table_hash);
            let username = contact.map(|c| c.username.clone()).unwrap_or_default();
            let display_name = contact
                .map(|c| c.display().to_string())
                .unwrap_or_else(|| table_hash.clone());
            let is_group = username.contains("@chatroom");

            let id_source = if username.is_empty() { &table_hash } else { &username };
            let mut metadata = Metadata::new();
            metadata.insert("table".into(), serde_json::json!(table));
            metadata.insert("username".into(), serde_json::json!(username));
            metadata.insert("is_group".into(), serde_json::json!(is_group));
            metadata.insert("db_file".into(), serde_json::json!(name));

            emit(Conversation {
                id: format!("wechat-{}", sanitize_id(id_source)),
                platform: PLATFORM.to_string(),
                title: display_name,
                participants: if !username.is_empty() && !is_group {
                    vec![username]
                } else {
                    Vec::new()
                },
                messages,
                metadata,
            })?;
        }
        Ok(())
    }

    /// Auto-detects message databases under the account container and
    /// remembers the account root for media resolution.
    fn find_message_dbs(&mut self) -> Vec<PathBuf> {
        if let Some(dir) = self.data_dir.clone() {
            if dir.join("db_storage").is_dir() {
                self.account_root = Some(dir.clone());
            }
            return find_dbs_under(&dir);
        }

        let base = models::home_dir()
            .join("Library/Containers/com.tencent.xinWeChat/Data/Documents/xwechat_files");
        let mut dbs = Vec::new();
        let Ok(entries) = fs::read_dir(&base) else {
            return dbs;
        };
        for entry in entries.flatten() {
            let user_dir = entry.path();
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if !user_dir.is_dir() || dir_name == "all_users" || dir_name == "Backup" {
                continue;
            }
            let msg_dir = user_dir.join("db_storage").join("message");
            if msg_dir.is_dir() {
                dbs.extend(find_dbs_under(&msg_dir));
                self.account_root = Some(user_dir);
            }
        }
        dbs.sort();
        dbs
    }

    /// Loads the contact table so `Msg_<md5(username)>` tables can be mapped
    /// back to display names. Missing contact DB just means hash titles.
    fn load_contacts(&mut self, msg_dbs: &[PathBuf]) {
        let Some(first) = msg_dbs.first() else {
            return;
        };
        // contact.db sits next to message/ under db_storage/
        let Some(db_storage) = first.parent().and_then(|p| p.parent()) else {
            return;
        };
        let contact_db = db_storage.join("contact").join("contact.db");
        if !contact_db.exists() {
            return;
        }

        let conn = match self.open_db(&contact_db) {
            Ok(conn) => conn,
            Err(e) => {
                ceprintln!("[colligo] ⚠ contact.db: {e}");
                return;
            }
        };

        let mut stmt = match conn.prepare("SELECT username, nick_name, remark FROM contact") {
            Ok(stmt) => stmt,
            Err(e) => {
                ceprintln!("[colligo] ⚠ contact.db: {e}");
                return;
            }
        };
        let rows = stmt.query_map([], |r| {
            Ok(Contact {
                username: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                nick_name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                remark: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        });
        let Ok(rows) = rows else { return };

        for contact in rows.flatten() {
            if contact.username.is_empty() {
                continue;
            }
            let hash = format!("{:x}", md5::compute(contact.username.as_bytes()));
            self.contacts.insert(hash, contact);
        }
        eprintln!("[colligo] {} contact(s) mapped", self.contacts.len());
    }
}

fn find_dbs_under(dir: &Path) -> Vec<PathBuf> {
    let mut dbs: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("db"))
        .collect();
    dbs.sort();
    dbs
}

/// Keeps `message_*.db`, dropping full-text and resource side tables; when
/// the filter leaves nothing, every discovered `.db` file is tried.
fn message_dbs(db_files: Vec<PathBuf>) -> Vec<PathBuf> {
    let filtered: Vec<PathBuf> = db_files
        .iter()
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with("message_")
                && name.ends_with(".db")
                && !name.ends_with("_fts.db")
                && !name.ends_with("_resource.db")
        })
        .cloned()
        .collect();
    if filtered.is_empty() {
        db_files
    } else {
        filtered
    }
}

fn chat_tables(conn: &Connection, db_path: &Path) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let names: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut tables: Vec<String> = names
        .into_iter()
        .filter(|n| n.starts_with("Msg_"))
        .collect();
    tables.sort();
    if tables.is_empty() {
        return Err(Error::FormatDrift(
            db_path.to_path_buf(),
            "no Msg_<hash> chat tables".into(),
        ));
    }
    Ok(tables)
}

/// Reads a chat table in timestamp order. The `hex()` copy of the payload is
/// only materialized for compressed rows. Returns the rows plus the count of
/// rows that failed to read.
fn read_table(
    conn: &Connection,
    db_path: &Path,
    table: &str,
) -> Result<(Vec<RawRow>, usize)> {
    let sql = format!(
        "SELECT local_id, server_id, local_type, real_sender_id, create_time, status, \
         message_content, WCDB_CT_message_content, \
         CASE WHEN WCDB_CT_message_content != 0 THEN hex(message_content) ELSE '' END \
         FROM \"{table}\" ORDER BY create_time ASC"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| Error::FormatDrift(db_path.to_path_buf(), e.to_string()))?;

    let mapped = stmt.query_map([], |r| {
        Ok(RawRow {
            local_id: r.get::<_, Option<i64>>(0)?.unwrap_or(0),
            server_id: r.get::<_, Option<i64>>(1)?.unwrap_or(0),
            raw_type: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
            sender_id: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
            create_time: r.get::<_, Option<i64>>(4)?.unwrap_or(0),
            status: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
            content: text_value(r.get_ref(6)?),
            compression: r.get::<_, Option<i64>>(7)?.unwrap_or(0),
            hex_content: r.get::<_, Option<String>>(8)?.unwrap_or_default(),
        })
    })?;

    let mut rows = Vec::new();
    let mut corrupt = 0usize;
    for row in mapped {
        match row {
            Ok(r) => rows.push(r),
            Err(_) => corrupt += 1,
        }
    }
    Ok((rows, corrupt))
}

/// The payload column is TEXT for plain rows and BLOB for compressed ones.
fn text_value(v: ValueRef) -> String {
    match v {
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Null => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_chat_db(dir: &Path) -> PathBuf {
        let path = dir.join("message_0.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Msg_0a1b2c (
                 local_id INTEGER, server_id INTEGER, local_type INTEGER,
                 real_sender_id INTEGER, create_time INTEGER, status INTEGER,
                 message_content TEXT, WCDB_CT_message_content INTEGER
             );
             INSERT INTO Msg_0a1b2c VALUES (1, 101, 1, 9, 1700000000, 3, 'hello', 0);
             INSERT INTO Msg_0a1b2c VALUES (2, 102, 1, 9, 1700000100, 2, 'hi back', 0);
             INSERT INTO Msg_0a1b2c VALUES (3, 103, 9999, 9, 1700000200, 2, 'unknown', 0);",
        )
        .unwrap();
        path
    }

    #[test]
    fn message_dbs_filters_side_tables() {
        let files = vec![
            PathBuf::from("/x/message_0.db"),
            PathBuf::from("/x/message_0_fts.db"),
            PathBuf::from("/x/message_resource.db"),
            PathBuf::from("/x/message_1_resource.db"),
            PathBuf::from("/x/contact.db"),
        ];
        let kept = message_dbs(files);
        assert_eq!(kept, vec![PathBuf::from("/x/message_0.db")]);
    }

    #[test]
    fn message_dbs_falls_back_to_everything() {
        let files = vec![PathBuf::from("/x/chats.db")];
        assert_eq!(message_dbs(files.clone()), files);
    }

    #[test]
    fn contact_display_precedence() {
        let mut c = Contact {
            username: "wxid_1".into(),
            nick_name: "Nick".into(),
            remark: "Remark".into(),
        };
        assert_eq!(c.display(), "Remark");
        c.remark.clear();
        assert_eq!(c.display(), "Nick");
        c.nick_name.clear();
        assert_eq!(c.display(), "wxid_1");
    }

    #[test]
    fn extracts_conversation_from_plain_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = plain_chat_db(dir.path());

        let mut extractor = Extractor::new(None, None);
        let mut out = Vec::new();
        extractor
            .extract(Some(&db), &mut |conv| {
                out.push(conv);
                Ok(())
            })
            .unwrap();

        assert_eq!(out.len(), 1);
        let conv = &out[0];
        // no contact map: id and title fall back to the table hash
        assert_eq!(conv.id, "wechat-0a1b2c");
        assert_eq!(conv.title, "0a1b2c");
        // unknown kind 9999 was dropped
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].role, "user");
        assert_eq!(conv.messages[1].role, "assistant");
        assert_eq!(conv.metadata["is_group"], false);
        // timestamps come back in row order
        assert!(conv.messages[0].timestamp <= conv.messages[1].timestamp);
    }

    #[test]
    fn format_drift_reported_for_unknown_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_0.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE other (x INTEGER);").unwrap();
        drop(conn);

        let opened = keys::open_plain(&path).unwrap();
        match chat_tables(&opened, &path) {
            Err(Error::FormatDrift(p, _)) => assert_eq!(p, path),
            other => panic!("expected FormatDrift, got {other:?}"),
        }
    }

    #[test]
    fn emit_error_aborts_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let db = plain_chat_db(dir.path());

        let mut extractor = Extractor::new(None, None);
        let result = extractor.extract(Some(&db), &mut |_conv| anyhow::bail!("disk full"));
        assert!(result.is_err());
    }
}
