use crate::error::{Error, Result};
use crate::models;
use rusqlite::{Connection, OpenFlags};
use sha2::Sha512;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

const PBKDF2_ROUNDS: u32 = 256_000;
const SALT_LEN: usize = 16;

/// The 32-byte master password shared by every database of one account.
/// Wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_hex(s: &str) -> Result<MasterKey> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| Error::Config("master key must be hex".into()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Config("master key must be 32 bytes (64 hex chars)".into()))?;
        Ok(MasterKey(arr))
    }

    /// Resolution order: `--key`, `--key-file`, `COLLIGO_WECHAT_KEY`, the
    /// `wechat_key` config entry. Returns `None` when nothing is configured
    /// (the caller then tries the unencrypted path).
    pub fn load(cli_key: Option<&str>, key_file: Option<&str>) -> Result<Option<MasterKey>> {
        if let Some(k) = cli_key {
            return MasterKey::from_hex(k).map(Some);
        }
        if let Some(path) = key_file {
            let content = std::fs::read_to_string(path)?;
            return MasterKey::from_hex(&content).map(Some);
        }
        if let Ok(k) = std::env::var("COLLIGO_WECHAT_KEY") {
            if !k.is_empty() {
                return MasterKey::from_hex(&k).map(Some);
            }
        }
        if let Some(k) = models::load_config().get("wechat_key") {
            return MasterKey::from_hex(k).map(Some);
        }
        Ok(None)
    }
}

/// Derives the per-file raw page key: the file's first 16 bytes are the
/// PBKDF2 salt, so the same (master, file) pair always yields the same key.
pub fn derive_raw_key(master: &MasterKey, db_path: &Path) -> Result<[u8; 32]> {
    let mut file = File::open(db_path)?;
    let mut salt = [0u8; SALT_LEN];
    let mut read = 0;
    while read < SALT_LEN {
        let n = file.read(&mut salt[read..])?;
        if n == 0 {
            return Err(Error::ShortFile(db_path.to_path_buf()));
        }
        read += n;
    }

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha512>(&master.0, &salt, PBKDF2_ROUNDS, &mut key);
    Ok(key)
}

/// Opens a page-encrypted database read-only, keyed with the raw per-file
/// key. SQLCipher 4 defaults (page size 4096, HMAC-SHA512 page MACs) apply;
/// the page size is pinned explicitly. A rejected first page surfaces as
/// `BadKey`.
pub fn open_encrypted(db_path: &Path, master: &MasterKey) -> Result<Connection> {
    let key = derive_raw_key(master, db_path)?;
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(&format!(
        "PRAGMA key = \"x'{}'\";\nPRAGMA cipher_page_size = 4096;",
        hex::encode(key)
    ))?;
    verify_readable(conn, db_path)
}

/// Opens an unencrypted database read-only. `BadKey` here means the file is
/// actually encrypted and no key was supplied.
pub fn open_plain(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    verify_readable(conn, db_path)
}

fn verify_readable(conn: Connection, db_path: &Path) -> Result<Connection> {
    match conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0)) {
        Ok(_) => Ok(conn),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::NotADatabase =>
        {
            Err(Error::BadKey(db_path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}
