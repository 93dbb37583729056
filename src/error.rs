use std::path::PathBuf;
use thiserror::Error;

/// Extraction-layer errors. Per-record variants are recovered locally by the
/// callers; per-file variants are logged with the offending path and the file
/// is skipped. `Config` and output `Io` errors are fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: file too short to contain a key salt", .0.display())]
    ShortFile(PathBuf),

    #[error("{}: key rejected by SQLite (wrong master password?)", .0.display())]
    BadKey(PathBuf),

    #[error("{path}: unexpected schema: {1}", path = .0.display())]
    FormatDrift(PathBuf, String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
