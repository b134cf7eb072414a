use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Open the Zotero replica read-only.
///
/// The file is never created. Zotero keeps the database locked while it
/// runs, so it is opened `immutable` to read a consistent snapshot without
/// taking locks.
pub async fn open_library(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        return Err(Error::local(format!(
            "database not found: {}",
            path.display()
        )));
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(Error::local)?
        .read_only(true)
        .immutable(true)
        .create_if_missing(false);

    SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .map_err(Error::local)
}

/// Open (and create if needed) the vector index database.
pub async fn open_index(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| Error::Index(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| Error::Index(e.to_string()))
}
