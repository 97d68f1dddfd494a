//! Opening and configuring library connections.

use crate::config::DatabaseConfig;
use crate::error::{Result, TagVaultError};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::debug;

/// Open a read-write connection, creating the parent directory and the
/// database file if needed.
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| TagVaultError::Io {
                message: format!("Failed to create database directory: {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let conn = Connection::open(db_path)?;
    configure_connection(&conn)?;
    debug!("Opened library database at {}", db_path.display());
    Ok(conn)
}

/// Open a connection that can only read. Used by `LibraryReader` so queries
/// never contend with the writer for the write lock.
pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout={};\n\
         PRAGMA temp_store=MEMORY;",
        DatabaseConfig::BUSY_TIMEOUT_MS,
    ))?;
    Ok(conn)
}

/// Configure connection with WAL and the shared busy timeout.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL;\n\
         PRAGMA busy_timeout={};\n\
         PRAGMA synchronous=NORMAL;\n\
         PRAGMA temp_store=MEMORY;\n\
         PRAGMA foreign_keys=OFF;",
        DatabaseConfig::BUSY_TIMEOUT_MS,
    ))?;
    Ok(())
}

/// True if a table with this name exists in the main schema.
#[cfg(test)]
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}
