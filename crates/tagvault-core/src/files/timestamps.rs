//! Per-file timestamps that are not part of service membership.

use crate::error::Result;
use crate::ids::{id_list, HashId};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimestampKind {
    /// Modified time of the file on disk.
    ModifiedFile,
    /// Modified time reported by a website.
    ModifiedDomain { domain: String },
    Archived,
    Imported,
    Deleted,
}

impl TimestampKind {
    fn to_db(&self) -> (i64, &str) {
        match self {
            TimestampKind::ModifiedFile => (0, ""),
            TimestampKind::ModifiedDomain { domain } => (1, domain.as_str()),
            TimestampKind::Archived => (2, ""),
            TimestampKind::Imported => (3, ""),
            TimestampKind::Deleted => (4, ""),
        }
    }
}

pub fn set_timestamps(
    conn: &Connection,
    hash_ids: &[HashId],
    kind: &TimestampKind,
    timestamp: i64,
) -> Result<()> {
    let (code, location) = kind.to_db();
    let mut stmt = conn.prepare_cached(
        "REPLACE INTO file_timestamps (hash_id, timestamp_type, location, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for hash_id in hash_ids {
        stmt.execute(params![hash_id, code, location, timestamp])?;
    }
    Ok(())
}

pub fn clear_timestamps(conn: &Connection, hash_ids: &[HashId], kind: &TimestampKind) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let (code, location) = kind.to_db();
    let removed = conn.execute(
        &format!(
            "DELETE FROM file_timestamps
             WHERE timestamp_type = ?1 AND location = ?2 AND hash_id IN ({})",
            id_list(hash_ids)
        ),
        params![code, location],
    )?;
    Ok(removed)
}

pub fn get_timestamp(conn: &Connection, hash_id: HashId, kind: &TimestampKind) -> Result<Option<i64>> {
    let (code, location) = kind.to_db();
    let timestamp = conn
        .query_row(
            "SELECT timestamp FROM file_timestamps
             WHERE hash_id = ?1 AND timestamp_type = ?2 AND location = ?3",
            params![hash_id, code, location],
            |row| row.get(0),
        )
        .optional()?;
    Ok(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;

    #[test]
    fn test_domain_timestamps_are_kept_per_domain() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let a = TimestampKind::ModifiedDomain {
            domain: "example.com".into(),
        };
        let b = TimestampKind::ModifiedDomain {
            domain: "example.org".into(),
        };

        set_timestamps(&conn, &[HashId(1)], &a, 100).unwrap();
        set_timestamps(&conn, &[HashId(1)], &b, 200).unwrap();
        set_timestamps(&conn, &[HashId(1)], &a, 150).unwrap();

        assert_eq!(get_timestamp(&conn, HashId(1), &a).unwrap(), Some(150));
        assert_eq!(clear_timestamps(&conn, &[HashId(1)], &b).unwrap(), 1);
        assert_eq!(get_timestamp(&conn, HashId(1), &b).unwrap(), None);
        assert_eq!(get_timestamp(&conn, HashId(1), &TimestampKind::Archived).unwrap(), None);
    }
}
