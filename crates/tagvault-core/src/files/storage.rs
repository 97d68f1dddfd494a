//! Per (file service, file) membership: current, deleted, pending and
//! petitioned rows.
//!
//! These are plain row operations. Every function returns what actually
//! changed so the caller can move counters by delta; the cascade rules live
//! in [`super::cascade`].

use crate::error::Result;
use crate::ids::{id_list, HashId, ServiceId, TextId};
use crate::status::ContentStatus;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Deletion record of a file on one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRecord {
    pub timestamp: Option<i64>,
    pub original_timestamp: Option<i64>,
}

fn status_table(status: ContentStatus) -> &'static str {
    match status {
        ContentStatus::Current => "current_files",
        ContentStatus::Deleted => "deleted_files",
        ContentStatus::Pending => "pending_files",
        ContentStatus::Petitioned => "petitioned_files",
    }
}

/// The subset of `hash_ids` with the given status on `service_id`.
pub fn filter_to_status(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
    status: ContentStatus,
) -> Result<HashSet<HashId>> {
    if hash_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT hash_id FROM {} WHERE service_id = ?1 AND hash_id IN ({})",
        status_table(status),
        id_list(hash_ids)
    ))?;
    let found = stmt
        .query_map(params![service_id], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(found)
}

/// The subset of `hash_ids` current in any of `service_ids`.
pub fn filter_current_in_any(
    conn: &Connection,
    service_ids: &[ServiceId],
    hash_ids: &[HashId],
) -> Result<HashSet<HashId>> {
    if service_ids.is_empty() || hash_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT hash_id FROM current_files
         WHERE service_id IN ({}) AND hash_id IN ({})",
        id_list(service_ids),
        id_list(hash_ids)
    ))?;
    let found = stmt
        .query_map([], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(found)
}

pub fn is_current(conn: &Connection, service_id: ServiceId, hash_id: HashId) -> Result<bool> {
    has_status(conn, service_id, hash_id, ContentStatus::Current)
}

pub fn has_status(
    conn: &Connection,
    service_id: ServiceId,
    hash_id: HashId,
    status: ContentStatus,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        &format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE service_id = ?1 AND hash_id = ?2)",
            status_table(status)
        ),
        params![service_id, hash_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Current rows among `hash_ids`, with their import timestamps.
pub fn current_timestamps(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<BTreeMap<HashId, Option<i64>>> {
    if hash_ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT hash_id, timestamp FROM current_files
         WHERE service_id = ?1 AND hash_id IN ({})",
        id_list(hash_ids)
    ))?;
    let rows = stmt
        .query_map(params![service_id], |row| {
            Ok((row.get::<_, HashId>(0)?, row.get::<_, Option<i64>>(1)?))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

/// Every file current in a service.
pub fn all_current(conn: &Connection, service_id: ServiceId) -> Result<Vec<HashId>> {
    let mut stmt =
        conn.prepare("SELECT hash_id FROM current_files WHERE service_id = ?1 ORDER BY hash_id")?;
    let ids = stmt
        .query_map(params![service_id], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Number of files current in each service, for the given files.
pub fn current_counts_by_service(
    conn: &Connection,
    hash_ids: &[HashId],
) -> Result<HashMap<ServiceId, i64>> {
    if hash_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT service_id, COUNT(*) FROM current_files
         WHERE hash_id IN ({}) GROUP BY service_id",
        id_list(hash_ids)
    ))?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, ServiceId>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(counts)
}

/// Add current rows. Returns the ids that were not already current.
pub fn insert_current(
    conn: &Connection,
    service_id: ServiceId,
    rows: &[(HashId, Option<i64>)],
) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO current_files (service_id, hash_id, timestamp) VALUES (?1, ?2, ?3)",
    )?;
    let mut inserted = Vec::new();
    for (hash_id, timestamp) in rows {
        if stmt.execute(params![service_id, hash_id, timestamp])? > 0 {
            inserted.push(*hash_id);
        }
    }
    Ok(inserted)
}

/// Remove current rows. Returns the number removed.
pub fn remove_current(conn: &Connection, service_id: ServiceId, hash_ids: &[HashId]) -> Result<usize> {
    remove_rows(conn, "current_files", service_id, hash_ids)
}

fn remove_rows(
    conn: &Connection,
    table: &str,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let removed = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE service_id = ?1 AND hash_id IN ({})",
            id_list(hash_ids)
        ),
        params![service_id],
    )?;
    Ok(removed)
}

/// Write deletion records. Existing records are kept as they are. Returns
/// the ids that gained a record.
pub fn record_deleted(
    conn: &Connection,
    service_id: ServiceId,
    rows: &[(HashId, i64, Option<i64>)],
) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO deleted_files (service_id, hash_id, timestamp, original_timestamp)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut recorded = Vec::new();
    for (hash_id, timestamp, original) in rows {
        if stmt.execute(params![service_id, hash_id, timestamp, original])? > 0 {
            recorded.push(*hash_id);
        }
    }
    Ok(recorded)
}

/// Remove deletion records. Returns the ids that had one.
pub fn clear_deleted(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<Vec<HashId>> {
    let mut had: Vec<HashId> =
        filter_to_status(conn, service_id, hash_ids, ContentStatus::Deleted)?
            .into_iter()
            .collect();
    had.sort();
    remove_rows(conn, "deleted_files", service_id, &had)?;
    Ok(had)
}

pub fn deletion_record(
    conn: &Connection,
    service_id: ServiceId,
    hash_id: HashId,
) -> Result<Option<DeletionRecord>> {
    let record = conn
        .query_row(
            "SELECT timestamp, original_timestamp FROM deleted_files
             WHERE service_id = ?1 AND hash_id = ?2",
            params![service_id, hash_id],
            |row| {
                Ok(DeletionRecord {
                    timestamp: row.get(0)?,
                    original_timestamp: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Deletion records among `hash_ids` on one service.
pub fn deletion_records(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<BTreeMap<HashId, DeletionRecord>> {
    if hash_ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT hash_id, timestamp, original_timestamp FROM deleted_files
         WHERE service_id = ?1 AND hash_id IN ({})",
        id_list(hash_ids)
    ))?;
    let rows = stmt
        .query_map(params![service_id], |row| {
            Ok((
                row.get::<_, HashId>(0)?,
                DeletionRecord {
                    timestamp: row.get(1)?,
                    original_timestamp: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

/// Files deleted in any of `service_ids`, with their latest deletion time.
///
/// With `hash_ids` of `None` every such file is returned.
pub fn deleted_in_any(
    conn: &Connection,
    service_ids: &[ServiceId],
    hash_ids: Option<&[HashId]>,
) -> Result<BTreeMap<HashId, Option<i64>>> {
    if service_ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut sql = format!(
        "SELECT hash_id, MAX(timestamp) FROM deleted_files WHERE service_id IN ({})",
        id_list(service_ids)
    );
    if let Some(ids) = hash_ids {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        sql.push_str(&format!(" AND hash_id IN ({})", id_list(ids)));
    }
    sql.push_str(" GROUP BY hash_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, HashId>(0)?, row.get::<_, Option<i64>>(1)?))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

/// Add pending rows. Returns the ids that were newly pended.
pub fn insert_pending(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<Vec<HashId>> {
    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO pending_files (service_id, hash_id) VALUES (?1, ?2)")?;
    let mut inserted = Vec::new();
    for hash_id in hash_ids {
        if stmt.execute(params![service_id, hash_id])? > 0 {
            inserted.push(*hash_id);
        }
    }
    Ok(inserted)
}

pub fn remove_pending(conn: &Connection, service_id: ServiceId, hash_ids: &[HashId]) -> Result<usize> {
    remove_rows(conn, "pending_files", service_id, hash_ids)
}

/// Add petitioned rows with a reason. Returns the ids that were newly
/// petitioned.
pub fn insert_petitioned(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
    reason_id: TextId,
) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO petitioned_files (service_id, hash_id, reason_id) VALUES (?1, ?2, ?3)",
    )?;
    let mut inserted = Vec::new();
    for hash_id in hash_ids {
        if stmt.execute(params![service_id, hash_id, reason_id])? > 0 {
            inserted.push(*hash_id);
        }
    }
    Ok(inserted)
}

pub fn remove_petitioned(
    conn: &Connection,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<usize> {
    remove_rows(conn, "petitioned_files", service_id, hash_ids)
}

/// Remember why local files were deleted.
pub fn set_deletion_reasons(conn: &Connection, hash_ids: &[HashId], reason_id: TextId) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "REPLACE INTO local_file_deletion_reasons (hash_id, reason_id) VALUES (?1, ?2)",
    )?;
    for hash_id in hash_ids {
        stmt.execute(params![hash_id, reason_id])?;
    }
    Ok(())
}

pub fn clear_deletion_reasons(conn: &Connection, hash_ids: &[HashId]) -> Result<()> {
    if hash_ids.is_empty() {
        return Ok(());
    }
    conn.execute(
        &format!(
            "DELETE FROM local_file_deletion_reasons WHERE hash_id IN ({})",
            id_list(hash_ids)
        ),
        [],
    )?;
    Ok(())
}

pub fn deletion_reason_id(conn: &Connection, hash_id: HashId) -> Result<Option<TextId>> {
    let reason = conn
        .query_row(
            "SELECT reason_id FROM local_file_deletion_reasons WHERE hash_id = ?1",
            params![hash_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_current_reports_only_new_rows() {
        let conn = create_test_conn();
        let service = ServiceId(1);
        let first = insert_current(&conn, service, &[(HashId(1), Some(10)), (HashId(2), None)])
            .unwrap();
        assert_eq!(first, vec![HashId(1), HashId(2)]);

        let second =
            insert_current(&conn, service, &[(HashId(2), Some(5)), (HashId(3), Some(5))]).unwrap();
        assert_eq!(second, vec![HashId(3)]);

        let timestamps = current_timestamps(&conn, service, &[HashId(1), HashId(2)]).unwrap();
        assert_eq!(timestamps[&HashId(1)], Some(10));
        assert_eq!(timestamps[&HashId(2)], None);
    }

    #[test]
    fn test_deletion_records_keep_first_timestamp() {
        let conn = create_test_conn();
        let service = ServiceId(1);
        record_deleted(&conn, service, &[(HashId(1), 100, Some(50))]).unwrap();
        let again = record_deleted(&conn, service, &[(HashId(1), 200, None)]).unwrap();
        assert!(again.is_empty());

        let record = deletion_record(&conn, service, HashId(1)).unwrap().unwrap();
        assert_eq!(record.timestamp, Some(100));
        assert_eq!(record.original_timestamp, Some(50));

        assert_eq!(clear_deleted(&conn, service, &[HashId(1), HashId(2)]).unwrap(), vec![HashId(1)]);
        assert!(deletion_record(&conn, service, HashId(1)).unwrap().is_none());
    }

    #[test]
    fn test_deleted_in_any_takes_latest_time() {
        let conn = create_test_conn();
        record_deleted(&conn, ServiceId(1), &[(HashId(7), 100, None)]).unwrap();
        record_deleted(&conn, ServiceId(2), &[(HashId(7), 300, None)]).unwrap();
        record_deleted(&conn, ServiceId(3), &[(HashId(8), 400, None)]).unwrap();

        let found = deleted_in_any(&conn, &[ServiceId(1), ServiceId(2)], None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&HashId(7)], Some(300));
    }
}
