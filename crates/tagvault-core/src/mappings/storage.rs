//! Row operations on (tag_id, hash_id) mapping tables.
//!
//! The same helpers serve storage truth, specific storage caches and
//! display caches, which all share one table shape.

use crate::error::Result;
use crate::ids::{id_list, HashId, TagId, TextId};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Insert rows for one tag. Returns the hashes that were newly inserted.
pub fn insert_rows(
    conn: &Connection,
    table: &str,
    tag_id: TagId,
    hash_ids: &[HashId],
) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT OR IGNORE INTO {table} (tag_id, hash_id) VALUES (?1, ?2)"
    ))?;
    let mut inserted = Vec::new();
    for hash_id in hash_ids {
        if stmt.execute(params![tag_id, hash_id])? > 0 {
            inserted.push(*hash_id);
        }
    }
    Ok(inserted)
}

/// Delete rows for one tag. Returns the number deleted.
pub fn delete_rows(
    conn: &Connection,
    table: &str,
    tag_id: TagId,
    hash_ids: &[HashId],
) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let deleted = conn.execute(
        &format!(
            "DELETE FROM {table} WHERE tag_id = ?1 AND hash_id IN ({})",
            id_list(hash_ids)
        ),
        params![tag_id],
    )?;
    Ok(deleted)
}

/// The hashes among `hash_ids` that have a row for `tag_id`.
pub fn filter_rows(
    conn: &Connection,
    table: &str,
    tag_id: TagId,
    hash_ids: &[HashId],
) -> Result<BTreeSet<HashId>> {
    if hash_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT hash_id FROM {table} WHERE tag_id = ?1 AND hash_id IN ({})",
        id_list(hash_ids)
    ))?;
    let found = stmt
        .query_map(params![tag_id], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(found)
}

/// The hashes among `hash_ids` that have a row for any of `tag_ids`.
pub fn filter_rows_any_tag(
    conn: &Connection,
    table: &str,
    tag_ids: &BTreeSet<TagId>,
    hash_ids: &[HashId],
) -> Result<BTreeSet<HashId>> {
    if tag_ids.is_empty() || hash_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT hash_id FROM {table} WHERE tag_id IN ({}) AND hash_id IN ({})",
        id_list(tag_ids),
        id_list(hash_ids)
    ))?;
    let found = stmt
        .query_map([], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(found)
}

/// The hashes among `hash_ids` with at least one row in `table`.
pub fn hashes_with_any_row(
    conn: &Connection,
    table: &str,
    hash_ids: &[HashId],
) -> Result<HashSet<HashId>> {
    if hash_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT hash_id FROM {table} WHERE hash_id IN ({})",
        id_list(hash_ids)
    ))?;
    let found = stmt
        .query_map([], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(found)
}

/// Rows for the given files, grouped by tag.
pub fn rows_for_hashes(
    conn: &Connection,
    table: &str,
    hash_ids: &[HashId],
) -> Result<BTreeMap<TagId, Vec<HashId>>> {
    let mut grouped: BTreeMap<TagId, Vec<HashId>> = BTreeMap::new();
    if hash_ids.is_empty() {
        return Ok(grouped);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT tag_id, hash_id FROM {table} WHERE hash_id IN ({}) ORDER BY tag_id, hash_id",
        id_list(hash_ids)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, TagId>(0)?, row.get::<_, HashId>(1)?))
    })?;
    for row in rows {
        let (tag_id, hash_id) = row?;
        grouped.entry(tag_id).or_default().push(hash_id);
    }
    Ok(grouped)
}

/// Every file with a row for `tag_id`.
pub fn hashes_for_tag(conn: &Connection, table: &str, tag_id: TagId) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT hash_id FROM {table} WHERE tag_id = ?1 ORDER BY hash_id"
    ))?;
    let ids = stmt
        .query_map(params![tag_id], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// Every tag with a row for `hash_id`.
pub fn tags_for_hash(conn: &Connection, table: &str, hash_id: HashId) -> Result<Vec<TagId>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT tag_id FROM {table} WHERE hash_id = ?1 ORDER BY tag_id"
    ))?;
    let ids = stmt
        .query_map(params![hash_id], |row| row.get::<_, TagId>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

/// Petition rows carry a reason. Returns the hashes newly petitioned.
pub fn insert_petitioned(
    conn: &Connection,
    table: &str,
    tag_id: TagId,
    hash_ids: &[HashId],
    reason_id: TextId,
) -> Result<Vec<HashId>> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT OR IGNORE INTO {table} (tag_id, hash_id, reason_id) VALUES (?1, ?2, ?3)"
    ))?;
    let mut inserted = Vec::new();
    for hash_id in hash_ids {
        if stmt.execute(params![tag_id, hash_id, reason_id])? > 0 {
            inserted.push(*hash_id);
        }
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StorageTables;
    use crate::ids::ServiceId;

    fn create_test_tables() -> (Connection, StorageTables) {
        let conn = Connection::open_in_memory().unwrap();
        let tables = StorageTables::new(ServiceId(9));
        tables.create(&conn).unwrap();
        (conn, tables)
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (conn, tables) = create_test_tables();
        let first = insert_rows(&conn, &tables.current, TagId(1), &[HashId(1), HashId(2)]).unwrap();
        let second = insert_rows(&conn, &tables.current, TagId(1), &[HashId(2), HashId(3)]).unwrap();
        assert_eq!(first, vec![HashId(1), HashId(2)]);
        assert_eq!(second, vec![HashId(3)]);
        assert_eq!(count_rows(&conn, &tables.current).unwrap(), 3);
    }

    #[test]
    fn test_grouping_and_filters() {
        let (conn, tables) = create_test_tables();
        insert_rows(&conn, &tables.current, TagId(1), &[HashId(1), HashId(2)]).unwrap();
        insert_rows(&conn, &tables.current, TagId(2), &[HashId(2)]).unwrap();

        let grouped = rows_for_hashes(&conn, &tables.current, &[HashId(2)]).unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&TagId(1)], vec![HashId(2)]);

        let found = filter_rows(&conn, &tables.current, TagId(1), &[HashId(1), HashId(5)]).unwrap();
        assert_eq!(found, BTreeSet::from([HashId(1)]));

        let populated =
            hashes_with_any_row(&conn, &tables.current, &[HashId(1), HashId(2), HashId(3)]).unwrap();
        assert_eq!(populated.len(), 2);

        assert_eq!(delete_rows(&conn, &tables.current, TagId(1), &[HashId(1), HashId(9)]).unwrap(), 1);
        assert_eq!(hashes_for_tag(&conn, &tables.current, TagId(1)).unwrap(), vec![HashId(2)]);
    }
}
