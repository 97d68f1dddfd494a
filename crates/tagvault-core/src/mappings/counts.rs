//! Per-tag current/pending counts backing autocomplete.
//!
//! A counts table holds one row per tag with a non-zero count. Rows move by
//! delta and are removed once both counts reach zero.

use crate::error::Result;
use crate::ids::{id_list, TagId};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCounts {
    pub current: i64,
    pub pending: i64,
}

impl TagCounts {
    pub fn is_zero(&self) -> bool {
        self.current == 0 && self.pending == 0
    }
}

/// Move the counts of one tag by delta.
pub fn add_counts(
    conn: &Connection,
    table: &str,
    tag_id: TagId,
    current_delta: i64,
    pending_delta: i64,
) -> Result<()> {
    if current_delta == 0 && pending_delta == 0 {
        return Ok(());
    }
    conn.prepare_cached(&format!(
        "INSERT INTO {table} (tag_id, current_count, pending_count) VALUES (?1, ?2, ?3)
         ON CONFLICT(tag_id) DO UPDATE SET
            current_count = current_count + excluded.current_count,
            pending_count = pending_count + excluded.pending_count"
    ))?
    .execute(params![tag_id, current_delta, pending_delta])?;
    conn.prepare_cached(&format!(
        "DELETE FROM {table} WHERE tag_id = ?1 AND current_count = 0 AND pending_count = 0"
    ))?
    .execute(params![tag_id])?;
    Ok(())
}

/// Overwrite the counts of one tag.
pub fn set_counts(conn: &Connection, table: &str, tag_id: TagId, counts: TagCounts) -> Result<()> {
    if counts.is_zero() {
        conn.execute(&format!("DELETE FROM {table} WHERE tag_id = ?1"), params![tag_id])?;
    } else {
        conn.execute(
            &format!(
                "REPLACE INTO {table} (tag_id, current_count, pending_count) VALUES (?1, ?2, ?3)"
            ),
            params![tag_id, counts.current, counts.pending],
        )?;
    }
    Ok(())
}

pub fn get_counts(conn: &Connection, table: &str, tag_id: TagId) -> Result<TagCounts> {
    let counts = conn
        .query_row(
            &format!("SELECT current_count, pending_count FROM {table} WHERE tag_id = ?1"),
            params![tag_id],
            |row| {
                Ok(TagCounts {
                    current: row.get(0)?,
                    pending: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(counts.unwrap_or_default())
}

/// Counts for several tags. Tags without a row are absent from the map.
pub fn get_counts_many(
    conn: &Connection,
    table: &str,
    tag_ids: &[TagId],
) -> Result<BTreeMap<TagId, TagCounts>> {
    if tag_ids.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT tag_id, current_count, pending_count FROM {table} WHERE tag_id IN ({})",
        id_list(tag_ids)
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, TagId>(0)?,
                TagCounts {
                    current: row.get(1)?,
                    pending: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

/// Every row of a counts table.
pub fn all_counts(conn: &Connection, table: &str) -> Result<BTreeMap<TagId, TagCounts>> {
    let mut stmt =
        conn.prepare(&format!("SELECT tag_id, current_count, pending_count FROM {table}"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, TagId>(0)?,
                TagCounts {
                    current: row.get(1)?,
                    pending: row.get(2)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(rows)
}

/// Count rows per tag in a (current, pending) pair of mapping tables.
pub fn tally(
    conn: &Connection,
    current_table: &str,
    pending_table: &str,
) -> Result<BTreeMap<TagId, TagCounts>> {
    let mut tallied: BTreeMap<TagId, TagCounts> = BTreeMap::new();
    for (table, is_current) in [(current_table, true), (pending_table, false)] {
        let mut stmt =
            conn.prepare(&format!("SELECT tag_id, COUNT(*) FROM {table} GROUP BY tag_id"))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, TagId>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (tag_id, count) = row?;
            let entry = tallied.entry(tag_id).or_default();
            if is_current {
                entry.current = count;
            } else {
                entry.pending = count;
            }
        }
    }
    Ok(tallied)
}

/// Replace the whole counts table with a tally of the mapping tables.
pub fn rebuild_from_tables(
    conn: &Connection,
    counts_table: &str,
    current_table: &str,
    pending_table: &str,
) -> Result<()> {
    conn.execute(&format!("DELETE FROM {counts_table}"), [])?;
    for (tag_id, counts) in tally(conn, current_table, pending_table)? {
        set_counts(conn, counts_table, tag_id, counts)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CombinedTables;
    use crate::ids::ServiceId;

    #[test]
    fn test_rows_vanish_at_zero() {
        let conn = Connection::open_in_memory().unwrap();
        let tables = CombinedTables::new(ServiceId(2));
        tables.create(&conn).unwrap();
        let table = &tables.storage_counts;

        add_counts(&conn, table, TagId(1), 2, 1).unwrap();
        add_counts(&conn, table, TagId(1), 1, 0).unwrap();
        assert_eq!(
            get_counts(&conn, table, TagId(1)).unwrap(),
            TagCounts {
                current: 3,
                pending: 1
            }
        );

        add_counts(&conn, table, TagId(1), -3, -1).unwrap();
        assert!(all_counts(&conn, table).unwrap().is_empty());
        assert!(get_counts(&conn, table, TagId(1)).unwrap().is_zero());
    }

    #[test]
    fn test_rebuild_matches_tally() {
        let conn = Connection::open_in_memory().unwrap();
        let tables = CombinedTables::new(ServiceId(2));
        tables.create(&conn).unwrap();
        crate::mappings::storage::insert_rows(
            &conn,
            &tables.display_current,
            TagId(4),
            &[crate::ids::HashId(1), crate::ids::HashId(2)],
        )
        .unwrap();
        crate::mappings::storage::insert_rows(
            &conn,
            &tables.display_pending,
            TagId(5),
            &[crate::ids::HashId(1)],
        )
        .unwrap();

        rebuild_from_tables(
            &conn,
            &tables.display_counts,
            &tables.display_current,
            &tables.display_pending,
        )
        .unwrap();
        let counts = all_counts(&conn, &tables.display_counts).unwrap();
        assert_eq!(counts[&TagId(4)].current, 2);
        assert_eq!(counts[&TagId(5)].pending, 1);
    }
}
