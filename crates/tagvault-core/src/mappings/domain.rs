//! One file domain's view of a tag service: storage rows, display rows and
//! both counts tables.
//!
//! The combined domain covers every file and its storage rows are the
//! storage truth. A specific domain covers the files current in one file
//! service and its storage rows are a cache of the truth restricted to that
//! population. Both are maintained by the same operations:
//!
//! - Display rows exist only for chained tags. An unchained tag displays
//!   exactly as it is stored, so its display count mirrors its storage
//!   count and no display rows are written.
//! - For a chained storage tag `s`, display rows are written for every tag
//!   in `implies(s)` before the storage rows change. On removal a display
//!   row `(T, h)` survives while some other implicator of `T` still has a
//!   storage row for `h`.

use super::counts::{self, TagCounts};
use super::storage::{delete_rows, filter_rows, filter_rows_any_tag, insert_rows};
use crate::db::{CombinedTables, SpecificTables, StorageTables};
use crate::display::TagDisplayGraph;
use crate::error::Result;
use crate::ids::{HashId, ServiceId, TagId};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

/// The file population a domain covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainScope {
    Combined,
    Specific(ServiceId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDomain {
    pub scope: DomainScope,
    pub tag_service_id: ServiceId,
    pub current: String,
    pub deleted: String,
    pub pending: String,
    pub display_current: String,
    pub display_pending: String,
    pub storage_counts: String,
    pub display_counts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Current,
    Pending,
}

impl MappingDomain {
    pub fn combined(tag_service_id: ServiceId) -> Self {
        let storage = StorageTables::new(tag_service_id);
        let combined = CombinedTables::new(tag_service_id);
        Self {
            scope: DomainScope::Combined,
            tag_service_id,
            current: storage.current,
            deleted: storage.deleted,
            pending: storage.pending,
            display_current: combined.display_current,
            display_pending: combined.display_pending,
            storage_counts: combined.storage_counts,
            display_counts: combined.display_counts,
        }
    }

    pub fn specific(file_service_id: ServiceId, tag_service_id: ServiceId) -> Self {
        let tables = SpecificTables::new(file_service_id, tag_service_id);
        Self {
            scope: DomainScope::Specific(file_service_id),
            tag_service_id,
            current: tables.current,
            deleted: tables.deleted,
            pending: tables.pending,
            display_current: tables.display_current,
            display_pending: tables.display_pending,
            storage_counts: tables.storage_counts,
            display_counts: tables.display_counts,
        }
    }

    fn storage_table(&self, layer: Layer) -> &str {
        match layer {
            Layer::Current => &self.current,
            Layer::Pending => &self.pending,
        }
    }

    fn display_table(&self, layer: Layer) -> &str {
        match layer {
            Layer::Current => &self.display_current,
            Layer::Pending => &self.display_pending,
        }
    }

    fn count_deltas(layer: Layer, delta: i64) -> (i64, i64) {
        match layer {
            Layer::Current => (delta, 0),
            Layer::Pending => (0, delta),
        }
    }

    // ========================================
    // Incremental maintenance
    // ========================================

    /// Make `tag_id` current for `hash_ids`. Returns the number of storage
    /// rows added.
    pub fn add_current(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        self.add(conn, graph, Layer::Current, tag_id, hash_ids, chained)
    }

    /// Remove current rows of `tag_id`. Returns the number of storage rows
    /// removed.
    pub fn remove_current(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        self.remove(conn, graph, Layer::Current, tag_id, hash_ids, chained)
    }

    pub fn add_pending(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        self.add(conn, graph, Layer::Pending, tag_id, hash_ids, chained)
    }

    pub fn remove_pending(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        self.remove(conn, graph, Layer::Pending, tag_id, hash_ids, chained)
    }

    /// Deletion records have no display side and no counts.
    pub fn add_deleted(&self, conn: &Connection, tag_id: TagId, hash_ids: &[HashId]) -> Result<usize> {
        Ok(insert_rows(conn, &self.deleted, tag_id, hash_ids)?.len())
    }

    pub fn remove_deleted(
        &self,
        conn: &Connection,
        tag_id: TagId,
        hash_ids: &[HashId],
    ) -> Result<usize> {
        delete_rows(conn, &self.deleted, tag_id, hash_ids)
    }

    fn add(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        layer: Layer,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        let storage = self.storage_table(layer);
        let existing = filter_rows(conn, storage, tag_id, hash_ids)?;
        let new: Vec<HashId> = hash_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .copied()
            .collect();
        if new.is_empty() {
            return Ok(0);
        }

        if chained {
            let display = self.display_table(layer);
            for implied in graph.implies(tag_id) {
                let inserted = insert_rows(conn, display, implied, &new)?.len() as i64;
                let (c, p) = Self::count_deltas(layer, inserted);
                counts::add_counts(conn, &self.display_counts, implied, c, p)?;
            }
        }

        let added = insert_rows(conn, storage, tag_id, &new)?.len();
        let (c, p) = Self::count_deltas(layer, added as i64);
        counts::add_counts(conn, &self.storage_counts, tag_id, c, p)?;
        if !chained {
            counts::add_counts(conn, &self.display_counts, tag_id, c, p)?;
        }
        Ok(added)
    }

    fn remove(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        layer: Layer,
        tag_id: TagId,
        hash_ids: &[HashId],
        chained: bool,
    ) -> Result<usize> {
        let storage = self.storage_table(layer);
        let present: Vec<HashId> = filter_rows(conn, storage, tag_id, hash_ids)?
            .into_iter()
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        if chained {
            let display = self.display_table(layer);
            for implied in graph.implies(tag_id) {
                let mut others = graph.implicators(implied);
                others.remove(&tag_id);
                let still_implied = filter_rows_any_tag(conn, storage, &others, &present)?;
                let orphaned: Vec<HashId> = present
                    .iter()
                    .filter(|id| !still_implied.contains(id))
                    .copied()
                    .collect();
                let removed = delete_rows(conn, display, implied, &orphaned)? as i64;
                let (c, p) = Self::count_deltas(layer, -removed);
                counts::add_counts(conn, &self.display_counts, implied, c, p)?;
            }
        }

        let removed = delete_rows(conn, storage, tag_id, &present)?;
        let (c, p) = Self::count_deltas(layer, -(removed as i64));
        counts::add_counts(conn, &self.storage_counts, tag_id, c, p)?;
        if !chained {
            counts::add_counts(conn, &self.display_counts, tag_id, c, p)?;
        }
        Ok(removed)
    }

    // ========================================
    // Regeneration
    // ========================================

    /// Rebuild display rows and display counts for `tag_ids` from this
    /// domain's storage rows under `graph`.
    pub fn regenerate_display(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_ids: &BTreeSet<TagId>,
    ) -> Result<()> {
        for &tag_id in tag_ids {
            for layer in [Layer::Current, Layer::Pending] {
                conn.prepare_cached(&format!(
                    "DELETE FROM {} WHERE tag_id = ?1",
                    self.display_table(layer)
                ))?
                .execute(params![tag_id])?;
            }

            let display_counts = if graph.is_chained(tag_id) {
                let mut tallied = TagCounts::default();
                for layer in [Layer::Current, Layer::Pending] {
                    let display = self.display_table(layer);
                    let storage = self.storage_table(layer);
                    let mut insert = conn.prepare_cached(&format!(
                        "INSERT OR IGNORE INTO {display} (tag_id, hash_id)
                         SELECT ?1, hash_id FROM {storage} WHERE tag_id = ?2"
                    ))?;
                    for implicator in graph.implicators(tag_id) {
                        insert.execute(params![tag_id, implicator])?;
                    }
                    let count: i64 = conn.query_row(
                        &format!("SELECT COUNT(*) FROM {display} WHERE tag_id = ?1"),
                        params![tag_id],
                        |row| row.get(0),
                    )?;
                    match layer {
                        Layer::Current => tallied.current = count,
                        Layer::Pending => tallied.pending = count,
                    }
                }
                tallied
            } else {
                counts::get_counts(conn, &self.storage_counts, tag_id)?
            };
            counts::set_counts(conn, &self.display_counts, tag_id, display_counts)?;
        }
        Ok(())
    }

    /// Rebuild every display row and display count.
    pub fn regenerate_all_display(&self, conn: &Connection, graph: &TagDisplayGraph) -> Result<()> {
        conn.execute_batch(&format!(
            "DELETE FROM {display_current};
             DELETE FROM {display_pending};
             DELETE FROM {display_counts};
             INSERT INTO {display_counts} (tag_id, current_count, pending_count)
                SELECT tag_id, current_count, pending_count FROM {storage_counts};",
            display_current = self.display_current,
            display_pending = self.display_pending,
            display_counts = self.display_counts,
            storage_counts = self.storage_counts,
        ))?;
        self.regenerate_display(conn, graph, &graph.chained_tags())
    }

    /// Rebuild storage counts from storage rows.
    pub fn regenerate_storage_counts(&self, conn: &Connection) -> Result<()> {
        counts::rebuild_from_tables(conn, &self.storage_counts, &self.current, &self.pending)
    }

    // ========================================
    // Reads
    // ========================================

    pub fn storage_counts(&self, conn: &Connection, tag_id: TagId) -> Result<TagCounts> {
        counts::get_counts(conn, &self.storage_counts, tag_id)
    }

    pub fn display_counts(&self, conn: &Connection, tag_id: TagId) -> Result<TagCounts> {
        counts::get_counts(conn, &self.display_counts, tag_id)
    }

    /// Files displaying `tag_id` as current.
    pub fn display_hashes(
        &self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        tag_id: TagId,
    ) -> Result<Vec<HashId>> {
        let table = if graph.is_chained(tag_id) {
            &self.display_current
        } else {
            &self.current
        };
        super::storage::hashes_for_tag(conn, table, tag_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::storage::hashes_for_tag;

    fn create_combined() -> (Connection, MappingDomain) {
        let conn = Connection::open_in_memory().unwrap();
        let service = ServiceId(3);
        StorageTables::new(service).create(&conn).unwrap();
        CombinedTables::new(service).create(&conn).unwrap();
        (conn, MappingDomain::combined(service))
    }

    fn h(ids: &[i64]) -> Vec<HashId> {
        ids.iter().map(|id| HashId(*id)).collect()
    }

    #[test]
    fn test_unchained_display_counts_follow_storage() {
        let (conn, domain) = create_combined();
        let graph = TagDisplayGraph::default();

        assert_eq!(domain.add_current(&conn, &graph, TagId(1), &h(&[1, 2]), false).unwrap(), 2);
        assert_eq!(domain.add_current(&conn, &graph, TagId(1), &h(&[2]), false).unwrap(), 0);
        assert_eq!(domain.storage_counts(&conn, TagId(1)).unwrap().current, 2);
        assert_eq!(domain.display_counts(&conn, TagId(1)).unwrap().current, 2);
        assert!(hashes_for_tag(&conn, &domain.display_current, TagId(1)).unwrap().is_empty());

        domain.remove_current(&conn, &graph, TagId(1), &h(&[1, 2]), false).unwrap();
        assert!(domain.display_counts(&conn, TagId(1)).unwrap().is_zero());
    }

    #[test]
    fn test_display_row_survives_while_another_implicator_holds_it() {
        let (conn, domain) = create_combined();
        // 1 and 2 are both siblings of 3
        let graph = TagDisplayGraph::build(&[(TagId(1), TagId(3)), (TagId(2), TagId(3))], &[]);

        domain.add_current(&conn, &graph, TagId(1), &h(&[10]), true).unwrap();
        domain.add_current(&conn, &graph, TagId(2), &h(&[10]), true).unwrap();
        assert_eq!(domain.display_counts(&conn, TagId(3)).unwrap().current, 1);

        domain.remove_current(&conn, &graph, TagId(1), &h(&[10]), true).unwrap();
        assert_eq!(domain.display_hashes(&conn, &graph, TagId(3)).unwrap(), h(&[10]));

        domain.remove_current(&conn, &graph, TagId(2), &h(&[10]), true).unwrap();
        assert!(domain.display_hashes(&conn, &graph, TagId(3)).unwrap().is_empty());
        assert!(domain.display_counts(&conn, TagId(3)).unwrap().is_zero());
    }

    #[test]
    fn test_regenerate_display_matches_incremental() {
        let (conn, domain) = create_combined();
        let empty = TagDisplayGraph::default();
        domain.add_current(&conn, &empty, TagId(1), &h(&[1, 2]), false).unwrap();
        domain.add_pending(&conn, &empty, TagId(2), &h(&[3]), false).unwrap();

        let graph = TagDisplayGraph::build(&[(TagId(1), TagId(2))], &[(TagId(2), TagId(7))]);
        domain
            .regenerate_display(&conn, &graph, &graph.component(TagId(1)))
            .unwrap();

        let ideal = domain.display_counts(&conn, TagId(2)).unwrap();
        assert_eq!(ideal, TagCounts { current: 2, pending: 1 });
        assert_eq!(domain.display_counts(&conn, TagId(7)).unwrap(), ideal);
        assert!(domain.display_counts(&conn, TagId(1)).unwrap().is_zero());
        assert_eq!(domain.storage_counts(&conn, TagId(1)).unwrap().current, 2);
    }
}
