//! Specific mapping caches: one storage and display cache per
//! (file service, tag service) pair.
//!
//! Pairs are created lazily. A pair is generated the first time a file
//! current in the file service has any mapping row in the tag service, so a
//! missing pair always means the restricted view is empty.

use super::domain::MappingDomain;
use super::storage::{insert_rows, rows_for_hashes};
use crate::db::{SpecificTables, StorageTables};
use crate::display::TagDisplayGraph;
use crate::error::Result;
use crate::ids::{HashId, ServiceId};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// The set of pairs whose specific caches exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecificPairs {
    pairs: BTreeSet<(ServiceId, ServiceId)>,
}

impl SpecificPairs {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT file_service_id, tag_service_id FROM mapping_cache_pairs")?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, ServiceId>(0)?, row.get::<_, ServiceId>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(Self { pairs })
    }

    pub fn contains(&self, file_service_id: ServiceId, tag_service_id: ServiceId) -> bool {
        self.pairs.contains(&(file_service_id, tag_service_id))
    }

    /// File services with a cache for this tag service.
    pub fn file_services_for(&self, tag_service_id: ServiceId) -> Vec<ServiceId> {
        self.pairs
            .iter()
            .filter(|(_, t)| *t == tag_service_id)
            .map(|(f, _)| *f)
            .collect()
    }

    /// Tag services with a cache for this file service.
    pub fn tag_services_for(&self, file_service_id: ServiceId) -> Vec<ServiceId> {
        self.pairs
            .iter()
            .filter(|(f, _)| *f == file_service_id)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServiceId, ServiceId)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Create and populate the caches for a pair from storage truth.
    pub fn generate(
        &mut self,
        conn: &Connection,
        graph: &TagDisplayGraph,
        file_service_id: ServiceId,
        tag_service_id: ServiceId,
    ) -> Result<()> {
        let tables = SpecificTables::new(file_service_id, tag_service_id);
        tables.drop(conn)?;
        tables.create(conn)?;

        let storage = StorageTables::new(tag_service_id);
        for (cache, truth) in [
            (&tables.current, &storage.current),
            (&tables.deleted, &storage.deleted),
            (&tables.pending, &storage.pending),
        ] {
            conn.execute(
                &format!(
                    "INSERT INTO {cache} (tag_id, hash_id)
                     SELECT tag_id, hash_id FROM {truth}
                     JOIN current_files USING (hash_id)
                     WHERE current_files.service_id = ?1"
                ),
                params![file_service_id],
            )?;
        }

        let domain = MappingDomain::specific(file_service_id, tag_service_id);
        domain.regenerate_storage_counts(conn)?;
        domain.regenerate_all_display(conn, graph)?;

        conn.execute(
            "INSERT OR IGNORE INTO mapping_cache_pairs (file_service_id, tag_service_id) VALUES (?1, ?2)",
            params![file_service_id, tag_service_id],
        )?;
        self.pairs.insert((file_service_id, tag_service_id));
        info!(
            "Generated specific mapping cache for file service {} and tag service {}",
            file_service_id, tag_service_id
        );
        Ok(())
    }

    pub fn drop_pair(
        &mut self,
        conn: &Connection,
        file_service_id: ServiceId,
        tag_service_id: ServiceId,
    ) -> Result<()> {
        SpecificTables::new(file_service_id, tag_service_id).drop(conn)?;
        conn.execute(
            "DELETE FROM mapping_cache_pairs WHERE file_service_id = ?1 AND tag_service_id = ?2",
            params![file_service_id, tag_service_id],
        )?;
        self.pairs.remove(&(file_service_id, tag_service_id));
        debug!(
            "Dropped specific mapping cache for file service {} and tag service {}",
            file_service_id, tag_service_id
        );
        Ok(())
    }

    /// Drop every pair touching a service.
    pub fn drop_service(&mut self, conn: &Connection, service_id: ServiceId) -> Result<()> {
        let doomed: Vec<(ServiceId, ServiceId)> = self
            .pairs
            .iter()
            .filter(|(f, t)| *f == service_id || *t == service_id)
            .copied()
            .collect();
        for (f, t) in doomed {
            self.drop_pair(conn, f, t)?;
        }
        Ok(())
    }
}

/// Copy storage truth for files that just joined the file service.
pub fn add_files_to_pair(
    conn: &Connection,
    graph: &TagDisplayGraph,
    file_service_id: ServiceId,
    tag_service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<()> {
    let storage = StorageTables::new(tag_service_id);
    let domain = MappingDomain::specific(file_service_id, tag_service_id);

    for (tag_id, hashes) in rows_for_hashes(conn, &storage.current, hash_ids)? {
        domain.add_current(conn, graph, tag_id, &hashes, graph.is_chained(tag_id))?;
    }
    for (tag_id, hashes) in rows_for_hashes(conn, &storage.pending, hash_ids)? {
        domain.add_pending(conn, graph, tag_id, &hashes, graph.is_chained(tag_id))?;
    }
    for (tag_id, hashes) in rows_for_hashes(conn, &storage.deleted, hash_ids)? {
        insert_rows(conn, &domain.deleted, tag_id, &hashes)?;
    }
    Ok(())
}

/// Remove everything the cache holds for files that left the file service.
pub fn delete_files_from_pair(
    conn: &Connection,
    graph: &TagDisplayGraph,
    file_service_id: ServiceId,
    tag_service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<()> {
    let domain = MappingDomain::specific(file_service_id, tag_service_id);

    for (tag_id, hashes) in rows_for_hashes(conn, &domain.current, hash_ids)? {
        domain.remove_current(conn, graph, tag_id, &hashes, graph.is_chained(tag_id))?;
    }
    for (tag_id, hashes) in rows_for_hashes(conn, &domain.pending, hash_ids)? {
        domain.remove_pending(conn, graph, tag_id, &hashes, graph.is_chained(tag_id))?;
    }
    for (tag_id, hashes) in rows_for_hashes(conn, &domain.deleted, hash_ids)? {
        domain.remove_deleted(conn, tag_id, &hashes)?;
    }
    Ok(())
}

/// Whether any of the files has a storage row in the tag service.
pub fn has_any_mappings(
    conn: &Connection,
    tag_service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<bool> {
    let storage = StorageTables::new(tag_service_id);
    for table in [&storage.current, &storage.pending, &storage.deleted] {
        if !super::storage::hashes_with_any_row(conn, table, hash_ids)?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;
    use crate::db::CombinedTables;
    use crate::files::storage::insert_current;
    use crate::ids::TagId;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        StorageTables::new(ServiceId(20)).create(&conn).unwrap();
        CombinedTables::new(ServiceId(20)).create(&conn).unwrap();
        conn
    }

    #[test]
    fn test_generate_restricts_to_population() {
        let conn = create_test_conn();
        let (files, tags) = (ServiceId(1), ServiceId(20));
        let storage = StorageTables::new(tags);
        insert_rows(&conn, &storage.current, TagId(5), &[HashId(1), HashId(2)]).unwrap();
        insert_current(&conn, files, &[(HashId(1), None)]).unwrap();

        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        pairs.generate(&conn, &graph, files, tags).unwrap();
        assert!(pairs.contains(files, tags));
        assert_eq!(SpecificPairs::load(&conn).unwrap(), pairs);

        let domain = MappingDomain::specific(files, tags);
        assert_eq!(domain.storage_counts(&conn, TagId(5)).unwrap().current, 1);
        assert_eq!(domain.display_counts(&conn, TagId(5)).unwrap().current, 1);

        add_files_to_pair(&conn, &graph, files, tags, &[HashId(2)]).unwrap();
        assert_eq!(domain.storage_counts(&conn, TagId(5)).unwrap().current, 2);

        delete_files_from_pair(&conn, &graph, files, tags, &[HashId(1), HashId(2)]).unwrap();
        assert!(domain.storage_counts(&conn, TagId(5)).unwrap().is_zero());

        pairs.drop_service(&conn, tags).unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_has_any_mappings_sees_deleted_rows() {
        let conn = create_test_conn();
        let storage = StorageTables::new(ServiceId(20));
        assert!(!has_any_mappings(&conn, ServiceId(20), &[HashId(4)]).unwrap());
        insert_rows(&conn, &storage.deleted, TagId(1), &[HashId(4)]).unwrap();
        assert!(has_any_mappings(&conn, ServiceId(20), &[HashId(4)]).unwrap());
    }
}
