//! Consistency checks of every derived structure against the rows it is
//! derived from.
//!
//! Nothing here writes. A clean report means every service counter equals a
//! recount, every counts table equals a tally, display rows match the
//! display graph, specific caches match storage truth restricted to their
//! file service, and the umbrella file services match their members.

use crate::db::StorageTables;
use crate::display::{load_graph, TagDisplayGraph};
use crate::error::Result;
use crate::ids::{id_list, HashId, ServiceId, TagId};
use crate::mappings::counts::{all_counts, tally};
use crate::mappings::{MappingDomain, SpecificPairs, TagCounts};
use crate::services::{count_service_info, get_service_info, ServiceInfoKind, ServiceRegistry, ServiceType};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum IntegrityProblem {
    ServiceCounter {
        service_id: ServiceId,
        kind: ServiceInfoKind,
        stored: Option<i64>,
        actual: i64,
    },
    CountsTable {
        table: String,
        tag_id: TagId,
        stored: TagCounts,
        actual: TagCounts,
    },
    DisplayRows {
        table: String,
        tag_id: TagId,
        missing: usize,
        extra: usize,
    },
    SpecificCache {
        table: String,
        missing: i64,
        extra: i64,
    },
    MissingSpecificCache {
        file_service_id: ServiceId,
        tag_service_id: ServiceId,
    },
    UmbrellaMembership {
        service_id: ServiceId,
        missing: usize,
        extra: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub problems: Vec<IntegrityProblem>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Run every check.
pub fn check_integrity(conn: &Connection) -> Result<IntegrityReport> {
    let services = ServiceRegistry::load(conn)?;
    let pairs = SpecificPairs::load(conn)?;
    let mut problems = Vec::new();

    check_service_counters(conn, &services, &mut problems)?;
    check_umbrellas(conn, &services, &mut problems)?;

    for tag_service_id in services.tag_service_ids() {
        let graph = load_graph(conn, tag_service_id)?;
        check_domain(conn, &graph, &MappingDomain::combined(tag_service_id), &mut problems)?;

        for file_service_id in services.specific_cache_file_service_ids() {
            if pairs.contains(file_service_id, tag_service_id) {
                check_specific_storage(conn, file_service_id, tag_service_id, &mut problems)?;
                let domain = MappingDomain::specific(file_service_id, tag_service_id);
                check_domain(conn, &graph, &domain, &mut problems)?;
            } else if needs_specific_cache(conn, file_service_id, tag_service_id)? {
                problems.push(IntegrityProblem::MissingSpecificCache {
                    file_service_id,
                    tag_service_id,
                });
            }
        }
    }

    for problem in &problems {
        warn!("Integrity problem: {:?}", problem);
    }
    Ok(IntegrityReport { problems })
}

fn check_service_counters(
    conn: &Connection,
    services: &ServiceRegistry,
    problems: &mut Vec<IntegrityProblem>,
) -> Result<()> {
    for service in services.services() {
        for &kind in ServiceInfoKind::kinds_for(service.service_type) {
            let stored = get_service_info(conn, service.id, kind)?;
            let actual = count_service_info(conn, service.id, service.service_type, kind)?;
            if stored != Some(actual) {
                problems.push(IntegrityProblem::ServiceCounter {
                    service_id: service.id,
                    kind,
                    stored,
                    actual,
                });
            }
        }
    }
    Ok(())
}

// ========================================
// File services
// ========================================

fn hash_set(conn: &Connection, sql: &str, service_ids: &[ServiceId]) -> Result<BTreeSet<HashId>> {
    if service_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    let mut stmt = conn.prepare(&sql.replace("{ids}", &id_list(service_ids)))?;
    let set = stmt
        .query_map([], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(set)
}

fn compare_membership(
    service_id: ServiceId,
    expected: &BTreeSet<HashId>,
    actual: &BTreeSet<HashId>,
    problems: &mut Vec<IntegrityProblem>,
) {
    let missing = expected.difference(actual).count();
    let extra = actual.difference(expected).count();
    if missing + extra > 0 {
        problems.push(IntegrityProblem::UmbrellaMembership {
            service_id,
            missing,
            extra,
        });
    }
}

fn check_umbrellas(
    conn: &Connection,
    services: &ServiceRegistry,
    problems: &mut Vec<IntegrityProblem>,
) -> Result<()> {
    let umbrella = services.umbrella_ids()?;
    let current_in = "SELECT DISTINCT hash_id FROM current_files WHERE service_id IN ({ids})";

    let domains = services.local_file_domain_ids();
    let expected_media = hash_set(conn, current_in, &domains)?;
    let media = hash_set(conn, current_in, &[umbrella.combined_local_media])?;
    compare_membership(umbrella.combined_local_media, &expected_media, &media, problems);

    let covered = services.ids_where(ServiceType::counts_toward_combined_deleted);
    let expected_deleted = hash_set(
        conn,
        "SELECT DISTINCT hash_id FROM deleted_files WHERE service_id IN ({ids})",
        &covered,
    )?;
    let deleted = hash_set(conn, current_in, &[umbrella.combined_deleted_file])?;
    compare_membership(umbrella.combined_deleted_file, &expected_deleted, &deleted, problems);

    // every locally stored file is in combined local file
    let mut stored = expected_media;
    stored.extend(hash_set(conn, current_in, &[umbrella.local_update, umbrella.trash])?);
    let combined = hash_set(conn, current_in, &[umbrella.combined_local_file])?;
    let missing = stored.difference(&combined).count();
    if missing > 0 {
        problems.push(IntegrityProblem::UmbrellaMembership {
            service_id: umbrella.combined_local_file,
            missing,
            extra: 0,
        });
    }
    Ok(())
}

// ========================================
// Mapping domains
// ========================================

fn compare_counts(
    table: &str,
    stored: &BTreeMap<TagId, TagCounts>,
    actual: &BTreeMap<TagId, TagCounts>,
    problems: &mut Vec<IntegrityProblem>,
) {
    let tags: BTreeSet<TagId> = stored.keys().chain(actual.keys()).copied().collect();
    for tag_id in tags {
        let stored_counts = stored.get(&tag_id).copied().unwrap_or_default();
        let actual_counts = actual.get(&tag_id).copied().unwrap_or_default();
        if stored_counts != actual_counts {
            problems.push(IntegrityProblem::CountsTable {
                table: table.to_string(),
                tag_id,
                stored: stored_counts,
                actual: actual_counts,
            });
        }
    }
}

fn hashes_for_tags(conn: &Connection, table: &str, tag_ids: &BTreeSet<TagId>) -> Result<BTreeSet<HashId>> {
    if tag_ids.is_empty() {
        return Ok(BTreeSet::new());
    }
    let ids: Vec<TagId> = tag_ids.iter().copied().collect();
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT hash_id FROM {table} WHERE tag_id IN ({})",
        id_list(&ids)
    ))?;
    let set = stmt
        .query_map([], |row| row.get::<_, HashId>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(set)
}

fn tags_in(conn: &Connection, table: &str) -> Result<BTreeSet<TagId>> {
    let mut stmt = conn.prepare(&format!("SELECT DISTINCT tag_id FROM {table}"))?;
    let set = stmt
        .query_map([], |row| row.get::<_, TagId>(0))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(set)
}

/// Counts tables and display rows of one domain.
fn check_domain(
    conn: &Connection,
    graph: &TagDisplayGraph,
    domain: &MappingDomain,
    problems: &mut Vec<IntegrityProblem>,
) -> Result<()> {
    let storage_tally = tally(conn, &domain.current, &domain.pending)?;
    let stored_storage = all_counts(conn, &domain.storage_counts)?;
    compare_counts(&domain.storage_counts, &stored_storage, &storage_tally, problems);

    let chained = graph.chained_tags();
    for (storage, display) in [
        (&domain.current, &domain.display_current),
        (&domain.pending, &domain.display_pending),
    ] {
        let mut tags = tags_in(conn, display)?;
        tags.extend(chained.iter().copied());
        for tag_id in tags {
            let expected = if chained.contains(&tag_id) {
                hashes_for_tags(conn, storage, &graph.implicators(tag_id))?
            } else {
                BTreeSet::new()
            };
            let actual = hashes_for_tags(conn, display, &BTreeSet::from([tag_id]))?;
            let missing = expected.difference(&actual).count();
            let extra = actual.difference(&expected).count();
            if missing + extra > 0 {
                problems.push(IntegrityProblem::DisplayRows {
                    table: display.clone(),
                    tag_id,
                    missing,
                    extra,
                });
            }
        }
    }

    let mut display_tally: BTreeMap<TagId, TagCounts> = storage_tally
        .into_iter()
        .filter(|(tag_id, _)| !chained.contains(tag_id))
        .collect();
    display_tally.extend(tally(conn, &domain.display_current, &domain.display_pending)?);
    let stored_display = all_counts(conn, &domain.display_counts)?;
    compare_counts(&domain.display_counts, &stored_display, &display_tally, problems);
    Ok(())
}

/// Specific storage caches hold exactly the truth rows of files current in
/// the file service.
fn check_specific_storage(
    conn: &Connection,
    file_service_id: ServiceId,
    tag_service_id: ServiceId,
    problems: &mut Vec<IntegrityProblem>,
) -> Result<()> {
    let truth = StorageTables::new(tag_service_id);
    let cache = MappingDomain::specific(file_service_id, tag_service_id);
    for (truth_table, cache_table) in [
        (&truth.current, &cache.current),
        (&truth.pending, &cache.pending),
        (&truth.deleted, &cache.deleted),
    ] {
        let missing: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {truth_table} AS t
                 JOIN current_files AS f ON f.hash_id = t.hash_id AND f.service_id = ?1
                 WHERE NOT EXISTS (
                    SELECT 1 FROM {cache_table} AS c WHERE c.tag_id = t.tag_id AND c.hash_id = t.hash_id
                 )"
            ),
            params![file_service_id],
            |row| row.get(0),
        )?;
        let extra: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {cache_table} AS c
                 WHERE NOT EXISTS (
                    SELECT 1 FROM {truth_table} AS t
                    JOIN current_files AS f ON f.hash_id = t.hash_id AND f.service_id = ?1
                    WHERE t.tag_id = c.tag_id AND t.hash_id = c.hash_id
                 )"
            ),
            params![file_service_id],
            |row| row.get(0),
        )?;
        if missing + extra > 0 {
            problems.push(IntegrityProblem::SpecificCache {
                table: cache_table.clone(),
                missing,
                extra,
            });
        }
    }
    Ok(())
}

/// Whether some file current in the file service has a storage row in the
/// tag service, so a specific cache should exist.
fn needs_specific_cache(conn: &Connection, file_service_id: ServiceId, tag_service_id: ServiceId) -> Result<bool> {
    let truth = StorageTables::new(tag_service_id);
    for table in [&truth.current, &truth.pending, &truth.deleted] {
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS (
                    SELECT 1 FROM {table} AS t
                    JOIN current_files AS f ON f.hash_id = t.hash_id AND f.service_id = ?1
                 )"
            ),
            params![file_service_id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;
    use crate::services::ensure_fixed_services;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_fixed_services(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_library_is_clean() {
        let conn = create_test_conn();
        assert!(check_integrity(&conn).unwrap().is_clean());
    }

    #[test]
    fn test_detects_drifted_counter() {
        let conn = create_test_conn();
        let services = ServiceRegistry::load(&conn).unwrap();
        let trash = services.umbrella_ids().unwrap().trash;
        conn.execute(
            "UPDATE service_info SET info = 7 WHERE service_id = ?1 AND info_type = ?2",
            params![trash, ServiceInfoKind::NumFiles.to_db()],
        )
        .unwrap();

        let report = check_integrity(&conn).unwrap();
        assert_eq!(
            report.problems,
            vec![IntegrityProblem::ServiceCounter {
                service_id: trash,
                kind: ServiceInfoKind::NumFiles,
                stored: Some(7),
                actual: 0,
            }]
        );
    }

    #[test]
    fn test_detects_stray_display_row() {
        let conn = create_test_conn();
        let services = ServiceRegistry::load(&conn).unwrap();
        let tag_service = services.tag_service_ids()[0];
        let domain = MappingDomain::combined(tag_service);
        conn.execute(
            &format!("INSERT INTO {} (tag_id, hash_id) VALUES (1, 1)", domain.display_current),
            [],
        )
        .unwrap();

        let report = check_integrity(&conn).unwrap();
        assert!(report.problems.iter().any(|p| matches!(
            p,
            IntegrityProblem::DisplayRows { extra: 1, .. }
        )));
    }
}
