//! Per-service running counters.
//!
//! Counters are seeded at zero when a service is created and only ever move
//! by delta. Deltas for one package are accumulated in `ServiceInfoDeltas`
//! and written with a single `UPDATE` per (service, kind).

use super::types::ServiceType;
use crate::db::StorageTables;
use crate::error::Result;
use crate::files::metadata::VIEWABLE_MIME_SQL;
use crate::ids::ServiceId;
use crate::status::ContentStatus;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceInfoKind {
    NumFiles,
    TotalSize,
    NumViewableFiles,
    NumInbox,
    NumDeletedFiles,
    NumPendingFiles,
    NumPetitionedFiles,
    NumMappings,
    NumDeletedMappings,
    NumPendingMappings,
    NumPetitionedMappings,
    NumPendingTagSiblings,
    NumPetitionedTagSiblings,
    NumPendingTagParents,
    NumPetitionedTagParents,
    NumNotes,
}

const FILE_KINDS: &[ServiceInfoKind] = &[
    ServiceInfoKind::NumFiles,
    ServiceInfoKind::TotalSize,
    ServiceInfoKind::NumViewableFiles,
    ServiceInfoKind::NumInbox,
    ServiceInfoKind::NumDeletedFiles,
    ServiceInfoKind::NumPendingFiles,
    ServiceInfoKind::NumPetitionedFiles,
];

const TAG_KINDS: &[ServiceInfoKind] = &[
    ServiceInfoKind::NumFiles,
    ServiceInfoKind::NumMappings,
    ServiceInfoKind::NumDeletedMappings,
    ServiceInfoKind::NumPendingMappings,
    ServiceInfoKind::NumPetitionedMappings,
    ServiceInfoKind::NumPendingTagSiblings,
    ServiceInfoKind::NumPetitionedTagSiblings,
    ServiceInfoKind::NumPendingTagParents,
    ServiceInfoKind::NumPetitionedTagParents,
];

const RATING_KINDS: &[ServiceInfoKind] = &[ServiceInfoKind::NumFiles];

const NOTES_KINDS: &[ServiceInfoKind] = &[ServiceInfoKind::NumNotes];

impl ServiceInfoKind {
    pub fn to_db(self) -> i64 {
        match self {
            ServiceInfoKind::NumFiles => 0,
            ServiceInfoKind::TotalSize => 1,
            ServiceInfoKind::NumViewableFiles => 2,
            ServiceInfoKind::NumInbox => 3,
            ServiceInfoKind::NumDeletedFiles => 4,
            ServiceInfoKind::NumPendingFiles => 5,
            ServiceInfoKind::NumPetitionedFiles => 6,
            ServiceInfoKind::NumMappings => 10,
            ServiceInfoKind::NumDeletedMappings => 11,
            ServiceInfoKind::NumPendingMappings => 12,
            ServiceInfoKind::NumPetitionedMappings => 13,
            ServiceInfoKind::NumPendingTagSiblings => 14,
            ServiceInfoKind::NumPetitionedTagSiblings => 15,
            ServiceInfoKind::NumPendingTagParents => 16,
            ServiceInfoKind::NumPetitionedTagParents => 17,
            ServiceInfoKind::NumNotes => 20,
        }
    }

    /// The counters a service of this type carries.
    pub fn kinds_for(service_type: ServiceType) -> &'static [ServiceInfoKind] {
        if service_type.is_file_service() {
            FILE_KINDS
        } else if service_type.is_tag_service() {
            TAG_KINDS
        } else if service_type == ServiceType::LocalRating {
            RATING_KINDS
        } else {
            NOTES_KINDS
        }
    }
}

/// Accumulated counter deltas for one unit of work.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceInfoDeltas {
    deltas: BTreeMap<(ServiceId, ServiceInfoKind), i64>,
}

impl ServiceInfoDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service_id: ServiceId, kind: ServiceInfoKind, delta: i64) {
        if delta == 0 {
            return;
        }
        *self.deltas.entry((service_id, kind)).or_insert(0) += delta;
    }

    pub fn get(&self, service_id: ServiceId, kind: ServiceInfoKind) -> i64 {
        self.deltas.get(&(service_id, kind)).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(|d| *d == 0)
    }

    /// Write every non-zero delta, one statement per (service, kind).
    pub fn flush(&mut self, conn: &Connection) -> Result<usize> {
        let mut stmt = conn.prepare_cached(
            "UPDATE service_info SET info = info + ?1 WHERE service_id = ?2 AND info_type = ?3",
        )?;
        let mut written = 0;
        for ((service_id, kind), delta) in std::mem::take(&mut self.deltas) {
            if delta == 0 {
                continue;
            }
            stmt.execute(params![delta, service_id, kind.to_db()])?;
            written += 1;
        }
        if written > 0 {
            debug!("Flushed {} service counter updates", written);
        }
        Ok(written)
    }
}

/// Create zeroed counters for a new service.
pub fn seed_service_info(
    conn: &Connection,
    service_id: ServiceId,
    service_type: ServiceType,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO service_info (service_id, info_type, info) VALUES (?1, ?2, 0)",
    )?;
    for kind in ServiceInfoKind::kinds_for(service_type) {
        stmt.execute(params![service_id, kind.to_db()])?;
    }
    Ok(())
}

pub fn get_service_info(
    conn: &Connection,
    service_id: ServiceId,
    kind: ServiceInfoKind,
) -> Result<Option<i64>> {
    let info = conn
        .query_row(
            "SELECT info FROM service_info WHERE service_id = ?1 AND info_type = ?2",
            params![service_id, kind.to_db()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(info)
}

/// Count the true cardinality behind a counter. Used by regeneration and
/// integrity checks, never on the hot path.
pub fn count_service_info(
    conn: &Connection,
    service_id: ServiceId,
    service_type: ServiceType,
    kind: ServiceInfoKind,
) -> Result<i64> {
    let one = |sql: String| -> Result<i64> {
        Ok(conn.query_row(&sql, params![service_id], |row| row.get(0))?)
    };
    let unscoped =
        |sql: String| -> Result<i64> { Ok(conn.query_row(&sql, [], |row| row.get(0))?) };
    let edge_count = |table: &str, status: ContentStatus| -> Result<i64> {
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE service_id = ?1 AND status = ?2"),
            params![service_id, status.to_db()],
            |row| row.get(0),
        )?)
    };

    if service_type.is_tag_service() {
        let tables = StorageTables::new(service_id);
        return match kind {
            ServiceInfoKind::NumFiles => {
                unscoped(format!("SELECT COUNT(DISTINCT hash_id) FROM {}", tables.current))
            }
            ServiceInfoKind::NumMappings => {
                unscoped(format!("SELECT COUNT(*) FROM {}", tables.current))
            }
            ServiceInfoKind::NumDeletedMappings => {
                unscoped(format!("SELECT COUNT(*) FROM {}", tables.deleted))
            }
            ServiceInfoKind::NumPendingMappings => {
                unscoped(format!("SELECT COUNT(*) FROM {}", tables.pending))
            }
            ServiceInfoKind::NumPetitionedMappings => {
                unscoped(format!("SELECT COUNT(*) FROM {}", tables.petitioned))
            }
            ServiceInfoKind::NumPendingTagSiblings => {
                edge_count("tag_sibling_petitions", ContentStatus::Pending)
            }
            ServiceInfoKind::NumPetitionedTagSiblings => {
                edge_count("tag_sibling_petitions", ContentStatus::Petitioned)
            }
            ServiceInfoKind::NumPendingTagParents => {
                edge_count("tag_parent_petitions", ContentStatus::Pending)
            }
            ServiceInfoKind::NumPetitionedTagParents => {
                edge_count("tag_parent_petitions", ContentStatus::Petitioned)
            }
            _ => Ok(0),
        };
    }

    match kind {
        ServiceInfoKind::NumFiles if service_type == ServiceType::LocalRating => one(
            "SELECT COUNT(*) FROM local_ratings WHERE service_id = ?1".to_string(),
        ),
        ServiceInfoKind::NumNotes => unscoped("SELECT COUNT(*) FROM file_notes".to_string()),
        ServiceInfoKind::NumFiles => {
            one("SELECT COUNT(*) FROM current_files WHERE service_id = ?1".to_string())
        }
        ServiceInfoKind::TotalSize => one(
            "SELECT COALESCE(SUM(size), 0) FROM current_files
             JOIN files_info USING (hash_id) WHERE service_id = ?1"
                .to_string(),
        ),
        ServiceInfoKind::NumViewableFiles => one(format!(
            "SELECT COUNT(*) FROM current_files
             JOIN files_info USING (hash_id) WHERE service_id = ?1 AND {}",
            VIEWABLE_MIME_SQL
        )),
        ServiceInfoKind::NumInbox => one(
            "SELECT COUNT(*) FROM current_files
             JOIN file_inbox USING (hash_id) WHERE service_id = ?1"
                .to_string(),
        ),
        ServiceInfoKind::NumDeletedFiles => {
            one("SELECT COUNT(*) FROM deleted_files WHERE service_id = ?1".to_string())
        }
        ServiceInfoKind::NumPendingFiles => {
            one("SELECT COUNT(*) FROM pending_files WHERE service_id = ?1".to_string())
        }
        ServiceInfoKind::NumPetitionedFiles => {
            one("SELECT COUNT(*) FROM petitioned_files WHERE service_id = ?1".to_string())
        }
        _ => Ok(0),
    }
}

/// Recount every counter of a service and overwrite the stored values.
pub fn regenerate_service_info(
    conn: &Connection,
    service_id: ServiceId,
    service_type: ServiceType,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO service_info (service_id, info_type, info) VALUES (?1, ?2, ?3)
         ON CONFLICT(service_id, info_type) DO UPDATE SET info = excluded.info",
    )?;
    for kind in ServiceInfoKind::kinds_for(service_type) {
        let count = count_service_info(conn, service_id, service_type, *kind)?;
        stmt.execute(params![service_id, kind.to_db(), count])?;
    }
    debug!("Regenerated service info for service {}", service_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;

    #[test]
    fn test_deltas_merge_and_flush_once() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let service = ServiceId(1);
        seed_service_info(&conn, service, ServiceType::LocalFileDomain).unwrap();

        let mut deltas = ServiceInfoDeltas::new();
        deltas.add(service, ServiceInfoKind::NumFiles, 3);
        deltas.add(service, ServiceInfoKind::NumFiles, -1);
        deltas.add(service, ServiceInfoKind::TotalSize, 0);
        assert_eq!(deltas.flush(&conn).unwrap(), 1);
        assert!(deltas.is_empty());

        assert_eq!(
            get_service_info(&conn, service, ServiceInfoKind::NumFiles).unwrap(),
            Some(2)
        );
        assert_eq!(
            get_service_info(&conn, service, ServiceInfoKind::TotalSize).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_tag_services_do_not_carry_file_size_counters() {
        let kinds = ServiceInfoKind::kinds_for(ServiceType::LocalTag);
        assert!(kinds.contains(&ServiceInfoKind::NumMappings));
        assert!(!kinds.contains(&ServiceInfoKind::TotalSize));
    }
}
