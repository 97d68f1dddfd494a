//! Service registry: id ↔ key ↔ type for every file, tag, rating and notes
//! service, plus the fixed umbrella services every library carries.

pub mod info;
pub mod types;

pub use info::{
    count_service_info, get_service_info, regenerate_service_info, seed_service_info,
    ServiceInfoDeltas, ServiceInfoKind,
};
pub use types::{ServiceKey, ServiceType};

use crate::db::{CombinedTables, StorageTables};
use crate::error::{Result, TagVaultError};
use crate::ids::ServiceId;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// A registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub key: ServiceKey,
    pub service_type: ServiceType,
    pub name: String,
}

/// Ids of the services the cascade logic refers to by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmbrellaIds {
    pub combined_local_file: ServiceId,
    pub combined_local_media: ServiceId,
    pub combined_deleted_file: ServiceId,
    pub trash: ServiceId,
    pub local_update: ServiceId,
}

/// Services created when a library is first initialized.
pub fn fixed_services() -> Vec<(ServiceKey, ServiceType, &'static str)> {
    vec![
        (
            ServiceKey::combined_local_file(),
            ServiceType::CombinedLocalFile,
            "all local files",
        ),
        (
            ServiceKey::combined_local_media(),
            ServiceType::CombinedLocalMedia,
            "all my files",
        ),
        (
            ServiceKey::combined_deleted_file(),
            ServiceType::CombinedDeletedFile,
            "all deleted files",
        ),
        (ServiceKey::trash(), ServiceType::Trash, "trash"),
        (
            ServiceKey::local_update(),
            ServiceType::LocalUpdateDomain,
            "repository updates",
        ),
        (
            ServiceKey::default_local_file(),
            ServiceType::LocalFileDomain,
            "my files",
        ),
        (
            ServiceKey::default_local_tag(),
            ServiceType::LocalTag,
            "my tags",
        ),
        (ServiceKey::local_notes(), ServiceType::LocalNotes, "notes"),
    ]
}

/// In-memory view of the `services` table.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    by_id: BTreeMap<ServiceId, Service>,
    by_key: HashMap<ServiceKey, ServiceId>,
}

impl ServiceRegistry {
    /// Read every service row.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn
            .prepare("SELECT service_id, service_key, service_type, name FROM services")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, ServiceId>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut registry = Self::default();
        for row in rows {
            let (id, key, type_code, name) = row?;
            let service_type =
                ServiceType::from_db(type_code).ok_or_else(|| TagVaultError::Database {
                    message: format!("Unknown service type {} for service {}", type_code, id),
                    source: None,
                })?;
            registry.insert(Service {
                id,
                key: ServiceKey::new(key),
                service_type,
                name,
            });
        }
        Ok(registry)
    }

    pub fn get(&self, id: ServiceId) -> Option<&Service> {
        self.by_id.get(&id)
    }

    /// Look up a service id, failing for ids this library does not know.
    pub fn require(&self, id: ServiceId) -> Result<&Service> {
        self.by_id.get(&id).ok_or(TagVaultError::UnknownId {
            kind: "service",
            id: id.get(),
        })
    }

    pub fn by_key(&self, key: &ServiceKey) -> Option<&Service> {
        self.by_key.get(key).and_then(|id| self.by_id.get(id))
    }

    pub fn require_key(&self, key: &ServiceKey) -> Result<&Service> {
        self.by_key(key).ok_or_else(|| TagVaultError::ServiceNotFound {
            key: key.to_hex(),
        })
    }

    pub fn service_type(&self, id: ServiceId) -> Option<ServiceType> {
        self.by_id.get(&id).map(|s| s.service_type)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.by_id.values()
    }

    /// Ids of all services whose type satisfies `predicate`, in id order.
    pub fn ids_where(&self, predicate: impl Fn(ServiceType) -> bool) -> Vec<ServiceId> {
        self.by_id
            .values()
            .filter(|s| predicate(s.service_type))
            .map(|s| s.id)
            .collect()
    }

    pub fn ids_of_type(&self, service_type: ServiceType) -> Vec<ServiceId> {
        self.ids_where(|t| t == service_type)
    }

    pub fn tag_service_ids(&self) -> Vec<ServiceId> {
        self.ids_where(ServiceType::is_tag_service)
    }

    pub fn local_file_domain_ids(&self) -> Vec<ServiceId> {
        self.ids_of_type(ServiceType::LocalFileDomain)
    }

    /// File services that get specific mapping caches.
    pub fn specific_cache_file_service_ids(&self) -> Vec<ServiceId> {
        self.ids_where(ServiceType::has_specific_mapping_cache)
    }

    pub fn umbrella_ids(&self) -> Result<UmbrellaIds> {
        let single = |service_type: ServiceType| -> Result<ServiceId> {
            self.ids_of_type(service_type)
                .first()
                .copied()
                .ok_or_else(|| TagVaultError::Config {
                    message: format!("Library has no {} service", service_type),
                })
        };
        Ok(UmbrellaIds {
            combined_local_file: single(ServiceType::CombinedLocalFile)?,
            combined_local_media: single(ServiceType::CombinedLocalMedia)?,
            combined_deleted_file: single(ServiceType::CombinedDeletedFile)?,
            trash: single(ServiceType::Trash)?,
            local_update: single(ServiceType::LocalUpdateDomain)?,
        })
    }

    pub(crate) fn insert(&mut self, service: Service) {
        self.by_key.insert(service.key.clone(), service.id);
        self.by_id.insert(service.id, service);
    }

    pub(crate) fn remove(&mut self, id: ServiceId) -> Option<Service> {
        let service = self.by_id.remove(&id)?;
        self.by_key.remove(&service.key);
        Some(service)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Insert a service row, seed its counters and create its per-service
/// tables.
///
/// Specific mapping caches are not created here; they appear lazily the
/// first time a file population and a tag service overlap.
pub fn insert_service(
    conn: &Connection,
    key: &ServiceKey,
    service_type: ServiceType,
    name: &str,
) -> Result<Service> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM services WHERE service_key = ?1)",
        params![key.as_bytes()],
        |row| row.get(0),
    )?;
    if exists {
        return Err(TagVaultError::ServiceAlreadyExists { key: key.to_hex() });
    }

    conn.execute(
        "INSERT INTO services (service_key, service_type, name) VALUES (?1, ?2, ?3)",
        params![key.as_bytes(), service_type.to_db(), name],
    )?;
    let id = ServiceId(conn.last_insert_rowid());
    seed_service_info(conn, id, service_type)?;

    if service_type.is_tag_service() {
        StorageTables::new(id).create(conn)?;
        CombinedTables::new(id).create(conn)?;
    }

    debug!("Created {} service {:?} as {}", service_type, name, id);
    Ok(Service {
        id,
        key: key.clone(),
        service_type,
        name: name.to_string(),
    })
}

/// Remove a service row with its counters and per-service tables.
///
/// Callers are responsible for emptying file memberships first so the
/// umbrella services stay consistent.
pub fn remove_service_rows(conn: &Connection, service: &Service) -> Result<()> {
    let id = service.id;
    conn.execute("DELETE FROM service_info WHERE service_id = ?1", params![id])?;

    if service.service_type.is_tag_service() {
        StorageTables::new(id).drop(conn)?;
        CombinedTables::new(id).drop(conn)?;
        for table in [
            "tag_siblings",
            "tag_sibling_petitions",
            "tag_parents",
            "tag_parent_petitions",
        ] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE service_id = ?1"),
                params![id],
            )?;
        }
    }

    if service.service_type.is_file_service() {
        for table in [
            "current_files",
            "deleted_files",
            "pending_files",
            "petitioned_files",
            "service_directories",
            "service_directory_file_map",
        ] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE service_id = ?1"),
                params![id],
            )?;
        }
    }

    if service.service_type == ServiceType::LocalRating {
        conn.execute("DELETE FROM local_ratings WHERE service_id = ?1", params![id])?;
    }

    conn.execute("DELETE FROM services WHERE service_id = ?1", params![id])?;
    Ok(())
}

/// Create any fixed service that is missing. Safe to call on every open.
pub fn ensure_fixed_services(conn: &Connection) -> Result<usize> {
    let mut created = 0;
    for (key, service_type, name) in fixed_services() {
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM services WHERE service_key = ?1)",
            params![key.as_bytes()],
            |row| row.get(0),
        )?;
        if !exists {
            insert_service(conn, &key, service_type, name)?;
            created += 1;
        }
    }
    if created > 0 {
        info!("Initialized {} fixed services", created);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::table_exists;
    use crate::db::schema::ensure_schema;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ensure_fixed_services(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fixed_services_are_created_once() {
        let conn = create_test_conn();
        assert_eq!(ensure_fixed_services(&conn).unwrap(), 0);

        let registry = ServiceRegistry::load(&conn).unwrap();
        assert_eq!(registry.len(), fixed_services().len());
        let umbrella = registry.umbrella_ids().unwrap();
        assert_eq!(
            registry.by_key(&ServiceKey::trash()).unwrap().id,
            umbrella.trash
        );
    }

    #[test]
    fn test_tag_service_gets_storage_tables() {
        let conn = create_test_conn();
        let service = insert_service(
            &conn,
            &ServiceKey::generate(),
            ServiceType::TagRepository,
            "public tags",
        )
        .unwrap();

        let storage = StorageTables::new(service.id);
        assert!(table_exists(&conn, &storage.current).unwrap());
        assert!(table_exists(&conn, &CombinedTables::new(service.id).display_counts).unwrap());
        assert_eq!(
            get_service_info(&conn, service.id, ServiceInfoKind::NumMappings).unwrap(),
            Some(0)
        );

        remove_service_rows(&conn, &service).unwrap();
        assert!(!table_exists(&conn, &storage.current).unwrap());
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let conn = create_test_conn();
        let err = insert_service(
            &conn,
            &ServiceKey::default_local_tag(),
            ServiceType::LocalTag,
            "again",
        )
        .unwrap_err();
        assert!(matches!(err, TagVaultError::ServiceAlreadyExists { .. }));
    }
}
