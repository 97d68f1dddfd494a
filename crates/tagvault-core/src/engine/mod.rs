//! The single writer.
//!
//! An `Engine` owns the read-write connection and the in-memory state
//! mirroring it. Every mutation runs in one transaction through
//! [`Engine::write`]: counters flush and notifications go out only after a
//! commit, and a failed transaction rolls back and reloads the state.

pub(crate) mod context;
pub(crate) mod state;

use crate::config::{DatabaseConfig, EngineOptions};
use crate::content::orchestrator::apply_package;
use crate::content::{AppliedPackage, ContentUpdatePackage, Notification};
use crate::db::open_connection;
use crate::db::schema::ensure_schema;
use crate::error::{Result, TagVaultError};
use crate::files::cascade::{self, FileRow};
use crate::files::maintenance::{self, MaintenanceJob};
use crate::files::metadata::{upsert_file_info, FileInfo};
use crate::files::storage::all_current;
use crate::integrity::{self, IntegrityReport};
use crate::ids::HashId;
use crate::mappings::MappingDomain;
use crate::master::FileHash;
use crate::services::{
    ensure_fixed_services, insert_service, regenerate_service_info, remove_service_rows, Service,
    ServiceKey, ServiceType,
};
use context::WriteCtx;
use rusqlite::Connection;
use state::EngineState;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct Engine {
    conn: Connection,
    db_path: Option<PathBuf>,
    state: EngineState,
    options: EngineOptions,
    notifier: broadcast::Sender<Notification>,
}

impl Engine {
    /// Open (or create) a library database.
    pub fn open(db_path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = open_connection(db_path)?;
        let mut engine = Self::from_connection(conn, options)?;
        engine.db_path = Some(db_path.to_path_buf());
        info!("Opened library at {}", db_path.display());
        Ok(engine)
    }

    /// A library that lives only in memory.
    pub fn open_in_memory(options: EngineOptions) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    fn from_connection(conn: Connection, options: EngineOptions) -> Result<Self> {
        ensure_schema(&conn)?;
        ensure_fixed_services(&conn)?;
        let state = EngineState::load(&conn)?;
        let (notifier, _) = broadcast::channel(DatabaseConfig::NOTIFICATION_CHANNEL_CAPACITY);
        Ok(Self {
            conn,
            db_path: None,
            state,
            options,
            notifier,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    /// Read access to the writer's connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Receive notifications emitted after each commit.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub(crate) fn notifier(&self) -> broadcast::Sender<Notification> {
        self.notifier.clone()
    }

    pub fn service(&self, key: &ServiceKey) -> Result<Service> {
        self.state.services.require_key(key).cloned()
    }

    pub fn services(&self) -> Vec<Service> {
        self.state.services.services().cloned().collect()
    }

    // ========================================
    // Transactions
    // ========================================

    /// Run `f` in one transaction. On success the counters are flushed,
    /// the transaction commits and the notifications are broadcast and
    /// returned. On failure everything rolls back and the in-memory state
    /// is rebuilt from the database.
    fn write<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut WriteCtx<'_>) -> Result<T>,
    ) -> Result<(T, Vec<Notification>)> {
        let tx = self.conn.transaction()?;
        let outcome = {
            let mut ctx = WriteCtx::new(&tx, &mut self.state, &self.options);
            match f(&mut ctx) {
                Ok(value) => ctx.finish().map(|queue| (value, queue)),
                Err(e) => Err(e),
            }
        };
        let committed = outcome.and_then(|(value, queue)| {
            tx.commit()?;
            Ok((value, queue.into_vec()))
        });

        match committed {
            Ok((value, notifications)) => {
                for notification in &notifications {
                    // no subscribers is fine
                    let _ = self.notifier.send(notification.clone());
                }
                Ok((value, notifications))
            }
            Err(e) => {
                warn!("Rolled back {}: {}", what, e);
                if let Err(reload_err) = self.state.reload(&self.conn) {
                    error!("Failed to reload engine state after rollback: {}", reload_err);
                }
                Err(e)
            }
        }
    }

    // ========================================
    // Content updates
    // ========================================

    /// Apply a package as one unit.
    pub fn apply_content_update_package(
        &mut self,
        package: &ContentUpdatePackage,
    ) -> Result<AppliedPackage> {
        if package.is_empty() {
            return Ok(AppliedPackage::default());
        }
        let (mut applied, notifications) =
            self.write("content update package", |ctx| apply_package(ctx, package))?;
        applied.notifications = notifications;
        Ok(applied)
    }

    // ========================================
    // Privileged file operations
    // ========================================

    /// Add files to a service directly, with no per-item classification.
    /// Returns the hashes that were not already current.
    pub fn add_files(
        &mut self,
        service_key: &ServiceKey,
        files: &[FileInfo],
        timestamp: Option<i64>,
    ) -> Result<Vec<FileHash>> {
        let service = self.service(service_key)?;
        let (added, _) = self.write("add files", |ctx| {
            let timestamp = timestamp.unwrap_or(ctx.now);
            let mut rows: Vec<FileRow> = Vec::with_capacity(files.len());
            for info in files {
                let hash_id = ctx.state.resolver.get_hash_id(ctx.conn, &info.hash)?;
                upsert_file_info(ctx.conn, hash_id, info)?;
                rows.push((hash_id, Some(timestamp)));
            }
            let added = cascade::add_files(ctx, service.id, &rows)?;
            hashes_of(ctx, &added)
        })?;
        Ok(added)
    }

    /// Delete files from a service. The delete lock does not apply here.
    pub fn delete_files(
        &mut self,
        service_key: &ServiceKey,
        hashes: &[FileHash],
        reason: Option<&str>,
    ) -> Result<Vec<FileHash>> {
        let service = self.service(service_key)?;
        let (removed, _) = self.write("delete files", |ctx| {
            let ids = ctx.state.resolver.get_hash_ids(ctx.conn, hashes)?;
            let reason_id = reason.map(|r| ctx.text_id(r)).transpose()?;
            let removed = cascade::delete_files(ctx, service.id, &ids, true, reason_id)?;
            hashes_of(ctx, &removed)
        })?;
        Ok(removed)
    }

    pub fn undelete_files(&mut self, service_key: &ServiceKey, hashes: &[FileHash]) -> Result<Vec<FileHash>> {
        let service = self.service(service_key)?;
        let (restored, _) = self.write("undelete files", |ctx| {
            let ids = ctx.state.resolver.get_hash_ids(ctx.conn, hashes)?;
            let restored = cascade::undelete_files(ctx, service.id, &ids)?;
            hashes_of(ctx, &restored)
        })?;
        Ok(restored)
    }

    /// Make combined deleted membership match the deletion records. `None`
    /// checks every file. Returns (added, removed).
    pub fn resync_combined_deleted_files(&mut self, hashes: Option<&[FileHash]>) -> Result<(usize, usize)> {
        let (counts, _) = self.write("combined deleted resync", |ctx| {
            let ids = match hashes {
                Some(hashes) => Some(ctx.state.resolver.get_hash_ids(ctx.conn, hashes)?),
                None => None,
            };
            cascade::resync_combined_deleted_files(ctx, ids.as_deref())
        })?;
        info!(
            "Combined deleted files resynced: {} added, {} removed",
            counts.0, counts.1
        );
        Ok(counts)
    }

    pub fn register_similar_files(&mut self, hashes: &[FileHash]) -> Result<usize> {
        let (registered, _) = self.write("similar files registration", |ctx| {
            let ids = ctx.state.resolver.get_hash_ids(ctx.conn, hashes)?;
            maintenance::register_similar_files(ctx.conn, &ids)
        })?;
        Ok(registered)
    }

    /// Queue a maintenance job for each file, runnable from `time_can_start`
    /// or immediately.
    pub fn add_maintenance_jobs(
        &mut self,
        hashes: &[FileHash],
        job: MaintenanceJob,
        time_can_start: Option<i64>,
    ) -> Result<usize> {
        let (queued, _) = self.write("maintenance jobs", |ctx| {
            let ids = ctx.state.resolver.get_hash_ids(ctx.conn, hashes)?;
            maintenance::add_maintenance_jobs(ctx.conn, &ids, job, time_can_start.unwrap_or(ctx.now))
        })?;
        Ok(queued)
    }

    // ========================================
    // Service administration
    // ========================================

    pub fn create_service(
        &mut self,
        key: &ServiceKey,
        service_type: ServiceType,
        name: &str,
    ) -> Result<Service> {
        if service_type.is_singleton() {
            return Err(TagVaultError::InvalidServiceType {
                service_type: service_type.to_string(),
                message: "a library holds exactly one service of this type".to_string(),
            });
        }
        let (service, _) = self.write("service creation", |ctx| {
            let service = insert_service(ctx.conn, key, service_type, name)?;
            ctx.state.services.insert(service.clone());
            Ok(service)
        })?;
        info!("Created {} service {:?}", service_type, name);
        Ok(service)
    }

    /// Delete a service. A local file domain is emptied first, so files
    /// held nowhere else go to trash.
    pub fn delete_service(&mut self, key: &ServiceKey) -> Result<()> {
        let service = self.service(key)?;
        if service.service_type.is_singleton() {
            return Err(TagVaultError::InvalidServiceType {
                service_type: service.service_type.to_string(),
                message: "fixed services cannot be deleted".to_string(),
            });
        }

        self.write("service deletion", |ctx| {
            if service.service_type == ServiceType::LocalFileDomain {
                let current = all_current(ctx.conn, service.id)?;
                cascade::delete_files(ctx, service.id, &current, true, None)?;
            }
            let recorded: Vec<HashId> = if service.service_type.counts_toward_combined_deleted() {
                ctx.conn
                    .prepare("SELECT hash_id FROM deleted_files WHERE service_id = ?1")?
                    .query_map([service.id], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?
            } else {
                Vec::new()
            };

            ctx.state.pairs.drop_service(ctx.conn, service.id)?;
            remove_service_rows(ctx.conn, &service)?;
            ctx.state.services.remove(service.id);
            ctx.state.display.invalidate(service.id);
            if !recorded.is_empty() {
                cascade::resync_combined_deleted_files(ctx, Some(&recorded))?;
            }
            Ok(())
        })?;
        info!("Deleted {} service {:?}", service.service_type, service.name);
        Ok(())
    }

    /// Rebuild the specific caches of one (file service, tag service) pair
    /// from storage.
    pub fn regenerate_specific_cache(&mut self, file_service_key: &ServiceKey, tag_service_key: &ServiceKey) -> Result<()> {
        let file_service = self.service(file_service_key)?;
        let tag_service = self.service(tag_service_key)?;
        if !file_service.service_type.has_specific_mapping_cache() {
            return Err(TagVaultError::InvalidServiceType {
                service_type: file_service.service_type.to_string(),
                message: "no specific mapping cache for this service".to_string(),
            });
        }
        require_tag_service(&tag_service)?;

        self.write("specific cache regeneration", |ctx| {
            let graph = ctx.graph(tag_service.id)?;
            ctx.state
                .pairs
                .generate(ctx.conn, &graph, file_service.id, tag_service.id)
        })?;
        Ok(())
    }

    /// Rebuild the combined counts and display rows of a tag service.
    pub fn regenerate_combined_display(&mut self, tag_service_key: &ServiceKey) -> Result<()> {
        let tag_service = self.service(tag_service_key)?;
        require_tag_service(&tag_service)?;

        self.write("combined display regeneration", |ctx| {
            ctx.state.display.invalidate(tag_service.id);
            let graph = ctx.graph(tag_service.id)?;
            let domain = MappingDomain::combined(tag_service.id);
            domain.regenerate_storage_counts(ctx.conn)?;
            domain.regenerate_all_display(ctx.conn, &graph)?;
            ctx.notifications
                .push(Notification::TagDisplayApplicationChanged);
            Ok(())
        })?;
        info!("Regenerated combined display for {:?}", tag_service.name);
        Ok(())
    }

    /// Recount every counter of a service.
    pub fn regenerate_service_info(&mut self, key: &ServiceKey) -> Result<()> {
        let service = self.service(key)?;
        self.write("service info regeneration", |ctx| {
            regenerate_service_info(ctx.conn, service.id, service.service_type)
        })?;
        Ok(())
    }

    /// Compare every counter, counts table and display cache with the rows
    /// behind it.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let report = integrity::check_integrity(&self.conn)?;
        debug!("Integrity check found {} problems", report.problems.len());
        Ok(report)
    }
}

fn require_tag_service(service: &Service) -> Result<()> {
    if service.service_type.is_tag_service() {
        Ok(())
    } else {
        Err(TagVaultError::InvalidServiceType {
            service_type: service.service_type.to_string(),
            message: "not a tag service".to_string(),
        })
    }
}

fn hashes_of(ctx: &WriteCtx<'_>, hash_ids: &[HashId]) -> Result<Vec<FileHash>> {
    let found = ctx.state.resolver.get_hashes(ctx.conn, hash_ids.iter().copied())?;
    Ok(hash_ids
        .iter()
        .filter_map(|id| found.get(id).copied())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentUpdate, FilesUpdate, ItemOutcome, MappingsUpdate, SkipReason};
    use crate::services::{get_service_info, ServiceInfoKind};

    fn create_test_engine() -> Engine {
        Engine::open_in_memory(EngineOptions::default()).unwrap()
    }

    fn create_test_file(seed: &str) -> FileInfo {
        FileInfo::new(FileHash::of_content(seed.as_bytes()), 1000, "image/jpeg")
    }

    #[test]
    fn test_open_creates_fixed_services() {
        let engine = create_test_engine();
        for key in [
            ServiceKey::combined_local_file(),
            ServiceKey::trash(),
            ServiceKey::default_local_file(),
            ServiceKey::default_local_tag(),
        ] {
            assert!(engine.service(&key).is_ok());
        }
    }

    #[test]
    fn test_apply_package_reports_outcomes_in_order() {
        let mut engine = create_test_engine();
        let file = create_test_file("a");
        let package = ContentUpdatePackage::new()
            .with(
                ServiceKey::default_local_file(),
                ContentUpdate::Files(FilesUpdate::Add {
                    files: vec![file.clone()],
                    timestamp: Some(100),
                }),
            )
            .with(
                ServiceKey::new(b"missing".to_vec()),
                ContentUpdate::Files(FilesUpdate::Archive {
                    hashes: vec![file.hash],
                }),
            )
            .with(
                ServiceKey::default_local_tag(),
                ContentUpdate::Mappings(MappingsUpdate::Add {
                    tag: "Blue Eyes".into(),
                    hashes: vec![file.hash],
                }),
            );

        let applied = engine.apply_content_update_package(&package).unwrap();
        assert_eq!(applied.outcomes.len(), 3);
        assert_eq!(applied.outcomes[0], ItemOutcome::Applied);
        assert_eq!(
            applied.outcomes[1],
            ItemOutcome::Skipped(SkipReason::UnknownService)
        );
        assert!(matches!(applied.outcomes[2], ItemOutcome::Substituted(_)));
        assert_eq!(applied.applied_count(), 2);

        let my_tags = engine.service(&ServiceKey::default_local_tag()).unwrap();
        assert_eq!(
            get_service_info(engine.connection(), my_tags.id, ServiceInfoKind::NumMappings).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_failed_write_rolls_back_and_reloads() {
        let mut engine = create_test_engine();
        let before = engine.services().len();
        let result = engine.write("failing write", |ctx| {
            insert_service(ctx.conn, &ServiceKey::new(b"doomed".to_vec()), ServiceType::LocalTag, "doomed")?;
            Err::<(), _>(TagVaultError::Other("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(engine.services().len(), before);
        assert!(engine.service(&ServiceKey::new(b"doomed".to_vec())).is_err());
    }

    #[test]
    fn test_singleton_services_are_protected() {
        let mut engine = create_test_engine();
        assert!(engine
            .create_service(&ServiceKey::generate(), ServiceType::Trash, "second trash")
            .is_err());
        assert!(engine.delete_service(&ServiceKey::combined_local_file()).is_err());
    }

    #[test]
    fn test_delete_domain_moves_files_to_trash() {
        let mut engine = create_test_engine();
        let key = ServiceKey::generate();
        engine
            .create_service(&key, ServiceType::LocalFileDomain, "scratch")
            .unwrap();
        let file = create_test_file("scratch file");
        engine.add_files(&key, &[file.clone()], Some(5)).unwrap();

        engine.delete_service(&key).unwrap();
        assert!(engine.service(&key).is_err());

        let trash = engine.service(&ServiceKey::trash()).unwrap();
        assert_eq!(
            get_service_info(engine.connection(), trash.id, ServiceInfoKind::NumFiles).unwrap(),
            Some(1)
        );
        assert!(engine.check_integrity().unwrap().is_clean());
    }

    #[test]
    fn test_notifications_reach_subscribers() {
        let mut engine = create_test_engine();
        let mut rx = engine.subscribe();
        let file = create_test_file("pending");
        let package = ContentUpdatePackage::new().with(
            ServiceKey::combined_local_file(),
            ContentUpdate::Files(FilesUpdate::Pend {
                hashes: vec![file.hash],
            }),
        );
        let applied = engine.apply_content_update_package(&package).unwrap();
        assert_eq!(applied.notifications, vec![Notification::NewDownloads]);
        assert_eq!(rx.try_recv().unwrap(), Notification::NewDownloads);
    }
}
