//! File membership cascade across local domains, the umbrella services and
//! trash.
//!
//! Rules:
//!
//! - Adding to a local file domain takes the file out of trash and adds it
//!   to combined local media and combined local file.
//! - Adding to the local update domain adds to combined local file and
//!   queues [`Notification::UpdatesImported`].
//! - A file leaving its last local file domain leaves combined local media
//!   and, if it is still in combined local file, goes to trash. Nothing else
//!   puts files in trash.
//! - Deleting from combined local media deletes from every local file
//!   domain. Deleting from combined local file deletes from every local
//!   service and is the only path to physical cleanup.
//! - Deletes write a deletion record except on trash and combined deleted.
//!   Combined deleted membership is resynced from those records by
//!   symmetric difference.
//!
//! Counters move by delta in the context; nothing here writes
//! `service_info` directly.

use super::maintenance::{cancel_maintenance_jobs, deregister_similar_files};
use super::metadata::aggregate;
use super::storage::{
    all_current, clear_deleted, clear_deletion_reasons, current_counts_by_service,
    current_timestamps, deleted_in_any, deletion_records, filter_current_in_any, filter_to_status,
    insert_current, insert_pending, insert_petitioned, record_deleted, remove_current,
    remove_pending, remove_petitioned, set_deletion_reasons,
};
use super::timestamps::{set_timestamps, TimestampKind};
use crate::content::Notification;
use crate::engine::context::WriteCtx;
use crate::error::Result;
use crate::ids::{HashId, ServiceId, TextId};
use crate::mappings::specific::{add_files_to_pair, delete_files_from_pair, has_any_mappings};
use crate::services::{ServiceInfoKind, ServiceType};
use crate::status::ContentStatus;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// A file entering a service, with the time it was added.
pub type FileRow = (HashId, Option<i64>);

fn dedup(hash_ids: &[HashId]) -> Vec<HashId> {
    hash_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

// ========================================
// Add
// ========================================

/// Make files current in a service and cascade. Returns the ids that were
/// not already current.
pub(crate) fn add_files(ctx: &mut WriteCtx<'_>, service_id: ServiceId, rows: &[FileRow]) -> Result<Vec<HashId>> {
    let service_type = ctx.service_type(service_id)?;
    let added = insert_current(ctx.conn, service_id, rows)?;
    if added.is_empty() {
        return Ok(added);
    }

    let cleared = clear_deleted(ctx.conn, service_id, &added)?;
    let unpended = remove_pending(ctx.conn, service_id, &added)?;
    let totals = aggregate(ctx.conn, &added, &ctx.state.inbox)?;
    ctx.deltas.add(service_id, ServiceInfoKind::NumFiles, totals.num_files);
    ctx.deltas.add(service_id, ServiceInfoKind::TotalSize, totals.total_size);
    ctx.deltas.add(service_id, ServiceInfoKind::NumViewableFiles, totals.num_viewable);
    ctx.deltas.add(service_id, ServiceInfoKind::NumInbox, totals.num_inbox);
    ctx.deltas.add(service_id, ServiceInfoKind::NumDeletedFiles, -(cleared.len() as i64));
    ctx.deltas.add(service_id, ServiceInfoKind::NumPendingFiles, -(unpended as i64));

    if service_type.is_local_file_service() && !cleared.is_empty() {
        clear_deletion_reasons(ctx.conn, &cleared)?;
    }
    if service_type.counts_toward_combined_deleted() && !cleared.is_empty() {
        resync_combined_deleted_files(ctx, Some(&cleared))?;
    }
    if service_type.has_specific_mapping_cache() {
        add_to_specific_caches(ctx, service_id, &added)?;
    }

    let added_set: HashSet<HashId> = added.iter().copied().collect();
    let added_rows: Vec<FileRow> = rows
        .iter()
        .filter(|(id, _)| added_set.contains(id))
        .copied()
        .collect();
    let umbrella = ctx.state.umbrella;

    match service_type {
        ServiceType::LocalFileDomain => {
            delete_files(ctx, umbrella.trash, &added, true, None)?;
            add_files(ctx, umbrella.combined_local_media, &added_rows)?;
            add_files(ctx, umbrella.combined_local_file, &added_rows)?;
        }
        ServiceType::LocalUpdateDomain => {
            add_files(ctx, umbrella.combined_local_file, &added_rows)?;
            ctx.notifications.push(Notification::UpdatesImported);
        }
        _ => {}
    }

    debug!("Added {} files to service {}", added.len(), service_id);
    Ok(added)
}

/// Bring existing specific caches up to date with newly current files, and
/// create the caches that now have something to show.
fn add_to_specific_caches(ctx: &mut WriteCtx<'_>, file_service_id: ServiceId, hash_ids: &[HashId]) -> Result<()> {
    for tag_service_id in ctx.state.services.tag_service_ids() {
        if ctx.state.pairs.contains(file_service_id, tag_service_id) {
            let graph = ctx.graph(tag_service_id)?;
            add_files_to_pair(ctx.conn, &graph, file_service_id, tag_service_id, hash_ids)?;
        } else if has_any_mappings(ctx.conn, tag_service_id, hash_ids)? {
            let graph = ctx.graph(tag_service_id)?;
            ctx.state
                .pairs
                .generate(ctx.conn, &graph, file_service_id, tag_service_id)?;
        }
    }
    Ok(())
}

// ========================================
// Delete
// ========================================

/// Remove files from a service and cascade. Returns the ids that were
/// current.
///
/// With `only_if_current` false a deletion record is written for every id,
/// current or not. The delete lock is not checked here; callers filter
/// before the first call.
pub(crate) fn delete_files(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
    only_if_current: bool,
    reason: Option<TextId>,
) -> Result<Vec<HashId>> {
    let service_type = ctx.service_type(service_id)?;
    let timestamps = current_timestamps(ctx.conn, service_id, hash_ids)?;
    let removed: Vec<HashId> = timestamps.keys().copied().collect();

    let mut recorded = Vec::new();
    if !service_type.has_no_delete_record() {
        let targets = if only_if_current {
            removed.clone()
        } else {
            dedup(hash_ids)
        };
        let rows: Vec<(HashId, i64, Option<i64>)> = targets
            .iter()
            .map(|id| (*id, ctx.now, timestamps.get(id).copied().flatten()))
            .collect();
        recorded = record_deleted(ctx.conn, service_id, &rows)?;
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumDeletedFiles, recorded.len() as i64);
    }

    if removed.is_empty() && recorded.is_empty() {
        return Ok(removed);
    }

    if !removed.is_empty() {
        let totals = aggregate(ctx.conn, &removed, &ctx.state.inbox)?;
        remove_current(ctx.conn, service_id, &removed)?;
        let unpetitioned = remove_petitioned(ctx.conn, service_id, &removed)?;
        ctx.deltas.add(service_id, ServiceInfoKind::NumFiles, -totals.num_files);
        ctx.deltas.add(service_id, ServiceInfoKind::TotalSize, -totals.total_size);
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumViewableFiles, -totals.num_viewable);
        ctx.deltas.add(service_id, ServiceInfoKind::NumInbox, -totals.num_inbox);
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumPetitionedFiles, -(unpetitioned as i64));

        if service_type.is_local_file_service() && ctx.options.record_deletion_reasons {
            let reason_id = match reason {
                Some(id) => id,
                None => ctx.text_id(&ctx.options.default_deletion_reason)?,
            };
            set_deletion_reasons(ctx.conn, &removed, reason_id)?;
        }

        for tag_service_id in ctx.state.pairs.tag_services_for(service_id) {
            let graph = ctx.graph(tag_service_id)?;
            delete_files_from_pair(ctx.conn, &graph, service_id, tag_service_id, &removed)?;
        }
    }

    if service_type.counts_toward_combined_deleted() && !recorded.is_empty() {
        resync_combined_deleted_files(ctx, Some(&recorded))?;
    }

    let umbrella = ctx.state.umbrella;
    match service_type {
        ServiceType::LocalFileDomain if !removed.is_empty() => {
            let domains = ctx.state.services.local_file_domain_ids();
            let still_local = filter_current_in_any(ctx.conn, &domains, &removed)?;
            let orphaned: Vec<HashId> = removed
                .iter()
                .filter(|id| !still_local.contains(id))
                .copied()
                .collect();
            if !orphaned.is_empty() {
                delete_files(ctx, umbrella.combined_local_media, &orphaned, true, reason)?;
                let in_combined =
                    filter_to_status(ctx.conn, umbrella.combined_local_file, &orphaned, ContentStatus::Current)?;
                let trash_rows: Vec<FileRow> = orphaned
                    .iter()
                    .filter(|id| in_combined.contains(id))
                    .map(|id| (*id, Some(ctx.now)))
                    .collect();
                add_files(ctx, umbrella.trash, &trash_rows)?;
            }
        }
        ServiceType::CombinedLocalMedia => {
            for domain_id in ctx.state.services.local_file_domain_ids() {
                delete_files(ctx, domain_id, hash_ids, true, reason)?;
            }
        }
        ServiceType::CombinedLocalFile => {
            let mut local = ctx.state.services.local_file_domain_ids();
            local.extend([umbrella.combined_local_media, umbrella.local_update, umbrella.trash]);
            for local_id in local {
                delete_files(ctx, local_id, hash_ids, true, reason)?;
            }
            if !removed.is_empty() {
                physically_delete(ctx, &removed)?;
            }
        }
        _ => {}
    }

    debug!(
        "Deleted {} files from service {} ({} deletion records)",
        removed.len(),
        service_id,
        recorded.len()
    );
    Ok(removed)
}

/// Cleanup for files that left the combined local file service.
fn physically_delete(ctx: &mut WriteCtx<'_>, hash_ids: &[HashId]) -> Result<()> {
    archive_files(ctx, hash_ids)?;
    deregister_similar_files(ctx.conn, hash_ids)?;
    cancel_maintenance_jobs(ctx.conn, hash_ids)?;

    let mut hashes: Vec<_> = ctx
        .state
        .resolver
        .get_hashes(ctx.conn, hash_ids.iter().copied())?
        .into_values()
        .collect();
    hashes.sort();
    ctx.state.resolver.drop_hash_ids_from_cache(hash_ids);
    ctx.notifications
        .push(Notification::FilesPhysicallyDeleted { hashes });
    Ok(())
}

// ========================================
// Undelete and deletion records
// ========================================

/// Restore files to the local file domains they were deleted from.
///
/// Targeting combined local file, combined local media or trash restores to
/// every local file domain that holds a deletion record. Only files still in
/// combined local file can come back. Returns the restored ids.
pub(crate) fn undelete_files(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<Vec<HashId>> {
    let domains = match ctx.service_type(service_id)? {
        ServiceType::CombinedLocalFile | ServiceType::CombinedLocalMedia | ServiceType::Trash => {
            ctx.state.services.local_file_domain_ids()
        }
        ServiceType::LocalFileDomain => vec![service_id],
        _ => return Ok(Vec::new()),
    };

    let in_combined = filter_to_status(
        ctx.conn,
        ctx.state.umbrella.combined_local_file,
        hash_ids,
        ContentStatus::Current,
    )?;
    let candidates: Vec<HashId> = dedup(hash_ids)
        .into_iter()
        .filter(|id| in_combined.contains(id))
        .collect();

    let mut restored = BTreeSet::new();
    for domain_id in domains {
        let rows: Vec<FileRow> = deletion_records(ctx.conn, domain_id, &candidates)?
            .into_iter()
            .map(|(id, record)| (id, record.original_timestamp.or(Some(ctx.now))))
            .collect();
        restored.extend(add_files(ctx, domain_id, &rows)?);
    }
    Ok(restored.into_iter().collect())
}

/// Forget deletion records. Umbrella targets clear the records of every
/// local file domain and both combined local services.
pub(crate) fn clear_delete_record(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<usize> {
    let umbrella = ctx.state.umbrella;
    let targets = match ctx.service_type(service_id)? {
        ServiceType::CombinedLocalFile
        | ServiceType::CombinedLocalMedia
        | ServiceType::CombinedDeletedFile => {
            let mut targets = ctx.state.services.local_file_domain_ids();
            targets.extend([umbrella.combined_local_media, umbrella.combined_local_file]);
            targets
        }
        _ => vec![service_id],
    };

    let mut total = 0;
    let mut touched = BTreeSet::new();
    for target in targets {
        let cleared = clear_deleted(ctx.conn, target, hash_ids)?;
        ctx.deltas
            .add(target, ServiceInfoKind::NumDeletedFiles, -(cleared.len() as i64));
        total += cleared.len();
        touched.extend(cleared);
    }

    if !touched.is_empty() {
        let touched: Vec<HashId> = touched.into_iter().collect();
        clear_deletion_reasons(ctx.conn, &touched)?;
        resync_combined_deleted_files(ctx, Some(&touched))?;
    }
    Ok(total)
}

/// Make combined deleted membership match "deleted in at least one covered
/// service", touching only the difference. `None` checks every file.
pub(crate) fn resync_combined_deleted_files(
    ctx: &mut WriteCtx<'_>,
    hash_ids: Option<&[HashId]>,
) -> Result<(usize, usize)> {
    let combined_deleted = ctx.state.umbrella.combined_deleted_file;
    let covered = ctx
        .state
        .services
        .ids_where(ServiceType::counts_toward_combined_deleted);

    let expected = deleted_in_any(ctx.conn, &covered, hash_ids)?;
    let actual: BTreeMap<HashId, Option<i64>> = match hash_ids {
        Some(ids) => current_timestamps(ctx.conn, combined_deleted, ids)?,
        None => all_current(ctx.conn, combined_deleted)?
            .into_iter()
            .map(|id| (id, None))
            .collect(),
    };

    let to_add: Vec<FileRow> = expected
        .iter()
        .filter(|(id, _)| !actual.contains_key(id))
        .map(|(id, timestamp)| (*id, *timestamp))
        .collect();
    let to_remove: Vec<HashId> = actual
        .keys()
        .filter(|id| !expected.contains_key(id))
        .copied()
        .collect();

    let added = add_files(ctx, combined_deleted, &to_add)?.len();
    let removed = delete_files(ctx, combined_deleted, &to_remove, true, None)?.len();
    if added + removed > 0 {
        debug!(
            "Resynced combined deleted files: {} added, {} removed",
            added, removed
        );
    }
    Ok((added, removed))
}

// ========================================
// Inbox
// ========================================

/// Archive files, moving the inbox counter of every service holding them.
pub(crate) fn archive_files(ctx: &mut WriteCtx<'_>, hash_ids: &[HashId]) -> Result<Vec<HashId>> {
    let archived = ctx.state.inbox.archive(ctx.conn, hash_ids)?;
    if archived.is_empty() {
        return Ok(archived);
    }
    for (service_id, count) in current_counts_by_service(ctx.conn, &archived)? {
        ctx.deltas.add(service_id, ServiceInfoKind::NumInbox, -count);
    }
    set_timestamps(ctx.conn, &archived, &TimestampKind::Archived, ctx.now)?;
    Ok(archived)
}

pub(crate) fn inbox_files(ctx: &mut WriteCtx<'_>, hash_ids: &[HashId]) -> Result<Vec<HashId>> {
    let inboxed = ctx.state.inbox.inbox(ctx.conn, hash_ids)?;
    for (service_id, count) in current_counts_by_service(ctx.conn, &inboxed)? {
        ctx.deltas.add(service_id, ServiceInfoKind::NumInbox, count);
    }
    Ok(inboxed)
}

// ========================================
// Pending and petitions
// ========================================

fn pending_notification(service_type: ServiceType) -> Notification {
    if service_type == ServiceType::CombinedLocalFile {
        Notification::NewDownloads
    } else {
        Notification::NewPending
    }
}

/// Queue files for upload to a repository, or for download when the
/// service is combined local file. Files already current are skipped.
pub(crate) fn pend_files(ctx: &mut WriteCtx<'_>, service_id: ServiceId, hash_ids: &[HashId]) -> Result<usize> {
    let service_type = ctx.service_type(service_id)?;
    let current = filter_to_status(ctx.conn, service_id, hash_ids, ContentStatus::Current)?;
    let candidates: Vec<HashId> = dedup(hash_ids)
        .into_iter()
        .filter(|id| !current.contains(id))
        .collect();
    let pended = insert_pending(ctx.conn, service_id, &candidates)?.len();
    if pended > 0 {
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumPendingFiles, pended as i64);
        ctx.notifications.push(pending_notification(service_type));
    }
    Ok(pended)
}

pub(crate) fn rescind_pend_files(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<usize> {
    let service_type = ctx.service_type(service_id)?;
    let rescinded = remove_pending(ctx.conn, service_id, &dedup(hash_ids))?;
    if rescinded > 0 {
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumPendingFiles, -(rescinded as i64));
        ctx.notifications.push(pending_notification(service_type));
    }
    Ok(rescinded)
}

/// Ask a repository to delete files. Only current files can be petitioned.
pub(crate) fn petition_files(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
    reason_id: TextId,
) -> Result<usize> {
    let current = filter_to_status(ctx.conn, service_id, hash_ids, ContentStatus::Current)?;
    let candidates: Vec<HashId> = dedup(hash_ids)
        .into_iter()
        .filter(|id| current.contains(id))
        .collect();
    let petitioned = insert_petitioned(ctx.conn, service_id, &candidates, reason_id)?.len();
    if petitioned > 0 {
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumPetitionedFiles, petitioned as i64);
        ctx.notifications.push(Notification::NewPending);
    }
    Ok(petitioned)
}

pub(crate) fn rescind_petition_files(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_ids: &[HashId],
) -> Result<usize> {
    let rescinded = remove_petitioned(ctx.conn, service_id, &dedup(hash_ids))?;
    if rescinded > 0 {
        ctx.deltas
            .add(service_id, ServiceInfoKind::NumPetitionedFiles, -(rescinded as i64));
        ctx.notifications.push(Notification::NewPending);
    }
    Ok(rescinded)
}
