//! Classifies and applies the items of a content update package.
//!
//! File and ancillary updates apply as they are met. Edge edits apply to the
//! edge tables immediately, but display rows are rebuilt once per tag
//! service after the loop. Mapping edits are only gathered during the loop
//! and run through the mapping update afterwards, once per tag service, so a
//! package sees the display graph its own edge edits produced.

use super::ancillary;
use super::package::{
    AppliedPackage, ContentUpdatePackage, ItemOutcome, Notification, ServiceContentUpdate,
    SkipReason,
};
use super::update::{
    ContentUpdate, DirectoriesUpdate, FilesUpdate, MappingsUpdate, NotesUpdate, RatingsUpdate,
    TagPairUpdate, TimestampUpdate, UrlsUpdate, ViewingStatsUpdate,
};
use crate::display::{DisplayGraphs, EdgeAction, EdgeKind, EdgeStore, TagDisplayGraph};
use crate::engine::context::WriteCtx;
use crate::error::Result;
use crate::files::cascade::{
    add_files, archive_files, clear_delete_record, delete_files, inbox_files, pend_files,
    petition_files, rescind_pend_files, rescind_petition_files, undelete_files,
};
use crate::files::metadata::upsert_file_info;
use crate::files::storage::filter_to_status;
use crate::files::timestamps::{clear_timestamps, set_timestamps};
use crate::ids::{HashId, ServiceId, TagId};
use crate::mappings::{update_mappings, BucketAction, MappingBuckets};
use crate::master::{clean_tag, normalize_url, FileHash, IdentifierResolver, Tag};
use crate::services::{Service, ServiceType};
use crate::status::ContentStatus;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State gathered while walking a package.
#[derive(Default)]
struct PackageAccumulator {
    mappings: BTreeMap<ServiceId, MappingBuckets>,
    /// Display graph of each tag service as it was before the package's
    /// first edge edit on it.
    graphs_before: BTreeMap<ServiceId, Arc<TagDisplayGraph>>,
    sibling_tags: BTreeMap<ServiceId, BTreeSet<TagId>>,
    parent_tags: BTreeMap<ServiceId, BTreeSet<TagId>>,
    delete_locked: BTreeSet<HashId>,
}

fn skip(reason: SkipReason) -> Result<ItemOutcome> {
    Ok(ItemOutcome::Skipped(reason))
}

fn wrong_type(service: &Service) -> Result<ItemOutcome> {
    skip(SkipReason::WrongServiceType {
        service_type: service.service_type,
    })
}

/// Apply every item of a package inside the caller's transaction.
pub(crate) fn apply_package(ctx: &mut WriteCtx<'_>, package: &ContentUpdatePackage) -> Result<AppliedPackage> {
    let mut acc = PackageAccumulator::default();
    let mut applied = AppliedPackage::default();

    for item in package.iter() {
        let outcome = apply_item(ctx, &mut acc, item)?;
        if let ItemOutcome::Skipped(reason) = &outcome {
            warn!("Skipped content update for service {}: {:?}", item.service_key, reason);
        }
        applied.outcomes.push(outcome);
    }

    regenerate_display(ctx, &acc)?;
    run_mapping_updates(ctx, std::mem::take(&mut acc.mappings))?;
    queue_edge_notifications(ctx, &acc)?;

    if !acc.delete_locked.is_empty() {
        let mut locked: Vec<FileHash> = ctx
            .state
            .resolver
            .get_hashes(ctx.conn, acc.delete_locked.iter().copied())?
            .into_values()
            .collect();
        locked.sort();
        info!("Delete lock held back {} archived files", locked.len());
        applied.delete_locked = locked;
    }

    info!(
        "Applied content update package: {} of {} items",
        applied.applied_count(),
        package.len()
    );
    Ok(applied)
}

fn apply_item(
    ctx: &mut WriteCtx<'_>,
    acc: &mut PackageAccumulator,
    item: &ServiceContentUpdate,
) -> Result<ItemOutcome> {
    let Some(service) = ctx.state.services.by_key(&item.service_key).cloned() else {
        return skip(SkipReason::UnknownService);
    };

    match &item.update {
        ContentUpdate::Files(update) => apply_files(ctx, acc, &service, update),
        ContentUpdate::Directories(update) => apply_directories(ctx, &service, update),
        ContentUpdate::Urls(update) => apply_urls(ctx, &service, update),
        ContentUpdate::Timestamp(update) => apply_timestamps(ctx, &service, update),
        ContentUpdate::FileViewingStats(update) => apply_viewing_stats(ctx, &service, update),
        ContentUpdate::Mappings(update) => apply_mappings(ctx, acc, &service, update),
        ContentUpdate::TagSiblings(update) => {
            apply_edge(ctx, acc, &service, EdgeKind::Sibling, update)
                .map(|o| wrap_edge(o, ContentUpdate::TagSiblings))
        }
        ContentUpdate::TagParents(update) => {
            apply_edge(ctx, acc, &service, EdgeKind::Parent, update)
                .map(|o| wrap_edge(o, ContentUpdate::TagParents))
        }
        ContentUpdate::Ratings(update) => apply_ratings(ctx, &service, update),
        ContentUpdate::Notes(update) => apply_notes(ctx, &service, update),
    }
}

fn hash_ids(ctx: &WriteCtx<'_>, hashes: &[FileHash]) -> Result<Vec<HashId>> {
    ctx.state.resolver.get_hash_ids(ctx.conn, hashes)
}

// ========================================
// Files
// ========================================

fn apply_files(
    ctx: &mut WriteCtx<'_>,
    acc: &mut PackageAccumulator,
    service: &Service,
    update: &FilesUpdate,
) -> Result<ItemOutcome> {
    let service_type = service.service_type;
    if !service_type.is_file_service() {
        return wrong_type(service);
    }

    match update {
        FilesUpdate::Add { files, timestamp } => {
            if service_type.is_umbrella() {
                return skip(SkipReason::UmbrellaService);
            }
            if service_type == ServiceType::Trash {
                return wrong_type(service);
            }
            let timestamp = timestamp.unwrap_or(ctx.now);
            let mut rows = Vec::with_capacity(files.len());
            for info in files {
                let hash_id = ctx.state.resolver.get_hash_id(ctx.conn, &info.hash)?;
                upsert_file_info(ctx.conn, hash_id, info)?;
                rows.push((hash_id, Some(timestamp)));
            }
            add_files(ctx, service.id, &rows)?;
        }
        FilesUpdate::Delete { hashes, reason } => {
            if service_type == ServiceType::CombinedDeletedFile {
                return skip(SkipReason::UmbrellaService);
            }
            let ids = hash_ids(ctx, hashes)?;
            let (allowed, locked) = ctx.split_delete_locked(service_type, &ids);
            acc.delete_locked.extend(locked);
            let reason_id = reason.as_deref().map(|r| ctx.text_id(r)).transpose()?;

            if service_type == ServiceType::Trash {
                // deleting from trash removes the files for good
                let in_trash = filter_to_status(ctx.conn, service.id, &allowed, ContentStatus::Current)?;
                let purged: Vec<HashId> = allowed.into_iter().filter(|id| in_trash.contains(id)).collect();
                let combined_local_file = ctx.state.umbrella.combined_local_file;
                delete_files(ctx, combined_local_file, &purged, true, reason_id)?;
            } else {
                let only_if_current = !service_type.is_repository();
                delete_files(ctx, service.id, &allowed, only_if_current, reason_id)?;
            }
        }
        FilesUpdate::Undelete { hashes } => {
            if !matches!(
                service_type,
                ServiceType::LocalFileDomain
                    | ServiceType::CombinedLocalFile
                    | ServiceType::CombinedLocalMedia
                    | ServiceType::Trash
            ) {
                return wrong_type(service);
            }
            let ids = hash_ids(ctx, hashes)?;
            undelete_files(ctx, service.id, &ids)?;
        }
        FilesUpdate::Pend { hashes } | FilesUpdate::RescindPend { hashes } => {
            if !matches!(
                service_type,
                ServiceType::FileRepository | ServiceType::CombinedLocalFile
            ) {
                return wrong_type(service);
            }
            let ids = hash_ids(ctx, hashes)?;
            if matches!(update, FilesUpdate::Pend { .. }) {
                pend_files(ctx, service.id, &ids)?;
            } else {
                rescind_pend_files(ctx, service.id, &ids)?;
            }
        }
        FilesUpdate::Petition { hashes, reason } => {
            if service_type != ServiceType::FileRepository {
                return wrong_type(service);
            }
            let ids = hash_ids(ctx, hashes)?;
            let reason_id = ctx.text_id(reason)?;
            petition_files(ctx, service.id, &ids, reason_id)?;
        }
        FilesUpdate::RescindPetition { hashes } => {
            if service_type != ServiceType::FileRepository {
                return wrong_type(service);
            }
            let ids = hash_ids(ctx, hashes)?;
            rescind_petition_files(ctx, service.id, &ids)?;
        }
        FilesUpdate::Archive { hashes } => {
            let ids = hash_ids(ctx, hashes)?;
            archive_files(ctx, &ids)?;
        }
        FilesUpdate::Inbox { hashes } => {
            let ids = hash_ids(ctx, hashes)?;
            inbox_files(ctx, &ids)?;
        }
        FilesUpdate::ClearDeleteRecord { hashes } => {
            let ids = hash_ids(ctx, hashes)?;
            clear_delete_record(ctx, service.id, &ids)?;
        }
    }
    Ok(ItemOutcome::Applied)
}

// ========================================
// Ancillary file content
// ========================================

fn apply_directories(ctx: &mut WriteCtx<'_>, service: &Service, update: &DirectoriesUpdate) -> Result<ItemOutcome> {
    if service.service_type != ServiceType::FileRepository {
        return wrong_type(service);
    }
    match update {
        DirectoriesUpdate::Set {
            directory,
            hashes,
            note,
        } => {
            let ids = hash_ids(ctx, hashes)?;
            ancillary::set_directory(ctx.conn, service.id, directory, &ids, note)?;
        }
        DirectoriesUpdate::Delete { directory } => {
            ancillary::delete_directory(ctx.conn, service.id, directory)?;
        }
    }
    Ok(ItemOutcome::Applied)
}

fn apply_urls(ctx: &mut WriteCtx<'_>, service: &Service, update: &UrlsUpdate) -> Result<ItemOutcome> {
    if !service.service_type.is_file_service() {
        return wrong_type(service);
    }
    let (urls, hashes, adding) = match update {
        UrlsUpdate::Add { urls, hashes } => (urls, hashes, true),
        UrlsUpdate::Delete { urls, hashes } => (urls, hashes, false),
    };

    let mut url_ids = Vec::with_capacity(urls.len());
    for raw in urls {
        let Some(normalized) = normalize_url(raw) else {
            return skip(SkipReason::InvalidUrl { url: raw.clone() });
        };
        url_ids.push(IdentifierResolver::get_url_id(ctx.conn, &normalized)?);
    }
    let ids = hash_ids(ctx, hashes)?;
    if adding {
        ancillary::add_urls(ctx.conn, &url_ids, &ids)?;
    } else {
        ancillary::delete_urls(ctx.conn, &url_ids, &ids)?;
    }
    Ok(ItemOutcome::Applied)
}

fn apply_timestamps(ctx: &mut WriteCtx<'_>, service: &Service, update: &TimestampUpdate) -> Result<ItemOutcome> {
    if !service.service_type.is_file_service() {
        return wrong_type(service);
    }
    match update {
        TimestampUpdate::Set {
            hashes,
            kind,
            timestamp,
        } => {
            let ids = hash_ids(ctx, hashes)?;
            set_timestamps(ctx.conn, &ids, kind, *timestamp)?;
        }
        TimestampUpdate::Clear { hashes, kind } => {
            let ids = hash_ids(ctx, hashes)?;
            clear_timestamps(ctx.conn, &ids, kind)?;
        }
    }
    Ok(ItemOutcome::Applied)
}

fn apply_viewing_stats(
    ctx: &mut WriteCtx<'_>,
    service: &Service,
    update: &ViewingStatsUpdate,
) -> Result<ItemOutcome> {
    if !service.service_type.is_file_service() {
        return wrong_type(service);
    }
    match update {
        ViewingStatsUpdate::Add {
            hash,
            canvas,
            views,
            viewtime_ms,
            timestamp,
        }
        | ViewingStatsUpdate::Set {
            hash,
            canvas,
            views,
            viewtime_ms,
            timestamp,
        } => {
            if *views < 0 || *viewtime_ms < 0 {
                return skip(SkipReason::Validation {
                    message: "viewing stats cannot be negative".to_string(),
                });
            }
            let hash_id = ctx.state.resolver.get_hash_id(ctx.conn, hash)?;
            let stats = ancillary::ViewingStats {
                views: *views,
                viewtime_ms: *viewtime_ms,
                last_viewed: timestamp.or(Some(ctx.now)),
            };
            let additive = matches!(update, ViewingStatsUpdate::Add { .. });
            ancillary::record_viewing_stats(ctx.conn, hash_id, *canvas, stats, additive)?;
        }
        ViewingStatsUpdate::Delete { hashes } => {
            let ids = hash_ids(ctx, hashes)?;
            ancillary::clear_viewing_stats(ctx.conn, &ids)?;
        }
    }
    Ok(ItemOutcome::Applied)
}

fn apply_ratings(ctx: &mut WriteCtx<'_>, service: &Service, update: &RatingsUpdate) -> Result<ItemOutcome> {
    if service.service_type != ServiceType::LocalRating {
        return wrong_type(service);
    }
    let RatingsUpdate::Set { rating, hashes } = update;
    if let Some(value) = rating {
        if !(0.0..=1.0).contains(value) {
            return skip(SkipReason::Validation {
                message: format!("rating {} is outside [0, 1]", value),
            });
        }
    }
    let ids = hash_ids(ctx, hashes)?;
    ancillary::set_ratings(ctx, service.id, *rating, &ids)?;
    Ok(ItemOutcome::Applied)
}

fn apply_notes(ctx: &mut WriteCtx<'_>, service: &Service, update: &NotesUpdate) -> Result<ItemOutcome> {
    if service.service_type != ServiceType::LocalNotes {
        return wrong_type(service);
    }
    match update {
        NotesUpdate::Set { hash, name, note } => {
            if name.trim().is_empty() {
                return skip(SkipReason::Validation {
                    message: "note name is empty".to_string(),
                });
            }
            let hash_id = ctx.state.resolver.get_hash_id(ctx.conn, hash)?;
            ancillary::set_note(ctx, service.id, hash_id, name, note)?;
        }
        NotesUpdate::Delete { hash, name } => {
            let hash_id = ctx.state.resolver.get_hash_id(ctx.conn, hash)?;
            ancillary::delete_note(ctx, service.id, hash_id, name)?;
        }
    }
    Ok(ItemOutcome::Applied)
}

// ========================================
// Mappings and edges
// ========================================

/// A tag update that passed normalization.
enum CleanTag {
    Unchanged(String),
    Changed(String),
}

impl CleanTag {
    fn text(&self) -> &str {
        match self {
            CleanTag::Unchanged(text) | CleanTag::Changed(text) => text,
        }
    }

    fn changed(&self) -> bool {
        matches!(self, CleanTag::Changed(_))
    }
}

fn clean(raw: &str) -> std::result::Result<CleanTag, SkipReason> {
    match clean_tag(raw) {
        Ok(text) if text == raw => Ok(CleanTag::Unchanged(text)),
        Ok(text) => Ok(CleanTag::Changed(text)),
        Err(problem) => Err(SkipReason::BadTag {
            tag: raw.to_string(),
            problem,
        }),
    }
}

fn apply_mappings(
    ctx: &mut WriteCtx<'_>,
    acc: &mut PackageAccumulator,
    service: &Service,
    update: &MappingsUpdate,
) -> Result<ItemOutcome> {
    let service_type = service.service_type;
    if !service_type.is_tag_service() || (update.is_repository_only() && !service_type.is_repository()) {
        return wrong_type(service);
    }
    let tag = match clean(update.tag()) {
        Ok(tag) => tag,
        Err(reason) => return skip(reason),
    };

    let tag_id = ctx.state.resolver.get_tag_id(ctx.conn, &Tag::split(tag.text()))?;
    let ids = hash_ids(ctx, update.hashes())?;
    let petition_reason = match update {
        MappingsUpdate::Petition { reason, .. } => Some(ctx.text_id(reason)?),
        _ => None,
    };

    let buckets = acc.mappings.entry(service.id).or_default();
    match update {
        MappingsUpdate::Add { .. } => buckets.push(BucketAction::Add, tag_id, &ids),
        MappingsUpdate::Delete { .. } => buckets.push(BucketAction::Delete, tag_id, &ids),
        MappingsUpdate::Pend { .. } => buckets.push(BucketAction::Pend, tag_id, &ids),
        MappingsUpdate::RescindPend { .. } => buckets.push(BucketAction::RescindPend, tag_id, &ids),
        MappingsUpdate::Petition { .. } => {
            if let Some(reason_id) = petition_reason {
                buckets.push_petition(tag_id, &ids, reason_id);
            }
        }
        MappingsUpdate::RescindPetition { .. } => buckets.push_rescind_petition(tag_id, &ids),
        MappingsUpdate::ClearDeleteRecord { .. } => buckets.push_clear_deleted(tag_id, &ids),
    }

    if tag.changed() {
        let substituted = update.with_tag(tag.text().to_string());
        return Ok(ItemOutcome::Substituted(ContentUpdate::Mappings(substituted)));
    }
    Ok(ItemOutcome::Applied)
}

/// Edge outcomes come back as a bare pair update; wrap substitutions in the
/// right data type.
enum EdgeOutcome {
    Done(ItemOutcome),
    Substituted(TagPairUpdate),
}

fn wrap_edge(outcome: EdgeOutcome, wrap: fn(TagPairUpdate) -> ContentUpdate) -> ItemOutcome {
    match outcome {
        EdgeOutcome::Done(outcome) => outcome,
        EdgeOutcome::Substituted(update) => ItemOutcome::Substituted(wrap(update)),
    }
}

fn apply_edge(
    ctx: &mut WriteCtx<'_>,
    acc: &mut PackageAccumulator,
    service: &Service,
    kind: EdgeKind,
    update: &TagPairUpdate,
) -> Result<EdgeOutcome> {
    let service_type = service.service_type;
    if !service_type.is_tag_service() || (update.is_repository_only() && !service_type.is_repository()) {
        return wrong_type(service).map(EdgeOutcome::Done);
    }
    let (raw_from, raw_to) = update.pair();
    let (from, to) = match (clean(raw_from), clean(raw_to)) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(reason), _) | (_, Err(reason)) => return skip(reason).map(EdgeOutcome::Done),
    };
    if from.text() == to.text() {
        return skip(SkipReason::Validation {
            message: format!("{} cannot point at itself", from.text()),
        })
        .map(EdgeOutcome::Done);
    }

    let from_id = ctx.state.resolver.get_tag_id(ctx.conn, &Tag::split(from.text()))?;
    let to_id = ctx.state.resolver.get_tag_id(ctx.conn, &Tag::split(to.text()))?;
    let action = match update {
        TagPairUpdate::Add { .. } => EdgeAction::Add,
        TagPairUpdate::Delete { .. } => EdgeAction::Delete,
        TagPairUpdate::Pend { reason, .. } => EdgeAction::Pend(ctx.text_id(reason)?),
        TagPairUpdate::RescindPend { .. } => EdgeAction::RescindPend,
        TagPairUpdate::Petition { reason, .. } => EdgeAction::Petition(ctx.text_id(reason)?),
        TagPairUpdate::RescindPetition { .. } => EdgeAction::RescindPetition,
    };

    if !acc.graphs_before.contains_key(&service.id) {
        let graph = ctx.graph(service.id)?;
        acc.graphs_before.insert(service.id, graph);
    }

    let change = EdgeStore::new(service.id, kind).apply(ctx.conn, from_id, to_id, action, &mut ctx.deltas)?;
    if change.current {
        let touched = match kind {
            EdgeKind::Sibling => acc.sibling_tags.entry(service.id).or_default(),
            EdgeKind::Parent => acc.parent_tags.entry(service.id).or_default(),
        };
        touched.extend([from_id, to_id]);
    }
    if change.pending {
        ctx.notifications.push(Notification::NewPending);
    }

    if from.changed() || to.changed() {
        let substituted = update.with_pair(from.text().to_string(), to.text().to_string());
        return Ok(EdgeOutcome::Substituted(substituted));
    }
    Ok(EdgeOutcome::Done(ItemOutcome::Applied))
}

// ========================================
// After the loop
// ========================================

fn regenerate_display(ctx: &mut WriteCtx<'_>, acc: &PackageAccumulator) -> Result<()> {
    for (&tag_service_id, before) in &acc.graphs_before {
        ctx.state.display.invalidate(tag_service_id);
        let mut touched = BTreeSet::new();
        if let Some(tags) = acc.sibling_tags.get(&tag_service_id) {
            touched.extend(tags.iter().copied());
        }
        if let Some(tags) = acc.parent_tags.get(&tag_service_id) {
            touched.extend(tags.iter().copied());
        }
        if touched.is_empty() {
            continue;
        }

        let after = ctx.graph(tag_service_id)?;
        let affected = DisplayGraphs::regenerate_components(
            ctx.conn,
            tag_service_id,
            before,
            &after,
            &touched,
            &ctx.state.pairs,
        )?;
        if !affected.is_empty() {
            ctx.notifications
                .push(Notification::TagDisplayApplicationChanged);
        }
    }
    Ok(())
}

fn run_mapping_updates(ctx: &mut WriteCtx<'_>, mappings: BTreeMap<ServiceId, MappingBuckets>) -> Result<()> {
    let file_service_ids = ctx.state.services.specific_cache_file_service_ids();
    for (tag_service_id, buckets) in mappings {
        let graph = ctx.graph(tag_service_id)?;
        let report = update_mappings(
            ctx.conn,
            &mut ctx.state.pairs,
            &graph,
            &file_service_ids,
            tag_service_id,
            buckets,
            &mut ctx.deltas,
        )?;
        debug!("Mapping update on tag service {}: {:?}", tag_service_id, report);
        if report.pending_changed() {
            ctx.notifications.push(Notification::NewPending);
        }
    }
    Ok(())
}

fn queue_edge_notifications(ctx: &mut WriteCtx<'_>, acc: &PackageAccumulator) -> Result<()> {
    for (kind, touched) in [(EdgeKind::Sibling, &acc.sibling_tags), (EdgeKind::Parent, &acc.parent_tags)] {
        for (&tag_service_id, tag_ids) in touched {
            if tag_ids.is_empty() {
                continue;
            }
            let service_key = ctx.state.services.require(tag_service_id)?.key.clone();
            let mut tags: Vec<Tag> = IdentifierResolver::get_tags(ctx.conn, tag_ids.iter().copied())?
                .into_values()
                .collect();
            tags.sort();
            let notification = match kind {
                EdgeKind::Sibling => Notification::SiblingsChanged { service_key, tags },
                EdgeKind::Parent => Notification::ParentsChanged { service_key, tags },
            };
            ctx.notifications.push(notification);
        }
    }
    Ok(())
}
