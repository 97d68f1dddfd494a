//! The mapping update algorithm for one tag service.
//!
//! A package's mapping edits are gathered into [`MappingBuckets`] and
//! applied by [`update_mappings`]:
//!
//! 1. Empty packages return at once. Nothing is filtered up front: each
//!    step is checked against storage as the earlier steps left it.
//! 2. The chained tags among everything touched are found in one pass.
//! 3. The altered files are collected and the ones that already had a
//!    current mapping are snapshotted.
//! 4. Buckets run in the order add, delete, pend, rescind-pend. Inside a
//!    bucket tags are processed one at a time by
//!    [`MappingUpdate::apply_bucket`], which updates the combined domain and
//!    then every specific domain whose population holds some of the files,
//!    so each tag sees the caches as the previous tag left them.
//! 5. The net change in mapped files is taken once over all altered files,
//!    then petitions, rescinded petitions and cleared deletion records are
//!    written.

use super::domain::MappingDomain;
use super::specific::SpecificPairs;
use super::storage::{delete_rows, filter_rows, hashes_with_any_row, insert_petitioned};
use crate::db::StorageTables;
use crate::display::TagDisplayGraph;
use crate::error::Result;
use crate::files::storage::filter_to_status;
use crate::ids::{HashId, ServiceId, TagId, TextId};
use crate::services::{ServiceInfoDeltas, ServiceInfoKind};
use crate::status::ContentStatus;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

type TagHashes = BTreeMap<TagId, BTreeSet<HashId>>;

/// Mapping edits for one tag service, gathered across a whole package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingBuckets {
    pub add: TagHashes,
    pub delete: TagHashes,
    pub pend: TagHashes,
    pub rescind_pend: TagHashes,
    pub petition: BTreeMap<(TagId, HashId), TextId>,
    pub rescind_petition: TagHashes,
    pub clear_deleted: TagHashes,
}

impl MappingBuckets {
    pub fn push(&mut self, action: BucketAction, tag_id: TagId, hash_ids: &[HashId]) {
        let bucket = match action {
            BucketAction::Add => &mut self.add,
            BucketAction::Delete => &mut self.delete,
            BucketAction::Pend => &mut self.pend,
            BucketAction::RescindPend => &mut self.rescind_pend,
        };
        bucket.entry(tag_id).or_default().extend(hash_ids.iter().copied());
    }

    pub fn push_petition(&mut self, tag_id: TagId, hash_ids: &[HashId], reason_id: TextId) {
        for hash_id in hash_ids {
            self.petition.insert((tag_id, *hash_id), reason_id);
        }
    }

    pub fn push_rescind_petition(&mut self, tag_id: TagId, hash_ids: &[HashId]) {
        self.rescind_petition
            .entry(tag_id)
            .or_default()
            .extend(hash_ids.iter().copied());
    }

    pub fn push_clear_deleted(&mut self, tag_id: TagId, hash_ids: &[HashId]) {
        self.clear_deleted
            .entry(tag_id)
            .or_default()
            .extend(hash_ids.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.delete.is_empty()
            && self.pend.is_empty()
            && self.rescind_pend.is_empty()
            && self.petition.is_empty()
            && self.rescind_petition.is_empty()
            && self.clear_deleted.is_empty()
    }

    /// Tags touched by the buckets that can change display.
    fn display_tags(&self) -> BTreeSet<TagId> {
        [&self.add, &self.delete, &self.pend, &self.rescind_pend]
            .into_iter()
            .flat_map(|bucket| bucket.keys().copied())
            .collect()
    }

    /// Files touched by the buckets that can change the mapped population.
    fn altered_hashes(&self) -> Vec<HashId> {
        let altered: BTreeSet<HashId> = [&self.add, &self.delete, &self.pend, &self.rescind_pend]
            .into_iter()
            .flat_map(|bucket| bucket.values().flatten().copied())
            .collect();
        altered.into_iter().collect()
    }
}

/// The four bucket kinds that take part in the per-tag interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketAction {
    Add,
    Delete,
    Pend,
    RescindPend,
}

impl BucketAction {
    pub const ORDER: [BucketAction; 4] = [
        BucketAction::Add,
        BucketAction::Delete,
        BucketAction::Pend,
        BucketAction::RescindPend,
    ];
}

/// Totals for one tag service after an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingUpdateReport {
    pub added: usize,
    pub deleted: usize,
    pub pended: usize,
    pub rescinded_pends: usize,
    pub petitioned: usize,
    pub rescinded_petitions: usize,
    pub cleared_deletion_records: usize,
    /// Change in the number of files with at least one current mapping.
    pub net_files: i64,
}

impl MappingUpdateReport {
    /// Whether anything a repository upload would carry changed.
    pub fn pending_changed(&self) -> bool {
        self.pended + self.rescinded_pends + self.petitioned + self.rescinded_petitions > 0
    }
}

/// Per file service, the altered files that are current in it. Computed
/// once per update; any pair it needs is generated on the way.
#[derive(Debug, Clone, Default)]
pub struct FilteredHashes {
    by_file_service: BTreeMap<ServiceId, HashSet<HashId>>,
}

impl FilteredHashes {
    pub fn compute(
        conn: &Connection,
        pairs: &mut SpecificPairs,
        graph: &TagDisplayGraph,
        file_service_ids: &[ServiceId],
        tag_service_id: ServiceId,
        altered: &[HashId],
    ) -> Result<Self> {
        let mut by_file_service = BTreeMap::new();
        for &file_service_id in file_service_ids {
            let population = filter_to_status(conn, file_service_id, altered, ContentStatus::Current)?;
            if population.is_empty() {
                continue;
            }
            if !pairs.contains(file_service_id, tag_service_id) {
                pairs.generate(conn, graph, file_service_id, tag_service_id)?;
            }
            by_file_service.insert(file_service_id, population);
        }
        Ok(Self { by_file_service })
    }

    pub fn get(&self, file_service_id: ServiceId) -> Option<&HashSet<HashId>> {
        self.by_file_service.get(&file_service_id)
    }

    pub fn file_services(&self) -> impl Iterator<Item = ServiceId> + '_ {
        self.by_file_service.keys().copied()
    }
}

/// Applies buckets one tag at a time across every affected domain.
pub struct MappingUpdate<'a> {
    conn: &'a Connection,
    graph: &'a TagDisplayGraph,
    tag_service_id: ServiceId,
    storage: StorageTables,
    chained: BTreeSet<TagId>,
    combined: MappingDomain,
    specific: Vec<(MappingDomain, HashSet<HashId>)>,
    deltas: &'a mut ServiceInfoDeltas,
}

impl<'a> MappingUpdate<'a> {
    pub fn new(
        conn: &'a Connection,
        graph: &'a TagDisplayGraph,
        tag_service_id: ServiceId,
        chained: BTreeSet<TagId>,
        filtered: FilteredHashes,
        deltas: &'a mut ServiceInfoDeltas,
    ) -> Self {
        let specific = filtered
            .by_file_service
            .into_iter()
            .map(|(f, population)| (MappingDomain::specific(f, tag_service_id), population))
            .collect();
        Self {
            conn,
            graph,
            tag_service_id,
            storage: StorageTables::new(tag_service_id),
            chained,
            combined: MappingDomain::combined(tag_service_id),
            specific,
            deltas,
        }
    }

    /// Run `op` on the combined domain and then on every specific domain
    /// holding some of the files. Returns the combined domain's result.
    fn each_domain<F>(&self, hash_ids: &[HashId], mut op: F) -> Result<usize>
    where
        F: FnMut(&MappingDomain, &[HashId]) -> Result<usize>,
    {
        if hash_ids.is_empty() {
            return Ok(0);
        }
        let changed = op(&self.combined, hash_ids)?;
        for (domain, population) in &self.specific {
            let subset: Vec<HashId> = hash_ids
                .iter()
                .filter(|id| population.contains(id))
                .copied()
                .collect();
            if !subset.is_empty() {
                op(domain, &subset)?;
            }
        }
        Ok(changed)
    }

    fn delta(&mut self, kind: ServiceInfoKind, delta: i64) {
        self.deltas.add(self.tag_service_id, kind, delta);
    }

    /// Apply one bucket action for one tag. Returns the number of storage
    /// rows that took the bucket's primary transition.
    ///
    /// Applicability is read from storage at call time, so a bucket sees
    /// the rows written by the buckets before it in the same package.
    ///
    /// - Add skips files already current, then rescinds any pending rows
    ///   and clears deletion records for the rest before making them current.
    /// - Delete drops petitions on the current rows, removes them and
    ///   records a deletion for every given file that lacks one.
    /// - Pend skips files that are current or already pending.
    /// - Rescind-pend touches only files pending now.
    pub fn apply_bucket(
        &mut self,
        action: BucketAction,
        tag_id: TagId,
        hash_ids: &[HashId],
    ) -> Result<usize> {
        let conn = self.conn;
        let graph = self.graph;
        let chained = self.chained.contains(&tag_id);

        let changed = match action {
            BucketAction::Add => {
                let current = filter_rows(conn, &self.storage.current, tag_id, hash_ids)?;
                let addable: Vec<HashId> = hash_ids
                    .iter()
                    .filter(|id| !current.contains(id))
                    .copied()
                    .collect();
                let hash_ids = addable.as_slice();

                let pending: Vec<HashId> =
                    filter_rows(conn, &self.storage.pending, tag_id, hash_ids)?.into_iter().collect();
                let rescinded = self.each_domain(&pending, |d, hs| {
                    d.remove_pending(conn, graph, tag_id, hs, chained)
                })?;
                self.delta(ServiceInfoKind::NumPendingMappings, -(rescinded as i64));

                let deleted: Vec<HashId> =
                    filter_rows(conn, &self.storage.deleted, tag_id, hash_ids)?.into_iter().collect();
                let cleared = self.each_domain(&deleted, |d, hs| d.remove_deleted(conn, tag_id, hs))?;
                self.delta(ServiceInfoKind::NumDeletedMappings, -(cleared as i64));

                let added = self.each_domain(hash_ids, |d, hs| {
                    d.add_current(conn, graph, tag_id, hs, chained)
                })?;
                self.delta(ServiceInfoKind::NumMappings, added as i64);
                added
            }
            BucketAction::Delete => {
                let current: Vec<HashId> =
                    filter_rows(conn, &self.storage.current, tag_id, hash_ids)?.into_iter().collect();
                let unpetitioned = delete_rows(conn, &self.storage.petitioned, tag_id, &current)?;
                self.delta(ServiceInfoKind::NumPetitionedMappings, -(unpetitioned as i64));

                let removed = self.each_domain(&current, |d, hs| {
                    d.remove_current(conn, graph, tag_id, hs, chained)
                })?;
                self.delta(ServiceInfoKind::NumMappings, -(removed as i64));

                let already = filter_rows(conn, &self.storage.deleted, tag_id, hash_ids)?;
                let unrecorded: Vec<HashId> = hash_ids
                    .iter()
                    .filter(|id| !already.contains(id))
                    .copied()
                    .collect();
                let recorded = self.each_domain(&unrecorded, |d, hs| d.add_deleted(conn, tag_id, hs))?;
                self.delta(ServiceInfoKind::NumDeletedMappings, recorded as i64);
                removed
            }
            BucketAction::Pend => {
                let current = filter_rows(conn, &self.storage.current, tag_id, hash_ids)?;
                let pending = filter_rows(conn, &self.storage.pending, tag_id, hash_ids)?;
                let pendable: Vec<HashId> = hash_ids
                    .iter()
                    .filter(|id| !current.contains(id) && !pending.contains(id))
                    .copied()
                    .collect();
                let pended = self.each_domain(&pendable, |d, hs| {
                    d.add_pending(conn, graph, tag_id, hs, chained)
                })?;
                self.delta(ServiceInfoKind::NumPendingMappings, pended as i64);
                pended
            }
            BucketAction::RescindPend => {
                let pending: Vec<HashId> =
                    filter_rows(conn, &self.storage.pending, tag_id, hash_ids)?.into_iter().collect();
                let rescinded = self.each_domain(&pending, |d, hs| {
                    d.remove_pending(conn, graph, tag_id, hs, chained)
                })?;
                self.delta(ServiceInfoKind::NumPendingMappings, -(rescinded as i64));
                rescinded
            }
        };
        Ok(changed)
    }
}

fn to_vec(hashes: &BTreeSet<HashId>) -> Vec<HashId> {
    hashes.iter().copied().collect()
}

/// Apply a package's mapping edits to one tag service.
///
/// `file_service_ids` are the file services that carry specific caches.
/// Counter deltas are accumulated into `deltas` and not written here.
pub fn update_mappings(
    conn: &Connection,
    pairs: &mut SpecificPairs,
    graph: &TagDisplayGraph,
    file_service_ids: &[ServiceId],
    tag_service_id: ServiceId,
    buckets: MappingBuckets,
    deltas: &mut ServiceInfoDeltas,
) -> Result<MappingUpdateReport> {
    let storage = StorageTables::new(tag_service_id);
    let mut report = MappingUpdateReport::default();
    if buckets.is_empty() {
        return Ok(report);
    }

    let chained = graph.filter_chained(&buckets.display_tags());
    let altered = buckets.altered_hashes();
    let pre_existing = hashes_with_any_row(conn, &storage.current, &altered)?;
    let filtered = FilteredHashes::compute(conn, pairs, graph, file_service_ids, tag_service_id, &altered)?;

    {
        let mut update = MappingUpdate::new(conn, graph, tag_service_id, chained, filtered, deltas);
        for action in BucketAction::ORDER {
            let bucket = match action {
                BucketAction::Add => &buckets.add,
                BucketAction::Delete => &buckets.delete,
                BucketAction::Pend => &buckets.pend,
                BucketAction::RescindPend => &buckets.rescind_pend,
            };
            for (tag_id, hashes) in bucket {
                let changed = update.apply_bucket(action, *tag_id, &to_vec(hashes))?;
                match action {
                    BucketAction::Add => report.added += changed,
                    BucketAction::Delete => report.deleted += changed,
                    BucketAction::Pend => report.pended += changed,
                    BucketAction::RescindPend => report.rescinded_pends += changed,
                }
            }
        }
    }

    let post_existing = hashes_with_any_row(conn, &storage.current, &altered)?;
    let gained = post_existing.difference(&pre_existing).count() as i64;
    let lost = pre_existing.difference(&post_existing).count() as i64;
    report.net_files = gained - lost;
    deltas.add(tag_service_id, ServiceInfoKind::NumFiles, report.net_files);

    let mut petitions: BTreeMap<(TagId, TextId), Vec<HashId>> = BTreeMap::new();
    for ((tag_id, hash_id), reason_id) in &buckets.petition {
        petitions.entry((*tag_id, *reason_id)).or_default().push(*hash_id);
    }
    for ((tag_id, reason_id), hashes) in petitions {
        let current: Vec<HashId> = filter_rows(conn, &storage.current, tag_id, &hashes)?.into_iter().collect();
        report.petitioned += insert_petitioned(conn, &storage.petitioned, tag_id, &current, reason_id)?.len();
    }
    deltas.add(tag_service_id, ServiceInfoKind::NumPetitionedMappings, report.petitioned as i64);

    for (tag_id, hashes) in &buckets.rescind_petition {
        report.rescinded_petitions += delete_rows(conn, &storage.petitioned, *tag_id, &to_vec(hashes))?;
    }
    deltas.add(
        tag_service_id,
        ServiceInfoKind::NumPetitionedMappings,
        -(report.rescinded_petitions as i64),
    );

    let combined = MappingDomain::combined(tag_service_id);
    for (tag_id, hashes) in &buckets.clear_deleted {
        let hashes = to_vec(hashes);
        report.cleared_deletion_records += combined.remove_deleted(conn, *tag_id, &hashes)?;
        for file_service_id in pairs.file_services_for(tag_service_id) {
            MappingDomain::specific(file_service_id, tag_service_id).remove_deleted(conn, *tag_id, &hashes)?;
        }
    }
    deltas.add(
        tag_service_id,
        ServiceInfoKind::NumDeletedMappings,
        -(report.cleared_deletion_records as i64),
    );

    debug!(
        "Mapping update on tag service {}: +{} -{} pend {} rescind {} petition {} net files {}",
        tag_service_id,
        report.added,
        report.deleted,
        report.pended,
        report.rescinded_pends,
        report.petitioned,
        report.net_files
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;
    use crate::db::CombinedTables;
    use crate::files::storage::insert_current;
    use crate::mappings::storage::hashes_for_tag;

    const TAGS: ServiceId = ServiceId(20);
    const FILES: ServiceId = ServiceId(1);

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        StorageTables::new(TAGS).create(&conn).unwrap();
        CombinedTables::new(TAGS).create(&conn).unwrap();
        conn
    }

    fn h(ids: &[i64]) -> Vec<HashId> {
        ids.iter().map(|id| HashId(*id)).collect()
    }

    fn run(
        conn: &Connection,
        pairs: &mut SpecificPairs,
        graph: &TagDisplayGraph,
        buckets: MappingBuckets,
        deltas: &mut ServiceInfoDeltas,
    ) -> MappingUpdateReport {
        update_mappings(conn, pairs, graph, &[FILES], TAGS, buckets, deltas).unwrap()
    }

    #[test]
    fn test_add_then_delete_in_one_package() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut buckets = MappingBuckets::default();
        buckets.push(BucketAction::Add, TagId(1), &h(&[1, 2]));
        buckets.push(BucketAction::Delete, TagId(1), &h(&[2]));
        let report = run(&conn, &mut pairs, &graph, buckets, &mut deltas);

        assert_eq!(report.added, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.net_files, 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumMappings), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumDeletedMappings), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumFiles), 1);
    }

    #[test]
    fn test_add_rescinds_pending_and_clears_deleted() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut first = MappingBuckets::default();
        first.push(BucketAction::Pend, TagId(1), &h(&[1]));
        first.push(BucketAction::Delete, TagId(1), &h(&[2]));
        run(&conn, &mut pairs, &graph, first, &mut deltas);

        let mut second = MappingBuckets::default();
        second.push(BucketAction::Add, TagId(1), &h(&[1, 2]));
        run(&conn, &mut pairs, &graph, second, &mut deltas);

        let storage = StorageTables::new(TAGS);
        assert!(hashes_for_tag(&conn, &storage.pending, TagId(1)).unwrap().is_empty());
        assert!(hashes_for_tag(&conn, &storage.deleted, TagId(1)).unwrap().is_empty());
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPendingMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumDeletedMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumMappings), 2);
    }

    #[test]
    fn test_apply_bucket_updates_specific_domain_for_population_only() {
        let conn = create_test_conn();
        insert_current(&conn, FILES, &[(HashId(1), None)]).unwrap();
        let graph = TagDisplayGraph::build(&[(TagId(1), TagId(2))], &[]);
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let filtered =
            FilteredHashes::compute(&conn, &mut pairs, &graph, &[FILES], TAGS, &h(&[1, 2])).unwrap();
        assert!(pairs.contains(FILES, TAGS));
        assert_eq!(filtered.get(FILES).unwrap().len(), 1);

        let chained = graph.filter_chained(&[TagId(1)]);
        let mut update = MappingUpdate::new(&conn, &graph, TAGS, chained, filtered, &mut deltas);
        assert_eq!(update.apply_bucket(BucketAction::Add, TagId(1), &h(&[1, 2])).unwrap(), 2);

        let combined = MappingDomain::combined(TAGS);
        let specific = MappingDomain::specific(FILES, TAGS);
        assert_eq!(combined.display_counts(&conn, TagId(2)).unwrap().current, 2);
        assert_eq!(specific.display_counts(&conn, TagId(2)).unwrap().current, 1);
        assert_eq!(specific.storage_counts(&conn, TagId(1)).unwrap().current, 1);
        assert!(combined.display_counts(&conn, TagId(1)).unwrap().is_zero());
    }

    #[test]
    fn test_pend_then_rescind_is_identity() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut pend = MappingBuckets::default();
        pend.push(BucketAction::Pend, TagId(3), &h(&[5]));
        let report = run(&conn, &mut pairs, &graph, pend, &mut deltas);
        assert!(report.pending_changed());
        assert_eq!(report.net_files, 0);

        let mut rescind = MappingBuckets::default();
        rescind.push(BucketAction::RescindPend, TagId(3), &h(&[5]));
        run(&conn, &mut pairs, &graph, rescind, &mut deltas);

        assert!(deltas.is_empty());
        let combined = MappingDomain::combined(TAGS);
        assert!(combined.storage_counts(&conn, TagId(3)).unwrap().is_zero());
        assert!(combined.display_counts(&conn, TagId(3)).unwrap().is_zero());
    }

    #[test]
    fn test_petition_requires_current_row() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut add = MappingBuckets::default();
        add.push(BucketAction::Add, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, add, &mut deltas);

        let mut petition = MappingBuckets::default();
        petition.push_petition(TagId(1), &h(&[1, 2]), TextId(1));
        let report = run(&conn, &mut pairs, &graph, petition, &mut deltas);
        assert_eq!(report.petitioned, 1);

        let mut delete = MappingBuckets::default();
        delete.push(BucketAction::Delete, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, delete, &mut deltas);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPetitionedMappings), 0);
    }

    #[test]
    fn test_pend_and_rescind_in_one_package() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut buckets = MappingBuckets::default();
        buckets.push(BucketAction::Pend, TagId(1), &h(&[1]));
        buckets.push(BucketAction::RescindPend, TagId(1), &h(&[1]));
        let report = run(&conn, &mut pairs, &graph, buckets, &mut deltas);

        assert_eq!(report.pended, 1);
        assert_eq!(report.rescinded_pends, 1);
        let storage = StorageTables::new(TAGS);
        assert!(hashes_for_tag(&conn, &storage.pending, TagId(1)).unwrap().is_empty());
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPendingMappings), 0);
        assert!(MappingDomain::combined(TAGS).display_counts(&conn, TagId(1)).unwrap().is_zero());
    }

    #[test]
    fn test_add_then_delete_over_prior_deletion_record() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut first = MappingBuckets::default();
        first.push(BucketAction::Add, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, first, &mut deltas);
        let mut second = MappingBuckets::default();
        second.push(BucketAction::Delete, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, second, &mut deltas);

        let mut both = MappingBuckets::default();
        both.push(BucketAction::Add, TagId(1), &h(&[1]));
        both.push(BucketAction::Delete, TagId(1), &h(&[1]));
        let report = run(&conn, &mut pairs, &graph, both, &mut deltas);

        assert_eq!(report.added, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.net_files, 0);
        let storage = StorageTables::new(TAGS);
        assert!(hashes_for_tag(&conn, &storage.current, TagId(1)).unwrap().is_empty());
        assert_eq!(hashes_for_tag(&conn, &storage.deleted, TagId(1)).unwrap().len(), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumDeletedMappings), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumFiles), 0);
    }

    #[test]
    fn test_delete_then_pend_in_one_package() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut add = MappingBuckets::default();
        add.push(BucketAction::Add, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, add, &mut deltas);

        let mut both = MappingBuckets::default();
        both.push(BucketAction::Delete, TagId(1), &h(&[1]));
        both.push(BucketAction::Pend, TagId(1), &h(&[1]));
        let report = run(&conn, &mut pairs, &graph, both, &mut deltas);

        assert_eq!(report.deleted, 1);
        assert_eq!(report.pended, 1);
        let storage = StorageTables::new(TAGS);
        assert!(hashes_for_tag(&conn, &storage.current, TagId(1)).unwrap().is_empty());
        assert_eq!(hashes_for_tag(&conn, &storage.pending, TagId(1)).unwrap().len(), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPendingMappings), 1);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumDeletedMappings), 1);
    }

    #[test]
    fn test_petition_and_rescind_in_one_package() {
        let conn = create_test_conn();
        let graph = TagDisplayGraph::default();
        let mut pairs = SpecificPairs::default();
        let mut deltas = ServiceInfoDeltas::new();

        let mut add = MappingBuckets::default();
        add.push(BucketAction::Add, TagId(1), &h(&[1]));
        run(&conn, &mut pairs, &graph, add, &mut deltas);

        let mut both = MappingBuckets::default();
        both.push_petition(TagId(1), &h(&[1]), TextId(1));
        both.push_rescind_petition(TagId(1), &h(&[1]));
        let report = run(&conn, &mut pairs, &graph, both, &mut deltas);

        assert_eq!(report.petitioned, 1);
        assert_eq!(report.rescinded_petitions, 1);
        let storage = StorageTables::new(TAGS);
        assert!(hashes_for_tag(&conn, &storage.petitioned, TagId(1)).unwrap().is_empty());
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPetitionedMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumPendingMappings), 0);
        assert_eq!(deltas.get(TAGS, ServiceInfoKind::NumMappings), 1);
    }
}
