//! Read-only queries.
//!
//! `LibraryReader` works on its own connection, so lookups never wait on
//! the writer's transaction. It keeps no state between calls: services,
//! specific-cache pairs and display graphs are read fresh each time.

use crate::db::connection::open_read_only;
use crate::display::{load_graph, TagDisplayGraph};
use crate::error::{Result, TagVaultError};
use crate::files::storage::{deletion_record, filter_to_status, has_status};
use crate::files::DeletionRecord;
use crate::ids::{HashId, TagId};
use crate::integrity::{self, IntegrityReport};
use crate::mappings::storage::rows_for_hashes;
use crate::mappings::{MappingDomain, SpecificPairs, TagCounts};
use crate::master::{clean_tag, FileHash, IdentifierResolver, Tag};
use crate::services::{get_service_info, Service, ServiceInfoKind, ServiceKey, ServiceRegistry};
use crate::status::ContentStatus;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Which files a tag query covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", content = "service_key", rename_all = "snake_case")]
pub enum FileLocation {
    /// Every file the tag service knows, stored locally or not.
    AllKnownFiles,
    /// Files current in one file service.
    Service(ServiceKey),
}

/// Whether tags are read as stored or after sibling and parent display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagDisplayType {
    Storage,
    Display,
}

/// One autocomplete match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSearchResult {
    pub tag: Tag,
    pub counts: TagCounts,
}

pub struct LibraryReader {
    conn: Connection,
}

impl LibraryReader {
    /// Open a read-only connection to a library database.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: open_read_only(db_path.as_ref())?,
        })
    }

    /// Query through an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn service(&self, key: &ServiceKey) -> Result<Service> {
        ServiceRegistry::load(&self.conn)?.require_key(key).cloned()
    }

    fn tag_service(&self, key: &ServiceKey) -> Result<Service> {
        let service = self.service(key)?;
        if !service.service_type.is_tag_service() {
            return Err(TagVaultError::InvalidServiceType {
                service_type: service.service_type.to_string(),
                message: "not a tag service".to_string(),
            });
        }
        Ok(service)
    }

    fn hash_id(&self, hash: &FileHash) -> Result<Option<HashId>> {
        IdentifierResolver::hash_id_if_exists(&self.conn, hash)
    }

    fn tag_id(&self, raw: &str) -> Result<Option<TagId>> {
        let tag = Tag::parse(raw).map_err(|problem| TagVaultError::InvalidTag {
            tag: raw.to_string(),
            reason: problem.to_string(),
        })?;
        IdentifierResolver::tag_id_if_exists(&self.conn, &tag)
    }

    fn graph(&self, tag_service: &Service) -> Result<TagDisplayGraph> {
        load_graph(&self.conn, tag_service.id)
    }

    /// The domain answering a query, or `None` when the file service has no
    /// specific cache for the tag service because none of its files carry
    /// any of its tags.
    fn domain(&self, tag_service: &Service, location: &FileLocation) -> Result<Option<MappingDomain>> {
        match location {
            FileLocation::AllKnownFiles => Ok(Some(MappingDomain::combined(tag_service.id))),
            FileLocation::Service(file_service_key) => {
                let file_service = self.service(file_service_key)?;
                if !file_service.service_type.has_specific_mapping_cache() {
                    return Err(TagVaultError::InvalidServiceType {
                        service_type: file_service.service_type.to_string(),
                        message: "no tag view for this file service".to_string(),
                    });
                }
                let pairs = SpecificPairs::load(&self.conn)?;
                Ok(pairs
                    .contains(file_service.id, tag_service.id)
                    .then(|| MappingDomain::specific(file_service.id, tag_service.id)))
            }
        }
    }

    // ========================================
    // Files
    // ========================================

    pub fn file_status(&self, service_key: &ServiceKey, hash: &FileHash, status: ContentStatus) -> Result<bool> {
        let service = self.service(service_key)?;
        match self.hash_id(hash)? {
            Some(hash_id) => has_status(&self.conn, service.id, hash_id, status),
            None => Ok(false),
        }
    }

    pub fn is_current(&self, service_key: &ServiceKey, hash: &FileHash) -> Result<bool> {
        self.file_status(service_key, hash, ContentStatus::Current)
    }

    pub fn is_pending(&self, service_key: &ServiceKey, hash: &FileHash) -> Result<bool> {
        self.file_status(service_key, hash, ContentStatus::Pending)
    }

    pub fn is_petitioned(&self, service_key: &ServiceKey, hash: &FileHash) -> Result<bool> {
        self.file_status(service_key, hash, ContentStatus::Petitioned)
    }

    /// Whether the service holds a deletion record for the file.
    pub fn is_deleted(&self, service_key: &ServiceKey, hash: &FileHash) -> Result<bool> {
        self.file_status(service_key, hash, ContentStatus::Deleted)
    }

    pub fn deletion_record(&self, service_key: &ServiceKey, hash: &FileHash) -> Result<Option<DeletionRecord>> {
        let service = self.service(service_key)?;
        match self.hash_id(hash)? {
            Some(hash_id) => deletion_record(&self.conn, service.id, hash_id),
            None => Ok(None),
        }
    }

    // ========================================
    // Service counters
    // ========================================

    pub fn service_info(&self, service_key: &ServiceKey, kind: ServiceInfoKind) -> Result<Option<i64>> {
        let service = self.service(service_key)?;
        get_service_info(&self.conn, service.id, kind)
    }

    /// Every counter a service carries.
    pub fn all_service_info(&self, service_key: &ServiceKey) -> Result<Vec<(ServiceInfoKind, i64)>> {
        let service = self.service(service_key)?;
        let mut info = Vec::new();
        for kind in ServiceInfoKind::kinds_for(service.service_type) {
            let value = get_service_info(&self.conn, service.id, *kind)?.unwrap_or(0);
            info.push((*kind, value));
        }
        Ok(info)
    }

    pub fn services(&self) -> Result<Vec<Service>> {
        Ok(ServiceRegistry::load(&self.conn)?.services().cloned().collect())
    }

    // ========================================
    // Tags
    // ========================================

    /// Current and pending file counts for one tag.
    pub fn tag_counts(
        &self,
        tag_service_key: &ServiceKey,
        tag: &str,
        location: &FileLocation,
        display: TagDisplayType,
    ) -> Result<TagCounts> {
        let tag_service = self.tag_service(tag_service_key)?;
        let Some(tag_id) = self.tag_id(tag)? else {
            return Ok(TagCounts::default());
        };
        let Some(domain) = self.domain(&tag_service, location)? else {
            return Ok(TagCounts::default());
        };
        match display {
            TagDisplayType::Storage => domain.storage_counts(&self.conn, tag_id),
            TagDisplayType::Display => domain.display_counts(&self.conn, tag_id),
        }
    }

    /// Whether a tag appears in any current sibling or parent edge.
    pub fn is_chained(&self, tag_service_key: &ServiceKey, tag: &str) -> Result<bool> {
        let tag_service = self.tag_service(tag_service_key)?;
        match self.tag_id(tag)? {
            Some(tag_id) => Ok(self.graph(&tag_service)?.is_chained(tag_id)),
            None => Ok(false),
        }
    }

    /// The tag a tag displays as after sibling collapse.
    pub fn ideal_sibling(&self, tag_service_key: &ServiceKey, tag: &str) -> Result<Tag> {
        let tag_service = self.tag_service(tag_service_key)?;
        let parsed = Tag::parse(tag).map_err(|problem| TagVaultError::InvalidTag {
            tag: tag.to_string(),
            reason: problem.to_string(),
        })?;
        match IdentifierResolver::tag_id_if_exists(&self.conn, &parsed)? {
            Some(tag_id) => {
                let ideal = self.graph(&tag_service)?.ideal(tag_id);
                IdentifierResolver::get_tag(&self.conn, ideal)
            }
            None => Ok(parsed),
        }
    }

    /// Ancestors of a tag's ideal, sorted.
    pub fn ideal_parents(&self, tag_service_key: &ServiceKey, tag: &str) -> Result<Vec<Tag>> {
        let tag_service = self.tag_service(tag_service_key)?;
        let Some(tag_id) = self.tag_id(tag)? else {
            return Ok(Vec::new());
        };
        let ancestors = self.graph(&tag_service)?.ancestors(tag_id);
        let mut tags: Vec<Tag> = IdentifierResolver::get_tags(&self.conn, ancestors)?
            .into_values()
            .collect();
        tags.sort();
        Ok(tags)
    }

    /// Current tags of each file as displayed. Files outside `location` or
    /// without tags are left out.
    pub fn display_tags_for_files(
        &self,
        tag_service_key: &ServiceKey,
        hashes: &[FileHash],
        location: &FileLocation,
    ) -> Result<BTreeMap<FileHash, BTreeSet<Tag>>> {
        let tag_service = self.tag_service(tag_service_key)?;
        let mut by_id: BTreeMap<HashId, FileHash> = BTreeMap::new();
        for hash in hashes {
            if let Some(hash_id) = self.hash_id(hash)? {
                by_id.insert(hash_id, *hash);
            }
        }
        let mut hash_ids: Vec<HashId> = by_id.keys().copied().collect();
        if let FileLocation::Service(file_service_key) = location {
            let file_service = self.service(file_service_key)?;
            let inside = filter_to_status(&self.conn, file_service.id, &hash_ids, ContentStatus::Current)?;
            hash_ids.retain(|id| inside.contains(id));
        }

        let graph = self.graph(&tag_service)?;
        let storage = MappingDomain::combined(tag_service.id);
        let mut displayed: BTreeMap<HashId, BTreeSet<TagId>> = BTreeMap::new();
        for (tag_id, files) in rows_for_hashes(&self.conn, &storage.current, &hash_ids)? {
            let implied = graph.implies(tag_id);
            for hash_id in files {
                displayed
                    .entry(hash_id)
                    .or_default()
                    .extend(implied.iter().copied());
            }
        }

        let all_tags: BTreeSet<TagId> = displayed.values().flatten().copied().collect();
        let names = IdentifierResolver::get_tags(&self.conn, all_tags)?;
        let mut out = BTreeMap::new();
        for (hash_id, tag_ids) in displayed {
            let Some(hash) = by_id.get(&hash_id) else {
                continue;
            };
            let tags: BTreeSet<Tag> = tag_ids
                .iter()
                .filter_map(|id| names.get(id).cloned())
                .collect();
            out.insert(*hash, tags);
        }
        Ok(out)
    }

    /// Autocomplete: tags whose subtag starts with `prefix`, most used
    /// first. A `namespace:` prefix restricts to that namespace.
    pub fn search_tags(
        &self,
        tag_service_key: &ServiceKey,
        prefix: &str,
        location: &FileLocation,
        display: TagDisplayType,
        limit: usize,
    ) -> Result<Vec<TagSearchResult>> {
        let tag_service = self.tag_service(tag_service_key)?;
        let Some(domain) = self.domain(&tag_service, location)? else {
            return Ok(Vec::new());
        };
        let Ok(cleaned) = clean_tag(prefix) else {
            return Ok(Vec::new());
        };
        let (namespace, subtag_prefix) = match cleaned.split_once(':') {
            Some((namespace, subtag)) if !namespace.is_empty() => (Some(namespace.to_string()), subtag.to_string()),
            _ => (None, cleaned.clone()),
        };

        let table = match display {
            TagDisplayType::Storage => &domain.storage_counts,
            TagDisplayType::Display => &domain.display_counts,
        };
        let pattern = format!("{}%", escape_like(&subtag_prefix));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT namespace, subtag, current_count, pending_count FROM {table}
             JOIN tags USING (tag_id)
             JOIN namespaces USING (namespace_id)
             JOIN subtags USING (subtag_id)
             WHERE subtag LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR namespace = ?2)
             ORDER BY current_count DESC, namespace, subtag
             LIMIT ?3"
        ))?;
        let results = stmt
            .query_map(params![pattern, namespace, limit as i64], |row| {
                Ok(TagSearchResult {
                    tag: Tag::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    counts: TagCounts {
                        current: row.get(2)?,
                        pending: row.get(3)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        integrity::check_integrity(&self.conn)
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::content::{ContentUpdate, ContentUpdatePackage, FilesUpdate, MappingsUpdate, TagPairUpdate};
    use crate::engine::Engine;
    use crate::files::FileInfo;
    use tempfile::TempDir;

    fn create_test_library() -> (TempDir, Engine, LibraryReader, FileHash) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.db");
        let mut engine = Engine::open(&path, EngineOptions::default()).unwrap();
        let file = FileInfo::new(FileHash::of_content(b"reader"), 42, "image/png");

        let package = ContentUpdatePackage::new()
            .with(
                ServiceKey::default_local_file(),
                ContentUpdate::Files(FilesUpdate::Add {
                    files: vec![file.clone()],
                    timestamp: Some(1),
                }),
            )
            .with(
                ServiceKey::default_local_tag(),
                ContentUpdate::Mappings(MappingsUpdate::Add {
                    tag: "character:samus aran".into(),
                    hashes: vec![file.hash],
                }),
            )
            .with(
                ServiceKey::default_local_tag(),
                ContentUpdate::TagSiblings(TagPairUpdate::Add {
                    from: "character:samus aran".into(),
                    to: "character:samus".into(),
                }),
            )
            .with(
                ServiceKey::default_local_tag(),
                ContentUpdate::TagParents(TagPairUpdate::Add {
                    from: "character:samus".into(),
                    to: "series:metroid".into(),
                }),
            );
        engine.apply_content_update_package(&package).unwrap();

        let reader = LibraryReader::open(&path).unwrap();
        (dir, engine, reader, file.hash)
    }

    #[test]
    fn test_membership_and_counters() {
        let (_dir, _engine, reader, hash) = create_test_library();
        assert!(reader.is_current(&ServiceKey::default_local_file(), &hash).unwrap());
        assert!(reader.is_current(&ServiceKey::combined_local_file(), &hash).unwrap());
        assert!(!reader.is_current(&ServiceKey::trash(), &hash).unwrap());
        assert!(!reader.is_deleted(&ServiceKey::default_local_file(), &hash).unwrap());
        assert_eq!(
            reader
                .service_info(&ServiceKey::default_local_file(), ServiceInfoKind::TotalSize)
                .unwrap(),
            Some(42)
        );
    }

    #[test]
    fn test_storage_and_display_counts_differ_for_chained_tags() {
        let (_dir, _engine, reader, _hash) = create_test_library();
        let tags = ServiceKey::default_local_tag();
        let everywhere = FileLocation::AllKnownFiles;
        let my_files = FileLocation::Service(ServiceKey::default_local_file());

        for location in [&everywhere, &my_files] {
            let stored = reader
                .tag_counts(&tags, "character:samus aran", location, TagDisplayType::Storage)
                .unwrap();
            assert_eq!(stored.current, 1);
            let displayed = reader
                .tag_counts(&tags, "character:samus aran", location, TagDisplayType::Display)
                .unwrap();
            assert_eq!(displayed.current, 0);
            let ideal = reader
                .tag_counts(&tags, "character:samus", location, TagDisplayType::Display)
                .unwrap();
            assert_eq!(ideal.current, 1);
            let parent = reader
                .tag_counts(&tags, "series:metroid", location, TagDisplayType::Display)
                .unwrap();
            assert_eq!(parent.current, 1);
        }
    }

    #[test]
    fn test_display_resolution() {
        let (_dir, _engine, reader, hash) = create_test_library();
        let tags = ServiceKey::default_local_tag();
        assert!(reader.is_chained(&tags, "character:samus aran").unwrap());
        assert!(!reader.is_chained(&tags, "unrelated").unwrap());
        assert_eq!(
            reader.ideal_sibling(&tags, "Character:Samus Aran").unwrap(),
            Tag::new("character", "samus")
        );
        assert_eq!(
            reader.ideal_parents(&tags, "character:samus aran").unwrap(),
            vec![Tag::new("series", "metroid")]
        );

        let displayed = reader
            .display_tags_for_files(&tags, &[hash], &FileLocation::AllKnownFiles)
            .unwrap();
        assert_eq!(
            displayed[&hash],
            BTreeSet::from([Tag::new("character", "samus"), Tag::new("series", "metroid")])
        );
    }

    #[test]
    fn test_search_tags_by_prefix() {
        let (_dir, _engine, reader, _hash) = create_test_library();
        let tags = ServiceKey::default_local_tag();

        let stored = reader
            .search_tags(&tags, "character:sam", &FileLocation::AllKnownFiles, TagDisplayType::Storage, 10)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].tag, Tag::new("character", "samus aran"));

        let displayed = reader
            .search_tags(&tags, "sam", &FileLocation::AllKnownFiles, TagDisplayType::Display, 10)
            .unwrap();
        assert_eq!(displayed.len(), 1);
        assert_eq!(displayed[0].tag, Tag::new("character", "samus"));

        assert!(reader
            .search_tags(&tags, "100%", &FileLocation::AllKnownFiles, TagDisplayType::Storage, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_integrity_clean_after_package() {
        let (_dir, _engine, reader, _hash) = create_test_library();
        let report = reader.check_integrity().unwrap();
        assert!(report.is_clean(), "{:?}", report.problems);
    }
}
