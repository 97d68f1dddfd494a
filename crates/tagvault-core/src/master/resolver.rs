//! Surrogate id resolution for hashes, tags, texts and URLs.

use super::hashes::FileHash;
use super::tags::Tag;
use super::urls::NormalizedUrl;
use crate::config::CacheConfig;
use crate::error::{Result, TagVaultError};
use crate::ids::{id_list, HashId, TagId, TextId, UrlId};
use mini_moka::sync::Cache;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

/// Bidirectional id lookup. Lookups by value create missing rows.
///
/// The hash side keeps an in-memory cache of id → hash, evicted when files
/// are physically deleted and cleared whenever a transaction rolls back.
#[derive(Clone)]
pub struct IdentifierResolver {
    hash_cache: Cache<HashId, FileHash>,
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierResolver {
    pub fn new() -> Self {
        Self {
            hash_cache: Cache::new(CacheConfig::HASH_CACHE_CAPACITY),
        }
    }

    // ========================================
    // Hashes
    // ========================================

    pub fn get_hash_id(&self, conn: &Connection, hash: &FileHash) -> Result<HashId> {
        if let Some(id) = Self::hash_id_if_exists(conn, hash)? {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO hashes (hash) VALUES (?1)",
            params![hash.as_bytes().as_slice()],
        )?;
        let id = HashId(conn.last_insert_rowid());
        self.hash_cache.insert(id, *hash);
        Ok(id)
    }

    pub fn get_hash_ids(&self, conn: &Connection, hashes: &[FileHash]) -> Result<Vec<HashId>> {
        hashes.iter().map(|h| self.get_hash_id(conn, h)).collect()
    }

    pub fn hash_id_if_exists(conn: &Connection, hash: &FileHash) -> Result<Option<HashId>> {
        let id = conn
            .query_row(
                "SELECT hash_id FROM hashes WHERE hash = ?1",
                params![hash.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_hash(&self, conn: &Connection, hash_id: HashId) -> Result<FileHash> {
        if let Some(hash) = self.hash_cache.get(&hash_id) {
            return Ok(hash);
        }
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT hash FROM hashes WHERE hash_id = ?1",
                params![hash_id],
                |row| row.get(0),
            )
            .optional()?;
        let bytes = bytes.ok_or(TagVaultError::UnknownId {
            kind: "hash",
            id: hash_id.get(),
        })?;
        let hash = FileHash::from_slice(&bytes)?;
        self.hash_cache.insert(hash_id, hash);
        Ok(hash)
    }

    pub fn get_hashes(
        &self,
        conn: &Connection,
        hash_ids: impl IntoIterator<Item = HashId>,
    ) -> Result<HashMap<HashId, FileHash>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        for id in hash_ids {
            match self.hash_cache.get(&id) {
                Some(hash) => {
                    found.insert(id, hash);
                }
                None => missing.push(id),
            }
        }

        if !missing.is_empty() {
            let mut stmt = conn.prepare(&format!(
                "SELECT hash_id, hash FROM hashes WHERE hash_id IN ({})",
                id_list(&missing)
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, HashId>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            for row in rows {
                let (id, bytes) = row?;
                let hash = FileHash::from_slice(&bytes)?;
                self.hash_cache.insert(id, hash);
                found.insert(id, hash);
            }
        }

        Ok(found)
    }

    /// Forget cached hashes, used when files are physically deleted.
    pub fn drop_hash_ids_from_cache(&self, hash_ids: &[HashId]) {
        for id in hash_ids {
            self.hash_cache.invalidate(id);
        }
    }

    pub fn clear_cache(&self) {
        self.hash_cache.invalidate_all();
    }

    // ========================================
    // Tags
    // ========================================

    pub fn get_tag_id(&self, conn: &Connection, tag: &Tag) -> Result<TagId> {
        let namespace_id = Self::get_or_create(conn, "namespaces", "namespace", &tag.namespace)?;
        let subtag_id = Self::get_or_create(conn, "subtags", "subtag", &tag.subtag)?;

        let existing: Option<TagId> = conn
            .query_row(
                "SELECT tag_id FROM tags WHERE namespace_id = ?1 AND subtag_id = ?2",
                params![namespace_id, subtag_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO tags (namespace_id, subtag_id) VALUES (?1, ?2)",
            params![namespace_id, subtag_id],
        )?;
        Ok(TagId(conn.last_insert_rowid()))
    }

    pub fn tag_id_if_exists(conn: &Connection, tag: &Tag) -> Result<Option<TagId>> {
        let id = conn
            .query_row(
                "SELECT tag_id FROM tags
                 JOIN namespaces USING (namespace_id)
                 JOIN subtags USING (subtag_id)
                 WHERE namespace = ?1 AND subtag = ?2",
                params![tag.namespace, tag.subtag],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_tag(conn: &Connection, tag_id: TagId) -> Result<Tag> {
        let tag = conn
            .query_row(
                "SELECT namespace, subtag FROM tags
                 JOIN namespaces USING (namespace_id)
                 JOIN subtags USING (subtag_id)
                 WHERE tag_id = ?1",
                params![tag_id],
                |row| Ok(Tag::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        tag.ok_or(TagVaultError::UnknownId {
            kind: "tag",
            id: tag_id.get(),
        })
    }

    pub fn get_tags(
        conn: &Connection,
        tag_ids: impl IntoIterator<Item = TagId>,
    ) -> Result<HashMap<TagId, Tag>> {
        let ids: Vec<TagId> = tag_ids.into_iter().collect();
        let mut out = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(out);
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT tag_id, namespace, subtag FROM tags
             JOIN namespaces USING (namespace_id)
             JOIN subtags USING (subtag_id)
             WHERE tag_id IN ({})",
            id_list(&ids)
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, TagId>(0)?,
                Tag::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            ))
        })?;
        for row in rows {
            let (id, tag) = row?;
            out.insert(id, tag);
        }
        Ok(out)
    }

    // ========================================
    // Texts and URLs
    // ========================================

    pub fn get_text_id(conn: &Connection, text: &str) -> Result<TextId> {
        Self::get_or_create(conn, "texts", "text", text).map(TextId)
    }

    pub fn text_id_if_exists(conn: &Connection, text: &str) -> Result<Option<TextId>> {
        let id = conn
            .query_row("SELECT text_id FROM texts WHERE text = ?1", [text], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    pub fn get_text(conn: &Connection, text_id: TextId) -> Result<String> {
        let text = conn
            .query_row(
                "SELECT text FROM texts WHERE text_id = ?1",
                params![text_id],
                |row| row.get(0),
            )
            .optional()?;
        text.ok_or(TagVaultError::UnknownId {
            kind: "text",
            id: text_id.get(),
        })
    }

    pub fn get_url_id(conn: &Connection, url: &NormalizedUrl) -> Result<UrlId> {
        let existing: Option<UrlId> = conn
            .query_row("SELECT url_id FROM urls WHERE url = ?1", [&url.url], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(
            "INSERT INTO urls (domain, url) VALUES (?1, ?2)",
            params![url.domain, url.url],
        )?;
        Ok(UrlId(conn.last_insert_rowid()))
    }

    fn get_or_create(conn: &Connection, table: &str, column: &str, value: &str) -> Result<i64> {
        let id_column = format!("{}_id", column);
        let existing: Option<i64> = conn
            .query_row(
                &format!("SELECT {id_column} FROM {table} WHERE {column} = ?1"),
                [value],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        conn.execute(&format!("INSERT INTO {table} ({column}) VALUES (?1)"), [value])?;
        Ok(conn.last_insert_rowid())
    }
}
