//! File metadata consumed by the service counters: size, mime and the
//! inbox.

use crate::error::Result;
use crate::ids::{id_list, HashId};
use crate::master::FileHash;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// SQL predicate over `files_info.mime` matching mimes the viewer can show.
pub const VIEWABLE_MIME_SQL: &str =
    "(mime LIKE 'image/%' OR mime LIKE 'video/%' OR mime LIKE 'audio/%')";

pub fn is_viewable_mime(mime: &str) -> bool {
    ["image/", "video/", "audio/"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
}

/// Basic information about a file, as supplied by the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub hash: FileHash,
    pub size: i64,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<i64>,
    #[serde(default)]
    pub has_audio: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_words: Option<i64>,
}

impl FileInfo {
    pub fn new(hash: FileHash, size: i64, mime: impl Into<String>) -> Self {
        Self {
            hash,
            size,
            mime: mime.into(),
            width: None,
            height: None,
            duration_ms: None,
            num_frames: None,
            has_audio: false,
            num_words: None,
        }
    }
}

/// Insert or refresh the metadata row for a file.
pub fn upsert_file_info(conn: &Connection, hash_id: HashId, info: &FileInfo) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO files_info
            (hash_id, size, mime, width, height, duration_ms, num_frames, has_audio, num_words)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(hash_id) DO UPDATE SET
            size = excluded.size,
            mime = excluded.mime,
            width = excluded.width,
            height = excluded.height,
            duration_ms = excluded.duration_ms,
            num_frames = excluded.num_frames,
            has_audio = excluded.has_audio,
            num_words = excluded.num_words",
    )?
    .execute(params![
        hash_id,
        info.size,
        info.mime,
        info.width,
        info.height,
        info.duration_ms,
        info.num_frames,
        info.has_audio,
        info.num_words,
    ])?;
    Ok(())
}

/// Totals over a set of files, used to move service counters by delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAggregates {
    pub num_files: i64,
    pub total_size: i64,
    pub num_viewable: i64,
    pub num_inbox: i64,
}

/// Aggregate size, viewability and inbox status of `hash_ids`.
///
/// Files with no metadata row count toward `num_files` only.
pub fn aggregate(conn: &Connection, hash_ids: &[HashId], inbox: &InboxSet) -> Result<FileAggregates> {
    if hash_ids.is_empty() {
        return Ok(FileAggregates::default());
    }
    let (total_size, num_viewable): (i64, i64) = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(size), 0), COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0)
             FROM files_info WHERE hash_id IN ({})",
            VIEWABLE_MIME_SQL,
            id_list(hash_ids)
        ),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(FileAggregates {
        num_files: hash_ids.len() as i64,
        total_size,
        num_viewable,
        num_inbox: hash_ids.iter().filter(|id| inbox.contains(**id)).count() as i64,
    })
}

/// The set of files in the inbox, mirrored in memory.
#[derive(Debug, Clone, Default)]
pub struct InboxSet {
    ids: HashSet<HashId>,
}

impl InboxSet {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT hash_id FROM file_inbox")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, HashId>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(Self { ids })
    }

    pub fn contains(&self, hash_id: HashId) -> bool {
        self.ids.contains(&hash_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Put files in the inbox. Returns the ids that were not already there.
    pub fn inbox(&mut self, conn: &Connection, hash_ids: &[HashId]) -> Result<Vec<HashId>> {
        let mut stmt = conn.prepare_cached("INSERT OR IGNORE INTO file_inbox (hash_id) VALUES (?1)")?;
        let mut changed = Vec::new();
        for id in hash_ids {
            if self.ids.contains(id) {
                continue;
            }
            stmt.execute(params![id])?;
            self.ids.insert(*id);
            changed.push(*id);
        }
        Ok(changed)
    }

    /// Archive files. Returns the ids that were in the inbox.
    pub fn archive(&mut self, conn: &Connection, hash_ids: &[HashId]) -> Result<Vec<HashId>> {
        let mut stmt = conn.prepare_cached("DELETE FROM file_inbox WHERE hash_id = ?1")?;
        let mut changed = Vec::new();
        for id in hash_ids {
            if !self.ids.contains(id) {
                continue;
            }
            stmt.execute(params![id])?;
            self.ids.remove(id);
            changed.push(*id);
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;

    #[test]
    fn test_viewable_mimes() {
        assert!(is_viewable_mime("image/png"));
        assert!(is_viewable_mime("video/webm"));
        assert!(!is_viewable_mime("application/zip"));
    }

    #[test]
    fn test_aggregate_counts_inbox_and_viewable() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let a = FileInfo::new(FileHash::of_content(b"a"), 100, "image/jpeg");
        let b = FileInfo::new(FileHash::of_content(b"b"), 50, "application/pdf");
        upsert_file_info(&conn, HashId(1), &a).unwrap();
        upsert_file_info(&conn, HashId(2), &b).unwrap();

        let mut inbox = InboxSet::default();
        assert_eq!(inbox.inbox(&conn, &[HashId(2)]).unwrap(), vec![HashId(2)]);

        let totals = aggregate(&conn, &[HashId(1), HashId(2), HashId(3)], &inbox).unwrap();
        assert_eq!(
            totals,
            FileAggregates {
                num_files: 3,
                total_size: 150,
                num_viewable: 1,
                num_inbox: 1,
            }
        );

        assert!(inbox.inbox(&conn, &[HashId(2)]).unwrap().is_empty());
        assert_eq!(InboxSet::load(&conn).unwrap().len(), 1);
        assert_eq!(inbox.archive(&conn, &[HashId(2)]).unwrap(), vec![HashId(2)]);
        assert!(InboxSet::load(&conn).unwrap().is_empty());
    }
}
