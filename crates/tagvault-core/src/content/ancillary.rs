//! Content that hangs off files without cascading: URLs, viewing stats,
//! ratings, notes and repository directories.

use super::update::CanvasType;
use crate::engine::context::WriteCtx;
use crate::error::Result;
use crate::ids::{id_list, HashId, ServiceId, UrlId};
use crate::master::IdentifierResolver;
use crate::services::ServiceInfoKind;
use rusqlite::{params, Connection, OptionalExtension};

// ========================================
// URLs
// ========================================

pub(crate) fn add_urls(conn: &Connection, url_ids: &[UrlId], hash_ids: &[HashId]) -> Result<usize> {
    let mut stmt = conn.prepare_cached("INSERT OR IGNORE INTO url_map (hash_id, url_id) VALUES (?1, ?2)")?;
    let mut added = 0;
    for hash_id in hash_ids {
        for url_id in url_ids {
            added += stmt.execute(params![hash_id, url_id])?;
        }
    }
    Ok(added)
}

pub(crate) fn delete_urls(conn: &Connection, url_ids: &[UrlId], hash_ids: &[HashId]) -> Result<usize> {
    if url_ids.is_empty() || hash_ids.is_empty() {
        return Ok(0);
    }
    let removed = conn.execute(
        &format!(
            "DELETE FROM url_map WHERE url_id IN ({}) AND hash_id IN ({})",
            id_list(url_ids),
            id_list(hash_ids)
        ),
        [],
    )?;
    Ok(removed)
}

/// URLs mapped to a file.
pub fn urls_for_hash(conn: &Connection, hash_id: HashId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT url FROM url_map JOIN urls USING (url_id) WHERE hash_id = ?1 ORDER BY url",
    )?;
    let urls = stmt
        .query_map(params![hash_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(urls)
}

// ========================================
// Viewing stats
// ========================================

/// Viewing totals for one file on one canvas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewingStats {
    pub views: i64,
    pub viewtime_ms: i64,
    pub last_viewed: Option<i64>,
}

/// Record a view. With `additive` the numbers are added to the running
/// totals, otherwise they replace them.
pub(crate) fn record_viewing_stats(
    conn: &Connection,
    hash_id: HashId,
    canvas: CanvasType,
    stats: ViewingStats,
    additive: bool,
) -> Result<()> {
    let sql = if additive {
        "INSERT INTO file_viewing_stats (hash_id, canvas_type, last_viewed_timestamp, views, viewtime_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(hash_id, canvas_type) DO UPDATE SET
            last_viewed_timestamp = COALESCE(excluded.last_viewed_timestamp, last_viewed_timestamp),
            views = views + excluded.views,
            viewtime_ms = viewtime_ms + excluded.viewtime_ms"
    } else {
        "REPLACE INTO file_viewing_stats (hash_id, canvas_type, last_viewed_timestamp, views, viewtime_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    };
    conn.prepare_cached(sql)?.execute(params![
        hash_id,
        canvas.to_db(),
        stats.last_viewed,
        stats.views,
        stats.viewtime_ms
    ])?;
    Ok(())
}

pub(crate) fn clear_viewing_stats(conn: &Connection, hash_ids: &[HashId]) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let removed = conn.execute(
        &format!("DELETE FROM file_viewing_stats WHERE hash_id IN ({})", id_list(hash_ids)),
        [],
    )?;
    Ok(removed)
}

pub fn viewing_stats(conn: &Connection, hash_id: HashId, canvas: CanvasType) -> Result<ViewingStats> {
    let stats = conn
        .query_row(
            "SELECT views, viewtime_ms, last_viewed_timestamp FROM file_viewing_stats
             WHERE hash_id = ?1 AND canvas_type = ?2",
            params![hash_id, canvas.to_db()],
            |row| {
                Ok(ViewingStats {
                    views: row.get(0)?,
                    viewtime_ms: row.get(1)?,
                    last_viewed: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(stats.unwrap_or_default())
}

// ========================================
// Ratings
// ========================================

/// Set or clear a rating on a local rating service. The service's file
/// counter follows the number of rated files.
pub(crate) fn set_ratings(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    rating: Option<f64>,
    hash_ids: &[HashId],
) -> Result<()> {
    let before = count_ratings(ctx.conn, service_id, hash_ids)?;
    match rating {
        Some(value) => {
            let mut stmt = ctx.conn.prepare_cached(
                "REPLACE INTO local_ratings (service_id, hash_id, rating) VALUES (?1, ?2, ?3)",
            )?;
            for hash_id in hash_ids {
                stmt.execute(params![service_id, hash_id, value])?;
            }
        }
        None => {
            if !hash_ids.is_empty() {
                ctx.conn.execute(
                    &format!(
                        "DELETE FROM local_ratings WHERE service_id = ?1 AND hash_id IN ({})",
                        id_list(hash_ids)
                    ),
                    params![service_id],
                )?;
            }
        }
    }
    let after = count_ratings(ctx.conn, service_id, hash_ids)?;
    ctx.deltas
        .add(service_id, ServiceInfoKind::NumFiles, after - before);
    Ok(())
}

fn count_ratings(conn: &Connection, service_id: ServiceId, hash_ids: &[HashId]) -> Result<i64> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let count = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM local_ratings WHERE service_id = ?1 AND hash_id IN ({})",
            id_list(hash_ids)
        ),
        params![service_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn get_rating(conn: &Connection, service_id: ServiceId, hash_id: HashId) -> Result<Option<f64>> {
    let rating = conn
        .query_row(
            "SELECT rating FROM local_ratings WHERE service_id = ?1 AND hash_id = ?2",
            params![service_id, hash_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(rating)
}

// ========================================
// Notes
// ========================================

/// Set a named note on a file. An empty note deletes it.
pub(crate) fn set_note(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_id: HashId,
    name: &str,
    note: &str,
) -> Result<()> {
    if note.is_empty() {
        return delete_note(ctx, service_id, hash_id, name);
    }
    let name_id = IdentifierResolver::get_text_id(ctx.conn, name)?;
    let note_id = IdentifierResolver::get_text_id(ctx.conn, note)?;
    let existed = note_exists(ctx.conn, hash_id, name_id.get())?;
    ctx.conn
        .prepare_cached("REPLACE INTO file_notes (hash_id, name_id, note_id) VALUES (?1, ?2, ?3)")?
        .execute(params![hash_id, name_id, note_id])?;
    if !existed {
        ctx.deltas.add(service_id, ServiceInfoKind::NumNotes, 1);
    }
    Ok(())
}

pub(crate) fn delete_note(
    ctx: &mut WriteCtx<'_>,
    service_id: ServiceId,
    hash_id: HashId,
    name: &str,
) -> Result<()> {
    let Some(name_id) = IdentifierResolver::text_id_if_exists(ctx.conn, name)? else {
        return Ok(());
    };
    let removed = ctx
        .conn
        .prepare_cached("DELETE FROM file_notes WHERE hash_id = ?1 AND name_id = ?2")?
        .execute(params![hash_id, name_id])?;
    ctx.deltas
        .add(service_id, ServiceInfoKind::NumNotes, -(removed as i64));
    Ok(())
}

fn note_exists(conn: &Connection, hash_id: HashId, name_id: i64) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM file_notes WHERE hash_id = ?1 AND name_id = ?2)",
        params![hash_id, name_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Notes on a file as (name, note), sorted by name.
pub fn notes_for_hash(conn: &Connection, hash_id: HashId) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT names.text, notes.text FROM file_notes
         JOIN texts AS names ON names.text_id = file_notes.name_id
         JOIN texts AS notes ON notes.text_id = file_notes.note_id
         WHERE hash_id = ?1 ORDER BY names.text",
    )?;
    let notes = stmt
        .query_map(params![hash_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notes)
}

// ========================================
// Repository directories
// ========================================

/// Replace the file list of a directory on a file repository.
pub(crate) fn set_directory(
    conn: &Connection,
    service_id: ServiceId,
    directory: &str,
    hash_ids: &[HashId],
    note: &str,
) -> Result<()> {
    let directory_id = IdentifierResolver::get_text_id(conn, directory)?;
    delete_directory_rows(conn, service_id, directory_id.get())?;

    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO service_directory_file_map (service_id, directory_id, hash_id)
         VALUES (?1, ?2, ?3)",
    )?;
    for hash_id in hash_ids {
        stmt.execute(params![service_id, directory_id, hash_id])?;
    }

    let (num_files, total_size): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(files_info.size), 0)
         FROM service_directory_file_map
         LEFT JOIN files_info USING (hash_id)
         WHERE service_id = ?1 AND directory_id = ?2",
        params![service_id, directory_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    conn.execute(
        "INSERT INTO service_directories (service_id, directory_id, num_files, total_size, note)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![service_id, directory_id, num_files, total_size, note],
    )?;
    Ok(())
}

pub(crate) fn delete_directory(conn: &Connection, service_id: ServiceId, directory: &str) -> Result<()> {
    if let Some(directory_id) = IdentifierResolver::text_id_if_exists(conn, directory)? {
        delete_directory_rows(conn, service_id, directory_id.get())?;
    }
    Ok(())
}

fn delete_directory_rows(conn: &Connection, service_id: ServiceId, directory_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM service_directories WHERE service_id = ?1 AND directory_id = ?2",
        params![service_id, directory_id],
    )?;
    conn.execute(
        "DELETE FROM service_directory_file_map WHERE service_id = ?1 AND directory_id = ?2",
        params![service_id, directory_id],
    )?;
    Ok(())
}

/// Summary of a repository directory: (file count, total size, note).
pub fn directory_info(
    conn: &Connection,
    service_id: ServiceId,
    directory: &str,
) -> Result<Option<(i64, i64, String)>> {
    let Some(directory_id) = IdentifierResolver::text_id_if_exists(conn, directory)? else {
        return Ok(None);
    };
    let info = conn
        .query_row(
            "SELECT num_files, total_size, note FROM service_directories
             WHERE service_id = ?1 AND directory_id = ?2",
            params![service_id, directory_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    Ok(info)
}
