//! Physical-file bookkeeping owned by other subsystems: the similar-files
//! search registry and the file maintenance queue. The engine only
//! registers and de-registers files here.

use crate::error::Result;
use crate::ids::{id_list, HashId};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Background work that can be queued against a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceJob {
    RegenerateThumbnail,
    RefitThumbnail,
    RecomputeMetadata,
    CheckIntegrity,
    ComputeSimilarFilesHash,
}

impl MaintenanceJob {
    pub fn to_db(self) -> i64 {
        match self {
            MaintenanceJob::RegenerateThumbnail => 0,
            MaintenanceJob::RefitThumbnail => 1,
            MaintenanceJob::RecomputeMetadata => 2,
            MaintenanceJob::CheckIntegrity => 3,
            MaintenanceJob::ComputeSimilarFilesHash => 4,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(MaintenanceJob::RegenerateThumbnail),
            1 => Some(MaintenanceJob::RefitThumbnail),
            2 => Some(MaintenanceJob::RecomputeMetadata),
            3 => Some(MaintenanceJob::CheckIntegrity),
            4 => Some(MaintenanceJob::ComputeSimilarFilesHash),
            _ => None,
        }
    }
}

/// Register files for similar-files search. Already registered files keep
/// their searched distance.
pub fn register_similar_files(conn: &Connection, hash_ids: &[HashId]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO similar_files_search_cache (hash_id, searched_distance) VALUES (?1, NULL)",
    )?;
    let mut added = 0;
    for hash_id in hash_ids {
        added += stmt.execute(params![hash_id])?;
    }
    Ok(added)
}

pub fn deregister_similar_files(conn: &Connection, hash_ids: &[HashId]) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let removed = conn.execute(
        &format!(
            "DELETE FROM similar_files_search_cache WHERE hash_id IN ({})",
            id_list(hash_ids)
        ),
        [],
    )?;
    Ok(removed)
}

/// Queue a job for each file. A job already queued for a file is
/// rescheduled to the new start time.
pub fn add_maintenance_jobs(
    conn: &Connection,
    hash_ids: &[HashId],
    job: MaintenanceJob,
    time_can_start: i64,
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "REPLACE INTO file_maintenance_jobs (hash_id, job_type, time_can_start) VALUES (?1, ?2, ?3)",
    )?;
    let mut queued = 0;
    for hash_id in hash_ids {
        queued += stmt.execute(params![hash_id, job.to_db(), time_can_start])?;
    }
    Ok(queued)
}

/// Drop every queued job for the files.
pub fn cancel_maintenance_jobs(conn: &Connection, hash_ids: &[HashId]) -> Result<usize> {
    if hash_ids.is_empty() {
        return Ok(0);
    }
    let removed = conn.execute(
        &format!(
            "DELETE FROM file_maintenance_jobs WHERE hash_id IN ({})",
            id_list(hash_ids)
        ),
        [],
    )?;
    Ok(removed)
}

pub fn is_registered_for_similar_files(conn: &Connection, hash_id: HashId) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM similar_files_search_cache WHERE hash_id = ?1)",
        params![hash_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Jobs queued for a file.
pub fn queued_jobs(conn: &Connection, hash_id: HashId) -> Result<Vec<MaintenanceJob>> {
    let mut stmt = conn.prepare(
        "SELECT job_type FROM file_maintenance_jobs WHERE hash_id = ?1 ORDER BY job_type",
    )?;
    let codes = stmt
        .query_map(params![hash_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(codes.into_iter().filter_map(MaintenanceJob::from_db).collect())
}
