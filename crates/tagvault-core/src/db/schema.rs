//! Static schema shared by every library database.

use crate::error::Result;
use rusqlite::Connection;

const SCHEMA: &str = r#"
-- Identifiers
CREATE TABLE IF NOT EXISTS hashes (
    hash_id INTEGER PRIMARY KEY,
    hash BLOB NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS namespaces (
    namespace_id INTEGER PRIMARY KEY,
    namespace TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS subtags (
    subtag_id INTEGER PRIMARY KEY,
    subtag TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS tags (
    tag_id INTEGER PRIMARY KEY,
    namespace_id INTEGER NOT NULL,
    subtag_id INTEGER NOT NULL,
    UNIQUE (namespace_id, subtag_id)
);

CREATE INDEX IF NOT EXISTS idx_tags_subtag ON tags(subtag_id);

CREATE TABLE IF NOT EXISTS texts (
    text_id INTEGER PRIMARY KEY,
    text TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS urls (
    url_id INTEGER PRIMARY KEY,
    domain TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE
);

-- Services and their counters
CREATE TABLE IF NOT EXISTS services (
    service_id INTEGER PRIMARY KEY,
    service_key BLOB NOT NULL UNIQUE,
    service_type INTEGER NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS service_info (
    service_id INTEGER NOT NULL,
    info_type INTEGER NOT NULL,
    info INTEGER NOT NULL,
    PRIMARY KEY (service_id, info_type)
);

-- File membership
CREATE TABLE IF NOT EXISTS current_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    timestamp INTEGER,
    PRIMARY KEY (service_id, hash_id)
);

CREATE INDEX IF NOT EXISTS idx_current_files_hash ON current_files(hash_id);

CREATE TABLE IF NOT EXISTS deleted_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    timestamp INTEGER,
    original_timestamp INTEGER,
    PRIMARY KEY (service_id, hash_id)
);

CREATE INDEX IF NOT EXISTS idx_deleted_files_hash ON deleted_files(hash_id);

CREATE TABLE IF NOT EXISTS pending_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, hash_id)
);

CREATE TABLE IF NOT EXISTS petitioned_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    reason_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, hash_id)
);

CREATE TABLE IF NOT EXISTS local_file_deletion_reasons (
    hash_id INTEGER PRIMARY KEY,
    reason_id INTEGER NOT NULL
);

-- File metadata
CREATE TABLE IF NOT EXISTS files_info (
    hash_id INTEGER PRIMARY KEY,
    size INTEGER NOT NULL,
    mime TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    duration_ms INTEGER,
    num_frames INTEGER,
    has_audio INTEGER NOT NULL DEFAULT 0,
    num_words INTEGER
);

CREATE TABLE IF NOT EXISTS file_inbox (
    hash_id INTEGER PRIMARY KEY
);

-- Physical file bookkeeping
CREATE TABLE IF NOT EXISTS similar_files_search_cache (
    hash_id INTEGER PRIMARY KEY,
    searched_distance INTEGER
);

CREATE TABLE IF NOT EXISTS file_maintenance_jobs (
    hash_id INTEGER NOT NULL,
    job_type INTEGER NOT NULL,
    time_can_start INTEGER NOT NULL,
    PRIMARY KEY (hash_id, job_type)
);

-- Ancillary file content
CREATE TABLE IF NOT EXISTS url_map (
    hash_id INTEGER NOT NULL,
    url_id INTEGER NOT NULL,
    PRIMARY KEY (hash_id, url_id)
);

CREATE INDEX IF NOT EXISTS idx_url_map_url ON url_map(url_id);

CREATE TABLE IF NOT EXISTS file_timestamps (
    hash_id INTEGER NOT NULL,
    timestamp_type INTEGER NOT NULL,
    location TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (hash_id, timestamp_type, location)
);

CREATE TABLE IF NOT EXISTS file_viewing_stats (
    hash_id INTEGER NOT NULL,
    canvas_type INTEGER NOT NULL,
    last_viewed_timestamp INTEGER,
    views INTEGER NOT NULL,
    viewtime_ms INTEGER NOT NULL,
    PRIMARY KEY (hash_id, canvas_type)
);

CREATE TABLE IF NOT EXISTS local_ratings (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    rating REAL NOT NULL,
    PRIMARY KEY (service_id, hash_id)
);

CREATE TABLE IF NOT EXISTS file_notes (
    hash_id INTEGER NOT NULL,
    name_id INTEGER NOT NULL,
    note_id INTEGER NOT NULL,
    PRIMARY KEY (hash_id, name_id)
);

CREATE TABLE IF NOT EXISTS service_directories (
    service_id INTEGER NOT NULL,
    directory_id INTEGER NOT NULL,
    num_files INTEGER NOT NULL,
    total_size INTEGER NOT NULL,
    note TEXT NOT NULL,
    PRIMARY KEY (service_id, directory_id)
);

CREATE TABLE IF NOT EXISTS service_directory_file_map (
    service_id INTEGER NOT NULL,
    directory_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, directory_id, hash_id)
);

-- Display edges
CREATE TABLE IF NOT EXISTS tag_siblings (
    service_id INTEGER NOT NULL,
    bad_tag_id INTEGER NOT NULL,
    good_tag_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    PRIMARY KEY (service_id, bad_tag_id, good_tag_id, status)
);

CREATE TABLE IF NOT EXISTS tag_sibling_petitions (
    service_id INTEGER NOT NULL,
    bad_tag_id INTEGER NOT NULL,
    good_tag_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    reason_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, bad_tag_id, good_tag_id, status)
);

CREATE TABLE IF NOT EXISTS tag_parents (
    service_id INTEGER NOT NULL,
    child_tag_id INTEGER NOT NULL,
    parent_tag_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    PRIMARY KEY (service_id, child_tag_id, parent_tag_id, status)
);

CREATE TABLE IF NOT EXISTS tag_parent_petitions (
    service_id INTEGER NOT NULL,
    child_tag_id INTEGER NOT NULL,
    parent_tag_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    reason_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, child_tag_id, parent_tag_id, status)
);

-- Which (file service, tag service) specific caches exist
CREATE TABLE IF NOT EXISTS mapping_cache_pairs (
    file_service_id INTEGER NOT NULL,
    tag_service_id INTEGER NOT NULL,
    PRIMARY KEY (file_service_id, tag_service_id)
);
"#;

/// Ensure the static schema exists.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
