//! Names and DDL of the per-service mapping tables.

use crate::error::Result;
use crate::ids::ServiceId;
use rusqlite::Connection;

fn mapping_table_ddl(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            tag_id INTEGER NOT NULL,
            hash_id INTEGER NOT NULL,
            PRIMARY KEY (tag_id, hash_id)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS {name}_hash_id_tag_id_index ON {name} (hash_id, tag_id);"
    )
}

fn counts_table_ddl(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            tag_id INTEGER PRIMARY KEY,
            current_count INTEGER NOT NULL,
            pending_count INTEGER NOT NULL
        );"
    )
}

/// Storage truth for one tag service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTables {
    pub current: String,
    pub deleted: String,
    pub pending: String,
    pub petitioned: String,
}

impl StorageTables {
    pub fn new(tag_service_id: ServiceId) -> Self {
        let s = tag_service_id;
        Self {
            current: format!("current_mappings_{s}"),
            deleted: format!("deleted_mappings_{s}"),
            pending: format!("pending_mappings_{s}"),
            petitioned: format!("petitioned_mappings_{s}"),
        }
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&mapping_table_ddl(&self.current))?;
        conn.execute_batch(&mapping_table_ddl(&self.deleted))?;
        conn.execute_batch(&mapping_table_ddl(&self.pending))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                tag_id INTEGER NOT NULL,
                hash_id INTEGER NOT NULL,
                reason_id INTEGER NOT NULL,
                PRIMARY KEY (tag_id, hash_id)
            ) WITHOUT ROWID;
            CREATE INDEX IF NOT EXISTS {name}_hash_id_tag_id_index ON {name} (hash_id, tag_id);",
            name = self.petitioned
        ))?;
        Ok(())
    }

    pub fn drop(&self, conn: &Connection) -> Result<()> {
        for name in [&self.current, &self.deleted, &self.pending, &self.petitioned] {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
        }
        Ok(())
    }
}

/// Combined-files display cache and counts for one tag service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedTables {
    pub display_current: String,
    pub display_pending: String,
    pub storage_counts: String,
    pub display_counts: String,
}

impl CombinedTables {
    pub fn new(tag_service_id: ServiceId) -> Self {
        let s = tag_service_id;
        Self {
            display_current: format!("combined_files_display_current_mappings_{s}"),
            display_pending: format!("combined_files_display_pending_mappings_{s}"),
            storage_counts: format!("combined_files_ac_cache_{s}"),
            display_counts: format!("combined_files_display_ac_cache_{s}"),
        }
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&mapping_table_ddl(&self.display_current))?;
        conn.execute_batch(&mapping_table_ddl(&self.display_pending))?;
        conn.execute_batch(&counts_table_ddl(&self.storage_counts))?;
        conn.execute_batch(&counts_table_ddl(&self.display_counts))?;
        Ok(())
    }

    pub fn drop(&self, conn: &Connection) -> Result<()> {
        for name in [
            &self.display_current,
            &self.display_pending,
            &self.storage_counts,
            &self.display_counts,
        ] {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
        }
        Ok(())
    }
}

/// Specific storage and display caches for one (file service, tag service)
/// pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecificTables {
    pub current: String,
    pub deleted: String,
    pub pending: String,
    pub display_current: String,
    pub display_pending: String,
    pub storage_counts: String,
    pub display_counts: String,
}

impl SpecificTables {
    pub fn new(file_service_id: ServiceId, tag_service_id: ServiceId) -> Self {
        let (f, t) = (file_service_id, tag_service_id);
        Self {
            current: format!("specific_current_mappings_cache_{f}_{t}"),
            deleted: format!("specific_deleted_mappings_cache_{f}_{t}"),
            pending: format!("specific_pending_mappings_cache_{f}_{t}"),
            display_current: format!("specific_display_current_mappings_cache_{f}_{t}"),
            display_pending: format!("specific_display_pending_mappings_cache_{f}_{t}"),
            storage_counts: format!("specific_ac_cache_{f}_{t}"),
            display_counts: format!("specific_display_ac_cache_{f}_{t}"),
        }
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        for name in [
            &self.current,
            &self.deleted,
            &self.pending,
            &self.display_current,
            &self.display_pending,
        ] {
            conn.execute_batch(&mapping_table_ddl(name))?;
        }
        conn.execute_batch(&counts_table_ddl(&self.storage_counts))?;
        conn.execute_batch(&counts_table_ddl(&self.display_counts))?;
        Ok(())
    }

    pub fn drop(&self, conn: &Connection) -> Result<()> {
        for name in [
            &self.current,
            &self.deleted,
            &self.pending,
            &self.display_current,
            &self.display_pending,
            &self.storage_counts,
            &self.display_counts,
        ] {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::table_exists;

    #[test]
    fn test_specific_table_names_are_pair_scoped() {
        let a = SpecificTables::new(ServiceId(3), ServiceId(7));
        let b = SpecificTables::new(ServiceId(7), ServiceId(3));
        assert_eq!(a.current, "specific_current_mappings_cache_3_7");
        assert_ne!(a.current, b.current);
    }

    #[test]
    fn test_create_and_drop_storage_tables() {
        let conn = Connection::open_in_memory().unwrap();
        let tables = StorageTables::new(ServiceId(5));
        tables.create(&conn).unwrap();
        assert!(table_exists(&conn, "current_mappings_5").unwrap());
        assert!(table_exists(&conn, "petitioned_mappings_5").unwrap());

        tables.drop(&conn).unwrap();
        assert!(!table_exists(&conn, "current_mappings_5").unwrap());
    }
}
