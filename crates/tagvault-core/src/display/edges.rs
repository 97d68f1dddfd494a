//! Sibling and parent edge storage.
//!
//! Current and deleted edges live in `tag_siblings` / `tag_parents`;
//! pending and petitioned edges live in the matching petitions table with a
//! reason. Only current edges feed display resolution.

use crate::error::Result;
use crate::ids::{ServiceId, TagId, TextId};
use crate::services::{ServiceInfoDeltas, ServiceInfoKind};
use crate::status::ContentStatus;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// bad → good
    Sibling,
    /// child → parent
    Parent,
}

impl EdgeKind {
    fn table(self) -> &'static str {
        match self {
            EdgeKind::Sibling => "tag_siblings",
            EdgeKind::Parent => "tag_parents",
        }
    }

    fn petitions_table(self) -> &'static str {
        match self {
            EdgeKind::Sibling => "tag_sibling_petitions",
            EdgeKind::Parent => "tag_parent_petitions",
        }
    }

    fn columns(self) -> (&'static str, &'static str) {
        match self {
            EdgeKind::Sibling => ("bad_tag_id", "good_tag_id"),
            EdgeKind::Parent => ("child_tag_id", "parent_tag_id"),
        }
    }

    fn table_for(self, status: ContentStatus) -> &'static str {
        match status {
            ContentStatus::Current | ContentStatus::Deleted => self.table(),
            ContentStatus::Pending | ContentStatus::Petitioned => self.petitions_table(),
        }
    }

    fn pending_kind(self) -> ServiceInfoKind {
        match self {
            EdgeKind::Sibling => ServiceInfoKind::NumPendingTagSiblings,
            EdgeKind::Parent => ServiceInfoKind::NumPendingTagParents,
        }
    }

    fn petitioned_kind(self) -> ServiceInfoKind {
        match self {
            EdgeKind::Sibling => ServiceInfoKind::NumPetitionedTagSiblings,
            EdgeKind::Parent => ServiceInfoKind::NumPetitionedTagParents,
        }
    }
}

/// Action applied to one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    Add,
    Delete,
    Pend(TextId),
    RescindPend,
    Petition(TextId),
    RescindPetition,
}

/// Storage for the sibling or parent edges of one tag service.
#[derive(Debug, Clone, Copy)]
pub struct EdgeStore {
    pub service_id: ServiceId,
    pub kind: EdgeKind,
}

impl EdgeStore {
    pub fn new(service_id: ServiceId, kind: EdgeKind) -> Self {
        Self { service_id, kind }
    }

    pub fn has(
        &self,
        conn: &Connection,
        from: TagId,
        to: TagId,
        status: ContentStatus,
    ) -> Result<bool> {
        let (a, b) = self.kind.columns();
        let exists = conn.query_row(
            &format!(
                "SELECT EXISTS (SELECT 1 FROM {} WHERE service_id = ?1
                 AND {a} = ?2 AND {b} = ?3 AND status = ?4)",
                self.kind.table_for(status)
            ),
            params![self.service_id, from, to, status.to_db()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn insert(
        &self,
        conn: &Connection,
        from: TagId,
        to: TagId,
        status: ContentStatus,
        reason: Option<TextId>,
    ) -> Result<bool> {
        let (a, b) = self.kind.columns();
        let changed = match reason {
            Some(reason_id) => conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (service_id, {a}, {b}, status, reason_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.kind.petitions_table()
                ),
                params![self.service_id, from, to, status.to_db(), reason_id],
            )?,
            None => conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (service_id, {a}, {b}, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    self.kind.table()
                ),
                params![self.service_id, from, to, status.to_db()],
            )?,
        };
        Ok(changed > 0)
    }

    fn remove(
        &self,
        conn: &Connection,
        from: TagId,
        to: TagId,
        status: ContentStatus,
    ) -> Result<bool> {
        let (a, b) = self.kind.columns();
        let changed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE service_id = ?1 AND {a} = ?2 AND {b} = ?3 AND status = ?4",
                self.kind.table_for(status)
            ),
            params![self.service_id, from, to, status.to_db()],
        )?;
        Ok(changed > 0)
    }

    /// Apply one action. When the returned change has `current` set, display
    /// resolution for the service has to be redone.
    pub fn apply(
        &self,
        conn: &Connection,
        from: TagId,
        to: TagId,
        action: EdgeAction,
        deltas: &mut ServiceInfoDeltas,
    ) -> Result<EdgeChange> {
        let pending_kind = self.kind.pending_kind();
        let petitioned_kind = self.kind.petitioned_kind();
        let mut change = EdgeChange::default();

        match action {
            EdgeAction::Add => {
                if self.remove(conn, from, to, ContentStatus::Pending)? {
                    deltas.add(self.service_id, pending_kind, -1);
                    change.pending = true;
                }
                self.remove(conn, from, to, ContentStatus::Deleted)?;
                change.current = self.insert(conn, from, to, ContentStatus::Current, None)?;
            }
            EdgeAction::Delete => {
                if self.remove(conn, from, to, ContentStatus::Petitioned)? {
                    deltas.add(self.service_id, petitioned_kind, -1);
                    change.pending = true;
                }
                change.current = self.remove(conn, from, to, ContentStatus::Current)?;
                self.insert(conn, from, to, ContentStatus::Deleted, None)?;
            }
            EdgeAction::Pend(reason_id) => {
                if !self.has(conn, from, to, ContentStatus::Current)?
                    && self.insert(conn, from, to, ContentStatus::Pending, Some(reason_id))?
                {
                    deltas.add(self.service_id, pending_kind, 1);
                    change.pending = true;
                }
            }
            EdgeAction::RescindPend => {
                if self.remove(conn, from, to, ContentStatus::Pending)? {
                    deltas.add(self.service_id, pending_kind, -1);
                    change.pending = true;
                }
            }
            EdgeAction::Petition(reason_id) => {
                if self.has(conn, from, to, ContentStatus::Current)?
                    && self.insert(conn, from, to, ContentStatus::Petitioned, Some(reason_id))?
                {
                    deltas.add(self.service_id, petitioned_kind, 1);
                    change.pending = true;
                }
            }
            EdgeAction::RescindPetition => {
                if self.remove(conn, from, to, ContentStatus::Petitioned)? {
                    deltas.add(self.service_id, petitioned_kind, -1);
                    change.pending = true;
                }
            }
        }
        Ok(change)
    }

    /// Every edge with the given status, in (from, to) order.
    pub fn pairs(&self, conn: &Connection, status: ContentStatus) -> Result<Vec<(TagId, TagId)>> {
        let (a, b) = self.kind.columns();
        let mut stmt = conn.prepare(&format!(
            "SELECT {a}, {b} FROM {} WHERE service_id = ?1 AND status = ?2 ORDER BY {a}, {b}",
            self.kind.table_for(status)
        ))?;
        let pairs = stmt
            .query_map(params![self.service_id, status.to_db()], |row| {
                Ok((row.get::<_, TagId>(0)?, row.get::<_, TagId>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    pub fn current_pairs(&self, conn: &Connection) -> Result<Vec<(TagId, TagId)>> {
        self.pairs(conn, ContentStatus::Current)
    }
}

/// What an edge action changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeChange {
    /// The current edge set changed.
    pub current: bool,
    /// Pending or petitioned edges changed.
    pub pending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_add_clears_pending_and_counts() {
        let conn = create_test_conn();
        let store = EdgeStore::new(ServiceId(4), EdgeKind::Sibling);
        let mut deltas = ServiceInfoDeltas::new();

        let pend = store
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Pend(TextId(1)), &mut deltas)
            .unwrap();
        assert!(pend.pending && !pend.current);
        assert_eq!(deltas.get(ServiceId(4), ServiceInfoKind::NumPendingTagSiblings), 1);

        let add = store
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Add, &mut deltas)
            .unwrap();
        assert!(add.current);
        assert_eq!(deltas.get(ServiceId(4), ServiceInfoKind::NumPendingTagSiblings), 0);
        assert_eq!(store.current_pairs(&conn).unwrap(), vec![(TagId(1), TagId(2))]);
        assert!(store.pairs(&conn, ContentStatus::Pending).unwrap().is_empty());
    }

    #[test]
    fn test_petition_requires_current_edge() {
        let conn = create_test_conn();
        let store = EdgeStore::new(ServiceId(4), EdgeKind::Parent);
        let mut deltas = ServiceInfoDeltas::new();

        let petition = store
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Petition(TextId(1)), &mut deltas)
            .unwrap();
        assert_eq!(petition, EdgeChange::default());

        store.apply(&conn, TagId(1), TagId(2), EdgeAction::Add, &mut deltas).unwrap();
        store
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Petition(TextId(1)), &mut deltas)
            .unwrap();
        assert_eq!(deltas.get(ServiceId(4), ServiceInfoKind::NumPetitionedTagParents), 1);

        let delete = store
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Delete, &mut deltas)
            .unwrap();
        assert!(delete.current);
        assert_eq!(deltas.get(ServiceId(4), ServiceInfoKind::NumPetitionedTagParents), 0);
        assert!(store.has(&conn, TagId(1), TagId(2), ContentStatus::Deleted).unwrap());
        assert!(store.current_pairs(&conn).unwrap().is_empty());
    }
}
