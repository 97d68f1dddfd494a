//! Per tag service display graphs, built on demand from current edges.

use super::edges::{EdgeKind, EdgeStore};
use super::graph::TagDisplayGraph;
use crate::error::Result;
use crate::ids::{ServiceId, TagId};
use crate::mappings::{MappingDomain, SpecificPairs};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Cache of resolved display graphs keyed by tag service.
///
/// A graph is valid until an edge of its service changes; callers
/// invalidate it and the next lookup rebuilds from the edge tables.
#[derive(Debug, Clone, Default)]
pub struct DisplayGraphs {
    graphs: HashMap<ServiceId, Arc<TagDisplayGraph>>,
}

impl DisplayGraphs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The display graph of a tag service.
    pub fn graph(&mut self, conn: &Connection, tag_service_id: ServiceId) -> Result<Arc<TagDisplayGraph>> {
        if let Some(graph) = self.graphs.get(&tag_service_id) {
            return Ok(Arc::clone(graph));
        }
        let graph = Arc::new(load_graph(conn, tag_service_id)?);
        self.graphs.insert(tag_service_id, Arc::clone(&graph));
        Ok(graph)
    }

    pub fn invalidate(&mut self, tag_service_id: ServiceId) {
        self.graphs.remove(&tag_service_id);
    }

    pub fn clear(&mut self) {
        self.graphs.clear();
    }

    /// Rebuild display rows for every tag whose chain changed between `old`
    /// and `new`, in the combined domain and each specific cache of the
    /// service.
    ///
    /// The affected tags are the connected components, under both graphs,
    /// of every tag that appeared in a changed edge.
    pub fn regenerate_components(
        conn: &Connection,
        tag_service_id: ServiceId,
        old: &TagDisplayGraph,
        new: &TagDisplayGraph,
        touched: &BTreeSet<TagId>,
        pairs: &SpecificPairs,
    ) -> Result<BTreeSet<TagId>> {
        let mut affected = BTreeSet::new();
        for &tag_id in touched {
            affected.extend(old.component(tag_id));
            affected.extend(new.component(tag_id));
        }
        if affected.is_empty() {
            return Ok(affected);
        }

        MappingDomain::combined(tag_service_id).regenerate_display(conn, new, &affected)?;
        for file_service_id in pairs.file_services_for(tag_service_id) {
            MappingDomain::specific(file_service_id, tag_service_id).regenerate_display(
                conn,
                new,
                &affected,
            )?;
        }
        debug!(
            "Regenerated display for {} tags on tag service {}",
            affected.len(),
            tag_service_id
        );
        Ok(affected)
    }
}

/// Build a graph from the current sibling and parent edges of a service.
pub fn load_graph(conn: &Connection, tag_service_id: ServiceId) -> Result<TagDisplayGraph> {
    let siblings = EdgeStore::new(tag_service_id, EdgeKind::Sibling).current_pairs(conn)?;
    let parents = EdgeStore::new(tag_service_id, EdgeKind::Parent).current_pairs(conn)?;
    Ok(TagDisplayGraph::build(&siblings, &parents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ensure_schema;
    use crate::db::{CombinedTables, StorageTables};
    use crate::display::edges::EdgeAction;
    use crate::ids::HashId;
    use crate::services::ServiceInfoDeltas;

    const TAGS: ServiceId = ServiceId(4);

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        StorageTables::new(TAGS).create(&conn).unwrap();
        CombinedTables::new(TAGS).create(&conn).unwrap();
        conn
    }

    #[test]
    fn test_graph_is_cached_until_invalidated() {
        let conn = create_test_conn();
        let mut graphs = DisplayGraphs::new();
        let mut deltas = ServiceInfoDeltas::new();

        assert!(graphs.graph(&conn, TAGS).unwrap().is_empty());
        EdgeStore::new(TAGS, EdgeKind::Sibling)
            .apply(&conn, TagId(1), TagId(2), EdgeAction::Add, &mut deltas)
            .unwrap();
        assert!(graphs.graph(&conn, TAGS).unwrap().is_empty());

        graphs.invalidate(TAGS);
        assert_eq!(graphs.graph(&conn, TAGS).unwrap().ideal(TagId(1)), TagId(2));
    }

    #[test]
    fn test_regenerate_components_moves_display_to_new_ideal() {
        let conn = create_test_conn();
        let domain = MappingDomain::combined(TAGS);
        let old = TagDisplayGraph::default();
        domain.add_current(&conn, &old, TagId(1), &[HashId(9)], false).unwrap();

        let new = TagDisplayGraph::build(&[(TagId(1), TagId(2))], &[]);
        let affected = DisplayGraphs::regenerate_components(
            &conn,
            TAGS,
            &old,
            &new,
            &BTreeSet::from([TagId(1), TagId(2)]),
            &SpecificPairs::default(),
        )
        .unwrap();

        assert_eq!(affected, BTreeSet::from([TagId(1), TagId(2)]));
        assert!(domain.display_counts(&conn, TagId(1)).unwrap().is_zero());
        assert_eq!(domain.display_counts(&conn, TagId(2)).unwrap().current, 1);

        // removing the edge again restores the unchained view
        DisplayGraphs::regenerate_components(
            &conn,
            TAGS,
            &new,
            &old,
            &BTreeSet::from([TagId(1), TagId(2)]),
            &SpecificPairs::default(),
        )
        .unwrap();
        assert_eq!(domain.display_counts(&conn, TagId(1)).unwrap().current, 1);
        assert!(domain.display_counts(&conn, TagId(2)).unwrap().is_zero());
    }
}
