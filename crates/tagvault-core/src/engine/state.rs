//! In-memory state owned by the writer.
//!
//! Everything here mirrors rows in the database and is rebuilt from them
//! whenever a transaction rolls back.

use crate::display::{DisplayGraphs, TagDisplayGraph};
use crate::error::Result;
use crate::files::metadata::InboxSet;
use crate::ids::ServiceId;
use crate::mappings::SpecificPairs;
use crate::master::IdentifierResolver;
use crate::services::{ServiceRegistry, UmbrellaIds};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::debug;

pub struct EngineState {
    pub services: ServiceRegistry,
    pub umbrella: UmbrellaIds,
    pub resolver: IdentifierResolver,
    pub inbox: InboxSet,
    pub display: DisplayGraphs,
    pub pairs: SpecificPairs,
}

impl EngineState {
    pub fn load(conn: &Connection) -> Result<Self> {
        let services = ServiceRegistry::load(conn)?;
        let umbrella = services.umbrella_ids()?;
        let state = Self {
            services,
            umbrella,
            resolver: IdentifierResolver::new(),
            inbox: InboxSet::load(conn)?,
            display: DisplayGraphs::new(),
            pairs: SpecificPairs::load(conn)?,
        };
        debug!(
            "Loaded engine state: {} services, {} inbox files, {} specific caches",
            state.services.len(),
            state.inbox.len(),
            state.pairs.len()
        );
        Ok(state)
    }

    /// Rebuild everything from the database, dropping cached identifiers.
    pub fn reload(&mut self, conn: &Connection) -> Result<()> {
        self.resolver.clear_cache();
        let resolver = self.resolver.clone();
        *self = Self::load(conn)?;
        self.resolver = resolver;
        Ok(())
    }

    pub fn graph(&mut self, conn: &Connection, tag_service_id: ServiceId) -> Result<Arc<TagDisplayGraph>> {
        self.display.graph(conn, tag_service_id)
    }
}
