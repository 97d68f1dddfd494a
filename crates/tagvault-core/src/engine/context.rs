//! Per-transaction write context.

use super::state::EngineState;
use crate::config::EngineOptions;
use crate::content::NotificationQueue;
use crate::display::TagDisplayGraph;
use crate::error::Result;
use crate::ids::{HashId, ServiceId, TextId};
use crate::master::IdentifierResolver;
use crate::services::{ServiceInfoDeltas, ServiceType};
use rusqlite::Connection;
use std::sync::Arc;

/// Everything a write needs while one transaction is open: the connection,
/// the writer's state, and the counter deltas and notifications gathered so
/// far.
pub(crate) struct WriteCtx<'a> {
    pub conn: &'a Connection,
    pub state: &'a mut EngineState,
    pub options: &'a EngineOptions,
    pub deltas: ServiceInfoDeltas,
    pub notifications: NotificationQueue,
    /// Unix seconds, fixed for the whole transaction.
    pub now: i64,
}

impl<'a> WriteCtx<'a> {
    pub fn new(conn: &'a Connection, state: &'a mut EngineState, options: &'a EngineOptions) -> Self {
        Self {
            conn,
            state,
            options,
            deltas: ServiceInfoDeltas::new(),
            notifications: NotificationQueue::new(),
            now: chrono::Utc::now().timestamp(),
        }
    }

    pub fn service_type(&self, service_id: ServiceId) -> Result<ServiceType> {
        Ok(self.state.services.require(service_id)?.service_type)
    }

    pub fn graph(&mut self, tag_service_id: ServiceId) -> Result<Arc<TagDisplayGraph>> {
        self.state.graph(self.conn, tag_service_id)
    }

    pub fn text_id(&self, text: &str) -> Result<TextId> {
        IdentifierResolver::get_text_id(self.conn, text)
    }

    /// Split ids into those a local delete may touch and those held back by
    /// the archived-file delete lock.
    pub fn split_delete_locked(
        &self,
        service_type: ServiceType,
        hash_ids: &[HashId],
    ) -> (Vec<HashId>, Vec<HashId>) {
        if !self.options.delete_lock_for_archived_files || !service_type.is_delete_locked_scope() {
            return (hash_ids.to_vec(), Vec::new());
        }
        hash_ids
            .iter()
            .copied()
            .partition(|id| self.state.inbox.contains(*id))
    }

    /// Write accumulated counter deltas and hand back the notifications.
    pub fn finish(mut self) -> Result<NotificationQueue> {
        self.deltas.flush(self.conn)?;
        Ok(self.notifications)
    }
}
