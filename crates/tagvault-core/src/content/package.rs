//! Packages of content updates and the report returned after applying one.

use super::update::ContentUpdate;
use crate::master::{FileHash, Tag, TagProblem};
use crate::services::{ServiceKey, ServiceType};
use serde::{Deserialize, Serialize};

/// One content update addressed to one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceContentUpdate {
    pub service_key: ServiceKey,
    pub update: ContentUpdate,
}

/// An ordered list of content updates applied as one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentUpdatePackage {
    pub updates: Vec<ServiceContentUpdate>,
}

impl ContentUpdatePackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, service_key: ServiceKey, update: ContentUpdate) {
        self.updates.push(ServiceContentUpdate {
            service_key,
            update,
        });
    }

    /// Builder form of [`Self::push`].
    pub fn with(mut self, service_key: ServiceKey, update: ContentUpdate) -> Self {
        self.push(service_key, update);
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceContentUpdate> {
        self.updates.iter()
    }
}

/// Why an item of a package was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    UnknownService,
    WrongServiceType { service_type: ServiceType },
    /// Umbrella memberships are derived and cannot be edited directly.
    UmbrellaService,
    BadTag { tag: String, problem: TagProblem },
    InvalidUrl { url: String },
    Validation { message: String },
}

/// What happened to one item of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ItemOutcome {
    Applied,
    Skipped(SkipReason),
    /// Applied after normalization changed the item; carries what was
    /// actually applied.
    Substituted(ContentUpdate),
}

impl ItemOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, ItemOutcome::Skipped(_))
    }
}

/// Events for collaborators outside the engine, emitted after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// Pending or petitioned content for a repository changed.
    NewPending,
    /// Files were queued for download.
    NewDownloads,
    /// Display rows were rebuilt after an edge change.
    TagDisplayApplicationChanged,
    SiblingsChanged { service_key: ServiceKey, tags: Vec<Tag> },
    ParentsChanged { service_key: ServiceKey, tags: Vec<Tag> },
    /// Repository update files arrived in the local update domain.
    UpdatesImported,
    /// Files left the combined local file service; their blobs can go.
    FilesPhysicallyDeleted { hashes: Vec<FileHash> },
}

/// Notifications collected during a package, each kept once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationQueue {
    queued: Vec<Notification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        if !self.queued.contains(&notification) {
            self.queued.push(notification);
        }
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn into_vec(self) -> Vec<Notification> {
        self.queued
    }
}

/// Report returned for an applied package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedPackage {
    /// One outcome per package item, in package order.
    pub outcomes: Vec<ItemOutcome>,
    /// Files held back from local deletes by the archived-file delete lock.
    pub delete_locked: Vec<FileHash>,
    pub notifications: Vec<Notification>,
}

impl AppliedPackage {
    pub fn applied_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (usize, &SkipReason)> {
        self.outcomes.iter().enumerate().filter_map(|(i, o)| match o {
            ItemOutcome::Skipped(reason) => Some((i, reason)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_queue_dedups() {
        let mut queue = NotificationQueue::new();
        queue.push(Notification::NewPending);
        queue.push(Notification::NewDownloads);
        queue.push(Notification::NewPending);
        assert_eq!(
            queue.into_vec(),
            vec![Notification::NewPending, Notification::NewDownloads]
        );
    }

    #[test]
    fn test_skip_reason_json() {
        let reason = SkipReason::BadTag {
            tag: "   ".into(),
            problem: TagProblem::Empty,
        };
        let json = serde_json::to_value(ItemOutcome::Skipped(reason)).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["detail"]["reason"], "bad_tag");
        assert_eq!(json["detail"]["problem"]["problem"], "empty");
    }
}
