//! Content updates: the package format callers submit, the per-item
//! classification and application, and the report handed back.

pub mod ancillary;
pub(crate) mod orchestrator;
pub mod package;
pub mod update;

pub use ancillary::ViewingStats;
pub use package::{
    AppliedPackage, ContentUpdatePackage, ItemOutcome, Notification, NotificationQueue,
    ServiceContentUpdate, SkipReason,
};
pub use update::{
    CanvasType, ContentUpdate, DirectoriesUpdate, FilesUpdate, MappingsUpdate, NotesUpdate,
    RatingsUpdate, TagPairUpdate, TimestampUpdate, UrlsUpdate, ViewingStatsUpdate,
};
