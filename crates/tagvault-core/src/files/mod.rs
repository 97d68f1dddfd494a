//! Files: per-service membership, metadata behind the service counters,
//! physical-file bookkeeping and the membership cascade.

pub mod cascade;
pub mod maintenance;
pub mod metadata;
pub mod storage;
pub mod timestamps;

pub use cascade::FileRow;
pub use maintenance::MaintenanceJob;
pub use metadata::{FileInfo, InboxSet};
pub use storage::DeletionRecord;
pub use timestamps::TimestampKind;
