//! Tag mappings: storage truth, the combined and specific caches layered on
//! top of it, and the update algorithm that keeps them consistent.

pub mod counts;
pub mod domain;
pub mod specific;
pub mod storage;
pub mod update;

pub use counts::TagCounts;
pub use domain::{DomainScope, MappingDomain};
pub use specific::SpecificPairs;
pub use update::{
    update_mappings, BucketAction, FilteredHashes, MappingBuckets, MappingUpdate,
    MappingUpdateReport,
};
