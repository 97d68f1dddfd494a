//! Identifier resolution: the lookup tables that reduce hashes, tags, texts
//! and URLs to integer ids.

pub mod hashes;
pub mod resolver;
pub mod tags;
pub mod urls;

pub use hashes::FileHash;
pub use resolver::IdentifierResolver;
pub use tags::{clean_tag, Tag, TagProblem};
pub use urls::{normalize_url, NormalizedUrl};
