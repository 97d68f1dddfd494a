//! SQLite plumbing: connection setup, static schema and the names of the
//! per-service tables.
//!
//! The static tables hold identifiers, services, file membership, edges and
//! counters. Mapping storage and every mapping cache live in per-service
//! tables whose names are generated in [`tables`], so a tag service or a
//! (file service, tag service) cache pair can be created and dropped as a
//! unit.

pub mod connection;
pub mod schema;
pub mod tables;

pub use connection::{configure_connection, open_connection};
pub use tables::{CombinedTables, SpecificTables, StorageTables};
