//! Surrogate integer ids used throughout the database.
//!
//! Each id is a thin newtype over the SQLite rowid so a tag id can never be
//! passed where a hash id is expected.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

surrogate_id!(
    /// Row id of a file hash in the `hashes` table.
    HashId
);
surrogate_id!(
    /// Row id of a (namespace, subtag) pair in the `tags` table.
    TagId
);
surrogate_id!(
    /// Row id of a free text (reasons, note names, note bodies).
    TextId
);
surrogate_id!(
    /// Row id of a normalized URL.
    UrlId
);
surrogate_id!(
    /// Row id of a service in the `services` table.
    ServiceId
);

/// Render ids as a comma separated list for `IN (...)` clauses.
///
/// Ids are integers, so inlining them is safe and avoids SQLite's bound
/// parameter limit on large batches.
pub(crate) fn id_list<I, T>(ids: I) -> String
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    let mut out = String::new();
    for (i, id) in ids.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&id.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list_formatting() {
        assert_eq!(id_list([HashId(1), HashId(22), HashId(3)]), "1,22,3");
        assert_eq!(id_list(Vec::<TagId>::new()), "");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&TagId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
