//! The four-status lifecycle shared by files, mappings and display edges.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Current,
    Pending,
    Deleted,
    Petitioned,
}

impl ContentStatus {
    pub fn to_db(self) -> i64 {
        match self {
            ContentStatus::Current => 0,
            ContentStatus::Pending => 1,
            ContentStatus::Deleted => 2,
            ContentStatus::Petitioned => 3,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            0 => Some(ContentStatus::Current),
            1 => Some(ContentStatus::Pending),
            2 => Some(ContentStatus::Deleted),
            3 => Some(ContentStatus::Petitioned),
            _ => None,
        }
    }
}
