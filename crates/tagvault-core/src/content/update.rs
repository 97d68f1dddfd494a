//! The closed set of content updates a package can carry.
//!
//! Serialized adjacently tagged (`data_type` / `update`), with each inner
//! enum tagged by `action`:
//!
//! ```json
//! {"data_type": "mappings", "update": {"action": "add", "tag": "character:samus", "hashes": ["…"]}}
//! ```

use crate::files::metadata::FileInfo;
use crate::files::timestamps::TimestampKind;
use crate::master::FileHash;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "update", rename_all = "snake_case")]
pub enum ContentUpdate {
    Files(FilesUpdate),
    Directories(DirectoriesUpdate),
    Urls(UrlsUpdate),
    Timestamp(TimestampUpdate),
    FileViewingStats(ViewingStatsUpdate),
    Mappings(MappingsUpdate),
    TagSiblings(TagPairUpdate),
    TagParents(TagPairUpdate),
    Ratings(RatingsUpdate),
    Notes(NotesUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FilesUpdate {
    Add {
        files: Vec<FileInfo>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Delete {
        hashes: Vec<FileHash>,
        #[serde(default)]
        reason: Option<String>,
    },
    Undelete {
        hashes: Vec<FileHash>,
    },
    Pend {
        hashes: Vec<FileHash>,
    },
    RescindPend {
        hashes: Vec<FileHash>,
    },
    Petition {
        hashes: Vec<FileHash>,
        reason: String,
    },
    RescindPetition {
        hashes: Vec<FileHash>,
    },
    Archive {
        hashes: Vec<FileHash>,
    },
    Inbox {
        hashes: Vec<FileHash>,
    },
    ClearDeleteRecord {
        hashes: Vec<FileHash>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DirectoriesUpdate {
    Set {
        directory: String,
        hashes: Vec<FileHash>,
        #[serde(default)]
        note: String,
    },
    Delete {
        directory: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UrlsUpdate {
    Add { urls: Vec<String>, hashes: Vec<FileHash> },
    Delete { urls: Vec<String>, hashes: Vec<FileHash> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TimestampUpdate {
    Set {
        hashes: Vec<FileHash>,
        kind: TimestampKind,
        timestamp: i64,
    },
    Clear {
        hashes: Vec<FileHash>,
        kind: TimestampKind,
    },
}

/// Where a file was viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasType {
    MediaViewer,
    Preview,
    ClientApi,
}

impl CanvasType {
    pub fn to_db(self) -> i64 {
        match self {
            CanvasType::MediaViewer => 0,
            CanvasType::Preview => 1,
            CanvasType::ClientApi => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewingStatsUpdate {
    /// Add to the running totals.
    Add {
        hash: FileHash,
        canvas: CanvasType,
        views: i64,
        viewtime_ms: i64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Overwrite the totals.
    Set {
        hash: FileHash,
        canvas: CanvasType,
        views: i64,
        viewtime_ms: i64,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Delete {
        hashes: Vec<FileHash>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MappingsUpdate {
    Add { tag: String, hashes: Vec<FileHash> },
    Delete { tag: String, hashes: Vec<FileHash> },
    Pend { tag: String, hashes: Vec<FileHash> },
    RescindPend { tag: String, hashes: Vec<FileHash> },
    Petition { tag: String, hashes: Vec<FileHash>, reason: String },
    RescindPetition { tag: String, hashes: Vec<FileHash> },
    ClearDeleteRecord { tag: String, hashes: Vec<FileHash> },
}

impl MappingsUpdate {
    pub fn tag(&self) -> &str {
        match self {
            MappingsUpdate::Add { tag, .. }
            | MappingsUpdate::Delete { tag, .. }
            | MappingsUpdate::Pend { tag, .. }
            | MappingsUpdate::RescindPend { tag, .. }
            | MappingsUpdate::Petition { tag, .. }
            | MappingsUpdate::RescindPetition { tag, .. }
            | MappingsUpdate::ClearDeleteRecord { tag, .. } => tag,
        }
    }

    pub fn hashes(&self) -> &[FileHash] {
        match self {
            MappingsUpdate::Add { hashes, .. }
            | MappingsUpdate::Delete { hashes, .. }
            | MappingsUpdate::Pend { hashes, .. }
            | MappingsUpdate::RescindPend { hashes, .. }
            | MappingsUpdate::Petition { hashes, .. }
            | MappingsUpdate::RescindPetition { hashes, .. }
            | MappingsUpdate::ClearDeleteRecord { hashes, .. } => hashes,
        }
    }

    /// The same update with the tag replaced.
    pub fn with_tag(&self, new_tag: String) -> Self {
        let mut update = self.clone();
        match &mut update {
            MappingsUpdate::Add { tag, .. }
            | MappingsUpdate::Delete { tag, .. }
            | MappingsUpdate::Pend { tag, .. }
            | MappingsUpdate::RescindPend { tag, .. }
            | MappingsUpdate::Petition { tag, .. }
            | MappingsUpdate::RescindPetition { tag, .. }
            | MappingsUpdate::ClearDeleteRecord { tag, .. } => *tag = new_tag,
        }
        update
    }

    /// Whether this edit only makes sense on a repository.
    pub fn is_repository_only(&self) -> bool {
        matches!(
            self,
            MappingsUpdate::Pend { .. }
                | MappingsUpdate::RescindPend { .. }
                | MappingsUpdate::Petition { .. }
                | MappingsUpdate::RescindPetition { .. }
        )
    }
}

/// Sibling (bad → good) or parent (child → parent) edge edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TagPairUpdate {
    Add { from: String, to: String },
    Delete { from: String, to: String },
    Pend { from: String, to: String, reason: String },
    RescindPend { from: String, to: String },
    Petition { from: String, to: String, reason: String },
    RescindPetition { from: String, to: String },
}

impl TagPairUpdate {
    pub fn pair(&self) -> (&str, &str) {
        match self {
            TagPairUpdate::Add { from, to }
            | TagPairUpdate::Delete { from, to }
            | TagPairUpdate::Pend { from, to, .. }
            | TagPairUpdate::RescindPend { from, to }
            | TagPairUpdate::Petition { from, to, .. }
            | TagPairUpdate::RescindPetition { from, to } => (from, to),
        }
    }

    /// The same update with both tags replaced.
    pub fn with_pair(&self, new_from: String, new_to: String) -> Self {
        let mut update = self.clone();
        match &mut update {
            TagPairUpdate::Add { from, to }
            | TagPairUpdate::Delete { from, to }
            | TagPairUpdate::Pend { from, to, .. }
            | TagPairUpdate::RescindPend { from, to }
            | TagPairUpdate::Petition { from, to, .. }
            | TagPairUpdate::RescindPetition { from, to } => {
                *from = new_from;
                *to = new_to;
            }
        }
        update
    }

    pub fn is_repository_only(&self) -> bool {
        matches!(
            self,
            TagPairUpdate::Pend { .. }
                | TagPairUpdate::RescindPend { .. }
                | TagPairUpdate::Petition { .. }
                | TagPairUpdate::RescindPetition { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RatingsUpdate {
    /// Set a rating in [0, 1], or clear it with `None`.
    Set {
        rating: Option<f64>,
        hashes: Vec<FileHash>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NotesUpdate {
    Set {
        hash: FileHash,
        name: String,
        note: String,
    },
    Delete {
        hash: FileHash,
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_update_json_shape() {
        let hash = FileHash::of_content(b"samus");
        let update = ContentUpdate::Mappings(MappingsUpdate::Add {
            tag: "character:samus".into(),
            hashes: vec![hash],
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["data_type"], "mappings");
        assert_eq!(json["update"]["action"], "add");
        assert_eq!(json["update"]["tag"], "character:samus");

        let back: ContentUpdate = serde_json::from_value(json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn test_with_tag_keeps_action() {
        let update = MappingsUpdate::Petition {
            tag: "Samus ".into(),
            hashes: vec![],
            reason: "wrong".into(),
        };
        let fixed = update.with_tag("samus".into());
        assert_eq!(fixed.tag(), "samus");
        assert!(matches!(fixed, MappingsUpdate::Petition { ref reason, .. } if reason == "wrong"));
        assert!(fixed.is_repository_only());
    }

    #[test]
    fn test_files_add_defaults() {
        let hash = FileHash::of_content(b"x");
        let json = serde_json::json!({
            "data_type": "files",
            "update": {
                "action": "add",
                "files": [{"hash": hash.to_hex(), "size": 10, "mime": "image/png"}]
            }
        });
        let update: ContentUpdate = serde_json::from_value(json).unwrap();
        match update {
            ContentUpdate::Files(FilesUpdate::Add { files, timestamp }) => {
                assert_eq!(files.len(), 1);
                assert_eq!(timestamp, None);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }
}
