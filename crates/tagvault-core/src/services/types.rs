//! Service keys and service types.

use crate::error::{Result, TagVaultError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// External identity of a service. Stable across databases, unlike
/// `ServiceId`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey(Vec<u8>);

impl ServiceKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// A fresh random key for a user-created service.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    pub fn combined_local_file() -> Self {
        Self::new(b"all local files".to_vec())
    }

    pub fn combined_local_media() -> Self {
        Self::new(b"all local media".to_vec())
    }

    pub fn combined_deleted_file() -> Self {
        Self::new(b"all deleted files".to_vec())
    }

    pub fn trash() -> Self {
        Self::new(b"trash".to_vec())
    }

    pub fn local_update() -> Self {
        Self::new(b"repository updates".to_vec())
    }

    pub fn default_local_file() -> Self {
        Self::new(b"my files".to_vec())
    }

    pub fn default_local_tag() -> Self {
        Self::new(b"my tags".to_vec())
    }

    pub fn local_notes() -> Self {
        Self::new(b"notes".to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        hex::decode(text.trim())
            .map(Self)
            .map_err(|e| TagVaultError::Validation {
                field: "service_key".to_string(),
                message: format!("{}: {}", text, e),
            })
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic() || c == ' ') => {
                write!(f, "ServiceKey({:?})", text)
            }
            _ => write!(f, "ServiceKey({})", self.to_hex()),
        }
    }
}

impl Serialize for ServiceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ServiceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ServiceKey::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Every kind of service the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// A user-facing local file domain ("my files").
    LocalFileDomain,
    /// Repository update files.
    LocalUpdateDomain,
    /// Files removed from every local file domain but not yet purged.
    Trash,
    /// Union of all local file domains.
    CombinedLocalMedia,
    /// Union of everything stored on disk.
    CombinedLocalFile,
    /// Union of deletion records of the covered file services.
    CombinedDeletedFile,
    /// A remote file repository.
    FileRepository,
    LocalTag,
    TagRepository,
    LocalRating,
    LocalNotes,
}

impl ServiceType {
    pub fn to_db(self) -> i64 {
        match self {
            ServiceType::LocalFileDomain => 1,
            ServiceType::LocalUpdateDomain => 2,
            ServiceType::Trash => 3,
            ServiceType::CombinedLocalMedia => 4,
            ServiceType::CombinedLocalFile => 5,
            ServiceType::CombinedDeletedFile => 6,
            ServiceType::FileRepository => 7,
            ServiceType::LocalTag => 10,
            ServiceType::TagRepository => 11,
            ServiceType::LocalRating => 20,
            ServiceType::LocalNotes => 21,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            1 => Some(ServiceType::LocalFileDomain),
            2 => Some(ServiceType::LocalUpdateDomain),
            3 => Some(ServiceType::Trash),
            4 => Some(ServiceType::CombinedLocalMedia),
            5 => Some(ServiceType::CombinedLocalFile),
            6 => Some(ServiceType::CombinedDeletedFile),
            7 => Some(ServiceType::FileRepository),
            10 => Some(ServiceType::LocalTag),
            11 => Some(ServiceType::TagRepository),
            20 => Some(ServiceType::LocalRating),
            21 => Some(ServiceType::LocalNotes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::LocalFileDomain => "local file domain",
            ServiceType::LocalUpdateDomain => "local update domain",
            ServiceType::Trash => "trash",
            ServiceType::CombinedLocalMedia => "combined local media",
            ServiceType::CombinedLocalFile => "combined local file",
            ServiceType::CombinedDeletedFile => "combined deleted file",
            ServiceType::FileRepository => "file repository",
            ServiceType::LocalTag => "local tag",
            ServiceType::TagRepository => "tag repository",
            ServiceType::LocalRating => "local rating",
            ServiceType::LocalNotes => "local notes",
        }
    }

    pub fn is_file_service(self) -> bool {
        matches!(
            self,
            ServiceType::LocalFileDomain
                | ServiceType::LocalUpdateDomain
                | ServiceType::Trash
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
                | ServiceType::CombinedDeletedFile
                | ServiceType::FileRepository
        )
    }

    pub fn is_tag_service(self) -> bool {
        matches!(self, ServiceType::LocalTag | ServiceType::TagRepository)
    }

    /// Derived services whose membership only the engine edits.
    pub fn is_umbrella(self) -> bool {
        matches!(
            self,
            ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
                | ServiceType::CombinedDeletedFile
        )
    }

    /// Services that exist exactly once and are created at initialization.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            ServiceType::LocalUpdateDomain
                | ServiceType::Trash
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
                | ServiceType::CombinedDeletedFile
                | ServiceType::LocalNotes
        )
    }

    /// File services that hold files on this machine.
    pub fn is_local_file_service(self) -> bool {
        matches!(
            self,
            ServiceType::LocalFileDomain
                | ServiceType::LocalUpdateDomain
                | ServiceType::Trash
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
        )
    }

    /// Services whose file population gets specific mapping caches.
    pub fn has_specific_mapping_cache(self) -> bool {
        matches!(
            self,
            ServiceType::LocalFileDomain
                | ServiceType::Trash
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
                | ServiceType::FileRepository
        )
    }

    /// Deleting from these writes no deletion record.
    pub fn has_no_delete_record(self) -> bool {
        matches!(self, ServiceType::Trash | ServiceType::CombinedDeletedFile)
    }

    /// Deletion records on these services make a file a member of the
    /// combined deleted file service.
    pub fn counts_toward_combined_deleted(self) -> bool {
        matches!(
            self,
            ServiceType::LocalFileDomain
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
                | ServiceType::FileRepository
        )
    }

    /// Services whose deletes are subject to the archived-file delete lock.
    pub fn is_delete_locked_scope(self) -> bool {
        matches!(
            self,
            ServiceType::LocalFileDomain
                | ServiceType::CombinedLocalMedia
                | ServiceType::CombinedLocalFile
        )
    }

    pub fn is_repository(self) -> bool {
        matches!(self, ServiceType::FileRepository | ServiceType::TagRepository)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_db_roundtrip() {
        for t in [
            ServiceType::LocalFileDomain,
            ServiceType::LocalUpdateDomain,
            ServiceType::Trash,
            ServiceType::CombinedLocalMedia,
            ServiceType::CombinedLocalFile,
            ServiceType::CombinedDeletedFile,
            ServiceType::FileRepository,
            ServiceType::LocalTag,
            ServiceType::TagRepository,
            ServiceType::LocalRating,
            ServiceType::LocalNotes,
        ] {
            assert_eq!(ServiceType::from_db(t.to_db()), Some(t));
        }
        assert_eq!(ServiceType::from_db(999), None);
    }

    #[test]
    fn test_no_delete_record_services_do_not_feed_combined_deleted() {
        assert!(ServiceType::Trash.has_no_delete_record());
        assert!(!ServiceType::Trash.counts_toward_combined_deleted());
        assert!(!ServiceType::CombinedDeletedFile.counts_toward_combined_deleted());
    }

    #[test]
    fn test_service_key_hex_roundtrip() {
        let key = ServiceKey::generate();
        assert_eq!(ServiceKey::from_hex(&key.to_hex()).unwrap(), key);
        assert_eq!(format!("{:?}", ServiceKey::trash()), "ServiceKey(\"trash\")");
    }
}
