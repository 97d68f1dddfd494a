//! TagVault Core - content-update and tag-mapping consistency engine for a
//! personal media library.
//!
//! Files live in file services and are tagged through independent tag
//! services. Callers describe edits as a [`ContentUpdatePackage`]; the
//! engine applies each package in one transaction and keeps file
//! membership, mapping caches, sibling and parent display, autocomplete
//! counts and service counters consistent with each other.
//!
//! # Example
//!
//! ```rust,ignore
//! use tagvault_core::{ContentUpdate, ContentUpdatePackage, MappingsUpdate, ServiceKey, TagVault};
//!
//! #[tokio::main]
//! async fn main() -> tagvault_core::Result<()> {
//!     let vault = TagVault::builder("/path/to/library")
//!         .auto_create_dirs(true)
//!         .build()
//!         .await?;
//!
//!     let package = ContentUpdatePackage::new().with(
//!         ServiceKey::default_local_tag(),
//!         ContentUpdate::Mappings(MappingsUpdate::Add {
//!             tag: "character:samus aran".into(),
//!             hashes: vec![hash],
//!         }),
//!     );
//!     let applied = vault.apply(package).await?;
//!     println!("Applied {} items", applied.applied_count());
//!
//!     vault.shutdown().await
//! }
//! ```

pub mod config;
pub mod content;
pub mod db;
pub mod display;
pub mod engine;
pub mod error;
pub mod files;
pub mod ids;
pub mod integrity;
pub mod mappings;
pub mod master;
pub mod reader;
pub mod services;
pub mod status;
pub mod writer;

// Re-export commonly used types
pub use config::EngineOptions;
pub use content::{
    AppliedPackage, ContentUpdate, ContentUpdatePackage, FilesUpdate, ItemOutcome, MappingsUpdate,
    Notification, SkipReason, TagPairUpdate,
};
pub use engine::Engine;
pub use error::{Result, TagVaultError};
pub use files::{FileInfo, MaintenanceJob, TimestampKind};
pub use ids::{HashId, ServiceId, TagId};
pub use integrity::{IntegrityProblem, IntegrityReport};
pub use mappings::TagCounts;
pub use master::{FileHash, Tag};
pub use reader::{FileLocation, LibraryReader, TagDisplayType, TagSearchResult};
pub use services::{Service, ServiceInfoKind, ServiceKey, ServiceType};
pub use status::ContentStatus;
pub use writer::{WriterHandle, WriterThread};

use config::PathsConfig;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::info;

/// A library opened on disk: one writer thread plus read-only readers on
/// demand.
pub struct TagVault {
    root: PathBuf,
    db_path: PathBuf,
    writer: WriterHandle,
    writer_thread: WriterThread,
}

impl TagVault {
    /// Create a builder for a library rooted at `root`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let vault = TagVault::builder("./library")
    ///     .auto_create_dirs(true)
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder(root: impl Into<PathBuf>) -> TagVaultBuilder {
        TagVaultBuilder::new(root)
    }

    /// Open an existing library with the options stored next to it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).build().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// A fresh read-only connection to the library.
    pub fn reader(&self) -> Result<LibraryReader> {
        LibraryReader::open(&self.db_path)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.writer.subscribe()
    }

    pub async fn apply(&self, package: ContentUpdatePackage) -> Result<AppliedPackage> {
        self.writer.apply(package).await
    }

    /// Stop the writer once the queued work is done.
    pub async fn shutdown(self) -> Result<()> {
        let TagVault {
            writer,
            writer_thread,
            ..
        } = self;
        drop(writer);
        tokio::task::spawn_blocking(move || writer_thread.join())
            .await
            .map_err(|e| TagVaultError::Other(format!("Failed to join writer: {}", e)))??;
        info!("Library closed");
        Ok(())
    }
}

/// Builder for configuring TagVault initialization.
pub struct TagVaultBuilder {
    root: PathBuf,
    auto_create_dirs: bool,
    options: Option<EngineOptions>,
}

impl TagVaultBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            auto_create_dirs: false,
            options: None,
        }
    }

    /// Create the library root if it does not exist.
    ///
    /// Default: `false` (the root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Use these options instead of the library's `options.json`.
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub async fn build(self) -> Result<TagVault> {
        if !self.root.exists() {
            if !self.auto_create_dirs {
                return Err(TagVaultError::Config {
                    message: format!("Library root does not exist: {}", self.root.display()),
                });
            }
            std::fs::create_dir_all(&self.root)
                .map_err(|e| TagVaultError::io_with_path(e, &self.root))?;
        }

        let options = match self.options {
            Some(options) => options,
            None => EngineOptions::load_or_default(&self.root.join(PathsConfig::OPTIONS_FILE_NAME))?,
        };
        let db_path = self.root.join(PathsConfig::DB_FILE_NAME);
        let engine = Engine::open(&db_path, options)?;
        let (writer, writer_thread) = WriterHandle::spawn(engine)?;

        Ok(TagVault {
            root: self.root,
            db_path,
            writer,
            writer_thread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builder_requires_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(TagVault::builder(&missing).build().await.is_err());

        let vault = TagVault::builder(&missing)
            .auto_create_dirs(true)
            .build()
            .await
            .unwrap();
        assert!(vault.db_path().exists());
        vault.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_vault_round_trip() {
        let dir = TempDir::new().unwrap();
        let vault = TagVault::builder(dir.path()).build().await.unwrap();
        let file = FileInfo::new(FileHash::of_content(b"vault"), 5, "video/mp4");

        let package = ContentUpdatePackage::new()
            .with(
                ServiceKey::default_local_file(),
                ContentUpdate::Files(FilesUpdate::Add {
                    files: vec![file.clone()],
                    timestamp: None,
                }),
            )
            .with(
                ServiceKey::default_local_tag(),
                ContentUpdate::Mappings(MappingsUpdate::Add {
                    tag: "samus".into(),
                    hashes: vec![file.hash],
                }),
            );
        let applied = vault.apply(package).await.unwrap();
        assert_eq!(applied.applied_count(), 2);

        let reader = vault.reader().unwrap();
        let counts = reader
            .tag_counts(
                &ServiceKey::default_local_tag(),
                "samus",
                &FileLocation::AllKnownFiles,
                TagDisplayType::Display,
            )
            .unwrap();
        assert_eq!(counts.current, 1);
        vault.shutdown().await.unwrap();
    }
}
