//! Async tests for the library facade and its writer thread.

use tagvault_core::{
    ContentUpdate, ContentUpdatePackage, EngineOptions, FileHash, FileInfo, FileLocation, FilesUpdate,
    MappingsUpdate, Notification, ServiceKey, ServiceType, TagDisplayType, TagPairUpdate, TagVault,
};
use tempfile::TempDir;

async fn create_test_vault(dir: &TempDir) -> TagVault {
    TagVault::builder(dir.path().join("library"))
        .auto_create_dirs(true)
        .with_options(EngineOptions::default())
        .build()
        .await
        .unwrap()
}

fn create_test_file(seed: &str) -> FileInfo {
    FileInfo::new(FileHash::of_content(seed.as_bytes()), 4096, "video/webm")
}

#[tokio::test]
async fn test_concurrent_writers_serialize() {
    let dir = TempDir::new().unwrap();
    let vault = create_test_vault(&dir).await;
    let files: Vec<FileInfo> = (0..8).map(|i| create_test_file(&format!("clip {}", i))).collect();

    vault
        .writer()
        .add_files(ServiceKey::default_local_file(), files.clone(), Some(10))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for file in &files {
        let writer = vault.writer().clone();
        let package = ContentUpdatePackage::new().with(
            ServiceKey::default_local_tag(),
            ContentUpdate::Mappings(MappingsUpdate::Add {
                tag: "clip".into(),
                hashes: vec![file.hash],
            }),
        );
        tasks.push(tokio::spawn(async move { writer.apply(package).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().applied_count(), 1);
    }

    let reader = vault.reader().unwrap();
    let counts = reader
        .tag_counts(
            &ServiceKey::default_local_tag(),
            "clip",
            &FileLocation::AllKnownFiles,
            TagDisplayType::Storage,
        )
        .unwrap();
    assert_eq!(counts.current, 8);
    assert!(vault.writer().check_integrity().await.unwrap().is_clean());
    vault.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscribers_see_edge_notifications() {
    let dir = TempDir::new().unwrap();
    let vault = create_test_vault(&dir).await;
    let mut rx = vault.subscribe();

    let package = ContentUpdatePackage::new().with(
        ServiceKey::default_local_tag(),
        ContentUpdate::TagParents(TagPairUpdate::Add {
            from: "character:samus".into(),
            to: "series:metroid".into(),
        }),
    );
    let applied = vault.apply(package).await.unwrap();
    assert!(!applied.notifications.is_empty());

    let mut saw_parents = false;
    while let Ok(notification) = rx.try_recv() {
        if let Notification::ParentsChanged { service_key, tags } = notification {
            assert_eq!(service_key, ServiceKey::default_local_tag());
            assert_eq!(tags.len(), 2);
            saw_parents = true;
        }
    }
    assert!(saw_parents);
    vault.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_domain_lifecycle_through_writer() {
    let dir = TempDir::new().unwrap();
    let vault = create_test_vault(&dir).await;
    let domain = ServiceKey::generate();
    let service = vault
        .writer()
        .create_service(domain.clone(), ServiceType::LocalFileDomain, "screenshots".into())
        .await
        .unwrap();
    assert_eq!(service.name, "screenshots");

    let file = create_test_file("screenshot");
    vault
        .writer()
        .add_files(domain.clone(), vec![file.clone()], None)
        .await
        .unwrap();
    let deleted = vault
        .writer()
        .delete_files(domain.clone(), vec![file.hash], Some("blurry".into()))
        .await
        .unwrap();
    assert_eq!(deleted, vec![file.hash]);

    let reader = vault.reader().unwrap();
    assert!(reader.is_current(&ServiceKey::trash(), &file.hash).unwrap());

    let restored = vault
        .writer()
        .undelete_files(ServiceKey::trash(), vec![file.hash])
        .await
        .unwrap();
    assert_eq!(restored, vec![file.hash]);
    assert!(reader.is_current(&domain, &file.hash).unwrap());

    vault.writer().delete_service(domain.clone()).await.unwrap();
    assert!(reader.is_current(&ServiceKey::trash(), &file.hash).unwrap());
    assert!(reader.check_integrity().unwrap().is_clean());

    let purge = ContentUpdatePackage::new().with(
        ServiceKey::trash(),
        ContentUpdate::Files(FilesUpdate::Delete {
            hashes: vec![file.hash],
            reason: None,
        }),
    );
    vault.apply(purge).await.unwrap();
    assert!(!reader
        .is_current(&ServiceKey::combined_local_file(), &file.hash)
        .unwrap());
    vault.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reopen_keeps_library_state() {
    let dir = TempDir::new().unwrap();
    let file = create_test_file("persisted");
    {
        let vault = create_test_vault(&dir).await;
        vault
            .writer()
            .add_files(ServiceKey::default_local_file(), vec![file.clone()], Some(1))
            .await
            .unwrap();
        vault.shutdown().await.unwrap();
    }

    let vault = TagVault::open(dir.path().join("library")).await.unwrap();
    let reader = vault.reader().unwrap();
    assert!(reader
        .is_current(&ServiceKey::default_local_file(), &file.hash)
        .unwrap());
    vault.shutdown().await.unwrap();
}
