//! Basic usage example - tag a file and read its display counts

use tagvault_core::{
    ContentUpdate, ContentUpdatePackage, FileHash, FileInfo, FileLocation, FilesUpdate, MappingsUpdate, Result,
    ServiceKey, TagDisplayType, TagPairUpdate, TagVault,
};

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./example-library".to_string());

    println!("Opening library at: {}", path);

    let vault = TagVault::builder(&path).auto_create_dirs(true).build().await?;

    let file = FileInfo::new(FileHash::of_content(b"example"), 7, "image/png");
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
        )
        .with(
            ServiceKey::default_local_tag(),
            ContentUpdate::TagSiblings(TagPairUpdate::Add {
                from: "samus".into(),
                to: "character:samus".into(),
            }),
        );
    let applied = vault.apply(package).await?;
    println!("Applied {} of {} updates", applied.applied_count(), applied.outcomes.len());

    let reader = vault.reader()?;
    for tag in ["samus", "character:samus"] {
        let counts = reader.tag_counts(
            &ServiceKey::default_local_tag(),
            tag,
            &FileLocation::AllKnownFiles,
            TagDisplayType::Display,
        )?;
        println!("  - {}: {} current, {} pending", tag, counts.current, counts.pending);
    }

    vault.shutdown().await
}
