//! Subcommands. Each returns the JSON value printed on success.

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use serde_json::{json, Value};
use std::path::PathBuf;
use tagvault_core::{
    ContentUpdatePackage, FileLocation, LibraryReader, Service, ServiceKey, TagDisplayType, TagVault,
};
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the library and its fixed services
    Init,

    /// List services with their keys
    Services,

    /// Apply a content-update package read from a JSON file
    Apply {
        /// Path to the package JSON
        package: PathBuf,
    },

    /// Show a service's counters
    Info {
        /// Service name or hex key
        service: String,
    },

    /// Show counts for one tag
    Counts {
        tag: String,

        /// Tag service name or hex key
        #[arg(long, default_value = "my tags")]
        tags: String,

        /// Restrict to files current in this file service
        #[arg(long)]
        files: Option<String>,

        /// Report storage counts instead of display counts
        #[arg(long)]
        storage: bool,
    },

    /// Autocomplete tags by prefix
    Search {
        prefix: String,

        /// Tag service name or hex key
        #[arg(long, default_value = "my tags")]
        tags: String,

        #[arg(long, default_value = "25")]
        limit: usize,
    },

    /// Recompute caches and counters from storage and report drift
    Check,

    /// Rebuild combined deleted file membership from deletion records
    Resync,
}

pub async fn run(vault: &TagVault, command: Command) -> Result<Value> {
    match command {
        Command::Init => {
            let reader = vault.reader()?;
            Ok(json!({
                "root": vault.root(),
                "services": reader.services()?.len(),
            }))
        }
        Command::Services => {
            let services = vault.reader()?.services()?;
            Ok(serde_json::to_value(services)?)
        }
        Command::Apply { package } => {
            let text = std::fs::read_to_string(&package)
                .with_context(|| format!("Failed to read {}", package.display()))?;
            let package: ContentUpdatePackage =
                serde_json::from_str(&text).context("Invalid content update package")?;
            let applied = vault.apply(package).await?;
            for (index, reason) in applied.skipped() {
                warn!("Update {} skipped: {:?}", index, reason);
            }
            info!(
                "Applied {} of {} updates",
                applied.applied_count(),
                applied.outcomes.len()
            );
            Ok(serde_json::to_value(applied)?)
        }
        Command::Info { service } => {
            let reader = vault.reader()?;
            let service = resolve_service(&reader, &service)?;
            let mut counters = serde_json::Map::new();
            for (kind, value) in reader.all_service_info(&service.key)? {
                if let Value::String(name) = serde_json::to_value(kind)? {
                    counters.insert(name, json!(value));
                }
            }
            Ok(json!({
                "service": service,
                "counters": counters,
            }))
        }
        Command::Counts {
            tag,
            tags,
            files,
            storage,
        } => {
            let reader = vault.reader()?;
            let tag_service = resolve_service(&reader, &tags)?;
            let location = match files {
                Some(files) => FileLocation::Service(resolve_service(&reader, &files)?.key),
                None => FileLocation::AllKnownFiles,
            };
            let display = if storage {
                TagDisplayType::Storage
            } else {
                TagDisplayType::Display
            };
            let counts = reader.tag_counts(&tag_service.key, &tag, &location, display)?;
            Ok(json!({
                "tag": tag,
                "chained": reader.is_chained(&tag_service.key, &tag)?,
                "ideal": reader.ideal_sibling(&tag_service.key, &tag)?.to_string(),
                "counts": counts,
            }))
        }
        Command::Search { prefix, tags, limit } => {
            let reader = vault.reader()?;
            let tag_service = resolve_service(&reader, &tags)?;
            let results = reader.search_tags(
                &tag_service.key,
                &prefix,
                &FileLocation::AllKnownFiles,
                TagDisplayType::Display,
                limit,
            )?;
            Ok(serde_json::to_value(results)?)
        }
        Command::Check => {
            let report = vault.writer().check_integrity().await?;
            if !report.is_clean() {
                eprintln!("{}", serde_json::to_string_pretty(&report)?);
                bail!("Integrity check found {} problems", report.problems.len());
            }
            Ok(serde_json::to_value(report)?)
        }
        Command::Resync => {
            let (added, removed) = vault.writer().resync_combined_deleted_files(None).await?;
            Ok(json!({ "added": added, "removed": removed }))
        }
    }
}

/// Match a service by exact name, then by hex key.
fn resolve_service(reader: &LibraryReader, name_or_key: &str) -> Result<Service> {
    let services = reader.services()?;
    if let Some(service) = services.iter().find(|s| s.name == name_or_key) {
        return Ok(service.clone());
    }
    let key = ServiceKey::from_hex(name_or_key).map_err(|_| anyhow!("No service named '{}'", name_or_key))?;
    services
        .into_iter()
        .find(|s| s.key == key)
        .ok_or_else(|| anyhow!("No service with key {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tagvault_core::{ContentUpdate, FileHash, FileInfo, FilesUpdate, MappingsUpdate};
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestArgs {
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn test_counts_defaults() {
        let args = TestArgs::try_parse_from(["tagvault", "counts", "character:samus"]).unwrap();
        match args.command {
            Command::Counts {
                tag, tags, storage, ..
            } => {
                assert_eq!(tag, "character:samus");
                assert_eq!(tags, "my tags");
                assert!(!storage);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_then_counts() {
        let dir = TempDir::new().unwrap();
        let vault = TagVault::builder(dir.path()).build().await.unwrap();
        let file = FileInfo::new(FileHash::of_content(b"cli"), 3, "image/gif");
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
                    tag: "character:samus".into(),
                    hashes: vec![file.hash],
                }),
            );
        let package_path = dir.path().join("package.json");
        std::fs::write(&package_path, serde_json::to_string(&package).unwrap()).unwrap();

        run(&vault, Command::Apply { package: package_path }).await.unwrap();
        let counts = run(
            &vault,
            Command::Counts {
                tag: "character:samus".into(),
                tags: "my tags".into(),
                files: Some("my files".into()),
                storage: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(counts["counts"]["current"], 1);
        assert_eq!(counts["chained"], false);

        let check = run(&vault, Command::Check).await.unwrap();
        assert_eq!(check["problems"].as_array().map(Vec::len), Some(0));
        vault.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_service_is_an_error() {
        let dir = TempDir::new().unwrap();
        let vault = TagVault::builder(dir.path()).build().await.unwrap();
        let result = run(
            &vault,
            Command::Info {
                service: "nonexistent".into(),
            },
        )
        .await;
        assert!(result.is_err());
        vault.shutdown().await.unwrap();
    }
}
