// canonguard-core/src/sync.rs
//! Keeps the template cache directory populated and tells the registry to rebuild.
//!
//! The core only depends on the [`TemplateSource`] contract: after a sync cycle
//! the cache directory holds the current template set. Transport details stay
//! inside each source implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SchemaConfig;
use crate::index::TemplateRegistry;

pub const METADATA_FILE_NAME: &str = "metadata.json";
const TMP_SUFFIX: &str = "part";

/// What one sync cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated > 0
    }
}

#[async_trait]
pub trait TemplateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Brings `cache_dir` up to date with the source.
    async fn sync(&self, cache_dir: &Path) -> Result<SyncReport>;
}

/// Per-file bookkeeping stored next to the cached templates.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheMetadata {
    last_sync: Option<String>,
    #[serde(default)]
    templates: BTreeMap<String, CachedTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedTemplate {
    sha256: String,
    size: u64,
    synced_at: String,
}

/// Mirrors template files from a local or mounted directory into the cache.
///
/// Files are compared by SHA-256 against the digests recorded in the cache's
/// `metadata.json`. Cache entries are added or overwritten, never deleted.
pub struct DirectoryMirror {
    source_dir: PathBuf,
    schema: SchemaConfig,
}

impl DirectoryMirror {
    pub fn new(source_dir: impl Into<PathBuf>, schema: SchemaConfig) -> Self {
        Self {
            source_dir: source_dir.into(),
            schema,
        }
    }

    fn sync_blocking(source_dir: &Path, schema: &SchemaConfig, cache_dir: &Path) -> Result<SyncReport> {
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create template cache {}", cache_dir.display()))?;

        let mut metadata = load_metadata(&cache_dir.join(METADATA_FILE_NAME));

        let mut sources: Vec<PathBuf> = std::fs::read_dir(source_dir)
            .with_context(|| format!("Failed to list template source {}", source_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && schema.matches_extension(path))
            .collect();
        sources.sort();

        let mut report = SyncReport::default();
        for src in sources {
            let Some(file_name) = src.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!("Skipping template with a non UTF-8 name: {}", src.display());
                continue;
            };
            let bytes = match std::fs::read(&src) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Failed to read template {}: {}", src.display(), e);
                    continue;
                }
            };
            let digest = hex::encode(Sha256::digest(&bytes));
            let dest = cache_dir.join(&file_name);

            let known = metadata.templates.get(&file_name).map(|c| c.sha256.as_str());
            if dest.exists() && known == Some(digest.as_str()) {
                report.unchanged += 1;
                continue;
            }

            let is_update = dest.exists();
            write_replacing(cache_dir, &file_name, &bytes)?;
            if is_update {
                info!("Template updated: {}", file_name);
                report.updated += 1;
            } else {
                info!("New template: {}", file_name);
                report.added += 1;
            }
            metadata.templates.insert(
                file_name,
                CachedTemplate {
                    sha256: digest,
                    size: bytes.len() as u64,
                    synced_at: chrono::Utc::now().to_rfc3339(),
                },
            );
        }

        metadata.last_sync = Some(chrono::Utc::now().to_rfc3339());
        let json = serde_json::to_vec_pretty(&metadata).context("Failed to serialise cache metadata")?;
        write_replacing(cache_dir, METADATA_FILE_NAME, &json)?;

        Ok(report)
    }
}

/// Writes `bytes` to a hidden temp file in `cache_dir`, then renames it over
/// `file_name`, so readers of the cache see the old or the new template, never
/// a truncated one. The temp name never carries a template extension.
fn write_replacing(cache_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    let dest = cache_dir.join(file_name);
    let tmp = cache_dir.join(format!(".{}.{}", file_name, TMP_SUFFIX));
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write temp template {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, &dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace cached template {}", dest.display()));
    }
    Ok(())
}

fn load_metadata(path: &Path) -> CacheMetadata {
    match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!("Ignoring unreadable cache metadata {}: {}", path.display(), e);
            CacheMetadata::default()
        }),
        Err(_) => CacheMetadata::default(),
    }
}

#[async_trait]
impl TemplateSource for DirectoryMirror {
    fn name(&self) -> &str {
        "directory"
    }

    async fn sync(&self, cache_dir: &Path) -> Result<SyncReport> {
        let source_dir = self.source_dir.clone();
        let schema = self.schema.clone();
        let cache_dir = cache_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::sync_blocking(&source_dir, &schema, &cache_dir))
            .await
            .context("Template sync task panicked")?
    }
}

/// Runs one sync cycle and rebuilds the registry when anything changed.
pub async fn sync_once(source: &dyn TemplateSource, registry: &TemplateRegistry) -> Result<SyncReport> {
    let report = source
        .sync(registry.template_dir())
        .await
        .with_context(|| format!("Template source '{}' failed", source.name()))?;
    if report.changed() {
        info!(
            "Sync '{}': {} new, {} updated; rebuilding index.",
            source.name(),
            report.added,
            report.updated
        );
        registry.rebuild();
    } else {
        debug!("Sync '{}': templates already current.", source.name());
    }
    Ok(report)
}

/// Spawns the periodic sync task. The first cycle runs immediately; the task
/// exits when `shutdown` flips to true.
pub fn spawn_sync_loop(
    source: Arc<dyn TemplateSource>,
    registry: Arc<TemplateRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sync_once(source.as_ref(), &registry).await {
                        error!("Template sync failed: {:#}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Template sync loop for '{}' stopped.", source.name());
    })
}
