// canonguard-core/src/watcher.rs
//! Filesystem notifications feeding the enforcer.
//!
//! A single `notify` watcher multiplexes every root. Creation and
//! rename-into-place events for documents with the schema's extension are
//! forwarded to a dispatcher task, which spawns one enforcement attempt per path.
//! Repeat events for a path whose attempt is still pending are dropped, since
//! some backends report one rename as both `To` and `Both`.

use log::{debug, info, warn};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SchemaConfig;
use crate::enforcer::{Enforcer, Outcome};
use crate::errors::GuardError;

/// Keeps the OS watches alive; dropping it stops notifications.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl WatchHandle {
    pub fn watched_roots(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Paths in `event` that should trigger enforcement: newly created files and
/// rename destinations carrying the schema's extension.
pub fn candidate_paths(event: &Event, schema: &SchemaConfig) -> Vec<PathBuf> {
    let paths: Vec<&PathBuf> = match event.kind {
        EventKind::Create(_) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        // Source first, destination second.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.get(1).into_iter().collect(),
        // Backends that cannot tell the direction; vanished sources are skipped later.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.iter().collect(),
        _ => Vec::new(),
    };
    paths
        .into_iter()
        .filter(|p| schema.matches_extension(p))
        .cloned()
        .collect()
}

/// Registers every root recursively and forwards candidate paths into `tx`.
///
/// Roots that are missing or cannot be watched are skipped with a warning.
/// Fails only when no root at all could be registered.
pub fn start_watching(
    roots: &[PathBuf],
    schema: SchemaConfig,
    tx: mpsc::Sender<PathBuf>,
) -> Result<WatchHandle, GuardError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in candidate_paths(&event, &schema) {
                if tx.blocking_send(path).is_err() {
                    debug!("Dispatcher closed; dropping filesystem event.");
                    return;
                }
            }
        }
        Err(e) => warn!("Filesystem watch error: {}", e),
    })?;

    let mut watched = Vec::new();
    for root in roots {
        if !root.is_dir() {
            warn!("Watch root {} does not exist; skipping.", root.display());
            continue;
        }
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                info!("Watching {}", root.display());
                watched.push(root.clone());
            }
            Err(e) => warn!("Cannot watch {}: {}", root.display(), e),
        }
    }

    if watched.is_empty() {
        return Err(GuardError::Config("no watch root could be registered".to_string()));
    }

    Ok(WatchHandle {
        _watcher: watcher,
        watched,
    })
}

/// Paths with an enforcement attempt pending or running.
#[derive(Default)]
struct InFlight {
    paths: Mutex<HashSet<PathBuf>>,
}

/// Releases its path from the [`InFlight`] set when dropped.
struct Claim {
    set: Arc<InFlight>,
    path: PathBuf,
}

impl InFlight {
    /// Marks `path` busy. `None` if an attempt for it is already pending.
    fn claim(self: &Arc<Self>, path: &Path) -> Option<Claim> {
        let mut paths = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        if !paths.insert(path.to_path_buf()) {
            return None;
        }
        Some(Claim {
            set: Arc::clone(self),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut paths = self.set.paths.lock().unwrap_or_else(|p| p.into_inner());
        paths.remove(&self.path);
    }
}

/// Consumes candidate paths and spawns one enforcement task per path until the
/// channel closes or `shutdown` flips to true. A path already being handled is
/// not scheduled again.
pub fn spawn_dispatcher(
    enforcer: Arc<Enforcer>,
    mut rx: mpsc::Receiver<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let in_flight = Arc::new(InFlight::default());
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(path) = maybe else { break };
                    if enforcer.is_ignored(&path) {
                        debug!("Ignoring event for {}", path.display());
                        continue;
                    }
                    let Some(claim) = in_flight.claim(&path) else {
                        debug!("Attempt already pending for {}", path.display());
                        continue;
                    };
                    let enforcer = Arc::clone(&enforcer);
                    tokio::spawn(async move {
                        let _claim = claim;
                        let shown = path.display().to_string();
                        match enforcer.enforce_after_settle(path).await {
                            Outcome::Failed(_) => {}
                            outcome => debug!("{}: {}", shown, outcome),
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Event dispatcher stopped.");
    })
}
