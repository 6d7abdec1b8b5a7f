// canonguard-core/src/ledger.rs
//! Durable record of paths that have been restored at least once.
//!
//! The ledger is an audit trail, not a correctness gate: forgetting an entry only
//! means a redundant re-check. It is read once at startup and rewritten in full
//! after every mutation.

use log::{debug, warn};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::GuardError;

const LEDGER_TMP_SUFFIX: &str = "tmp";

#[derive(Debug)]
pub struct ProcessedLedger {
    path: PathBuf,
    entries: Mutex<BTreeSet<PathBuf>>,
}

impl ProcessedLedger {
    /// Opens the ledger stored at `path`. A missing, empty or unreadable file
    /// starts an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Starting with an empty ledger, could not read {}: {}", path.display(), e);
                BTreeSet::new()
            }
        };
        debug!("Ledger {} holds {} paths.", path.display(), entries.len());
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Adds `target` and persists the whole set. Returns whether the path was new.
    ///
    /// Safe to call from several threads; writers are serialised.
    pub fn record(&self, target: &Path) -> Result<bool, GuardError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| GuardError::Ledger("ledger mutex poisoned".to_string()))?;
        let inserted = entries.insert(target.to_path_buf());
        persist(&self.path, &entries)?;
        Ok(inserted)
    }

    pub fn contains(&self, target: &Path) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains(target))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_entries(path: &Path) -> Result<BTreeSet<PathBuf>, GuardError> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }

    let mut f = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| GuardError::io(path, e))?;
    fs2::FileExt::lock_shared(&f).map_err(|e| GuardError::io(path, e))?;
    let mut raw = Vec::new();
    let read = f.read_to_end(&mut raw);
    fs2::FileExt::unlock(&f).map_err(|e| GuardError::io(path, e))?;
    read.map_err(|e| GuardError::io(path, e))?;

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeSet::new());
    }

    let list: Vec<PathBuf> = serde_json::from_slice(&raw)
        .map_err(|e| GuardError::Ledger(format!("corrupt ledger {}: {}", path.display(), e)))?;
    Ok(list.into_iter().collect())
}

fn persist(path: &Path, entries: &BTreeSet<PathBuf>) -> Result<(), GuardError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| GuardError::io(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(entries)
        .map_err(|e| GuardError::Ledger(format!("failed to serialise ledger: {}", e)))?;

    let tmp_path = path.with_extension(format!(
        "{}.{}",
        path.extension().map(|s| s.to_string_lossy()).unwrap_or_default(),
        LEDGER_TMP_SUFFIX
    ));
    {
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| GuardError::io(&tmp_path, e))?;
        fs2::FileExt::lock_exclusive(&tmp).map_err(|e| GuardError::io(&tmp_path, e))?;
        tmp.write_all(&json).map_err(|e| GuardError::io(&tmp_path, e))?;
        tmp.flush().map_err(|e| GuardError::io(&tmp_path, e))?;
        fs2::FileExt::unlock(&tmp).map_err(|e| GuardError::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| GuardError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_persists_across_reloads() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("state").join("processed.json");

        let ledger = ProcessedLedger::load(&ledger_path);
        assert!(ledger.is_empty());
        assert!(ledger.record(Path::new("/docs/a.xml")).unwrap());
        assert!(!ledger.record(Path::new("/docs/a.xml")).unwrap());
        assert!(ledger.record(Path::new("/docs/b.xml")).unwrap());

        let reloaded = ProcessedLedger::load(&ledger_path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(Path::new("/docs/a.xml")));
        assert!(!ledger_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_ledger_starts_empty() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("processed.json");
        fs::write(&ledger_path, b"{not json").unwrap();

        let ledger = ProcessedLedger::load(&ledger_path);
        assert!(ledger.is_empty());
        ledger.record(Path::new("/docs/a.xml")).unwrap();
        assert_eq!(ProcessedLedger::load(&ledger_path).len(), 1);
    }

    #[test]
    fn test_empty_file_is_an_empty_ledger() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("processed.json");
        fs::write(&ledger_path, b"\n").unwrap();
        assert!(ProcessedLedger::load(&ledger_path).is_empty());
    }
}
