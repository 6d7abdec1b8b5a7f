//! Configuration management for `canonguard-core`.
//!
//! This module defines the document schema used for fingerprinting and the agent's
//! runtime settings. It handles deserialization of YAML configuration files and
//! provides validation plus the path helpers the rest of the crate relies on.
//!
//! License: MIT OR Apache-2.0

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Namespace of the tax-declaration documents the default schema targets.
pub const DEFAULT_NAMESPACE: &str = "http://kekhaithue.gdt.gov.vn/TKhaiThue";

/// Sync cycles shorter than this are rejected by [`GuardConfig::validate`].
pub const MIN_SYNC_INTERVAL_SECS: u64 = 60;

const APP_DIR_NAME: &str = "canonguard";
const LEDGER_FILE_NAME: &str = "processed.json";
const AUDIT_FILE_NAME: &str = "audit.jsonl";
const TEMPLATE_DIR_NAME: &str = "templates";

/// Where each fingerprint field lives in a document.
///
/// Field lookup is by element name inside `namespace`; the first matching
/// descendant in document order wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub namespace: String,
    /// Document extension without the leading dot, compared case-insensitively.
    pub extension: String,
    pub taxpayer_id_tag: String,
    pub form_code_tag: String,
    pub period_type_tag: String,
    pub period_tag: String,
    pub sequence_tag: String,
    pub title_tag: String,
    pub taxpayer_name_tag: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            extension: "xml".to_string(),
            taxpayer_id_tag: "mst".to_string(),
            form_code_tag: "maTKhai".to_string(),
            period_type_tag: "kieuKy".to_string(),
            period_tag: "kyKKhai".to_string(),
            sequence_tag: "soLan".to_string(),
            title_tag: "tenTKhai".to_string(),
            taxpayer_name_tag: "tenNNT".to_string(),
        }
    }
}

impl SchemaConfig {
    /// Returns true when `path` carries this schema's document extension.
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    fn tags(&self) -> [(&'static str, &str); 7] {
        [
            ("taxpayer_id_tag", self.taxpayer_id_tag.as_str()),
            ("form_code_tag", self.form_code_tag.as_str()),
            ("period_type_tag", self.period_type_tag.as_str()),
            ("period_tag", self.period_tag.as_str()),
            ("sequence_tag", self.sequence_tag.as_str()),
            ("title_tag", self.title_tag.as_str()),
            ("taxpayer_name_tag", self.taxpayer_name_tag.as_str()),
        ]
    }
}

/// Settings for the template sync collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory mirrored into the template cache. Sync is disabled when unset.
    pub source_dir: Option<PathBuf>,
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_dir: None,
            interval_secs: 1800,
        }
    }
}

/// Represents the top-level configuration structure for canonguard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    pub schema: SchemaConfig,
    /// Roots watched recursively. Empty means [`default_watch_roots`].
    pub watch_roots: Vec<PathBuf>,
    /// Template cache. Defaults to `<state_dir>/templates`.
    pub template_dir: Option<PathBuf>,
    /// Ledger, audit log and template cache live here by default.
    pub state_dir: Option<PathBuf>,
    pub settle_delay_ms: u64,
    pub telemetry_buffer: usize,
    pub audit_log: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            schema: SchemaConfig::default(),
            watch_roots: Vec::new(),
            template_dir: None,
            state_dir: None,
            settle_delay_ms: 1000,
            telemetry_buffer: 256,
            audit_log: None,
            sync: SyncConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Loads the configuration from a YAML file and validates it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: GuardConfig = serde_yml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise falls back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => {
                debug!("No configuration file supplied, using defaults.");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Checks every setting and reports all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.schema.namespace.trim().is_empty() {
            errors.push("`schema.namespace` cannot be empty.".to_string());
        }
        let ext = self.schema.extension.trim();
        if ext.is_empty() {
            errors.push("`schema.extension` cannot be empty.".to_string());
        } else if ext.starts_with('.') {
            errors.push(format!(
                "`schema.extension` must not start with a dot (got '{}').",
                self.schema.extension
            ));
        }
        for (key, tag) in self.schema.tags() {
            if tag.trim().is_empty() {
                errors.push(format!("`schema.{}` cannot be empty.", key));
            }
        }
        if self.telemetry_buffer == 0 {
            errors.push("`telemetry_buffer` must be greater than 0.".to_string());
        }
        if self.sync.source_dir.is_some() && self.sync.interval_secs < MIN_SYNC_INTERVAL_SECS {
            errors.push(format!(
                "`sync.interval_secs` must be at least {} seconds (got {}).",
                MIN_SYNC_INTERVAL_SECS, self.sync.interval_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("Configuration validation failed:\n{}", errors.join("\n")))
        }
    }

    /// Always absolute when not configured: the platform data directory, else a
    /// dot-directory in the user's home, else the system temp directory.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{}", APP_DIR_NAME))))
                .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME))
        })
    }

    /// Directories the enforcer must never touch: the agent's own state and the
    /// template cache. The audit log is not listed; its extension never passes
    /// the document gate.
    pub fn ignored_dirs(&self) -> Vec<PathBuf> {
        let state = self.state_dir();
        let templates = self.template_dir();
        if templates.starts_with(&state) {
            vec![state]
        } else {
            vec![state, templates]
        }
    }

    pub fn template_dir(&self) -> PathBuf {
        self.template_dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join(TEMPLATE_DIR_NAME))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join(LEDGER_FILE_NAME)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.state_dir().join(AUDIT_FILE_NAME))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// The configured roots, or the platform defaults when none are set.
    pub fn effective_watch_roots(&self) -> Vec<PathBuf> {
        if self.watch_roots.is_empty() {
            default_watch_roots()
        } else {
            self.watch_roots.clone()
        }
    }
}

/// Every existing drive root on Windows, plus the user's Desktop, Documents and
/// Downloads folders and any OneDrive copies of them, on all platforms.
pub fn default_watch_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();

    #[cfg(target_os = "windows")]
    {
        for letter in b'A'..=b'Z' {
            let drive = PathBuf::from(format!("{}:\\", letter as char));
            if drive.exists() {
                roots.push(drive);
            }
        }
    }

    for dir in [dirs::desktop_dir(), dirs::document_dir(), dirs::download_dir()]
        .into_iter()
        .flatten()
    {
        push_root(&mut roots, dir);
    }
    if let Some(home) = dirs::home_dir() {
        for dir in onedrive_folders(&home) {
            push_root(&mut roots, dir);
        }
    }

    roots
}

/// `~/OneDrive` and its redirected Desktop, Documents and Downloads, where present.
fn onedrive_folders(home: &Path) -> Vec<PathBuf> {
    let base = home.join("OneDrive");
    [
        base.clone(),
        base.join("Desktop"),
        base.join("Documents"),
        base.join("Downloads"),
    ]
    .into_iter()
    .filter(|dir| dir.is_dir())
    .collect()
}

/// Adds `dir` unless an existing root already covers it.
fn push_root(roots: &mut Vec<PathBuf>, dir: PathBuf) {
    if !roots.iter().any(|r| dir.starts_with(r)) {
        roots.push(dir);
    }
}
