// canonguard-core/src/index.rs
//! The template fingerprint index and its hot-swappable registry.
//!
//! A [`TemplateIndex`] is an immutable snapshot of every trusted template found
//! directly under one directory. It is never mutated after construction; when the
//! template set changes, [`TemplateRegistry::rebuild`] builds a fresh index and
//! swaps it in atomically, so readers always see one complete snapshot.

use arc_swap::ArcSwap;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SchemaConfig;
use crate::fingerprint::{Fingerprint, FingerprintExtractor};
use crate::matcher::fingerprints_match;

/// A trusted document: the only acceptable content for its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Name-keyed lookup table over the templates of one directory.
#[derive(Debug, Default)]
pub struct TemplateIndex {
    templates: Vec<Template>,
    by_name: BTreeMap<String, usize>,
}

impl TemplateIndex {
    /// Loads every template directly under `dir`.
    ///
    /// Files are visited in lexicographic filename order. A missing or unreadable
    /// directory yields an empty index; files without a fingerprint are skipped.
    pub fn build(dir: &Path, schema: &SchemaConfig) -> Self {
        let extractor = FingerprintExtractor::new(schema.clone());

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Template directory {} does not exist; index is empty.", dir.display());
                return Self::default();
            }
            Err(e) => {
                error!("Failed to read template directory {}: {}", dir.display(), e);
                return Self::default();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && schema.matches_extension(path))
            .collect();
        files.sort();

        // Keyed by name so a later file with the same stem replaces the earlier one.
        let mut named: BTreeMap<String, Template> = BTreeMap::new();
        for path in files {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!("Skipping template with a non UTF-8 name: {}", path.display());
                continue;
            };
            let Some(fingerprint) = extractor.extract(&path) else {
                warn!("Skipping template without a usable fingerprint: {}", path.display());
                continue;
            };
            if let Some(previous) = named.get(&name) {
                warn!(
                    "Template name '{}' is used by both {} and {}; keeping the latter.",
                    name,
                    previous.path.display(),
                    path.display()
                );
            }
            debug!("Loaded template '{}' from {}", name, path.display());
            named.insert(name.clone(), Template { name, path, fingerprint });
        }

        let index = Self::from_templates(named.into_values().collect());
        index.warn_on_shared_identities();
        info!("Loaded {} templates from {}", index.len(), dir.display());
        index
    }

    /// Builds an index from already-extracted templates, preserving their order.
    /// A repeated name replaces the earlier entry.
    pub fn from_templates(templates: Vec<Template>) -> Self {
        let mut deduped: Vec<Template> = Vec::with_capacity(templates.len());
        let mut by_name = BTreeMap::new();
        for template in templates {
            match by_name.get(&template.name) {
                Some(&idx) => deduped[idx] = template,
                None => {
                    by_name.insert(template.name.clone(), deduped.len());
                    deduped.push(template);
                }
            }
        }
        Self { templates: deduped, by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&Template> {
        self.by_name.get(name).map(|&idx| &self.templates[idx])
    }

    /// All templates in enumeration order.
    pub fn all(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Pairs of templates that the matcher cannot tell apart. The first of each
    /// pair shadows the second.
    pub fn shared_identities(&self) -> Vec<(&Template, &Template)> {
        let mut pairs = Vec::new();
        for (i, a) in self.templates.iter().enumerate() {
            for b in &self.templates[i + 1..] {
                if fingerprints_match(&a.fingerprint, &b.fingerprint) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    fn warn_on_shared_identities(&self) {
        for (first, shadowed) in self.shared_identities() {
            warn!(
                "Templates '{}' and '{}' share identity {:?}; '{}' wins.",
                first.name,
                shadowed.name,
                first.fingerprint.identity(),
                first.name
            );
        }
    }
}

/// Holds the current [`TemplateIndex`] and replaces it wholesale on rebuild.
#[derive(Debug)]
pub struct TemplateRegistry {
    dir: PathBuf,
    schema: SchemaConfig,
    current: ArcSwap<TemplateIndex>,
}

impl TemplateRegistry {
    /// Creates the registry and builds the initial index from `dir`.
    pub fn new(dir: impl Into<PathBuf>, schema: SchemaConfig) -> Self {
        let dir = dir.into();
        let initial = TemplateIndex::build(&dir, &schema);
        Self {
            dir,
            schema,
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The index as of now. Holders keep using this snapshot even if a rebuild
    /// happens meanwhile.
    pub fn snapshot(&self) -> Arc<TemplateIndex> {
        self.current.load_full()
    }

    /// Re-reads the template directory and atomically publishes the new index.
    pub fn rebuild(&self) -> usize {
        let fresh = TemplateIndex::build(&self.dir, &self.schema);
        let count = fresh.len();
        self.current.store(Arc::new(fresh));
        info!("Template index rebuilt with {} templates.", count);
        count
    }

    /// Publishes an index built elsewhere.
    pub fn replace(&self, index: TemplateIndex) {
        self.current.store(Arc::new(index));
    }

    pub fn template_dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }
}
