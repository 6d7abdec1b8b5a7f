// canonguard-core/src/lib.rs
//! # CanonGuard Core Library
//!
//! `canonguard-core` keeps structured declaration documents identical to a set of
//! trusted templates. Whenever a document appears whose identifying fields match a
//! template, the document's bytes are replaced with the template's bytes.
//!
//! ## Modules
//!
//! * `config`: `GuardConfig` and `SchemaConfig`, loaded from YAML.
//! * `fingerprint`: Extracts the identifying [`Fingerprint`] from a document.
//! * `index`: The immutable [`TemplateIndex`] and the hot-swappable [`TemplateRegistry`].
//! * `matcher`: The equivalence rule between two fingerprints.
//! * `ledger`: The durable [`ProcessedLedger`] of restored paths.
//! * `telemetry`: Non-blocking audit events and their sinks.
//! * `sync`: The [`TemplateSource`] contract and the periodic sync loop.
//! * `enforcer`: The per-event state machine that ends in an [`Outcome`].
//! * `watcher`: Filesystem notifications feeding the enforcer.
//! * `errors`: [`GuardError`] and [`ExtractError`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use canonguard_core::{find_match, FingerprintExtractor, SchemaConfig, TemplateRegistry};
//! use std::path::Path;
//!
//! let schema = SchemaConfig::default();
//! let registry = TemplateRegistry::new("/var/lib/canonguard/templates", schema.clone());
//! let extractor = FingerprintExtractor::new(schema);
//!
//! if let Some(fp) = extractor.extract(Path::new("declaration.xml")) {
//!     let index = registry.snapshot();
//!     if let Some(template) = find_match(&fp, &index) {
//!         println!("canonical copy: {}", template.path.display());
//!     }
//! }
//! ```

pub mod config;
pub mod enforcer;
pub mod errors;
pub mod fingerprint;
pub mod index;
pub mod ledger;
pub mod matcher;
pub mod sync;
pub mod telemetry;
pub mod watcher;

pub use config::{GuardConfig, SchemaConfig, SyncConfig, DEFAULT_NAMESPACE};
pub use enforcer::{Enforcer, Outcome, SkipReason};
pub use errors::{ExtractError, GuardError};
pub use fingerprint::{Fingerprint, FingerprintExtractor};
pub use index::{Template, TemplateIndex, TemplateRegistry};
pub use ledger::ProcessedLedger;
pub use matcher::{find_match, fingerprints_match};
pub use sync::{spawn_sync_loop, sync_once, DirectoryMirror, SyncReport, TemplateSource};
pub use telemetry::{AuditEvent, AuditSink, JsonLinesSink, LogSink, TelemetryDispatcher};
pub use watcher::{candidate_paths, spawn_dispatcher, start_watching, WatchHandle};
