// canonguard-core/src/enforcer.rs
//! The per-event enforcement state machine.
//!
//! For one observed path: ignore filter, extract, match, compare content,
//! overwrite, record, audit. Every outcome is terminal and nothing escapes as a
//! panic or error; a failure on one file never affects another.

use anyhow::anyhow;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::GuardError;
use crate::fingerprint::FingerprintExtractor;
use crate::index::{Template, TemplateIndex, TemplateRegistry};
use crate::ledger::ProcessedLedger;
use crate::matcher::find_match;
use crate::telemetry::{AuditEvent, TelemetryDispatcher, EVENT_ENFORCEMENT_FAILED, EVENT_TEMPLATE_RESTORED};

/// Why an event ended without a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Under an ignored directory or wrong extension.
    Ignored,
    /// Gone, or not a regular file, by the time it was read.
    Vanished,
    /// Malformed, undecodable, or missing a required field.
    NotCandidate,
    /// Valid fingerprint, but no template claims it.
    Unmatched,
    /// Content already equals the template's.
    AlreadyCanonical,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SkipReason::Ignored => "ignored",
            SkipReason::Vanished => "vanished",
            SkipReason::NotCandidate => "not a candidate",
            SkipReason::Unmatched => "no matching template",
            SkipReason::AlreadyCanonical => "already canonical",
        };
        f.write_str(s)
    }
}

/// Terminal state of one enforcement attempt.
#[derive(Debug)]
pub enum Outcome {
    Skipped(SkipReason),
    Overwritten { template: String },
    Failed(GuardError),
}

impl Outcome {
    pub fn is_overwritten(&self) -> bool {
        matches!(self, Outcome::Overwritten { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Outcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            Outcome::Overwritten { template } => write!(f, "restored from template '{}'", template),
            Outcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

pub struct Enforcer {
    registry: Arc<TemplateRegistry>,
    ledger: Arc<ProcessedLedger>,
    telemetry: TelemetryDispatcher,
    extractor: FingerprintExtractor,
    ignored: Vec<PathBuf>,
    settle_delay: Duration,
}

impl Enforcer {
    /// The registry's template directory is always ignored; `extra_ignored`
    /// adds more (typically the agent's state directory).
    pub fn new(
        registry: Arc<TemplateRegistry>,
        ledger: Arc<ProcessedLedger>,
        telemetry: TelemetryDispatcher,
        extra_ignored: Vec<PathBuf>,
        settle_delay: Duration,
    ) -> Self {
        let extractor = FingerprintExtractor::new(registry.schema().clone());

        let mut ignored = Vec::new();
        for dir in std::iter::once(registry.template_dir().to_path_buf()).chain(extra_ignored) {
            if let Ok(canonical) = dir.canonicalize() {
                if canonical != dir {
                    ignored.push(canonical);
                }
            }
            ignored.push(dir);
        }

        Self {
            registry,
            ledger,
            telemetry,
            extractor,
            ignored,
            settle_delay,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.ledger
    }

    /// True for paths the agent must never touch.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.iter().any(|dir| path.starts_with(dir))
            || !self.extractor.schema().matches_extension(path)
    }

    /// Waits out the settle delay, then enforces on the blocking pool.
    pub async fn enforce_after_settle(self: Arc<Self>, path: PathBuf) -> Outcome {
        if self.is_ignored(&path) {
            debug!("Ignoring {}", path.display());
            return Outcome::Skipped(SkipReason::Ignored);
        }
        tokio::time::sleep(self.settle_delay).await;

        let enforcer = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || enforcer.enforce(&path)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Enforcement task panicked: {}", e);
                Outcome::Failed(GuardError::AnyhowWrapper(anyhow!("enforcement task panicked: {}", e)))
            }
        }
    }

    /// Runs one full enforcement attempt against the current index snapshot.
    pub fn enforce(&self, path: &Path) -> Outcome {
        if self.is_ignored(path) {
            debug!("Ignoring {}", path.display());
            return Outcome::Skipped(SkipReason::Ignored);
        }

        // One snapshot for the whole attempt, even if a rebuild lands meanwhile.
        let index = self.registry.snapshot();
        let mut matched: Option<&Template> = None;

        match self.attempt(path, &index, &mut matched) {
            Ok(outcome) => outcome,
            Err(err) => {
                match matched {
                    Some(t) => error!(
                        "Enforcement failed for {} (template '{}'): {}",
                        path.display(),
                        t.name,
                        err
                    ),
                    None => error!("Enforcement failed for {}: {}", path.display(), err),
                }
                let fields = matched.map(|t| t.fingerprint.fields()).unwrap_or_default();
                let mut event = AuditEvent::new(EVENT_ENFORCEMENT_FAILED, path, fields)
                    .with_detail(err.to_string());
                if let Some(t) = matched {
                    event = event.with_template(&t.name);
                }
                self.telemetry.emit(event);
                Outcome::Failed(err)
            }
        }
    }

    fn attempt<'i>(
        &self,
        path: &Path,
        index: &'i TemplateIndex,
        matched: &mut Option<&'i Template>,
    ) -> Result<Outcome, GuardError> {
        if !path.is_file() {
            debug!("{} is gone or not a regular file", path.display());
            return Ok(Outcome::Skipped(SkipReason::Vanished));
        }

        let target_fp = match self.extractor.try_extract(path) {
            Ok(fp) => fp,
            Err(e) if e.is_not_candidate() => {
                info!("Skipping {}: {}", path.display(), e);
                return Ok(Outcome::Skipped(SkipReason::NotCandidate));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(template) = find_match(&target_fp, index) else {
            info!(
                "No template for {} (identity {:?})",
                path.display(),
                target_fp.identity()
            );
            return Ok(Outcome::Skipped(SkipReason::Unmatched));
        };
        *matched = Some(template);

        let canonical = fs::read(&template.path).map_err(|e| GuardError::io(&template.path, e))?;
        let current = fs::read(path).map_err(|e| GuardError::io(path, e))?;
        if canonical == current {
            debug!("{} already matches template '{}'", path.display(), template.name);
            return Ok(Outcome::Skipped(SkipReason::AlreadyCanonical));
        }

        fs::write(path, &canonical).map_err(|e| GuardError::io(path, e))?;
        warn!(
            "Restored {} from template '{}' (identity {:?})",
            path.display(),
            template.name,
            template.fingerprint.identity()
        );

        if self.ledger.record(path)? {
            debug!("Recorded {} in ledger", path.display());
        }

        let fields: BTreeMap<String, String> = template.fingerprint.fields();
        self.telemetry.emit(
            AuditEvent::new(EVENT_TEMPLATE_RESTORED, path, fields).with_template(&template.name),
        );

        Ok(Outcome::Overwritten {
            template: template.name.clone(),
        })
    }
}
