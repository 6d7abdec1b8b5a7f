// canonguard/src/commands/check.rs
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use canonguard_core::{
    AuditSink, Enforcer, GuardConfig, JsonLinesSink, Outcome, ProcessedLedger, TelemetryDispatcher,
    TemplateRegistry,
};

use crate::output;

/// Runs one enforcement attempt on `file` right away and prints the outcome.
/// The attempt is recorded in the ledger and audit log like any watched event.
pub async fn run_check(config: &GuardConfig, file: &Path) -> Result<()> {
    let registry = Arc::new(TemplateRegistry::new(config.template_dir(), config.schema.clone()));
    let ledger = Arc::new(ProcessedLedger::load(config.ledger_path()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sink: Arc<dyn AuditSink> = Arc::new(JsonLinesSink::new(config.audit_path()));
    let (telemetry, telemetry_task) =
        TelemetryDispatcher::spawn(sink, config.telemetry_buffer, shutdown_rx);

    let enforcer = Arc::new(Enforcer::new(
        registry,
        ledger,
        telemetry,
        config.ignored_dirs(),
        Duration::ZERO,
    ));
    let target = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    let outcome = enforcer.enforce_after_settle(target).await;

    let _ = shutdown_tx.send(true);
    let _ = telemetry_task.await;

    match outcome {
        Outcome::Failed(e) => {
            Err(anyhow::Error::new(e).context(format!("{}: enforcement failed", file.display())))
        }
        other => {
            println!("{}: {}", file.display(), other);
            if other.is_overwritten() {
                output::warn_msg(format!("{} was restored from its template", file.display()));
            }
            Ok(())
        }
    }
}
