// canonguard/src/commands/watch.rs
//! The long-running agent: index, ledger, audit sink, optional template sync,
//! filesystem watcher and event dispatcher, all stopped by Ctrl-C.

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use canonguard_core::{
    spawn_dispatcher, spawn_sync_loop, start_watching, AuditSink, DirectoryMirror, Enforcer,
    GuardConfig, JsonLinesSink, ProcessedLedger, TelemetryDispatcher, TemplateRegistry,
    TemplateSource,
};

use crate::output;

const EVENT_QUEUE_CAPACITY: usize = 1024;

pub async fn run_watch(config: GuardConfig) -> Result<()> {
    let template_dir = config.template_dir();
    std::fs::create_dir_all(&template_dir)
        .with_context(|| format!("Failed to create template directory {}", template_dir.display()))?;

    let registry = Arc::new(TemplateRegistry::new(&template_dir, config.schema.clone()));
    if registry.snapshot().is_empty() {
        output::warn_msg(format!(
            "No templates in {}; documents will only be observed.",
            template_dir.display()
        ));
    }
    let ledger = Arc::new(ProcessedLedger::load(config.ledger_path()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sink: Arc<dyn AuditSink> = Arc::new(JsonLinesSink::new(config.audit_path()));
    let (telemetry, telemetry_task) =
        TelemetryDispatcher::spawn(sink, config.telemetry_buffer, shutdown_rx.clone());

    let sync_task = match &config.sync.source_dir {
        Some(source_dir) => {
            info!("Mirroring templates from {}", source_dir.display());
            let source: Arc<dyn TemplateSource> =
                Arc::new(DirectoryMirror::new(source_dir, config.schema.clone()));
            Some(spawn_sync_loop(
                source,
                Arc::clone(&registry),
                config.sync_interval(),
                shutdown_rx.clone(),
            ))
        }
        None => None,
    };

    let enforcer = Arc::new(Enforcer::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        telemetry.clone(),
        config.ignored_dirs(),
        config.settle_delay(),
    ));

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let roots = config.effective_watch_roots();
    let watch_handle = start_watching(&roots, config.schema.clone(), event_tx)
        .context("Failed to start watching")?;
    let dispatcher = spawn_dispatcher(enforcer, event_rx, shutdown_rx);

    output::info_msg(format!(
        "Watching {} root(s) with {} template(s). Press Ctrl-C to stop.",
        watch_handle.watched_roots().len(),
        registry.snapshot().len()
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested.");

    drop(watch_handle);
    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher.await {
        warn!("Event dispatcher ended abnormally: {}", e);
    }
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            warn!("Template sync loop ended abnormally: {}", e);
        }
    }
    let dropped = telemetry.dropped();
    drop(telemetry);
    if let Err(e) = telemetry_task.await {
        warn!("Telemetry dispatcher ended abnormally: {}", e);
    }

    output::info_msg(format!(
        "Stopped. {} path(s) in the ledger, {} audit event(s) dropped.",
        ledger.len(),
        dropped
    ));
    Ok(())
}
