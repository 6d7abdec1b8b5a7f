// canonguard-core/src/telemetry.rs
//! Best-effort delivery of detection and audit events.
//!
//! Enforcement never waits on delivery. Events go into a bounded channel with
//! `try_send`; when the channel is full the event is dropped and counted. A
//! background task drains the channel into an [`AuditSink`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

pub const EVENT_TEMPLATE_RESTORED: &str = "template_restored";
pub const EVENT_ENFORCEMENT_FAILED: &str = "enforcement_failed";

/// One detection/audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: String,
    pub event: String,
    pub path: PathBuf,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub fingerprint: BTreeMap<String, String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(event: &str, path: &Path, fingerprint: BTreeMap<String, String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            event: event.to_string(),
            path: path.to_path_buf(),
            template: None,
            fingerprint,
            detail: None,
        }
    }

    pub fn with_template(mut self, name: &str) -> Self {
        self.template = Some(name.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit events. Failures are logged by the dispatcher and
/// otherwise ignored.
#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &AuditEvent) -> Result<()>;
}

/// Appends each event as one JSON line to a local file.
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn deliver(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("Failed to serialise audit event")?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Writes events to the application log only.
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &AuditEvent) -> Result<()> {
        info!(
            "audit: {} {} template={} fields={:?}",
            event.event,
            event.path.display(),
            event.template.as_deref().unwrap_or("-"),
            event.fingerprint
        );
        Ok(())
    }
}

/// Cloneable, non-blocking handle for emitting audit events.
#[derive(Clone)]
pub struct TelemetryDispatcher {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryDispatcher {
    /// Creates the dispatcher and spawns the task that drains it into `sink`.
    /// The task stops when `shutdown` flips to true or every handle is dropped,
    /// delivering whatever is still queued first.
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        capacity: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => deliver_one(sink.as_ref(), &event).await,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            rx.close();
                            while let Some(event) = rx.recv().await {
                                deliver_one(sink.as_ref(), &event).await;
                            }
                            break;
                        }
                    }
                }
            }
            debug!("Telemetry dispatcher for sink '{}' stopped.", sink.name());
        });

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// A dispatcher whose events go nowhere, for one-shot commands and tests.
    /// Returns the receiver so callers may inspect what was emitted.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Queues an event without blocking. Never fails; a full or closed channel
    /// drops the event.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(ev) => {
                    debug!("Telemetry buffer full, dropped '{}' ({} dropped so far)", ev.event, total)
                }
                mpsc::error::TrySendError::Closed(ev) => {
                    debug!("Telemetry closed, dropped '{}' ({} dropped so far)", ev.event, total)
                }
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn deliver_one(sink: &dyn AuditSink, event: &AuditEvent) {
    if let Err(e) = sink.deliver(event).await {
        warn!("Audit sink '{}' failed to deliver {}: {:#}", sink.name(), event.event_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct RecordingSink {
        seen: StdMutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        async fn deliver(&self, event: &AuditEvent) -> Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_emit_drops_when_full() {
        let (dispatcher, mut rx) = TelemetryDispatcher::detached(1);
        dispatcher.emit(AuditEvent::new(EVENT_TEMPLATE_RESTORED, Path::new("/a.xml"), BTreeMap::new()));
        dispatcher.emit(AuditEvent::new(EVENT_TEMPLATE_RESTORED, Path::new("/b.xml"), BTreeMap::new()));
        assert_eq!(dispatcher.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().path, PathBuf::from("/a.xml"));
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue_on_shutdown() {
        let sink = Arc::new(RecordingSink { seen: StdMutex::new(Vec::new()) });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, handle) = TelemetryDispatcher::spawn(sink.clone(), 8, shutdown_rx);

        for name in ["a", "b", "c"] {
            let path = PathBuf::from(format!("/{name}.xml"));
            dispatcher.emit(AuditEvent::new(EVENT_TEMPLATE_RESTORED, &path, BTreeMap::new()));
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.seen.lock().unwrap().len(), 3);
        assert_eq!(dispatcher.dropped(), 0);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");
        let sink = JsonLinesSink::new(&path);

        let mut fields = BTreeMap::new();
        fields.insert("taxpayer_id".to_string(), "0123456789".to_string());
        let first = AuditEvent::new(EVENT_TEMPLATE_RESTORED, Path::new("/x.xml"), fields)
            .with_template("T1");
        let second = AuditEvent::new(EVENT_ENFORCEMENT_FAILED, Path::new("/y.xml"), BTreeMap::new())
            .with_detail("permission denied");
        sink.deliver(&first).await.unwrap();
        sink.deliver(&second).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<AuditEvent> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![first, second]);
    }
}
