//! Alert creation, deduplication, and asynchronous persistence.
//!
//! The manager decides synchronously (cheap map lookup) whether an event
//! becomes an alert, then hands the row to a spawned pipeline task so a slow
//! store or notifier never adds latency to the ingestion path. The alert row
//! insert and the session alert-counter increment are one unit: the counter
//! moves only after the row is durably appended, and a row that exhausts its
//! retries leaves the counter untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::config::AlertConfig;
use crate::engine::risk::RiskEvent;
use crate::engine::session::SessionRegistry;
use crate::engine::store::AlertStore;
use crate::types::{Alert, AlertSeverity, AlertType, RiskLevel, SessionId};

/// External proctor-escalation collaborator. Fire-and-forget, at-least-once.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert);
}

/// Default notifier: structured log lines at severity-appropriate levels.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Low | AlertSeverity::Medium => {
                tracing::info!(
                    target: "proctor_engine::alerts",
                    session_id = %alert.session_id,
                    alert_type = alert.alert_type.as_str(),
                    "{}",
                    alert.message
                );
            }
            AlertSeverity::High => {
                tracing::warn!(
                    target: "proctor_engine::alerts",
                    session_id = %alert.session_id,
                    alert_type = alert.alert_type.as_str(),
                    "{}",
                    alert.message
                );
            }
            AlertSeverity::Critical => {
                tracing::error!(
                    target: "proctor_engine::alerts",
                    session_id = %alert.session_id,
                    alert_type = alert.alert_type.as_str(),
                    "CRITICAL: {}",
                    alert.message
                );
            }
        }
    }
}

enum PipelineJob {
    Persist {
        alert: Alert,
        /// Set `is_flagged` and notify the proctor once persisted
        escalate: bool,
    },
    /// Test/ops hook: ack once every job enqueued before it has completed
    Flush(oneshot::Sender<()>),
}

/// (session, type) -> trigger timestamp of the last alert sent to the store.
type CooldownMap = HashMap<(SessionId, AlertType), u64>;

/// Converts risk events into deduplicated, persisted alerts.
///
/// The cooldown and suppression maps are retained after a session ends so
/// post-session reports can still account for suppressed events; like the
/// append-only stores, they live for the life of the process.
pub struct AlertManager {
    config: AlertConfig,
    next_id: AtomicU64,
    /// Stamped optimistically at enqueue time; the pipeline clears the stamp
    /// if the row is abandoned, reopening the window for the next event.
    last_alert: Arc<RwLock<CooldownMap>>,
    /// (session, type) -> events suppressed inside the cooldown window
    suppressed: RwLock<HashMap<(SessionId, AlertType), u64>>,
    tx: Mutex<Option<mpsc::UnboundedSender<PipelineJob>>>,
    pipeline: Mutex<Option<JoinHandle<()>>>,
}

impl AlertManager {
    /// Create the manager and spawn its persistence pipeline.
    pub fn new(
        config: AlertConfig,
        store: Arc<dyn AlertStore>,
        registry: Arc<SessionRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let last_alert = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = tokio::spawn(run_pipeline(
            config.clone(),
            store,
            registry,
            notifier,
            Arc::clone(&last_alert),
            rx,
        ));
        Self {
            config,
            next_id: AtomicU64::new(1),
            last_alert,
            suppressed: RwLock::new(HashMap::new()),
            tx: Mutex::new(Some(tx)),
            pipeline: Mutex::new(Some(pipeline)),
        }
    }

    /// Handle one forwarded risk event. Never blocks on the store.
    pub fn handle_event(&self, event: &RiskEvent) {
        // A committed-level change flags the session only on CRITICAL; an
        // override condition flags whenever its type is dispositive.
        let (session_id, alert_type, severity, escalate, message, trigger_ts) = match event {
            RiskEvent::LevelChanged {
                session_id,
                from,
                to,
                combined,
                alert_type,
                timestamp_ms,
            } => (
                *session_id,
                *alert_type,
                to.severity(),
                *to == RiskLevel::Critical,
                format!("risk level {from} -> {to} (combined {combined:.3})"),
                *timestamp_ms,
            ),
            RiskEvent::Condition {
                session_id,
                alert_type,
                combined,
                timestamp_ms,
            } => (
                *session_id,
                *alert_type,
                alert_type.default_severity(),
                alert_type.is_override(),
                format!("{} condition (combined {combined:.3})", alert_type.as_str()),
                *timestamp_ms,
            ),
        };

        if self.should_suppress(session_id, alert_type, trigger_ts) {
            *self
                .suppressed
                .write()
                .unwrap()
                .entry((session_id, alert_type))
                .or_insert(0) += 1;
            tracing::debug!(
                target: "proctor_engine::alerts",
                session_id = %session_id,
                alert_type = alert_type.as_str(),
                "duplicate alert suppressed inside cooldown"
            );
            return;
        }
        self.last_alert
            .write()
            .unwrap()
            .insert((session_id, alert_type), trigger_ts);

        let alert = Alert::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
            session_id,
            alert_type,
            severity,
            message,
            trigger_ts,
        );
        self.enqueue(PipelineJob::Persist { alert, escalate });
    }

    /// Events suppressed per (session, type) inside cooldown windows.
    pub fn suppressed_counts(&self, session_id: SessionId) -> HashMap<AlertType, u64> {
        self.suppressed
            .read()
            .unwrap()
            .iter()
            .filter(|((s, _), _)| *s == session_id)
            .map(|((_, t), count)| (*t, *count))
            .collect()
    }

    /// Wait for every job enqueued so far to complete.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(PipelineJob::Flush(ack_tx));
        // Pipeline gone means nothing left to wait for
        let _ = ack_rx.await;
    }

    /// Stop the pipeline after draining queued jobs.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let handle = self.pipeline.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn should_suppress(&self, session_id: SessionId, alert_type: AlertType, ts: u64) -> bool {
        let last = self.last_alert.read().unwrap();
        last.get(&(session_id, alert_type))
            .is_some_and(|prev| ts.saturating_sub(*prev) < self.config.cooldown_ms)
    }

    fn enqueue(&self, job: PipelineJob) {
        let tx = self.tx.lock().unwrap();
        if let Some(tx) = tx.as_ref() {
            // Receiver only drops at shutdown; a lost job there is accepted
            let _ = tx.send(job);
        }
    }
}

/// Pipeline task: persist rows with bounded backoff, then increment the
/// owning session's counter and dispatch escalations.
async fn run_pipeline(
    config: AlertConfig,
    store: Arc<dyn AlertStore>,
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
    last_alert: Arc<RwLock<CooldownMap>>,
    mut rx: mpsc::UnboundedReceiver<PipelineJob>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            PipelineJob::Persist { alert, escalate } => {
                if !persist_with_retry(&config, store.as_ref(), &alert).await {
                    // Abandoned row: reopen the cooldown so the condition is
                    // not silenced with zero rows persisted. The stamp may
                    // have been replaced by a later alert; only clear our own.
                    let key = (alert.session_id, alert.alert_type);
                    let mut stamps = last_alert.write().unwrap();
                    if stamps.get(&key) == Some(&alert.trigger_timestamp_ms) {
                        stamps.remove(&key);
                    }
                    drop(stamps);
                    tracing::error!(
                        target: "proctor_engine::alerts",
                        session_id = %alert.session_id,
                        alert_type = alert.alert_type.as_str(),
                        "alert dropped after {} retries",
                        config.max_retries
                    );
                    continue;
                }

                // Row is durable: now move the counter, as one unit with it.
                if let Ok(handle) = registry.get(alert.session_id) {
                    let mut session = handle.lock().unwrap();
                    session.total_alerts += 1;
                    if escalate {
                        session.is_flagged = true;
                    }
                }
                if escalate {
                    notifier.notify(&alert).await;
                }
            }
            PipelineJob::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn persist_with_retry(config: &AlertConfig, store: &dyn AlertStore, alert: &Alert) -> bool {
    for attempt in 0..=config.max_retries {
        match store.append(alert) {
            Ok(()) => return true,
            Err(err) => {
                if attempt == config.max_retries {
                    return false;
                }
                let delay = backoff_delay(config, attempt);
                tracing::warn!(
                    target: "proctor_engine::alerts",
                    alert_id = alert.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "alert persistence failed, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    false
}

/// Exponential backoff with jitter.
fn backoff_delay(config: &AlertConfig, attempt: u32) -> Duration {
    let base = config.retry_initial_delay_ms as f64
        * config.retry_backoff_multiplier.powi(attempt as i32);
    let jitter = rand::thread_rng()
        .gen_range(1.0 - config.retry_jitter..=1.0 + config.retry_jitter);
    Duration::from_millis((base * jitter) as u64)
}
