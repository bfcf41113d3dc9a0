//! Engine facade: wiring, the ingestion path, and the inactivity sweep.
//!
//! Per-session ordering comes from the session mutex held across the whole
//! ingestion path; callers on different sessions never contend. The decision
//! path (validate, evaluate, persist, fuse) is synchronous; only alert
//! persistence and notification run behind it on the pipeline task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::engine::access::Caller;
use crate::engine::alerts::{AlertManager, LoggingNotifier, Notifier};
use crate::engine::analytics::{AnalyticsReporter, AssessmentReport, SessionReport};
use crate::engine::config::EngineConfig;
use crate::engine::ingest::SignalIngestor;
use crate::engine::risk::{RiskAggregator, RiskEvent};
use crate::engine::session::{SessionRegistry, SessionSummary};
use crate::engine::store::{
    AlertStore, InMemoryAlertStore, InMemorySignalStore, SignalStore,
};
use crate::errors::{Error, Result, SessionStateError};
use crate::types::{
    Alert, AlertId, AlertType, ModalitySet, RiskAssessment, SessionId, SignalRecord,
    SessionStatus,
};

fn epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// The proctoring integrity engine.
///
/// Construct with [`ProctorEngine::new`] inside a tokio runtime; the alert
/// pipeline and the inactivity sweep are spawned at construction.
pub struct ProctorEngine {
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    ingestor: Arc<SignalIngestor>,
    risk: Arc<RiskAggregator>,
    alerts: Arc<AlertManager>,
    reporter: AnalyticsReporter,
    signals: Arc<dyn SignalStore>,
    alert_store: Arc<dyn AlertStore>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl ProctorEngine {
    /// Build an engine with in-memory stores and the logging notifier.
    ///
    /// # Errors
    /// `Config` when weights or thresholds are invalid; the engine refuses
    /// to start rather than score with a bad configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(InMemorySignalStore::new()),
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(LoggingNotifier),
        )
    }

    /// Build an engine over caller-supplied stores and notifier.
    pub fn with_parts(
        config: EngineConfig,
        signals: Arc<dyn SignalStore>,
        alert_store: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let registry = Arc::new(SessionRegistry::new());
        let ingestor = Arc::new(SignalIngestor::new(config.indicators.clone()));
        let risk = Arc::new(RiskAggregator::new(config.fusion.clone()));
        let alerts = Arc::new(AlertManager::new(
            config.alerts.clone(),
            alert_store.clone(),
            registry.clone(),
            notifier,
        ));
        let reporter =
            AnalyticsReporter::new(registry.clone(), alert_store.clone(), alerts.clone());

        let sweep = tokio::spawn(run_sweep(
            config.clone(),
            registry.clone(),
            ingestor.clone(),
            risk.clone(),
            alerts.clone(),
        ));

        tracing::info!(
            target: "proctor_engine::engine",
            half_life_secs = config.fusion.half_life_secs,
            inactivity_window_secs = config.session.inactivity_window_secs,
            "engine started"
        );

        Ok(Self {
            config,
            registry,
            ingestor,
            risk,
            alerts,
            reporter,
            signals,
            alert_store,
            sweep: Mutex::new(Some(sweep)),
        })
    }

    /// Start monitoring an exam attempt.
    pub fn start_monitoring(
        &self,
        caller: &Caller,
        attempt_id: &str,
        assessment_id: &str,
        user_id: &str,
        modalities: ModalitySet,
    ) -> Result<SessionId> {
        if !caller.can_control(user_id) {
            return Err(Error::forbidden("cannot start monitoring for this user"));
        }
        if modalities.is_empty() {
            return Err(Error::validation(
                "at least one modality must be monitored",
            ));
        }
        self.registry
            .start(attempt_id, assessment_id, user_id, modalities)
    }

    /// End monitoring and return the final summary.
    pub fn end_monitoring(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> Result<SessionSummary> {
        self.check_view(caller, session_id, "end")?;
        let summary = self.registry.end(session_id, SessionStatus::Ended)?;
        self.ingestor.remove_session(session_id);
        self.risk.remove_session(session_id);
        Ok(summary)
    }

    /// Ingest one measurement record and return the updated assessment.
    ///
    /// # Errors
    /// `Forbidden` for non-service callers, `Validation` for malformed
    /// records or unmonitored modalities, `OutOfOrderSignal` for stale
    /// records (dropped, no state change), `Persistence` when the signal
    /// store rejects the append.
    pub fn ingest(&self, caller: &Caller, record: &SignalRecord) -> Result<RiskAssessment> {
        if !caller.can_ingest() {
            return Err(Error::forbidden("only services may push signals"));
        }
        self.ingestor.validate(record)?;

        let handle = self.registry.get(record.session_id)?;
        let mut session = handle.lock().unwrap();
        if session.status != SessionStatus::Active {
            return Err(SessionStateError::NotActive(record.session_id).into());
        }
        let modality = record.modality();
        if !session.modalities.contains(modality) {
            return Err(Error::validation(format!(
                "modality {modality} is not monitored by this session"
            )));
        }

        let outcome = self.ingestor.evaluate(record)?;

        // The audit record lands before any score moves; a failed append
        // fails the call with nothing half-applied.
        self.signals.append(record)?;

        let update = self.risk.apply(
            record.session_id,
            session.modalities,
            &outcome,
            record.timestamp_ms,
        );
        session.touch(modality, update.assessment);
        drop(session);

        for event in &update.events {
            self.alerts.handle_event(event);
        }
        Ok(update.assessment)
    }

    /// Current decayed assessment without ingesting anything.
    pub fn current_assessment(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> Result<RiskAssessment> {
        self.check_view(caller, session_id, "view")?;
        let handle = self.registry.get(session_id)?;
        let modalities = handle.lock().unwrap().modalities;
        Ok(self.risk.assessment(session_id, modalities, epoch_ms()))
    }

    /// Integrity report for one session.
    pub fn session_report(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> Result<SessionReport> {
        self.check_view(caller, session_id, "view")?;
        self.reporter.session_report(session_id)
    }

    /// Cross-session rollup for an assessment. Staff only.
    pub fn assessment_report(
        &self,
        caller: &Caller,
        assessment_id: &str,
    ) -> Result<AssessmentReport> {
        if !caller.can_review() {
            return Err(Error::forbidden("assessment reports are staff-only"));
        }
        Ok(self.reporter.assessment_report(assessment_id))
    }

    /// Alerts for a session, optionally filtered by review state.
    pub fn alerts(
        &self,
        caller: &Caller,
        session_id: SessionId,
        reviewed: Option<bool>,
    ) -> Result<Vec<Alert>> {
        self.check_view(caller, session_id, "view")?;
        Ok(self.alert_store.for_session(session_id, reviewed))
    }

    /// Mark an alert reviewed. Staff only.
    pub fn review_alert(
        &self,
        caller: &Caller,
        alert_id: AlertId,
        reviewer_id: &str,
        action_taken: &str,
    ) -> Result<()> {
        if !caller.can_review() {
            return Err(Error::forbidden("alert review is staff-only"));
        }
        self.alert_store
            .update_review(alert_id, reviewer_id, action_taken)
    }

    /// Accepted signal records for a session, in acceptance order.
    pub fn session_signals(
        &self,
        caller: &Caller,
        session_id: SessionId,
    ) -> Result<Vec<SignalRecord>> {
        self.check_view(caller, session_id, "view")?;
        Ok(self.signals.for_session(session_id))
    }

    /// Wait until every alert enqueued so far is persisted.
    pub async fn flush_alerts(&self) {
        self.alerts.flush().await;
    }

    /// Stop the sweep and drain the alert pipeline.
    pub async fn shutdown(&self) {
        let sweep = self.sweep.lock().unwrap().take();
        if let Some(sweep) = sweep {
            sweep.abort();
            let _ = sweep.await;
        }
        self.alerts.shutdown().await;
        tracing::info!(target: "proctor_engine::engine", "engine stopped");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn check_view(&self, caller: &Caller, session_id: SessionId, what: &str) -> Result<()> {
        let handle = self.registry.get(session_id)?;
        let owner = handle.lock().unwrap().user_id.clone();
        if !caller.can_view(&owner) {
            return Err(Error::forbidden(format!(
                "cannot {what} another user's session"
            )));
        }
        Ok(())
    }
}

/// Background inactivity sweep.
///
/// A quiet session gets one presence-loss alert at the half-window mark and
/// is terminated once the full window elapses with no accepted signal.
async fn run_sweep(
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    ingestor: Arc<SignalIngestor>,
    risk: Arc<RiskAggregator>,
    alerts: Arc<AlertManager>,
) {
    let window = Duration::from_secs(config.session.inactivity_window_secs);
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.session.sweep_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        for entry in registry.sweep_snapshot() {
            let quiet = entry.last_activity.elapsed();
            if quiet >= window {
                match registry.end(entry.session_id, SessionStatus::Terminated) {
                    Ok(summary) => {
                        tracing::warn!(
                            target: "proctor_engine::engine",
                            session_id = %entry.session_id,
                            quiet_secs = quiet.as_secs(),
                            final_level = %summary.final_level,
                            "session terminated for inactivity"
                        );
                        ingestor.remove_session(entry.session_id);
                        risk.remove_session(entry.session_id);
                    }
                    // Lost the race with a concurrent end; nothing to do.
                    Err(_) => continue,
                }
            } else if quiet >= window / 2 && !entry.presence_warned {
                let Ok(handle) = registry.get(entry.session_id) else {
                    continue;
                };
                let modalities = {
                    let mut session = handle.lock().unwrap();
                    if session.presence_warned || session.status != SessionStatus::Active {
                        continue;
                    }
                    session.presence_warned = true;
                    session.modalities
                };
                let assessment = risk.assessment(entry.session_id, modalities, epoch_ms());
                alerts.handle_event(&RiskEvent::Condition {
                    session_id: entry.session_id,
                    alert_type: AlertType::PresenceLoss,
                    combined: assessment.combined,
                    timestamp_ms: epoch_ms(),
                });
            }
        }
    }
}
