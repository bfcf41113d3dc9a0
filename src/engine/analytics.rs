//! Read-only reporting over live session state and the persisted logs.
//!
//! Reports are computed on demand from the registry and stores; nothing here
//! mutates engine state, so a report request can never perturb scoring.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::alerts::AlertManager;
use crate::engine::session::SessionRegistry;
use crate::engine::store::AlertStore;
use crate::errors::Result;
use crate::types::{AlertType, Modality, RiskLevel, SessionId, SessionStatus};

/// Per-modality ingestion and scoring stats for one session.
#[derive(Debug, Clone, Serialize)]
pub struct ModalityStats {
    pub signals: u64,
    /// Mean sub-score over accepted signals, 0.0 when none arrived
    pub avg_sub_score: f64,
}

/// Integrity report for a single session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub attempt_id: String,
    pub assessment_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub risk_level: RiskLevel,
    pub combined_score: f64,
    pub modality_stats: HashMap<Modality, ModalityStats>,
    pub total_alerts: u64,
    pub alerts_by_type: HashMap<AlertType, u64>,
    pub unreviewed_alerts: u64,
    pub suppressed_by_type: HashMap<AlertType, u64>,
    pub is_flagged: bool,
}

/// Cross-session rollup for one assessment.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub assessment_id: String,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub flagged_sessions: usize,
    pub total_alerts: u64,
    pub alerts_by_type: HashMap<AlertType, u64>,
    /// Sessions per current risk level
    pub level_distribution: HashMap<RiskLevel, usize>,
    /// Mean combined score across sessions, 0.0 when there are none
    pub avg_combined_score: f64,
}

/// Computes reports. Holds only shared read handles.
pub struct AnalyticsReporter {
    registry: Arc<SessionRegistry>,
    alerts: Arc<dyn AlertStore>,
    manager: Arc<AlertManager>,
}

impl AnalyticsReporter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        alerts: Arc<dyn AlertStore>,
        manager: Arc<AlertManager>,
    ) -> Self {
        Self {
            registry,
            alerts,
            manager,
        }
    }

    /// Full report for one session.
    ///
    /// # Errors
    /// `SessionNotFound` for unknown ids.
    pub fn session_report(&self, session_id: SessionId) -> Result<SessionReport> {
        let handle = self.registry.get(session_id)?;
        let session = handle.lock().unwrap().clone();

        let mut modality_stats = HashMap::new();
        for modality in Modality::ALL {
            let signals = session.signal_counts[modality.index()];
            let avg = if signals > 0 {
                session.sub_score_sums[modality.index()] / signals as f64
            } else {
                0.0
            };
            modality_stats.insert(
                modality,
                ModalityStats {
                    signals,
                    avg_sub_score: avg,
                },
            );
        }

        let rows = self.alerts.for_session(session_id, None);
        let mut alerts_by_type: HashMap<AlertType, u64> = HashMap::new();
        let mut unreviewed = 0;
        for alert in &rows {
            *alerts_by_type.entry(alert.alert_type).or_insert(0) += 1;
            if !alert.reviewed {
                unreviewed += 1;
            }
        }

        Ok(SessionReport {
            session_id,
            attempt_id: session.attempt_id,
            assessment_id: session.assessment_id,
            user_id: session.user_id,
            status: session.status,
            started_at: session.started_at,
            ended_at: session.ended_at,
            risk_level: session.risk.level,
            combined_score: session.risk.combined,
            modality_stats,
            total_alerts: session.total_alerts,
            alerts_by_type,
            unreviewed_alerts: unreviewed,
            suppressed_by_type: self.manager.suppressed_counts(session_id),
            is_flagged: session.is_flagged,
        })
    }

    /// Rollup across every session of an assessment, any status.
    pub fn assessment_report(&self, assessment_id: &str) -> AssessmentReport {
        let handles = self.registry.sessions_for_assessment(assessment_id);

        let mut report = AssessmentReport {
            assessment_id: assessment_id.to_string(),
            total_sessions: handles.len(),
            active_sessions: 0,
            flagged_sessions: 0,
            total_alerts: 0,
            alerts_by_type: HashMap::new(),
            level_distribution: HashMap::new(),
            avg_combined_score: 0.0,
        };

        let mut combined_sum = 0.0;
        for handle in &handles {
            let session = handle.lock().unwrap();
            if session.status == SessionStatus::Active {
                report.active_sessions += 1;
            }
            if session.is_flagged {
                report.flagged_sessions += 1;
            }
            report.total_alerts += session.total_alerts;
            *report
                .level_distribution
                .entry(session.risk.level)
                .or_insert(0) += 1;
            combined_sum += session.risk.combined;

            for alert in self.alerts.for_session(session.id, None) {
                *report.alerts_by_type.entry(alert.alert_type).or_insert(0) += 1;
            }
        }
        if !handles.is_empty() {
            report.avg_combined_score = combined_sum / handles.len() as f64;
        }
        report
    }
}
