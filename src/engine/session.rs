//! Proctoring session lifecycle and exclusivity.
//!
//! The registry owns every session and enforces at most one Active session
//! per exam attempt. Sessions stay in the registry after ending so analytics
//! and late alert persistence can still resolve them; only the attempt index
//! entry is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::{Result, SessionStateError};
use crate::types::{Modality, ModalitySet, RiskAssessment, RiskLevel, SessionId, SessionStatus};

/// Mutable state of one proctoring session.
#[derive(Debug, Clone)]
pub struct ProctoringSession {
    pub id: SessionId,
    pub attempt_id: String,
    pub assessment_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub modalities: ModalitySet,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Accepted signal counts, indexed by `Modality::index`
    pub signal_counts: [u64; 3],
    /// Running sums of per-modality sub-scores, for analytics averages
    pub sub_score_sums: [f64; 3],
    /// Count of persisted alerts referencing this session
    pub total_alerts: u64,
    /// Set on CRITICAL level or any override condition
    pub is_flagged: bool,
    /// Current fused risk view
    pub risk: RiskAssessment,
    /// Instant of the last accepted signal (or session start)
    pub last_activity: Instant,
    /// A presence-loss alert has been raised for the current quiet period
    pub presence_warned: bool,
}

impl ProctoringSession {
    fn new(
        attempt_id: &str,
        assessment_id: &str,
        user_id: &str,
        modalities: ModalitySet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id: attempt_id.to_string(),
            assessment_id: assessment_id.to_string(),
            user_id: user_id.to_string(),
            status: SessionStatus::Active,
            modalities,
            started_at: Utc::now(),
            ended_at: None,
            signal_counts: [0; 3],
            sub_score_sums: [0.0; 3],
            total_alerts: 0,
            is_flagged: false,
            risk: RiskAssessment::default(),
            last_activity: Instant::now(),
            presence_warned: false,
        }
    }

    /// Record an accepted signal: refresh activity and accumulate analytics.
    pub fn touch(&mut self, modality: Modality, assessment: RiskAssessment) {
        self.last_activity = Instant::now();
        self.presence_warned = false;
        self.signal_counts[modality.index()] += 1;
        self.sub_score_sums[modality.index()] += assessment.sub_scores[modality.index()];
        self.risk = assessment;
    }

    pub fn total_signals(&self) -> u64 {
        self.signal_counts.iter().sum()
    }
}

/// Final summary returned when a session ends.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub attempt_id: String,
    pub status: SessionStatus,
    pub final_level: RiskLevel,
    pub total_alerts: u64,
    pub total_signals: u64,
    pub duration_secs: i64,
    pub is_flagged: bool,
}

/// Snapshot of one active session for the inactivity sweep.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    pub session_id: SessionId,
    pub last_activity: Instant,
    pub presence_warned: bool,
}

/// Owns session lifecycle and the one-active-session-per-attempt invariant.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<ProctoringSession>>>>,
    /// attempt id -> active session id
    active_by_attempt: RwLock<HashMap<String, SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring an exam attempt.
    ///
    /// # Errors
    /// `DuplicateSession` if the attempt already has an Active session.
    pub fn start(
        &self,
        attempt_id: &str,
        assessment_id: &str,
        user_id: &str,
        modalities: ModalitySet,
    ) -> Result<SessionId> {
        let mut index = self.active_by_attempt.write().unwrap();
        if index.contains_key(attempt_id) {
            return Err(SessionStateError::DuplicateSession(attempt_id.to_string()).into());
        }

        let session = ProctoringSession::new(attempt_id, assessment_id, user_id, modalities);
        let id = session.id;
        index.insert(attempt_id.to_string(), id);
        self.sessions
            .write()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(session)));

        tracing::info!(
            target: "proctor_engine::session",
            session_id = %id,
            attempt_id,
            user_id,
            "monitoring started"
        );
        Ok(id)
    }

    /// Look up a session (any status).
    pub fn get(&self, session_id: SessionId) -> Result<Arc<Mutex<ProctoringSession>>> {
        self.sessions
            .read()
            .unwrap()
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SessionStateError::NotFound(session_id).into())
    }

    /// Move a session to a terminal state and release its attempt slot.
    ///
    /// Lock order: no path may hold a session mutex while taking a registry
    /// lock, so the attempt index is only touched after the session mutex is
    /// released. The entry cannot belong to a newer session: `start` refuses
    /// the attempt until this removal lands.
    ///
    /// # Errors
    /// `SessionNotFound` / `SessionAlreadyEnded`.
    pub fn end(&self, session_id: SessionId, status: SessionStatus) -> Result<SessionSummary> {
        debug_assert!(status.is_terminal());
        let handle = self.get(session_id)?;
        let summary = {
            let mut session = handle.lock().unwrap();
            if session.status.is_terminal() {
                return Err(SessionStateError::AlreadyEnded(session_id).into());
            }

            let now = Utc::now();
            session.status = status;
            session.ended_at = Some(now);

            SessionSummary {
                session_id,
                attempt_id: session.attempt_id.clone(),
                status,
                final_level: session.risk.level,
                total_alerts: session.total_alerts,
                total_signals: session.total_signals(),
                duration_secs: (now - session.started_at).num_seconds(),
                is_flagged: session.is_flagged,
            }
        };
        self.active_by_attempt
            .write()
            .unwrap()
            .remove(&summary.attempt_id);

        tracing::info!(
            target: "proctor_engine::session",
            session_id = %session_id,
            status = %status,
            final_level = %summary.final_level,
            total_alerts = summary.total_alerts,
            "monitoring ended"
        );
        Ok(summary)
    }

    /// Consistent snapshot of active sessions for the inactivity sweep.
    ///
    /// The map guard is dropped before any per-session mutex is taken, so
    /// this never closes a lock cycle with `start`/`end`.
    pub fn sweep_snapshot(&self) -> Vec<SweepEntry> {
        let handles = self.all_handles();
        handles
            .iter()
            .filter_map(|handle| {
                let session = handle.lock().unwrap();
                (session.status == SessionStatus::Active).then(|| SweepEntry {
                    session_id: session.id,
                    last_activity: session.last_activity,
                    presence_warned: session.presence_warned,
                })
            })
            .collect()
    }

    /// Sessions linked to an assessment (any status).
    pub fn sessions_for_assessment(
        &self,
        assessment_id: &str,
    ) -> Vec<Arc<Mutex<ProctoringSession>>> {
        self.all_handles()
            .into_iter()
            .filter(|h| h.lock().unwrap().assessment_id == assessment_id)
            .collect()
    }

    fn all_handles(&self) -> Vec<Arc<Mutex<ProctoringSession>>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Number of sessions currently Active.
    pub fn active_count(&self) -> usize {
        self.active_by_attempt.read().unwrap().len()
    }
}
