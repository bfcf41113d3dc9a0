//! Append-only persistence seams.
//!
//! The engine writes signal records and alerts through these traits so a real
//! backing store can be swapped in without touching the decision path. The
//! in-memory implementations back tests and single-process deployments.

use std::sync::{Arc, RwLock};

use crate::errors::{Error, Result};
use crate::types::{Alert, AlertId, SignalRecord, SessionId};

/// Append-only store for accepted signal records (audit/replay).
pub trait SignalStore: Send + Sync {
    /// Append an accepted record. Failures fail the ingest call.
    fn append(&self, record: &SignalRecord) -> Result<()>;

    /// All records for a session, in acceptance order.
    fn for_session(&self, session_id: SessionId) -> Vec<SignalRecord>;
}

/// Append-only alert log. Rows are immutable except the review fields.
pub trait AlertStore: Send + Sync {
    /// Append an alert row.
    fn append(&self, alert: &Alert) -> Result<()>;

    /// Alerts for a session, optionally filtered by review state.
    fn for_session(&self, session_id: SessionId, reviewed: Option<bool>) -> Vec<Alert>;

    /// Mark an alert reviewed. Only the review fields change.
    fn update_review(&self, alert_id: AlertId, reviewer_id: &str, action_taken: &str)
        -> Result<()>;
}

/// In-memory signal store.
#[derive(Default)]
pub struct InMemorySignalStore {
    records: Arc<RwLock<Vec<SignalRecord>>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SignalStore for InMemorySignalStore {
    fn append(&self, record: &SignalRecord) -> Result<()> {
        self.records.write().unwrap().push(record.clone());
        Ok(())
    }

    fn for_session(&self, session_id: SessionId) -> Vec<SignalRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }
}

/// In-memory alert log.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Arc<RwLock<Vec<Alert>>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alerts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertStore for InMemoryAlertStore {
    fn append(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().unwrap().push(alert.clone());
        Ok(())
    }

    fn for_session(&self, session_id: SessionId, reviewed: Option<bool>) -> Vec<Alert> {
        self.alerts
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.session_id == session_id)
            .filter(|a| reviewed.map_or(true, |r| a.reviewed == r))
            .cloned()
            .collect()
    }

    fn update_review(
        &self,
        alert_id: AlertId,
        reviewer_id: &str,
        action_taken: &str,
    ) -> Result<()> {
        let mut alerts = self.alerts.write().unwrap();
        match alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.review(reviewer_id, action_taken);
                Ok(())
            }
            None => Err(Error::persistence(format!("alert {alert_id} not found"))),
        }
    }
}
