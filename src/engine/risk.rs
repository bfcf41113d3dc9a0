//! Decayed, weighted risk fusion and level commitment.
//!
//! Per modality the score follows an exponential decay toward zero between
//! updates and a diminishing-returns accumulation on each indicator, so
//! repeated minor violations cannot exceed 1.0:
//!
//! ```text
//! score = score_prev * exp(-elapsed / half_life)
//! score = min(1, score + (1 - score) * indicator)
//! ```
//!
//! The combined score is the weighted sum over the session's enabled
//! modalities, with weights renormalized over that set. The recorded level
//! only moves when the combined score crosses a band boundary by more than
//! the hysteresis margin in the direction of travel; a detected spoof sets
//! the level to CRITICAL outright.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::engine::config::FusionConfig;
use crate::engine::ingest::IndicatorOutcome;
use crate::types::{AlertType, Modality, ModalitySet, RiskAssessment, RiskLevel, SessionId};

/// Domain events forwarded to the alert manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskEvent {
    /// The recorded level changed (hysteresis already applied).
    LevelChanged {
        session_id: SessionId,
        from: RiskLevel,
        to: RiskLevel,
        combined: f64,
        /// Alert type to record for this change: the triggering override's
        /// type when there is one, else derived from the dominant modality
        alert_type: AlertType,
        timestamp_ms: u64,
    },
    /// An override condition fired, independent of the decayed score.
    Condition {
        session_id: SessionId,
        alert_type: AlertType,
        combined: f64,
        timestamp_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct ModalityScore {
    score: f64,
    last_update_ms: Option<u64>,
}

impl ModalityScore {
    /// Decay-only view of the score at `now_ms`.
    fn decayed(&self, now_ms: u64, half_life_secs: f64) -> f64 {
        match self.last_update_ms {
            Some(last) => {
                let elapsed_s = now_ms.saturating_sub(last) as f64 / 1_000.0;
                self.score * (-elapsed_s / half_life_secs).exp()
            }
            None => self.score,
        }
    }
}

#[derive(Debug, Default)]
struct SessionScores {
    scores: [ModalityScore; 3],
    committed: RiskLevel,
}

/// Result of applying one indicator.
#[derive(Debug, Clone)]
pub struct RiskUpdate {
    pub assessment: RiskAssessment,
    pub events: Vec<RiskEvent>,
}

/// Maintains the decayed, weighted risk score and recorded level per session.
pub struct RiskAggregator {
    config: FusionConfig,
    states: RwLock<HashMap<SessionId, SessionScores>>,
}

impl RiskAggregator {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Apply one violation indicator and recompute the session's risk.
    pub fn apply(
        &self,
        session_id: SessionId,
        modalities: ModalitySet,
        outcome: &IndicatorOutcome,
        now_ms: u64,
    ) -> RiskUpdate {
        let mut states = self.states.write().unwrap();
        let state = states.entry(session_id).or_default();

        // Decay every enabled modality to the update instant, then fold the
        // new indicator into its modality with diminishing returns.
        for modality in modalities.iter() {
            let slot = &mut state.scores[modality.index()];
            slot.score = slot.decayed(now_ms, self.config.half_life_secs);
            slot.last_update_ms = Some(now_ms);
        }
        {
            let slot = &mut state.scores[outcome.modality.index()];
            slot.score = (slot.score + (1.0 - slot.score) * outcome.indicator).min(1.0);
        }

        let (combined, sub_scores) = self.fuse(state, modalities);
        let mut events = Vec::new();

        let previous = state.committed;
        if outcome.override_alert == Some(AlertType::Spoofing) {
            // Anti-spoofing is dispositive, not statistical.
            state.committed = RiskLevel::Critical;
        } else {
            state.committed = commit_level(previous, combined, self.config.hysteresis_margin);
        }

        if state.committed != previous {
            let alert_type = outcome
                .override_alert
                .unwrap_or_else(|| self.dominant_alert_type(&sub_scores, modalities));
            tracing::info!(
                target: "proctor_engine::risk",
                session_id = %session_id,
                from = %previous,
                to = %state.committed,
                combined = format!("{combined:.3}"),
                "risk level changed"
            );
            events.push(RiskEvent::LevelChanged {
                session_id,
                from: previous,
                to: state.committed,
                combined,
                alert_type,
                timestamp_ms: now_ms,
            });
        }

        if let Some(alert_type) = outcome.override_alert {
            events.push(RiskEvent::Condition {
                session_id,
                alert_type,
                combined,
                timestamp_ms: now_ms,
            });
        }

        RiskUpdate {
            assessment: RiskAssessment {
                combined,
                level: state.committed,
                sub_scores,
                updated_at_ms: now_ms,
            },
            events,
        }
    }

    /// Read-only decayed view at `now_ms`. Absent new signals the combined
    /// score can only fall; the recorded level is not re-evaluated here.
    pub fn assessment(
        &self,
        session_id: SessionId,
        modalities: ModalitySet,
        now_ms: u64,
    ) -> RiskAssessment {
        let states = self.states.read().unwrap();
        let Some(state) = states.get(&session_id) else {
            return RiskAssessment::default();
        };

        let mut weight_sum = 0.0;
        let mut combined = 0.0;
        let mut sub_scores = [0.0; 3];
        for modality in modalities.iter() {
            let decayed =
                state.scores[modality.index()].decayed(now_ms, self.config.half_life_secs);
            sub_scores[modality.index()] = decayed;
            combined += self.config.weight(modality) * decayed;
            weight_sum += self.config.weight(modality);
        }
        if weight_sum > 0.0 {
            combined /= weight_sum;
        }

        RiskAssessment {
            combined: combined.clamp(0.0, 1.0),
            level: state.committed,
            sub_scores,
            updated_at_ms: now_ms,
        }
    }

    /// Drop per-session scores when a session ends.
    pub fn remove_session(&self, session_id: SessionId) {
        self.states.write().unwrap().remove(&session_id);
    }

    /// Weighted sum renormalized over the enabled modality set.
    fn fuse(&self, state: &SessionScores, modalities: ModalitySet) -> (f64, [f64; 3]) {
        let mut weight_sum = 0.0;
        let mut combined = 0.0;
        let mut sub_scores = [0.0; 3];
        for modality in modalities.iter() {
            let score = state.scores[modality.index()].score;
            sub_scores[modality.index()] = score;
            combined += self.config.weight(modality) * score;
            weight_sum += self.config.weight(modality);
        }
        if weight_sum > 0.0 {
            combined /= weight_sum;
        }
        (combined.clamp(0.0, 1.0), sub_scores)
    }

    /// Alert type for a level change with no triggering override: the
    /// modality carrying the largest weighted sub-score.
    fn dominant_alert_type(&self, sub_scores: &[f64; 3], modalities: ModalitySet) -> AlertType {
        let dominant = modalities
            .iter()
            .max_by(|a, b| {
                let wa = self.config.weight(*a) * sub_scores[a.index()];
                let wb = self.config.weight(*b) * sub_scores[b.index()];
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(Modality::Face);
        match dominant {
            Modality::Eye => AlertType::LookingAway,
            Modality::Noise | Modality::Face => AlertType::SuspiciousActivity,
        }
    }
}

/// Hysteresis-filtered level commitment.
///
/// Travelling up, the highest band whose lower boundary is exceeded by more
/// than the margin wins. Travelling down, nothing moves until the score
/// drops below the committed band's lower boundary by more than the margin.
fn commit_level(committed: RiskLevel, combined: f64, margin: f64) -> RiskLevel {
    let raw = RiskLevel::from_score(combined);
    if raw > committed {
        let mut candidate = committed;
        for level in [RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical] {
            if level > committed && combined > level.lower_bound() + margin {
                candidate = level;
            }
        }
        candidate
    } else if raw < committed && combined < committed.lower_bound() - margin {
        raw
    } else {
        committed
    }
}
