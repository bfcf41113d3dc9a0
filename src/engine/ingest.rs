//! Signal validation, ordering, and violation indicators.
//!
//! The ingestor turns each accepted measurement into a violation indicator in
//! [0, 1] using fixed per-modality rules. The rules themselves are stateless;
//! the only state kept here is the trailing context they need (the 10s
//! off-screen gaze window and the no-face onset timestamp) plus the
//! last-accepted timestamp per (session, modality) for ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use crate::engine::config::IndicatorConfig;
use crate::errors::{Error, Result};
use crate::types::{AlertType, Modality, SessionId, SignalPayload, SignalRecord};

/// Result of evaluating one accepted record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorOutcome {
    pub modality: Modality,
    /// Violation indicator in [0, 1]
    pub indicator: f64,
    /// Condition that must raise an alert regardless of the decayed score
    pub override_alert: Option<AlertType>,
}

#[derive(Debug, Default)]
struct IngestState {
    /// Last accepted timestamp per modality, indexed by `Modality::index`
    last_ts_ms: [Option<u64>; 3],
    /// Trailing (timestamp, off_screen) gaze samples
    eye_window: VecDeque<(u64, bool)>,
    /// Timestamp at which the face count first dropped to zero
    no_face_since_ms: Option<u64>,
}

/// Validates and normalizes incoming per-modality measurement records.
pub struct SignalIngestor {
    config: IndicatorConfig,
    states: RwLock<HashMap<SessionId, IngestState>>,
}

impl SignalIngestor {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Field-level validation. Rejects with no state change.
    pub fn validate(&self, record: &SignalRecord) -> Result<()> {
        if !(0.0..=1.0).contains(&record.confidence) {
            return Err(Error::validation(format!(
                "confidence must be within [0, 1], got {}",
                record.confidence
            )));
        }
        match &record.payload {
            SignalPayload::Eye {
                gaze_x,
                gaze_y,
                off_screen,
                head_yaw,
                head_pitch,
                head_roll,
                ..
            } => {
                for (name, v) in [
                    ("gaze_x", *gaze_x),
                    ("gaze_y", *gaze_y),
                    ("head_yaw", *head_yaw),
                    ("head_pitch", *head_pitch),
                    ("head_roll", *head_roll),
                ] {
                    if !v.is_finite() {
                        return Err(Error::validation(format!("{name} must be finite")));
                    }
                }
                // On-screen gaze must be normalized; off-screen gaze may fall outside
                if !off_screen && !((0.0..=1.0).contains(gaze_x) && (0.0..=1.0).contains(gaze_y))
                {
                    return Err(Error::validation(format!(
                        "on-screen gaze must be within [0, 1], got ({gaze_x}, {gaze_y})"
                    )));
                }
            }
            SignalPayload::Noise {
                ambient_db,
                speech_detected,
                speaker_count,
                ..
            } => {
                if !ambient_db.is_finite() || *ambient_db < 0.0 {
                    return Err(Error::validation(format!(
                        "ambient_db must be finite and non-negative, got {ambient_db}"
                    )));
                }
                if *speaker_count > 0 && !speech_detected {
                    return Err(Error::validation(
                        "speaker_count requires speech_detected".to_string(),
                    ));
                }
            }
            SignalPayload::Face {
                face_count,
                identity_match_confidence,
                liveness_score,
                spoofing_detected,
                ..
            } => {
                if !(0.0..=1.0).contains(identity_match_confidence) {
                    return Err(Error::validation(
                        "identity_match_confidence must be within [0, 1]".to_string(),
                    ));
                }
                if !(0.0..=1.0).contains(liveness_score) {
                    return Err(Error::validation(
                        "liveness_score must be within [0, 1]".to_string(),
                    ));
                }
                if *face_count > 16 {
                    return Err(Error::validation(format!(
                        "implausible face_count {face_count}"
                    )));
                }
                if *spoofing_detected && *face_count == 0 {
                    return Err(Error::validation(
                        "spoofing_detected requires a detected face".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Accept a record and compute its violation indicator.
    ///
    /// # Errors
    /// `OutOfOrderSignal` if the timestamp precedes the last accepted one for
    /// this (session, modality) by more than the tolerance. The record is
    /// dropped and no state is mutated.
    pub fn evaluate(&self, record: &SignalRecord) -> Result<IndicatorOutcome> {
        let modality = record.modality();
        let mut states = self.states.write().unwrap();
        let state = states.entry(record.session_id).or_default();

        if let Some(last) = state.last_ts_ms[modality.index()] {
            if record.timestamp_ms + self.config.out_of_order_tolerance_ms < last {
                tracing::debug!(
                    target: "proctor_engine::ingest",
                    session_id = %record.session_id,
                    modality = %modality,
                    record_ts_ms = record.timestamp_ms,
                    last_ts_ms = last,
                    "dropping out-of-order record"
                );
                return Err(Error::OutOfOrderSignal {
                    session_id: record.session_id,
                    modality,
                    record_ts_ms: record.timestamp_ms,
                    last_ts_ms: last,
                });
            }
        }
        let slot = &mut state.last_ts_ms[modality.index()];
        *slot = Some(slot.map_or(record.timestamp_ms, |l| l.max(record.timestamp_ms)));

        let (raw, override_alert) = match &record.payload {
            SignalPayload::Eye {
                off_screen,
                head_yaw,
                head_pitch,
                ..
            } => self.eval_eye(state, record.timestamp_ms, *off_screen, *head_yaw, *head_pitch),
            SignalPayload::Noise {
                ambient_db,
                speech_detected,
                speaker_count,
                phone_sound,
                conversation_detected,
                ..
            } => self.eval_noise(
                *ambient_db,
                *speech_detected,
                *speaker_count,
                *phone_sound,
                *conversation_detected,
            ),
            SignalPayload::Face {
                face_count,
                identity_match_confidence,
                liveness_score,
                spoofing_detected,
                face_obscured,
            } => self.eval_face(
                state,
                record.timestamp_ms,
                *face_count,
                *identity_match_confidence,
                *liveness_score,
                *spoofing_detected,
                *face_obscured,
            ),
        };

        // A low-confidence detection moves the score proportionally less.
        let indicator = (raw * record.confidence).clamp(0.0, 1.0);
        Ok(IndicatorOutcome {
            modality,
            indicator,
            override_alert,
        })
    }

    /// Drop per-session context when a session ends.
    pub fn remove_session(&self, session_id: SessionId) {
        self.states.write().unwrap().remove(&session_id);
    }

    fn eval_eye(
        &self,
        state: &mut IngestState,
        ts_ms: u64,
        off_screen: bool,
        head_yaw: f64,
        head_pitch: f64,
    ) -> (f64, Option<AlertType>) {
        state.eye_window.push_back((ts_ms, off_screen));
        let horizon = ts_ms.saturating_sub(self.config.eye_window_ms);
        while state.eye_window.front().is_some_and(|(t, _)| *t < horizon) {
            state.eye_window.pop_front();
        }

        // Sample-count approximation of the off-screen time ratio
        let total = state.eye_window.len() as f64;
        let off = state.eye_window.iter().filter(|(_, o)| *o).count() as f64;
        let ratio = if total > 0.0 { off / total } else { 0.0 };

        let threshold = self.config.off_screen_ratio_threshold;
        let mut indicator = if ratio > threshold {
            0.6 + 0.4 * (ratio - threshold) / (1.0 - threshold)
        } else {
            0.0
        };

        let limit = self.config.head_angle_limit_deg;
        if head_yaw.abs() > limit || head_pitch.abs() > limit {
            indicator = indicator.max(0.3);
        }

        (indicator, None)
    }

    fn eval_noise(
        &self,
        ambient_db: f64,
        speech_detected: bool,
        speaker_count: u32,
        phone_sound: bool,
        conversation_detected: bool,
    ) -> (f64, Option<AlertType>) {
        let mut indicator: f64 = 0.0;
        let mut override_alert = None;

        if speech_detected && speaker_count > 1 {
            indicator = indicator.max(0.7);
            override_alert = Some(AlertType::SuspiciousActivity);
        }
        if conversation_detected {
            indicator = indicator.max(0.5);
            override_alert = Some(AlertType::SuspiciousActivity);
        }
        if phone_sound {
            indicator = indicator.max(0.4);
        }
        if ambient_db > self.config.noise_db_threshold {
            indicator = indicator.max(0.3);
        }

        (indicator, override_alert)
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_face(
        &self,
        state: &mut IngestState,
        ts_ms: u64,
        face_count: u32,
        identity_match_confidence: f64,
        liveness_score: f64,
        spoofing_detected: bool,
        face_obscured: bool,
    ) -> (f64, Option<AlertType>) {
        if face_count == 0 {
            state.no_face_since_ms.get_or_insert(ts_ms);
        } else {
            state.no_face_since_ms = None;
        }

        // Dispositive condition first: spoofing outranks everything.
        if spoofing_detected {
            return (1.0, Some(AlertType::Spoofing));
        }

        let mut indicator: f64 = 0.0;
        let mut override_alert = None;

        if face_count > 1 {
            indicator = indicator.max(0.8);
            override_alert = Some(AlertType::MultipleFaces);
        } else if let Some(since) = state.no_face_since_ms {
            if ts_ms.saturating_sub(since) > self.config.no_face_sustain_ms {
                indicator = indicator.max(0.5);
                override_alert = Some(AlertType::NoFace);
            }
        } else if identity_match_confidence < self.config.identity_match_threshold {
            indicator = indicator.max(0.6);
            override_alert = Some(AlertType::IdentityMismatch);
        }

        if liveness_score < self.config.liveness_threshold && face_count > 0 {
            indicator = indicator.max(0.4);
        }
        if face_obscured {
            indicator = indicator.max(0.3);
        }

        (indicator, override_alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ingestor() -> SignalIngestor {
        SignalIngestor::new(IndicatorConfig::default())
    }

    fn eye(session: SessionId, ts: u64, off_screen: bool) -> SignalRecord {
        SignalRecord {
            session_id: session,
            timestamp_ms: ts,
            confidence: 1.0,
            payload: SignalPayload::Eye {
                gaze_x: 0.5,
                gaze_y: 0.5,
                both_eyes_visible: true,
                off_screen,
                fixation_duration_ms: 200,
                head_yaw: 0.0,
                head_pitch: 0.0,
                head_roll: 0.0,
            },
        }
    }

    fn noise(session: SessionId, ts: u64, speakers: u32) -> SignalRecord {
        SignalRecord {
            session_id: session,
            timestamp_ms: ts,
            confidence: 1.0,
            payload: SignalPayload::Noise {
                ambient_db: 40.0,
                speech_detected: speakers > 0,
                speaker_count: speakers,
                keyboard_sound: false,
                phone_sound: false,
                conversation_detected: false,
            },
        }
    }

    fn face(session: SessionId, ts: u64, count: u32, spoof: bool) -> SignalRecord {
        SignalRecord {
            session_id: session,
            timestamp_ms: ts,
            confidence: 1.0,
            payload: SignalPayload::Face {
                face_count: count,
                identity_match_confidence: 0.95,
                liveness_score: 0.9,
                spoofing_detected: spoof,
                face_obscured: false,
            },
        }
    }

    #[test]
    fn test_out_of_order_beyond_tolerance_dropped() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        ing.evaluate(&eye(session, 10_000, false)).unwrap();

        // Within tolerance: accepted, last timestamp unchanged
        assert!(ing.evaluate(&eye(session, 9_000, false)).is_ok());
        // Beyond tolerance: dropped
        let err = ing.evaluate(&eye(session, 7_000, false)).unwrap_err();
        assert!(err.is_out_of_order());
        // Drop must not regress ordering state
        assert!(ing.evaluate(&eye(session, 10_500, false)).is_ok());
    }

    #[test]
    fn test_ordering_is_per_modality() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        ing.evaluate(&eye(session, 50_000, false)).unwrap();
        // A much older noise record is fine; ordering is per (session, modality)
        assert!(ing.evaluate(&noise(session, 1_000, 0)).is_ok());
    }

    #[test]
    fn test_eye_off_screen_ratio_indicator() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        // 5 on-screen, then 5 off-screen within the 10s window: ratio 0.5
        for i in 0..5 {
            ing.evaluate(&eye(session, 1_000 * i, false)).unwrap();
        }
        let mut last = IndicatorOutcome {
            modality: Modality::Eye,
            indicator: 0.0,
            override_alert: None,
        };
        for i in 5..10 {
            last = ing.evaluate(&eye(session, 1_000 * i, true)).unwrap();
        }
        assert!(last.indicator >= 0.6, "indicator {} too low", last.indicator);
        assert!(last.indicator < 1.0);
        assert_eq!(last.override_alert, None);
    }

    #[test]
    fn test_eye_all_off_screen_approaches_one() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let mut last = None;
        for i in 0..10 {
            last = Some(ing.evaluate(&eye(session, 1_000 * i, true)).unwrap());
        }
        assert!(last.unwrap().indicator > 0.95);
    }

    #[test]
    fn test_eye_window_prunes_old_samples() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        for i in 0..10 {
            ing.evaluate(&eye(session, 1_000 * i, true)).unwrap();
        }
        // 30s later, a single on-screen sample: the old window is gone
        let outcome = ing.evaluate(&eye(session, 40_000, false)).unwrap();
        assert_eq!(outcome.indicator, 0.0);
    }

    #[test]
    fn test_multiple_speakers_overrides() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let outcome = ing.evaluate(&noise(session, 1_000, 2)).unwrap();
        assert!((outcome.indicator - 0.7).abs() < 1e-9);
        assert_eq!(outcome.override_alert, Some(AlertType::SuspiciousActivity));
    }

    #[test]
    fn test_single_speaker_is_quiet() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let outcome = ing.evaluate(&noise(session, 1_000, 1)).unwrap();
        assert_eq!(outcome.indicator, 0.0);
        assert_eq!(outcome.override_alert, None);
    }

    #[test]
    fn test_spoofing_is_dispositive() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let outcome = ing.evaluate(&face(session, 1_000, 1, true)).unwrap();
        assert_eq!(outcome.indicator, 1.0);
        assert_eq!(outcome.override_alert, Some(AlertType::Spoofing));
    }

    #[test]
    fn test_multiple_faces_override() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let outcome = ing.evaluate(&face(session, 1_000, 2, false)).unwrap();
        assert_eq!(outcome.override_alert, Some(AlertType::MultipleFaces));
        assert!((outcome.indicator - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_face_requires_sustain() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        // Onset at t=1s; not yet sustained at t=4s
        let o1 = ing.evaluate(&face(session, 1_000, 0, false)).unwrap();
        assert_eq!(o1.override_alert, None);
        let o2 = ing.evaluate(&face(session, 4_000, 0, false)).unwrap();
        assert_eq!(o2.override_alert, None);
        // Sustained past 5s at t=7s
        let o3 = ing.evaluate(&face(session, 7_000, 0, false)).unwrap();
        assert_eq!(o3.override_alert, Some(AlertType::NoFace));
        // Face returns: tracking resets
        let o4 = ing.evaluate(&face(session, 8_000, 1, false)).unwrap();
        assert_eq!(o4.override_alert, None);
    }

    #[test]
    fn test_identity_mismatch_override() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let record = SignalRecord {
            session_id: session,
            timestamp_ms: 1_000,
            confidence: 1.0,
            payload: SignalPayload::Face {
                face_count: 1,
                identity_match_confidence: 0.2,
                liveness_score: 0.9,
                spoofing_detected: false,
                face_obscured: false,
            },
        };
        let outcome = ing.evaluate(&record).unwrap();
        assert_eq!(outcome.override_alert, Some(AlertType::IdentityMismatch));
        assert!((outcome.indicator - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_scales_indicator() {
        let ing = ingestor();
        let session = Uuid::new_v4();
        let mut record = noise(session, 1_000, 2);
        record.confidence = 0.5;
        let outcome = ing.evaluate(&record).unwrap();
        assert!((outcome.indicator - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_validation_rejects_bad_confidence() {
        let ing = ingestor();
        let mut record = eye(Uuid::new_v4(), 1_000, false);
        record.confidence = 1.5;
        assert!(matches!(
            ing.validate(&record),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_unnormalized_gaze() {
        let ing = ingestor();
        let record = SignalRecord {
            session_id: Uuid::new_v4(),
            timestamp_ms: 1_000,
            confidence: 0.9,
            payload: SignalPayload::Eye {
                gaze_x: 3.0,
                gaze_y: 0.5,
                both_eyes_visible: true,
                off_screen: false,
                fixation_duration_ms: 0,
                head_yaw: 0.0,
                head_pitch: 0.0,
                head_roll: 0.0,
            },
        };
        assert!(ing.validate(&record).is_err());
    }

    #[test]
    fn test_validation_rejects_spoof_with_no_face() {
        let ing = ingestor();
        let record = face(Uuid::new_v4(), 1_000, 0, true);
        assert!(matches!(ing.validate(&record), Err(Error::Validation(_))));
        // The same flag with a detected face is a valid measurement
        assert!(ing.validate(&face(Uuid::new_v4(), 1_000, 1, true)).is_ok());
    }
}
