//! Core data model for the integrity fusion engine.
//!
//! Measurement records arrive from external inference collaborators as
//! modality-tagged JSON; everything here derives serde for that boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id of a proctoring session.
pub type SessionId = Uuid;

/// Unique id of a persisted alert.
pub type AlertId = u64;

/// One measurement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Eye,
    Noise,
    Face,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Eye, Modality::Noise, Modality::Face];

    /// Get display string for the modality.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Eye => "eye",
            Modality::Noise => "noise",
            Modality::Face => "face",
        }
    }

    /// Stable index into per-modality arrays.
    pub fn index(&self) -> usize {
        match self {
            Modality::Eye => 0,
            Modality::Noise => 1,
            Modality::Face => 2,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of modalities a session monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModalitySet {
    pub eye: bool,
    pub noise: bool,
    pub face: bool,
}

impl ModalitySet {
    /// All three modalities enabled.
    pub fn all() -> Self {
        Self {
            eye: true,
            noise: true,
            face: true,
        }
    }

    /// A single enabled modality.
    pub fn single(modality: Modality) -> Self {
        Self::default().with(modality)
    }

    /// Enable one modality (builder style).
    pub fn with(mut self, modality: Modality) -> Self {
        match modality {
            Modality::Eye => self.eye = true,
            Modality::Noise => self.noise = true,
            Modality::Face => self.face = true,
        }
        self
    }

    pub fn contains(&self, modality: Modality) -> bool {
        match modality {
            Modality::Eye => self.eye,
            Modality::Noise => self.noise,
            Modality::Face => self.face,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.eye && !self.noise && !self.face
    }

    /// Iterate over enabled modalities.
    pub fn iter(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL.into_iter().filter(|m| self.contains(*m))
    }
}

/// Modality-specific measurement fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Gaze and head-pose measurements from the eye tracker.
    Eye {
        /// Gaze point, normalized to [0, 1] when on screen
        gaze_x: f64,
        gaze_y: f64,
        both_eyes_visible: bool,
        off_screen: bool,
        fixation_duration_ms: u64,
        /// Head pose angles in degrees
        head_yaw: f64,
        head_pitch: f64,
        head_roll: f64,
    },
    /// Ambient audio measurements from the microphone pipeline.
    Noise {
        ambient_db: f64,
        speech_detected: bool,
        speaker_count: u32,
        keyboard_sound: bool,
        phone_sound: bool,
        conversation_detected: bool,
    },
    /// Facial biometrics from the camera pipeline.
    Face {
        face_count: u32,
        identity_match_confidence: f64,
        liveness_score: f64,
        spoofing_detected: bool,
        face_obscured: bool,
    },
}

impl SignalPayload {
    pub fn modality(&self) -> Modality {
        match self {
            SignalPayload::Eye { .. } => Modality::Eye,
            SignalPayload::Noise { .. } => Modality::Noise,
            SignalPayload::Face { .. } => Modality::Face,
        }
    }
}

/// A single measurement record from an inference collaborator.
///
/// Immutable once ingested; ordering is per-session-per-modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub session_id: SessionId,
    /// Measurement time in epoch milliseconds
    pub timestamp_ms: u64,
    /// Measurement confidence in [0, 1]
    pub confidence: f64,
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalRecord {
    pub fn modality(&self) -> Modality {
        self.payload.modality()
    }
}

/// Risk level bands over the combined score space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Level band for a combined score, ignoring hysteresis.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::Critical
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Lower boundary of this level's score band.
    pub fn lower_bound(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.0,
            RiskLevel::Medium => 0.3,
            RiskLevel::High => 0.5,
            RiskLevel::Critical => 0.7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Alert severity recorded for a committed change to this level.
    pub fn severity(&self) -> AlertSeverity {
        match self {
            RiskLevel::Low => AlertSeverity::Low,
            RiskLevel::Medium => AlertSeverity::Medium,
            RiskLevel::High => AlertSeverity::High,
            RiskLevel::Critical => AlertSeverity::Critical,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level of an alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Check if this severity warrants proctor escalation.
    pub fn is_actionable(&self) -> bool {
        matches!(self, AlertSeverity::High | AlertSeverity::Critical)
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of alert for categorization and deduplication.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// No face visible for a sustained interval
    NoFace,
    /// More than one face in frame
    MultipleFaces,
    /// Gaze repeatedly off screen
    LookingAway,
    /// Multiple speakers / background conversation
    SuspiciousActivity,
    /// Presentation attack on the camera
    Spoofing,
    /// Face does not match the enrolled identity
    IdentityMismatch,
    /// No signal within the inactivity window
    PresenceLoss,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::NoFace => "no_face",
            AlertType::MultipleFaces => "multiple_faces",
            AlertType::LookingAway => "looking_away",
            AlertType::SuspiciousActivity => "suspicious_activity",
            AlertType::Spoofing => "spoofing",
            AlertType::IdentityMismatch => "identity_mismatch",
            AlertType::PresenceLoss => "presence_loss",
        }
    }

    /// Default severity when raised as a standalone condition.
    pub fn default_severity(&self) -> AlertSeverity {
        match self {
            AlertType::Spoofing | AlertType::IdentityMismatch => AlertSeverity::Critical,
            AlertType::NoFace | AlertType::MultipleFaces | AlertType::SuspiciousActivity => {
                AlertSeverity::High
            }
            AlertType::LookingAway => AlertSeverity::Medium,
            AlertType::PresenceLoss => AlertSeverity::Medium,
        }
    }

    /// Override conditions force flagging and proctor notification;
    /// presence loss only terminates the session.
    pub fn is_override(&self) -> bool {
        !matches!(self, AlertType::PresenceLoss)
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, reviewable alert. Append-only except the review fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub session_id: SessionId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    /// Human-readable description
    pub message: String,
    /// Timestamp of the triggering record or sweep, epoch milliseconds
    pub trigger_timestamp_ms: u64,
    pub created_at: DateTime<Utc>,
    pub reviewed: bool,
    pub reviewer_id: Option<String>,
    pub action_taken: Option<String>,
}

impl Alert {
    pub fn new(
        id: AlertId,
        session_id: SessionId,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        trigger_timestamp_ms: u64,
    ) -> Self {
        Self {
            id,
            session_id,
            alert_type,
            severity,
            message: message.into(),
            trigger_timestamp_ms,
            created_at: Utc::now(),
            reviewed: false,
            reviewer_id: None,
            action_taken: None,
        }
    }

    /// Apply a review. The only mutation permitted after creation.
    pub fn review(&mut self, reviewer_id: impl Into<String>, action_taken: impl Into<String>) {
        self.reviewed = true;
        self.reviewer_id = Some(reviewer_id.into());
        self.action_taken = Some(action_taken.into());
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
    Terminated,
}

impl SessionStatus {
    /// Terminal states accept no signals and no risk recomputation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current fused risk view for a session.
///
/// Only the current value is kept; the audit trail is the append-only
/// signal and alert stores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskAssessment {
    /// Weighted combined score in [0, 1]
    pub combined: f64,
    /// Committed (hysteresis-filtered) level
    pub level: RiskLevel,
    /// Decayed per-modality sub-scores, indexed by `Modality::index`
    pub sub_scores: [f64; 3],
    /// Timestamp of the update that produced this view, epoch milliseconds
    pub updated_at_ms: u64,
}
