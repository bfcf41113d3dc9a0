//! Engine configuration.
//!
//! All fusion constants are documented, configurable starting points rather
//! than calibrated values: half-life 30s, weights 0.35/0.25/0.40, hysteresis
//! margin 0.02, alert cooldown 10s. Invalid values are fatal at startup.

use serde::{Deserialize, Serialize};

/// Risk fusion parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Weight of the eye modality in the combined score
    #[serde(default = "default_eye_weight")]
    pub eye_weight: f64,

    /// Weight of the noise modality in the combined score
    #[serde(default = "default_noise_weight")]
    pub noise_weight: f64,

    /// Weight of the face modality in the combined score
    #[serde(default = "default_face_weight")]
    pub face_weight: f64,

    /// Decay half-life in seconds. Per-modality scores decay as
    /// exp(-elapsed / half_life) between updates.
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: f64,

    /// Minimum overshoot past a level boundary before the recorded level
    /// changes, in the direction of travel
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,
}

fn default_eye_weight() -> f64 {
    0.35
}

fn default_noise_weight() -> f64 {
    0.25
}

fn default_face_weight() -> f64 {
    0.40
}

fn default_half_life_secs() -> f64 {
    30.0
}

fn default_hysteresis_margin() -> f64 {
    0.02
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            eye_weight: default_eye_weight(),
            noise_weight: default_noise_weight(),
            face_weight: default_face_weight(),
            half_life_secs: default_half_life_secs(),
            hysteresis_margin: default_hysteresis_margin(),
        }
    }
}

impl FusionConfig {
    /// Weight for one modality.
    pub fn weight(&self, modality: crate::types::Modality) -> f64 {
        use crate::types::Modality;
        match modality {
            Modality::Eye => self.eye_weight,
            Modality::Noise => self.noise_weight,
            Modality::Face => self.face_weight,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [
            ("eye_weight", self.eye_weight),
            ("noise_weight", self.noise_weight),
            ("face_weight", self.face_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(format!("{name} must be finite and non-negative, got {w}"));
            }
        }
        if self.eye_weight + self.noise_weight + self.face_weight <= 0.0 {
            return Err("modality weights must not all be zero".to_string());
        }
        if !self.half_life_secs.is_finite() || self.half_life_secs <= 0.0 {
            return Err(format!(
                "half_life_secs must be positive, got {}",
                self.half_life_secs
            ));
        }
        if !self.hysteresis_margin.is_finite()
            || !(0.0..=0.1).contains(&self.hysteresis_margin)
        {
            return Err(format!(
                "hysteresis_margin must be within [0.0, 0.1], got {}",
                self.hysteresis_margin
            ));
        }
        Ok(())
    }
}

/// Violation indicator thresholds per modality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Tolerance for stale timestamps before a record is dropped (ms)
    #[serde(default = "default_out_of_order_tolerance_ms")]
    pub out_of_order_tolerance_ms: u64,

    /// Trailing window for the off-screen gaze ratio (ms)
    #[serde(default = "default_eye_window_ms")]
    pub eye_window_ms: u64,

    /// Off-screen ratio above which the eye indicator activates
    #[serde(default = "default_off_screen_ratio_threshold")]
    pub off_screen_ratio_threshold: f64,

    /// Head yaw/pitch beyond this magnitude (degrees) is a mild violation
    #[serde(default = "default_head_angle_limit_deg")]
    pub head_angle_limit_deg: f64,

    /// Ambient level above this (dB) is a mild violation
    #[serde(default = "default_noise_db_threshold")]
    pub noise_db_threshold: f64,

    /// Zero faces sustained longer than this raises a no-face alert (ms)
    #[serde(default = "default_no_face_sustain_ms")]
    pub no_face_sustain_ms: u64,

    /// Identity-match confidence below this raises an identity mismatch
    #[serde(default = "default_identity_match_threshold")]
    pub identity_match_threshold: f64,

    /// Liveness score below this (without a spoof flag) is a violation
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold: f64,
}

fn default_out_of_order_tolerance_ms() -> u64 {
    2_000
}

fn default_eye_window_ms() -> u64 {
    10_000
}

fn default_off_screen_ratio_threshold() -> f64 {
    0.3
}

fn default_head_angle_limit_deg() -> f64 {
    30.0
}

fn default_noise_db_threshold() -> f64 {
    70.0
}

fn default_no_face_sustain_ms() -> u64 {
    5_000
}

fn default_identity_match_threshold() -> f64 {
    0.5
}

fn default_liveness_threshold() -> f64 {
    0.3
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            out_of_order_tolerance_ms: default_out_of_order_tolerance_ms(),
            eye_window_ms: default_eye_window_ms(),
            off_screen_ratio_threshold: default_off_screen_ratio_threshold(),
            head_angle_limit_deg: default_head_angle_limit_deg(),
            noise_db_threshold: default_noise_db_threshold(),
            no_face_sustain_ms: default_no_face_sustain_ms(),
            identity_match_threshold: default_identity_match_threshold(),
            liveness_threshold: default_liveness_threshold(),
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.eye_window_ms == 0 {
            return Err("eye_window_ms must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.off_screen_ratio_threshold) {
            return Err(format!(
                "off_screen_ratio_threshold must be within [0.0, 1.0), got {}",
                self.off_screen_ratio_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.identity_match_threshold) {
            return Err("identity_match_threshold must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.liveness_threshold) {
            return Err("liveness_threshold must be within [0, 1]".to_string());
        }
        if self.head_angle_limit_deg <= 0.0 || !self.head_angle_limit_deg.is_finite() {
            return Err("head_angle_limit_deg must be positive".to_string());
        }
        Ok(())
    }
}

/// Alert deduplication and async persistence parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Minimum interval between two persisted alerts of the same type for
    /// the same session (ms)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Maximum persistence retries on the async alert path
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay (ms)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Retry backoff multiplier
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    /// Jitter factor applied to retry delays (0.0-1.0)
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    50
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.2
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
            retry_jitter: default_retry_jitter(),
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cooldown_ms == 0 {
            return Err("cooldown_ms must be positive".to_string());
        }
        if self.retry_backoff_multiplier < 1.0 || !self.retry_backoff_multiplier.is_finite() {
            return Err(format!(
                "retry_backoff_multiplier must be >= 1.0, got {}",
                self.retry_backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err("retry_jitter must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// Session lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// A session with no signal for this long is terminated (seconds).
    /// A presence-loss alert is raised at the midpoint.
    #[serde(default = "default_inactivity_window_secs")]
    pub inactivity_window_secs: u64,

    /// Interval between inactivity sweeps (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_inactivity_window_secs() -> u64 {
    60
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_window_secs: default_inactivity_window_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.inactivity_window_secs == 0 {
            return Err("inactivity_window_secs must be positive".to_string());
        }
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Validate all sections. Any failure is fatal at engine construction.
    pub fn validate(&self) -> Result<(), String> {
        self.fusion.validate()?;
        self.indicators.validate()?;
        self.alerts.validate()?;
        self.session.validate()?;
        Ok(())
    }
}
