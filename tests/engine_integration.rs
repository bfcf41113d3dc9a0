//! End-to-end scenarios through the engine facade.
//!
//! All scenarios run under paused tokio time so decay, cooldowns, and the
//! inactivity sweep are deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use proctor_engine::{
    Alert, AlertSeverity, AlertType, Caller, EngineConfig, InMemoryAlertStore,
    InMemorySignalStore, Modality, ModalitySet, Notifier, ProctorEngine, RiskLevel,
    SessionStatus, SignalPayload, SignalRecord,
};

struct CountingNotifier {
    notified: AtomicU64,
}

impl CountingNotifier {
    fn new() -> Self {
        Self {
            notified: AtomicU64::new(0),
        }
    }

    fn count(&self) -> u64 {
        self.notified.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, _alert: &Alert) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }
}

fn build_engine() -> (Arc<ProctorEngine>, Arc<CountingNotifier>) {
    let notifier = Arc::new(CountingNotifier::new());
    let engine = ProctorEngine::with_parts(
        EngineConfig::default(),
        Arc::new(InMemorySignalStore::new()),
        Arc::new(InMemoryAlertStore::new()),
        notifier.clone(),
    )
    .unwrap();
    (Arc::new(engine), notifier)
}

fn eye(session_id: proctor_engine::SessionId, ts: u64, off_screen: bool) -> SignalRecord {
    SignalRecord {
        session_id,
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

fn conversation(session_id: proctor_engine::SessionId, ts: u64) -> SignalRecord {
    SignalRecord {
        session_id,
        timestamp_ms: ts,
        confidence: 1.0,
        payload: SignalPayload::Noise {
            ambient_db: 55.0,
            speech_detected: true,
            speaker_count: 1,
            keyboard_sound: false,
            phone_sound: false,
            conversation_detected: true,
        },
    }
}

fn spoofed_face(session_id: proctor_engine::SessionId, ts: u64) -> SignalRecord {
    SignalRecord {
        session_id,
        timestamp_ms: ts,
        confidence: 1.0,
        payload: SignalPayload::Face {
            face_count: 1,
            identity_match_confidence: 0.9,
            liveness_score: 0.1,
            spoofing_detected: true,
            face_obscured: false,
        },
    }
}

#[tokio::test(start_paused = true)]
async fn test_sustained_off_screen_gaze_raises_one_alert() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::single(Modality::Eye),
        )
        .unwrap();

    // Five on-screen samples, then the gaze drifts off and stays off.
    for i in 0..5u64 {
        engine
            .ingest(&Caller::Service, &eye(id, i * 1_000, false))
            .unwrap();
    }
    let mut last = engine.current_assessment(&Caller::Service, id).unwrap();
    assert_eq!(last.level, RiskLevel::Low);

    for i in 5..8u64 {
        last = engine
            .ingest(&Caller::Service, &eye(id, i * 1_000, true))
            .unwrap();
    }
    // 3 of 8 trailing samples off-screen: the ratio rule activates and the
    // level commits straight to HIGH.
    assert_eq!(last.level, RiskLevel::High);
    assert!(last.combined > 0.6 && last.combined < 0.7);

    engine.flush_alerts().await;
    let alerts = engine.alerts(&Caller::Service, id, None).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::LookingAway);
    assert_eq!(alerts[0].severity, AlertSeverity::High);

    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.total_alerts, 1);
    assert!(!report.is_flagged);
    assert_eq!(report.modality_stats[&Modality::Eye].signals, 8);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_spoofing_commits_critical_and_flags() {
    let (engine, notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();

    let assessment = engine
        .ingest(&Caller::Service, &spoofed_face(id, 1_000))
        .unwrap();
    // The weighted score stays moderate; the level is committed anyway.
    assert_eq!(assessment.level, RiskLevel::Critical);
    assert!(assessment.combined < 0.5);

    engine.flush_alerts().await;
    let alerts = engine.alerts(&Caller::Service, id, None).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Spoofing);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert!(report.is_flagged);
    assert_eq!(report.total_alerts, 1);
    // The condition event landed inside the level-change alert's cooldown.
    assert_eq!(report.suppressed_by_type[&AlertType::Spoofing], 1);
    assert_eq!(notifier.count(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_alert_cooldown_suppresses_then_reopens() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();

    engine
        .ingest(&Caller::Service, &conversation(id, 1_000))
        .unwrap();
    engine
        .ingest(&Caller::Service, &conversation(id, 3_000))
        .unwrap();
    engine
        .ingest(&Caller::Service, &conversation(id, 15_000))
        .unwrap();
    engine.flush_alerts().await;

    let alerts = engine.alerts(&Caller::Service, id, None).unwrap();
    assert_eq!(alerts.len(), 2);
    assert!(alerts
        .iter()
        .all(|a| a.alert_type == AlertType::SuspiciousActivity));

    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.total_alerts, 2);
    assert_eq!(
        report.suppressed_by_type[&AlertType::SuspiciousActivity],
        1
    );
    // Conversation is an override condition, so the session is flagged even
    // though the fused score never left LOW.
    assert!(report.is_flagged);
    assert_eq!(report.risk_level, RiskLevel::Low);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_warns_then_terminates() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();

    // Past the half-window mark: one presence-loss alert, still active.
    tokio::time::sleep(Duration::from_secs(31)).await;
    engine.flush_alerts().await;
    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.status, SessionStatus::Active);
    assert_eq!(report.alerts_by_type[&AlertType::PresenceLoss], 1);
    assert!(!report.is_flagged);

    // No second warning while the quiet period continues.
    tokio::time::sleep(Duration::from_secs(10)).await;
    engine.flush_alerts().await;
    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.alerts_by_type[&AlertType::PresenceLoss], 1);

    // Full window elapsed: terminated, and the attempt slot is free again.
    tokio::time::sleep(Duration::from_secs(20)).await;
    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.status, SessionStatus::Terminated);
    assert!(engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .is_ok());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_signal_resets_inactivity_clock() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    engine
        .ingest(&Caller::Service, &eye(id, 25_000, false))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;
    engine.flush_alerts().await;

    // 50s of wall time but never 30s without a signal: no warning.
    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.status, SessionStatus::Active);
    assert!(report.alerts_by_type.is_empty());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_review_workflow() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();
    engine
        .ingest(&Caller::Service, &spoofed_face(id, 1_000))
        .unwrap();
    engine.flush_alerts().await;

    let unreviewed = engine
        .alerts(&Caller::Instructor, id, Some(false))
        .unwrap();
    assert_eq!(unreviewed.len(), 1);

    engine
        .review_alert(
            &Caller::Instructor,
            unreviewed[0].id,
            "proctor-9",
            "confirmed violation",
        )
        .unwrap();

    let reviewed = engine.alerts(&Caller::Instructor, id, Some(true)).unwrap();
    assert_eq!(reviewed.len(), 1);
    assert_eq!(reviewed[0].reviewer_id.as_deref(), Some("proctor-9"));
    assert!(engine
        .alerts(&Caller::Instructor, id, Some(false))
        .unwrap()
        .is_empty());

    let report = engine.session_report(&Caller::Instructor, id).unwrap();
    assert_eq!(report.unreviewed_alerts, 0);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_assessment_rollup_across_sessions() {
    let (engine, _notifier) = build_engine();
    let a = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();
    let b = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-2",
            "exam-1",
            "u2",
            ModalitySet::all(),
        )
        .unwrap();

    engine
        .ingest(&Caller::Service, &spoofed_face(a, 1_000))
        .unwrap();
    engine.ingest(&Caller::Service, &eye(b, 1_000, false)).unwrap();
    engine.flush_alerts().await;

    let report = engine
        .assessment_report(&Caller::Instructor, "exam-1")
        .unwrap();
    assert_eq!(report.total_sessions, 2);
    assert_eq!(report.active_sessions, 2);
    assert_eq!(report.flagged_sessions, 1);
    assert_eq!(report.total_alerts, 1);
    assert_eq!(report.alerts_by_type[&AlertType::Spoofing], 1);
    assert_eq!(report.level_distribution[&RiskLevel::Critical], 1);
    assert_eq!(report.level_distribution[&RiskLevel::Low], 1);

    // Students never see the cross-session rollup.
    assert!(engine
        .assessment_report(&Caller::Student("u1".into()), "exam-1")
        .is_err());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_monitoring_summary() {
    let (engine, _notifier) = build_engine();
    let id = engine
        .start_monitoring(
            &Caller::Service,
            "attempt-1",
            "exam-1",
            "u1",
            ModalitySet::all(),
        )
        .unwrap();
    engine.ingest(&Caller::Service, &eye(id, 1_000, false)).unwrap();
    engine
        .ingest(&Caller::Service, &conversation(id, 2_000))
        .unwrap();
    engine.flush_alerts().await;

    let summary = engine.end_monitoring(&Caller::Service, id).unwrap();
    assert_eq!(summary.status, SessionStatus::Ended);
    assert_eq!(summary.total_signals, 2);
    assert_eq!(summary.total_alerts, 1);
    assert!(summary.is_flagged);

    // Ended sessions stay queryable.
    let report = engine.session_report(&Caller::Service, id).unwrap();
    assert_eq!(report.status, SessionStatus::Ended);
    assert!(report.ended_at.is_some());
    engine.shutdown().await;
}
