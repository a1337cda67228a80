//! Escalation session driven against a live engine

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use fieldwatch::domain::incident::NewIncident;
use fieldwatch::domain::{AlertEvent, IncidentId, IncidentType, ResolveAction};
use fieldwatch::infra::{Config, Metrics};
use fieldwatch::io::create_event_channel;
use fieldwatch::services::alerts::AlertAggregator;
use fieldwatch::services::{Engine, EscalationSession, OperatorDecision, SessionUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const CONFIG: &str = r#"
[alerts]
priority = ["FAKE_GPS", "APP_FORCE_CLOSE", "FACE_VERIFY_FAIL", "RADIUS_BYPASS_REQUEST"]

[[subjects]]
id = "1001"
name = "Budi"

[[subjects]]
id = "1002"
name = "Sari"

[[subjects]]
id = "1003"
name = "Agus"
"#;

fn engine() -> (Arc<Engine>, mpsc::Receiver<AlertEvent>) {
    let config = Config::from_toml_str(CONFIG, "inline".to_string()).unwrap();
    let metrics = Arc::new(Metrics::new());
    let (sender, rx) = create_event_channel(16, metrics.clone());
    (Arc::new(Engine::new(&config, metrics, Some(sender))), rx)
}

fn create(alerts: &AlertAggregator, kind: IncidentType, subject: &str, t: i64) -> IncidentId {
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + ChronoDuration::seconds(t);
    let request = NewIncident {
        kind: kind.as_str().to_string(),
        subject_id: subject.to_string(),
        detail: None,
        source_ref: None,
    };
    alerts.create(request, at).unwrap().id
}

fn presented_id(update: &SessionUpdate) -> IncidentId {
    match update {
        SessionUpdate::Presented(incident) => incident.id,
        other => panic!("expected a presented incident, got {other:?}"),
    }
}

#[tokio::test]
async fn test_priority_walkthrough_emits_one_event_per_resolution() {
    let (engine, mut events) = engine();
    let alerts = engine.alerts();
    let bypass = create(&alerts, IncidentType::RadiusBypassRequest, "1001", 0);
    let fake_gps = create(&alerts, IncidentType::FakeGps, "1002", 1);
    let face = create(&alerts, IncidentType::FaceVerifyFail, "1003", 2);

    let mut session = EscalationSession::new(alerts.clone(), Duration::from_secs(5));

    let first = session.tick().await.unwrap();
    assert_eq!(presented_id(&first), fake_gps);

    let updates = session.decide(OperatorDecision::Confirm).await;
    assert_eq!(
        updates[0],
        SessionUpdate::Resolved { incident_id: fake_gps, action: ResolveAction::Acknowledge }
    );
    assert_eq!(presented_id(&updates[1]), face);

    let updates = session.decide(OperatorDecision::Confirm).await;
    assert_eq!(presented_id(&updates[1]), bypass);

    let updates = session.decide(OperatorDecision::Confirm).await;
    assert_eq!(
        updates,
        vec![
            SessionUpdate::Resolved { incident_id: bypass, action: ResolveAction::Approve },
            SessionUpdate::Cleared,
        ]
    );

    let emitted: Vec<(IncidentId, &str)> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| (e.incident_id(), e.name()))
        .collect();
    assert_eq!(
        emitted,
        vec![(fake_gps, "mark_read"), (face, "mark_read"), (bypass, "bypass_granted")]
    );
    assert_eq!(engine.metrics_summary().incidents_resolved, 3);
}

#[tokio::test]
async fn test_new_higher_priority_incident_does_not_preempt() {
    let (engine, _events) = engine();
    let alerts = engine.alerts();
    let face = create(&alerts, IncidentType::FaceVerifyFail, "1001", 0);

    let mut session = EscalationSession::new(alerts.clone(), Duration::from_secs(5));
    assert_eq!(presented_id(&session.tick().await.unwrap()), face);

    let fake_gps = create(&alerts, IncidentType::FakeGps, "1002", 5);
    assert!(session.tick().await.is_none());
    assert_eq!(session.presented().map(|i| i.id), Some(face));

    let updates = session.decide(OperatorDecision::Defer).await;
    assert_eq!(updates, vec![SessionUpdate::Deferred { incident_id: face }]);
    assert_eq!(presented_id(&session.tick().await.unwrap()), fake_gps);
}

#[tokio::test]
async fn test_two_consoles_race_on_one_incident() {
    let (engine, mut events) = engine();
    let alerts = engine.alerts();
    let id = create(&alerts, IncidentType::AppForceClose, "1001", 0);

    let mut left = EscalationSession::new(alerts.clone(), Duration::from_secs(5));
    let mut right = EscalationSession::new(alerts.clone(), Duration::from_secs(5));
    assert_eq!(presented_id(&left.tick().await.unwrap()), id);
    assert_eq!(presented_id(&right.tick().await.unwrap()), id);

    let won = left.decide(OperatorDecision::Confirm).await;
    let lost = right.decide(OperatorDecision::Confirm).await;
    assert!(matches!(won[0], SessionUpdate::Resolved { .. }));
    assert_eq!(lost[0], SessionUpdate::AlreadyHandled { incident_id: id });
    assert_eq!(lost[1], SessionUpdate::Cleared);

    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
    assert_eq!(engine.metrics_summary().resolve_conflicts, 1);
}

#[tokio::test]
async fn test_spawned_session_delivers_updates() {
    let (engine, _events) = engine();
    let alerts = engine.alerts();
    let id = create(&alerts, IncidentType::FakeGps, "1001", 0);

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let handle = EscalationSession::new(alerts.clone(), Duration::from_secs(5))
        .spawn(Duration::from_secs(60), updates_tx);

    let first = tokio::time::timeout(Duration::from_secs(2), updates_rx.recv()).await.unwrap().unwrap();
    assert_eq!(presented_id(&first), id);

    assert!(handle.decide(OperatorDecision::Confirm).await);
    let resolved = tokio::time::timeout(Duration::from_secs(2), updates_rx.recv()).await.unwrap().unwrap();
    assert_eq!(resolved, SessionUpdate::Resolved { incident_id: id, action: ResolveAction::Acknowledge });

    handle.teardown().await;
    assert!(engine.pending_alerts().is_empty());
}
