//! End-to-end tests of the JSON API through the request router

use chrono::{Duration, Utc};
use fieldwatch::domain::IncidentId;
use fieldwatch::infra::{Config, Metrics};
use fieldwatch::io::Api;
use fieldwatch::services::geo;
use fieldwatch::services::Engine;
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

const CONFIG: &str = r#"
[site]
id = "it"

[presence]
staleness_secs = 300

[[subjects]]
id = "1001"
name = "Budi Santoso"
branch_code = "JKT"
reference_lat = 0.0
reference_lon = 0.0
radius_m = 100.0

[[subjects]]
id = "1002"
name = "Sari Wulandari"
branch_code = "BDG"
"#;

fn api() -> Api {
    let config = Config::from_toml_str(CONFIG, "inline".to_string()).unwrap();
    let engine = Arc::new(Engine::new(&config, Arc::new(Metrics::new()), None));
    Api::new(engine, config.site_id())
}

fn call(api: &Api, method: Method, path: &str, query: Option<&str>, body: Value) -> (StatusCode, Value) {
    let bytes = if body.is_null() { Vec::new() } else { body.to_string().into_bytes() };
    let response = api.dispatch(&method, path, query, &bytes);
    let parsed = serde_json::from_str(&response.body).unwrap_or(Value::Null);
    (response.status, parsed)
}

fn sample(subject: &str, lat: Option<f64>, minutes_ago: i64) -> Value {
    let ts = Utc::now() - Duration::minutes(minutes_ago);
    json!({
        "subjectId": subject,
        "lat": lat,
        "lon": lat.map(|_| 0.0),
        "battery": 80,
        "timestamp": ts.to_rfc3339(),
    })
}

fn view<'a>(rows: &'a Value, subject: &str) -> &'a Value {
    rows.as_array()
        .unwrap()
        .iter()
        .find(|row| row["subject_id"] == subject)
        .unwrap()
}

#[test]
fn test_geofence_outside_then_unknown() {
    let api = api();
    let lat_150m = 150.0 / geo::meters_per_degree_lat();

    let (status, body) = call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(lat_150m), 1));
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["ok"], true);

    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", None, Value::Null);
    let row = view(&rows, "1001");
    assert_eq!(row["geofence_status"], "outside");
    assert!((row["distance_to_reference_meters"].as_f64().unwrap() - 150.0).abs() < 1.0);
    assert_eq!(row["is_online"], true);

    call(&api, Method::POST, "/presence-sample", None, sample("1001", None, 0));
    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", None, Value::Null);
    let row = view(&rows, "1001");
    assert_eq!(row["geofence_status"], "unknown");
    assert!(row["distance_to_reference_meters"].is_null());
    assert_eq!(row["is_online"], true);
}

#[test]
fn test_stale_sample_is_offline() {
    let api = api();
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.0), 30));

    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", Some("online=offline"), Value::Null);
    let ids: Vec<&str> = rows.as_array().unwrap().iter().map(|r| r["subject_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1001", "1002"]);

    let (_, summary) = call(&api, Method::GET, "/presence/summary", None, Value::Null);
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["online"], 0);
}

#[test]
fn test_snapshot_search_and_branch() {
    let api = api();
    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", Some("q=sari"), Value::Null);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["subject_id"], "1002");

    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", Some("branch=JKT"), Value::Null);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["subject_id"], "1001");
}

#[test]
fn test_rejected_samples_leave_state_untouched() {
    let api = api();
    let (status, body) = call(&api, Method::POST, "/presence-sample", None, sample("9999", Some(0.0), 0));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    let mut bad = sample("1001", Some(0.0), 0);
    bad["battery"] = json!(140);
    let (status, _) = call(&api, Method::POST, "/presence-sample", None, bad);
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", None, Value::Null);
    assert!(view(&rows, "1001")["last_seen"].is_null());
}

#[test]
fn test_history_is_ordered_and_windowed() {
    let api = api();
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.001), 5));
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.002), 90));
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.003), 20));

    let (status, points) = call(&api, Method::GET, "/presence/1001/history", Some("window=1h"), Value::Null);
    assert_eq!(status, StatusCode::OK);
    let lats: Vec<f64> = points.as_array().unwrap().iter().map(|p| p["lat"].as_f64().unwrap()).collect();
    assert_eq!(lats, vec![0.003, 0.001]);

    let (_, points) = call(&api, Method::GET, "/presence/1001/history", None, Value::Null);
    assert_eq!(points.as_array().unwrap().len(), 3);

    let (status, points) = call(&api, Method::GET, "/presence/ghost/history", None, Value::Null);
    assert_eq!(status, StatusCode::OK);
    assert!(points.as_array().unwrap().is_empty());
}

#[test]
fn test_incident_lifecycle() {
    let api = api();
    let report = json!({
        "type": "FAKE_GPS_ALERT",
        "subjectId": "1001",
        "detail": "mock location provider enabled",
        "sourceRef": "device-42:7",
    });

    let (status, created) = call(&api, Method::POST, "/incidents", None, report.clone());
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["deduplicated"], false);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, again) = call(&api, Method::POST, "/incidents", None, report);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["deduplicated"], true);
    assert_eq!(again["id"], id.as_str());

    let (_, pending) = call(&api, Method::GET, "/incidents/pending", None, Value::Null);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["type"], "FAKE_GPS");

    let resolve_path = format!("/incidents/{id}/resolve");
    let (status, _) = call(&api, Method::POST, &resolve_path, None, json!({ "action": "approve" }));
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, resolved) = call(&api, Method::POST, &resolve_path, None, json!({ "action": "acknowledge" }));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["incident"]["state"], "resolved");
    assert_eq!(resolved["incident"]["resolution"], "acknowledge");

    let (status, body) = call(&api, Method::POST, &resolve_path, None, json!({ "action": "acknowledge" }));
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyResolved");

    let missing = format!("/incidents/{}/resolve", IncidentId::new());
    let (status, body) = call(&api, Method::POST, &missing, None, json!({ "action": "acknowledge" }));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");

    let (_, pending) = call(&api, Method::GET, "/incidents/pending", None, Value::Null);
    assert!(pending.as_array().unwrap().is_empty());

    let (_, listed) = call(&api, Method::GET, "/incidents", Some("status=resolved&subject=1001"), Value::Null);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[test]
fn test_incident_validation() {
    let api = api();
    let (status, _) = call(
        &api,
        Method::POST,
        "/incidents",
        None,
        json!({ "type": "SOLAR_FLARE", "subjectId": "1001" }),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &api,
        Method::POST,
        "/incidents",
        None,
        json!({ "type": "APP_FORCE_CLOSE", "subjectId": "9999" }),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, summary) = call(&api, Method::GET, "/incidents/summary", None, Value::Null);
    assert_eq!(summary["pending"], 0);
}

#[test]
fn test_subject_sync_replaces_roster() {
    let api = api();
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.0), 0));

    let roster = json!([
        { "id": "2001", "name": "Agus", "branchCode": "SBY", "referenceLat": -7.25, "referenceLon": 112.75 },
        { "id": "1001", "name": "Budi Santoso", "branchCode": "JKT" },
    ]);
    let (status, body) = call(&api, Method::PUT, "/subjects", None, roster);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subjects"], 2);

    let (_, rows) = call(&api, Method::GET, "/presence/snapshot", None, Value::Null);
    let ids: Vec<&str> = rows.as_array().unwrap().iter().map(|r| r["subject_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1001", "2001"]);
    // reference point removed by the sync
    assert_eq!(view(&rows, "1001")["geofence_status"], "unknown");

    let invalid = json!([{ "id": "3001", "name": "X", "referenceLat": 95.0, "referenceLon": 0.0 }]);
    let (status, _) = call(&api, Method::PUT, "/subjects", None, invalid);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (_, health) = call(&api, Method::GET, "/health", None, Value::Null);
    assert_eq!(health["subjects"], 2);
}

#[test]
fn test_metrics_reflect_traffic() {
    let api = api();
    call(&api, Method::POST, "/presence-sample", None, sample("1001", Some(0.0), 0));
    call(&api, Method::POST, "/presence-sample", None, sample("9999", Some(0.0), 0));
    call(&api, Method::GET, "/presence/snapshot", None, Value::Null);

    let response = api.dispatch(&Method::GET, "/metrics", None, b"");
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.contains("fieldwatch_samples_ingested_total{site=\"it\"} 1"));
    assert!(response.body.contains("fieldwatch_samples_rejected_total{site=\"it\"} 1"));
    assert!(response.body.contains("fieldwatch_snapshots_total{site=\"it\"} 1"));
}
