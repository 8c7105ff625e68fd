mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cellmon::{
    api::{create_app, AppState},
    modem::ModemSession,
    store::{OperatorsCatalog, ReadingStore, OPERATORS_FILE, READINGS_FILE},
};
use common::{FakeConnector, FakeModem};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`.

struct Harness {
    app: Router,
    _dir: TempDir,
}

async fn harness(connector: FakeConnector) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = ReadingStore::open(dir.path().join(READINGS_FILE)).await.unwrap();
    let operators = OperatorsCatalog::open(dir.path().join(OPERATORS_FILE))
        .await
        .unwrap();
    let modem = ModemSession::new(connector, Duration::from_millis(20));

    Harness {
        app: create_app(AppState {
            store: Arc::new(store),
            operators: Arc::new(operators),
            modem: Arc::new(modem),
        }),
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("failed to get response");
    let status = response.status();
    let body = response.into_body().collect().await.expect("body collect").to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("json body")
    };

    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn valid_payload() -> Value {
    json!({
        "operator": "MTN",
        "signal_strength": -75,
        "network_type": "4G",
        "latitude": 6.5244,
        "longitude": 3.3792,
    })
}

#[tokio::test]
async fn accepted_reading_becomes_latest() {
    let h = harness(FakeConnector::missing()).await;

    let (status, body) = send(&h.app, post_json("/api/record", &valid_payload())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["id"], 1);

    let (status, latest) = send(&h.app, get("/api/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], 1);
    assert_eq!(latest["operator"], "MTN");
    assert_eq!(latest["signal_strength"], -75);
    assert_eq!(latest["network_type"], "4G");
    assert_eq!(latest["availability"], true);
    assert_eq!(latest["signal_quality"], 64);
    assert!(latest["date"].is_string() && latest["time"].is_string());
}

#[tokio::test]
async fn out_of_range_signal_is_a_client_error() {
    let h = harness(FakeConnector::missing()).await;

    let mut payload = valid_payload();
    payload["signal_strength"] = json!("-200");
    let (status, body) = send(&h.app, post_json("/api/record", &payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Invalid signal strength range");

    let (status, _) = send(&h.app, get("/api/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_payloads_are_client_errors() {
    let h = harness(FakeConnector::missing()).await;

    let mut missing = valid_payload();
    missing.as_object_mut().unwrap().remove("operator");
    let mut bad_lat = valid_payload();
    bad_lat["latitude"] = json!("somewhere");

    for (payload, message) in [
        (missing, "Missing required fields"),
        (bad_lat, "Invalid latitude or longitude"),
    ] {
        let (status, body) = send(&h.app, post_json("/api/record", &payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], message);
    }

    let garbage = Request::builder()
        .method("POST")
        .uri("/api/record")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.app, garbage).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid JSON payload");
}

#[tokio::test]
async fn history_lists_recent_readings() {
    let h = harness(FakeConnector::missing()).await;
    for signal in [-60, -110] {
        let mut payload = valid_payload();
        payload["signal_strength"] = json!(signal);
        payload["availability"] = json!(signal > -100);
        send(&h.app, post_json("/api/record", &payload)).await;
    }

    let (status, body) = send(&h.app, get("/api/history?days=1")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["network_operator"], "MTN");
    assert_eq!(entries[0]["signal_quality"], 85);
    assert_eq!(entries[0]["availability"], "Available");
    assert_eq!(entries[1]["availability"], "Unavailable");
}

#[tokio::test]
async fn history_with_an_enormous_window_returns_everything() {
    let h = harness(FakeConnector::missing()).await;
    send(&h.app, post_json("/api/record", &valid_payload())).await;

    let (status, body) = send(&h.app, get("/api/history?days=4294967295")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn operators_are_seeded() {
    let h = harness(FakeConnector::missing()).await;

    let (status, body) = send(&h.app, get("/api/operators")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "MTN");
    assert_eq!(body[1]["name"], "Glo");
    assert_eq!(body[1]["network_code"], "005");
}

#[tokio::test]
async fn status_reports_live_modem() {
    let h = harness(FakeModem::sim800().connector()).await;

    let (status, body) = send(&h.app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"], "ready");
    assert_eq!(body["module_detected"], true);
    assert_eq!(body["sim_inserted"], true);
    assert_eq!(body["signal"]["csq"], 20);
    assert_eq!(body["signal"]["dbm"], -73);
    assert_eq!(body["network_operator"], Value::Null);
}

#[tokio::test]
async fn status_without_modem_is_not_an_error() {
    let h = harness(FakeConnector::missing()).await;

    let (status, body) = send(&h.app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"], "disconnected");
    assert_eq!(body["module_detected"], false);
    assert_eq!(body["signal"], Value::Null);
}
