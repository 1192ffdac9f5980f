//! Integration tests for the Facewatch HTTP API.
//!
//! These tests verify the full request/response cycle through the router,
//! with scripted cameras and a scripted classifier behind it.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum_test::TestServer;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tower::ServiceExt;

use common::{Harness, HarnessBuilder, Script, ScriptedFrames, wait_for};
use facewatch::api::{AppState, router};
use facewatch::model::{AlertRecord, CameraSource, CameraStatus, FaceLabel, SnapshotResponse};

fn app_state(harness: &Harness) -> AppState {
    AppState {
        registry: harness.registry.clone(),
        store: harness.store.clone(),
        multiplexer: harness.multiplexer(),
        autostart: false,
    }
}

fn create_test_server(harness: &Harness) -> TestServer {
    TestServer::new(router(app_state(harness))).unwrap()
}

fn cameras_payload() -> Value {
    json!([
        {
            "_id": "cam-1",
            "name": "Main Entrance",
            "location": "Branch 1",
            "streamUrl": "http://cam-1/video"
        },
        {
            "id": "cam-2",
            "displayName": "Vault",
            "streamAddress": "http://cam-2/video"
        }
    ])
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cameras"], 0);
}

#[tokio::test]
async fn test_update_cameras() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);

    let response = server.post("/api/cameras/update").json(&cameras_payload()).await;

    response.assert_status_ok();
    response.assert_json(&json!({ "success": true, "count": 2 }));

    let cameras: Vec<CameraSource> = server.get("/api/cameras").await.json();
    assert_eq!(cameras.len(), 2);
    assert_eq!(cameras[0].id, "cam-1");
    assert_eq!(cameras[0].display_name, "Main Entrance");
    assert_eq!(cameras[1].location, "");
}

#[tokio::test]
async fn test_get_camera() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let response = server.get("/api/cameras/cam-2").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["id"], "cam-2");
    assert_eq!(body["displayName"], "Vault");
    assert_eq!(body["streamAddress"], "http://cam-2/video");
}

#[tokio::test]
async fn test_unknown_camera_is_not_found() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);

    for path in [
        "/api/cameras/ghost",
        "/api/cameras/ghost/status",
        "/api/cameras/ghost/snapshot",
        "/video_feed/ghost",
    ] {
        let response = server.get(path).await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error_code"], "NOT_FOUND", "{path}");
    }

    server
        .post("/api/cameras/ghost/start")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .post("/api/cameras/ghost/stop")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_update_leaves_registry_unchanged() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let invalid = [
        json!({ "cameras": [] }),
        json!([{ "_id": "cam-9", "name": "No stream" }]),
        json!([
            { "_id": "dup", "name": "A", "streamUrl": "0" },
            { "_id": "dup", "name": "B", "streamUrl": "1" }
        ]),
    ];

    for payload in invalid {
        let response = server.post("/api/cameras/update").json(&payload).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
    }

    let cameras: Vec<CameraSource> = server.get("/api/cameras").await.json();
    assert_eq!(cameras.len(), 2);
}

#[tokio::test]
async fn test_empty_update_clears_registry() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let response = server.post("/api/cameras/update").json(&json!([])).await;

    response.assert_json(&json!({ "success": true, "count": 0 }));
    let cameras: Vec<CameraSource> = server.get("/api/cameras").await.json();
    assert!(cameras.is_empty());
    server
        .get("/api/cameras/cam-1/status")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_camera_statuses() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let body: Value = server.get("/api/cameras/status").await.json();

    assert_eq!(body["cam-1"]["state"], "pending");
    assert_eq!(body["cam-2"]["state"], "pending");
    assert_eq!(body["cam-1"]["recentAlertIds"], json!([]));
}

#[tokio::test]
async fn test_snapshot_dispatches_once_per_cooldown() {
    let harness = HarnessBuilder::new()
        .classify_as(FaceLabel::Mask, 0.92)
        .build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let first: SnapshotResponse = server.get("/api/cameras/cam-1/snapshot").await.json();
    assert_eq!(first.camera_id, "cam-1");
    assert_eq!(first.alerts.len(), 1);
    assert_eq!(first.alerts[0].alert_type, FaceLabel::Mask);
    let jpeg = STANDARD.decode(&first.image).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let second: SnapshotResponse = server.get("/api/cameras/cam-1/snapshot").await.json();
    assert!(second.alerts.is_empty());

    let recent: Vec<AlertRecord> = server.get("/api/alerts").await.json();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, first.alerts[0].id);

    let status: CameraStatus = server.get("/api/cameras/cam-1/status").await.json();
    assert_eq!(status.recent_alert_ids, vec![first.alerts[0].id.clone()]);
    assert!(status.last_frame_at.is_some());
}

#[tokio::test]
async fn test_snapshot_of_unreachable_camera() {
    let harness = HarnessBuilder::new()
        .frames(ScriptedFrames::new().with_script("http://cam-2/video", Script::Unreachable))
        .build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let response = server.get("/api/cameras/cam-2/snapshot").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "CAMERA_UNAVAILABLE");

    let status: Value = server.get("/api/cameras/cam-2/status").await.json();
    assert_eq!(status["state"], "offline");
}

#[tokio::test]
async fn test_alert_history_is_newest_first() {
    let harness = HarnessBuilder::new()
        .classify_as(FaceLabel::Helmet, 0.9)
        .build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    for _ in 0..12 {
        server.get("/api/cameras/cam-1/snapshot").await.assert_status_ok();
        harness.clock.advance(chrono::Duration::seconds(31));
    }

    let recent: Vec<AlertRecord> = server.get("/api/alerts").await.json();
    let all: Vec<AlertRecord> = server.get("/api/alerts/all").await.json();

    assert_eq!(recent.len(), 10);
    assert_eq!(all.len(), 12);
    assert_eq!(recent[..], all[..10]);
    assert!(all.windows(2).all(|pair| pair[0].created_at > pair[1].created_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_and_stop_camera_loop() {
    let harness = HarnessBuilder::new().build();
    let server = create_test_server(&harness);
    server.post("/api/cameras/update").json(&cameras_payload()).await;

    let started: Value = server.post("/api/cameras/cam-1/start").await.json();
    assert_eq!(started, json!({ "cameraId": "cam-1", "changed": true, "running": true }));

    let again: Value = server.post("/api/cameras/cam-1/start").await.json();
    assert_eq!(again["changed"], false);

    let body: Value = server.get("/health").await.json();
    assert_eq!(body["activeLoops"], 1);

    let stopped: Value = server.post("/api/cameras/cam-1/stop").await.json();
    assert_eq!(stopped, json!({ "cameraId": "cam-1", "changed": true, "running": false }));

    assert!(wait_for(Duration::from_secs(3), || harness.frames.open_captures() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_video_feed_streams_multipart_jpeg() {
    let harness = HarnessBuilder::new()
        .classify_as(FaceLabel::Mask, 0.9)
        .build();
    harness.register(&[("cam-1", "http://cam-1/video")]);
    let app = router(app_state(&harness));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/video_feed/cam-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(3), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));
    assert!(chunk.ends_with(b"\xFF\xD9\r\n"));
    assert_eq!(harness.frames.open_captures(), 1);

    // Client disconnects.
    drop(body);

    assert!(wait_for(Duration::from_secs(3), || harness.frames.open_captures() == 0).await);
}
