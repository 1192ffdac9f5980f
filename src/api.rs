//! HTTP API handlers for Facewatch.
//!
//! Handlers are thin: they validate path/body input, call into the registry,
//! alert store and multiplexer, and map [`Error`] to a JSON error response.
//! Anything that touches a camera runs on the blocking pool, never on the
//! async executor.
//!
//! - `POST /api/cameras/update` - Replace the camera registry
//! - `GET /api/cameras` - List cameras
//! - `GET /api/cameras/:id` - Camera descriptor
//! - `GET /api/cameras/status` - Status of every camera
//! - `GET /api/cameras/:id/status` - Status of one camera
//! - `POST /api/cameras/:id/start` - Start the camera's detection loop
//! - `POST /api/cameras/:id/stop` - Stop the camera's detection loop
//! - `GET /api/cameras/:id/snapshot` - One annotated frame plus its alerts
//! - `GET /video_feed/:id` - Live annotated MJPEG stream
//! - `GET /api/alerts` - Ten most recent alerts
//! - `GET /api/alerts/all` - Every stored alert, newest first
//! - `GET /health` - Health check

use std::collections::BTreeMap;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use crate::alert_store::AlertStore;
use crate::error::{Error, Result};
use crate::model::{
    AlertRecord, CameraSource, CameraStatus, CameraUpdateResponse, SnapshotResponse,
};
use crate::multiplexer::StreamMultiplexer;
use crate::registry::CameraRegistry;

/// Number of alerts returned by `GET /api/alerts`.
pub const RECENT_ALERTS: usize = 10;

/// Multipart boundary of the live stream.
pub const STREAM_BOUNDARY: &str = "frame";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: CameraRegistry,
    pub store: AlertStore,
    pub multiplexer: StreamMultiplexer,
    /// Start detection loops for new cameras after a registry update.
    pub autostart: bool,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/update", post(update_cameras))
        .route("/api/cameras/status", get(camera_statuses))
        .route("/api/cameras/:id", get(get_camera))
        .route("/api/cameras/:id/status", get(camera_status))
        .route("/api/cameras/:id/start", post(start_camera))
        .route("/api/cameras/:id/stop", post(stop_camera))
        .route("/api/cameras/:id/snapshot", get(snapshot))
        .route("/video_feed/:id", get(video_feed))
        .route("/api/alerts", get(recent_alerts))
        .route("/api/alerts/all", get(all_alerts))
        .route("/health", get(health_check))
        .with_state(state)
}

/// POST /api/cameras/update - Replace the whole camera registry.
///
/// # Request Body
///
/// ```json
/// [
///     { "_id": "cam-1", "name": "Main Entrance", "location": "Branch 1",
///       "streamUrl": "http://10.0.0.4:8080/video" }
/// ]
/// ```
///
/// A malformed payload is rejected with `400` and leaves the registry as it
/// was. Loops for removed or changed cameras are stopped.
#[instrument(skip(state, payload))]
pub async fn update_cameras(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<CameraUpdateResponse>> {
    let count = state.registry.replace_from_payload(&payload)?;

    if state.autostart {
        state.multiplexer.sync().await;
    } else {
        state.multiplexer.prune().await;
    }

    info!(count, "Camera registry replaced");
    Ok(Json(CameraUpdateResponse {
        success: true,
        count,
    }))
}

/// GET /api/cameras - All registered cameras.
#[instrument(skip(state))]
pub async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraSource>> {
    Json(state.registry.list())
}

/// GET /api/cameras/:id - One camera descriptor.
#[instrument(skip(state))]
pub async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CameraSource>> {
    Ok(Json(state.registry.get(&id)?))
}

/// GET /api/cameras/status - Status of every registered camera, keyed by id.
#[instrument(skip(state))]
pub async fn camera_statuses(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, CameraStatus>> {
    Json(state.registry.statuses())
}

/// GET /api/cameras/:id/status
#[instrument(skip(state))]
pub async fn camera_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CameraStatus>> {
    Ok(Json(state.registry.status(&id)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopControlResponse {
    pub camera_id: String,
    /// Whether this call changed the loop's state.
    pub changed: bool,
    pub running: bool,
}

/// POST /api/cameras/:id/start - Start (or restart after offline) a camera's
/// detection loop.
#[instrument(skip(state))]
pub async fn start_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoopControlResponse>> {
    let changed = state.multiplexer.start(&id)?;
    Ok(Json(LoopControlResponse {
        running: state.multiplexer.is_running(&id),
        camera_id: id,
        changed,
    }))
}

/// POST /api/cameras/:id/stop - Stop a camera's detection loop.
///
/// Responds once the loop has exited and released the camera.
#[instrument(skip(state))]
pub async fn stop_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoopControlResponse>> {
    let changed = state.multiplexer.stop(&id).await;
    if !changed && !state.registry.contains(&id) {
        return Err(Error::NotFound(format!("camera {id}")));
    }
    Ok(Json(LoopControlResponse {
        camera_id: id,
        changed,
        running: false,
    }))
}

/// GET /api/cameras/:id/snapshot - Capture and analyse a single frame.
///
/// Alerts raised by this capture go through the same cooldown as the
/// continuous loops; suppressed ones are not listed.
///
/// # Response
///
/// ```json
/// { "cameraId": "cam-1", "image": "<base64 jpeg>", "alerts": [] }
/// ```
#[instrument(skip(state))]
pub async fn snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SnapshotResponse>> {
    let worker = state.multiplexer.context().worker_for(&id)?;

    let (jpeg, alerts) = tokio::task::spawn_blocking(move || -> Result<(Vec<u8>, Vec<AlertRecord>)> {
        let output = worker.snapshot()?;
        let jpeg = output.frame.encode_jpeg()?;
        Ok((jpeg, output.alerts))
    })
    .await
    .map_err(|e| Error::Internal(format!("snapshot task failed: {e}")))??;

    info!(camera = %id, alerts = alerts.len(), "Snapshot captured");
    Ok(Json(SnapshotResponse {
        camera_id: id,
        image: STANDARD.encode(jpeg),
        alerts,
    }))
}

/// GET /video_feed/:id - Live annotated stream as
/// `multipart/x-mixed-replace; boundary=frame`.
///
/// The stream never ends on its own while the camera delivers frames.
/// Closing the connection stops the loop behind it and releases the camera.
#[instrument(skip(state))]
pub async fn video_feed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let frames = state.multiplexer.stream(&id)?;

    let camera_id = id.clone();
    let parts = frames.filter_map(move |output| match output.frame.encode_jpeg() {
        Ok(jpeg) => Some(Ok::<Bytes, Error>(multipart_chunk(&jpeg))),
        Err(e) => {
            warn!(camera = %camera_id, error = %e, "Failed to encode stream frame; skipped");
            None
        }
    });

    info!(camera = %id, "Live stream opened");
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={STREAM_BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(parts))
        .map_err(|e| Error::Internal(format!("failed to build stream response: {e}")))
}

/// One multipart part carrying a JPEG frame.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{STREAM_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// GET /api/alerts - The ten most recent alerts, newest first.
#[instrument(skip(state))]
pub async fn recent_alerts(State(state): State<AppState>) -> Json<Vec<AlertRecord>> {
    Json(state.store.recent(RECENT_ALERTS))
}

/// GET /api/alerts/all - Every stored alert, newest first.
#[instrument(skip(state))]
pub async fn all_alerts(State(state): State<AppState>) -> Json<Vec<AlertRecord>> {
    Json(state.store.recent(state.store.capacity()))
}

/// GET /health - Health check endpoint.
///
/// Returns `200 OK` with the number of registered cameras and running loops.
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "facewatch",
        "cameras": state.registry.list().len(),
        "activeLoops": state.multiplexer.active().len(),
    }))
}
