//! Data models for Facewatch.
//!
//! Camera descriptors and statuses are owned by the
//! [`CameraRegistry`](crate::registry::CameraRegistry); alert records are
//! created by the [`AlertDispatcher`](crate::dispatcher::AlertDispatcher) and
//! owned by the [`AlertStore`](crate::alert_store::AlertStore) once appended.
//! Detections are ephemeral and never stored directly.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A camera known to the registry.
///
/// Replaced wholesale on every bulk update, never partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSource {
    /// Unique camera identifier.
    pub id: String,

    /// Human-readable camera name.
    pub display_name: String,

    /// Where the camera is installed.
    pub location: String,

    /// Opaque connection string: a local device index (`"0"`) or a network
    /// stream URI (`"http://192.168.1.100:8080/video"`).
    pub stream_address: String,
}

impl CameraSource {
    pub fn new(id: &str, display_name: &str, location: &str, stream_address: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            location: location.to_string(),
            stream_address: stream_address.to_string(),
        }
    }

    /// True when the stream address is a local device index rather than a
    /// network address. Only used to pick the acquisition timeout.
    pub fn is_local_device(&self) -> bool {
        let address = self.stream_address.trim();
        !address.is_empty() && address.chars().all(|c| c.is_ascii_digit())
    }

    /// Validate a bulk-update payload into a list of camera sources.
    ///
    /// The payload must be a JSON array of objects. Each object needs a
    /// non-empty `id` (or `_id`), `displayName` (or `name`) and
    /// `streamAddress` (or `streamUrl`); `location` is optional. A numeric
    /// stream address is accepted as a local device index. Duplicate ids are
    /// rejected.
    pub fn list_from_value(payload: &Value) -> Result<Vec<CameraSource>> {
        let entries = payload.as_array().ok_or_else(|| {
            Error::InvalidInput("camera update payload must be a JSON array".to_string())
        })?;

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let object = entry.as_object().ok_or_else(|| {
                Error::InvalidInput(format!("camera entry {index} is not an object"))
            })?;

            let id = required_field(object, index, &["id", "_id"])?;
            let display_name = required_field(object, index, &["displayName", "name"])?;
            let stream_address = required_field(
                object,
                index,
                &["streamAddress", "streamUrl", "stream_url"],
            )?;
            let location = object
                .get("location")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            if !seen.insert(id.clone()) {
                return Err(Error::InvalidInput(format!("duplicate camera id '{id}'")));
            }

            sources.push(CameraSource {
                id,
                display_name,
                location,
                stream_address,
            });
        }

        Ok(sources)
    }
}

fn required_field(object: &Map<String, Value>, index: usize, keys: &[&str]) -> Result<String> {
    let value = keys.iter().find_map(|key| object.get(*key));
    let text = match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if text.is_empty() {
        return Err(Error::InvalidInput(format!(
            "camera entry {index} is missing required field '{}'",
            keys[0]
        )));
    }
    Ok(text)
}

/// Operational state of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    /// Registered; no loop iteration has reported yet.
    Pending,
    /// Last acquisition succeeded.
    Online,
    /// Acquisition failed (snapshot) or hit the failure limit (continuous).
    Offline,
}

/// Per-camera operational status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub camera_id: String,
    pub state: CameraState,
    pub last_frame_at: Option<DateTime<Utc>>,
    /// Newest alert ids for this camera, oldest first.
    pub recent_alert_ids: Vec<String>,
    pub consecutive_failures: u32,
}

impl CameraStatus {
    pub fn pending(camera_id: &str) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            state: CameraState::Pending,
            last_frame_at: None,
            recent_alert_ids: Vec::new(),
            consecutive_failures: 0,
        }
    }
}

/// Rectangular face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Clip the box to a `width` x `height` frame. Returns `None` when
    /// nothing of the box lies inside the frame.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.x >= width || self.y >= height || self.w == 0 || self.h == 0 {
            return None;
        }
        let w = self.w.min(width - self.x);
        let h = self.h.min(height - self.y);
        Some(BoundingBox::new(self.x, self.y, w, h))
    }
}

/// Classifier output label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceLabel {
    #[serde(rename = "normal face")]
    Normal,
    #[serde(rename = "with helmet")]
    Helmet,
    #[serde(rename = "with mask")]
    Mask,
}

impl FaceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceLabel::Normal => "normal face",
            FaceLabel::Helmet => "with helmet",
            FaceLabel::Mask => "with mask",
        }
    }

    /// Parse the classifier service's label text.
    pub fn parse(text: &str) -> Option<FaceLabel> {
        match text.trim().to_ascii_lowercase().as_str() {
            "normal face" | "normal" => Some(FaceLabel::Normal),
            "with helmet" | "helmet" => Some(FaceLabel::Helmet),
            "with mask" | "mask" => Some(FaceLabel::Mask),
            _ => None,
        }
    }

    /// Any label other than a normal face is an obstruction class.
    pub fn is_obstruction(&self) -> bool {
        !matches!(self, FaceLabel::Normal)
    }

    /// Helmet and mask are the restricted obstruction classes.
    pub fn is_restricted(&self) -> bool {
        matches!(self, FaceLabel::Helmet | FaceLabel::Mask)
    }

    pub fn severity(&self) -> Severity {
        if self.is_restricted() {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl std::fmt::Display for FaceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict for one face region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: FaceLabel,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// One classified face region within a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub label: FaceLabel,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Resolved,
}

/// An accepted, deduplicated alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    /// `alert_{camera_id}_{created_at millis}_{sequence}`.
    pub id: String,
    pub camera_id: String,
    #[serde(rename = "type")]
    pub alert_type: FaceLabel,
    pub severity: Severity,
    pub status: AlertStatus,
    pub description: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub image_path: Option<String>,
}

/// Response for POST /api/cameras/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraUpdateResponse {
    pub success: bool,
    pub count: usize,
}

/// Response for GET /api/cameras/:id/snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub camera_id: String,
    /// Base64-encoded annotated JPEG.
    pub image: String,
    /// Alerts dispatched during this capture; suppressed ones are excluded.
    pub alerts: Vec<AlertRecord>,
}
