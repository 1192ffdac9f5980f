//! Cooldown alert dispatcher.
//!
//! Decides per `(camera, label)` pair whether an alert may fire, and on
//! acceptance persists the alert image, appends the record to the
//! [`AlertStore`], notes it on the camera status and forwards it to the
//! external sink.
//!
//! The check-then-set on the last-fired map happens under one mutex, and the
//! dispatch timestamp is read inside it. Two concurrent calls for the same
//! pair can therefore never both pass inside the cooldown window, and
//! `createdAt` is non-decreasing in acceptance order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use image::ImageFormat;
use tracing::{info, warn};

use crate::alert_store::AlertStore;
use crate::clock::Clock;
use crate::detector::Frame;
use crate::error::{Error, Result};
use crate::model::{AlertRecord, AlertStatus, FaceLabel};
use crate::registry::CameraRegistry;
use crate::sink::{AlertNotification, AlertSink};

/// Default cooldown between alerts of the same camera and label.
pub const DEFAULT_COOLDOWN_SECS: i64 = 30;

pub struct AlertDispatcher {
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    last_fired: Mutex<HashMap<(String, FaceLabel), DateTime<Utc>>>,
    sequence: AtomicU64,
    store: AlertStore,
    registry: Option<CameraRegistry>,
    sink: Option<Arc<dyn AlertSink>>,
    image_dir: Option<PathBuf>,
}

impl AlertDispatcher {
    pub fn new(store: AlertStore, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            clock,
            cooldown,
            last_fired: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            store,
            registry: None,
            sink: None,
            image_dir: None,
        }
    }

    /// Record accepted alert ids on the camera statuses of `registry`.
    pub fn with_registry(mut self, registry: CameraRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Persist alert images as `{dir}/{alert_id}.jpg`.
    ///
    /// The directory is created if missing. When it cannot be created, alerts
    /// are dispatched without images.
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                info!(dir = %dir.display(), "Alert images enabled");
                self.image_dir = Some(dir);
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot create alert image directory; images disabled");
                self.image_dir = None;
            }
        }
        self
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Fire an alert unless the pair is inside its cooldown window.
    ///
    /// Returns `true` when the alert was accepted.
    pub fn try_alert(
        &self,
        camera_id: &str,
        label: FaceLabel,
        confidence: f32,
        frame: Option<&Frame>,
    ) -> bool {
        self.dispatch(camera_id, label, confidence, frame).is_some()
    }

    /// Like [`try_alert`](Self::try_alert) but returns the created record.
    ///
    /// A suppressed call has no side effects. Image and sink failures are
    /// logged and never turn an accepted alert into a rejected one.
    pub fn dispatch(
        &self,
        camera_id: &str,
        label: FaceLabel,
        confidence: f32,
        frame: Option<&Frame>,
    ) -> Option<AlertRecord> {
        let created_at = self.admit(camera_id, label)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "alert_{}_{}_{}",
            camera_id,
            created_at.timestamp_millis(),
            sequence
        );

        let image_path = frame.and_then(|frame| match self.write_image(&id, frame) {
            Ok(path) => path,
            Err(e) => {
                warn!(camera = %camera_id, alert_id = %id, error = %e, "Failed to save alert image");
                None
            }
        });

        let record = AlertRecord {
            id,
            camera_id: camera_id.to_string(),
            alert_type: label,
            severity: label.severity(),
            status: AlertStatus::Open,
            description: format!("Detected: {label}"),
            confidence,
            created_at,
            image_path,
        };

        self.store.append(record.clone());
        if let Some(registry) = &self.registry {
            registry.record_alert(camera_id, &record.id);
        }

        info!(
            camera = %camera_id,
            alert_id = %record.id,
            alert_type = %label,
            severity = ?record.severity,
            confidence = record.confidence,
            "Alert dispatched"
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.deliver(&AlertNotification::from(&record)) {
                warn!(camera = %camera_id, alert_id = %record.id, error = %e, "Alert sink delivery failed");
            }
        }

        Some(record)
    }

    /// Atomic cooldown check-then-set. Returns the dispatch time on success.
    fn admit(&self, camera_id: &str, label: FaceLabel) -> Option<DateTime<Utc>> {
        let mut last_fired = self
            .last_fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let key = (camera_id.to_string(), label);

        if let Some(last) = last_fired.get(&key) {
            if now - *last < self.cooldown {
                tracing::debug!(camera = %camera_id, alert_type = %label, "Alert suppressed by cooldown");
                return None;
            }
        }

        last_fired.insert(key, now);
        Some(now)
    }

    fn write_image(&self, alert_id: &str, frame: &Frame) -> Result<Option<String>> {
        let Some(dir) = &self.image_dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{alert_id}.jpg"));
        frame
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| Error::ArtifactWrite(format!("{}: {e}", path.display())))?;
        Ok(Some(path.display().to_string()))
    }
}
