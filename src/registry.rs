//! Camera registry: the known camera set and per-camera status.
//!
//! Sources and statuses live behind a single `RwLock`, so a bulk replacement
//! is observed either entirely or not at all. Status updates for an id that a
//! replacement has since removed are dropped with a warning; camera loops
//! routinely race a replacement and must not resurrect a removed camera.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{CameraSource, CameraState, CameraStatus};

/// Number of alert ids kept on each camera status.
pub const RECENT_ALERT_IDS: usize = 10;

#[derive(Default)]
struct RegistryState {
    /// Registration order.
    sources: Vec<CameraSource>,
    statuses: HashMap<String, CameraStatus>,
}

/// Cheaply cloneable handle to the shared camera registry.
#[derive(Clone, Default)]
pub struct CameraRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically replace the whole camera set.
    ///
    /// Every camera gets a fresh `Pending` status, including cameras whose id
    /// survives the replacement.
    pub fn replace_all(&self, sources: Vec<CameraSource>) {
        let statuses = sources
            .iter()
            .map(|source| (source.id.clone(), CameraStatus::pending(&source.id)))
            .collect();

        let count = sources.len();
        {
            let mut state = self.write();
            state.sources = sources;
            state.statuses = statuses;
        }

        info!(camera_count = count, "Camera registry replaced");
    }

    /// Validate a raw bulk-update payload and replace the registry with it.
    ///
    /// On `InvalidInput` the registry is left untouched.
    pub fn replace_from_payload(&self, payload: &Value) -> Result<usize> {
        let sources = CameraSource::list_from_value(payload)?;
        let count = sources.len();
        self.replace_all(sources);
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Result<CameraSource> {
        self.read()
            .sources
            .iter()
            .find(|source| source.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("camera '{id}'")))
    }

    /// Snapshot of all sources in registration order.
    pub fn list(&self) -> Vec<CameraSource> {
        self.read().sources.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().statuses.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Result<CameraStatus> {
        self.read()
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("camera '{id}'")))
    }

    /// Snapshot of every status, keyed by camera id.
    pub fn statuses(&self) -> BTreeMap<String, CameraStatus> {
        self.read()
            .statuses
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect()
    }

    /// Set a camera's state and, if given, its last frame time.
    ///
    /// Returns `false` (and logs) when the id is unknown.
    pub fn update_status(
        &self,
        id: &str,
        state: CameraState,
        last_frame_at: Option<DateTime<Utc>>,
    ) -> bool {
        self.with_status(id, |status| {
            status.state = state;
            if let Some(at) = last_frame_at {
                status.last_frame_at = Some(at);
            }
            if state == CameraState::Online {
                status.consecutive_failures = 0;
            }
        })
        .is_some()
    }

    /// Record a successful acquisition.
    pub fn record_frame(&self, id: &str, at: DateTime<Utc>) -> bool {
        self.update_status(id, CameraState::Online, Some(at))
    }

    /// Record a failed acquisition and return the consecutive failure count.
    ///
    /// The state itself is left alone; callers decide when a camera is
    /// offline.
    pub fn record_failure(&self, id: &str) -> Option<u32> {
        self.with_status(id, |status| {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.consecutive_failures
        })
    }

    pub fn mark_offline(&self, id: &str) -> bool {
        self.update_status(id, CameraState::Offline, None)
    }

    /// Append an alert id to the camera's recent list.
    pub fn record_alert(&self, id: &str, alert_id: &str) -> bool {
        self.with_status(id, |status| {
            status.recent_alert_ids.push(alert_id.to_string());
            let overflow = status
                .recent_alert_ids
                .len()
                .saturating_sub(RECENT_ALERT_IDS);
            status.recent_alert_ids.drain(..overflow);
        })
        .is_some()
    }

    fn with_status<T>(&self, id: &str, update: impl FnOnce(&mut CameraStatus) -> T) -> Option<T> {
        let mut state = self.write();
        match state.statuses.get_mut(id) {
            Some(status) => Some(update(status)),
            None => {
                warn!(camera = %id, "Status update for unknown camera ignored");
                None
            }
        }
    }
}
