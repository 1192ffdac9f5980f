//! Bounded in-memory alert store.
//!
//! Holds the most recent `capacity` alerts in insertion order and evicts the
//! oldest-inserted record once the capacity is exceeded. Durable storage is
//! left to whatever consumes the external alert sink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::AlertRecord;

/// Default store capacity.
pub const DEFAULT_CAPACITY: usize = 50;

/// Cheaply cloneable handle to the shared alert store.
#[derive(Clone)]
pub struct AlertStore {
    inner: Arc<Mutex<VecDeque<AlertRecord>>>,
    capacity: usize,
}

impl AlertStore {
    /// Create an empty store. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest-inserted records beyond capacity.
    pub fn append(&self, record: AlertRecord) {
        let mut alerts = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        alerts.push_back(record);
        while alerts.len() > self.capacity {
            if let Some(evicted) = alerts.pop_front() {
                tracing::debug!(alert_id = %evicted.id, "Alert evicted from store");
            }
        }
    }

    /// Top `limit` records by `created_at`, newest first.
    ///
    /// Sorted on the timestamp rather than relying on insertion order. The
    /// sort is stable, so records sharing a timestamp keep insertion order
    /// reversed (newest insert first).
    pub fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        let mut snapshot: Vec<AlertRecord> = self.all();
        snapshot.reverse();
        snapshot.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshot.truncate(limit);
        snapshot
    }

    /// Snapshot of every stored record in insertion order.
    pub fn all(&self) -> Vec<AlertRecord> {
        let alerts = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        alerts.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, FaceLabel};
    use chrono::{DateTime, Duration, Utc};

    fn record(id: &str, created_at: DateTime<Utc>) -> AlertRecord {
        AlertRecord {
            id: id.to_string(),
            camera_id: "cam-1".to_string(),
            alert_type: FaceLabel::Mask,
            severity: FaceLabel::Mask.severity(),
            status: AlertStatus::Open,
            description: "Detected: with mask".to_string(),
            confidence: 0.9,
            created_at,
            image_path: None,
        }
    }

    #[test]
    fn test_capacity_evicts_oldest_inserted() {
        let store = AlertStore::new(50);
        let start = Utc::now();

        for i in 0..51 {
            store.append(record(&format!("a{i}"), start + Duration::seconds(i)));
        }

        let all = store.all();
        assert_eq!(all.len(), 50);
        assert!(all.iter().all(|r| r.id != "a0"));
        assert_eq!(all.last().unwrap().id, "a50");
    }

    #[test]
    fn test_recent_sorts_by_created_at_not_insertion() {
        let store = AlertStore::new(10);
        let start = Utc::now();

        store.append(record("late", start + Duration::seconds(20)));
        store.append(record("early", start));
        store.append(record("middle", start + Duration::seconds(10)));

        let recent = store.recent(2);
        let ids: Vec<&str> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "middle"]);
    }

    #[test]
    fn test_recent_with_fewer_records_than_limit() {
        let store = AlertStore::new(10);
        assert!(store.recent(10).is_empty());
        store.append(record("only", Utc::now()));
        assert_eq!(store.recent(10).len(), 1);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let store = AlertStore::new(0);
        store.append(record("a", Utc::now()));
        store.append(record("b", Utc::now()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].id, "b");
    }
}
