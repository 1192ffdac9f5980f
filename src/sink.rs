//! External alert sink.
//!
//! Delivery is best effort: the dispatcher has already recorded the alert
//! locally, so a failed delivery is logged by the caller and nothing else.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{AlertRecord, Severity};

/// Payload delivered to the external sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    pub camera_id: String,
    /// Confidence as a percentage in `[0, 100]`.
    pub confidence_percent: f32,
    pub image_path: Option<String>,
}

impl From<&AlertRecord> for AlertNotification {
    fn from(record: &AlertRecord) -> Self {
        Self {
            alert_type: record.alert_type.as_str().to_string(),
            severity: record.severity,
            description: record.description.clone(),
            camera_id: record.camera_id.clone(),
            confidence_percent: (record.confidence * 100.0).clamp(0.0, 100.0),
            image_path: record.image_path.clone(),
        }
    }
}

/// Destination for accepted alerts.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, notification: &AlertNotification) -> Result<()>;
}

/// Posts alerts as JSON to an HTTP endpoint.
///
/// Uses the blocking client: delivery happens on camera worker threads.
pub struct HttpAlertSink {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
}

impl HttpAlertSink {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

impl AlertSink for HttpAlertSink {
    fn deliver(&self, notification: &AlertNotification) -> Result<()> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| Error::SinkDelivery(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::SinkDelivery(format!(
                "POST {} returned {status}: {body}",
                self.url
            )));
        }

        tracing::debug!(url = %self.url, status = %status, "Alert delivered to sink");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, FaceLabel};
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_notification_payload_shape() {
        let record = AlertRecord {
            id: "alert_cam-1_1_0".to_string(),
            camera_id: "cam-1".to_string(),
            alert_type: FaceLabel::Helmet,
            severity: Severity::High,
            status: AlertStatus::Open,
            description: "Detected: with helmet".to_string(),
            confidence: 0.92,
            created_at: Utc::now(),
            image_path: Some("alert_images/alert_cam-1_1_0.jpg".to_string()),
        };

        let value = serde_json::to_value(AlertNotification::from(&record)).unwrap();

        assert_eq!(value["type"], json!("with helmet"));
        assert_eq!(value["severity"], json!("high"));
        assert_eq!(value["cameraId"], json!("cam-1"));
        assert_eq!(value["imagePath"], json!("alert_images/alert_cam-1_1_0.jpg"));
        let percent = value["confidencePercent"].as_f64().unwrap();
        assert!((percent - 92.0).abs() < 0.01);
    }

    #[test]
    fn test_unreachable_sink_is_delivery_error() {
        let sink = HttpAlertSink::new(
            "http://127.0.0.1:9/events",
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let notification = AlertNotification {
            alert_type: "with mask".to_string(),
            severity: Severity::High,
            description: "Detected: with mask".to_string(),
            camera_id: "cam-1".to_string(),
            confidence_percent: 90.0,
            image_path: None,
        };

        assert!(matches!(
            sink.deliver(&notification),
            Err(Error::SinkDelivery(_))
        ));
    }
}
