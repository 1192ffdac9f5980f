//! Client for the classifier service's `/infer` endpoint.
//!
//! The region is JPEG-encoded and posted as `{"image_base64": ...}`. The
//! service answers `{"events": [{"type": "with mask", "score": 0.93, ...}]}`;
//! the first event is the verdict for the region.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::annotate::encode_jpeg;
use crate::detector::{Classifier, Frame};
use crate::error::{Error, Result};
use crate::model::{Classification, FaceLabel};

#[derive(Debug, Serialize)]
struct InferRequest {
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    events: Vec<InferEvent>,
}

#[derive(Debug, Deserialize)]
struct InferEvent {
    #[serde(rename = "type")]
    label: String,
    score: f32,
}

pub struct RemoteClassifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl RemoteClassifier {
    /// `base_url` is the service root; `/infer` is appended.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/infer", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Classifier for RemoteClassifier {
    fn classify(&self, region: &Frame) -> Result<Classification> {
        let jpeg = encode_jpeg(region)?;
        let request = InferRequest {
            image_base64: STANDARD.encode(jpeg),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .map_err(|e| Error::Detection(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Detection(format!(
                "POST {} returned {status}",
                self.url
            )));
        }

        let body: InferResponse = response
            .json()
            .map_err(|e| Error::Detection(format!("invalid classifier response: {e}")))?;

        parse_verdict(body)
    }
}

fn parse_verdict(body: InferResponse) -> Result<Classification> {
    let event = body
        .events
        .into_iter()
        .next()
        .ok_or_else(|| Error::Detection("classifier returned no events".to_string()))?;

    let label = FaceLabel::parse(&event.label)
        .ok_or_else(|| Error::Detection(format!("unknown label: {}", event.label)))?;

    if !event.score.is_finite() {
        return Err(Error::Detection(format!(
            "non-finite score for {label}"
        )));
    }

    Ok(Classification {
        label,
        confidence: event.score.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> InferResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_verdict_first_event() {
        let body = response(
            r#"{"events":[{"type":"with mask","score":0.93,"timestamp":"2025-01-01T00:00:00Z"},
                          {"type":"normal face","score":0.05}]}"#,
        );
        let verdict = parse_verdict(body).unwrap();
        assert_eq!(verdict.label, FaceLabel::Mask);
        assert!((verdict.confidence - 0.93).abs() < 1e-6);
    }

    #[test]
    fn test_parse_verdict_clamps_score() {
        let verdict = parse_verdict(response(r#"{"events":[{"type":"with helmet","score":1.4}]}"#))
            .unwrap();
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn test_parse_verdict_rejects_empty_and_unknown() {
        assert!(matches!(
            parse_verdict(response(r#"{"events":[]}"#)),
            Err(Error::Detection(_))
        ));
        assert!(matches!(
            parse_verdict(response(r#"{}"#)),
            Err(Error::Detection(_))
        ));
        assert!(matches!(
            parse_verdict(response(r#"{"events":[{"type":"sunglasses","score":0.9}]}"#)),
            Err(Error::Detection(_))
        ));
    }

    #[test]
    fn test_infer_url() {
        let classifier =
            RemoteClassifier::new("http://127.0.0.1:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(classifier.url(), "http://127.0.0.1:8000/infer");
    }

    #[test]
    fn test_unreachable_service_is_detection_error() {
        let classifier =
            RemoteClassifier::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let region = Frame::new(8, 8);
        assert!(matches!(
            classifier.classify(&region),
            Err(Error::Detection(_))
        ));
    }
}
