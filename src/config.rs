//! Runtime configuration loaded from environment variables.
//!
//! Every setting has a default; see [`Config::from_env`]. Values that parse
//! but make no sense (a threshold above 1, a zero failure limit) are rejected
//! at startup rather than silently clamped.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alert_store::DEFAULT_CAPACITY;
use crate::detector::AcquisitionTimeouts;
use crate::dispatcher::DEFAULT_COOLDOWN_SECS;
use crate::error::{Error, Result};
use crate::pipeline::{DEFAULT_CONFIDENCE_THRESHOLD, PipelineMode};
use crate::worker::{DEFAULT_FAILURE_LIMIT, WorkerOptions};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 5000;

const DEFAULT_IMAGE_DIR: &str = "alert_images";
const DEFAULT_CLASSIFIER_URL: &str = "http://127.0.0.1:9000";
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 8;
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 5000;
const DEFAULT_LOCAL_TIMEOUT_MS: u64 = 1000;
const DEFAULT_ANALYSIS_STRIDE: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub confidence_threshold: f32,
    pub alert_cooldown: Duration,
    pub alert_store_capacity: usize,
    /// `None` when `SAVE_ALERT_IMAGES` is false.
    pub alert_image_dir: Option<PathBuf>,
    pub api_events_url: Option<String>,
    pub api_token: Option<String>,
    pub sink_timeout: Duration,
    pub classifier_url: String,
    pub timeouts: AcquisitionTimeouts,
    pub failure_limit: u32,
    pub analysis_stride: u32,
    pub stream_alerts: bool,
    pub cameras_file: Option<PathBuf>,
    pub autostart_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            alert_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS as u64),
            alert_store_capacity: DEFAULT_CAPACITY,
            alert_image_dir: Some(PathBuf::from(DEFAULT_IMAGE_DIR)),
            api_events_url: None,
            api_token: None,
            sink_timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_SECS),
            classifier_url: DEFAULT_CLASSIFIER_URL.to_string(),
            timeouts: AcquisitionTimeouts {
                local: Duration::from_millis(DEFAULT_LOCAL_TIMEOUT_MS),
                network: Duration::from_millis(DEFAULT_NETWORK_TIMEOUT_MS),
            },
            failure_limit: DEFAULT_FAILURE_LIMIT,
            analysis_stride: DEFAULT_ANALYSIS_STRIDE,
            stream_alerts: true,
            cameras_file: None,
            autostart_detection: true,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `FACEWATCH_PORT` | 5000 |
    /// | `CONFIDENCE_THRESHOLD` | 0.7 |
    /// | `ALERT_COOLDOWN` | 30 (seconds) |
    /// | `ALERT_STORE_CAPACITY` | 50 |
    /// | `ALERT_IMAGE_DIR` | `alert_images` |
    /// | `SAVE_ALERT_IMAGES` | true |
    /// | `API_EVENTS_URL` | unset |
    /// | `AI_SERVICE_API_TOKEN` | unset |
    /// | `SINK_TIMEOUT_SECS` | 8 |
    /// | `CLASSIFIER_URL` | `http://127.0.0.1:9000` |
    /// | `NETWORK_TIMEOUT_MS` | 5000 |
    /// | `LOCAL_TIMEOUT_MS` | 1000 |
    /// | `FAILURE_LIMIT` | 3 |
    /// | `ANALYSIS_STRIDE` | 3 |
    /// | `STREAM_ALERTS` | true |
    /// | `CAMERAS_FILE` | unset |
    /// | `AUTOSTART_DETECTION` | true |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        let save_images = parse_bool(&get, "SAVE_ALERT_IMAGES", true)?;
        let image_dir = get("ALERT_IMAGE_DIR").unwrap_or_else(|| DEFAULT_IMAGE_DIR.to_string());

        let config = Config {
            port: parse(&get, "FACEWATCH_PORT", defaults.port)?,
            confidence_threshold: parse(&get, "CONFIDENCE_THRESHOLD", defaults.confidence_threshold)?,
            alert_cooldown: Duration::from_secs(parse(&get, "ALERT_COOLDOWN", DEFAULT_COOLDOWN_SECS as u64)?),
            alert_store_capacity: parse(&get, "ALERT_STORE_CAPACITY", defaults.alert_store_capacity)?,
            alert_image_dir: save_images.then(|| PathBuf::from(image_dir)),
            api_events_url: get("API_EVENTS_URL"),
            api_token: get("AI_SERVICE_API_TOKEN"),
            sink_timeout: Duration::from_secs(parse(&get, "SINK_TIMEOUT_SECS", DEFAULT_SINK_TIMEOUT_SECS)?),
            classifier_url: get("CLASSIFIER_URL").unwrap_or(defaults.classifier_url),
            timeouts: AcquisitionTimeouts {
                local: Duration::from_millis(parse(&get, "LOCAL_TIMEOUT_MS", DEFAULT_LOCAL_TIMEOUT_MS)?),
                network: Duration::from_millis(parse(
                    &get,
                    "NETWORK_TIMEOUT_MS",
                    DEFAULT_NETWORK_TIMEOUT_MS,
                )?),
            },
            failure_limit: parse(&get, "FAILURE_LIMIT", defaults.failure_limit)?,
            analysis_stride: parse(&get, "ANALYSIS_STRIDE", defaults.analysis_stride)?,
            stream_alerts: parse_bool(&get, "STREAM_ALERTS", defaults.stream_alerts)?,
            cameras_file: get("CAMERAS_FILE").map(PathBuf::from),
            autostart_detection: parse_bool(&get, "AUTOSTART_DETECTION", defaults.autostart_detection)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.alert_store_capacity == 0 {
            return Err(Error::Config("ALERT_STORE_CAPACITY must be at least 1".to_string()));
        }
        if self.failure_limit == 0 {
            return Err(Error::Config("FAILURE_LIMIT must be at least 1".to_string()));
        }
        if self.analysis_stride == 0 {
            return Err(Error::Config("ANALYSIS_STRIDE must be at least 1".to_string()));
        }
        if self.timeouts.local.is_zero() || self.timeouts.network.is_zero() {
            return Err(Error::Config("acquisition timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Worker options for continuous loops.
    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            failure_limit: self.failure_limit,
            analysis_stride: self.analysis_stride,
            mode: if self.stream_alerts {
                PipelineMode::Detect
            } else {
                PipelineMode::AnnotateOnly
            },
            timeouts: self.timeouts,
            ..WorkerOptions::default()
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("{key}={raw}: expected a boolean"))),
        },
        None => Ok(default),
    }
}
