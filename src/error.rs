//! Error types for Facewatch.
//!
//! Only [`Error::InvalidInput`] and [`Error::NotFound`] are meant to reach
//! API callers as request failures. The remaining variants describe failures
//! local to one camera or one region; the pipeline logs them and degrades the
//! affected camera instead of propagating them.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed registry update payload.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown camera id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A frame could not be read from a camera.
    #[error("Acquisition failed for camera {camera_id}: {source}")]
    Acquisition {
        camera_id: String,
        #[source]
        source: AcquisitionError,
    },

    /// Face locator or classifier failed on a frame or region.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// External alert sink unreachable or returned an error status.
    #[error("Alert sink delivery failed: {0}")]
    SinkDelivery(String),

    /// Alert image could not be persisted.
    #[error("Alert image write failed: {0}")]
    ArtifactWrite(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failure to read a frame from a camera source.
///
/// `EndOfStream` is not a failure of the camera: it signals a source that
/// has nothing more to give (a finite clip, a closed MJPEG response) and ends
/// a continuous loop without counting as a strike.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("unsupported stream address: {0}")]
    Unsupported(String),

    #[error("end of stream")]
    EndOfStream,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Acquisition { .. } => (StatusCode::SERVICE_UNAVAILABLE, "CAMERA_UNAVAILABLE"),
            Error::Detection(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DETECTION_ERROR"),
            Error::SinkDelivery(_) | Error::Http(_) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR"),
            Error::ArtifactWrite(_) | Error::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR")
            }
            Error::Image(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENCODE_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "Request error");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
