//! Detector port: frame acquisition, face location and classification.
//!
//! The pipeline consumes these traits and never implements them itself;
//! concrete adapters live in [`backends`](crate::backends) and test fakes
//! implement them directly.

use std::time::Duration;

use image::RgbImage;

use crate::error::{AcquisitionError, Result};
use crate::model::{BoundingBox, CameraSource, Classification};

/// A decoded RGB frame.
pub type Frame = RgbImage;

/// Finds face regions in a full frame.
pub trait FaceLocator: Send + Sync {
    /// May return an empty list. Must not fail for a valid decoded frame;
    /// an `Err` is treated as a detection failure for the whole frame.
    fn locate_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>>;
}

/// Classifies the pixels of one face region.
///
/// Deterministic for identical input. Confidence is in `[0, 1]`.
pub trait Classifier: Send + Sync {
    fn classify(&self, region: &Frame) -> Result<Classification>;
}

/// An open connection to a camera.
///
/// Dropping the capture releases the underlying connection.
pub trait Capture: Send {
    /// Read the next frame. Network implementations should prefer the
    /// freshest frame over queued ones.
    fn read_frame(&mut self) -> std::result::Result<Frame, AcquisitionError>;
}

/// Opens captures for camera sources.
pub trait FrameSource: Send + Sync {
    /// Open a capture, applying `timeout` to connect and to each read.
    fn open(
        &self,
        source: &CameraSource,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Capture>, AcquisitionError>;

    /// Open, read a single frame and release the connection.
    fn acquire_frame(
        &self,
        source: &CameraSource,
        timeout: Duration,
    ) -> std::result::Result<Frame, AcquisitionError> {
        let mut capture = self.open(source, timeout)?;
        capture.read_frame()
    }
}

/// Acquisition timeouts, chosen by the kind of stream address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionTimeouts {
    pub local: Duration,
    pub network: Duration,
}

impl AcquisitionTimeouts {
    pub fn for_source(&self, source: &CameraSource) -> Duration {
        if source.is_local_device() {
            self.local
        } else {
            self.network
        }
    }
}

impl Default for AcquisitionTimeouts {
    fn default() -> Self {
        Self {
            local: Duration::from_millis(1000),
            network: Duration::from_millis(5000),
        }
    }
}
