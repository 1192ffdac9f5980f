//! Frame processing pipeline.
//!
//! One pass: acquire a frame, locate faces, classify each region, annotate
//! the frame and hand qualifying detections to the dispatcher. The pipeline
//! never touches the camera registry; callers own status bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use image::imageops;
use tracing::{debug, warn};

use crate::annotate::AnnotatedFrame;
use crate::clock::Clock;
use crate::detector::{Classifier, FaceLocator, Frame, FrameSource};
use crate::dispatcher::AlertDispatcher;
use crate::error::AcquisitionError;
use crate::model::{AlertRecord, CameraSource, Classification, Detection};

/// Default minimum confidence for an obstruction to raise an alert.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// How much of the pipeline a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Locate, classify, annotate and dispatch.
    Detect,
    /// Locate, classify and annotate only.
    AnnotateOnly,
    /// Skip analysis; the frame is passed on unannotated.
    Passthrough,
}

/// Result of one pipeline pass.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: AnnotatedFrame,
    /// Detections that were classified and drawn.
    pub detections: Vec<Detection>,
    /// Alerts actually dispatched; suppressed ones are not listed.
    pub alerts: Vec<AlertRecord>,
}

pub struct FramePipeline {
    locator: Arc<dyn FaceLocator>,
    classifier: Arc<dyn Classifier>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    threshold: f32,
}

impl FramePipeline {
    pub fn new(
        locator: Arc<dyn FaceLocator>,
        classifier: Arc<dyn Classifier>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        threshold: f32,
    ) -> Self {
        Self {
            locator,
            classifier,
            dispatcher,
            clock,
            threshold,
        }
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// Acquire one frame from `source` and process it.
    ///
    /// The connection is opened for this single frame and released before
    /// returning.
    pub fn process_once(
        &self,
        source: &CameraSource,
        frames: &dyn FrameSource,
        timeout: Duration,
        mode: PipelineMode,
    ) -> Result<ProcessedFrame, AcquisitionError> {
        let frame = frames.acquire_frame(source, timeout)?;
        Ok(self.process_frame(&source.id, frame, mode))
    }

    /// Run locate/classify/annotate/dispatch on an acquired frame.
    ///
    /// A locator failure yields the frame unannotated; a classifier failure
    /// skips that region only. With no faces the frame is returned as is.
    pub fn process_frame(&self, camera_id: &str, frame: Frame, mode: PipelineMode) -> ProcessedFrame {
        let captured_at = self.clock.now();

        if mode == PipelineMode::Passthrough {
            return ProcessedFrame {
                frame: AnnotatedFrame::new(camera_id, captured_at, frame),
                detections: Vec::new(),
                alerts: Vec::new(),
            };
        }

        let regions = match self.locator.locate_faces(&frame) {
            Ok(regions) => regions,
            Err(e) => {
                warn!(camera = %camera_id, error = %e, "Face location failed; frame left unannotated");
                Vec::new()
            }
        };

        if regions.is_empty() {
            return ProcessedFrame {
                frame: AnnotatedFrame::new(camera_id, captured_at, frame),
                detections: Vec::new(),
                alerts: Vec::new(),
            };
        }

        // Regions are cropped from the untouched frame so earlier overlays
        // never leak into later classifications.
        let mut annotated = AnnotatedFrame::new(camera_id, captured_at, frame.clone());
        let mut detections = Vec::with_capacity(regions.len());
        let mut alerts = Vec::new();

        for region in regions {
            let Some(bounds) = region.clip_to(frame.width(), frame.height()) else {
                debug!(camera = %camera_id, region = ?region, "Face region outside frame skipped");
                continue;
            };

            let pixels = imageops::crop_imm(&frame, bounds.x, bounds.y, bounds.w, bounds.h).to_image();
            let Classification { label, confidence } = match self.classifier.classify(&pixels) {
                Ok(classification) if classification.confidence.is_finite() => classification,
                Ok(classification) => {
                    warn!(camera = %camera_id, confidence = classification.confidence, "Classifier returned a non-finite confidence; region skipped");
                    continue;
                }
                Err(e) => {
                    warn!(camera = %camera_id, error = %e, "Classification failed; region skipped");
                    continue;
                }
            };
            let confidence = confidence.clamp(0.0, 1.0);

            annotated.annotate(bounds, label, confidence);
            detections.push(Detection {
                bounding_box: bounds,
                label,
                confidence,
            });

            if mode == PipelineMode::Detect && confidence >= self.threshold && label.is_obstruction() {
                if let Some(alert) =
                    self.dispatcher
                        .dispatch(camera_id, label, confidence, Some(&annotated.image))
                {
                    alerts.push(alert);
                }
            }
        }

        ProcessedFrame {
            frame: annotated,
            detections,
            alerts,
        }
    }
}
