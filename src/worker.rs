//! Camera worker loop.
//!
//! A [`CameraWorker`] drives the [`FramePipeline`] for one camera, either once
//! ([`CameraWorker::snapshot`]) or continuously ([`CameraWorker::run`]), and
//! keeps the camera's registry status current. [`frame_stream`] wraps the
//! continuous loop in a bounded channel so HTTP consumers can pull annotated
//! frames; dropping the stream stops the loop and releases the capture.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::detector::{AcquisitionTimeouts, Capture, FrameSource};
use crate::error::{AcquisitionError, Error, Result};
use crate::model::CameraSource;
use crate::pipeline::{FramePipeline, PipelineMode, ProcessedFrame};
use crate::registry::CameraRegistry;

/// Consecutive acquisition failures after which a camera goes offline.
pub const DEFAULT_FAILURE_LIMIT: u32 = 3;

/// Frames buffered between a streaming loop and its consumer.
const STREAM_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub failure_limit: u32,
    /// Analyse every Nth frame; the others are passed through unannotated.
    pub analysis_stride: u32,
    pub mode: PipelineMode,
    pub timeouts: AcquisitionTimeouts,
    /// Pause before reconnecting after a failed acquisition.
    pub retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            failure_limit: DEFAULT_FAILURE_LIMIT,
            analysis_stride: 1,
            mode: PipelineMode::Detect,
            timeouts: AcquisitionTimeouts::default(),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Why a continuous loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop was requested or the consumer went away.
    Cancelled,
    /// The source reported end of stream.
    Exhausted,
    /// The failure limit was reached; the camera is marked offline.
    Offline,
    /// The camera is no longer registered.
    Removed,
}

/// Cooperative stop flag shared between a loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared collaborators needed to build a worker for any camera.
#[derive(Clone)]
pub struct WorkerContext {
    pub pipeline: Arc<FramePipeline>,
    pub frames: Arc<dyn FrameSource>,
    pub registry: CameraRegistry,
    pub options: WorkerOptions,
}

impl WorkerContext {
    pub fn worker(&self, camera: CameraSource) -> CameraWorker {
        CameraWorker::new(
            camera,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.frames),
            self.registry.clone(),
            self.options.clone(),
        )
    }

    /// Build a worker for a registered camera id.
    pub fn worker_for(&self, camera_id: &str) -> Result<CameraWorker> {
        let camera = self.registry.get(camera_id)?;
        Ok(self.worker(camera))
    }
}

#[derive(Clone)]
pub struct CameraWorker {
    camera: CameraSource,
    pipeline: Arc<FramePipeline>,
    frames: Arc<dyn FrameSource>,
    registry: CameraRegistry,
    options: WorkerOptions,
}

impl CameraWorker {
    pub fn new(
        camera: CameraSource,
        pipeline: Arc<FramePipeline>,
        frames: Arc<dyn FrameSource>,
        registry: CameraRegistry,
        options: WorkerOptions,
    ) -> Self {
        Self {
            camera,
            pipeline,
            frames,
            registry,
            options,
        }
    }

    pub fn camera(&self) -> &CameraSource {
        &self.camera
    }

    /// Capture and process a single frame, always dispatching alerts.
    ///
    /// A failed acquisition marks the camera offline immediately.
    pub fn snapshot(&self) -> Result<ProcessedFrame> {
        let timeout = self.options.timeouts.for_source(&self.camera);
        match self.pipeline.process_once(
            &self.camera,
            self.frames.as_ref(),
            timeout,
            PipelineMode::Detect,
        ) {
            Ok(output) => {
                self.registry
                    .record_frame(&self.camera.id, output.frame.captured_at);
                Ok(output)
            }
            Err(source) => {
                warn!(camera = %self.camera.id, error = %source, "Snapshot acquisition failed");
                self.registry.mark_offline(&self.camera.id);
                Err(Error::Acquisition {
                    camera_id: self.camera.id.clone(),
                    source,
                })
            }
        }
    }

    /// Run the continuous loop until cancelled, exhausted or offline.
    ///
    /// `emit` receives every frame in acquisition order; returning
    /// `ControlFlow::Break` ends the loop. The capture is owned by this call
    /// and dropped when it returns.
    pub fn run(
        &self,
        stop: &dyn Fn() -> bool,
        mut emit: impl FnMut(ProcessedFrame) -> ControlFlow<()>,
    ) -> WorkerExit {
        let camera_id = self.camera.id.as_str();
        let timeout = self.options.timeouts.for_source(&self.camera);
        let stride = u64::from(self.options.analysis_stride.max(1));
        let mut capture: Option<Box<dyn Capture>> = None;
        let mut failures: u32 = 0;
        let mut frame_index: u64 = 0;

        info!(camera = %camera_id, mode = ?self.options.mode, "Camera loop started");

        loop {
            if stop() {
                return self.finish(WorkerExit::Cancelled);
            }
            if !self.registry.contains(camera_id) {
                return self.finish(WorkerExit::Removed);
            }

            let attempt = match capture.as_mut() {
                Some(active) => active.read_frame(),
                None => match self.frames.open(&self.camera, timeout) {
                    Ok(opened) => capture.insert(opened).read_frame(),
                    Err(e) => Err(e),
                },
            };

            match attempt {
                Ok(frame) => {
                    failures = 0;
                    let analyse = frame_index % stride == 0;
                    frame_index += 1;

                    let output = if analyse {
                        self.pipeline
                            .process_frame(camera_id, frame, self.options.mode)
                    } else {
                        self.pipeline
                            .process_frame(camera_id, frame, PipelineMode::Passthrough)
                    };
                    self.registry
                        .record_frame(camera_id, output.frame.captured_at);

                    if emit(output).is_break() {
                        debug!(camera = %camera_id, "Frame consumer went away");
                        return self.finish(WorkerExit::Cancelled);
                    }
                }
                Err(AcquisitionError::EndOfStream) => {
                    return self.finish(WorkerExit::Exhausted);
                }
                Err(e) => {
                    // Reconnect on the next attempt.
                    capture = None;
                    failures += 1;
                    self.registry.record_failure(camera_id);
                    warn!(
                        camera = %camera_id,
                        error = %e,
                        failures,
                        limit = self.options.failure_limit,
                        "Frame acquisition failed"
                    );

                    if failures >= self.options.failure_limit {
                        self.registry.mark_offline(camera_id);
                        error!(camera = %camera_id, failures, "Camera marked offline; loop stopped");
                        return self.finish(WorkerExit::Offline);
                    }

                    if !self.options.retry_delay.is_zero() {
                        std::thread::sleep(self.options.retry_delay);
                    }
                }
            }
        }
    }

    fn finish(&self, exit: WorkerExit) -> WorkerExit {
        info!(camera = %self.camera.id, exit = ?exit, "Camera loop finished");
        exit
    }
}

/// Run `worker` continuously on a dedicated thread and expose its frames as
/// a stream.
///
/// The channel holds at most a few frames, so a slow consumer throttles the
/// loop instead of growing a backlog. Dropping the stream closes the channel;
/// the loop notices on its next iteration, stops, and releases the capture.
/// Raising `cancel` ends the stream from the producer side.
///
/// A panic inside the loop ends the stream and marks the camera offline,
/// the same way the multiplexer treats a crashed detection loop.
pub fn frame_stream(
    worker: CameraWorker,
    cancel: StopSignal,
) -> Result<ReceiverStream<ProcessedFrame>> {
    let (tx, rx) = mpsc::channel(STREAM_DEPTH);
    let name = format!("stream-{}", worker.camera().id);

    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                worker.run(&|| tx.is_closed() || cancel.is_stopped(), |output| {
                    if tx.blocking_send(output).is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                })
            }));

            if let Err(payload) = outcome {
                let camera_id = &worker.camera().id;
                error!(camera = %camera_id, panic = %panic_message(payload.as_ref()), "Live stream loop crashed");
                worker.registry.mark_offline(camera_id);
            }
        })
        .map_err(|e| Error::Internal(format!("failed to spawn stream thread: {e}")))?;

    Ok(ReceiverStream::new(rx))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
