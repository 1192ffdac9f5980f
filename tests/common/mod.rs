//! Deterministic fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use image::Rgb;

use facewatch::alert_store::AlertStore;
use facewatch::clock::{Clock, ManualClock};
use facewatch::detector::{Capture, Classifier, FaceLocator, Frame, FrameSource};
use facewatch::dispatcher::AlertDispatcher;
use facewatch::error::{AcquisitionError, Result};
use facewatch::model::{BoundingBox, CameraSource, Classification, FaceLabel};
use facewatch::multiplexer::StreamMultiplexer;
use facewatch::pipeline::FramePipeline;
use facewatch::registry::CameraRegistry;
use facewatch::sink::{AlertNotification, AlertSink};
use facewatch::worker::{WorkerContext, WorkerOptions};

pub const FRAME_WIDTH: u32 = 32;
pub const FRAME_HEIGHT: u32 = 24;

/// How a scripted camera behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Delivers frames forever.
    Healthy,
    /// Every open attempt times out.
    Unreachable,
    /// Delivers this many frames, then reports end of stream.
    Finite(usize),
}

/// Frame source driven by per-camera scripts, keyed by stream address.
///
/// Tracks how many captures are currently open so tests can check that
/// connections are released.
pub struct ScriptedFrames {
    scripts: Mutex<HashMap<String, Script>>,
    open_captures: Arc<AtomicUsize>,
    opens: AtomicUsize,
    frame_interval: Duration,
}

impl ScriptedFrames {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            open_captures: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
            frame_interval: Duration::from_millis(5),
        }
    }

    pub fn with_script(self, address: &str, script: Script) -> Self {
        self.set_script(address, script);
        self
    }

    pub fn set_script(&self, address: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.to_string(), script);
    }

    pub fn open_captures(&self) -> usize {
        self.open_captures.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl FrameSource for ScriptedFrames {
    fn open(
        &self,
        source: &CameraSource,
        _timeout: Duration,
    ) -> std::result::Result<Box<dyn Capture>, AcquisitionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&source.stream_address)
            .copied()
            .unwrap_or(Script::Healthy);

        let remaining = match script {
            Script::Unreachable => return Err(AcquisitionError::Timeout(5)),
            Script::Healthy => None,
            Script::Finite(n) => Some(n),
        };

        self.open_captures.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedCapture {
            remaining,
            interval: self.frame_interval,
            open_captures: Arc::clone(&self.open_captures),
        }))
    }
}

struct ScriptedCapture {
    remaining: Option<usize>,
    interval: Duration,
    open_captures: Arc<AtomicUsize>,
}

impl Capture for ScriptedCapture {
    fn read_frame(&mut self) -> std::result::Result<Frame, AcquisitionError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(AcquisitionError::EndOfStream);
            }
            *remaining -= 1;
        }
        std::thread::sleep(self.interval);
        Ok(blank_frame())
    }
}

impl Drop for ScriptedCapture {
    fn drop(&mut self) {
        self.open_captures.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn blank_frame() -> Frame {
    Frame::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([40, 40, 40]))
}

/// Always reports the same regions.
pub struct FixedLocator(pub Vec<BoundingBox>);

impl FixedLocator {
    pub fn one_face() -> Self {
        Self(vec![BoundingBox::new(4, 4, 16, 16)])
    }

    pub fn no_faces() -> Self {
        Self(Vec::new())
    }
}

impl FaceLocator for FixedLocator {
    fn locate_faces(&self, _frame: &Frame) -> Result<Vec<BoundingBox>> {
        Ok(self.0.clone())
    }
}

/// Returns one verdict for every region; the verdict can be swapped mid-test.
pub struct ScriptedClassifier {
    verdict: Mutex<Classification>,
    crashing: AtomicBool,
}

impl ScriptedClassifier {
    pub fn new(label: FaceLabel, confidence: f32) -> Self {
        Self {
            verdict: Mutex::new(Classification { label, confidence }),
            crashing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, label: FaceLabel, confidence: f32) {
        *self.verdict.lock().unwrap() = Classification { label, confidence };
    }

    /// Make every following call panic, like a crashing model backend.
    pub fn crash(&self) {
        self.crashing.store(true, Ordering::SeqCst);
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, _region: &Frame) -> Result<Classification> {
        if self.crashing.load(Ordering::SeqCst) {
            panic!("classifier backend crashed");
        }
        Ok(*self.verdict.lock().unwrap())
    }
}

/// Keeps every notification it receives.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<AlertNotification>>);

impl RecordingSink {
    pub fn delivered(&self) -> Vec<AlertNotification> {
        self.0.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn deliver(&self, notification: &AlertNotification) -> Result<()> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Everything a test needs to drive cameras end to end.
pub struct Harness {
    pub registry: CameraRegistry,
    pub store: AlertStore,
    pub clock: Arc<ManualClock>,
    pub frames: Arc<ScriptedFrames>,
    pub classifier: Arc<ScriptedClassifier>,
    pub sink: Arc<RecordingSink>,
    pub context: WorkerContext,
}

pub struct HarnessBuilder {
    frames: ScriptedFrames,
    locator: FixedLocator,
    classifier: ScriptedClassifier,
    threshold: f32,
    cooldown_secs: i64,
    options: WorkerOptions,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            frames: ScriptedFrames::new(),
            locator: FixedLocator::one_face(),
            classifier: ScriptedClassifier::new(FaceLabel::Normal, 0.95),
            threshold: 0.7,
            cooldown_secs: 30,
            options: WorkerOptions {
                retry_delay: Duration::ZERO,
                ..WorkerOptions::default()
            },
        }
    }

    pub fn frames(mut self, frames: ScriptedFrames) -> Self {
        self.frames = frames;
        self
    }

    pub fn locator(mut self, locator: FixedLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn classify_as(mut self, label: FaceLabel, confidence: f32) -> Self {
        self.classifier = ScriptedClassifier::new(label, confidence);
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn stride(mut self, stride: u32) -> Self {
        self.options.analysis_stride = stride;
        self
    }

    pub fn build(self) -> Harness {
        let registry = CameraRegistry::new();
        let store = AlertStore::new(50);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ));
        let frames = Arc::new(self.frames);
        let classifier = Arc::new(self.classifier);
        let sink = Arc::new(RecordingSink::default());

        let dispatcher = AlertDispatcher::new(
            store.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            chrono::Duration::seconds(self.cooldown_secs),
        )
        .with_registry(registry.clone())
        .with_sink(Arc::clone(&sink) as Arc<dyn AlertSink>);

        let pipeline = FramePipeline::new(
            Arc::new(self.locator),
            Arc::clone(&classifier) as Arc<dyn Classifier>,
            Arc::new(dispatcher),
            Arc::clone(&clock) as Arc<dyn Clock>,
            self.threshold,
        );

        let context = WorkerContext {
            pipeline: Arc::new(pipeline),
            frames: Arc::clone(&frames) as Arc<dyn FrameSource>,
            registry: registry.clone(),
            options: self.options,
        };

        Harness {
            registry,
            store,
            clock,
            frames,
            classifier,
            sink,
            context,
        }
    }
}

impl Harness {
    pub fn register(&self, cameras: &[(&str, &str)]) {
        self.registry.replace_all(
            cameras
                .iter()
                .map(|(id, address)| CameraSource::new(id, &format!("Camera {id}"), "Lobby", address))
                .collect(),
        );
    }

    pub fn multiplexer(&self) -> StreamMultiplexer {
        StreamMultiplexer::new(self.context.clone())
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
