//! Network camera frame source.
//!
//! Opens `http://` and `https://` stream addresses with a blocking GET.
//!
//! - `multipart/x-mixed-replace` responses (MJPEG, e.g. IP Webcam's `/video`)
//!   stay open as the capture. A reader thread drains the socket as fast as
//!   the camera sends, scanning for JPEG start/end markers and keeping only
//!   the newest complete frame; each read takes that frame, so a slow
//!   consumer skips frames instead of falling behind.
//! - Any other response is treated as a single-JPEG snapshot endpoint and is
//!   refetched on every read, at most once per `min_snapshot_interval`.
//!
//! Local device indices need a platform capture backend and are reported as
//! unsupported.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;

use crate::detector::{Capture, Frame, FrameSource};
use crate::error::AcquisitionError;
use crate::model::CameraSource;

const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on buffered MJPEG bytes without a complete frame.
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

pub struct HttpFrameSource {
    min_snapshot_interval: Duration,
}

impl Default for HttpFrameSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl HttpFrameSource {
    pub fn new(min_snapshot_interval: Duration) -> Self {
        Self {
            min_snapshot_interval,
        }
    }
}

impl FrameSource for HttpFrameSource {
    fn open(
        &self,
        source: &CameraSource,
        timeout: Duration,
    ) -> Result<Box<dyn Capture>, AcquisitionError> {
        let address = source.stream_address.trim();
        if source.is_local_device() {
            return Err(AcquisitionError::Unsupported(format!(
                "local device index {address}"
            )));
        }
        if !(address.starts_with("http://") || address.starts_with("https://")) {
            return Err(AcquisitionError::Unsupported(address.to_string()));
        }

        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Connect(e.to_string()))?;

        let response = fetch(&client, address, timeout)?;
        let is_mjpeg = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("multipart"));

        tracing::debug!(camera = %source.id, url = %address, mjpeg = is_mjpeg, "Camera connection opened");

        if is_mjpeg {
            Ok(Box::new(MjpegCapture::spawn(&source.id, response, timeout)?))
        } else {
            let first = read_body(response, timeout)?;
            Ok(Box::new(SnapshotCapture {
                client,
                url: address.to_string(),
                timeout,
                first: Some(first),
                last_fetch: Instant::now(),
                min_interval: self.min_snapshot_interval,
            }))
        }
    }
}

fn fetch(client: &Client, url: &str, timeout: Duration) -> Result<Response, AcquisitionError> {
    let response = client.get(url).send().map_err(|e| {
        if e.is_timeout() {
            AcquisitionError::Timeout(timeout.as_millis() as u64)
        } else {
            AcquisitionError::Connect(e.to_string())
        }
    })?;
    if !response.status().is_success() {
        return Err(AcquisitionError::Connect(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    Ok(response)
}

fn read_body(response: Response, timeout: Duration) -> Result<Vec<u8>, AcquisitionError> {
    let bytes = response.bytes().map_err(|e| {
        if e.is_timeout() {
            AcquisitionError::Timeout(timeout.as_millis() as u64)
        } else {
            AcquisitionError::Read(e.to_string())
        }
    })?;
    if bytes.is_empty() {
        return Err(AcquisitionError::Read("empty jpeg snapshot".to_string()));
    }
    Ok(bytes.to_vec())
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame, AcquisitionError> {
    image::load_from_memory(bytes)
        .map(|image| image.into_rgb8())
        .map_err(|e| AcquisitionError::Read(format!("decode jpeg: {e}")))
}

/// How the MJPEG reader thread ended.
#[derive(Debug, Clone)]
enum ReaderEnd {
    EndOfStream,
    Timeout,
    Failed(String),
}

#[derive(Default)]
struct LatestFrame {
    jpeg: Option<Vec<u8>>,
    ended: Option<ReaderEnd>,
}

/// Newest complete JPEG published by the reader thread.
#[derive(Default)]
struct FrameSlot {
    state: Mutex<LatestFrame>,
    ready: Condvar,
}

impl FrameSlot {
    fn publish(&self, jpeg: Vec<u8>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.jpeg = Some(jpeg);
        self.ready.notify_all();
    }

    fn end(&self, end: ReaderEnd) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.ended = Some(end);
        self.ready.notify_all();
    }
}

struct MjpegCapture {
    slot: Arc<FrameSlot>,
    closed: Arc<AtomicBool>,
    timeout: Duration,
}

impl MjpegCapture {
    fn spawn(
        camera_id: &str,
        response: Response,
        timeout: Duration,
    ) -> Result<Self, AcquisitionError> {
        let slot = Arc::new(FrameSlot::default());
        let closed = Arc::new(AtomicBool::new(false));

        let reader_slot = Arc::clone(&slot);
        let reader_closed = Arc::clone(&closed);
        std::thread::Builder::new()
            .name(format!("mjpeg-{camera_id}"))
            .spawn(move || read_mjpeg(response, &reader_slot, &reader_closed, MAX_PENDING_BYTES))
            .map_err(|e| AcquisitionError::Connect(format!("failed to spawn mjpeg reader: {e}")))?;

        Ok(Self {
            slot,
            closed,
            timeout,
        })
    }
}

impl Capture for MjpegCapture {
    fn read_frame(&mut self) -> Result<Frame, AcquisitionError> {
        let state = self
            .slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut state, _) = self
            .slot
            .ready
            .wait_timeout_while(state, self.timeout, |s| s.jpeg.is_none() && s.ended.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(jpeg) = state.jpeg.take() {
            drop(state);
            return decode_jpeg(&jpeg);
        }
        Err(match state.ended.clone() {
            Some(ReaderEnd::EndOfStream) => AcquisitionError::EndOfStream,
            Some(ReaderEnd::Failed(reason)) => AcquisitionError::Read(reason),
            Some(ReaderEnd::Timeout) | None => {
                AcquisitionError::Timeout(self.timeout.as_millis() as u64)
            }
        })
    }
}

impl Drop for MjpegCapture {
    fn drop(&mut self) {
        // The reader exits after its current read returns.
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Drain `source` into `slot` until it ends, fails or the capture is closed.
///
/// Fails once `max_pending` bytes accumulate without a complete frame.
fn read_mjpeg(mut source: impl Read, slot: &FrameSlot, closed: &AtomicBool, max_pending: usize) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    while !closed.load(Ordering::SeqCst) {
        let read = match source.read(&mut chunk) {
            Ok(0) => return slot.end(ReaderEnd::EndOfStream),
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return slot.end(ReaderEnd::Timeout);
            }
            Err(e) => return slot.end(ReaderEnd::Failed(e.to_string())),
        };
        pending.extend_from_slice(&chunk[..read]);

        if let Some((start, end)) = latest_jpeg_bounds(&pending) {
            slot.publish(pending[start..end].to_vec());
            pending.drain(..end);
        } else if pending.len() > max_pending {
            return slot.end(ReaderEnd::Failed(
                "no complete jpeg frame within buffer limit".to_string(),
            ));
        }
    }
}

struct SnapshotCapture {
    client: Client,
    url: String,
    timeout: Duration,
    first: Option<Vec<u8>>,
    last_fetch: Instant,
    min_interval: Duration,
}

impl Capture for SnapshotCapture {
    fn read_frame(&mut self) -> Result<Frame, AcquisitionError> {
        if let Some(bytes) = self.first.take() {
            return decode_jpeg(&bytes);
        }

        let elapsed = self.last_fetch.elapsed();
        if elapsed < self.min_interval {
            std::thread::sleep(self.min_interval - elapsed);
        }
        self.last_fetch = Instant::now();

        let response = fetch(&self.client, &self.url, self.timeout)?;
        let bytes = read_body(response, self.timeout)?;
        decode_jpeg(&bytes)
    }
}

/// Bounds of the last complete JPEG (SOI `FFD8` .. EOI `FFD9`) in `buffer`.
fn latest_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut latest = None;
    let mut cursor = 0;

    while let Some(start) = find_marker(buffer, cursor, 0xD8) {
        match find_marker(buffer, start + 2, 0xD9) {
            Some(eoi) => {
                let end = eoi + 2;
                latest = Some((start, end));
                cursor = end;
            }
            None => break,
        }
    }

    latest
}

fn find_marker(buffer: &[u8], from: usize, marker: u8) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|pair| pair[0] == 0xFF && pair[1] == marker)
        .map(|offset| from + offset)
}
