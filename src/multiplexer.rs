//! Stream multiplexer: one supervised detection loop per active camera.
//!
//! Each loop runs on the blocking pool under a small supervisor task. A loop
//! that ends, fails or panics only affects its own camera: the supervisor
//! logs the outcome and marks the camera offline on a panic. Nothing is
//! propagated to sibling loops or to the caller.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::model::CameraSource;
use crate::pipeline::ProcessedFrame;
use crate::worker::{StopSignal, WorkerContext, WorkerExit, frame_stream};

struct LoopHandle {
    camera: CameraSource,
    stop: StopSignal,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Cheaply cloneable handle to the loop supervisor.
#[derive(Clone)]
pub struct StreamMultiplexer {
    context: WorkerContext,
    loops: Arc<Mutex<HashMap<String, LoopHandle>>>,
    /// Raised on shutdown; ends every live stream.
    closing: StopSignal,
}

impl StreamMultiplexer {
    pub fn new(context: WorkerContext) -> Self {
        Self {
            context,
            loops: Arc::new(Mutex::new(HashMap::new())),
            closing: StopSignal::new(),
        }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    fn loops(&self) -> MutexGuard<'_, HashMap<String, LoopHandle>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the detection loop for a registered camera.
    ///
    /// Returns `Ok(false)` when a loop for the camera is already running.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, camera_id: &str) -> Result<bool> {
        let camera = self.context.registry.get(camera_id)?;
        let mut loops = self.loops();
        if loops.get(camera_id).is_some_and(LoopHandle::is_running) {
            return Ok(false);
        }
        let handle = self.spawn_loop(camera);
        loops.insert(camera_id.to_string(), handle);
        Ok(true)
    }

    /// Stop the camera's loop and wait until it has released its capture.
    /// Returns `false` if no loop was known.
    pub async fn stop(&self, camera_id: &str) -> bool {
        let removed = self.loops().remove(camera_id);
        let Some(handle) = removed else {
            return false;
        };
        handle.stop.stop();
        info!(camera = %camera_id, "Camera loop stop requested");
        Self::join(camera_id, handle).await;
        true
    }

    /// Stop loops whose camera was removed from the registry or changed
    /// since the loop started.
    pub async fn prune(&self) {
        let cameras = self.context.registry.list();
        let retired = Self::retire_stale(&mut self.loops(), &cameras);
        for (id, handle) in retired {
            Self::join(&id, handle).await;
        }
    }

    /// Align running loops with the registry.
    ///
    /// Loops for removed or changed cameras are stopped and awaited first;
    /// then every registered camera without a running loop gets one.
    /// Unchanged running loops are left alone.
    pub async fn sync(&self) {
        self.prune().await;

        let cameras = self.context.registry.list();
        let mut loops = self.loops();
        for camera in cameras {
            if !loops.get(&camera.id).is_some_and(LoopHandle::is_running) {
                let id = camera.id.clone();
                let handle = self.spawn_loop(camera);
                loops.insert(id, handle);
            }
        }
    }

    fn retire_stale(
        loops: &mut HashMap<String, LoopHandle>,
        cameras: &[CameraSource],
    ) -> Vec<(String, LoopHandle)> {
        let stale: Vec<String> = loops
            .iter()
            .filter(|(_, handle)| {
                !(handle.is_running() && cameras.iter().any(|c| c == &handle.camera))
            })
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| loops.remove_entry(&id))
            .inspect(|(id, handle)| {
                handle.stop.stop();
                info!(camera = %id, "Camera loop retired after registry change");
            })
            .collect()
    }

    async fn join(camera_id: &str, handle: LoopHandle) {
        if let Err(e) = handle.task.await {
            error!(camera = %camera_id, error = %e, "Camera supervisor failed");
        }
    }

    /// Ids of cameras whose loop is still running, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .loops()
            .iter()
            .filter(|(_, handle)| handle.is_running())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.loops()
            .get(camera_id)
            .is_some_and(LoopHandle::is_running)
    }

    /// Open a live annotated stream for a registered camera.
    ///
    /// The stream runs its own loop, independent of the supervised detection
    /// loop, and stops when the consumer drops it or on shutdown.
    pub fn stream(&self, camera_id: &str) -> Result<ReceiverStream<ProcessedFrame>> {
        if self.closing.is_stopped() {
            return Err(Error::Internal("shutting down".to_string()));
        }
        let worker = self.context.worker_for(camera_id)?;
        frame_stream(worker, self.closing.clone())
    }

    /// Stop every loop and live stream and wait for the supervisors to
    /// finish.
    pub async fn shutdown(&self) {
        self.closing.stop();
        let handles: Vec<(String, LoopHandle)> = self.loops().drain().collect();
        for (_, handle) in &handles {
            handle.stop.stop();
        }
        for (id, handle) in handles {
            Self::join(&id, handle).await;
        }
        info!("All camera loops stopped");
    }

    fn spawn_loop(&self, camera: CameraSource) -> LoopHandle {
        let stop = StopSignal::new();
        let loop_stop = stop.clone();
        let camera_id = camera.id.clone();
        let worker = self.context.worker(camera.clone());
        let registry = self.context.registry.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                worker.run(&|| loop_stop.is_stopped(), |_| ControlFlow::Continue(()))
            })
            .await;

            match outcome {
                Ok(WorkerExit::Offline) => {
                    info!(camera = %camera_id, "Camera loop ended offline; restart required");
                }
                Ok(exit) => {
                    info!(camera = %camera_id, exit = ?exit, "Camera loop ended");
                }
                Err(e) => {
                    error!(camera = %camera_id, error = %e, "Camera loop crashed");
                    registry.mark_offline(&camera_id);
                }
            }
        });

        info!(camera = %camera.id, "Camera loop spawned");
        LoopHandle { camera, stop, task }
    }
}
