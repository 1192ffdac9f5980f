//! Facewatch - Face-obstruction surveillance for a set of network cameras.
//!
//! # API Endpoints
//!
//! - `POST /api/cameras/update` - Replace the camera registry
//! - `GET /api/cameras`, `GET /api/cameras/:id` - Camera descriptors
//! - `GET /api/cameras/status`, `GET /api/cameras/:id/status` - Camera health
//! - `POST /api/cameras/:id/start`, `POST /api/cameras/:id/stop` - Loop control
//! - `GET /api/cameras/:id/snapshot` - Annotated still plus its alerts
//! - `GET /video_feed/:id` - Live annotated MJPEG stream
//! - `GET /api/alerts`, `GET /api/alerts/all` - Alert history
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use facewatch::alert_store::AlertStore;
use facewatch::api::{AppState, router};
use facewatch::backends::{HttpFrameSource, RemoteClassifier, WholeFrameLocator};
use facewatch::clock::{Clock, SystemClock};
use facewatch::config::Config;
use facewatch::detector::{Classifier, FaceLocator, FrameSource};
use facewatch::dispatcher::AlertDispatcher;
use facewatch::multiplexer::StreamMultiplexer;
use facewatch::pipeline::FramePipeline;
use facewatch::registry::CameraRegistry;
use facewatch::sink::{AlertSink, HttpAlertSink};
use facewatch::worker::WorkerContext;

/// Adapters backed by blocking HTTP clients.
struct Backends {
    classifier: Arc<dyn Classifier>,
    sink: Option<Arc<dyn AlertSink>>,
}

impl Backends {
    fn build(config: &Config) -> facewatch::error::Result<Self> {
        let classifier = RemoteClassifier::new(&config.classifier_url, config.timeouts.network)?;
        let sink = match &config.api_events_url {
            Some(url) => Some(Arc::new(HttpAlertSink::new(
                url,
                config.api_token.clone(),
                config.sink_timeout,
            )?) as Arc<dyn AlertSink>),
            None => None,
        };
        Ok(Self {
            classifier: Arc::new(classifier),
            sink,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("facewatch=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        port = config.port,
        threshold = config.confidence_threshold,
        cooldown_secs = config.alert_cooldown.as_secs(),
        classifier = %config.classifier_url,
        "Starting Facewatch server"
    );

    // Blocking reqwest clients own a runtime of their own; build them off
    // the async executor.
    let backends = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Backends::build(&config)).await??
    };
    if backends.sink.is_none() {
        warn!("API_EVENTS_URL not set; alerts are kept locally only");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let registry = CameraRegistry::new();
    let store = AlertStore::new(config.alert_store_capacity);

    let cooldown = chrono::Duration::from_std(config.alert_cooldown)
        .context("ALERT_COOLDOWN out of range")?;
    let mut dispatcher = AlertDispatcher::new(store.clone(), Arc::clone(&clock), cooldown)
        .with_registry(registry.clone());
    if let Some(sink) = backends.sink {
        dispatcher = dispatcher.with_sink(sink);
    }
    if let Some(dir) = &config.alert_image_dir {
        dispatcher = dispatcher.with_image_dir(dir.clone());
    }

    let locator: Arc<dyn FaceLocator> = Arc::new(WholeFrameLocator);
    let pipeline = FramePipeline::new(
        locator,
        backends.classifier,
        Arc::new(dispatcher),
        clock,
        config.confidence_threshold,
    );

    let frames: Arc<dyn FrameSource> = Arc::new(HttpFrameSource::default());
    let context = WorkerContext {
        pipeline: Arc::new(pipeline),
        frames,
        registry: registry.clone(),
        options: config.worker_options(),
    };
    let multiplexer = StreamMultiplexer::new(context);

    if let Some(path) = &config.cameras_file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let payload: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        let count = registry.replace_from_payload(&payload)?;
        info!(count, file = %path.display(), "Cameras loaded");
    }

    if config.autostart_detection {
        multiplexer.sync().await;
    }

    let state = AppState {
        registry,
        store,
        multiplexer: multiplexer.clone(),
        autostart: config.autostart_detection,
    };
    let app = router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Facewatch is listening");

    // Live streams never end on their own; stopping the multiplexer first
    // lets their connections drain.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            multiplexer.shutdown().await;
        })
        .await?;

    info!("Facewatch stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
