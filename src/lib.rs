//! Facewatch - Face-obstruction surveillance for a set of network cameras.
//!
//! # Overview
//!
//! Facewatch pulls frames from registered cameras, locates faces, classifies
//! each face as normal or obstructed (helmet, mask), draws the verdicts onto
//! the frame and raises deduplicated alerts for obstructions. Annotated
//! frames are served as snapshots or as live MJPEG streams.
//!
//! # Alerting Guarantees
//!
//! - At most one alert per camera and label inside the cooldown window, even
//!   with many camera loops dispatching concurrently
//! - Alert timestamps come from a single non-decreasing clock read at dispatch
//! - A failing camera, classifier call or alert sink never affects another
//!   camera's loop
//!
//! # Modules
//!
//! - [`model`]: Camera descriptors, statuses, labels and alert records
//! - [`registry`]: The authoritative set of cameras and their statuses
//! - [`alert_store`]: Bounded recent-alert store
//! - [`dispatcher`]: Cooldown-gated alert dispatch
//! - [`detector`]: Ports for frame acquisition, face location and classification
//! - [`backends`]: HTTP camera source, remote classifier, whole-frame locator
//! - [`annotate`]: Frame overlays and JPEG encoding
//! - [`pipeline`]: One locate/classify/annotate/dispatch pass
//! - [`worker`]: Snapshot and continuous camera loops
//! - [`multiplexer`]: Supervised per-camera loops
//! - [`sink`]: External alert delivery
//! - [`api`]: HTTP API handlers

pub mod alert_store;
pub mod annotate;
pub mod api;
pub mod backends;
pub mod clock;
pub mod config;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod multiplexer;
pub mod pipeline;
pub mod registry;
pub mod sink;
pub mod worker;
