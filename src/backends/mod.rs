//! Concrete detector-port adapters.
//!
//! These sit at the outer edge of the system and are swapped for fakes in
//! tests.
//!
//! - [`http_source`]: network cameras (MJPEG streams and JPEG snapshot URLs)
//! - [`remote_classifier`]: the classifier service's `/infer` endpoint
//! - [`whole_frame`]: a locator that treats the whole frame as one region

pub mod http_source;
pub mod remote_classifier;
pub mod whole_frame;

pub use http_source::HttpFrameSource;
pub use remote_classifier::RemoteClassifier;
pub use whole_frame::WholeFrameLocator;
