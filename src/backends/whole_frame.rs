use crate::detector::{FaceLocator, Frame};
use crate::error::Result;
use crate::model::BoundingBox;

/// Treats the entire frame as a single face region.
///
/// Used when the classifier service does its own localisation, or for
/// cameras framed tightly on an entrance where one subject fills the view.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeFrameLocator;

impl FaceLocator for WholeFrameLocator {
    fn locate_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox::new(0, 0, width, height)])
    }
}
