//! Capability interfaces for the three inference stages.
//!
//! The extractor only sees these traits; ONNX-backed implementations live in
//! [`crate::detector`], [`crate::landmarks`] and [`crate::recognizer`].
//! Implementations take `&self` so one loaded bundle can serve concurrent
//! extractions.

use crate::types::{AlignedFace, BoundingBox, DecodedImage, FaceDescriptor};

/// Error raised by a stage during inference.
pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Finds faces in an image.
pub trait FaceDetector: Send + Sync {
    /// All detections, in any order. An empty vector means no face.
    fn detect(&self, image: &DecodedImage) -> Result<Vec<BoundingBox>, StageError>;
}

/// Locates landmarks for one detection and warps it to the canonical crop.
pub trait LandmarkAligner: Send + Sync {
    fn align(&self, image: &DecodedImage, face: &BoundingBox) -> Result<AlignedFace, StageError>;
}

/// Turns an aligned face into a fixed-length descriptor.
pub trait DescriptorEmbedder: Send + Sync {
    fn embed(&self, face: &AlignedFace) -> Result<FaceDescriptor, StageError>;
}
