//! facegate-core: face descriptor extraction and matching.
//!
//! Uses SCRFD for face detection, the InsightFace 106-point model for
//! alignment and ArcFace for descriptors, all running via ONNX Runtime.
//! Stages sit behind the traits in [`stages`] so the pipeline can run with
//! any implementation.

pub mod alignment;
pub mod bundle;
pub mod detector;
pub mod extractor;
pub mod landmarks;
pub mod matcher;
pub mod recognizer;
pub mod stages;
pub mod types;

pub use bundle::{LoadCause, ModelArtifact, ModelBundle, ModelLoadError, ModelStage};
pub use detector::ScrfdDetector;
pub use extractor::{extract, ExtractionError};
pub use landmarks::LandmarkModel;
pub use matcher::{decide, EuclideanMatcher, MatchError, Matcher, VerificationOutcome, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::ArcFaceEmbedder;
pub use stages::{DescriptorEmbedder, FaceDetector, LandmarkAligner, StageError};
pub use types::{AlignedFace, BoundingBox, DecodedImage, EmptyImageError, FaceDescriptor};

use std::path::PathBuf;

/// Default model directory: `$FACEGATE_HOME/models`, else `./models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("FACEGATE_HOME")
        .map(|home| PathBuf::from(home).join("models"))
        .unwrap_or_else(|_| PathBuf::from("models"))
}
