//! Descriptor extraction: detect → align → embed on one image.

use crate::bundle::{ModelBundle, ModelStage};
use crate::stages::StageError;
use crate::types::{BoundingBox, DecodedImage, FaceDescriptor};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{stage} stage failed: {source}")]
pub struct ExtractionError {
    pub stage: ModelStage,
    #[source]
    pub source: StageError,
}

impl ExtractionError {
    fn at(stage: ModelStage) -> impl FnOnce(StageError) -> Self {
        move |source| Self { stage, source }
    }
}

/// Extract the descriptor of the most confident face in `image`.
///
/// Returns `Ok(None)` when no face is detected. The image is consumed and
/// dropped before this returns.
pub fn extract(
    image: DecodedImage,
    models: &ModelBundle,
) -> Result<Option<FaceDescriptor>, ExtractionError> {
    let faces = models
        .detector()
        .detect(&image)
        .map_err(ExtractionError::at(ModelStage::Detector))?;

    let Some(face) = most_confident(faces) else {
        tracing::debug!(width = image.width(), height = image.height(), "no face detected");
        return Ok(None);
    };

    tracing::debug!(confidence = face.confidence, "face selected");

    let aligned = models
        .aligner()
        .align(&image, &face)
        .map_err(ExtractionError::at(ModelStage::Landmarks))?;
    drop(image);

    let descriptor = models
        .embedder()
        .embed(&aligned)
        .map_err(ExtractionError::at(ModelStage::Embedder))?;

    if descriptor.is_empty() {
        return Err(ExtractionError {
            stage: ModelStage::Embedder,
            source: "embedder returned an empty descriptor".into(),
        });
    }
    if descriptor.values.iter().any(|v| !v.is_finite()) {
        return Err(ExtractionError {
            stage: ModelStage::Embedder,
            source: "embedder returned non-finite components".into(),
        });
    }

    Ok(Some(descriptor))
}

fn most_confident(faces: Vec<BoundingBox>) -> Option<BoundingBox> {
    faces
        .into_iter()
        .filter(|f| f.confidence.is_finite())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
