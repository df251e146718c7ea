//! ArcFace descriptor embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional face descriptors from aligned face crops,
//! using the w600k_r50 ArcFace model.

use crate::bundle::{build_session, ensure_present, LoadCause, ModelArtifact};
use crate::stages::{DescriptorEmbedder, StageError};
use crate::types::{AlignedFace, FaceDescriptor, ALIGNED_FACE_SIZE};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (different from SCRFD!) ---
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0: ArcFace normalizes symmetrically
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("aligned face must be {expected}x{expected}, got {width}x{height}")]
    UnsupportedShape { expected: u32, width: u32, height: u32 },
    #[error("recognizer session lock poisoned")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<RecognizerError> for LoadCause {
    fn from(err: RecognizerError) -> Self {
        match err {
            RecognizerError::ModelNotFound(path) => LoadCause::NotFound(path),
            other => LoadCause::InvalidModel(other.to_string()),
        }
    }
}

/// ArcFace-based descriptor embedder.
pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from a file or in-memory artifact.
    pub fn load(artifact: &ModelArtifact) -> Result<Self, RecognizerError> {
        ensure_present(artifact).map_err(RecognizerError::ModelNotFound)?;

        let session = build_session(artifact)?;

        tracing::info!(
            origin = %artifact.origin(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Compute an L2-normalized descriptor for an aligned 112×112 face.
    pub fn extract(&self, face: &AlignedFace) -> Result<FaceDescriptor, RecognizerError> {
        let (width, height) = face.pixels.dimensions();
        if width != ALIGNED_FACE_SIZE || height != ALIGNED_FACE_SIZE {
            return Err(RecognizerError::UnsupportedShape {
                expected: ALIGNED_FACE_SIZE,
                width,
                height,
            });
        }

        let input = Self::preprocess(&face.pixels);

        let mut session = self.session.lock().map_err(|_| RecognizerError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        Ok(FaceDescriptor {
            values: l2_normalize(raw_data),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112×112 RGB aligned face into a NCHW float tensor.
    fn preprocess(aligned: &image::RgbImage) -> Array4<f32> {
        let size = ALIGNED_FACE_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in aligned.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl DescriptorEmbedder for ArcFaceEmbedder {
    fn embed(&self, face: &AlignedFace) -> Result<FaceDescriptor, StageError> {
        Ok(self.extract(face)?)
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
