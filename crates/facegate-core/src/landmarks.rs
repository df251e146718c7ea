//! 106-point landmark model (InsightFace `2d106det`) and alignment stage.
//!
//! Crops a square window around each detection, regresses 106 landmarks,
//! reduces them to the five ArcFace alignment points and warps the face to
//! the canonical 112×112 crop.

use crate::alignment::{align_face, crop_scaled};
use crate::bundle::{build_session, ensure_present, LoadCause, ModelArtifact};
use crate::stages::{LandmarkAligner, StageError};
use crate::types::{AlignedFace, BoundingBox, DecodedImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::ops::Range;
use std::sync::Mutex;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 192;
/// Crop window side relative to the longer bbox side.
const LANDMARK_CROP_EXPANSION: f32 = 1.5;
const LANDMARK_POINTS: usize = 106;

// Index groups in the 106-point markup.
const LEFT_EYE: Range<usize> = 33..43;
const RIGHT_EYE: Range<usize> = 87..97;
const NOSE_TIP: usize = 86;
const MOUTH_LEFT: usize = 52;
const MOUTH_RIGHT: usize = 61;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("degenerate face box {width}x{height}")]
    DegenerateBox { width: f32, height: f32 },
    #[error("landmark session lock poisoned")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<LandmarkError> for LoadCause {
    fn from(err: LandmarkError) -> Self {
        match err {
            LandmarkError::ModelNotFound(path) => LoadCause::NotFound(path),
            other => LoadCause::InvalidModel(other.to_string()),
        }
    }
}

/// Landmark regressor plus similarity alignment.
pub struct LandmarkModel {
    session: Mutex<Session>,
}

impl LandmarkModel {
    pub fn load(artifact: &ModelArtifact) -> Result<Self, LandmarkError> {
        ensure_present(artifact).map_err(LandmarkError::ModelNotFound)?;
        let session = build_session(artifact)?;
        tracing::info!(origin = %artifact.origin(), "loaded 2d106 landmark model");
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Regress 106 landmarks for one face, in source image coordinates.
    pub fn landmarks(
        &self,
        image: &DecodedImage,
        face: &BoundingBox,
    ) -> Result<Vec<(f32, f32)>, LandmarkError> {
        let window = CropWindow::around(face)?;
        let crop = crop_scaled(image.pixels(), window.center, window.scale, LANDMARK_INPUT_SIZE);
        let input = preprocess(&crop);

        let mut session = self.session.lock().map_err(|_| LandmarkError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark output: {e}")))?;

        if raw.len() < LANDMARK_POINTS * 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }

        Ok(raw[..LANDMARK_POINTS * 2]
            .chunks_exact(2)
            .map(|p| window.to_image(p[0], p[1]))
            .collect())
    }
}

impl LandmarkAligner for LandmarkModel {
    fn align(&self, image: &DecodedImage, face: &BoundingBox) -> Result<AlignedFace, StageError> {
        let points = self.landmarks(image, face)?;
        let five = reduce_to_five(&points);
        Ok(AlignedFace {
            pixels: align_face(image.pixels(), &five),
            landmarks: five,
        })
    }
}

/// Square crop fed to the landmark model.
struct CropWindow {
    center: (f32, f32),
    /// Output pixels per source pixel.
    scale: f32,
}

impl CropWindow {
    fn around(face: &BoundingBox) -> Result<Self, LandmarkError> {
        let side = face.width.max(face.height);
        if !(side.is_finite() && side > 0.0) {
            return Err(LandmarkError::DegenerateBox {
                width: face.width,
                height: face.height,
            });
        }
        Ok(Self {
            center: face.center(),
            scale: LANDMARK_INPUT_SIZE as f32 / (side * LANDMARK_CROP_EXPANSION),
        })
    }

    /// Model output is in [-1, 1] over the crop; map it back to the image.
    fn to_image(&self, nx: f32, ny: f32) -> (f32, f32) {
        let half = LANDMARK_INPUT_SIZE as f32 / 2.0;
        let cx = (nx + 1.0) * half;
        let cy = (ny + 1.0) * half;
        (
            (cx - half) / self.scale + self.center.0,
            (cy - half) / self.scale + self.center.1,
        )
    }
}

/// Raw 0–255 RGB; the 2d106det graph normalizes internally.
fn preprocess(crop: &image::RgbImage) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32;
        }
    }
    tensor
}

fn centroid(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Reduce the 106-point markup to [left_eye, right_eye, nose, left_mouth, right_mouth].
fn reduce_to_five(points: &[(f32, f32)]) -> [(f32, f32); 5] {
    [
        centroid(&points[LEFT_EYE]),
        centroid(&points[RIGHT_EYE]),
        points[NOSE_TIP],
        points[MOUTH_LEFT],
        points[MOUTH_RIGHT],
    ]
}
