use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the canonical aligned face crop fed to the embedder.
pub const ALIGNED_FACE_SIZE: u32 = 112;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image has zero area ({width}x{height})")]
pub struct EmptyImageError {
    pub width: u32,
    pub height: u32,
}

/// An RGB bitmap ready for inference. Width and height are always non-zero.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn new(pixels: RgbImage) -> Result<Self, EmptyImageError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(EmptyImageError { width, height });
        }
        Ok(Self { pixels })
    }

    /// Convert any decoded raster (grayscale, RGBA, 16-bit, ...) to 8-bit RGB.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self, EmptyImageError> {
        Self::new(image.into_rgb8())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A face warped to the canonical 112×112 position.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub pixels: RgbImage,
    /// Five-point landmarks in source image coordinates that drove the warp.
    pub landmarks: [(f32, f32); 5],
}

/// Face descriptor vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
