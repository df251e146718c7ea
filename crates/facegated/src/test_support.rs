//! Stub stages and fixtures shared by the daemon's tests.

use async_trait::async_trait;
use facegate_core::{
    AlignedFace, BoundingBox, DecodedImage, DescriptorEmbedder, FaceDescriptor, FaceDetector,
    LandmarkAligner, ModelBundle, ModelLoadError, StageError,
};
use image::{Rgb, RgbImage};
use std::io::Cursor;

use crate::provider::BundleLoader;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Treats the bounding box of all non-white pixels as the one face.
pub(crate) struct PatchDetector;

impl FaceDetector for PatchDetector {
    fn detect(&self, image: &DecodedImage) -> Result<Vec<BoundingBox>, StageError> {
        let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0, 0);
        for (x, y, px) in image.pixels().enumerate_pixels() {
            if *px != BACKGROUND {
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);
            }
        }
        if x0 == u32::MAX {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: x0 as f32,
            y: y0 as f32,
            width: (x1 - x0 + 1) as f32,
            height: (y1 - y0 + 1) as f32,
            confidence: 0.9,
            landmarks: None,
        }])
    }
}

/// Fills the canonical crop with the colour at the face center.
pub(crate) struct CenterColorAligner;

impl LandmarkAligner for CenterColorAligner {
    fn align(&self, image: &DecodedImage, face: &BoundingBox) -> Result<AlignedFace, StageError> {
        let (cx, cy) = face.center();
        let px = *image.pixels().get_pixel(cx as u32, cy as u32);
        Ok(AlignedFace {
            pixels: RgbImage::from_pixel(112, 112, px),
            landmarks: [(cx, cy); 5],
        })
    }
}

/// Descriptor is the crop's corner colour divided by 100, so a red channel
/// of 100 versus 10 gives distance 0.9.
pub(crate) struct ColorEmbedder;

impl DescriptorEmbedder for ColorEmbedder {
    fn embed(&self, face: &AlignedFace) -> Result<FaceDescriptor, StageError> {
        let Rgb([r, g, b]) = *face.pixels.get_pixel(0, 0);
        Ok(FaceDescriptor::new(vec![
            r as f32 / 100.0,
            g as f32 / 100.0,
            b as f32 / 100.0,
        ]))
    }
}

pub(crate) fn stub_bundle() -> ModelBundle {
    ModelBundle::new(
        Box::new(PatchDetector),
        Box::new(CenterColorAligner),
        Box::new(ColorEmbedder),
    )
}

pub(crate) struct StubLoader;

#[async_trait]
impl BundleLoader for StubLoader {
    async fn load(&self) -> Result<ModelBundle, ModelLoadError> {
        Ok(stub_bundle())
    }
}

/// A 64×48 white PNG with a filled `color` square in the middle.
pub(crate) fn face_png(color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_fn(64, 48, |x, y| {
        if (20..44).contains(&x) && (12..36).contains(&y) {
            Rgb(color)
        } else {
            BACKGROUND
        }
    });
    encode_png(&img)
}

/// A 64×48 all-white PNG: no face for [`PatchDetector`].
pub(crate) fn blank_png() -> Vec<u8> {
    encode_png(&RgbImage::from_pixel(64, 48, BACKGROUND))
}

fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Serve `/photos/red.png`, `/photos/missing.png` (404) and `/slow.png`
/// on a loopback port; returns the base URL.
pub(crate) async fn serve_photos() -> String {
    use axum::http::StatusCode;
    use axum::routing::get;

    let app = axum::Router::new()
        .route("/photos/red.png", get(|| async { face_png([100, 0, 0]) }))
        .route("/photos/missing.png", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/slow.png",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                face_png([100, 0, 0])
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}
