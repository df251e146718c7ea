//! In-process HTTP server for fetch tests.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::io::Cursor;
use std::time::Duration;

/// A 40×30 PNG with a red square in the middle.
pub(crate) fn sample_png() -> Vec<u8> {
    let img = image::RgbImage::from_fn(40, 30, |x, y| {
        if (10..30).contains(&x) && (5..25).contains(&y) {
            image::Rgb([220, 40, 40])
        } else {
            image::Rgb([255, 255, 255])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode sample png");
    buf.into_inner()
}

/// Serve fixtures on an ephemeral loopback port; returns the base URL.
///
/// Routes: `/hello`, `/photo.png`, `/not-an-image`, `/missing` (404),
/// `/slow` (sleeps 5s), two of the three model artifacts under `/models/`,
/// and a slow embedder artifact under `/slow-models/`.
pub(crate) async fn serve() -> String {
    let app = Router::new()
        .route("/hello", get(|| async { "hello" }))
        .route("/photo.png", get(|| async { sample_png() }))
        .route("/not-an-image", get(|| async { "definitely not a png" }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/models/det_10g.onnx", get(|| async { "detector-bytes" }))
        .route("/models/w600k_r50.onnx", get(|| async { "embedder-bytes" }))
        .route(
            "/slow-models/w600k_r50.onnx",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
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
