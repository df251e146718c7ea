//! HTTP surface: `POST /verify-face` and `GET /health`.

use crate::verifier::{Side, VerificationError, Verifier};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facegate_io::ImageSource;
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Room for the multipart envelope and the reference field on top of the photo.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub struct AppState {
    pub verifier: Verifier,
    /// Directory that stored reference names resolve under. Clients name a
    /// photo inside it; they never supply a path or URL.
    pub reference_base: Url,
    pub verify_timeout: Duration,
    pub max_image_bytes: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_image_bytes.saturating_add(MULTIPART_OVERHEAD);
    Router::new()
        .route("/verify-face", post(verify_face))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    success: bool,
    matched: bool,
    distance: f32,
    threshold: f32,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    matched: bool,
    stage: &'static str,
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    side: Option<Side>,
    message: String,
}

impl ErrorResponse {
    fn bad_request(reason: &'static str, message: impl Into<String>) -> Response {
        let body = Self {
            success: false,
            matched: false,
            stage: "request",
            reason,
            side: None,
            message: message.into(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }

    fn from_verification(err: &VerificationError) -> Response {
        let body = Self {
            success: false,
            matched: false,
            stage: err.stage().as_str(),
            reason: err.reason(),
            side: err.side(),
            message: err.to_string(),
        };
        (status_for(err), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    models_loaded: bool,
}

/// HTTP status for a failed verification.
pub fn status_for(err: &VerificationError) -> StatusCode {
    match err {
        VerificationError::ImageLoad { source, .. } if source.is_client_error() => {
            StatusCode::BAD_REQUEST
        }
        VerificationError::NoFaceDetected { .. } => StatusCode::BAD_REQUEST,
        VerificationError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
        VerificationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        VerificationError::ImageLoad { .. }
        | VerificationError::Extraction { .. }
        | VerificationError::DimensionMismatch(_)
        | VerificationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn verify_face(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let mut reference: Option<String> = None;
    let mut photo: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (e.status(), Json(multipart_error(e.body_text()))).into_response();
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "reference" => match field.text().await {
                Ok(text) => reference = Some(text),
                Err(e) => return (e.status(), Json(multipart_error(e.body_text()))).into_response(),
            },
            "photo" => match field.bytes().await {
                Ok(bytes) => photo = Some(bytes.to_vec()),
                Err(e) => return (e.status(), Json(multipart_error(e.body_text()))).into_response(),
            },
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }

    let Some(reference) = reference.filter(|r| !r.trim().is_empty()) else {
        return ErrorResponse::bad_request("missing-reference", "reference field is required");
    };
    let Some(photo) = photo.filter(|p| !p.is_empty()) else {
        return ErrorResponse::bad_request("missing-photo", "photo file is required");
    };

    let reference = match stored_reference(&reference, &state.reference_base) {
        Ok(source) => source,
        Err(message) => {
            tracing::warn!(reference = %reference.trim(), message, "rejected reference locator");
            return ErrorResponse::bad_request("invalid-reference", message);
        }
    };
    let candidate = ImageSource::Bytes(photo);

    match state
        .verifier
        .verify_with_deadline(reference, candidate, state.verify_timeout)
        .await
    {
        Ok(outcome) => {
            let (status, message) = if outcome.matched {
                (StatusCode::OK, "face verified")
            } else {
                (StatusCode::UNAUTHORIZED, "face does not match the reference")
            };
            let body = VerifyResponse {
                success: outcome.matched,
                matched: outcome.matched,
                distance: outcome.distance,
                threshold: outcome.threshold,
                message,
            };
            (status, Json(body)).into_response()
        }
        Err(err) => ErrorResponse::from_verification(&err),
    }
}

/// Resolve a client-supplied reference name under `base`.
///
/// Only a single bare file name is accepted. Anything that reads as a URL,
/// data URI, absolute path or traversal is refused before any I/O happens.
fn stored_reference(name: &str, base: &Url) -> Result<ImageSource, &'static str> {
    let name = name.trim();
    if !matches!(ImageSource::parse(name), ImageSource::Path(_)) {
        return Err("reference must be a stored photo name, not a URL or data URI");
    }
    if name.starts_with('.') || name.contains(['/', '\\', ':', '?', '#']) || name.contains("..") {
        return Err("reference must be a bare stored photo name");
    }
    let url = base
        .join(name)
        .map_err(|_| "reference is not a valid stored photo name")?;
    match url.as_str().strip_prefix(base.as_str()) {
        Some(rest) if !rest.is_empty() => {}
        _ => return Err("reference resolves outside the photo store"),
    }
    Ok(ImageSource::Url(url.to_string()))
}

fn multipart_error(message: String) -> ErrorResponse {
    ErrorResponse {
        success: false,
        matched: false,
        stage: "request",
        reason: "bad-multipart",
        side: None,
        message,
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        models_loaded: state.verifier.provider().is_ready(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelProvider;
    use crate::test_support::{blank_png, face_png, serve_photos, StubLoader};
    use facegate_core::{LoadCause, MatchError, ModelLoadError, ModelStage};
    use facegate_io::{ImageLoadError, ImageLoader, LoaderConfig};
    use reqwest::multipart::{Form, Part};
    use serde_json::Value;

    async fn spawn_app(reference_base: Url) -> String {
        let verifier = Verifier::new(
            Arc::new(ModelProvider::new(StubLoader)),
            ImageLoader::new(LoaderConfig::default()).unwrap(),
            0.6,
        );
        let state = Arc::new(AppState {
            verifier,
            reference_base,
            verify_timeout: Duration::from_secs(10),
            max_image_bytes: 1024 * 1024,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        format!("http://{addr}")
    }

    async fn post_verify(app: &str, form: Form) -> (StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("{app}/verify-face"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let body = response.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn form(reference: &str, photo: Vec<u8>) -> Form {
        Form::new()
            .text("reference", reference.to_string())
            .part("photo", Part::bytes(photo).file_name("photo.png"))
    }

    #[test]
    fn test_status_mapping() {
        let model = VerificationError::ModelLoad(ModelLoadError::new(
            ModelStage::Embedder,
            LoadCause::NotFound("w600k_r50.onnx".into()),
        ));
        assert_eq!(status_for(&model), StatusCode::SERVICE_UNAVAILABLE);

        let fetch = VerificationError::ImageLoad {
            side: Side::Reference,
            source: ImageLoadError::FetchFailed("HTTP 404".into()),
        };
        assert_eq!(status_for(&fetch), StatusCode::BAD_REQUEST);

        let staging = VerificationError::ImageLoad {
            side: Side::Candidate,
            source: ImageLoadError::Staging(std::io::Error::other("disk full")),
        };
        assert_eq!(status_for(&staging), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            status_for(&VerificationError::NoFaceDetected { side: Side::Candidate }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&VerificationError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&VerificationError::DimensionMismatch(MatchError::DimensionMismatch {
                left: 512,
                right: 128
            })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_verify_face_match_and_mismatch() {
        let photos = serve_photos().await;
        let base = facegate_io::directory_url(&format!("{photos}/photos")).unwrap();
        let app = spawn_app(base).await;

        let (status, body) = post_verify(&app, form("red.png", face_png([100, 0, 0]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["matched"], true);
        assert_eq!(body["distance"], 0.0);

        let (status, body) = post_verify(&app, form("red.png", face_png([10, 0, 0]))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["matched"], false);
        assert!(body["distance"].as_f64().unwrap() > 0.6);
    }

    #[tokio::test]
    async fn test_verify_face_client_errors() {
        let photos = serve_photos().await;
        let base = facegate_io::directory_url(&format!("{photos}/photos")).unwrap();
        let app = spawn_app(base).await;

        let (status, body) = post_verify(&app, form("red.png", blank_png())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["stage"], "extraction");
        assert_eq!(body["reason"], "no-face-detected");
        assert_eq!(body["side"], "candidate");

        let (status, body) = post_verify(&app, form("missing.png", face_png([100, 0, 0]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["stage"], "image-load");
        assert_eq!(body["reason"], "fetch-failed");
        assert_eq!(body["side"], "reference");

        let only_reference = Form::new().text("reference", "red.png");
        let (status, body) = post_verify(&app, only_reference).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["reason"], "missing-photo");
    }

    #[tokio::test]
    async fn test_reference_locators_are_rejected_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private-face.png");
        std::fs::write(&private, face_png([100, 0, 0])).unwrap();

        let photos = serve_photos().await;
        let base = facegate_io::directory_url(&format!("{photos}/photos")).unwrap();
        let app = spawn_app(base).await;

        let private = private.display().to_string();
        let internal = format!("{photos}/photos/red.png");
        let data_uri = "data:image/png;base64,AAAA".to_string();
        for reference in [
            private.as_str(),
            "/etc/passwd",
            "../red.png",
            "photos/red.png",
            "%2e%2e",
            "file:red.png",
            internal.as_str(),
            data_uri.as_str(),
        ] {
            let (status, body) = post_verify(&app, form(reference, face_png([100, 0, 0]))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{reference}");
            assert_eq!(body["stage"], "request", "{reference}");
            assert_eq!(body["reason"], "invalid-reference", "{reference}");
        }

        // Nothing reached the verifier, so models were never loaded.
        let body = reqwest::get(format!("{app}/health"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["models_loaded"], false);
    }

    #[test]
    fn test_stored_reference_joins_under_base() {
        let base = Url::parse("http://photos.internal/users/").unwrap();
        match stored_reference(" alice smith.png ", &base).unwrap() {
            ImageSource::Url(url) => {
                assert_eq!(url, "http://photos.internal/users/alice%20smith.png")
            }
            other => panic!("expected a URL source, got {other:?}"),
        }
        assert!(stored_reference("..", &base).is_err());
        assert!(stored_reference("%2e", &base).is_err());
        assert!(stored_reference(".hidden.png", &base).is_err());
        assert!(stored_reference("a\\b.png", &base).is_err());
    }

    #[tokio::test]
    async fn test_health_reports_model_state() {
        let app = spawn_app(Url::parse("http://127.0.0.1:9/photos/").unwrap()).await;
        let body = reqwest::get(format!("{app}/health"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["models_loaded"], false);
    }
}
