//! Image loading: any [`ImageSource`] to a [`DecodedImage`].

use crate::fetch::{get_bytes, FetchError};
use crate::source::ImageSource;
use base64::Engine;
use facegate_core::DecodedImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("image exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("staging failed: {0}")]
    Staging(#[from] std::io::Error),
}

/// Machine-readable failure class, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageLoadReason {
    FetchFailed,
    Timeout,
    MalformedEncoding,
    DecodeFailed,
    TooLarge,
    Staging,
}

impl ImageLoadReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageLoadReason::FetchFailed => "fetch-failed",
            ImageLoadReason::Timeout => "timeout",
            ImageLoadReason::MalformedEncoding => "malformed-encoding",
            ImageLoadReason::DecodeFailed => "decode-failed",
            ImageLoadReason::TooLarge => "too-large",
            ImageLoadReason::Staging => "staging",
        }
    }
}

impl ImageLoadError {
    pub fn reason(&self) -> ImageLoadReason {
        match self {
            ImageLoadError::FetchFailed(_) => ImageLoadReason::FetchFailed,
            ImageLoadError::Timeout(_) => ImageLoadReason::Timeout,
            ImageLoadError::MalformedEncoding(_) => ImageLoadReason::MalformedEncoding,
            ImageLoadError::DecodeFailed(_) => ImageLoadReason::DecodeFailed,
            ImageLoadError::TooLarge { .. } => ImageLoadReason::TooLarge,
            ImageLoadError::Staging(_) => ImageLoadReason::Staging,
        }
    }

    /// True when the input, not the server, is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ImageLoadError::Staging(_))
    }

    fn from_fetch(err: FetchError, url: &str) -> Self {
        match err {
            FetchError::Timeout(_) => ImageLoadError::Timeout(url.to_string()),
            FetchError::TooLarge { limit } => ImageLoadError::TooLarge { limit },
            FetchError::Status(code) => ImageLoadError::FetchFailed(format!("HTTP {code} from {url}")),
            FetchError::Network(msg) => ImageLoadError::FetchFailed(format!("{url}: {msg}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Bound on each remote image fetch.
    pub fetch_timeout: Duration,
    /// Upper bound on encoded image size, for every source kind.
    pub max_bytes: usize,
    /// When set, bytes are written to a temporary file here and decoded from disk.
    pub staging_dir: Option<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            staging_dir: None,
        }
    }
}

/// Resolves image sources to decoded RGB images. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
    config: LoaderConfig,
}

impl ImageLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, ImageLoadError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ImageLoadError::FetchFailed(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load and decode one image.
    ///
    /// A staged temporary file is owned by this future: it is removed when
    /// the call returns, fails, or is cancelled.
    pub async fn load(&self, source: ImageSource) -> Result<DecodedImage, ImageLoadError> {
        let kind = source.kind();
        let bytes = self.read_bytes(source).await?;
        tracing::debug!(kind, bytes = bytes.len(), "image bytes acquired");

        match &self.config.staging_dir {
            Some(dir) => decode_staged(dir, bytes).await,
            None => decode_in_memory(bytes).await,
        }
    }

    async fn read_bytes(&self, source: ImageSource) -> Result<Vec<u8>, ImageLoadError> {
        let limit = self.config.max_bytes;
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::DataUri(uri) => decode_data_uri(&uri)?,
            ImageSource::Url(url) => {
                get_bytes(&self.client, &url, self.config.fetch_timeout, Some(limit))
                    .await
                    .map_err(|e| ImageLoadError::from_fetch(e, &url))?
            }
            ImageSource::Path(path) => read_file(&path, limit).await?,
        };

        if bytes.len() > limit {
            return Err(ImageLoadError::TooLarge { limit });
        }
        if bytes.is_empty() {
            return Err(ImageLoadError::DecodeFailed("empty image payload".into()));
        }
        Ok(bytes)
    }
}

/// Split `data:<mime>;base64,<payload>` and decode the payload.
fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ImageLoadError> {
    let rest = uri
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &uri[5..])
        .ok_or_else(|| ImageLoadError::MalformedEncoding("missing data: prefix".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageLoadError::MalformedEncoding("missing ',' separator".into()))?;
    if !header.to_ascii_lowercase().ends_with(";base64") {
        return Err(ImageLoadError::MalformedEncoding(format!(
            "expected base64 data URI, got header {header:?}"
        )));
    }

    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ImageLoadError::MalformedEncoding(format!("invalid base64: {e}")))
}

async fn read_file(path: &Path, limit: usize) -> Result<Vec<u8>, ImageLoadError> {
    let unreadable = |e: std::io::Error| ImageLoadError::FetchFailed(format!("cannot read {}: {e}", path.display()));

    let meta = tokio::fs::metadata(path).await.map_err(unreadable)?;
    if meta.len() > limit as u64 {
        return Err(ImageLoadError::TooLarge { limit });
    }
    tokio::fs::read(path).await.map_err(unreadable)
}

async fn decode_in_memory(bytes: Vec<u8>) -> Result<DecodedImage, ImageLoadError> {
    tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&bytes).map_err(|e| ImageLoadError::DecodeFailed(e.to_string()))?;
        DecodedImage::from_dynamic(image).map_err(|e| ImageLoadError::DecodeFailed(e.to_string()))
    })
    .await
    .map_err(|e| ImageLoadError::DecodeFailed(format!("decode task failed: {e}")))?
}

async fn decode_staged(dir: &Path, bytes: Vec<u8>) -> Result<DecodedImage, ImageLoadError> {
    // Dropping `staged` unlinks the file, on every path out of this function.
    let staged = tempfile::Builder::new()
        .prefix("facegate-")
        .suffix(".img")
        .tempfile_in(dir)?;
    tokio::fs::write(staged.path(), &bytes).await?;
    drop(bytes);

    let path = staged.path().to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || {
        let image = image::ImageReader::open(&path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| ImageLoadError::DecodeFailed(e.to_string()))?;
        DecodedImage::from_dynamic(image).map_err(|e| ImageLoadError::DecodeFailed(e.to_string()))
    })
    .await
    .map_err(|e| ImageLoadError::DecodeFailed(format!("decode task failed: {e}")));

    drop(staged);
    decoded?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_png, serve};

    fn data_uri(bytes: &[u8]) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    fn loader() -> ImageLoader {
        ImageLoader::new(LoaderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_data_uri_roundtrip_keeps_dimensions() {
        let image = loader()
            .load(ImageSource::DataUri(data_uri(&sample_png())))
            .await
            .unwrap();
        assert_eq!((image.width(), image.height()), (40, 30));
        assert_eq!(image.pixels().get_pixel(20, 15).0, [220, 40, 40]);
    }

    #[tokio::test]
    async fn test_data_uri_scheme_is_case_insensitive() {
        let uri = data_uri(&sample_png()).replacen("data:", "DATA:", 1);
        let source = ImageSource::parse(&uri);
        assert_eq!(source.kind(), "data-uri");
        let image = loader().load(source).await.unwrap();
        assert_eq!((image.width(), image.height()), (40, 30));
    }

    #[tokio::test]
    async fn test_bytes_source() {
        let image = loader().load(ImageSource::Bytes(sample_png())).await.unwrap();
        assert_eq!(image.width(), 40);
    }

    #[test]
    fn test_data_uri_requires_base64_header() {
        assert!(matches!(
            decode_data_uri("data:image/png,rawbytes"),
            Err(ImageLoadError::MalformedEncoding(_))
        ));
        assert!(matches!(
            decode_data_uri("image/png;base64,AAAA"),
            Err(ImageLoadError::MalformedEncoding(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64"),
            Err(ImageLoadError::MalformedEncoding(_))
        ));
        assert!(matches!(
            decode_data_uri("data:image/png;base64,@@not base64@@"),
            Err(ImageLoadError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn test_data_uri_tolerates_line_breaks() {
        assert_eq!(decode_data_uri("data:text/plain;BASE64,aGVs\nbG8=").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_undecodable_bytes() {
        let err = loader()
            .load(ImageSource::Bytes(b"GIF? no.".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::DecodeFailed);
    }

    #[tokio::test]
    async fn test_size_bound() {
        let loader = ImageLoader::new(LoaderConfig {
            max_bytes: 16,
            ..LoaderConfig::default()
        })
        .unwrap();
        let err = loader.load(ImageSource::Bytes(sample_png())).await.unwrap_err();
        assert!(matches!(err, ImageLoadError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn test_remote_fetch() {
        let base = serve().await;
        let image = loader()
            .load(ImageSource::Url(format!("{base}/photo.png")))
            .await
            .unwrap();
        assert_eq!((image.width(), image.height()), (40, 30));
    }

    #[tokio::test]
    async fn test_remote_404_is_fetch_failed() {
        let base = serve().await;
        let err = loader()
            .load(ImageSource::Url(format!("{base}/missing")))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::FetchFailed);
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_remote_timeout() {
        let base = serve().await;
        let loader = ImageLoader::new(LoaderConfig {
            fetch_timeout: Duration::from_millis(100),
            ..LoaderConfig::default()
        })
        .unwrap();
        let err = loader
            .load(ImageSource::Url(format!("{base}/slow")))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::Timeout);
    }

    #[tokio::test]
    async fn test_missing_local_path() {
        let err = loader()
            .load(ImageSource::Path("/nonexistent/face.jpg".into()))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::FetchFailed);
    }

    #[tokio::test]
    async fn test_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, sample_png()).unwrap();
        let image = loader().load(ImageSource::Path(path)).await.unwrap();
        assert_eq!(image.height(), 30);
    }

    #[tokio::test]
    async fn test_staged_files_removed_on_success_and_failure() {
        let staging = tempfile::tempdir().unwrap();
        let loader = ImageLoader::new(LoaderConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            ..LoaderConfig::default()
        })
        .unwrap();

        let ok = loader.load(ImageSource::Bytes(sample_png())).await.unwrap();
        assert_eq!(ok.width(), 40);
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

        let err = loader
            .load(ImageSource::Bytes(b"not an image at all".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::DecodeFailed);
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_staging_dir_is_server_error() {
        let loader = ImageLoader::new(LoaderConfig {
            staging_dir: Some("/nonexistent/staging".into()),
            ..LoaderConfig::default()
        })
        .unwrap();
        let err = loader.load(ImageSource::Bytes(sample_png())).await.unwrap_err();
        assert_eq!(err.reason(), ImageLoadReason::Staging);
        assert!(!err.is_client_error());
    }
}
