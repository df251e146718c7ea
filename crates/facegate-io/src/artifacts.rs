//! Model artifact acquisition: local directory, remote base URL, or both.

use crate::fetch::{get_bytes, FetchError};
use facegate_core::{LoadCause, ModelArtifact, ModelLoadError, ModelStage};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

const DEFAULT_MODEL_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Where model artifacts are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSourceMode {
    #[default]
    Local,
    Remote,
    LocalThenRemote,
}

impl FromStr for ModelSourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ModelSourceMode::Local),
            "remote" => Ok(ModelSourceMode::Remote),
            "local-then-remote" => Ok(ModelSourceMode::LocalThenRemote),
            other => Err(format!(
                "unknown model source {other:?} (expected local, remote, or local-then-remote)"
            )),
        }
    }
}

/// Resolves each [`ModelStage`] to a [`ModelArtifact`].
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    mode: ModelSourceMode,
    model_dir: PathBuf,
    base_url: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(mode: ModelSourceMode, model_dir: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            mode,
            model_dir: model_dir.into(),
            base_url,
            timeout: DEFAULT_MODEL_FETCH_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mode(&self) -> ModelSourceMode {
        self.mode
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub async fn fetch(&self, stage: ModelStage) -> Result<ModelArtifact, ModelLoadError> {
        let result = match self.mode {
            ModelSourceMode::Local => self.local(stage).await,
            ModelSourceMode::Remote => self.remote(stage).await,
            ModelSourceMode::LocalThenRemote => match self.local(stage).await {
                Ok(artifact) => Ok(artifact),
                Err(local_err) => {
                    tracing::warn!(stage = %stage, error = %local_err, "local model missing, trying remote");
                    self.remote(stage).await
                }
            },
        };
        result.map_err(|cause| ModelLoadError::new(stage, cause))
    }

    async fn local(&self, stage: ModelStage) -> Result<ModelArtifact, LoadCause> {
        let path = self.model_dir.join(stage.file_name());
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(ModelArtifact::File(path)),
            _ => Err(LoadCause::NotFound(path.display().to_string())),
        }
    }

    async fn remote(&self, stage: ModelStage) -> Result<ModelArtifact, LoadCause> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| LoadCause::NotConfigured(format!("no base URL for {}", stage.file_name())))?;
        let url = artifact_url(base, stage);

        let start = Instant::now();
        let data = get_bytes(&self.client, &url, self.timeout, None)
            .await
            .map_err(|e| match e {
                FetchError::Timeout(_) => LoadCause::Timeout(url.clone()),
                other => LoadCause::Fetch(format!("{url}: {other}")),
            })?;

        tracing::info!(
            stage = %stage,
            url = %url,
            bytes = data.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched model artifact"
        );
        Ok(ModelArtifact::Bytes { origin: url, data })
    }
}

fn artifact_url(base: &str, stage: ModelStage) -> String {
    format!("{}/{}", base.trim_end_matches('/'), stage.file_name())
}

/// Outcome of [`download_missing`].
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<PathBuf>,
    pub present: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Download every stage artifact absent from `dir`.
///
/// Each file is written to a temporary sibling and renamed into place, so an
/// interrupted download never leaves a partial model. A failed file is
/// recorded and the remaining files are still attempted.
pub async fn download_missing(
    dir: &Path,
    base_url: &str,
    timeout: Duration,
) -> std::io::Result<DownloadReport> {
    tokio::fs::create_dir_all(dir).await?;
    let client = reqwest::Client::new();
    let mut report = DownloadReport::default();

    for stage in ModelStage::LOAD_ORDER {
        let target = dir.join(stage.file_name());
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            tracing::debug!(path = %target.display(), "model already present");
            report.present.push(target);
            continue;
        }

        let url = artifact_url(base_url, stage);
        tracing::info!(url = %url, "downloading model");
        match download_one(&client, &url, dir, &target, timeout).await {
            Ok(bytes) => {
                tracing::info!(path = %target.display(), bytes, "model downloaded");
                report.downloaded.push(target);
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "model download failed");
                report.failed.push((target, err));
            }
        }
    }

    Ok(report)
}

async fn download_one(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
    target: &Path,
    timeout: Duration,
) -> Result<usize, String> {
    let data = get_bytes(client, url, timeout, None)
        .await
        .map_err(|e| e.to_string())?;

    let staged = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(dir)
        .map_err(|e| format!("cannot create temp file: {e}"))?;
    tokio::fs::write(staged.path(), &data)
        .await
        .map_err(|e| format!("cannot write temp file: {e}"))?;
    staged
        .persist(target)
        .map_err(|e| format!("cannot move into place: {}", e.error))?;
    Ok(data.len())
}
