//! The loaded model bundle and the errors raised while building it.

use crate::stages::{DescriptorEmbedder, FaceDetector, LandmarkAligner};
use ort::session::Session;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One of the three inference stages, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelStage {
    Detector,
    Landmarks,
    Embedder,
}

impl ModelStage {
    /// Stages in the fixed order they must be loaded.
    pub const LOAD_ORDER: [ModelStage; 3] = [
        ModelStage::Detector,
        ModelStage::Landmarks,
        ModelStage::Embedder,
    ];

    /// Artifact file name, both on disk and under a remote base URL.
    pub fn file_name(self) -> &'static str {
        match self {
            ModelStage::Detector => "det_10g.onnx",
            ModelStage::Landmarks => "2d106det.onnx",
            ModelStage::Embedder => "w600k_r50.onnx",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelStage::Detector => "detector",
            ModelStage::Landmarks => "landmarks",
            ModelStage::Embedder => "embedder",
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw model bytes, either on disk or already in memory.
#[derive(Debug, Clone)]
pub enum ModelArtifact {
    File(PathBuf),
    Bytes { origin: String, data: Vec<u8> },
}

impl ModelArtifact {
    /// Human-readable origin for logs (path or URL).
    pub fn origin(&self) -> String {
        match self {
            ModelArtifact::File(path) => path.display().to_string(),
            ModelArtifact::Bytes { origin, .. } => origin.clone(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadCause {
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("no model source configured: {0}")]
    NotConfigured(String),
}

impl LoadCause {
    /// Kebab-case cause name for error payloads.
    pub fn reason(&self) -> &'static str {
        match self {
            LoadCause::NotFound(_) => "not-found",
            LoadCause::Timeout(_) => "timeout",
            LoadCause::Fetch(_) => "fetch-failed",
            LoadCause::InvalidModel(_) => "invalid-model",
            LoadCause::NotConfigured(_) => "not-configured",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to load {stage} model: {cause}")]
pub struct ModelLoadError {
    pub stage: ModelStage,
    #[source]
    pub cause: LoadCause,
}

impl ModelLoadError {
    pub fn new(stage: ModelStage, cause: LoadCause) -> Self {
        Self { stage, cause }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, LoadCause::Timeout(_))
    }
}

/// The three loaded stages. Immutable once built; share it behind an `Arc`.
pub struct ModelBundle {
    detector: Box<dyn FaceDetector>,
    aligner: Box<dyn LandmarkAligner>,
    embedder: Box<dyn DescriptorEmbedder>,
}

impl ModelBundle {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        aligner: Box<dyn LandmarkAligner>,
        embedder: Box<dyn DescriptorEmbedder>,
    ) -> Self {
        Self {
            detector,
            aligner,
            embedder,
        }
    }

    pub fn detector(&self) -> &dyn FaceDetector {
        self.detector.as_ref()
    }

    pub fn aligner(&self) -> &dyn LandmarkAligner {
        self.aligner.as_ref()
    }

    pub fn embedder(&self) -> &dyn DescriptorEmbedder {
        self.embedder.as_ref()
    }
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle").finish_non_exhaustive()
    }
}

/// Build an ONNX Runtime session from an artifact.
pub(crate) fn build_session(artifact: &ModelArtifact) -> Result<Session, ort::Error> {
    let mut builder = Session::builder()?.with_intra_threads(2)?;
    match artifact {
        ModelArtifact::File(path) => builder.commit_from_file(path),
        ModelArtifact::Bytes { data, .. } => builder.commit_from_memory(data),
    }
}

/// Fail early with a readable message when a file artifact is missing.
pub(crate) fn ensure_present(artifact: &ModelArtifact) -> Result<(), String> {
    match artifact {
        ModelArtifact::File(path) if !path.exists() => Err(path.display().to_string()),
        _ => Ok(()),
    }
}
