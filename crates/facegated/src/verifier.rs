use crate::provider::ModelProvider;
use facegate_core::{
    decide, DecodedImage, ExtractionError, FaceDescriptor, MatchError, ModelBundle, ModelLoadError,
    VerificationOutcome,
};
use facegate_io::{ImageLoadError, ImageLoader, ImageSource};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Which of the two images a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Side {
    Reference,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Reference => "reference",
            Side::Candidate => "candidate",
        })
    }
}

/// Pipeline step a verification failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStage {
    ModelLoad,
    ImageLoad,
    Extraction,
    Match,
    Timeout,
    Internal,
}

impl VerificationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStage::ModelLoad => "model-load",
            VerificationStage::ImageLoad => "image-load",
            VerificationStage::Extraction => "extraction",
            VerificationStage::Match => "match",
            VerificationStage::Timeout => "timeout",
            VerificationStage::Internal => "internal",
        }
    }
}

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("{side} image: {source}")]
    ImageLoad {
        side: Side,
        #[source]
        source: ImageLoadError,
    },
    #[error("no face detected in {side} image")]
    NoFaceDetected { side: Side },
    #[error("{side} image: {source}")]
    Extraction {
        side: Side,
        #[source]
        source: ExtractionError,
    },
    #[error(transparent)]
    DimensionMismatch(#[from] MatchError),
    #[error("verification exceeded {0:?} deadline")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl VerificationError {
    pub fn stage(&self) -> VerificationStage {
        match self {
            VerificationError::ModelLoad(_) => VerificationStage::ModelLoad,
            VerificationError::ImageLoad { .. } => VerificationStage::ImageLoad,
            VerificationError::NoFaceDetected { .. } | VerificationError::Extraction { .. } => {
                VerificationStage::Extraction
            }
            VerificationError::DimensionMismatch(_) => VerificationStage::Match,
            VerificationError::Timeout(_) => VerificationStage::Timeout,
            VerificationError::Internal(_) => VerificationStage::Internal,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            VerificationError::ModelLoad(err) => err.cause.reason(),
            VerificationError::ImageLoad { source, .. } => source.reason().as_str(),
            VerificationError::NoFaceDetected { .. } => "no-face-detected",
            VerificationError::Extraction { .. } => "inference-failed",
            VerificationError::DimensionMismatch(_) => "dimension-mismatch",
            VerificationError::Timeout(_) => "deadline-exceeded",
            VerificationError::Internal(_) => "internal",
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            VerificationError::ImageLoad { side, .. }
            | VerificationError::NoFaceDetected { side }
            | VerificationError::Extraction { side, .. } => Some(*side),
            _ => None,
        }
    }
}

/// Runs one reference/candidate comparison end to end.
#[derive(Clone)]
pub struct Verifier {
    provider: Arc<ModelProvider>,
    loader: ImageLoader,
    threshold: f32,
}

impl Verifier {
    pub fn new(provider: Arc<ModelProvider>, loader: ImageLoader, threshold: f32) -> Self {
        Self {
            provider,
            loader,
            threshold,
        }
    }

    pub fn provider(&self) -> &ModelProvider {
        &self.provider
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare the most confident face of each image.
    ///
    /// Both images load concurrently; the first failure cancels the other
    /// load, which releases anything it staged.
    pub async fn verify(
        &self,
        reference: ImageSource,
        candidate: ImageSource,
    ) -> Result<VerificationOutcome, VerificationError> {
        let start = Instant::now();
        let models = self.provider.ensure_ready().await?;

        tracing::debug!(?reference, ?candidate, "loading images");
        let (reference_image, candidate_image) = tokio::try_join!(
            self.load(Side::Reference, reference),
            self.load(Side::Candidate, candidate),
        )?;

        let (reference_desc, candidate_desc) = tokio::try_join!(
            extract_on_blocking(Side::Reference, &models, reference_image),
            extract_on_blocking(Side::Candidate, &models, candidate_image),
        )?;

        let outcome = decide(&reference_desc, &candidate_desc, self.threshold).map_err(|err| {
            tracing::error!(error = %err, "descriptor dimensions disagree");
            VerificationError::DimensionMismatch(err)
        })?;

        tracing::info!(
            matched = outcome.matched,
            distance = outcome.distance,
            threshold = outcome.threshold,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "verification complete"
        );
        Ok(outcome)
    }

    /// [`verify`](Self::verify) bounded by `deadline`.
    ///
    /// On expiry the in-progress work is dropped, which releases staged files.
    pub async fn verify_with_deadline(
        &self,
        reference: ImageSource,
        candidate: ImageSource,
        deadline: Duration,
    ) -> Result<VerificationOutcome, VerificationError> {
        tokio::time::timeout(deadline, self.verify(reference, candidate))
            .await
            .map_err(|_| {
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, "verification deadline exceeded");
                VerificationError::Timeout(deadline)
            })?
    }

    async fn load(&self, side: Side, source: ImageSource) -> Result<DecodedImage, VerificationError> {
        self.loader.load(source).await.map_err(|err| {
            tracing::warn!(%side, reason = err.reason().as_str(), error = %err, "image load failed");
            VerificationError::ImageLoad { side, source: err }
        })
    }
}

async fn extract_on_blocking(
    side: Side,
    models: &Arc<ModelBundle>,
    image: DecodedImage,
) -> Result<FaceDescriptor, VerificationError> {
    let models = Arc::clone(models);
    let extracted = tokio::task::spawn_blocking(move || facegate_core::extract(image, &models))
        .await
        .map_err(|e| VerificationError::Internal(format!("extraction task failed: {e}")))?;

    match extracted {
        Ok(Some(descriptor)) => Ok(descriptor),
        Ok(None) => {
            tracing::info!(%side, "no face detected");
            Err(VerificationError::NoFaceDetected { side })
        }
        Err(source) => {
            tracing::error!(%side, stage = %source.stage, error = %source, "extraction failed");
            Err(VerificationError::Extraction { side, source })
        }
    }
}
