//! Single-flight model loading.

use async_trait::async_trait;
use facegate_core::{
    ArcFaceEmbedder, DescriptorEmbedder, FaceDetector, LandmarkAligner, LandmarkModel, LoadCause,
    ModelArtifact, ModelBundle, ModelLoadError, ModelStage, ScrfdDetector,
};
use facegate_io::ArtifactFetcher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;

/// Produces a complete [`ModelBundle`], stages in [`ModelStage::LOAD_ORDER`].
#[async_trait]
pub trait BundleLoader: Send + Sync {
    async fn load(&self) -> Result<ModelBundle, ModelLoadError>;
}

/// Loads the ONNX stages from wherever the [`ArtifactFetcher`] points.
pub struct OnnxBundleLoader {
    fetcher: ArtifactFetcher,
}

impl OnnxBundleLoader {
    pub fn new(fetcher: ArtifactFetcher) -> Self {
        Self { fetcher }
    }

    async fn load_stage<T, F>(&self, stage: ModelStage, build: F) -> Result<T, ModelLoadError>
    where
        T: Send + 'static,
        F: FnOnce(&ModelArtifact) -> Result<T, LoadCause> + Send + 'static,
    {
        let artifact = self.fetcher.fetch(stage).await?;
        let origin = artifact.origin();
        let start = Instant::now();

        // Session construction is CPU-bound and can take seconds.
        let built = tokio::task::spawn_blocking(move || build(&artifact))
            .await
            .map_err(|e| {
                ModelLoadError::new(stage, LoadCause::InvalidModel(format!("load task failed: {e}")))
            })?
            .map_err(|cause| ModelLoadError::new(stage, cause))?;

        tracing::info!(
            stage = %stage,
            source = %origin,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model stage loaded"
        );
        Ok(built)
    }
}

#[async_trait]
impl BundleLoader for OnnxBundleLoader {
    async fn load(&self) -> Result<ModelBundle, ModelLoadError> {
        let detector = self
            .load_stage(ModelStage::Detector, |a| {
                Ok(Box::new(ScrfdDetector::load(a)?) as Box<dyn FaceDetector>)
            })
            .await?;
        let aligner = self
            .load_stage(ModelStage::Landmarks, |a| {
                Ok(Box::new(LandmarkModel::load(a)?) as Box<dyn LandmarkAligner>)
            })
            .await?;
        let embedder = self
            .load_stage(ModelStage::Embedder, |a| {
                Ok(Box::new(ArcFaceEmbedder::load(a)?) as Box<dyn DescriptorEmbedder>)
            })
            .await?;
        Ok(ModelBundle::new(detector, aligner, embedder))
    }
}

#[derive(Default)]
struct LoadState {
    last_error: Option<ModelLoadError>,
}

/// Holds the [`ModelBundle`] and gates access to it.
///
/// At most one load runs at a time. Callers that queue behind an in-flight
/// load receive its result, success or failure, instead of starting another.
/// A failed load leaves the provider not ready; the next fresh call retries.
pub struct ModelProvider {
    loader: Box<dyn BundleLoader>,
    ready: RwLock<Option<Arc<ModelBundle>>>,
    attempts: AtomicU64,
    state: Mutex<LoadState>,
}

impl ModelProvider {
    pub fn new(loader: impl BundleLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            ready: RwLock::new(None),
            attempts: AtomicU64::new(0),
            state: Mutex::new(LoadState::default()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<ModelBundle>> {
        self.ready.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn install(&self, bundle: Option<Arc<ModelBundle>>) -> Option<Arc<ModelBundle>> {
        let mut slot = self.ready.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *slot, bundle)
    }

    /// Return the loaded bundle, loading it first if needed.
    pub async fn ensure_ready(&self) -> Result<Arc<ModelBundle>, ModelLoadError> {
        if let Some(bundle) = self.current() {
            return Ok(bundle);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if let Some(bundle) = self.current() {
            return Ok(bundle);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = &state.last_error {
                tracing::debug!(stage = %err.stage, "sharing result of in-flight model load");
                return Err(err.clone());
            }
        }

        tracing::info!("loading model bundle");
        let start = Instant::now();
        let result = self.loader.load().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(bundle) => {
                state.last_error = None;
                let bundle = Arc::new(bundle);
                self.install(Some(Arc::clone(&bundle)));
                tracing::info!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "model bundle ready"
                );
                Ok(bundle)
            }
            Err(err) => {
                tracing::error!(stage = %err.stage, error = %err, "model bundle load failed");
                state.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Drop the loaded bundle so the next [`ensure_ready`](Self::ensure_ready) reloads.
    ///
    /// Waits for any in-flight load to settle first. In-flight extractions
    /// keep their `Arc` and finish on the old bundle.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if self.install(None).is_some() {
            tracing::info!("model bundle reset");
        }
        state.last_error = None;
    }
}
