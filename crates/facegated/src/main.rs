use anyhow::{Context, Result};
use facegate_io::ImageLoader;
use facegated::http::{router, AppState};
use facegated::{Config, ModelProvider, OnnxBundleLoader, Verifier};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::load().context("invalid configuration")?;
    tracing::info!(
        bind = %config.bind_addr,
        model_dir = %config.model_dir.display(),
        model_source = ?config.model_source,
        threshold = config.match_threshold,
        staging = config.staging_dir.is_some(),
        "configuration loaded"
    );

    let reference_base = config
        .required_reference_base()
        .context("invalid configuration")?;

    let provider = Arc::new(ModelProvider::new(OnnxBundleLoader::new(
        config.artifact_fetcher(),
    )));
    // Fail fast: refuse to listen without a usable bundle.
    provider
        .ensure_ready()
        .await
        .context("model warm-up failed")?;

    let loader = ImageLoader::new(config.loader_config()).context("cannot build image loader")?;
    let state = Arc::new(AppState {
        verifier: Verifier::new(Arc::clone(&provider), loader, config.match_threshold),
        reference_base,
        verify_timeout: config.verify_timeout(),
        max_image_bytes: config.max_image_bytes,
    });

    #[cfg(unix)]
    spawn_reload_on_hangup(provider)?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "facegated ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

/// Reload the model bundle on SIGHUP, e.g. after `facegate fetch-models`.
#[cfg(unix)]
fn spawn_reload_on_hangup(provider: Arc<ModelProvider>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("cannot listen for SIGHUP")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading models");
            provider.reset().await;
            if let Err(e) = provider.ensure_ready().await {
                tracing::error!(error = %e, "model reload failed; will retry on next request");
            }
        }
    });
    Ok(())
}
