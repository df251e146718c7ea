use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_io::{download_missing, ImageLoader, ImageSource};
use facegated::{Config, ModelProvider, OnnxBundleLoader, Verifier};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the faces in two images
    Verify {
        /// Reference image: path, URL, data URI, or stored name
        reference: String,
        /// Candidate image: path, URL, or data URI
        candidate: String,
        /// Override the configured distance threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Extract a face descriptor from one image
    Extract {
        /// Image path, URL, or data URI
        image: String,
    },
    /// Download model files missing from the model directory
    FetchModels {
        /// Model directory (default: configured model_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Base URL the model files live under (default: configured model_base_url)
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("invalid configuration")?;

    match cli.command {
        Commands::Verify {
            reference,
            candidate,
            threshold,
        } => verify(&config, &reference, &candidate, threshold).await,
        Commands::Extract { image } => extract(&config, &image).await,
        Commands::FetchModels { dir, base_url } => fetch_models(&config, dir, base_url).await,
    }
}

fn provider(config: &Config) -> Arc<ModelProvider> {
    Arc::new(ModelProvider::new(OnnxBundleLoader::new(
        config.artifact_fetcher(),
    )))
}

async fn verify(
    config: &Config,
    reference: &str,
    candidate: &str,
    threshold: Option<f32>,
) -> Result<ExitCode> {
    let threshold = threshold.unwrap_or(config.match_threshold);
    if !threshold.is_finite() || threshold <= 0.0 {
        bail!("threshold must be finite and > 0, got {threshold}");
    }

    let loader = ImageLoader::new(config.loader_config())?;
    let verifier = Verifier::new(provider(config), loader, threshold);
    let reference = ImageSource::from_stored(reference, config.reference_base()?.as_ref());
    let candidate = ImageSource::parse(candidate);

    match verifier
        .verify_with_deadline(reference, candidate, config.verify_timeout())
        .await
    {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(if outcome.matched {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Err(err) => {
            let report = serde_json::json!({
                "stage": err.stage(),
                "reason": err.reason(),
                "side": err.side(),
                "message": err.to_string(),
            });
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::from(2))
        }
    }
}

async fn extract(config: &Config, image: &str) -> Result<ExitCode> {
    let models = provider(config).ensure_ready().await?;
    let loader = ImageLoader::new(config.loader_config())?;
    let decoded = loader.load(ImageSource::parse(image)).await?;
    println!("Image: {}x{}", decoded.width(), decoded.height());

    let descriptor = tokio::task::spawn_blocking(move || facegate_core::extract(decoded, &models))
        .await
        .context("extraction task failed")??;

    match descriptor {
        Some(descriptor) => {
            let head: Vec<String> = descriptor
                .values
                .iter()
                .take(5)
                .map(|v| format!("{v:.4}"))
                .collect();
            println!("Face detected: {}-dim descriptor", descriptor.len());
            println!("First components: [{}]", head.join(", "));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("No face detected");
            Ok(ExitCode::from(1))
        }
    }
}

async fn fetch_models(
    config: &Config,
    dir: Option<PathBuf>,
    base_url: Option<String>,
) -> Result<ExitCode> {
    let dir = dir.unwrap_or_else(|| config.model_dir.clone());
    let Some(base_url) = base_url.or_else(|| config.model_base_url.clone()) else {
        bail!("no base URL: pass --base-url or set FACEGATE_MODEL_BASE_URL");
    };

    let timeout = Duration::from_secs(config.model_fetch_timeout_secs);
    let report = download_missing(&dir, &base_url, timeout)
        .await
        .with_context(|| format!("cannot prepare {}", dir.display()))?;

    for path in &report.present {
        println!("present     {}", path.display());
    }
    for path in &report.downloaded {
        println!("downloaded  {}", path.display());
    }
    for (path, err) in &report.failed {
        println!("FAILED      {}: {err}", path.display());
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
