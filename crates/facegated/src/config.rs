use facegate_core::DEFAULT_MATCH_THRESHOLD;
use facegate_io::{directory_url, ArtifactFetcher, LoaderConfig, ModelSourceMode};
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Daemon configuration, resolved once at startup.
///
/// Defaults, then an optional TOML file named by `FACEGATE_CONFIG`, then
/// `FACEGATE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where model artifacts come from.
    pub model_source: ModelSourceMode,
    /// Remote base URL for model artifacts.
    pub model_base_url: Option<String>,
    /// Euclidean distance below which two faces match.
    pub match_threshold: f32,
    pub image_fetch_timeout_secs: u64,
    pub model_fetch_timeout_secs: u64,
    /// Deadline for a whole verify request.
    pub verify_timeout_secs: u64,
    pub max_image_bytes: usize,
    /// Stage image bytes through temporary files in this directory.
    pub staging_dir: Option<PathBuf>,
    /// Base URL that bare stored reference photo names resolve against.
    pub reference_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            model_dir: facegate_core::default_model_dir(),
            model_source: ModelSourceMode::Local,
            model_base_url: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            image_fetch_timeout_secs: 15,
            model_fetch_timeout_secs: 120,
            verify_timeout_secs: 180,
            max_image_bytes: 10 * 1024 * 1024,
            staging_dir: None,
            reference_base_url: None,
        }
    }
}

impl Config {
    /// Load from `FACEGATE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("FACEGATE_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `FACEGATE_*` variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let env = Env(&lookup);

        if let Some(v) = env.string("FACEGATE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = env.string("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env.parse("FACEGATE_MODEL_SOURCE", "model_source")? {
            self.model_source = v;
        }
        if let Some(v) = env.string("FACEGATE_MODEL_BASE_URL") {
            self.model_base_url = Some(v);
        }
        if let Some(v) = env.parse("FACEGATE_MATCH_THRESHOLD", "match_threshold")? {
            self.match_threshold = v;
        }
        if let Some(v) = env.parse("FACEGATE_IMAGE_FETCH_TIMEOUT_SECS", "image_fetch_timeout_secs")? {
            self.image_fetch_timeout_secs = v;
        }
        if let Some(v) = env.parse("FACEGATE_MODEL_FETCH_TIMEOUT_SECS", "model_fetch_timeout_secs")? {
            self.model_fetch_timeout_secs = v;
        }
        if let Some(v) = env.parse("FACEGATE_VERIFY_TIMEOUT_SECS", "verify_timeout_secs")? {
            self.verify_timeout_secs = v;
        }
        if let Some(v) = env.parse("FACEGATE_MAX_IMAGE_BYTES", "max_image_bytes")? {
            self.max_image_bytes = v;
        }
        if let Some(v) = env.string("FACEGATE_STAGING_DIR") {
            self.staging_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env.string("FACEGATE_REFERENCE_BASE_URL") {
            self.reference_base_url = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                message: format!("{} (must be finite and > 0)", self.match_threshold),
            });
        }
        for (key, secs) in [
            ("image_fetch_timeout_secs", self.image_fetch_timeout_secs),
            ("model_fetch_timeout_secs", self.model_fetch_timeout_secs),
            ("verify_timeout_secs", self.verify_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    message: "must be at least 1 second".into(),
                });
            }
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_image_bytes",
                message: "must be > 0".into(),
            });
        }
        if self.model_source != ModelSourceMode::Local && self.model_base_url.is_none() {
            return Err(ConfigError::Invalid {
                key: "model_base_url",
                message: "required when model_source is remote or local-then-remote".into(),
            });
        }
        self.reference_base()?;
        Ok(())
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            fetch_timeout: Duration::from_secs(self.image_fetch_timeout_secs),
            max_bytes: self.max_image_bytes,
            staging_dir: self.staging_dir.clone(),
        }
    }

    pub fn artifact_fetcher(&self) -> ArtifactFetcher {
        ArtifactFetcher::new(
            self.model_source,
            self.model_dir.clone(),
            self.model_base_url.clone(),
        )
        .with_timeout(Duration::from_secs(self.model_fetch_timeout_secs))
    }

    /// Parsed `reference_base_url`, normalized to end in `/`.
    pub fn reference_base(&self) -> Result<Option<Url>, ConfigError> {
        self.reference_base_url
            .as_deref()
            .map(directory_url)
            .transpose()
            .map_err(|message| ConfigError::Invalid {
                key: "reference_base_url",
                message,
            })
    }

    /// The photo store the HTTP surface resolves reference names under.
    pub fn required_reference_base(&self) -> Result<Url, ConfigError> {
        self.reference_base()?.ok_or_else(|| ConfigError::Invalid {
            key: "reference_base_url",
            message: "must be set to serve verification requests".into(),
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, field: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key: field,
                    message: format!("{key}={v:?}: {e}"),
                })
            })
            .transpose()
    }
}
