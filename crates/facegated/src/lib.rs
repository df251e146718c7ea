//! facegated: face verification daemon.
//!
//! Holds the model bundle behind a single-flight [`provider::ModelProvider`],
//! runs reference/candidate comparisons through [`verifier::Verifier`], and
//! serves them over HTTP.

pub mod config;
pub mod http;
pub mod provider;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConfigError};
pub use provider::{BundleLoader, ModelProvider, OnnxBundleLoader};
pub use verifier::{Side, VerificationError, VerificationStage, Verifier};
