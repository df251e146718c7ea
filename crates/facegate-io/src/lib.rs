//! facegate-io: input acquisition for the verification pipeline.
//!
//! Turns image locators (bytes, data URIs, URLs, paths) into decoded images,
//! and resolves model artifacts from a local directory or a remote base URL.

pub mod artifacts;
mod fetch;
pub mod loader;
pub mod source;

#[cfg(test)]
mod test_support;

pub use artifacts::{download_missing, ArtifactFetcher, DownloadReport, ModelSourceMode};
pub use loader::{ImageLoadError, ImageLoadReason, ImageLoader, LoaderConfig};
pub use source::{directory_url, ImageSource};
