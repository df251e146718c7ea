//! Euclidean descriptor matching.

use crate::types::FaceDescriptor;
use serde::Serialize;
use thiserror::Error;

/// Default Euclidean distance threshold. Lower is stricter.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Result of comparing two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationOutcome {
    /// `distance < threshold`.
    pub matched: bool,
    /// Euclidean distance, always >= 0.
    pub distance: f32,
    pub threshold: f32,
}

/// Strategy for deciding whether two descriptors belong to the same face.
pub trait Matcher {
    fn decide(
        &self,
        a: &FaceDescriptor,
        b: &FaceDescriptor,
        threshold: f32,
    ) -> Result<VerificationOutcome, MatchError>;
}

/// Plain L2 distance matcher.
///
/// Processes every component; there is no early exit once the running sum
/// crosses the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn decide(
        &self,
        a: &FaceDescriptor,
        b: &FaceDescriptor,
        threshold: f32,
    ) -> Result<VerificationOutcome, MatchError> {
        let distance = euclidean_distance(a, b)?;
        Ok(VerificationOutcome {
            matched: distance < threshold,
            distance,
            threshold,
        })
    }
}

/// `sqrt(Σ (a_i − b_i)^2)` over two equal-length descriptors.
pub fn euclidean_distance(a: &FaceDescriptor, b: &FaceDescriptor) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(a.values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Shorthand for [`EuclideanMatcher::decide`].
pub fn decide(
    a: &FaceDescriptor,
    b: &FaceDescriptor,
    threshold: f32,
) -> Result<VerificationOutcome, MatchError> {
    EuclideanMatcher.decide(a, b, threshold)
}
