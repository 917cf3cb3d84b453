use thiserror::Error;

use crate::face::{Embedding, FaceError};

/// Maximum Euclidean distance for a positive identity match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no reference embeddings to compare against")]
    EmptyGallery,
    #[error("embedding dimension mismatch: candidate {candidate}, reference {reference}")]
    DimensionMismatch { candidate: usize, reference: usize },
    #[error("invalid reference template: {0}")]
    InvalidTemplate(#[from] FaceError),
}

/// Result of comparing a candidate embedding against reference embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest reference.
    pub distance: f32,
    /// Index of the matched reference, set only when `matched`.
    pub reference_index: Option<usize>,
}

pub trait Matcher {
    fn compare(
        &self,
        candidate: &Embedding,
        references: &[Embedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Euclidean distance between two descriptors of equal length.
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> Result<f32, MatchError> {
    if a.values.len() != b.values.len() {
        return Err(MatchError::DimensionMismatch {
            candidate: a.values.len(),
            reference: b.values.len(),
        });
    }
    let sum: f32 = a
        .values
        .iter()
        .zip(&b.values)
        .map(|(x, y)| (x - y) * (x - y))
        .sum();
    Ok(sum.sqrt())
}

/// Nearest-neighbour matcher; a match requires `distance < threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidate: &Embedding,
        references: &[Embedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<(usize, f32)> = None;
        for (i, reference) in references.iter().enumerate() {
            let distance = euclidean_distance(candidate, reference)?;
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        let (index, distance) = best.ok_or(MatchError::EmptyGallery)?;
        let matched = distance < threshold;
        Ok(MatchResult {
            matched,
            distance,
            reference_index: matched.then_some(index),
        })
    }
}

/// Matcher built from the single enrolled template of one identity.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    template: Embedding,
    threshold: f32,
}

impl TemplateMatcher {
    /// Validates the template before accepting it.
    pub fn new(template: Embedding, threshold: f32) -> Result<Self, MatchError> {
        template.validate()?;
        Ok(Self {
            template,
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn find_best_match(&self, candidate: &Embedding) -> Result<MatchResult, MatchError> {
        EuclideanMatcher.compare(candidate, std::slice::from_ref(&self.template), self.threshold)
    }
}
