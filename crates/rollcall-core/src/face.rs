use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 2D image-space point `(x, y)` in pixels.
pub type Point = (f32, f32);

/// Dimension of the face descriptor produced by the recognition network.
pub const EMBEDDING_DIM: usize = 128;

/// Number of points in the 68-point landmark layout.
pub const LANDMARK_COUNT: usize = 68;

const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaceError {
    #[error("invalid landmark count: {0} (expected 68)")]
    WrongLandmarkCount(usize),
    #[error("invalid embedding dimension: {0} (expected 128)")]
    InvalidEmbeddingDim(usize),
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
}

/// Facial landmarks for one detected face, 68-point layout.
///
/// Eye contours follow the usual convention: six points per eye starting at
/// the outer corner and running clockwise, so `p1`/`p4` are the corners and
/// `p2`,`p3` / `p6`,`p5` are the upper and lower lid pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point>,
}

impl FaceLandmarks {
    pub fn from_points(points: Vec<Point>) -> Result<Self, FaceError> {
        if points.len() != LANDMARK_COUNT {
            return Err(FaceError::WrongLandmarkCount(points.len()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn left_eye(&self) -> [Point; 6] {
        eye_contour(&self.points[LEFT_EYE])
    }

    pub fn right_eye(&self) -> [Point; 6] {
        eye_contour(&self.points[RIGHT_EYE])
    }

    /// Replace the six points of both eye contours, leaving the rest intact.
    pub fn with_eyes(mut self, left: [Point; 6], right: [Point; 6]) -> Self {
        self.points[LEFT_EYE].copy_from_slice(&left);
        self.points[RIGHT_EYE].copy_from_slice(&right);
        self
    }
}

fn eye_contour(slice: &[Point]) -> [Point; 6] {
    let mut eye = [(0.0, 0.0); 6];
    eye.copy_from_slice(slice);
    eye
}

/// Fixed-length face descriptor used for identity comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Check the descriptor has the expected dimension and only finite values.
    pub fn validate(&self) -> Result<(), FaceError> {
        if self.values.len() != EMBEDDING_DIM {
            return Err(FaceError::InvalidEmbeddingDim(self.values.len()));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(FaceError::InvalidEmbeddingValue);
        }
        Ok(())
    }
}

/// A single detected face with landmarks and its extracted descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescriptor {
    pub landmarks: FaceLandmarks,
    pub embedding: Embedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point> {
        (0..LANDMARK_COUNT).map(|i| (i as f32, i as f32 * 2.0)).collect()
    }

    #[test]
    fn test_rejects_wrong_landmark_count() {
        let err = FaceLandmarks::from_points(vec![(0.0, 0.0); 5]).unwrap_err();
        assert_eq!(err, FaceError::WrongLandmarkCount(5));
    }

    #[test]
    fn test_eye_contours_use_68_point_indices() {
        let lm = FaceLandmarks::from_points(grid()).unwrap();
        assert_eq!(lm.left_eye()[0], (36.0, 72.0));
        assert_eq!(lm.left_eye()[5], (41.0, 82.0));
        assert_eq!(lm.right_eye()[0], (42.0, 84.0));
        assert_eq!(lm.right_eye()[5], (47.0, 94.0));
    }

    #[test]
    fn test_with_eyes_replaces_only_eye_points() {
        let lm = FaceLandmarks::from_points(grid())
            .unwrap()
            .with_eyes([(1.0, 1.0); 6], [(2.0, 2.0); 6]);
        assert_eq!(lm.left_eye(), [(1.0, 1.0); 6]);
        assert_eq!(lm.right_eye(), [(2.0, 2.0); 6]);
        assert_eq!(lm.points()[35], (35.0, 70.0));
        assert_eq!(lm.points()[48], (48.0, 96.0));
    }

    #[test]
    fn test_embedding_validation() {
        assert!(Embedding::new(vec![0.1; EMBEDDING_DIM]).validate().is_ok());
        assert_eq!(
            Embedding::new(vec![0.1; 64]).validate(),
            Err(FaceError::InvalidEmbeddingDim(64))
        );
        let mut values = vec![0.1; EMBEDDING_DIM];
        values[7] = f32::NAN;
        assert_eq!(
            Embedding::new(values).validate(),
            Err(FaceError::InvalidEmbeddingValue)
        );
    }

    #[test]
    fn test_embedding_serializes_as_flat_array() {
        let json = serde_json::to_string(&Embedding::new(vec![0.5, -0.25])).unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back: Embedding = serde_json::from_str("[1.0,2.0]").unwrap();
        assert_eq!(back.values, vec![1.0, 2.0]);
    }
}
