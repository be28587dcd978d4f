use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject empty vectors and non-finite components.
    pub fn validate(&self) -> Result<(), Error> {
        if self.values.is_empty() {
            return Err(Error::InvalidEmbedding("embedding is empty".into()));
        }
        if let Some(pos) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidEmbedding(format!(
                "non-finite component at index {pos}"
            )));
        }
        Ok(())
    }

    /// Euclidean distance, accumulated in f64.
    ///
    /// Callers are responsible for checking that dimensions agree; extra
    /// components on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// One hit from a nearest-neighbour search over enrolled baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub user_id: String,
    pub distance: f64,
}

/// Presence and distance statistics for a session or a sampled video.
///
/// Derived on demand from recorded distances, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_id: String,
    pub pct_present: f64,
    pub avg_distance: f64,
    pub std_distance: f64,
}
