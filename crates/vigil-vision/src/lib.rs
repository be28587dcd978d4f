//! vigil-vision: ONNX face embedding backend.
//!
//! SCRFD finds faces and their landmarks, each face is aligned to the
//! ArcFace reference pose, and ArcFace turns the crop into an embedding.

pub mod alignment;
pub mod detector;
pub mod recognizer;

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use vigil_core::{Embedding, EmbeddingExtractor, ExtractError};

pub use detector::FaceDetector;
pub use recognizer::FaceRecognizer;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<VisionError> for ExtractError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::ModelNotFound(path) => ExtractError::ModelNotFound(path),
            other => ExtractError::InferenceFailed(other.to_string()),
        }
    }
}

/// Detector + recognizer pair. Each worker thread owns one.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        let path = |file: &str| model_dir.join(file).to_string_lossy().into_owned();
        Ok(Self {
            detector: FaceDetector::load(&path(DETECTOR_MODEL_FILE))?,
            recognizer: FaceRecognizer::load(&path(RECOGNIZER_MODEL_FILE))?,
        })
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(faces = faces.len(), "faces detected");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.recognizer.extract(image, face)?);
        }
        Ok(embeddings)
    }
}
