//! Per-frame distance between an enrolled baseline and the faces seen in a frame.

use crate::error::Error;
use crate::types::Embedding;

/// Fixed divisor applied to raw Euclidean distance before it is compared
/// against [`PRESENCE_THRESHOLD`](crate::aggregate::PRESENCE_THRESHOLD).
///
/// Calibration constant: changing it shifts every stored distance and the
/// meaning of the threshold with it.
pub const DISTANCE_SCALE: f64 = 2.0;

/// Distance between `baseline` and the closest of `candidates`.
///
/// Each candidate is one face detected in the frame. The closest one is
/// taken to be the verified subject, so extra faces in the background do
/// not count against the user. Returns `Ok(None)` when no face was
/// detected; the caller skips the frame rather than recording a miss.
pub fn frame_distance(baseline: &Embedding, candidates: &[Embedding]) -> Result<Option<f64>, Error> {
    let mut best: Option<f64> = None;

    for candidate in candidates {
        if candidate.dim() != baseline.dim() {
            return Err(Error::InvalidEmbedding(format!(
                "candidate has {} dimensions, baseline has {}",
                candidate.dim(),
                baseline.dim()
            )));
        }
        let distance = baseline.euclidean_distance(candidate) / DISTANCE_SCALE;
        best = Some(match best {
            Some(prev) => prev.min(distance),
            None => distance,
        });
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_no_faces_yields_no_sample() {
        let baseline = emb(&[1.0, 0.0]);
        assert_eq!(frame_distance(&baseline, &[]).unwrap(), None);
    }

    #[test]
    fn test_single_face_is_scaled() {
        let baseline = emb(&[0.0, 0.0]);
        let d = frame_distance(&baseline, &[emb(&[0.6, 0.8])]).unwrap().unwrap();
        // raw distance 1.0, halved
        assert!((d - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_closest_face_wins() {
        let baseline = emb(&[1.0, 0.0, 0.0]);
        let candidates = vec![
            emb(&[0.0, 1.0, 0.0]),
            emb(&[0.9, 0.1, 0.0]),
            emb(&[-1.0, 0.0, 0.0]),
        ];
        let d = frame_distance(&baseline, &candidates).unwrap().unwrap();
        let expected = (0.01f64 + 0.01).sqrt() / 2.0;
        assert!((d - expected).abs() < 1e-6, "got {d}, expected {expected}");
    }

    #[test]
    fn test_distance_not_capped() {
        let baseline = emb(&[1.0, 0.0]);
        let d = frame_distance(&baseline, &[emb(&[-3.0, 0.0])]).unwrap().unwrap();
        assert!((d - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let baseline = emb(&[1.0, 0.0]);
        let err = frame_distance(&baseline, &[emb(&[1.0, 0.0, 0.0])]).unwrap_err();
        assert!(matches!(err, Error::InvalidEmbedding(_)));
    }
}
