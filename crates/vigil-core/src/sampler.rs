//! Whole-video comparison by fixed-stride frame sampling.

use crate::aggregate::Aggregator;
use crate::compare::frame_distance;
use crate::error::Error;
use crate::extract::{decode_image, EmbeddingExtractor};
use crate::types::{AggregateResult, Embedding};

/// Default sampling stride: every tenth frame.
pub const DEFAULT_STRIDE: usize = 10;

/// Compares every `stride`-th frame of a video against a baseline.
///
/// Frames are numbered from 1; frame `k` is sampled when `k % stride == 0`.
/// Only sampled frames are decoded. A sampled frame with no face adds
/// nothing to the aggregate.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    stride: usize,
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_STRIDE)
    }
}

impl FrameSampler {
    /// A stride of zero is treated as one (every frame).
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Run the extractor over the sampled frames and collect per-frame
    /// distances keyed by frame number.
    pub fn sample<E, I>(&self, extractor: &mut E, baseline: &Embedding, frames: I) -> Result<Aggregator, Error>
    where
        E: EmbeddingExtractor + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let samples = self.sample_until(extractor, baseline, frames, || false)?;
        // The stop check never fires, so the walk always completes.
        Ok(samples.unwrap_or_default())
    }

    /// Like [`sample`](Self::sample), but `cancelled` is polled before each
    /// sampled frame. Returns `Ok(None)` as soon as it reports true.
    pub fn sample_until<E, I, C>(
        &self,
        extractor: &mut E,
        baseline: &Embedding,
        frames: I,
        mut cancelled: C,
    ) -> Result<Option<Aggregator>, Error>
    where
        E: EmbeddingExtractor + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
        C: FnMut() -> bool,
    {
        baseline.validate()?;

        let mut samples = Aggregator::new();
        let mut counter: usize = 0;
        let mut faceless = 0usize;

        for frame in frames {
            counter += 1;
            if counter % self.stride != 0 {
                continue;
            }
            if cancelled() {
                tracing::debug!(frame = counter, "video sampling cancelled");
                return Ok(None);
            }

            let image = decode_image(frame.as_ref())?;
            let faces = extractor.extract(&image)?;
            match frame_distance(baseline, &faces)? {
                Some(distance) => samples.record(counter as i64, distance),
                None => faceless += 1,
            }
        }

        tracing::debug!(
            frames = counter,
            sampled = samples.len() + faceless,
            faceless,
            stride = self.stride,
            "video sampled"
        );
        Ok(Some(samples))
    }

    /// Sample the video and summarise it. The result carries no session id.
    pub fn compare<E, I>(
        &self,
        extractor: &mut E,
        user_id: &str,
        baseline: &Embedding,
        frames: I,
    ) -> Result<AggregateResult, Error>
    where
        E: EmbeddingExtractor + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let samples = self.sample(extractor, baseline, frames)?;
        summarise(user_id, &samples)
    }

    /// Cancellable [`compare`](Self::compare). `Ok(None)` means `cancelled`
    /// fired before the last sampled frame.
    pub fn compare_until<E, I, C>(
        &self,
        extractor: &mut E,
        user_id: &str,
        baseline: &Embedding,
        frames: I,
        cancelled: C,
    ) -> Result<Option<AggregateResult>, Error>
    where
        E: EmbeddingExtractor + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
        C: FnMut() -> bool,
    {
        match self.sample_until(extractor, baseline, frames, cancelled)? {
            Some(samples) => summarise(user_id, &samples).map(Some),
            None => Ok(None),
        }
    }
}

fn summarise(user_id: &str, samples: &Aggregator) -> Result<AggregateResult, Error> {
    let stats = samples.compute()?;
    Ok(AggregateResult {
        session_id: None,
        user_id: user_id.to_string(),
        pct_present: stats.pct_present,
        avg_distance: stats.avg_distance,
        std_distance: stats.std_distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Encodes a frame whose red channel says how many faces it holds and
    /// whose green channel sets each face's first embedding component.
    fn frame(faces: u8, green: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(2, 2, Rgb([faces, green, 0]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[derive(Default)]
    struct PixelExtractor {
        calls: usize,
    }

    impl EmbeddingExtractor for PixelExtractor {
        fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError> {
            self.calls += 1;
            let [faces, green, _] = image.get_pixel(0, 0).0;
            Ok((0..faces)
                .map(|_| Embedding::new(vec![f32::from(green) / 100.0, 0.0]))
                .collect())
        }
    }

    fn baseline() -> Embedding {
        Embedding::new(vec![0.0, 0.0])
    }

    #[test]
    fn test_samples_every_tenth_frame_in_order() {
        let frames: Vec<Vec<u8>> = (1..=35).map(|_| frame(1, 20)).collect();
        let mut extractor = PixelExtractor::default();

        let agg = FrameSampler::default()
            .sample(&mut extractor, &baseline(), &frames)
            .unwrap();

        let keys: Vec<i64> = agg.samples().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 20, 30]);
        assert_eq!(extractor.calls, 3);
    }

    #[test]
    fn test_unsampled_frames_are_not_decoded() {
        // Garbage everywhere except the sampled positions.
        let frames: Vec<Vec<u8>> = (1..=20)
            .map(|k| if k % 10 == 0 { frame(1, 40) } else { b"junk".to_vec() })
            .collect();
        let mut extractor = PixelExtractor::default();

        let result = FrameSampler::default()
            .compare(&mut extractor, "u1", &baseline(), &frames)
            .unwrap();
        // raw distance 0.4, halved
        assert!((result.avg_distance - 0.2).abs() < 1e-6);
        assert_eq!(result.session_id, None);
        assert_eq!(result.user_id, "u1");
    }

    #[test]
    fn test_faceless_frames_do_not_count_as_misses() {
        let frames: Vec<Vec<u8>> = (1..=30)
            .map(|k| if k == 20 { frame(0, 0) } else { frame(1, 20) })
            .collect();
        let mut extractor = PixelExtractor::default();

        let result = FrameSampler::default()
            .compare(&mut extractor, "u1", &baseline(), &frames)
            .unwrap();
        assert_eq!(result.pct_present, 1.0);
        assert_eq!(extractor.calls, 3);
    }

    #[test]
    fn test_no_face_anywhere_is_empty_aggregate() {
        let frames: Vec<Vec<u8>> = (1..=10).map(|_| frame(0, 0)).collect();
        let err = FrameSampler::default()
            .compare(&mut PixelExtractor::default(), "u1", &baseline(), &frames)
            .unwrap_err();
        assert_eq!(err, Error::EmptyAggregate);
    }

    #[test]
    fn test_too_short_video_is_empty_aggregate() {
        let frames: Vec<Vec<u8>> = (1..=9).map(|_| frame(1, 0)).collect();
        let err = FrameSampler::default()
            .compare(&mut PixelExtractor::default(), "u1", &baseline(), &frames)
            .unwrap_err();
        assert_eq!(err, Error::EmptyAggregate);
    }

    #[test]
    fn test_corrupt_sampled_frame_fails() {
        let frames: Vec<Vec<u8>> = (1..=10).map(|_| b"junk".to_vec()).collect();
        let err = FrameSampler::default()
            .compare(&mut PixelExtractor::default(), "u1", &baseline(), &frames)
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionFailure(_)));
    }

    #[test]
    fn test_cancel_stops_before_next_sampled_frame() {
        let frames: Vec<Vec<u8>> = (1..=50).map(|_| frame(1, 20)).collect();
        let mut extractor = PixelExtractor::default();
        let mut polls = 0;

        let result = FrameSampler::default()
            .compare_until(&mut extractor, "u1", &baseline(), &frames, || {
                polls += 1;
                polls > 2
            })
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(extractor.calls, 2);
    }

    #[test]
    fn test_compare_until_without_cancel_matches_compare() {
        let frames: Vec<Vec<u8>> = (1..=20).map(|k| frame(1, if k == 10 { 0 } else { 40 })).collect();
        let full = FrameSampler::default()
            .compare(&mut PixelExtractor::default(), "u1", &baseline(), &frames)
            .unwrap();
        let until = FrameSampler::default()
            .compare_until(&mut PixelExtractor::default(), "u1", &baseline(), &frames, || false)
            .unwrap();
        assert_eq!(until, Some(full));
    }

    #[test]
    fn test_custom_stride() {
        let frames: Vec<Vec<u8>> = (1..=7).map(|_| frame(1, 0)).collect();
        let agg = FrameSampler::new(3)
            .sample(&mut PixelExtractor::default(), &baseline(), &frames)
            .unwrap();
        let keys: Vec<i64> = agg.samples().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![3, 6]);
    }
}
