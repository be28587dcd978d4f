//! Face embedding extraction seam.

use image::RgbImage;
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Turns a decoded image into one embedding per detected face.
///
/// An image with no visible face yields an empty list, not an error.
/// Order of the returned embeddings is unspecified. Implementations hold
/// model sessions that need exclusive access, hence `&mut self`.
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, ExtractError>;
}

/// Decode an encoded image (JPEG, PNG, ...) into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ExtractError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&buf).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(ExtractError::Decode(_))
        ));
    }
}
