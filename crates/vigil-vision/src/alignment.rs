//! Five-point face alignment to the canonical 112×112 ArcFace crop.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] · src + (tx, ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit of scale, rotation and translation mapping `src`
    /// onto `dst` (closed form on centred points).
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy, dx, dy) = (sx - msx, sy - msy, dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }

        if norm < 1e-12 {
            // Degenerate landmarks: fall back to a pure translation.
            return Self {
                a: 1.0,
                b: 0.0,
                tx: mdx - msx,
                ty: mdy - msy,
            };
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    /// Map an output pixel back into source coordinates.
    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (dx, dy) = (x - self.tx, y - self.ty);
        ((self.a * dx + self.b * dy) / det, (-self.b * dx + self.a * dy) / det)
    }
}

/// Warp the face described by `landmarks` into a 112×112 RGB crop.
/// Pixels that fall outside the source are black.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    let mut out = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    if transform.a * transform.a + transform.b * transform.b < 1e-12 {
        return out;
    }

    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(ox as f32, oy as f32);
        *pixel = sample_bilinear(image, sx, sy);
    }
    out
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    if x0 < 0 || y0 < 0 || x0 >= w || y0 >= h {
        return Rgb([0, 0, 0]);
    }
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let px = |xx: i64, yy: i64| image.get_pixel(xx as u32, yy as u32).0;
    let (tl, tr, bl, br) = (px(x0, y0), px(x1, y0), px(x0, y1), px(x1, y1));

    Rgb(std::array::from_fn(|c| {
        let v = tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + tr[c] as f32 * fx * (1.0 - fy)
            + bl[c] as f32 * (1.0 - fx) * fy
            + br[c] as f32 * fx * fy;
        v.round().clamp(0.0, 255.0) as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_identity() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_estimate_recovers_scale_and_shift() {
        // Source is the reference scaled by 2 and shifted by (10, 20).
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112);
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);

        let (x, y) = t.invert(38.2946, 51.6963);
        assert!((x - src[0].0).abs() < 1e-2 && (y - src[0].1).abs() < 1e-2);
    }

    #[test]
    fn test_align_uniform_image() {
        let img = RgbImage::from_pixel(400, 400, Rgb([90, 120, 150]));
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 50.0, y * 2.0 + 50.0));
        let aligned = align_face(&img, &src);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert!(aligned.pixels().all(|p| *p == Rgb([90, 120, 150])));
    }

    #[test]
    fn test_align_out_of_bounds_is_black() {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let far = REFERENCE_LANDMARKS_112.map(|(x, y)| (x + 5000.0, y + 5000.0));
        let aligned = align_face(&img, &far);
        assert!(aligned.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
