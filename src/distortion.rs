//! Per-edge lens/projection correction applied to the whole frame
//!
//! Each output pixel is normalized to `st` in [-1, 1]^2 with `st.y` pointing
//! up, divided by the scale, and pinched toward the center: the horizontal
//! coordinate shrinks by `1 - coef * st.y^2` (left or right coefficient by
//! the sign of `st.x`), the vertical one by `1 - coef * st.x^2` (top or
//! bottom coefficient by the sign of `st.y`). Samples falling outside the
//! frame come out opaque black; the rest are read bilinearly.

use image::RgbaImage;
use rayon::prelude::*;

use crate::config::DistortionParams;
use crate::resample::{bilinear_sample, SampleWindow};

const OUTSIDE: [u8; 4] = [0, 0, 0, 255];

/// Source UV (u to the right, v upward, both 0..1) for an output UV.
/// `None` when the sample falls outside the frame.
#[inline]
pub fn source_uv(u: f64, v: f64, params: &DistortionParams) -> Option<(f64, f64)> {
    let sx = (u * 2.0 - 1.0) / params.scale;
    let sy = (v * 2.0 - 1.0) / params.scale;

    let dx2 = sx * sx;
    let dy2 = sy * sy;

    let coef_y = if sy > 0.0 { params.top } else { params.bottom };
    let coef_x = if sx > 0.0 { params.right } else { params.left };

    let factor_x = 1.0 - coef_x * dy2;
    let factor_y = 1.0 - coef_y * dx2;

    let su = (sx * factor_x + 1.0) * 0.5;
    let sv = (sy * factor_y + 1.0) * 0.5;

    if (0.0..=1.0).contains(&su) && (0.0..=1.0).contains(&sv) {
        Some((su, sv))
    } else {
        None
    }
}

/// Correct `src` into `dst`, resizing `dst` to the source size if needed
pub fn correct_into(src: &RgbaImage, params: &DistortionParams, dst: &mut RgbaImage) {
    let (width, height) = src.dimensions();
    if dst.dimensions() != (width, height) {
        *dst = RgbaImage::new(width, height);
    }
    if width == 0 || height == 0 {
        return;
    }

    let (wf, hf) = (width as f64, height as f64);
    let window = SampleWindow::full(width, height);
    let row_len = width as usize * 4;

    dst.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, out)| {
            let v = 1.0 - (row as f64 + 0.5) / hf;
            for (col, px) in out.chunks_exact_mut(4).enumerate() {
                let u = (col as f64 + 0.5) / wf;
                let value = match source_uv(u, v, params) {
                    Some((su, sv)) => {
                        let x = su * wf - 0.5;
                        let y = (1.0 - sv) * hf - 0.5;
                        bilinear_sample(src, x, y, &window)
                    }
                    None => OUTSIDE,
                };
                px.copy_from_slice(&value);
            }
        });
}

/// Correct a frame into a new raster of the same size
pub fn correct(src: &RgbaImage, params: &DistortionParams) -> RgbaImage {
    let mut dst = RgbaImage::new(src.width(), src.height());
    correct_into(src, params, &mut dst);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn pattern(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 5 % 256) as u8, (y * 3 % 256) as u8, 128, 200])
        })
    }

    fn zero_with(f: impl FnOnce(&mut DistortionParams)) -> DistortionParams {
        let mut params = DistortionParams::identity();
        f(&mut params);
        params
    }

    #[test]
    fn test_identity_params_copy_frame() {
        let src = pattern(48, 32);
        let out = correct(&src, &DistortionParams::identity());
        assert_eq!(out, src);
    }

    #[test]
    fn test_positive_top_pulls_inward() {
        let params = zero_with(|p| p.top = 0.3);
        // Top corners are pinched toward the middle row, never past the edge
        let (su, sv) = source_uv(1.0, 1.0, &params).unwrap();
        assert!((su - 1.0).abs() < 1e-12);
        assert!((sv - 0.85).abs() < 1e-12);
        // The bottom half is untouched
        let (su, sv) = source_uv(0.9, 0.1, &params).unwrap();
        assert!((su - 0.9).abs() < 1e-12);
        assert!((sv - 0.1).abs() < 1e-12);

        let out = correct(&pattern(40, 40), &params);
        assert!(out.pixels().all(|p| p.0 != OUTSIDE));
    }

    #[test]
    fn test_negative_top_pushes_corners_outside() {
        let params = zero_with(|p| p.top = -0.3);
        let src = RgbaImage::from_pixel(40, 40, Rgba([10, 200, 30, 255]));
        let out = correct(&src, &params);

        // Top corners sample beyond the frame and turn black
        assert_eq!(out.get_pixel(0, 0).0, OUTSIDE);
        assert_eq!(out.get_pixel(39, 0).0, OUTSIDE);
        // Top center and the whole bottom half keep the image
        assert_eq!(out.get_pixel(20, 0).0, [10, 200, 30, 255]);
        assert_eq!(out.get_pixel(0, 39).0, [10, 200, 30, 255]);
    }

    #[test]
    fn test_zoom_out_leaves_black_border() {
        let params = zero_with(|p| p.scale = 0.5);
        let src = RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 255]));
        let out = correct(&src, &params);
        assert_eq!(out.get_pixel(0, 16).0, OUTSIDE);
        assert_eq!(out.get_pixel(16, 0).0, OUTSIDE);
        assert_eq!(out.get_pixel(16, 16).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_coefficient_selection_by_side() {
        let params = zero_with(|p| {
            p.left = 0.5;
            p.bottom = 0.2;
        });
        // Right half ignores `left`
        let (su, _) = source_uv(1.0, 0.0, &params).unwrap();
        assert!((su - 1.0).abs() < 1e-12);
        // Left half at the bottom edge: st = (-1, -1)
        let (su, sv) = source_uv(0.0, 0.0, &params).unwrap();
        assert!((su - 0.25).abs() < 1e-12);
        assert!((sv - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_zoom_in_magnifies_center() {
        let params = zero_with(|p| p.scale = 2.0);
        let (su, sv) = source_uv(1.0, 1.0, &params).unwrap();
        assert!((su - 0.75).abs() < 1e-12);
        assert!((sv - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_resizes_destination() {
        let src = pattern(10, 6);
        let mut dst = RgbaImage::new(1, 1);
        correct_into(&src, &DistortionParams::default(), &mut dst);
        assert_eq!(dst.dimensions(), (10, 6));
    }
}
