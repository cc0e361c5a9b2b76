//! Perspective warp of a source quad into a fronto-parallel raster
//!
//! The output size is derived from the quad's edge lengths. Every output
//! pixel is mapped back through the homography and copied from the source
//! with nearest-neighbor sampling; pixels that land outside the source get
//! an opaque fill color.

use image::{Rgba, RgbaImage};

use crate::config::Point;
use crate::error::{SegmentError, SegmentResult};
use crate::homography::Homography;

/// Stride, in pixels, of the average-color scan
const FILL_SAMPLE_STRIDE: usize = 10;

/// Source coordinates this close to an integer are treated as that integer
const SNAP_EPSILON: f64 = 1e-9;

/// Output size for a pixel-space quad: the longer of each pair of opposite edges
pub fn derived_size(quad: &[Point]) -> SegmentResult<(u32, u32)> {
    if quad.len() != 4 {
        return Err(SegmentError::degenerate(format!(
            "expected 4 points, got {}",
            quad.len()
        )));
    }

    let width = quad[0].distance(&quad[1]).max(quad[2].distance(&quad[3])).floor();
    let height = quad[0].distance(&quad[3]).max(quad[1].distance(&quad[2])).floor();

    // NaN fails both comparisons and lands here too
    if !(width >= 1.0 && height >= 1.0) {
        return Err(SegmentError::invalid_size(width as i64, height as i64));
    }
    if width > u32::MAX as f64 || height > u32::MAX as f64 {
        return Err(SegmentError::invalid_size(width as i64, height as i64));
    }

    Ok((width as u32, height as u32))
}

/// Mean RGB over every tenth pixel with non-zero alpha, `(0, 0, 0)` if none
pub fn average_color(src: &RgbaImage) -> [u8; 3] {
    let mut sum = [0u64; 3];
    let mut count = 0u64;

    for pixel in src.pixels().step_by(FILL_SAMPLE_STRIDE) {
        let [r, g, b, a] = pixel.0;
        if a > 0 {
            sum[0] += r as u64;
            sum[1] += g as u64;
            sum[2] += b as u64;
            count += 1;
        }
    }

    if count == 0 {
        return [0, 0, 0];
    }

    [
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    ]
}

#[inline]
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v
    }
}

/// Rectify a pixel-space quad (TL, TR, BR, BL) of `src` into `dst`.
///
/// `dst` is resized to the derived size, reusing its allocation when the
/// size is unchanged. On error `dst` is left untouched. Returns the output
/// size.
pub fn warp_into(
    src: &RgbaImage,
    quad: &[Point],
    dst: &mut RgbaImage,
    fill: Option<[u8; 3]>,
) -> SegmentResult<(u32, u32)> {
    let (width, height) = derived_size(quad)?;
    let homography = Homography::solve(width as f64, height as f64, quad)?;

    let (src_w, src_h) = src.dimensions();
    let (src_wf, src_hf) = (src_w as f64, src_h as f64);
    let [fr, fg, fb] = fill.unwrap_or_else(|| average_color(src));
    let fill_pixel = Rgba([fr, fg, fb, 255]);

    if dst.dimensions() != (width, height) {
        *dst = RgbaImage::new(width, height);
    }

    for (x, y, pixel) in dst.enumerate_pixels_mut() {
        let sample = homography
            .apply(x as f64, y as f64)
            .map(|(sx, sy)| (snap(sx), snap(sy)))
            .filter(|&(sx, sy)| sx >= 0.0 && sx < src_wf && sy >= 0.0 && sy < src_hf);

        *pixel = match sample {
            Some((sx, sy)) => *src.get_pixel(sx as u32, sy as u32),
            None => fill_pixel,
        };
    }

    Ok((width, height))
}

/// Rectify a pixel-space quad of `src` into a new raster
pub fn warp(src: &RgbaImage, quad: &[Point], fill: Option<[u8; 3]>) -> SegmentResult<RgbaImage> {
    let mut dst = RgbaImage::new(0, 0);
    warp_into(src, quad, &mut dst, fill)?;
    Ok(dst)
}
