//! Pixel sampling and crop-and-scale into fixed-size channels
//!
//! Sample coordinates are in pixel-center space: `(i, j)` addresses the
//! center of pixel `(i, j)`, so a destination pixel `d` of a scaled copy
//! reads the source at `offset + (d + 0.5) * ratio - 0.5`.

use image::{Rgba, RgbaImage};

use crate::config::ResampleFilter;
use crate::error::{SegmentError, SegmentResult};

/// Inclusive range of pixel centers a sampler may read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleWindow {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl SampleWindow {
    /// Every pixel of a `width` x `height` raster (both must be non-zero)
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x0: 0.0,
            y0: 0.0,
            x1: width.saturating_sub(1) as f64,
            y1: height.saturating_sub(1) as f64,
        }
    }

    /// Pixels whose centers fall inside a pixel-space rectangle, kept inside
    /// the raster. A rectangle thinner than a pixel keeps its middle pixel.
    pub fn from_rect(rx: f64, ry: f64, rw: f64, rh: f64, width: u32, height: u32) -> Self {
        let (x0, x1) = center_span(rx, rw, width);
        let (y0, y1) = center_span(ry, rh, height);
        Self { x0, y0, x1, y1 }
    }
}

fn center_span(start: f64, len: f64, limit: u32) -> (f64, f64) {
    let max = limit.saturating_sub(1) as f64;
    let mut first = (start - 0.5).ceil();
    let mut last = (start + len - 0.5).floor();
    if last < first {
        first = (start + len / 2.0 - 0.5).round();
        last = first;
    }
    (first.clamp(0.0, max), last.clamp(0.0, max))
}

/// Bilinear sample at a pixel-center coordinate, clamped to `window`
#[inline]
pub fn bilinear_sample(src: &RgbaImage, x: f64, y: f64, window: &SampleWindow) -> [u8; 4] {
    let x = x.clamp(window.x0, window.x1);
    let y = y.clamp(window.y0, window.y1);

    let xf = x.floor();
    let yf = y.floor();
    let x0 = xf as u32;
    let y0 = yf as u32;
    let x1 = if xf < window.x1 { x0 + 1 } else { x0 };
    let y1 = if yf < window.y1 { y0 + 1 } else { y0 };

    let fx = x - xf;
    let fy = y - yf;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut result = [0u8; 4];
    for c in 0..4 {
        let value = p00[c] as f64 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f64 * fx * (1.0 - fy)
            + p01[c] as f64 * (1.0 - fx) * fy
            + p11[c] as f64 * fx * fy;
        result[c] = value.round().clamp(0.0, 255.0) as u8;
    }

    result
}

/// Nearest-neighbor sample at a pixel-center coordinate, clamped to `window`
#[inline]
pub fn nearest_sample(src: &RgbaImage, x: f64, y: f64, window: &SampleWindow) -> [u8; 4] {
    let x = x.clamp(window.x0, window.x1).round() as u32;
    let y = y.clamp(window.y0, window.y1).round() as u32;
    src.get_pixel(x, y).0
}

/// Scale the pixel-space rectangle `(rx, ry, rw, rh)` of `src` into all of `dst`
pub fn scale_into(
    src: &RgbaImage,
    rect: (f64, f64, f64, f64),
    dst: &mut RgbaImage,
    filter: ResampleFilter,
) -> SegmentResult<()> {
    let (src_w, src_h) = src.dimensions();
    let (dst_w, dst_h) = dst.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(SegmentError::invalid_size(src_w, src_h));
    }
    if dst_w == 0 || dst_h == 0 {
        return Err(SegmentError::invalid_size(dst_w, dst_h));
    }

    let (rx, ry, rw, rh) = rect;
    if !(rw > 0.0 && rh > 0.0) {
        return Err(SegmentError::invalid_size(rw as i64, rh as i64));
    }

    let window = SampleWindow::from_rect(rx, ry, rw, rh, src_w, src_h);
    let step_x = rw / dst_w as f64;
    let step_y = rh / dst_h as f64;

    for (dx, dy, pixel) in dst.enumerate_pixels_mut() {
        let sx = rx + (dx as f64 + 0.5) * step_x - 0.5;
        let sy = ry + (dy as f64 + 0.5) * step_y - 0.5;
        let value = match filter {
            ResampleFilter::Bilinear => bilinear_sample(src, sx, sy, &window),
            ResampleFilter::Nearest => nearest_sample(src, sx, sy, &window),
        };
        *pixel = Rgba(value);
    }

    Ok(())
}

/// Crop a pixel-space rectangle of `src` and scale it to `width` x `height`
pub fn crop_and_scale(
    src: &RgbaImage,
    rect: (f64, f64, f64, f64),
    width: u32,
    height: u32,
    filter: ResampleFilter,
) -> SegmentResult<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(SegmentError::invalid_size(width, height));
    }
    let mut dst = RgbaImage::new(width, height);
    scale_into(src, rect, &mut dst, filter)?;
    Ok(dst)
}

/// Scale the whole of `src` to `width` x `height`
pub fn resize(
    src: &RgbaImage,
    width: u32,
    height: u32,
    filter: ResampleFilter,
) -> SegmentResult<RgbaImage> {
    let (w, h) = src.dimensions();
    crop_and_scale(src, (0.0, 0.0, w as f64, h as f64), width, height, filter)
}
