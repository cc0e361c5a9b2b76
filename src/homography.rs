//! Homography solve for rectifying a quad
//!
//! The matrix maps destination rectangle pixels (x, y, 1) back to source
//! homogeneous coordinates, so warping walks the destination and samples
//! the source.

use crate::config::Point;
use crate::error::{SegmentError, SegmentResult};

/// Pivots below this magnitude mean the quad is singular
const PIVOT_EPSILON: f64 = 1e-10;

/// Homogeneous denominators below this magnitude have no finite image
pub const W_EPSILON: f64 = 1e-10;

/// Triangle area below this fraction of the squared extent counts as a line
const COLLINEAR_RATIO: f64 = 1e-12;

/// 3x3 projective transform stored in row-major order, `m[8] == 1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: [f64; 9],
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn as_array(&self) -> &[f64; 9] {
        &self.matrix
    }

    /// Solve for the transform taking the corners (0,0), (w,0), (w,h), (0,h)
    /// of the destination rectangle onto `source` in the same order.
    pub fn solve(dest_width: f64, dest_height: f64, source: &[Point]) -> SegmentResult<Self> {
        if source.len() != 4 {
            return Err(SegmentError::degenerate(format!(
                "expected 4 source points, got {}",
                source.len()
            )));
        }

        check_spread(source)?;

        let dest = [
            (0.0, 0.0),
            (dest_width, 0.0),
            (dest_width, dest_height),
            (0.0, dest_height),
        ];

        // Two equations per correspondence (x,y) -> (sx,sy):
        // x*h0 + y*h1 + h2 - sx*x*h6 - sx*y*h7 = sx
        // x*h3 + y*h4 + h5 - sy*x*h6 - sy*y*h7 = sy
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for (i, (&(x, y), src)) in dest.iter().zip(source).enumerate() {
            let (sx, sy) = (src.x, src.y);
            a[i * 2] = [x, y, 1.0, 0.0, 0.0, 0.0, -sx * x, -sx * y];
            b[i * 2] = sx;
            a[i * 2 + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -sy * x, -sy * y];
            b[i * 2 + 1] = sy;
        }

        let h = solve_linear_system(&mut a, &mut b)?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(SegmentError::degenerate("solution is not finite"));
        }

        Ok(Self {
            matrix: [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
        })
    }

    /// Map a destination point to the source, `None` when it lands at infinity
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let h = &self.matrix;
        let z = h[6] * x + h[7] * y + h[8];
        if z.abs() < W_EPSILON {
            return None;
        }
        let sx = (h[0] * x + h[1] * y + h[2]) / z;
        let sy = (h[3] * x + h[4] * y + h[5]) / z;
        Some((sx, sy))
    }
}

/// Reject sources where any three corners are collinear
///
/// The linear system alone can still be solvable for such points, but its
/// answer is a rank-deficient matrix that folds the rectangle onto a line.
fn check_spread(source: &[Point]) -> SegmentResult<()> {
    if source.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(SegmentError::degenerate("non-finite source point"));
    }

    let extent = source
        .iter()
        .flat_map(|a| source.iter().map(move |b| (a.x - b.x).abs().max((a.y - b.y).abs())))
        .fold(0.0f64, f64::max);
    let tolerance = COLLINEAR_RATIO * extent * extent;

    for [i, j, k] in [[0, 1, 2], [1, 2, 3], [2, 3, 0], [3, 0, 1]] {
        let (a, b, c) = (source[i], source[j], source[k]);
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if cross.abs() <= tolerance {
            return Err(SegmentError::degenerate(format!(
                "source points {}, {} and {} are collinear",
                i, j, k
            )));
        }
    }

    Ok(())
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(a: &mut [[f64; 8]; 8], b: &mut [f64; 8]) -> SegmentResult<[f64; 8]> {
    let n = 8;

    // Forward elimination with partial pivoting
    for col in 0..n {
        // Find pivot
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        // Swap rows
        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if pivot.abs() < PIVOT_EPSILON {
            return Err(SegmentError::degenerate(format!(
                "singular system at column {} (pivot {:e})",
                col, pivot
            )));
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_identity_solve() {
        let corners = [p(0.0, 0.0), p(100.0, 0.0), p(100.0, 60.0), p(0.0, 60.0)];
        let h = Homography::solve(100.0, 60.0, &corners).unwrap();

        for (got, want) in h.as_array().iter().zip(Homography::identity().as_array()) {
            assert!((got - want).abs() < 1e-9, "{:?}", h);
        }

        let (x, y) = h.apply(50.0, 30.0).unwrap();
        assert!((x - 50.0).abs() < 1e-9);
        assert!((y - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_corners_round_trip() {
        let quads = [
            [p(12.0, 30.0), p(210.0, 8.0), p(240.0, 190.0), p(3.0, 170.0)],
            [p(100.5, 100.25), p(300.0, 120.0), p(280.0, 400.0), p(90.0, 380.0)],
            [p(0.0, 0.0), p(10.0, 1.0), p(9.0, 12.0), p(-1.0, 11.0)],
        ];
        let (w, h) = (160.0, 90.0);

        for quad in quads {
            let hom = Homography::solve(w, h, &quad).unwrap();
            assert_eq!(hom.as_array()[8], 1.0);
            let dest = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
            for ((dx, dy), src) in dest.into_iter().zip(quad) {
                let (sx, sy) = hom.apply(dx, dy).unwrap();
                assert!((sx - src.x).abs() < 1e-6, "x {} vs {}", sx, src.x);
                assert!((sy - src.y).abs() < 1e-6, "y {} vs {}", sy, src.y);
            }
        }
    }

    #[test]
    fn test_three_points_fail() {
        let err = Homography::solve(10.0, 10.0, &[p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, SegmentError::DegenerateQuad(_)));
    }

    #[test]
    fn test_five_points_fail() {
        let pts = [p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0), p(0.5, 0.5)];
        assert!(Homography::solve(10.0, 10.0, &pts).is_err());
    }

    #[test]
    fn test_collinear_points_fail() {
        let pts = [p(0.0, 0.0), p(10.0, 10.0), p(20.0, 20.0), p(30.0, 30.0)];
        let err = Homography::solve(64.0, 64.0, &pts).unwrap_err();
        assert!(matches!(err, SegmentError::DegenerateQuad(_)));
    }

    #[test]
    fn test_coincident_points_fail() {
        let pts = [p(5.0, 5.0); 4];
        assert!(Homography::solve(64.0, 64.0, &pts).is_err());
    }

    #[test]
    fn test_non_finite_points_fail() {
        let pts = [p(0.0, 0.0), p(f64::NAN, 0.0), p(10.0, 10.0), p(0.0, 10.0)];
        assert!(Homography::solve(10.0, 10.0, &pts).is_err());
    }

    #[test]
    fn test_apply_at_infinity() {
        let h = Homography {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        };
        assert!(h.apply(-1.0, 0.0).is_none());
        assert!(h.apply(1.0, 0.0).is_some());
    }
}
