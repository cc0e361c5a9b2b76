//! Face identifiers, quads and the per-face summaries served to the editor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{PipelineConfig, Point, Region};
use crate::error::{SegmentError, SegmentResult};

/// Cross products at or below this magnitude count as collinear corners
const COLLINEAR_EPSILON: f64 = 1e-12;

/// One of the five model surfaces fed from the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceId {
    Front,
    Back,
    Left,
    Right,
    Floor,
}

impl FaceId {
    pub const ALL: [FaceId; 5] = [
        FaceId::Front,
        FaceId::Back,
        FaceId::Left,
        FaceId::Right,
        FaceId::Floor,
    ];

    /// Stable index into per-face arrays
    pub fn index(self) -> usize {
        match self {
            FaceId::Front => 0,
            FaceId::Back => 1,
            FaceId::Left => 2,
            FaceId::Right => 3,
            FaceId::Floor => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaceId::Front => "front",
            FaceId::Back => "back",
            FaceId::Left => "left",
            FaceId::Right => "right",
            FaceId::Floor => "floor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FaceId::Front => "Front",
            FaceId::Back => "Back",
            FaceId::Left => "Left",
            FaceId::Right => "Right",
            FaceId::Floor => "Floor",
        }
    }

    /// Material name the scene binder looks for on the model
    pub fn material_name(self) -> &'static str {
        match self {
            FaceId::Front => "box_qian",
            FaceId::Back => "box_hou",
            FaceId::Left => "box_zuo",
            FaceId::Right => "box_you",
            FaceId::Floor => "box_di",
        }
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaceId {
    type Err = SegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        FaceId::ALL
            .into_iter()
            .find(|face| face.as_str() == needle || face.material_name() == needle)
            .ok_or_else(|| SegmentError::invalid_parameter(format!("unknown face '{}'", s)))
    }
}

/// Four points in TL, TR, BR, BL order
///
/// Quads in configuration are normalized to the frame (0.0 to 1.0); the
/// segmenter converts them to pixels against each corrected frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Quad {
    points: [Point; 4],
}

impl Quad {
    /// Build a quad, checking count-free invariants: finite, convex, clockwise,
    /// and starting at the top-left corner.
    pub fn new(points: [Point; 4]) -> SegmentResult<Self> {
        validate_order(&points)?;
        Ok(Self { points })
    }

    /// Build a quad from exactly four points given as a slice
    pub fn from_slice(points: &[Point]) -> SegmentResult<Self> {
        let points: [Point; 4] = points.try_into().map_err(|_| {
            SegmentError::degenerate(format!("expected 4 points, got {}", points.len()))
        })?;
        Self::new(points)
    }

    /// Sort four points of a convex quad into TL, TR, BR, BL.
    ///
    /// The region editor emits corners in reading order (TL, TR, BL, BR);
    /// this accepts that and any other permutation.
    pub fn from_unordered(points: [Point; 4]) -> SegmentResult<Self> {
        let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

        // Ascending angle with y pointing down walks the corners clockwise
        let mut sorted = points;
        sorted.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.total_cmp(&tb)
        });

        let start = sorted
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        sorted.rotate_left(start);

        Self::new(sorted)
    }

    /// Corners of an active region, used to seed a quad for a face
    pub fn from_region(region: &Region) -> SegmentResult<Self> {
        if !region.is_active() {
            return Err(SegmentError::degenerate("region is inactive"));
        }
        let Region { x, y, w, h } = *region;
        Self::new([
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
        ])
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.points
    }

    /// Convert normalized corners to pixel coordinates
    pub fn to_pixels(&self, width: u32, height: u32) -> [Point; 4] {
        self.points.map(|p| {
            let (x, y) = p.to_pixels(width, height);
            Point::new(x, y)
        })
    }
}

impl TryFrom<Vec<Point>> for Quad {
    type Error = SegmentError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        Self::from_slice(&points)
    }
}

impl From<Quad> for Vec<Point> {
    fn from(quad: Quad) -> Self {
        quad.points.to_vec()
    }
}

fn validate_order(points: &[Point; 4]) -> SegmentResult<()> {
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(SegmentError::degenerate("non-finite corner"));
    }

    let mut positive = 0;
    let mut negative = 0;
    for i in 0..4 {
        let a = points[i];
        let b = points[(i + 1) % 4];
        let c = points[(i + 2) % 4];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() <= COLLINEAR_EPSILON {
            return Err(SegmentError::degenerate(format!(
                "corners {}, {} and {} are collinear",
                i,
                (i + 1) % 4,
                (i + 2) % 4
            )));
        }
        if cross > 0.0 {
            positive += 1;
        } else {
            negative += 1;
        }
    }

    if positive != 4 {
        return Err(if negative == 4 {
            SegmentError::misordered("corners run counter-clockwise")
        } else {
            SegmentError::misordered("edges cross; expected TL, TR, BR, BL")
        });
    }

    let [tl, tr, br, bl] = *points;
    if tl.y + tr.y >= br.y + bl.y || tl.x + bl.x >= tr.x + br.x {
        return Err(SegmentError::misordered("first corner is not top-left"));
    }

    Ok(())
}

/// What the next tick will do for a face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceMode {
    Dewarp,
    Crop,
    Idle,
}

/// A labeled face entry for the editing UI
#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub face: FaceId,
    pub label: &'static str,
    pub material: &'static str,
    pub active: bool,
    pub mode: FaceMode,
    pub region: Region,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quad: Option<Quad>,
}

/// Summarize every face of a pipeline configuration
pub fn face_summaries(config: &PipelineConfig) -> Vec<FaceSummary> {
    FaceId::ALL
        .into_iter()
        .map(|face| {
            let face_config = config.faces.get(face);
            let active = config.active_faces.contains(&face);
            let mode = if !active {
                FaceMode::Idle
            } else if config.dewarp && face_config.quad.is_some() {
                FaceMode::Dewarp
            } else if face_config.region.is_active() {
                FaceMode::Crop
            } else {
                FaceMode::Idle
            };

            FaceSummary {
                face,
                label: face.label(),
                material: face.material_name(),
                active,
                mode,
                region: face_config.region,
                quad: face_config.quad,
            }
        })
        .collect()
}
