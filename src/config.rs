//! Configuration management for facewarp

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{SegmentError, SegmentResult};
use crate::faces::{FaceId, Quad};

/// A 2D point, normalized (0.0 to 1.0) or in pixels depending on context
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Convert to pixel coordinates
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64) {
        (self.x * width as f64, self.y * height as f64)
    }

    /// Create from pixel coordinates
    pub fn from_pixels(px: f64, py: f64, width: u32, height: u32) -> Self {
        Self {
            x: px / width as f64,
            y: py / height as f64,
        }
    }

    /// Euclidean distance to another point in the same space
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned rectangle normalized to the frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Region {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Regions without positive area are never cropped
    pub fn is_active(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Region in pixel coordinates as (x, y, w, h)
    pub fn to_pixels(&self, width: u32, height: u32) -> (f64, f64, f64, f64) {
        let (fw, fh) = (width as f64, height as f64);
        (self.x * fw, self.y * fh, self.w * fw, self.h * fh)
    }

    fn validate(&self) -> SegmentResult<()> {
        if [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(SegmentError::invalid_parameter("region values must be finite"))
        }
    }
}

/// Per-edge lens/projection warp applied before segmentation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DistortionParams {
    /// Horizontal pinch applied to the upper half
    #[serde(default = "default_vertical_coef")]
    pub top: f64,
    /// Horizontal pinch applied to the lower half
    #[serde(default = "default_vertical_coef")]
    pub bottom: f64,
    /// Vertical pinch applied to the left half
    #[serde(default = "default_horizontal_coef")]
    pub left: f64,
    /// Vertical pinch applied to the right half
    #[serde(default = "default_horizontal_coef")]
    pub right: f64,
    /// Zoom; values above 1.0 magnify the center
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_vertical_coef() -> f64 {
    0.3
}

fn default_horizontal_coef() -> f64 {
    0.1
}

fn default_scale() -> f64 {
    1.0
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            top: 0.3,
            bottom: 0.3,
            left: 0.1,
            right: 0.1,
            scale: 1.0,
        }
    }
}

impl DistortionParams {
    /// Parameters under which the corrector maps every pixel onto itself
    pub fn identity() -> Self {
        Self {
            top: 0.0,
            bottom: 0.0,
            left: 0.0,
            right: 0.0,
            scale: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn validate(&self) -> SegmentResult<()> {
        let coefs = [self.top, self.bottom, self.left, self.right];
        if coefs.iter().any(|c| !c.is_finite()) {
            return Err(SegmentError::invalid_parameter(
                "distortion coefficients must be finite",
            ));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(SegmentError::invalid_parameter(format!(
                "distortion scale must be positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Partial distortion update; fields left out keep their current value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DistortionPatch {
    #[serde(default)]
    pub top: Option<f64>,
    #[serde(default)]
    pub bottom: Option<f64>,
    #[serde(default)]
    pub left: Option<f64>,
    #[serde(default)]
    pub right: Option<f64>,
    #[serde(default)]
    pub scale: Option<f64>,
}

impl DistortionPatch {
    /// Overwrite only the fields present in the patch
    pub fn apply_to(&self, params: &mut DistortionParams) {
        if let Some(top) = self.top {
            params.top = top;
        }
        if let Some(bottom) = self.bottom {
            params.bottom = bottom;
        }
        if let Some(left) = self.left {
            params.left = left;
        }
        if let Some(right) = self.right {
            params.right = right;
        }
        if let Some(scale) = self.scale {
            params.scale = scale;
        }
    }
}

/// Source placement for a single face
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct FaceConfig {
    /// Crop rectangle used when no quad applies
    #[serde(default)]
    pub region: Region,
    /// Perspective quad, TL, TR, BR, BL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quad: Option<Quad>,
}

impl FaceConfig {
    fn with_region(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            region: Region::new(x, y, w, h),
            quad: None,
        }
    }
}

/// Placement for all five faces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FacesConfig {
    #[serde(default)]
    pub front: FaceConfig,
    #[serde(default)]
    pub back: FaceConfig,
    #[serde(default)]
    pub left: FaceConfig,
    #[serde(default)]
    pub right: FaceConfig,
    #[serde(default)]
    pub floor: FaceConfig,
}

impl Default for FacesConfig {
    fn default() -> Self {
        // Four vertical strips; the back face starts without a region
        Self {
            front: FaceConfig::with_region(0.0, 0.0, 0.25, 1.0),
            back: FaceConfig::with_region(0.0, 0.0, 0.0, 0.0),
            left: FaceConfig::with_region(0.25, 0.0, 0.25, 1.0),
            right: FaceConfig::with_region(0.5, 0.0, 0.25, 1.0),
            floor: FaceConfig::with_region(0.75, 0.0, 0.25, 1.0),
        }
    }
}

impl FacesConfig {
    pub fn get(&self, face: FaceId) -> &FaceConfig {
        match face {
            FaceId::Front => &self.front,
            FaceId::Back => &self.back,
            FaceId::Left => &self.left,
            FaceId::Right => &self.right,
            FaceId::Floor => &self.floor,
        }
    }

    pub fn get_mut(&mut self, face: FaceId) -> &mut FaceConfig {
        match face {
            FaceId::Front => &mut self.front,
            FaceId::Back => &mut self.back,
            FaceId::Left => &mut self.left,
            FaceId::Right => &mut self.right,
            FaceId::Floor => &mut self.floor,
        }
    }
}

/// Everything a tick reads; swapped as one value between ticks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Faces rendered each tick
    #[serde(default = "default_active_faces")]
    pub active_faces: BTreeSet<FaceId>,

    /// Use quads where configured instead of rectangle crops
    #[serde(default = "default_enabled")]
    pub dewarp: bool,

    /// Run the distortion pass before segmentation
    #[serde(default = "default_enabled")]
    pub distortion_enabled: bool,

    #[serde(default)]
    pub distortion: DistortionParams,

    #[serde(default)]
    pub faces: FacesConfig,
}

fn default_active_faces() -> BTreeSet<FaceId> {
    [FaceId::Front, FaceId::Left, FaceId::Right, FaceId::Floor]
        .into_iter()
        .collect()
}

fn default_enabled() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            active_faces: default_active_faces(),
            dewarp: true,
            distortion_enabled: true,
            distortion: DistortionParams::default(),
            faces: FacesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check values that cannot be expressed in the types
    pub fn validate(&self) -> SegmentResult<()> {
        self.distortion.validate()?;
        for face in FaceId::ALL {
            self.faces.get(face).region.validate()?;
        }
        Ok(())
    }

    pub fn set_region(&mut self, face: FaceId, region: Region) -> SegmentResult<()> {
        region.validate()?;
        self.faces.get_mut(face).region = region;
        Ok(())
    }
}

/// Resampling used when scaling into a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// Output channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub filter: ResampleFilter,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            filter: ResampleFilter::default(),
        }
    }
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Image file or directory of frames
    pub path: PathBuf,
    pub fps: u32,
    /// Restart a frame sequence after its last frame
    #[serde(default = "default_enabled")]
    pub looping: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("frames"),
            fps: 30,
            looping: true,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8092,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config
                .pipeline
                .validate()
                .with_context(|| format!("Invalid pipeline settings in {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_conversion() {
        let p = Point::new(0.5, 0.5);
        let (px, py) = p.to_pixels(640, 480);
        assert_eq!(px, 320.0);
        assert_eq!(py, 240.0);

        let p2 = Point::from_pixels(320.0, 240.0, 640, 480);
        assert_eq!(p2.x, 0.5);
        assert_eq!(p2.y, 0.5);
    }

    #[test]
    fn test_region_activity() {
        assert!(Region::new(0.0, 0.0, 0.25, 1.0).is_active());
        assert!(!Region::new(0.1, 0.1, 0.0, 0.5).is_active());
        assert!(!Region::new(0.1, 0.1, 0.5, -0.2).is_active());
    }

    #[test]
    fn test_default_pipeline() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.active_faces.len(), 4);
        assert!(!cfg.active_faces.contains(&FaceId::Back));
        assert!(!cfg.faces.back.region.is_active());
        assert_eq!(cfg.distortion, DistortionParams::default());
        assert!(cfg.dewarp);
    }

    #[test]
    fn test_distortion_validation() {
        let mut params = DistortionParams::default();
        assert!(params.validate().is_ok());
        params.scale = 0.0;
        assert!(params.validate().is_err());
        params.scale = 1.0;
        params.top = f64::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_distortion_patch_keeps_missing_fields() {
        let mut params = DistortionParams {
            top: 0.1,
            bottom: 0.2,
            left: 0.7,
            right: 0.4,
            scale: 1.5,
        };
        let patch: DistortionPatch = serde_json::from_str(r#"{"top": 0.5}"#).unwrap();
        patch.apply_to(&mut params);

        assert_eq!(params.top, 0.5);
        assert_eq!(params.bottom, 0.2);
        assert_eq!(params.left, 0.7);
        assert_eq!(params.right, 0.4);
        assert_eq!(params.scale, 1.5);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("facewarp.toml");

        let mut config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        config.pipeline.faces.front.quad = Some(
            Quad::new([
                Point::new(0.1, 0.1),
                Point::new(0.3, 0.12),
                Point::new(0.28, 0.9),
                Point::new(0.08, 0.85),
            ])
            .unwrap(),
        );
        config.pipeline.distortion.top = 0.0;
        config.save(&path).unwrap();

        let reloaded = Config::load_or_create(&path).unwrap();
        assert_eq!(reloaded.pipeline, config.pipeline);
    }

    #[test]
    fn test_misordered_quad_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            r#"
[pipeline.faces.front]
region = { x = 0.0, y = 0.0, w = 0.5, h = 1.0 }
quad = [
    { x = 0.0, y = 0.0 },
    { x = 1.0, y = 0.0 },
    { x = 0.0, y = 1.0 },
    { x = 1.0, y = 1.0 },
]
"#,
        )
        .unwrap();

        assert!(Config::load_or_create(&path).is_err());
    }
}
