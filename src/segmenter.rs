//! Per-tick segmentation of one frame into the face channels
//!
//! Configuration is shared with editors through [`SegmenterControl`], which
//! publishes whole [`PipelineConfig`] values. A tick loads one snapshot up
//! front, so every face sees a single consistent configuration even while
//! edits arrive.

use arc_swap::ArcSwap;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::capture::{FrameSource, SourceState};
use crate::config::{
    ChannelConfig, DistortionParams, DistortionPatch, FaceConfig, PipelineConfig, Region, ResampleFilter,
};
use crate::distortion;
use crate::error::{SegmentError, SegmentResult};
use crate::faces::{FaceId, Quad};
use crate::resample;
use crate::warp;

/// Log repeated failures of a face once per this many failures
const WARN_EVERY_FAILURES: u64 = 100;

/// Warn on a face's first failure and every `WARN_EVERY_FAILURES` after it
fn warn_due(failures: u64) -> bool {
    failures % WARN_EVERY_FAILURES == 1
}

/// Cloneable handle for changing the pipeline configuration between ticks
#[derive(Debug, Clone)]
pub struct SegmenterControl {
    shared: Arc<ArcSwap<PipelineConfig>>,
}

impl SegmenterControl {
    pub fn new(config: PipelineConfig) -> SegmentResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// The configuration the next tick will use
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.shared.load_full()
    }

    /// Copy the current configuration, edit the copy and publish it
    fn update<F>(&self, edit: F) -> SegmentResult<()>
    where
        F: Fn(&mut PipelineConfig) -> SegmentResult<()>,
    {
        let mut failure = None;
        self.shared.rcu(|current| {
            let mut next = PipelineConfig::clone(current);
            match edit(&mut next) {
                Ok(()) => {
                    failure = None;
                    Arc::new(next)
                }
                Err(e) => {
                    failure = Some(e);
                    Arc::clone(current)
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn set_region(&self, face: FaceId, region: Region) -> SegmentResult<()> {
        self.update(|cfg| cfg.set_region(face, region))
    }

    /// Set or clear the perspective quad for a face
    pub fn set_quad(&self, face: FaceId, quad: Option<Quad>) -> SegmentResult<()> {
        self.update(|cfg| {
            cfg.faces.get_mut(face).quad = quad;
            Ok(())
        })
    }

    pub fn set_active_faces(&self, faces: &[FaceId]) -> SegmentResult<()> {
        self.update(|cfg| {
            cfg.active_faces = faces.iter().copied().collect();
            Ok(())
        })
    }

    pub fn set_dewarp_enabled(&self, enabled: bool) -> SegmentResult<()> {
        self.update(|cfg| {
            cfg.dewarp = enabled;
            Ok(())
        })
    }

    pub fn set_distortion_params(&self, params: DistortionParams) -> SegmentResult<()> {
        params.validate()?;
        self.update(|cfg| {
            cfg.distortion = params;
            Ok(())
        })
    }

    pub fn set_distortion_enabled(&self, enabled: bool) -> SegmentResult<()> {
        self.update(|cfg| {
            cfg.distortion_enabled = enabled;
            Ok(())
        })
    }

    /// Merge a partial parameter change and the enable flag into one swap.
    /// Nothing is published if the merged parameters are invalid.
    pub fn update_distortion(
        &self,
        patch: Option<DistortionPatch>,
        enabled: Option<bool>,
    ) -> SegmentResult<()> {
        self.update(|cfg| {
            if let Some(patch) = &patch {
                let mut params = cfg.distortion;
                patch.apply_to(&mut params);
                params.validate()?;
                cfg.distortion = params;
            }
            if let Some(enabled) = enabled {
                cfg.distortion_enabled = enabled;
            }
            Ok(())
        })
    }

    /// Replace the whole configuration at once
    pub fn replace(&self, config: PipelineConfig) -> SegmentResult<()> {
        config.validate()?;
        self.shared.store(Arc::new(config));
        Ok(())
    }
}

/// Latest output raster per face, readable from any thread
#[derive(Debug)]
pub struct ChannelStore {
    width: u32,
    height: u32,
    slots: [ArcSwap<RgbaImage>; 5],
}

impl ChannelStore {
    /// Channels start fully transparent
    pub fn new(width: u32, height: u32) -> SegmentResult<Self> {
        if width == 0 || height == 0 {
            return Err(SegmentError::invalid_size(width, height));
        }
        Ok(Self {
            width,
            height,
            slots: std::array::from_fn(|_| ArcSwap::from_pointee(RgbaImage::new(width, height))),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read-only snapshot of the most recently written buffer for a face
    pub fn get(&self, face: FaceId) -> Arc<RgbaImage> {
        self.slots[face.index()].load_full()
    }

    fn publish(&self, face: FaceId, image: RgbaImage) {
        debug_assert_eq!(image.dimensions(), (self.width, self.height));
        self.slots[face.index()].store(Arc::new(image));
    }
}

/// What happened to one face during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    /// Rectified from its quad
    Dewarped,
    /// Cropped from its region
    Cropped,
    /// Channel left as it was
    Stale(SegmentError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaceReport {
    pub face: FaceId,
    pub outcome: FaceOutcome,
}

/// Timings and per-face results of a processed tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub frame_width: u32,
    pub frame_height: u32,
    pub distortion_us: u64,
    pub faces_us: u64,
    pub faces: Vec<FaceReport>,
}

impl TickSummary {
    pub fn outcome(&self, face: FaceId) -> Option<&FaceOutcome> {
        self.faces.iter().find(|r| r.face == face).map(|r| &r.outcome)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// No frame this tick; every channel kept its contents
    Skipped(SegmentError),
    Processed(TickSummary),
}

/// Turns source frames into per-face channels, one tick at a time
pub struct FrameSegmenter {
    control: SegmenterControl,
    channels: Arc<ChannelStore>,
    filter: ResampleFilter,
    /// Distortion output, reused across ticks
    corrected: RgbaImage,
    /// Warp output before resampling to the channel size
    warped: RgbaImage,
    /// Failures per face since start, indexed by `FaceId::index`
    failures: [u64; 5],
}

impl FrameSegmenter {
    pub fn new(channel: &ChannelConfig, config: PipelineConfig) -> SegmentResult<Self> {
        let control = SegmenterControl::new(config)?;
        Self::with_control(channel, control)
    }

    /// Build a segmenter around an existing control handle
    pub fn with_control(channel: &ChannelConfig, control: SegmenterControl) -> SegmentResult<Self> {
        let channels = Arc::new(ChannelStore::new(channel.width, channel.height)?);
        Ok(Self {
            control,
            channels,
            filter: channel.filter,
            corrected: RgbaImage::new(0, 0),
            warped: RgbaImage::new(0, 0),
            failures: [0; 5],
        })
    }

    pub fn control(&self) -> &SegmenterControl {
        &self.control
    }

    pub fn channels(&self) -> Arc<ChannelStore> {
        Arc::clone(&self.channels)
    }

    pub fn get_channel(&self, face: FaceId) -> Arc<RgbaImage> {
        self.channels.get(face)
    }

    /// How many ticks a face has failed to render
    pub fn failures(&self, face: FaceId) -> u64 {
        self.failures[face.index()]
    }

    /// Process the source's current frame into the active face channels.
    ///
    /// Failures stay inside the tick: a missing frame skips the tick, a face
    /// that cannot be produced keeps its previous channel.
    pub fn tick<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> TickReport {
        let state = source.state();
        if state != SourceState::Playing {
            return TickReport::Skipped(SegmentError::not_ready(format!("source is {}", state)));
        }
        let Some(frame) = source.current_frame() else {
            return TickReport::Skipped(SegmentError::not_ready("no frame available"));
        };
        let (frame_w, frame_h) = frame.dimensions();
        if frame_w == 0 || frame_h == 0 {
            return TickReport::Skipped(SegmentError::not_ready("frame dimensions unknown"));
        }

        let config = self.control.snapshot();

        let distortion_start = Instant::now();
        let working: &RgbaImage = if config.distortion_enabled && !config.distortion.is_identity() {
            distortion::correct_into(frame, &config.distortion, &mut self.corrected);
            &self.corrected
        } else {
            frame
        };
        let distortion_us = distortion_start.elapsed().as_micros() as u64;

        let faces_start = Instant::now();
        let mut faces = Vec::with_capacity(config.active_faces.len());
        for &face in &config.active_faces {
            let face_config = config.faces.get(face);
            let result = render_face(
                working,
                face_config,
                config.dewarp,
                &mut self.warped,
                self.channels.dimensions(),
                self.filter,
            );

            let outcome = match result {
                Ok((image, outcome)) => {
                    self.channels.publish(face, image);
                    outcome
                }
                Err(e) => {
                    debug!("Face {} left unchanged: {}", face, e);
                    let failures = &mut self.failures[face.index()];
                    *failures += 1;
                    if warn_due(*failures) && !matches!(e, SegmentError::InvalidSize { .. }) {
                        warn!(
                            "Face {} could not be rendered ({} failures): {}",
                            face, failures, e
                        );
                    }
                    FaceOutcome::Stale(e)
                }
            };
            faces.push(FaceReport { face, outcome });
        }
        let faces_us = faces_start.elapsed().as_micros() as u64;

        TickReport::Processed(TickSummary {
            frame_width: frame_w,
            frame_height: frame_h,
            distortion_us,
            faces_us,
            faces,
        })
    }
}

/// Produce one face's channel image from the corrected frame
fn render_face(
    working: &RgbaImage,
    face: &FaceConfig,
    dewarp: bool,
    scratch: &mut RgbaImage,
    (channel_w, channel_h): (u32, u32),
    filter: ResampleFilter,
) -> SegmentResult<(RgbaImage, FaceOutcome)> {
    let (frame_w, frame_h) = working.dimensions();

    if dewarp {
        if let Some(quad) = &face.quad {
            let corners = quad.to_pixels(frame_w, frame_h);
            warp::warp_into(working, &corners, scratch, None)?;
            let image = resample::resize(scratch, channel_w, channel_h, ResampleFilter::Bilinear)?;
            return Ok((image, FaceOutcome::Dewarped));
        }
    }

    if !face.region.is_active() {
        return Err(SegmentError::invalid_size(
            face.region.w as i64,
            face.region.h as i64,
        ));
    }

    let rect = face.region.to_pixels(frame_w, frame_h);
    let image = resample::crop_and_scale(working, rect, channel_w, channel_h, filter)?;
    Ok((image, FaceOutcome::Cropped))
}
