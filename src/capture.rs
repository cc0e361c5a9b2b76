//! Frame sources and the tick loop
//!
//! A source hands the segmenter one RGBA frame per tick. Two sources are
//! provided: a single still image and a directory of numbered frames played
//! back at the configured rate. Neither decodes video; frames are plain
//! image files read with the `image` crate.

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::segmenter::{FrameSegmenter, TickReport};
use crate::server::AppState;

/// File extensions accepted as frames
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Playback state of a frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Playing,
    Paused,
    Ended,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceState::Playing => "playing",
            SourceState::Paused => "paused",
            SourceState::Ended => "ended",
        })
    }
}

/// Supplier of the frame to segment on each tick
pub trait FrameSource {
    fn state(&self) -> SourceState;

    /// The current frame, or `None` when it cannot be produced right now
    fn current_frame(&mut self) -> Option<&RgbaImage>;

    /// Step to the next frame; called once after every tick
    fn advance(&mut self) {}

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// A single image presented on every tick
pub struct StillSource {
    frame: RgbaImage,
    paused: bool,
}

impl StillSource {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame, paused: false }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let frame = image::open(path)
            .with_context(|| format!("Failed to decode image {:?}", path))?
            .into_rgba8();
        Ok(Self::new(frame))
    }

    /// Swap in a new image for subsequent ticks
    pub fn replace(&mut self, frame: RgbaImage) {
        self.frame = frame;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

impl FrameSource for StillSource {
    fn state(&self) -> SourceState {
        if self.paused {
            SourceState::Paused
        } else {
            SourceState::Playing
        }
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        Some(&self.frame)
    }

    fn describe(&self) -> String {
        format!("still image {}x{}", self.frame.width(), self.frame.height())
    }
}

/// A sorted directory of frame images
pub struct ImageSequenceSource {
    frames: Vec<PathBuf>,
    index: usize,
    loaded: Option<(usize, RgbaImage)>,
    looping: bool,
    paused: bool,
    ended: bool,
}

impl ImageSequenceSource {
    /// Collect the frames in `dir`, ordered by file name
    pub fn open(dir: &Path, looping: bool) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {:?}", dir))?;

        let mut frames = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list frame directory {:?}", dir))?
                .path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame && path.is_file() {
                frames.push(path);
            }
        }

        if frames.is_empty() {
            bail!("No frames ({}) found in {:?}", FRAME_EXTENSIONS.join(", "), dir);
        }
        frames.sort();

        info!("Found {} frames in {:?}", frames.len(), dir);
        Ok(Self {
            frames,
            index: 0,
            loaded: None,
            looping,
            paused: false,
            ended: false,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

impl FrameSource for ImageSequenceSource {
    fn state(&self) -> SourceState {
        if self.ended {
            SourceState::Ended
        } else if self.paused {
            SourceState::Paused
        } else {
            SourceState::Playing
        }
    }

    fn current_frame(&mut self) -> Option<&RgbaImage> {
        if self.ended {
            return None;
        }

        let stale = !matches!(&self.loaded, Some((index, _)) if *index == self.index);
        if stale {
            let path = &self.frames[self.index];
            match image::open(path) {
                Ok(img) => {
                    debug!("Decoded frame {:?}", path);
                    self.loaded = Some((self.index, img.into_rgba8()));
                }
                Err(e) => {
                    warn!("Failed to decode frame {:?}: {}", path, e);
                    self.loaded = None;
                    return None;
                }
            }
        }

        self.loaded.as_ref().map(|(_, frame)| frame)
    }

    fn advance(&mut self) {
        if self.paused || self.ended {
            return;
        }
        self.index += 1;
        if self.index >= self.frames.len() {
            if self.looping {
                self.index = 0;
            } else {
                self.index = self.frames.len() - 1;
                self.ended = true;
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} frame sequence{}",
            self.frames.len(),
            if self.looping { " (looping)" } else { "" }
        )
    }
}

/// Open the source named by the configuration: a directory plays as a
/// sequence, anything else is read as a still image.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource + Send>> {
    let path = &config.path;
    if path.is_dir() {
        Ok(Box::new(ImageSequenceSource::open(path, config.looping)?))
    } else {
        Ok(Box::new(StillSource::open(path)?))
    }
}

/// Run ticks at `fps` until the source ends or a stop is requested
pub fn run_pipeline(
    mut source: Box<dyn FrameSource + Send>,
    mut segmenter: FrameSegmenter,
    fps: u32,
    state: Arc<AppState>,
) -> Result<()> {
    info!("=== facewarp pipeline ===");
    info!("Source: {}", source.describe());
    let (channel_w, channel_h) = segmenter.channels().dimensions();
    info!("Channels: {}x{} @ {} fps", channel_w, channel_h, fps);

    let frame_interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);

    // Performance tracking
    let mut frame_count = 0u64;
    let mut skipped_count = 0u64;
    let mut last_stats_time = Instant::now();
    let stats_interval = Duration::from_secs(10);

    loop {
        if state.is_stop_requested() {
            info!("Stop requested - leaving pipeline loop");
            return Ok(());
        }

        let tick_start = Instant::now();
        let report = segmenter.tick(source.as_mut());
        let tick_us = tick_start.elapsed().as_micros() as u64;

        match &report {
            TickReport::Processed(summary) => {
                debug!(
                    "Tick: {}x{} frame, distortion {}us, faces {}us",
                    summary.frame_width, summary.frame_height, summary.distortion_us, summary.faces_us
                );
                frame_count += 1;
            }
            TickReport::Skipped(e) => {
                if skipped_count % 100 == 0 {
                    warn!("Tick skipped: {}", e);
                }
                skipped_count += 1;
            }
        }
        state.record_tick(&report, tick_us);

        if source.state() == SourceState::Ended {
            info!("Source ended after {} ticks", state.stats().ticks);
            return Ok(());
        }
        source.advance();

        // Log performance stats periodically
        if last_stats_time.elapsed() >= stats_interval {
            let elapsed = last_stats_time.elapsed().as_secs_f64();
            let fps_actual = frame_count as f64 / elapsed;
            if skipped_count > 0 {
                info!(
                    "Performance: {:.1} fps ({} frames in {:.1}s, {} skipped)",
                    fps_actual, frame_count, elapsed, skipped_count
                );
            } else {
                info!(
                    "Performance: {:.1} fps ({} frames in {:.1}s)",
                    fps_actual, frame_count, elapsed
                );
            }
            frame_count = 0;
            skipped_count = 0;
            last_stats_time = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            let img = RgbaImage::from_pixel(8, 4, Rgba([i * 10, 0, 0, 255]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();
    }

    #[test]
    fn test_sequence_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        let mut source = ImageSequenceSource::open(dir.path(), true).unwrap();
        assert_eq!(source.len(), 3);

        let mut reds = Vec::new();
        for _ in 0..5 {
            reds.push(source.current_frame().unwrap().get_pixel(0, 0).0[0]);
            source.advance();
        }
        assert_eq!(reds, vec![0, 10, 20, 0, 10]);
        assert_eq!(source.state(), SourceState::Playing);
    }

    #[test]
    fn test_sequence_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);

        let mut source = ImageSequenceSource::open(dir.path(), false).unwrap();
        source.advance();
        assert_eq!(source.state(), SourceState::Playing);
        source.advance();
        assert_eq!(source.state(), SourceState::Ended);
        assert!(source.current_frame().is_none());
    }

    #[test]
    fn test_paused_sequence_holds_frame() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);

        let mut source = ImageSequenceSource::open(dir.path(), true).unwrap();
        source.set_paused(true);
        source.advance();
        assert_eq!(source.position(), 0);
        assert_eq!(source.state(), SourceState::Paused);
    }

    #[test]
    fn test_corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        RgbaImage::new(2, 2).save(dir.path().join("b.png")).unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), true).unwrap();
        assert!(source.current_frame().is_none());
        source.advance();
        assert!(source.current_frame().is_some());
    }

    fn pipeline_state(segmenter: &FrameSegmenter) -> Arc<AppState> {
        Arc::new(AppState::new(
            crate::config::Config::default(),
            PathBuf::from("unused.toml"),
            segmenter.control().clone(),
            segmenter.channels(),
        ))
    }

    fn small_segmenter() -> FrameSegmenter {
        let channel = crate::config::ChannelConfig {
            width: 8,
            height: 8,
            ..Default::default()
        };
        FrameSegmenter::new(&channel, crate::config::PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_pipeline_returns_after_stop() {
        let segmenter = small_segmenter();
        let state = pipeline_state(&segmenter);
        let frame = RgbaImage::from_pixel(32, 32, Rgba([5, 5, 5, 255]));
        let source = Box::new(StillSource::new(frame));

        let loop_state = state.clone();
        let handle =
            std::thread::spawn(move || run_pipeline(source, segmenter, 100, loop_state));

        // A still source never ends on its own
        while state.stats().ticks == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        state.request_stop();

        handle.join().unwrap().unwrap();
        assert!(state.stats().processed >= 1);
    }

    #[test]
    fn test_pipeline_stopped_before_first_tick() {
        let segmenter = small_segmenter();
        let state = pipeline_state(&segmenter);
        state.request_stop();

        let source = Box::new(StillSource::new(RgbaImage::new(4, 4)));
        run_pipeline(source, segmenter, 30, state.clone()).unwrap();
        assert_eq!(state.stats().ticks, 0);
    }

    #[test]
    fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceSource::open(dir.path(), true).is_err());
    }

    #[test]
    fn test_open_source_picks_kind() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 1);

        let config = SourceConfig {
            path: dir.path().to_path_buf(),
            ..SourceConfig::default()
        };
        assert!(open_source(&config).unwrap().describe().contains("sequence"));

        let config = SourceConfig {
            path: dir.path().join("frame_000.png"),
            ..SourceConfig::default()
        };
        assert!(open_source(&config).unwrap().describe().starts_with("still"));
    }
}
