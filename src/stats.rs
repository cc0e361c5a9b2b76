//! Tick counters for monitoring
//!
//! Updated by the pipeline thread after every tick and read by the web
//! server. Everything here is cheap to copy out as a snapshot.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::faces::FaceId;
use crate::segmenter::{FaceOutcome, TickReport};

/// Smoothing factor for the moving tick time
const TICK_TIME_ALPHA: f64 = 0.1;

/// Per-face counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FaceStats {
    pub dewarped: u64,
    pub cropped: u64,
    pub stale: u64,
    /// Most recent reason the channel was left unchanged
    pub last_error: Option<String>,
}

/// Pipeline statistics snapshot
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PipelineStats {
    /// Ticks attempted
    pub ticks: u64,
    /// Ticks that produced channels
    pub processed: u64,
    /// Ticks without a usable frame
    pub skipped: u64,
    pub last_skip_reason: Option<String>,
    /// Wall time of the last tick in microseconds
    pub last_tick_us: u64,
    /// Exponential moving average of the tick time
    pub avg_tick_us: f64,
    pub last_distortion_us: u64,
    pub last_faces_us: u64,
    /// Size of the last processed frame
    pub frame_width: u32,
    pub frame_height: u32,
    pub faces: BTreeMap<FaceId, FaceStats>,
}

impl PipelineStats {
    /// Fold one tick into the counters
    pub fn record(&mut self, report: &TickReport, tick_us: u64) {
        self.ticks += 1;
        self.last_tick_us = tick_us;
        self.avg_tick_us = if self.ticks == 1 {
            tick_us as f64
        } else {
            self.avg_tick_us + TICK_TIME_ALPHA * (tick_us as f64 - self.avg_tick_us)
        };

        match report {
            TickReport::Skipped(e) => {
                self.skipped += 1;
                self.last_skip_reason = Some(e.to_string());
            }
            TickReport::Processed(summary) => {
                self.processed += 1;
                self.last_distortion_us = summary.distortion_us;
                self.last_faces_us = summary.faces_us;
                self.frame_width = summary.frame_width;
                self.frame_height = summary.frame_height;

                for report in &summary.faces {
                    let face = self.faces.entry(report.face).or_default();
                    match &report.outcome {
                        FaceOutcome::Dewarped => face.dewarped += 1,
                        FaceOutcome::Cropped => face.cropped += 1,
                        FaceOutcome::Stale(e) => {
                            face.stale += 1;
                            face.last_error = Some(e.to_string());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SegmentError;
    use crate::segmenter::{FaceReport, TickSummary};

    fn summary(faces: Vec<FaceReport>) -> TickReport {
        TickReport::Processed(TickSummary {
            frame_width: 640,
            frame_height: 480,
            distortion_us: 100,
            faces_us: 200,
            faces,
        })
    }

    #[test]
    fn test_counts_outcomes() {
        let mut stats = PipelineStats::default();
        stats.record(
            &summary(vec![
                FaceReport { face: FaceId::Front, outcome: FaceOutcome::Dewarped },
                FaceReport {
                    face: FaceId::Left,
                    outcome: FaceOutcome::Stale(SegmentError::invalid_size(0, 0)),
                },
            ]),
            400,
        );
        stats.record(&TickReport::Skipped(SegmentError::not_ready("paused")), 10);

        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!((stats.frame_width, stats.frame_height), (640, 480));
        assert_eq!(stats.faces[&FaceId::Front].dewarped, 1);
        assert_eq!(stats.faces[&FaceId::Left].stale, 1);
        assert!(stats.faces[&FaceId::Left].last_error.is_some());
        assert!(stats.last_skip_reason.as_deref().unwrap().contains("paused"));
    }

    #[test]
    fn test_tick_average_moves_toward_latest() {
        let mut stats = PipelineStats::default();
        stats.record(&summary(Vec::new()), 1000);
        assert_eq!(stats.avg_tick_us, 1000.0);
        stats.record(&summary(Vec::new()), 2000);
        assert!((stats.avg_tick_us - 1100.0).abs() < 1e-9);
        assert_eq!(stats.last_tick_us, 2000);
    }
}
