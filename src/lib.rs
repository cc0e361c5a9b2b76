//! facewarp - per-frame video segmentation into face textures
//!
//! Each tick takes one video frame, optionally corrects lens distortion,
//! and cuts out five face regions (front, back, left, right, floor), either
//! as rectangle crops or perspective-rectified quads. The results are kept
//! as fixed-size RGBA channels that a renderer polls.

pub mod capture;
pub mod config;
pub mod distortion;
pub mod error;
pub mod faces;
pub mod homography;
pub mod output;
pub mod resample;
pub mod segmenter;
pub mod server;
pub mod stats;
pub mod warp;

pub use error::{SegmentError, SegmentResult};
pub use faces::{FaceId, Quad};
pub use segmenter::{ChannelStore, FrameSegmenter, SegmenterControl, TickReport};
