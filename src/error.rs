//! Error kinds raised by the frame correction pipeline

/// Result alias for the correction core
pub type SegmentResult<T> = Result<T, SegmentError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    /// Not exactly four points, or the homography system is singular
    #[error("degenerate quad: {0}")]
    DegenerateQuad(String),

    /// Four points that are not in TL, TR, BR, BL order
    #[error("misordered quad: {0}")]
    MisorderedQuad(String),

    /// A derived or configured raster dimension is not positive
    #[error("invalid size {width}x{height}")]
    InvalidSize { width: i64, height: i64 },

    /// No frame is available for this tick
    #[error("source not ready: {0}")]
    SourceNotReady(String),

    /// A configuration value is out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl SegmentError {
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateQuad(msg.into())
    }

    pub fn misordered(msg: impl Into<String>) -> Self {
        Self::MisorderedQuad(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::SourceNotReady(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn invalid_size(width: impl Into<i64>, height: impl Into<i64>) -> Self {
        Self::InvalidSize {
            width: width.into(),
            height: height.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert!(SegmentError::degenerate("x").to_string().starts_with("degenerate quad:"));
        assert!(SegmentError::not_ready("paused").to_string().contains("paused"));
        assert_eq!(SegmentError::invalid_size(0, 12).to_string(), "invalid size 0x12");
    }
}
