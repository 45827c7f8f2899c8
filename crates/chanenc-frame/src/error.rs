//! Error types for frame construction.

use thiserror::Error;

/// Errors raised when a frame does not match its declared layout.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Wrong number of planes for the pixel format.
    #[error("{format} expects {expected} plane(s), got {actual}")]
    PlaneCount {
        format: String,
        expected: usize,
        actual: usize,
    },

    /// A plane is smaller than the dimensions require.
    #[error("plane {index} holds {actual} bytes, {expected} required")]
    PlaneSize {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Zero width or height.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}
