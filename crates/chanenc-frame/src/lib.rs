//! Decoded frame types consumed by the per-channel encode module.
//!
//! Upstream decoders and converters hand the module one [`Frame`] at a time.
//! Each frame names its logical channel, its pixel layout and the plane
//! buffers that hold the pixels, plus an end-of-stream flag.

mod error;
mod format;
mod frame;

pub use error::FrameError;
pub use format::PixelFormat;
pub use frame::{BgrMatrix, Frame, FrameFlags, Plane};

/// Logical channel identifier.
pub type ChannelId = u32;

/// Result type for frame construction.
pub type FrameResult<T> = Result<T, FrameError>;
