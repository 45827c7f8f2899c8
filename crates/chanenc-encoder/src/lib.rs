//! Encoder engine contract and per-channel encoder sessions.
//!
//! An [`EncoderEngine`] is the opaque collaborator that turns pixel payloads
//! into a compressed stream. An [`EncoderSession`] owns one engine for one
//! channel and enforces the open/update/flush/close lifecycle around it.

mod error;
mod raw;
mod session;
mod sink;
#[cfg(feature = "x264")]
mod x264_engine;

pub use error::EncoderError;
pub use raw::{RawEngine, RawEngineFactory};
pub use session::{EncoderSession, SessionState};
pub use sink::{packet_channel, PacketSink};
#[cfg(feature = "x264")]
pub use x264_engine::{X264Engine, X264EngineFactory};

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Channel capacity for encoded packets.
pub const ENCODED_CHANNEL_CAPACITY: usize = 64;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Pixel formats the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFormat {
    Bgr24,
    Nv12,
    Nv21,
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bgr24 => "BGR24",
            Self::Nv12 => "NV12",
            Self::Nv21 => "NV21",
        };
        f.write_str(name)
    }
}

/// Output codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    #[default]
    H264,

    /// Unencoded payloads, one packet per frame.
    Raw,
}

/// How frames are shaped before they reach the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreprocessMode {
    /// Interleaved pixel matrix materialized upstream.
    #[default]
    Matrix,

    /// Plane buffers concatenated into one contiguous buffer.
    RawPlanar,

    /// Unrecognized mode token. Frames are dropped.
    Unknown,
}

/// Parameters an engine is opened with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// Channel the engine encodes.
    pub channel_id: u32,

    /// Source width in pixels.
    pub src_width: u32,

    /// Source height in pixels.
    pub src_height: u32,

    /// Output width in pixels.
    pub dst_width: u32,

    /// Output height in pixels.
    pub dst_height: u32,

    /// Frames per second.
    pub frame_rate: u32,

    /// Pixel format of submitted payloads.
    pub format: TargetFormat,

    /// Target bit rate in bytes per second.
    pub bit_rate: u32,

    /// Frames between key frames.
    pub gop_size: u32,

    /// Output codec.
    pub codec: Codec,

    /// Accelerator index.
    pub device_id: i32,

    /// Payload shaping mode.
    pub preprocess: PreprocessMode,
}

impl EngineParams {
    /// Layout of the payloads the engine will receive.
    ///
    /// Matrix mode always delivers interleaved BGR; the stream format is
    /// still `format`.
    pub fn input_format(&self) -> TargetFormat {
        match self.preprocess {
            PreprocessMode::Matrix => TargetFormat::Bgr24,
            PreprocessMode::RawPlanar | PreprocessMode::Unknown => self.format,
        }
    }

    /// Bytes in one payload at the source dimensions.
    pub fn input_frame_size(&self) -> usize {
        let luma = self.src_width as usize * self.src_height as usize;
        match self.input_format() {
            TargetFormat::Bgr24 => luma * 3,
            TargetFormat::Nv12 | TargetFormat::Nv21 => luma + luma / 2,
        }
    }
}

/// An encoded packet for one channel.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Channel the packet belongs to.
    pub channel_id: u32,

    /// Encoded data. Empty for the end-of-stream marker.
    pub data: Bytes,

    /// Presentation timestamp.
    pub pts: i64,

    /// Decode timestamp.
    pub dts: i64,

    /// Whether this is a keyframe.
    pub is_keyframe: bool,

    /// Last packet of the channel's stream.
    pub end_of_stream: bool,
}

impl EncodedPacket {
    /// End-of-stream marker for a channel.
    pub fn eos(channel_id: u32, pts: i64) -> Self {
        Self {
            channel_id,
            data: Bytes::new(),
            pts,
            dts: pts,
            is_keyframe: false,
            end_of_stream: true,
        }
    }
}

/// The encoding engine behind one session.
pub trait EncoderEngine: Send {
    /// Submit one frame's payload.
    fn update(&mut self, payload: &[u8], timestamp: i64) -> EncoderResult<()>;

    /// Signal end of stream and drain buffered output.
    fn flush(&mut self) -> EncoderResult<()>;

    /// Release engine resources.
    fn close(&mut self) -> EncoderResult<()>;

    /// Get engine name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Opens engines for new sessions.
pub trait EngineFactory: Send + Sync {
    /// Allocate an engine bound to the given parameters.
    fn open(&self, params: &EngineParams) -> EncoderResult<Box<dyn EncoderEngine>>;
}

/// Create an engine factory for a codec.
#[cfg(feature = "x264")]
pub fn create_engine_factory(codec: Codec, sink: PacketSink) -> EncoderResult<Arc<dyn EngineFactory>> {
    match codec {
        Codec::H264 => {
            tracing::info!("Using x264 software engine");
            Ok(Arc::new(X264EngineFactory::new(sink)))
        }
        Codec::Raw => Ok(Arc::new(RawEngineFactory::new(sink))),
    }
}

/// Create an engine factory for a codec (raw only without the `x264` feature).
#[cfg(not(feature = "x264"))]
pub fn create_engine_factory(codec: Codec, sink: PacketSink) -> EncoderResult<Arc<dyn EngineFactory>> {
    match codec {
        Codec::H264 => Err(EncoderError::NotSupported(
            "H.264 encoding requires the x264 feature".into(),
        )),
        Codec::Raw => Ok(Arc::new(RawEngineFactory::new(sink))),
    }
}
