//! Pass-through engine emitting each payload as its own packet.

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::error::EncoderError;
use crate::{
    EncodedPacket, EncoderEngine, EncoderResult, EngineFactory, EngineParams, PacketSink,
};

/// Opens [`RawEngine`]s that share one packet sink.
pub struct RawEngineFactory {
    sink: PacketSink,
}

impl RawEngineFactory {
    /// Create a factory writing into `sink`.
    pub fn new(sink: PacketSink) -> Self {
        Self { sink }
    }
}

impl EngineFactory for RawEngineFactory {
    fn open(&self, params: &EngineParams) -> EncoderResult<Box<dyn EncoderEngine>> {
        Ok(Box::new(RawEngine::new(params, self.sink.clone())?))
    }
}

/// Unencoded engine: one packet per submitted frame.
///
/// Every `gop_size`-th packet is flagged as a key frame so downstream
/// consumers see the same cadence a real codec would produce.
pub struct RawEngine {
    channel_id: u32,
    frame_size: usize,
    gop_size: u64,
    frame_count: u64,
    last_pts: i64,
    sink: PacketSink,
    closed: bool,
}

impl RawEngine {
    /// Create a raw engine.
    #[instrument(name = "raw_new", skip_all, fields(channel = params.channel_id))]
    pub fn new(params: &EngineParams, sink: PacketSink) -> EncoderResult<Self> {
        if params.gop_size == 0 {
            return Err(EncoderError::Initialization("gop_size must be positive".into()));
        }

        let frame_size = params.input_frame_size();

        debug!(frame_size, input = %params.input_format(), "Initializing raw engine");

        Ok(Self {
            channel_id: params.channel_id,
            frame_size,
            gop_size: params.gop_size as u64,
            frame_count: 0,
            last_pts: 0,
            sink,
            closed: false,
        })
    }
}

impl EncoderEngine for RawEngine {
    fn update(&mut self, payload: &[u8], timestamp: i64) -> EncoderResult<()> {
        if self.closed {
            return Err(EncoderError::Encoding("engine closed".into()));
        }
        if payload.len() < self.frame_size {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {} bytes, got {}",
                self.frame_size,
                payload.len()
            )));
        }

        trace!(frame = self.frame_count, pts = timestamp, "Packing frame");

        let packet = EncodedPacket {
            channel_id: self.channel_id,
            data: Bytes::copy_from_slice(&payload[..self.frame_size]),
            pts: timestamp,
            dts: timestamp,
            is_keyframe: self.frame_count % self.gop_size == 0,
            end_of_stream: false,
        };
        self.sink.emit(packet)?;

        self.frame_count += 1;
        self.last_pts = timestamp;
        Ok(())
    }

    fn flush(&mut self) -> EncoderResult<()> {
        debug!(channel = self.channel_id, frames = self.frame_count, "Flushing raw engine");
        self.sink.emit(EncodedPacket::eos(self.channel_id, self.last_pts))
    }

    fn close(&mut self) -> EncoderResult<()> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "raw"
    }
}
