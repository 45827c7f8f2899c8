//! x264 software engine.

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};

use crate::error::EncoderError;
use crate::{
    EncodedPacket, EncoderEngine, EncoderResult, EngineFactory, EngineParams, PacketSink,
    TargetFormat,
};

/// Opens [`X264Engine`]s that share one packet sink.
pub struct X264EngineFactory {
    sink: PacketSink,
}

impl X264EngineFactory {
    /// Create a factory writing into `sink`.
    pub fn new(sink: PacketSink) -> Self {
        Self { sink }
    }
}

impl EngineFactory for X264EngineFactory {
    fn open(&self, params: &EngineParams) -> EncoderResult<Box<dyn EncoderEngine>> {
        Ok(Box::new(X264Engine::new(params, self.sink.clone())?))
    }
}

/// x264 encoder for one channel.
///
/// Encodes at the source dimensions; scaling belongs to the upstream
/// converter.
pub struct X264Engine {
    encoder: Option<x264::Encoder>,
    channel_id: u32,
    width: u32,
    height: u32,
    /// Payload layout, BGR in matrix mode.
    format: TargetFormat,
    frame_count: u64,
    last_pts: i64,
    sink: PacketSink,
}

impl X264Engine {
    /// Create a new x264 engine.
    #[instrument(name = "x264_new", skip_all, fields(channel = params.channel_id))]
    pub fn new(params: &EngineParams, sink: PacketSink) -> EncoderResult<Self> {
        if (params.src_width, params.src_height) != (params.dst_width, params.dst_height) {
            warn!(
                src_width = params.src_width,
                src_height = params.src_height,
                dst_width = params.dst_width,
                dst_height = params.dst_height,
                "x264 engine does not scale; encoding at source size"
            );
        }

        // bit_rate is bytes/sec scaled by 1024; x264 takes kbps
        let bitrate_kbps = (params.bit_rate / 1024).max(1);

        debug!(
            width = params.src_width,
            height = params.src_height,
            fps = params.frame_rate,
            bitrate_kbps,
            gop = params.gop_size,
            "Initializing x264 encoder"
        );

        let setup = x264::Setup::preset(
            x264::Preset::Veryfast,
            x264::Tune::None,
            false, // fast_decode
            true,  // zero_latency
        )
        .fps(params.frame_rate, 1)
        .bitrate(bitrate_kbps as i32)
        .max_keyframe_interval(params.gop_size as i32)
        .scenecut_threshold(0)
        .high();

        let colorspace = match params.input_format() {
            TargetFormat::Bgr24 => x264::Colorspace::BGR,
            TargetFormat::Nv12 => x264::Colorspace::NV12,
            TargetFormat::Nv21 => x264::Colorspace::NV21,
        };

        let encoder = setup
            .build(colorspace, params.src_width as i32, params.src_height as i32)
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {:?}", e)))?;

        Ok(Self {
            encoder: Some(encoder),
            channel_id: params.channel_id,
            width: params.src_width,
            height: params.src_height,
            format: params.input_format(),
            frame_count: 0,
            last_pts: 0,
            sink,
        })
    }

    fn expected_size(&self) -> usize {
        let luma = self.width as usize * self.height as usize;
        match self.format {
            TargetFormat::Bgr24 => luma * 3,
            TargetFormat::Nv12 | TargetFormat::Nv21 => luma + luma / 2,
        }
    }
}

fn to_packet(channel_id: u32, data: &x264::Data, picture: &x264::Picture) -> EncodedPacket {
    EncodedPacket {
        channel_id,
        data: Bytes::from(data.entirety().to_vec()),
        pts: picture.pts(),
        dts: picture.dts(),
        is_keyframe: picture.keyframe(),
        end_of_stream: false,
    }
}

impl EncoderEngine for X264Engine {
    #[instrument(name = "x264_encode", skip(self, payload))]
    fn update(&mut self, payload: &[u8], timestamp: i64) -> EncoderResult<()> {
        let expected = self.expected_size();
        if payload.len() < expected {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {} bytes ({}x{} {}), got {}",
                expected,
                self.width,
                self.height,
                self.format,
                payload.len()
            )));
        }

        trace!(frame = self.frame_count, pts = timestamp, "Encoding frame");

        let width = self.width as i32;
        let height = self.height as i32;
        let luma = (self.width * self.height) as usize;

        let image = match self.format {
            TargetFormat::Bgr24 => x264::Image::new(
                x264::Colorspace::BGR,
                width,
                height,
                &[x264::Plane {
                    data: &payload[..expected],
                    stride: width * 3,
                }],
            ),
            TargetFormat::Nv12 | TargetFormat::Nv21 => {
                let colorspace = if self.format == TargetFormat::Nv12 {
                    x264::Colorspace::NV12
                } else {
                    x264::Colorspace::NV21
                };
                x264::Image::new(
                    colorspace,
                    width,
                    height,
                    &[
                        x264::Plane {
                            data: &payload[..luma],
                            stride: width,
                        },
                        x264::Plane {
                            data: &payload[luma..expected],
                            stride: width,
                        },
                    ],
                )
            }
        };

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::Encoding("Encoder has been flushed".to_string()))?;
        let (data, picture) = encoder
            .encode(timestamp, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {:?}", e)))?;

        self.frame_count += 1;
        self.last_pts = timestamp;

        // Empty output means the frame is buffered inside x264
        if data.len() == 0 {
            return Ok(());
        }

        let packet = to_packet(self.channel_id, &data, &picture);
        self.sink.emit(packet)
    }

    fn flush(&mut self) -> EncoderResult<()> {
        debug!(channel = self.channel_id, "Flushing x264 encoder");

        let encoder = match self.encoder.take() {
            Some(e) => e,
            None => return Ok(()),
        };
        let mut flush = encoder.flush();

        loop {
            match flush.next() {
                Some(Ok((data, picture))) => {
                    if data.len() > 0 {
                        let packet = to_packet(self.channel_id, &data, &picture);
                        self.sink.emit(packet)?;
                    }
                }
                Some(Err(e)) => {
                    debug!("Flush iteration ended: {:?}", e);
                    break;
                }
                None => break,
            }
        }

        self.sink.emit(EncodedPacket::eos(self.channel_id, self.last_pts))
    }

    fn close(&mut self) -> EncoderResult<()> {
        debug!(channel = self.channel_id, frames = self.frame_count, "Closing x264 encoder");
        self.encoder = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

// SAFETY: x264::Encoder uses raw pointers internally but is designed for
// single-threaded use. Each engine is owned by one session behind a mutex.
unsafe impl Send for X264Engine {}
