//! Synthetic frame source.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use chanenc_frame::{BgrMatrix, ChannelId, Frame, FrameResult, PixelFormat, Plane};

/// Channel capacity for generated frames.
pub const FRAME_CHANNEL_CAPACITY: usize = 3;

/// Shape of the generated stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamShape {
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    /// Timestamp step between frames.
    pub ts_step: i64,
}

/// Build one NV12 frame with a moving luma ramp and a BGR rendition.
pub fn make_frame(channel: ChannelId, index: u64, shape: &StreamShape) -> FrameResult<Frame> {
    let luma_len = (shape.width * shape.height) as usize;
    let shift = (index as usize + channel as usize * 17) % 256;
    let luma: Vec<u8> = (0..luma_len).map(|i| ((i + shift) % 256) as u8).collect();
    let chroma = vec![128u8; luma_len / 2];
    let bgr: Vec<u8> = luma.iter().flat_map(|&y| [y, y, y]).collect();

    let frame = Frame::validated(
        channel,
        PixelFormat::Nv12,
        shape.width,
        shape.height,
        index as i64 * shape.ts_step,
        vec![Plane::new(luma), Plane::new(chroma)],
    )?;
    Ok(frame.with_bgr(BgrMatrix::packed(bgr, shape.width, shape.height)))
}

/// Spawn a producer emitting `shape.frames` frames then an EOS marker.
pub fn spawn_source(channel: ChannelId, shape: StreamShape) -> (Receiver<Frame>, JoinHandle<()>) {
    let (tx, rx): (Sender<Frame>, Receiver<Frame>) =
        crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);

    let handle = thread::spawn(move || {
        for index in 0..shape.frames {
            let frame = match make_frame(channel, index, &shape) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(channel, "Cannot build frame: {}", e);
                    break;
                }
            };
            if tx.send(frame).is_err() {
                debug!(channel, "Frame receiver gone, stopping source");
                return;
            }
        }
        // Receiver may already be gone
        let _ = tx.send(Frame::eos(channel, shape.frames as i64 * shape.ts_step));
    });

    (rx, handle)
}
