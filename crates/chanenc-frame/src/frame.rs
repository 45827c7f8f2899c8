//! Decoded frame types.

use bytes::Bytes;

use crate::error::FrameError;
use crate::format::PixelFormat;
use crate::{ChannelId, FrameResult};

/// Frame flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u32);

impl FrameFlags {
    /// Final unit of a channel's sequence.
    pub const EOS: FrameFlags = FrameFlags(1 << 0);

    /// No flags set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bit value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit in `other` is set.
    pub fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits in `other`.
    pub fn insert(&mut self, other: FrameFlags) {
        self.0 |= other.0;
    }
}

/// One plane buffer of a frame.
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes, shared with the upstream producer.
    pub data: Bytes,
}

impl Plane {
    /// Wrap plane bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Size of the plane in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the plane holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Row-major interleaved BGR image materialized by an upstream converter.
#[derive(Debug, Clone)]
pub struct BgrMatrix {
    /// Pixel bytes, `stride * height` long.
    pub data: Bytes,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Bytes per row.
    pub stride: usize,
}

impl BgrMatrix {
    /// Create a tightly packed matrix (`stride = width * 3`).
    pub fn packed(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            stride: width as usize * 3,
        }
    }

    /// Borrow the pixel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A decoded video frame routed to the encode module.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Logical channel the frame belongs to.
    pub channel_id: ChannelId,

    /// Pixel layout of `planes`.
    pub format: PixelFormat,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Presentation timestamp in the pipeline time base.
    pub timestamp: i64,

    /// Plane buffers in plane order.
    pub planes: Vec<Plane>,

    /// Interleaved BGR rendition produced upstream, if any.
    pub bgr: Option<BgrMatrix>,

    /// Frame flags.
    pub flags: FrameFlags,
}

impl Frame {
    /// Create a frame from plane buffers.
    pub fn new(
        channel_id: ChannelId,
        format: PixelFormat,
        width: u32,
        height: u32,
        timestamp: i64,
        planes: Vec<Plane>,
    ) -> Self {
        Self {
            channel_id,
            format,
            width,
            height,
            timestamp,
            planes,
            bgr: None,
            flags: FrameFlags::empty(),
        }
    }

    /// Create a frame and check its planes against the format geometry.
    pub fn validated(
        channel_id: ChannelId,
        format: PixelFormat,
        width: u32,
        height: u32,
        timestamp: i64,
        planes: Vec<Plane>,
    ) -> FrameResult<Self> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidDimensions { width, height });
        }

        if format.is_known() {
            let expected = format.plane_sizes(width, height);
            if planes.len() != expected.len() {
                return Err(FrameError::PlaneCount {
                    format: format.to_string(),
                    expected: expected.len(),
                    actual: planes.len(),
                });
            }
            for (index, (plane, &size)) in planes.iter().zip(&expected).enumerate() {
                if plane.len() < size {
                    return Err(FrameError::PlaneSize {
                        index,
                        expected: size,
                        actual: plane.len(),
                    });
                }
            }
        }

        Ok(Self::new(channel_id, format, width, height, timestamp, planes))
    }

    /// End-of-stream marker for a channel. Carries no pixels.
    pub fn eos(channel_id: ChannelId, timestamp: i64) -> Self {
        let mut frame = Self::new(
            channel_id,
            PixelFormat::Other("none".into()),
            0,
            0,
            timestamp,
            Vec::new(),
        );
        frame.flags.insert(FrameFlags::EOS);
        frame
    }

    /// Attach an upstream BGR rendition.
    pub fn with_bgr(mut self, matrix: BgrMatrix) -> Self {
        self.bgr = Some(matrix);
        self
    }

    /// Returns true if this frame ends its channel.
    pub fn is_eos(&self) -> bool {
        self.flags.contains(FrameFlags::EOS)
    }

    /// Size of one plane, zero if the plane is absent.
    pub fn plane_bytes(&self, index: usize) -> usize {
        self.planes.get(index).map_or(0, Plane::len)
    }

    /// Total size of all planes.
    pub fn bytes(&self) -> usize {
        self.planes.iter().map(Plane::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_planes(width: u32, height: u32) -> Vec<Plane> {
        let luma = (width * height) as usize;
        vec![Plane::new(vec![16u8; luma]), Plane::new(vec![128u8; luma / 2])]
    }

    #[test]
    fn test_eos_frame() {
        let frame = Frame::eos(3, 900);
        assert!(frame.is_eos());
        assert_eq!(frame.channel_id, 3);
        assert_eq!(frame.bytes(), 0);
    }

    #[test]
    fn test_plane_bytes() {
        let frame = Frame::new(0, PixelFormat::Nv12, 4, 4, 0, nv12_planes(4, 4));
        assert_eq!(frame.plane_bytes(0), 16);
        assert_eq!(frame.plane_bytes(1), 8);
        assert_eq!(frame.plane_bytes(2), 0);
        assert_eq!(frame.bytes(), 24);
        assert!(!frame.is_eos());
    }

    #[test]
    fn test_validated_rejects_short_plane() {
        let planes = vec![Plane::new(vec![0u8; 16]), Plane::new(vec![0u8; 4])];
        let err = Frame::validated(0, PixelFormat::Nv12, 4, 4, 0, planes).unwrap_err();
        assert!(matches!(err, FrameError::PlaneSize { index: 1, expected: 8, actual: 4 }));
    }

    #[test]
    fn test_validated_rejects_plane_count() {
        let err = Frame::validated(0, PixelFormat::Bgr24, 4, 4, 0, nv12_planes(4, 4)).unwrap_err();
        assert!(matches!(err, FrameError::PlaneCount { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn test_validated_accepts_unknown_geometry() {
        let planes = vec![Plane::new(vec![0u8; 3])];
        let frame = Frame::validated(1, PixelFormat::Other("I420".into()), 2, 2, 0, planes);
        assert!(frame.is_ok());
    }

    #[test]
    fn test_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.contains(FrameFlags::EOS));
        flags.insert(FrameFlags::EOS);
        assert!(flags.contains(FrameFlags::EOS));
        assert_eq!(flags.bits(), 1);
    }
}
