//! Shapes incoming frames into what the encoder engine accepts.

use tracing::warn;

use chanenc_encoder::{PreprocessMode, TargetFormat};
use chanenc_frame::{Frame, PixelFormat};

use crate::error::AdaptError;

/// Map a frame's pixel format to an engine format.
///
/// Unsupported layouts keep `previous`, which is `None` when nothing has
/// been selected yet.
pub fn select_target_format(
    source: &PixelFormat,
    previous: Option<TargetFormat>,
) -> Option<TargetFormat> {
    match source {
        PixelFormat::Bgr24 => Some(TargetFormat::Bgr24),
        PixelFormat::Nv12 => Some(TargetFormat::Nv12),
        PixelFormat::Nv21 => Some(TargetFormat::Nv21),
        PixelFormat::Other(name) => {
            warn!(format = %name, previous = ?previous, "Unsupported pixel format");
            previous
        }
    }
}

/// Pixel bytes ready for the engine.
#[derive(Debug)]
pub enum Payload<'a> {
    /// Borrowed from the frame, no copy.
    Borrowed(&'a [u8]),

    /// Assembled for this call only.
    Owned(Vec<u8>),
}

impl Payload<'_> {
    /// Bytes handed to the engine.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Borrowed(bytes) => bytes,
            Self::Owned(buf) => buf,
        }
    }

    /// Returns true if the bytes were copied out of the frame.
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

/// Produces an engine payload from a frame.
pub trait PayloadAdapter: Send + Sync {
    /// Build the payload for one frame.
    fn prepare<'a>(&self, frame: &'a Frame) -> Result<Payload<'a>, AdaptError>;

    /// Mode this adapter implements.
    fn mode(&self) -> PreprocessMode;
}

/// Hands the upstream BGR matrix over by reference.
pub struct MatrixAdapter;

impl PayloadAdapter for MatrixAdapter {
    fn prepare<'a>(&self, frame: &'a Frame) -> Result<Payload<'a>, AdaptError> {
        if let Some(matrix) = &frame.bgr {
            return Ok(Payload::Borrowed(matrix.as_bytes()));
        }
        // A BGR24 frame already is an interleaved matrix
        match (&frame.format, frame.planes.first()) {
            (PixelFormat::Bgr24, Some(plane)) => Ok(Payload::Borrowed(&plane.data)),
            _ => Err(AdaptError::MissingMatrix),
        }
    }

    fn mode(&self) -> PreprocessMode {
        PreprocessMode::Matrix
    }
}

/// Concatenates plane buffers, in plane order, into one contiguous buffer.
pub struct PlanarAdapter;

impl PayloadAdapter for PlanarAdapter {
    fn prepare<'a>(&self, frame: &'a Frame) -> Result<Payload<'a>, AdaptError> {
        if frame.planes.is_empty() {
            return Err(AdaptError::MissingPlanes);
        }
        let mut buf = Vec::with_capacity(frame.bytes());
        for plane in &frame.planes {
            buf.extend_from_slice(&plane.data);
        }
        Ok(Payload::Owned(buf))
    }

    fn mode(&self) -> PreprocessMode {
        PreprocessMode::RawPlanar
    }
}

/// Adapter selected once from the configured mode.
pub struct FormatAdapter {
    inner: Option<Box<dyn PayloadAdapter>>,
    token: String,
}

impl FormatAdapter {
    /// Pick the adapter for `mode`. `token` is kept for diagnostics.
    pub fn for_mode(mode: PreprocessMode, token: &str) -> Self {
        let inner: Option<Box<dyn PayloadAdapter>> = match mode {
            PreprocessMode::Matrix => Some(Box::new(MatrixAdapter)),
            PreprocessMode::RawPlanar => Some(Box::new(PlanarAdapter)),
            PreprocessMode::Unknown => None,
        };
        Self {
            inner,
            token: token.to_string(),
        }
    }

    /// Configured mode.
    pub fn mode(&self) -> PreprocessMode {
        self.inner
            .as_ref()
            .map_or(PreprocessMode::Unknown, |adapter| adapter.mode())
    }

    /// Build the payload for a frame.
    pub fn prepare<'a>(&self, frame: &'a Frame) -> Result<Payload<'a>, AdaptError> {
        match &self.inner {
            Some(adapter) => adapter.prepare(frame),
            None => Err(AdaptError::UnknownMode(self.token.clone())),
        }
    }
}
