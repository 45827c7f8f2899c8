//! Pixel layouts carried by incoming frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// In-memory pixel layout of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Interleaved 8-bit B, G, R.
    Bgr24,

    /// Y plane followed by interleaved U/V at quarter resolution.
    Nv12,

    /// Y plane followed by interleaved V/U at quarter resolution.
    Nv21,

    /// Any layout the encoder engine cannot take directly.
    Other(String),
}

impl PixelFormat {
    /// Number of plane buffers a frame of this format carries.
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Bgr24 => 1,
            Self::Nv12 | Self::Nv21 => 2,
            Self::Other(_) => 0,
        }
    }

    /// Expected size of each plane for the given dimensions.
    ///
    /// Returns an empty list for formats with unknown geometry.
    pub fn plane_sizes(&self, width: u32, height: u32) -> Vec<usize> {
        let luma = width as usize * height as usize;
        match self {
            Self::Bgr24 => vec![luma * 3],
            // NV12/NV21: Y plane (width * height) + chroma plane (width * height / 2)
            Self::Nv12 | Self::Nv21 => vec![luma, luma / 2],
            Self::Other(_) => Vec::new(),
        }
    }

    /// Total buffer size for the given dimensions.
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        self.plane_sizes(width, height).iter().sum()
    }

    /// Returns true for layouts with a known geometry.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Bgr24 => "BGR24",
            Self::Nv12 => "NV12",
            Self::Nv21 => "NV21",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_plane_sizes() {
        assert_eq!(PixelFormat::Nv12.plane_sizes(1920, 1080), vec![2_073_600, 1_036_800]);
        assert_eq!(PixelFormat::Nv21.buffer_size(4, 2), 12);
    }

    #[test]
    fn test_bgr_single_plane() {
        assert_eq!(PixelFormat::Bgr24.plane_count(), 1);
        assert_eq!(PixelFormat::Bgr24.buffer_size(4, 2), 24);
    }

    #[test]
    fn test_other_has_no_geometry() {
        let format = PixelFormat::Other("I420".into());
        assert!(!format.is_known());
        assert!(format.plane_sizes(16, 16).is_empty());
        assert_eq!(format.to_string(), "I420");
    }
}
