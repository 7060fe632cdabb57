//! Host-side packed frames in device wire formats.

use crate::error::{Result, StageError};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Wire pixel formats understood by the packers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 10-bit 4:2:2, six pixels per 16 bytes (SDI native)
    #[default]
    V210,
    /// 8-bit 4:2:2 packed U Y0 V Y1
    Uyvy422,
    /// 10-bit 4:2:2 planar, little-endian 16-bit containers
    Yuv422p10,
    /// 8-bit 4:2:0, Y plane then interleaved UV
    Nv12,
    /// 8-bit 4:2:0 planar
    Yuv420p,
    /// 10-bit 4:2:0 planar, little-endian 16-bit containers
    Yuv420p10,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit BGRA
    Bgra8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 8] = [
        Self::V210,
        Self::Uyvy422,
        Self::Yuv422p10,
        Self::Nv12,
        Self::Yuv420p,
        Self::Yuv420p10,
        Self::Rgba8,
        Self::Bgra8,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::V210 => "v210",
            Self::Uyvy422 => "uyvy422",
            Self::Yuv422p10 => "yuv422p10",
            Self::Nv12 => "nv12",
            Self::Yuv420p => "yuv420p",
            Self::Yuv420p10 => "yuv420p10",
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
        }
    }

    /// Number of planes for this format.
    pub fn plane_count(self) -> usize {
        match self {
            Self::V210 | Self::Uyvy422 | Self::Rgba8 | Self::Bgra8 => 1,
            Self::Nv12 => 2,
            Self::Yuv422p10 | Self::Yuv420p | Self::Yuv420p10 => 3,
        }
    }

    pub fn is_rgb(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Bgra8)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StageError::UnsupportedFormat(s.to_string()))
    }
}

/// One plane of packed pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlane {
    pub data: Vec<u8>,
    /// Bytes per row, including any padding.
    pub pitch: usize,
    /// Number of rows.
    pub rows: usize,
}

impl FramePlane {
    /// A zeroed plane.
    pub fn new(pitch: usize, rows: usize) -> Self {
        Self {
            data: vec![0u8; pitch * rows],
            pitch,
            rows,
        }
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.pitch..(y + 1) * self.pitch]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        &mut self.data[y * self.pitch..(y + 1) * self.pitch]
    }
}

/// A frame in a wire pixel format, in host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
    pub planes: SmallVec<[FramePlane; 3]>,
}

impl PackedFrame {
    /// Total memory usage of this frame in bytes.
    pub fn memory_size(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for fmt in PixelFormat::ALL {
            assert_eq!(fmt.name().parse::<PixelFormat>().unwrap(), fmt);
        }
        assert_eq!("V210".parse::<PixelFormat>().unwrap(), PixelFormat::V210);
        assert!("yuv444p16".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::V210.plane_count(), 1);
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::Yuv420p10.plane_count(), 3);
    }

    #[test]
    fn test_plane_rows() {
        let mut plane = FramePlane::new(16, 4);
        plane.row_mut(2)[3] = 9;
        assert_eq!(plane.row(2)[3], 9);
        assert_eq!(plane.data[2 * 16 + 3], 9);
    }
}
