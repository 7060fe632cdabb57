//! Channel video formats.
//!
//! A [`VideoFormat`] defines a channel's canonical raster and audio layout.
//! Formats are looked up by name from a fixed table and never mutated.

use crate::error::{Result, StageError};
use crate::time::FrameRate;
use serde::{Deserialize, Serialize};

/// Immutable description of a channel raster and its audio layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub name: String,
    /// 1 for progressive, 2 for interlaced.
    pub fields: u32,
    pub width: u32,
    pub height: u32,
    /// Width of the display aspect in square pixels.
    pub square_width: u32,
    pub square_height: u32,
    /// Frames per second is `timescale / duration`.
    pub timescale: u32,
    pub duration: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
}

struct FormatEntry {
    name: &'static str,
    fields: u32,
    width: u32,
    height: u32,
    square_width: u32,
    square_height: u32,
    timescale: u32,
    duration: u32,
}

const FORMATS: &[FormatEntry] = &[
    FormatEntry { name: "PAL", fields: 2, width: 720, height: 576, square_width: 768, square_height: 576, timescale: 25, duration: 1 },
    FormatEntry { name: "NTSC", fields: 2, width: 720, height: 486, square_width: 720, square_height: 540, timescale: 30000, duration: 1001 },
    FormatEntry { name: "720p5000", fields: 1, width: 1280, height: 720, square_width: 1280, square_height: 720, timescale: 50, duration: 1 },
    FormatEntry { name: "1080i5000", fields: 2, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 25, duration: 1 },
    FormatEntry { name: "1080i5994", fields: 2, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 30000, duration: 1001 },
    FormatEntry { name: "1080p2500", fields: 1, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 25, duration: 1 },
    FormatEntry { name: "1080p2997", fields: 1, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 30000, duration: 1001 },
    FormatEntry { name: "1080p5000", fields: 1, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 50, duration: 1 },
    FormatEntry { name: "1080p6000", fields: 1, width: 1920, height: 1080, square_width: 1920, square_height: 1080, timescale: 60, duration: 1 },
    FormatEntry { name: "2160p5000", fields: 1, width: 3840, height: 2160, square_width: 3840, square_height: 2160, timescale: 50, duration: 1 },
];

/// Default audio layout for every channel format.
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_AUDIO_CHANNELS: u32 = 8;

impl VideoFormat {
    /// Look up a named format.
    pub fn lookup(name: &str) -> Result<Self> {
        FORMATS
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| Self {
                name: f.name.to_string(),
                fields: f.fields,
                width: f.width,
                height: f.height,
                square_width: f.square_width,
                square_height: f.square_height,
                timescale: f.timescale,
                duration: f.duration,
                audio_sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
                audio_channels: DEFAULT_AUDIO_CHANNELS,
            })
            .ok_or_else(|| StageError::NotFound(format!("video format '{name}'")))
    }

    /// All known format names, in table order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        FORMATS.iter().map(|f| f.name)
    }

    /// A custom progressive format, used by producers describing their
    /// native geometry.
    pub fn progressive(width: u32, height: u32, rate: FrameRate) -> Self {
        Self {
            name: format!("{width}x{height}p{}", rate),
            fields: 1,
            width,
            height,
            square_width: width,
            square_height: height,
            timescale: rate.numerator,
            duration: rate.denominator,
            audio_sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            audio_channels: 2,
        }
    }

    /// Whole frames per second.
    pub fn frame_rate(&self) -> FrameRate {
        FrameRate::new(self.timescale, self.duration)
    }

    /// Images per second flowing through the pipeline: the field rate for
    /// interlaced formats, the frame rate otherwise.
    pub fn tick_rate(&self) -> FrameRate {
        self.frame_rate().scaled(self.fields)
    }

    pub fn is_interlaced(&self) -> bool {
        self.fields == 2
    }

    /// Audio samples per channel for one pipeline tick, rounded down.
    pub fn samples_per_tick(&self) -> u32 {
        let rate = self.tick_rate();
        rate.samples_per_frame(self.audio_sample_rate).unwrap_or_else(|| {
            (self.audio_sample_rate as u64 * rate.denominator as u64 / rate.numerator as u64)
                as u32
        })
    }

    /// Pixel aspect ratio (width over height of one pixel).
    pub fn pixel_aspect(&self) -> f32 {
        (self.square_width as f32 / self.width as f32)
            / (self.square_height as f32 / self.height as f32)
    }

    /// Display aspect ratio of the whole raster.
    pub fn display_aspect(&self) -> f32 {
        self.square_width as f32 / self.square_height as f32
    }

    pub fn same_geometry(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_1080p5000() {
        let f = VideoFormat::lookup("1080p5000").unwrap();
        assert_eq!((f.width, f.height), (1920, 1080));
        assert_eq!(f.fields, 1);
        assert_eq!(f.tick_rate(), FrameRate::new(50, 1));
        assert_eq!(f.samples_per_tick(), 960);
        assert_eq!(f.audio_channels, 8);
    }

    #[test]
    fn test_interlaced_ticks_at_field_rate() {
        let f = VideoFormat::lookup("1080i5000").unwrap();
        assert!(f.is_interlaced());
        assert_eq!(f.tick_rate().to_fps_f64(), 50.0);
    }

    #[test]
    fn test_ntsc_samples_per_tick_rounds_down() {
        let f = VideoFormat::lookup("NTSC").unwrap();
        // 48000 / 59.94 = 800.8
        assert_eq!(f.samples_per_tick(), 800);
    }

    #[test]
    fn test_unknown_format() {
        assert!(matches!(
            VideoFormat::lookup("1080p9999"),
            Err(StageError::NotFound(_))
        ));
    }

    #[test]
    fn test_pal_pixel_aspect() {
        let f = VideoFormat::lookup("pal").unwrap();
        assert!((f.pixel_aspect() - 768.0 / 720.0).abs() < 1e-6);
        assert!((f.display_aspect() - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_json_field_names() {
        let f = VideoFormat::lookup("720p5000").unwrap();
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"squareWidth\":1280"));
        assert!(json.contains("\"audioSampleRate\":48000"));
    }
}
