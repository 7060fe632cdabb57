//! Audio frames flowing alongside video.

use crate::time::RationalTime;
use serde::{Deserialize, Serialize};

/// Sample rate and channel count of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// A block of interleaved `f32` samples.
///
/// `pts` counts samples at `format.sample_rate` since the start of the stream.
/// Frames are not modified once they leave the filter that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub pts: i64,
    pub samples: Vec<f32>,
    pub muted: bool,
}

impl AudioFrame {
    pub fn new(format: AudioFormat, pts: i64, samples: Vec<f32>) -> Self {
        Self {
            format,
            pts,
            samples,
            muted: false,
        }
    }

    /// A silent frame of `nb_samples` samples per channel.
    pub fn silence(format: AudioFormat, pts: i64, nb_samples: usize) -> Self {
        Self {
            format,
            pts,
            samples: vec![0.0; nb_samples * format.channels as usize],
            muted: false,
        }
    }

    /// Samples per channel.
    pub fn nb_samples(&self) -> usize {
        if self.format.channels == 0 {
            0
        } else {
            self.samples.len() / self.format.channels as usize
        }
    }

    pub fn pts_time(&self) -> RationalTime {
        RationalTime::from_samples(self.pts, self.format.sample_rate)
    }

    pub fn pts_seconds(&self) -> f64 {
        self.pts_time().to_seconds_f64()
    }

    /// Peak absolute sample value, zero when muted.
    pub fn peak(&self) -> f32 {
        if self.muted {
            return 0.0;
        }
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}
