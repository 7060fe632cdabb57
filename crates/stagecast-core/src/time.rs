//! Time representation for frame-accurate scheduling.
//!
//! Timestamps travel through the pipeline as integer counts of frames (or
//! fields) at some rate. Rates are rationals so that rescaling between a
//! producer's native rate and the channel rate never accumulates error.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A rational time value in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RationalTime {
    value: Rational64,
}

impl RationalTime {
    /// Time of frame `frames` at the given rate.
    #[inline]
    pub fn from_frames(frames: i64, rate: FrameRate) -> Self {
        Self {
            value: Rational64::new(
                frames * rate.denominator as i64,
                rate.numerator as i64,
            ),
        }
    }

    /// Time of audio sample `samples` at the given sample rate.
    #[inline]
    pub fn from_samples(samples: i64, sample_rate: u32) -> Self {
        Self {
            value: Rational64::new(samples, sample_rate as i64),
        }
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn to_seconds_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    /// Frame index at the given rate, floored.
    #[inline]
    pub fn to_frames(self, rate: FrameRate) -> i64 {
        let frames =
            self.value * Rational64::new(rate.numerator as i64, rate.denominator as i64);
        frames.floor().to_integer()
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.to_seconds_f64())
    }
}

/// Frame (or field) rate as a rational number, e.g. 30000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Rate multiplied by an integer factor (fields per frame).
    #[inline]
    pub fn scaled(self, factor: u32) -> Self {
        Self::new(self.numerator * factor, self.denominator)
    }

    /// Rescale a timestamp counted at `self` into a count at `to`, floored.
    ///
    /// `rescale(ts, 25fps, 50fps) == 2 * ts`.
    pub fn rescale(self, ts: i64, to: FrameRate) -> i64 {
        RationalTime::from_frames(ts, self).to_frames(to)
    }

    /// Audio samples per frame at this rate, when it divides evenly.
    pub fn samples_per_frame(self, sample_rate: u32) -> Option<u32> {
        let samples = Rational64::new(
            sample_rate as i64 * self.denominator as i64,
            self.numerator as i64,
        );
        samples.is_integer().then(|| samples.to_integer() as u32)
    }

    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_50: Self = Self::new(50, 1);
    pub const FPS_59_94: Self = Self::new(60000, 1001);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_50
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_time_frames() {
        let rate = FrameRate::FPS_25;
        let time = RationalTime::from_frames(50, rate);
        assert_eq!(time.to_seconds_f64(), 2.0);
        assert_eq!(time.to_frames(rate), 50);
    }

    #[test]
    fn test_rescale_to_field_rate() {
        assert_eq!(FrameRate::FPS_25.rescale(7, FrameRate::FPS_50), 14);
        assert_eq!(FrameRate::FPS_50.rescale(7, FrameRate::FPS_25), 3);
        assert_eq!(FrameRate::FPS_29_97.rescale(30, FrameRate::FPS_59_94), 60);
    }

    #[test]
    fn test_samples_per_frame() {
        assert_eq!(FrameRate::FPS_50.samples_per_frame(48000), Some(960));
        assert_eq!(FrameRate::FPS_25.samples_per_frame(48000), Some(1920));
        assert_eq!(FrameRate::FPS_29_97.samples_per_frame(48000), None);
    }

    #[test]
    fn test_sample_time() {
        let t = RationalTime::from_samples(96000, 48000);
        assert_eq!(t.to_seconds_f64(), 2.0);
        assert_eq!(t.to_frames(FrameRate::FPS_50), 100);
        assert_eq!(t.to_string(), "2.000s");
    }
}
