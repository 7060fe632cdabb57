//! Volume, pan and mute applied to one source's audio.

use serde::{Deserialize, Serialize};
use stagecast_core::AudioFrame;

/// Live gain settings for one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainStage {
    /// Linear gain, 1.0 is unity.
    pub volume: f32,
    /// -1.0 = full left, 0.0 = centre, 1.0 = full right.
    pub pan: f32,
    pub muted: bool,
}

impl Default for GainStage {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            muted: false,
        }
    }
}

impl GainStage {
    /// Left/right gain from volume and pan.
    ///
    /// Constant-power curve scaled to unity at centre, so a centred source
    /// passes unchanged and a hard-panned one keeps full level on its side.
    pub fn stereo_gain(&self) -> (f32, f32) {
        if self.muted {
            return (0.0, 0.0);
        }
        if self.pan == 0.0 {
            return (self.volume, self.volume);
        }
        let angle = (self.pan.clamp(-1.0, 1.0) + 1.0) * 0.25 * std::f32::consts::PI;
        let left = (std::f32::consts::SQRT_2 * angle.cos()).min(1.0);
        let right = (std::f32::consts::SQRT_2 * angle.sin()).min(1.0);
        (self.volume * left, self.volume * right.max(0.0))
    }

    /// Apply to every stereo pair of `frame`; a trailing odd channel gets
    /// the plain volume.
    pub fn apply(&self, frame: &mut AudioFrame) {
        if self.muted {
            frame.samples.iter_mut().for_each(|s| *s = 0.0);
            frame.muted = true;
            return;
        }
        frame.muted = false;
        let channels = frame.format.channels as usize;
        if channels == 0 {
            return;
        }
        let (gain_l, gain_r) = self.stereo_gain();
        for sample in frame.samples.chunks_exact_mut(channels) {
            for (c, s) in sample.iter_mut().enumerate() {
                let gain = if c % 2 == 1 {
                    gain_r
                } else if c + 1 < channels {
                    gain_l
                } else {
                    self.volume
                };
                *s *= gain;
            }
        }
    }
}
