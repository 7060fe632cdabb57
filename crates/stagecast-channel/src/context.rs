//! What every stage on a channel shares.

use stagecast_color::ColorSpace;
use stagecast_core::{AudioFormat, VideoFormat};
use stagecast_gpu::{ComputeDevice, JobQueue};
use std::sync::Arc;

/// Channel format, colourspace and the device handles, passed explicitly to
/// producers, mixers and consumers.
#[derive(Clone)]
pub struct ChannelContext {
    pub index: u32,
    pub format: VideoFormat,
    pub colour_space: ColorSpace,
    pub device: Arc<dyn ComputeDevice>,
    pub queue: JobQueue,
}

impl ChannelContext {
    pub fn new(index: u32, format: VideoFormat, colour_space: ColorSpace, queue: JobQueue) -> Self {
        Self {
            index,
            format,
            colour_space,
            device: queue.device().clone(),
            queue,
        }
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.format.audio_sample_rate, self.format.audio_channels)
    }

    /// Start and length, in samples, of the audio belonging to `tick`.
    /// Lengths vary by one where the tick rate does not divide the sample
    /// rate, so the audio clock never drifts from the video one.
    pub fn tick_samples(&self, tick: i64) -> (i64, usize) {
        let rate = self.format.tick_rate();
        let sample_rate = self.format.audio_sample_rate as i64;
        let at = |t: i64| t * sample_rate * rate.denominator as i64 / rate.numerator as i64;
        let start = at(tick);
        (start, (at(tick + 1) - start) as usize)
    }

    /// Seconds at the start of `tick`.
    pub fn tick_seconds(&self, tick: i64) -> f64 {
        let rate = self.format.tick_rate();
        tick as f64 * rate.denominator as f64 / rate.numerator as f64
    }

    /// Job key prefix for stages owned by `layer`.
    pub fn layer_source(&self, layer: u32) -> String {
        format!("ch{}-layer{layer}", self.index)
    }
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("index", &self.index)
            .field("format", &self.format.name)
            .field("colour_space", &self.colour_space)
            .field("device", &self.device.name())
            .finish()
    }
}
