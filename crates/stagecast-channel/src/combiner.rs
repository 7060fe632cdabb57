//! Composite of every layer on a channel.

use crate::context::ChannelContext;
use crate::layer::Layer;
use serde::{Deserialize, Serialize};
use stagecast_audio::AMix;
use stagecast_core::limits::MAX_LAYERS;
use stagecast_core::{AudioFrame, Result, StageError};
use stagecast_effects::{release_all, Combine, CombineParams, ImageProcess};
use stagecast_gpu::{BufferDesc, BufferGuard, ImageBuffer, JobKey};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Which layers reach the channel's audio output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCombinePolicy {
    /// Only the lowest-numbered layer is heard.
    #[default]
    FirstLayer,
    /// Every layer is summed and scaled by the layer count.
    MixAll,
}

/// Ordered layers plus the composite step over them.
pub struct Combiner {
    ctx: ChannelContext,
    layers: BTreeMap<u32, Layer>,
    combine: Combine,
    amix: AMix,
    policy: AudioCombinePolicy,
    warned_single: bool,
}

impl Combiner {
    pub fn new(ctx: &ChannelContext, policy: AudioCombinePolicy) -> Self {
        Self {
            ctx: ctx.clone(),
            layers: BTreeMap::new(),
            combine: Combine::new(),
            amix: AMix::new(ctx.audio_format(), 0),
            policy,
            warned_single: false,
        }
    }

    pub fn policy(&self) -> AudioCombinePolicy {
        self.policy
    }

    pub fn layer_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.layers.keys().copied()
    }

    pub fn layer(&self, index: u32) -> Option<&Layer> {
        self.layers.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut Layer> {
        self.layers.get_mut(&index)
    }

    /// The layer at `index`, created empty on first use.
    pub fn layer_mut(&mut self, index: u32) -> Result<&mut Layer> {
        if index > MAX_LAYERS {
            return Err(StageError::Config(format!("layer {index} is above {MAX_LAYERS}")));
        }
        if !self.layers.contains_key(&index) {
            self.set_layer(index, Layer::new(&self.ctx, index));
        }
        self.layers
            .get_mut(&index)
            .ok_or_else(|| StageError::Internal(format!("layer {index} missing after insert")))
    }

    /// Insert or replace a layer.
    pub fn set_layer(&mut self, index: u32, layer: Layer) {
        if self.layers.insert(index, layer).is_some() {
            debug!(channel = self.ctx.index, layer = index, "layer replaced");
        }
        self.update();
    }

    pub fn del_layer(&mut self, index: u32) -> bool {
        let removed = self.layers.remove(&index).is_some();
        if removed {
            self.update();
        }
        removed
    }

    pub fn clear_layers(&mut self) {
        self.layers.clear();
        self.update();
    }

    /// Drop layers left empty by a CLEAR or STOP.
    pub fn prune(&mut self) {
        let before = self.layers.len();
        self.layers.retain(|_, layer| !layer.is_empty());
        if self.layers.len() != before {
            self.update();
        }
    }

    fn update(&mut self) {
        let inputs = match self.policy {
            AudioCombinePolicy::FirstLayer => usize::from(!self.layers.is_empty()),
            AudioCombinePolicy::MixAll => self.layers.len(),
        };
        self.amix.set_inputs(inputs);
        if self.policy == AudioCombinePolicy::FirstLayer && self.layers.len() > 1 && !self.warned_single {
            warn!(
                channel = self.ctx.index,
                layers = self.layers.len(),
                "only the first layer's audio is combined"
            );
            self.warned_single = true;
        }
        debug!(channel = self.ctx.index, layers = self.layers.len(), "combiner updated");
    }

    fn silence(&self, tick: i64) -> AudioFrame {
        let (pts, len) = self.ctx.tick_samples(tick);
        AudioFrame::silence(self.ctx.audio_format(), pts, len)
    }

    /// Composite every layer for channel tick `tick`, bottom layer first.
    pub async fn tick(&mut self, tick: i64) -> Result<(ImageBuffer, AudioFrame)> {
        let mut videos = Vec::with_capacity(self.layers.len());
        let mut audios = Vec::with_capacity(self.layers.len());
        for layer in self.layers.values_mut() {
            match layer.tick(tick).await {
                Ok(frame) => {
                    videos.push(frame.video);
                    audios.push(frame.audio);
                }
                Err(e) => {
                    release_all(videos)();
                    return Err(e);
                }
            }
        }

        let (w, h) = (self.ctx.format.width, self.ctx.format.height);
        let output = match self.ctx.device.create_buffer(BufferDesc::image("combined", w, h, tick)) {
            Ok(output) => BufferGuard::new(output),
            Err(e) => {
                release_all(videos)();
                return Err(e);
            }
        };
        if !videos.is_empty() {
            let key = JobKey::new(format!("ch{}/combine", self.ctx.index), tick);
            let params = CombineParams {
                inputs: videos.clone(),
                output: output.clone(),
            };
            self.combine
                .add_job(&self.ctx.queue, key.clone(), &params, release_all(videos))?;
            self.ctx.queue.run_queue(&key).await?;
        }

        let audio = self.combine_audio(tick, audios)?;
        Ok((output.into_inner(), audio))
    }

    fn combine_audio(&mut self, tick: i64, audios: Vec<AudioFrame>) -> Result<AudioFrame> {
        let inputs: Vec<AudioFrame> = match self.policy {
            AudioCombinePolicy::FirstLayer => audios.into_iter().take(1).collect(),
            AudioCombinePolicy::MixAll => audios,
        };
        let (pts, _) = self.ctx.tick_samples(tick);
        let mut audio = match inputs.len() {
            0 => return Ok(self.silence(tick)),
            1 => inputs.into_iter().next().unwrap_or_else(|| self.silence(tick)),
            _ => self.amix.mix(&inputs)?.unwrap_or_else(|| self.silence(tick)),
        };
        audio.pts = pts;
        Ok(audio)
    }
}
