//! Per-layer blending between the outgoing and incoming source.
//!
//! A transitioner holds at most two sources. With none it emits transparent
//! black and silence so the layer never underflows; with one it passes that
//! source through; with two it blends them for the configured number of
//! ticks, then drops the outgoing side and reports [`TransitionEvent::TransitionEnd`].

use crate::context::ChannelContext;
use crate::pipe::{AudioReceiver, Packet, VideoReceiver};
use crossbeam_channel::{unbounded, Receiver, Sender};
use stagecast_audio::AMix;
use stagecast_core::limits::AV_SYNC_TOLERANCE;
use stagecast_core::{AudioFrame, Result};
use stagecast_effects::{release_all, ImageProcess, Mix, MixParams, Transition, TransitionParams, TransitionType};
use stagecast_gpu::{BufferDesc, BufferGuard, ImageBuffer, JobKey};
use tracing::{debug, trace, warn};

/// Channel-format audio and video of one mixed source.
pub struct TransitionSource {
    pub id: String,
    pub audio: AudioReceiver,
    pub video: VideoReceiver,
}

impl std::fmt::Debug for TransitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionSource").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// The blend finished and `source_id` is no longer shown.
    TransitionEnd { source_id: String },
    /// The last source ended on its own; the layer shows black.
    AllEnd,
}

/// One tick of a layer.
#[derive(Debug)]
pub struct LayerFrame {
    pub video: ImageBuffer,
    pub audio: AudioFrame,
    /// Weight of the outgoing source while a transition runs.
    pub mix: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    kind: TransitionType,
    frames: u32,
    index: u32,
}

type Pulled = (ImageBuffer, Option<AudioFrame>);

pub struct Transitioner {
    ctx: ChannelContext,
    key_source: String,
    outgoing: Option<TransitionSource>,
    current: Option<TransitionSource>,
    progress: Option<Progress>,
    mix: Mix,
    wipe: Transition,
    amix: AMix,
    events: Sender<TransitionEvent>,
    /// AllEnd goes out once per run of sources.
    live: bool,
}

impl Transitioner {
    pub fn new(ctx: &ChannelContext, layer: u32) -> (Self, Receiver<TransitionEvent>) {
        let (events, rx) = unbounded();
        let transitioner = Self {
            ctx: ctx.clone(),
            key_source: format!("{}/transition", ctx.layer_source(layer)),
            outgoing: None,
            current: None,
            progress: None,
            mix: Mix::new(),
            wipe: Transition::new(),
            amix: AMix::new(ctx.audio_format(), 0),
            events,
            live: false,
        };
        (transitioner, rx)
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.id.as_str())
    }

    pub fn is_transitioning(&self) -> bool {
        self.progress.is_some()
    }

    /// Start showing `incoming`, blending away from the current source over
    /// `frames` ticks. A cut, or zero frames, switches immediately.
    pub fn update(&mut self, kind: TransitionType, frames: u32, incoming: TransitionSource) {
        if let Some(stale) = self.outgoing.take() {
            // a new transition cuts the running one short
            self.finish(stale);
        }
        debug!(
            layer = %self.key_source,
            incoming = %incoming.id,
            outgoing = ?self.current_id(),
            ?kind,
            frames,
            "transition"
        );
        let previous = self.current.replace(incoming);
        self.live = true;
        self.progress = None;
        match previous {
            Some(outgoing) if kind != TransitionType::Cut && frames > 0 => {
                self.outgoing = Some(outgoing);
                self.progress = Some(Progress {
                    kind,
                    frames,
                    index: 0,
                });
            }
            Some(outgoing) => self.finish(outgoing),
            None => {}
        }
    }

    /// Remove every source without events. The layer shows black from the
    /// next tick.
    pub fn take_sources(&mut self) -> Vec<TransitionSource> {
        self.progress = None;
        self.live = false;
        self.amix.set_inputs(0);
        self.outgoing.take().into_iter().chain(self.current.take()).collect()
    }

    fn finish(&mut self, outgoing: TransitionSource) {
        self.progress = None;
        self.amix.set_inputs(0);
        debug!(layer = %self.key_source, source_id = %outgoing.id, "transition end");
        let _ = self.events.send(TransitionEvent::TransitionEnd {
            source_id: outgoing.id.clone(),
        });
    }

    async fn pull(source: &mut TransitionSource) -> Option<Pulled> {
        let video = match source.video.recv().await {
            Packet::Data(video) => video,
            Packet::End => return None,
        };
        let audio = match source.audio.recv().await {
            Packet::Data(audio) => Some(audio),
            Packet::End => None,
        };
        Some((video, audio))
    }

    /// Next frame of the current source. An ended source gives way to the
    /// outgoing one when a transition was still running.
    async fn pull_current(&mut self) -> Option<Pulled> {
        loop {
            let source = self.current.as_mut()?;
            if let Some(pulled) = Self::pull(source).await {
                return Some(pulled);
            }
            debug!(layer = %self.key_source, source_id = %source.id, "source ended");
            self.current = self.outgoing.take();
            self.progress = None;
        }
    }

    async fn pull_outgoing(&mut self) -> Option<Pulled> {
        self.progress?;
        let source = self.outgoing.as_mut()?;
        match Self::pull(source).await {
            Some(pulled) => Some(pulled),
            None => {
                if let Some(outgoing) = self.outgoing.take() {
                    self.finish(outgoing);
                }
                None
            }
        }
    }

    fn check_sync(&self, video: &ImageBuffer, audio: &AudioFrame) {
        let video_time = self.ctx.tick_seconds(video.timestamp());
        let drift = (video_time - audio.pts_seconds()).abs();
        if drift > AV_SYNC_TOLERANCE {
            warn!(
                layer = %self.key_source,
                video_ts = video.timestamp(),
                audio_pts = audio.pts,
                drift,
                "audio/video out of sync"
            );
        }
    }

    fn silence(&self, tick: i64) -> AudioFrame {
        let (pts, len) = self.ctx.tick_samples(tick);
        AudioFrame::silence(self.ctx.audio_format(), pts, len)
    }

    fn black(&self, tick: i64) -> Result<ImageBuffer> {
        self.ctx.device.create_buffer(BufferDesc::image(
            "black",
            self.ctx.format.width,
            self.ctx.format.height,
            tick,
        ))
    }

    /// Produce the layer's frame for channel tick `tick`.
    pub async fn tick(&mut self, tick: i64) -> Result<LayerFrame> {
        let current = self.pull_current().await;
        let outgoing = match current {
            Some(_) => self.pull_outgoing().await,
            None => None,
        };

        let frame = match (outgoing, current) {
            (Some(outgoing), Some(current)) => self.blend(tick, outgoing, current).await?,
            (None, Some((video, audio))) => {
                let audio = match audio {
                    Some(audio) => {
                        self.check_sync(&video, &audio);
                        audio
                    }
                    None => self.silence(tick),
                };
                LayerFrame {
                    video,
                    audio,
                    mix: None,
                }
            }
            (_, None) => {
                if self.live {
                    self.live = false;
                    debug!(layer = %self.key_source, "all sources ended");
                    let _ = self.events.send(TransitionEvent::AllEnd);
                }
                LayerFrame {
                    video: self.black(tick)?,
                    audio: self.silence(tick),
                    mix: None,
                }
            }
        };
        Ok(frame)
    }

    async fn blend(&mut self, tick: i64, outgoing: Pulled, current: Pulled) -> Result<LayerFrame> {
        let (out_video, out_audio) = outgoing;
        let (in_video, in_audio) = current;
        let Some(mut progress) = self.progress else {
            let _ = out_video.release();
            return self.tick_single(tick, in_video, in_audio);
        };

        let weight = 1.0 - progress.index as f32 / progress.frames as f32;
        let output = match self.black(tick) {
            Ok(output) => BufferGuard::new(output),
            Err(e) => {
                release_all(vec![out_video, in_video])();
                return Err(e);
            }
        };
        let key = JobKey::new(self.key_source.clone(), tick);
        let release = release_all(vec![out_video.clone(), in_video.clone()]);
        match progress.kind {
            TransitionType::Wipe => self.wipe.add_job(
                &self.ctx.queue,
                key.clone(),
                &TransitionParams {
                    inputs: vec![out_video, in_video.clone()],
                    output: output.clone(),
                    kind: TransitionType::Wipe,
                    progress: 1.0 - weight,
                    mask: None,
                },
                release,
            )?,
            _ => self.mix.add_job(
                &self.ctx.queue,
                key.clone(),
                &MixParams {
                    inputs: [out_video, in_video.clone()],
                    output: output.clone(),
                    mix: weight,
                },
                release,
            )?,
        }

        let in_audio = in_audio.unwrap_or_else(|| self.silence(tick));
        let out_audio = out_audio.unwrap_or_else(|| self.silence(tick));
        self.check_sync(&in_video, &in_audio);
        let audio = match self.amix.mix(&[out_audio, in_audio.clone()]) {
            Ok(Some(mut mixed)) => {
                mixed.pts = in_audio.pts;
                mixed
            }
            Ok(None) => in_audio,
            Err(e) => {
                warn!(layer = %self.key_source, error = %e, "transition audio not mixed");
                in_audio
            }
        };

        self.ctx.queue.run_queue(&key).await?;
        trace!(layer = %self.key_source, tick, index = progress.index, weight, "blended");

        progress.index += 1;
        self.progress = Some(progress);
        if progress.index >= progress.frames {
            if let Some(outgoing) = self.outgoing.take() {
                self.finish(outgoing);
            }
        }
        Ok(LayerFrame {
            video: output.into_inner(),
            audio,
            mix: Some(weight),
        })
    }

    fn tick_single(&self, tick: i64, video: ImageBuffer, audio: Option<AudioFrame>) -> Result<LayerFrame> {
        Ok(LayerFrame {
            video,
            audio: audio.unwrap_or_else(|| self.silence(tick)),
            mix: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipe::pipe;
    use stagecast_color::ColorSpace;
    use stagecast_core::{FrameRate, VideoFormat};
    use stagecast_gpu::{HostDevice, JobQueue};
    use std::sync::Arc;

    pub(crate) fn context() -> ChannelContext {
        let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
        ChannelContext::new(1, VideoFormat::progressive(4, 2, FrameRate::FPS_50), ColorSpace::Bt709, queue)
    }

    /// A source emitting `frames` solid frames, or endless when `None`.
    pub(crate) fn feed(ctx: &ChannelContext, id: &str, px: [f32; 4], frames: Option<i64>) -> TransitionSource {
        let (audio_tx, audio) = pipe(format!("{id}/audio"));
        let (video_tx, video) = pipe(format!("{id}/video"));
        let device = ctx.device.clone();
        let (w, h) = (ctx.format.width, ctx.format.height);
        let format = ctx.audio_format();
        let n = ctx.format.samples_per_tick() as usize;
        tokio::spawn(async move {
            let mut ts = 0i64;
            while frames.map_or(true, |limit| ts < limit) {
                let buf = device.create_buffer(BufferDesc::image("feed", w, h, ts)).unwrap();
                for chunk in buf.write().unwrap().chunks_exact_mut(4) {
                    chunk.copy_from_slice(&px);
                }
                if video_tx.send(buf).await.is_err() {
                    return;
                }
                if audio_tx.send(AudioFrame::new(format, ts * n as i64, vec![px[0]; n * 2])).await.is_err() {
                    return;
                }
                ts += 1;
            }
            video_tx.end().await;
            audio_tx.end().await;
        });
        TransitionSource {
            id: id.to_string(),
            audio,
            video,
        }
    }

    #[tokio::test]
    async fn test_idle_is_black_and_silent() {
        let ctx = context();
        let (mut transitioner, events) = Transitioner::new(&ctx, 1);
        let frame = transitioner.tick(7).await.unwrap();
        assert_eq!((frame.video.width(), frame.video.height()), (4, 2));
        assert!(frame.video.read().unwrap().iter().all(|v| *v == 0.0));
        assert_eq!(frame.audio.pts, 7 * 960);
        assert_eq!(frame.audio.nb_samples(), 960);
        assert!(events.try_recv().is_err());
        frame.video.release().unwrap();
    }

    #[tokio::test]
    async fn test_dissolve_runs_for_frame_count() {
        let ctx = context();
        let (mut transitioner, events) = Transitioner::new(&ctx, 1);
        transitioner.update(TransitionType::Cut, 0, feed(&ctx, "a", [1.0; 4], None));
        let first = transitioner.tick(0).await.unwrap();
        assert_eq!(first.mix, None);
        first.video.release().unwrap();

        transitioner.update(TransitionType::Dissolve, 10, feed(&ctx, "b", [0.0, 0.0, 0.0, 1.0], None));
        let mut mixes = Vec::new();
        for tick in 1..=10 {
            assert!(events.try_recv().is_err(), "early end at tick {tick}");
            let frame = transitioner.tick(tick).await.unwrap();
            let mix = frame.mix.unwrap();
            assert!((frame.video.read().unwrap()[0] - mix).abs() < 1e-5);
            mixes.push(mix);
            frame.video.release().unwrap();
        }
        assert_eq!(
            events.try_recv().unwrap(),
            TransitionEvent::TransitionEnd {
                source_id: "a".to_string()
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(mixes[0], 1.0);
        assert!((mixes[9] - 0.1).abs() < 1e-6);
        assert!(mixes.windows(2).all(|w| w[1] < w[0]));

        let after = transitioner.tick(11).await.unwrap();
        assert_eq!(after.mix, None);
        assert_eq!(after.video.read().unwrap()[0], 0.0);
        assert_eq!(transitioner.current_id(), Some("b"));
        after.video.release().unwrap();
    }

    #[tokio::test]
    async fn test_cut_switches_immediately() {
        let ctx = context();
        let (mut transitioner, events) = Transitioner::new(&ctx, 1);
        transitioner.update(TransitionType::Dissolve, 5, feed(&ctx, "a", [1.0; 4], None));
        // nothing to blend from
        assert!(!transitioner.is_transitioning());
        transitioner.update(TransitionType::Cut, 5, feed(&ctx, "b", [0.5; 4], None));
        assert_eq!(
            events.try_recv().unwrap(),
            TransitionEvent::TransitionEnd {
                source_id: "a".to_string()
            }
        );
        let frame = transitioner.tick(0).await.unwrap();
        assert_eq!(frame.video.read().unwrap()[0], 0.5);
        assert!((frame.audio.samples[0] - 0.5).abs() < 1e-6);
        frame.video.release().unwrap();
    }

    #[tokio::test]
    async fn test_wipe_reports_progress() {
        let ctx = context();
        let (mut transitioner, _events) = Transitioner::new(&ctx, 1);
        transitioner.update(TransitionType::Cut, 0, feed(&ctx, "a", [1.0; 4], None));
        transitioner.update(TransitionType::Wipe, 2, feed(&ctx, "b", [0.0, 0.0, 0.0, 1.0], None));
        let first = transitioner.tick(0).await.unwrap();
        // nothing wiped yet
        assert!(first.video.read().unwrap().chunks_exact(4).all(|px| px[0] == 1.0));
        first.video.release().unwrap();
        let second = transitioner.tick(1).await.unwrap();
        assert_eq!(second.mix, Some(0.5));
        {
            let px = second.video.read().unwrap();
            assert_eq!(px[0], 0.0);
            assert_eq!(px[3 * 4], 1.0);
        }
        second.video.release().unwrap();
    }

    #[tokio::test]
    async fn test_last_source_end_is_reported_once() {
        let ctx = context();
        let (mut transitioner, events) = Transitioner::new(&ctx, 1);
        transitioner.update(TransitionType::Cut, 0, feed(&ctx, "a", [1.0; 4], Some(2)));
        for tick in 0..4 {
            transitioner.tick(tick).await.unwrap().video.release().unwrap();
        }
        assert_eq!(events.try_recv().unwrap(), TransitionEvent::AllEnd);
        assert!(events.try_recv().is_err());
        assert_eq!(transitioner.current_id(), None);
    }
}
