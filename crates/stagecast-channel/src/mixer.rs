//! Per-source conversion into the channel format.
//!
//! A mixer sits between a producer and its layer. Video is optionally
//! deinterlaced, then passed through, resized or transformed into the
//! channel raster once per channel tick the source frame covers: a 25p
//! source on a 50p channel shows each frame twice, a 60p source on a 50p
//! channel drops one frame in six. Audio is reformatted to the channel
//! layout and rate, re-cut into one block per emitted tick and gained.
//!
//! The layer-wide placement and gain live in a [`MixerControl`] shared with
//! every mixer on the layer; changes apply from the next emitted tick.

use crate::context::ChannelContext;
use crate::params::MixerCommand;
use crate::pipe::{pipe, AudioReceiver, AudioSender, Packet, VideoReceiver, VideoSender};
use crate::transitioner::TransitionSource;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use stagecast_audio::{GainStage, Reformat};
use stagecast_core::{AudioFormat, AudioFrame, FrameRate, Result, StageError, VideoFormat};
use stagecast_effects::{
    FieldOrder, ImageProcess, Resize, ResizeGeometry, ResizeParams, Transform, TransformJob, TransformParams, Yadif,
    YadifMode,
};
use stagecast_gpu::{BufferDesc, BufferGuard, ImageBuffer, JobKey};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Most ticks of audio a mixer queues before dropping the oldest.
const MAX_QUEUED_TICKS: usize = 8;

/// Placement and gain for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixerParams {
    pub anchor: [f32; 2],
    pub fill_translation: [f32; 2],
    pub fill_scale: [f32; 2],
    /// Degrees, clockwise.
    pub rotation: f32,
    pub gain: GainStage,
}

impl Default for MixerParams {
    fn default() -> Self {
        Self {
            anchor: [0.0, 0.0],
            fill_translation: [0.0, 0.0],
            fill_scale: [1.0, 1.0],
            rotation: 0.0,
            gain: GainStage::default(),
        }
    }
}

impl MixerParams {
    fn transform(&self, src_aspect: f32, dst_aspect: f32) -> TransformParams {
        TransformParams {
            anchor: self.anchor,
            fill_translation: self.fill_translation,
            fill_scale: self.fill_scale,
            rotation: self.rotation,
            src_aspect,
            dst_aspect,
        }
    }
}

/// Shared handle to a layer's [`MixerParams`].
#[derive(Debug, Clone, Default)]
pub struct MixerControl {
    params: Arc<Mutex<MixerParams>>,
}

impl MixerControl {
    pub fn params(&self) -> MixerParams {
        *self.params.lock()
    }

    pub fn set_anchor(&self, x: f32, y: f32) {
        self.params.lock().anchor = [x, y];
    }

    pub fn set_fill(&self, x: f32, y: f32, scale_x: f32, scale_y: f32) {
        let mut params = self.params.lock();
        params.fill_translation = [x, y];
        params.fill_scale = [scale_x, scale_y];
    }

    pub fn set_rotation(&self, degrees: f32) {
        self.params.lock().rotation = degrees;
    }

    pub fn set_volume(&self, volume: f32) {
        self.params.lock().gain.volume = volume;
    }

    pub fn set_muted(&self, muted: bool) {
        self.params.lock().gain.muted = muted;
    }

    pub fn apply(&self, command: MixerCommand) {
        match command {
            MixerCommand::Anchor { x, y } => self.set_anchor(x, y),
            MixerCommand::Fill {
                x,
                y,
                scale_x,
                scale_y,
            } => self.set_fill(x, y, scale_x, scale_y),
            MixerCommand::Rotation(degrees) => self.set_rotation(degrees),
            MixerCommand::Volume(volume) => self.set_volume(volume),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    PassThrough,
    Resize,
    Transform,
}

/// Converts one producer's output for one layer.
pub struct Mixer {
    source_id: String,
    ctx: ChannelContext,
    native: VideoFormat,
    /// Rate of the frames arriving at the tick mapping, after deinterlacing.
    source_rate: FrameRate,
    control: MixerControl,
    transform: Option<Transform>,
    resize: Resize,
    yadif: Option<Yadif>,
    reformat: Reformat,
    fifo: VecDeque<f32>,
    fifo_pts: Option<i64>,
    overflow_warned: bool,
}

impl Mixer {
    pub fn new(
        ctx: &ChannelContext,
        source_id: &str,
        native: &VideoFormat,
        audio: AudioFormat,
        control: MixerControl,
        deinterlace: Option<YadifMode>,
    ) -> Result<Self> {
        let deinterlace = deinterlace.filter(|_| native.is_interlaced() && !ctx.format.is_interlaced());
        let yadif = deinterlace.map(|mode| Yadif::new(ctx.device.clone(), mode, FieldOrder::TopFirst));
        let source_rate = match deinterlace {
            Some(mode) => native.frame_rate().scaled(mode.outputs_per_frame() as u32),
            None => native.frame_rate(),
        };
        let transform = Transform::new(
            ctx.device.clone(),
            control
                .params()
                .transform(native.display_aspect(), ctx.format.display_aspect()),
        )?;
        let reformat = Reformat::new(audio, ctx.audio_format())?;
        debug!(
            source_id,
            native = %native.name,
            channel = %ctx.format.name,
            %source_rate,
            deinterlace = ?deinterlace,
            "mixer ready"
        );
        Ok(Self {
            source_id: source_id.to_string(),
            ctx: ctx.clone(),
            native: native.clone(),
            source_rate,
            control,
            transform: Some(transform),
            resize: Resize::new(),
            yadif,
            reformat,
            fifo: VecDeque::new(),
            fifo_pts: None,
            overflow_warned: false,
        })
    }

    pub fn control(&self) -> &MixerControl {
        &self.control
    }

    /// Start converting. The returned source carries channel-format
    /// frames, one per tick, and ends once the producer's video ends.
    pub fn spawn(self, audio_in: Option<AudioReceiver>, video_in: VideoReceiver) -> (TransitionSource, JoinHandle<()>) {
        let (audio_tx, audio_rx) = pipe(format!("{}/mixer/audio", self.source_id));
        let (video_tx, video_rx) = pipe(format!("{}/mixer/video", self.source_id));
        let source = TransitionSource {
            id: self.source_id.clone(),
            audio: audio_rx,
            video: video_rx,
        };
        let task = tokio::spawn(self.run(audio_in, video_in, audio_tx, video_tx));
        (source, task)
    }

    async fn run(
        mut self,
        mut audio_in: Option<AudioReceiver>,
        mut video_in: VideoReceiver,
        audio_out: AudioSender,
        video_out: VideoSender,
    ) {
        let result = loop {
            let frame = match video_in.recv().await {
                Packet::Data(frame) => frame,
                Packet::End => break Ok(()),
            };
            // audio pairs positionally with video
            if let Some(rx) = audio_in.as_mut() {
                match rx.recv().await {
                    Packet::Data(audio) => self.push_audio(&audio),
                    Packet::End => {
                        debug!(source_id = %self.source_id, "audio ended before video");
                        audio_in = None;
                    }
                }
            }
            if let Err(e) = self.process(frame, &audio_out, &video_out).await {
                break Err(e);
            }
        };
        match result {
            Ok(()) => debug!(source_id = %self.source_id, "mixer input ended"),
            Err(StageError::Pipeline(reason)) => debug!(source_id = %self.source_id, %reason, "mixer output closed"),
            Err(e) => error!(source_id = %self.source_id, error = %e, "mixer stopped"),
        }
        self.finish();
        video_out.end().await;
        audio_out.end().await;
    }

    /// Release what the mixer holds. Runs once at end of stream.
    fn finish(&mut self) {
        for stage in ["yadif", "mixer"] {
            self.ctx.queue.clear_queue(&format!("{}/{stage}", self.source_id));
        }
        if let Some(mut yadif) = self.yadif.take() {
            yadif.flush();
        }
        self.transform = None;
        self.fifo.clear();
    }

    fn push_audio(&mut self, audio: &AudioFrame) {
        match self.reformat.process(audio) {
            Ok(frame) => {
                if self.fifo_pts.is_none() {
                    self.fifo_pts = Some(frame.pts);
                }
                if frame.muted {
                    self.fifo.resize(self.fifo.len() + frame.samples.len(), 0.0);
                } else {
                    self.fifo.extend(frame.samples.iter().copied());
                }
            }
            Err(e) => warn!(source_id = %self.source_id, error = %e, "audio frame dropped"),
        }
    }

    /// One channel-format audio block for `tick`, padded with silence when
    /// the source is short.
    fn next_audio(&mut self, tick: i64, gain: &GainStage) -> AudioFrame {
        let format = self.ctx.audio_format();
        let channels = format.channels as usize;
        let (tick_pts, len) = self.ctx.tick_samples(tick);
        let want = len * channels;

        let cap = want * MAX_QUEUED_TICKS;
        if self.fifo.len() > cap + want {
            let excess = (self.fifo.len() - cap) / channels * channels;
            self.fifo.drain(..excess);
            if let Some(pts) = self.fifo_pts.as_mut() {
                *pts += (excess / channels) as i64;
            }
            if !self.overflow_warned {
                warn!(source_id = %self.source_id, dropped = excess / channels, "audio backlog trimmed");
                self.overflow_warned = true;
            }
        }

        let pts = self.fifo_pts.unwrap_or(tick_pts);
        let take = want.min(self.fifo.len());
        let mut samples: Vec<f32> = self.fifo.drain(..take).collect();
        if take < want {
            trace!(source_id = %self.source_id, tick, missing = (want - take) / channels, "audio padded");
            samples.resize(want, 0.0);
        }
        self.fifo_pts = Some(pts + len as i64);

        let mut frame = AudioFrame::new(format, pts, samples);
        gain.apply(&mut frame);
        frame
    }

    fn route(&self, frame: &ImageBuffer, params: &TransformParams) -> Route {
        let same_geometry = frame.width() == self.ctx.format.width && frame.height() == self.ctx.format.height;
        match (params.is_identity(), same_geometry) {
            (true, true) => Route::PassThrough,
            (true, false) => Route::Resize,
            (false, _) => Route::Transform,
        }
    }

    async fn process(&mut self, frame: ImageBuffer, audio_out: &AudioSender, video_out: &VideoSender) -> Result<()> {
        let frames: SmallVec<[ImageBuffer; 2]> = match self.yadif.as_mut() {
            Some(yadif) => {
                let key = JobKey::new(format!("{}/yadif", self.source_id), frame.timestamp());
                let outputs = yadif.push(&self.ctx.queue, &key, frame)?;
                if outputs.is_empty() {
                    return Ok(());
                }
                let guards: SmallVec<[BufferGuard; 2]> = outputs.into_iter().map(BufferGuard::new).collect();
                self.ctx.queue.run_queue(&key).await?;
                guards.into_iter().map(BufferGuard::into_inner).collect()
            }
            None => smallvec![frame],
        };

        let mut frames = frames.into_iter();
        while let Some(frame) = frames.next() {
            if let Err(e) = self.emit(frame, audio_out, video_out).await {
                for rest in frames {
                    let _ = rest.release();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Emit `frame` for every channel tick it covers. Takes over the
    /// caller's reference.
    async fn emit(&mut self, frame: ImageBuffer, audio_out: &AudioSender, video_out: &VideoSender) -> Result<()> {
        let frame = BufferGuard::new(frame);
        let tick_rate = self.ctx.format.tick_rate();
        let n = frame.timestamp();
        let (start, end) = (
            self.source_rate.rescale(n, tick_rate),
            self.source_rate.rescale(n + 1, tick_rate),
        );
        if start >= end {
            trace!(source_id = %self.source_id, timestamp = n, "frame dropped by rate conversion");
            return Ok(());
        }

        let params = self.control.params();
        let transform = params.transform(self.native.display_aspect(), self.ctx.format.display_aspect());
        let route = self.route(&frame, &transform);

        if route == Route::PassThrough && end - start == 1 {
            let frame = frame.into_inner();
            frame.set_timestamp(start);
            video_out.send(frame).await?;
            let audio = self.next_audio(start, &params.gain);
            return audio_out.send(audio).await;
        }

        for tick in start..end {
            let output = self.render(&frame, tick, route, &transform).await?;
            video_out.send(output).await?;
            let audio = self.next_audio(tick, &params.gain);
            audio_out.send(audio).await?;
        }
        Ok(())
    }

    /// Convert `frame` into a new channel-raster buffer stamped `tick`.
    async fn render(
        &self,
        frame: &ImageBuffer,
        tick: i64,
        route: Route,
        params: &TransformParams,
    ) -> Result<ImageBuffer> {
        let (w, h) = (self.ctx.format.width, self.ctx.format.height);
        let output = BufferGuard::new(
            self.ctx
                .device
                .create_buffer(BufferDesc::image(self.source_id.clone(), w, h, tick))?,
        );
        let transform = match route {
            Route::Transform => Some(
                self.transform
                    .as_ref()
                    .ok_or_else(|| StageError::Pipeline(format!("{} mixer already finished", self.source_id)))?,
            ),
            _ => None,
        };
        frame.add_ref()?;
        let input = frame.clone();
        let release = move || {
            let _ = input.release();
        };
        let key = JobKey::new(format!("{}/mixer", self.source_id), tick);
        match transform {
            Some(transform) => {
                transform.set_params(*params);
                let job = TransformJob {
                    input: frame.clone(),
                    output: output.clone(),
                };
                transform.add_job(&self.ctx.queue, key.clone(), &job, release)?;
            }
            None => {
                let job = ResizeParams {
                    input: frame.clone(),
                    output: output.clone(),
                    geometry: ResizeGeometry::default(),
                };
                self.resize.add_job(&self.ctx.queue, key.clone(), &job, release)?;
            }
        }
        self.ctx.queue.run_queue(&key).await?;
        Ok(output.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecast_color::ColorSpace;
    use stagecast_gpu::{ComputeDevice, HostDevice, JobQueue, Kernel, KernelArgs};

    const AUDIO: AudioFormat = AudioFormat::new(48000, 2);

    fn context(w: u32, h: u32) -> ChannelContext {
        let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
        let mut format = VideoFormat::progressive(w, h, FrameRate::FPS_50);
        format.audio_channels = 2;
        ChannelContext::new(1, format, ColorSpace::Bt709, queue)
    }

    fn frame(device: &dyn ComputeDevice, w: u32, h: u32, ts: i64, px: [f32; 4]) -> ImageBuffer {
        let buf = device.create_buffer(BufferDesc::image("src", w, h, ts)).unwrap();
        for chunk in buf.write().unwrap().chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
        buf
    }

    async fn next_video(source: &mut TransitionSource) -> ImageBuffer {
        match source.video.recv().await {
            Packet::Data(frame) => frame,
            Packet::End => panic!("video ended"),
        }
    }

    async fn next_audio(source: &mut TransitionSource) -> AudioFrame {
        match source.audio.recv().await {
            Packet::Data(frame) => frame,
            Packet::End => panic!("audio ended"),
        }
    }

    #[tokio::test]
    async fn test_same_format_passes_through() {
        let ctx = context(8, 4);
        let native = ctx.format.clone();
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, MixerControl::default(), None).unwrap();
        let (audio_tx, audio_rx) = pipe("a");
        let (video_tx, video_rx) = pipe("v");
        let (mut source, _task) = mixer.spawn(Some(audio_rx), video_rx);

        let input = frame(ctx.device.as_ref(), 8, 4, 3, [0.5, 0.5, 0.5, 1.0]);
        video_tx.send(input.clone()).await.unwrap();
        audio_tx.send(AudioFrame::new(AUDIO, 2880, vec![0.25; 1920])).await.unwrap();

        let out = next_video(&mut source).await;
        assert!(out.same_buffer(&input));
        assert_eq!(out.timestamp(), 3);
        let audio = next_audio(&mut source).await;
        assert_eq!(audio.pts, 2880);
        assert_eq!(audio.nb_samples(), 960);
        assert!(audio.samples.iter().all(|s| *s == 0.25));
        out.release().unwrap();
    }

    #[tokio::test]
    async fn test_half_rate_source_repeats_frames() {
        let ctx = context(8, 4);
        let native = VideoFormat::progressive(8, 4, FrameRate::FPS_25);
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, MixerControl::default(), None).unwrap();
        let (video_tx, video_rx) = pipe("v");
        let (mut source, task) = mixer.spawn(None, video_rx);

        let input = frame(ctx.device.as_ref(), 8, 4, 5, [0.2, 0.4, 0.6, 1.0]);
        video_tx.send(input.clone()).await.unwrap();

        for expected in [10, 11] {
            let out = next_video(&mut source).await;
            assert!(!out.same_buffer(&input));
            assert_eq!(out.timestamp(), expected);
            assert!((out.read().unwrap()[1] - 0.4).abs() < 1e-5);
            out.release().unwrap();
            // no source audio: silence on the channel clock
            let audio = next_audio(&mut source).await;
            assert_eq!(audio.pts, expected * 960);
            assert_eq!(audio.peak(), 0.0);
        }

        video_tx.end().await;
        assert!(source.video.recv().await.is_end());
        assert!(source.audio.recv().await.is_end());
        task.await.unwrap();
        assert!(input.is_released());
    }

    #[tokio::test]
    async fn test_other_geometry_is_resized() {
        let ctx = context(8, 4);
        let native = VideoFormat::progressive(4, 2, FrameRate::FPS_50);
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, MixerControl::default(), None).unwrap();
        let (video_tx, video_rx) = pipe("v");
        let (mut source, _task) = mixer.spawn(None, video_rx);

        video_tx.send(frame(ctx.device.as_ref(), 4, 2, 0, [1.0, 0.0, 0.0, 1.0])).await.unwrap();
        let out = next_video(&mut source).await;
        assert_eq!((out.width(), out.height()), (8, 4));
        assert!((out.read().unwrap()[0] - 1.0).abs() < 1e-5);
        out.release().unwrap();
    }

    #[tokio::test]
    async fn test_fill_applies_on_next_frame() {
        let ctx = context(8, 4);
        let native = ctx.format.clone();
        let control = MixerControl::default();
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, control.clone(), None).unwrap();
        let (video_tx, video_rx) = pipe("v");
        let (mut source, _task) = mixer.spawn(None, video_rx);

        video_tx.send(frame(ctx.device.as_ref(), 8, 4, 0, [1.0; 4])).await.unwrap();
        let first = next_video(&mut source).await;
        assert!(first.read().unwrap().iter().all(|v| *v == 1.0));
        first.release().unwrap();

        control.apply(MixerCommand::Fill {
            x: 0.5,
            y: 0.0,
            scale_x: 0.5,
            scale_y: 1.0,
        });
        video_tx.send(frame(ctx.device.as_ref(), 8, 4, 1, [1.0; 4])).await.unwrap();
        let second = next_video(&mut source).await;
        {
            let px = second.read().unwrap();
            // left half empty, right half covered
            assert_eq!(&px[0..4], &[0.0; 4]);
            assert!((px[7 * 4 + 3] - 1.0).abs() < 1e-5);
        }
        second.release().unwrap();
    }

    #[tokio::test]
    async fn test_volume_scales_audio() {
        let ctx = context(8, 4);
        let native = ctx.format.clone();
        let control = MixerControl::default();
        control.set_volume(0.5);
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, control, None).unwrap();
        let (audio_tx, audio_rx) = pipe("a");
        let (video_tx, video_rx) = pipe("v");
        let (mut source, _task) = mixer.spawn(Some(audio_rx), video_rx);

        video_tx.send(frame(ctx.device.as_ref(), 8, 4, 0, [0.0; 4])).await.unwrap();
        audio_tx.send(AudioFrame::new(AUDIO, 0, vec![0.8; 1920])).await.unwrap();
        next_video(&mut source).await.release().unwrap();
        let audio = next_audio(&mut source).await;
        assert!(audio.samples.iter().all(|s| (s - 0.4).abs() < 1e-6));
    }

    #[tokio::test]
    async fn test_field_deinterlace_doubles_rate() {
        let ctx = context(8, 4);
        let mut native = VideoFormat::progressive(8, 4, FrameRate::FPS_25);
        native.fields = 2;
        let mixer = Mixer::new(&ctx, "src", &native, AUDIO, MixerControl::default(), Some(YadifMode::SendField)).unwrap();
        let (video_tx, video_rx) = pipe("v");
        let (mut source, _task) = mixer.spawn(None, video_rx);

        for ts in 0..3 {
            video_tx.send(frame(ctx.device.as_ref(), 8, 4, ts, [0.5; 4])).await.unwrap();
        }
        // the window fills on the third frame; the middle one comes out twice
        for expected in [2, 3] {
            let out = next_video(&mut source).await;
            assert_eq!(out.timestamp(), expected);
            out.release().unwrap();
        }
    }

    struct Noop;

    impl Kernel for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn run(&self, _args: &KernelArgs) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_finish_drops_pending_jobs() {
        let ctx = context(8, 4);
        let native = ctx.format.clone();
        let mut mixer = Mixer::new(&ctx, "src", &native, AUDIO, MixerControl::default(), None).unwrap();
        let held = frame(ctx.device.as_ref(), 8, 4, 0, [0.0; 4]);
        for stage in ["yadif", "mixer"] {
            held.add_ref().unwrap();
            let input = held.clone();
            ctx.queue.add(JobKey::new(format!("src/{stage}"), 0), "noop", Arc::new(Noop), KernelArgs::new(), move || {
                let _ = input.release();
            });
        }
        ctx.queue.add(JobKey::new("other/mixer", 0), "noop", Arc::new(Noop), KernelArgs::new(), || {});

        mixer.finish();
        assert_eq!(ctx.queue.pending_keys(), vec![JobKey::new("other/mixer", 0)]);
        assert_eq!(held.ref_count(), 1);
        assert!(held.release().unwrap());
    }
}
