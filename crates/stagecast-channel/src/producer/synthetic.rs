//! Producers whose pictures are generated on the host.
//!
//! Each frame is packed into the producer's wire format, uploaded, and
//! unpacked to a canonical buffer by the pack reader through the job queue,
//! the same path a capture card's frames take.

use super::Producer;
use crate::context::ChannelContext;
use crate::pipe::{pipe, AudioReceiver, AudioSender, VideoReceiver, VideoSender};
use stagecast_color::ColorSpace;
use stagecast_core::{AudioFormat, AudioFrame, FramePlane, PackedFrame, PixelFormat, Result, StageError, VideoFormat};
use stagecast_gpu::{BufferGuard, ImageBuffer, JobKey};
use stagecast_pack::{pack_host, Reader};
use smallvec::smallvec;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// What a synthetic producer draws.
#[derive(Debug, Clone)]
pub(crate) enum Picture {
    /// One straight-alpha sRGB colour, written straight into BGRA bytes.
    Solid([u8; 4]),
    /// A canonical image in the channel colourspace. With `marker`, a white
    /// block steps along the bottom rows once per frame.
    Pattern { image: Vec<f32>, marker: bool },
}

impl Picture {
    fn is_animated(&self) -> bool {
        matches!(self, Self::Pattern { marker: true, .. })
    }
}

/// Sine tone on every channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tone {
    pub frequency: f32,
    pub amplitude: f32,
}

/// Everything a synthetic producer needs besides the channel.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticSpec {
    pub kind: &'static str,
    pub format: VideoFormat,
    pub wire: PixelFormat,
    pub wire_space: ColorSpace,
    pub audio: AudioFormat,
    pub picture: Picture,
    pub tone: Option<Tone>,
}

impl SyntheticSpec {
    fn render(&self, channel: ColorSpace, timestamp: i64) -> Result<PackedFrame> {
        let (w, h) = (self.format.width, self.format.height);
        match &self.picture {
            Picture::Solid(rgba) => {
                if self.wire != PixelFormat::Bgra8 {
                    return Err(StageError::UnsupportedFormat(format!(
                        "solid pictures are written as bgra8, not {}",
                        self.wire
                    )));
                }
                let mut plane = FramePlane::new(w as usize * 4, h as usize);
                let bgra = [rgba[2], rgba[1], rgba[0], rgba[3]];
                for px in plane.data.chunks_exact_mut(4) {
                    px.copy_from_slice(&bgra);
                }
                Ok(PackedFrame {
                    format: PixelFormat::Bgra8,
                    width: w,
                    height: h,
                    timestamp,
                    planes: smallvec![plane],
                })
            }
            Picture::Pattern { image, marker } => {
                let image: Cow<[f32]> = if *marker {
                    Cow::Owned(with_marker(image, w as usize, h as usize, timestamp))
                } else {
                    Cow::Borrowed(image)
                };
                pack_host(self.wire, self.wire_space, channel, &image, w, h, timestamp)
            }
        }
    }

    /// Interleaved samples for native frame `timestamp`. Frame lengths
    /// follow the exact sample clock, so 29.97 alternates 1601/1602.
    fn audio_frame(&self, timestamp: i64, silent: bool) -> AudioFrame {
        let rate = self.format.frame_rate();
        let sample_rate = self.audio.sample_rate as i64;
        let at = |frame: i64| frame * sample_rate * rate.denominator as i64 / rate.numerator as i64;
        let start = at(timestamp);
        let len = (at(timestamp + 1) - start) as usize;

        let tone = self.tone.filter(|_| !silent);
        let Some(tone) = tone else {
            return AudioFrame::silence(self.audio, start, len);
        };
        let channels = self.audio.channels as usize;
        let step = std::f64::consts::TAU * tone.frequency as f64 / sample_rate as f64;
        let mut samples = Vec::with_capacity(len * channels);
        for i in 0..len {
            let v = tone.amplitude * ((start + i as i64) as f64 * step).sin() as f32;
            samples.extend(std::iter::repeat(v).take(channels));
        }
        AudioFrame::new(self.audio, start, samples)
    }
}

/// Paint the moving marker onto a copy of `image`.
fn with_marker(image: &[f32], width: usize, height: usize, timestamp: i64) -> Vec<f32> {
    let mut out = image.to_vec();
    let size = (height / 12).max(1);
    let steps = (width / size).max(1);
    let x0 = (timestamp.rem_euclid(steps as i64) as usize) * size;
    for y in height.saturating_sub(size)..height {
        for x in x0..(x0 + size).min(width) {
            let i = (y * width + x) * 4;
            out[i..i + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        }
    }
    out
}

/// A producer running a [`SyntheticSpec`].
pub struct SyntheticProducer {
    source_id: String,
    spec: Option<SyntheticSpec>,
    format: VideoFormat,
    audio_format: AudioFormat,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    audio: Option<AudioReceiver>,
    video: Option<VideoReceiver>,
    task: Option<JoinHandle<()>>,
}

impl SyntheticProducer {
    pub(crate) fn new(spec: SyntheticSpec) -> Self {
        let source_id = format!("{}-{}", spec.kind, Uuid::new_v4().simple());
        Self {
            source_id,
            format: spec.format.clone(),
            audio_format: spec.audio,
            spec: Some(spec),
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            audio: None,
            video: None,
            task: None,
        }
    }

    /// Whether the producing task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Producer for SyntheticProducer {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    fn initialise(&mut self, ctx: &ChannelContext) -> Result<()> {
        let spec = self
            .spec
            .take()
            .ok_or_else(|| StageError::Pipeline(format!("{} already initialised", self.source_id)))?;
        let reader = Reader::new(
            spec.wire,
            spec.format.width,
            spec.format.height,
            spec.wire_space,
            ctx.colour_space,
        )?;
        let (audio_tx, audio_rx) = pipe(format!("{}/audio", self.source_id));
        let (video_tx, video_rx) = pipe(format!("{}/video", self.source_id));
        self.audio = Some(audio_rx);
        self.video = Some(video_rx);

        let task = ProducerTask {
            source_id: self.source_id.clone(),
            ctx: ctx.clone(),
            reader,
            spec,
            last: None,
            paused: self.paused.clone(),
            stop: self.stop.clone(),
            audio_tx,
            video_tx,
        };
        self.task = Some(tokio::spawn(task.run()));
        Ok(())
    }

    fn take_audio(&mut self) -> Option<AudioReceiver> {
        self.audio.take()
    }

    fn take_video(&mut self) -> Option<VideoReceiver> {
        self.video.take()
    }

    fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::AcqRel) != paused {
            debug!(source_id = %self.source_id, paused, "producer pause changed");
        }
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn release(&mut self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            debug!(source_id = %self.source_id, "producer released");
        }
    }
}

impl Drop for SyntheticProducer {
    fn drop(&mut self) {
        self.release();
    }
}

struct ProducerTask {
    source_id: String,
    ctx: ChannelContext,
    reader: Reader,
    spec: SyntheticSpec,
    last: Option<PackedFrame>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    audio_tx: AudioSender,
    video_tx: VideoSender,
}

impl ProducerTask {
    async fn run(mut self) {
        let mut timestamp = 0i64;
        let reason = loop {
            if self.stop.load(Ordering::Acquire) {
                break "released";
            }
            let paused = self.paused.load(Ordering::Acquire);
            let video = match self.video_frame(timestamp, paused).await {
                Ok(video) => video,
                Err(e) => {
                    error!(source_id = %self.source_id, timestamp, error = %e, "producer frame failed");
                    break "error";
                }
            };
            if self.video_tx.send(video).await.is_err() {
                break "video pipe closed";
            }
            let audio = self.spec.audio_frame(timestamp, paused);
            if self.audio_tx.send(audio).await.is_err() {
                break "audio pipe closed";
            }
            timestamp += 1;
        };
        debug!(source_id = %self.source_id, frames = timestamp, reason, "producer finished");
        let Self {
            audio_tx, video_tx, ..
        } = self;
        video_tx.end().await;
        audio_tx.end().await;
    }

    async fn video_frame(&mut self, timestamp: i64, paused: bool) -> Result<ImageBuffer> {
        let packed = match self.last.take() {
            Some(last) if paused || !self.spec.picture.is_animated() => last,
            _ => self.spec.render(self.ctx.colour_space, timestamp)?,
        };
        let result = self.read(&packed, timestamp).await;
        self.last = Some(packed);
        result
    }

    async fn read(&self, packed: &PackedFrame, timestamp: i64) -> Result<ImageBuffer> {
        let device = self.ctx.device.as_ref();
        let output = BufferGuard::new(device.create_buffer(self.reader.output_desc(self.source_id.clone(), timestamp))?);
        let planes = self.reader.upload(device, packed)?;
        let key = JobKey::new(self.source_id.clone(), timestamp);
        self.reader.add_read_job(&self.ctx.queue, key.clone(), planes, &output);
        self.ctx.queue.run_queue(&key).await?;
        Ok(output.into_inner())
    }
}
