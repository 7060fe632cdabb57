//! Consumers of a channel's composite output.

use crate::context::ChannelContext;
use crate::pipe::{AudioReceiver, Packet, VideoReceiver};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use stagecast_color::ColorSpace;
use stagecast_core::{AudioFrame, PackedFrame, PixelFormat, Result, StageError};
use stagecast_gpu::{BufferGuard, ImageBuffer, JobKey};
use stagecast_pack::{FieldMode, Writer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A sink for the composite channel output.
pub trait Consumer: Send {
    fn name(&self) -> &str;

    /// Prepare for the channel's format. Called once, before `connect`.
    fn initialise(&mut self, ctx: &ChannelContext) -> Result<()>;

    /// Start consuming. Every received buffer carries one reference owned by
    /// the consumer.
    fn connect(&mut self, audio: AudioReceiver, video: VideoReceiver) -> Result<()>;
}

fn default_capacity() -> usize {
    16
}

/// How a channel's consumers are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerConfig {
    Capture {
        #[serde(rename = "pixelFormat")]
        pixel_format: PixelFormat,
        /// Colourspace of the packed output; the channel's when absent.
        #[serde(default, rename = "colourSpace")]
        colour_space: Option<String>,
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
}

/// One packed output frame and the audio that plays with it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: PackedFrame,
    /// One block per field.
    pub audio: Vec<AudioFrame>,
}

/// Packs the channel output into a wire pixel format and hands it to the
/// host over a bounded channel. Frames the reader is too slow for are
/// dropped.
pub struct CaptureConsumer {
    name: String,
    format: PixelFormat,
    colour_space: Option<ColorSpace>,
    tx: Sender<CapturedFrame>,
    state: Option<(ChannelContext, Arc<Writer>)>,
    task: Option<JoinHandle<()>>,
}

impl CaptureConsumer {
    pub fn new(format: PixelFormat, colour_space: Option<ColorSpace>, capacity: usize) -> (Self, Receiver<CapturedFrame>) {
        let (tx, rx) = bounded(capacity.max(1));
        let consumer = Self {
            name: format!("capture-{format}"),
            format,
            colour_space,
            tx,
            state: None,
            task: None,
        };
        (consumer, rx)
    }

    pub fn from_config(config: &ConsumerConfig) -> (Self, Receiver<CapturedFrame>) {
        match config {
            ConsumerConfig::Capture {
                pixel_format,
                colour_space,
                capacity,
            } => Self::new(*pixel_format, colour_space.as_deref().map(ColorSpace::from_name), *capacity),
        }
    }
}

impl Consumer for CaptureConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialise(&mut self, ctx: &ChannelContext) -> Result<()> {
        let wire = self.colour_space.unwrap_or(ctx.colour_space);
        let writer = Writer::new(self.format, ctx.format.width, ctx.format.height, wire, ctx.colour_space)?;
        debug!(consumer = %self.name, channel = ctx.index, %wire, "capture ready");
        self.state = Some((ctx.clone(), Arc::new(writer)));
        Ok(())
    }

    fn connect(&mut self, audio: AudioReceiver, video: VideoReceiver) -> Result<()> {
        let (ctx, writer) = self
            .state
            .clone()
            .ok_or_else(|| StageError::Pipeline(format!("{} connected before initialise", self.name)))?;
        if self.task.is_some() {
            return Err(StageError::Pipeline(format!("{} already connected", self.name)));
        }
        let task = CaptureTask {
            name: self.name.clone(),
            ctx,
            writer,
            tx: self.tx.clone(),
        };
        self.task = Some(tokio::spawn(task.run(audio, video)));
        Ok(())
    }
}

struct CaptureTask {
    name: String,
    ctx: ChannelContext,
    writer: Arc<Writer>,
    tx: Sender<CapturedFrame>,
}

impl CaptureTask {
    async fn run(self, mut audio: AudioReceiver, mut video: VideoReceiver) {
        let fields = self.ctx.format.fields.max(1) as usize;
        let mut pending: Vec<(ImageBuffer, Option<AudioFrame>)> = Vec::with_capacity(fields);
        loop {
            let image = match video.recv().await {
                Packet::Data(image) => image,
                Packet::End => break,
            };
            let block = match audio.recv().await {
                Packet::Data(block) => Some(block),
                Packet::End => None,
            };
            pending.push((image, block));
            if pending.len() < fields {
                continue;
            }

            let batch = std::mem::take(&mut pending);
            let timestamp = batch[0].0.timestamp() / fields as i64;
            let (images, audio_blocks): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
            match self.capture(images, timestamp).await {
                Ok(frame) => {
                    let captured = CapturedFrame {
                        frame,
                        audio: audio_blocks.into_iter().flatten().collect(),
                    };
                    match self.tx.try_send(captured) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(consumer = %self.name, timestamp, "capture reader behind, frame dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!(consumer = %self.name, "capture reader gone");
                            break;
                        }
                    }
                }
                Err(e) => error!(consumer = %self.name, timestamp, error = %e, "capture failed"),
            }
        }
        for (image, _) in pending {
            let _ = image.release();
        }
        debug!(consumer = %self.name, "capture ended");
    }

    /// Pack `images`, one per field, into a single wire frame.
    async fn capture(&self, images: Vec<ImageBuffer>, timestamp: i64) -> Result<PackedFrame> {
        let device = self.ctx.device.as_ref();
        let destinations = match self.writer.create_destinations(device, timestamp) {
            Ok(planes) => planes.into_iter().map(BufferGuard::new).collect::<Vec<_>>(),
            Err(e) => {
                for image in images {
                    let _ = image.release();
                }
                return Err(e);
            }
        };
        let planes: Vec<ImageBuffer> = destinations.iter().map(|g| g.buffer().clone()).collect();
        let key = JobKey::new(format!("ch{}/{}", self.ctx.index, self.name), timestamp);
        let interlaced = images.len() == 2;
        let mut images = images.into_iter().enumerate();
        while let Some((i, image)) = images.next() {
            let field = match (interlaced, i) {
                (false, _) => FieldMode::Progressive,
                (true, 0) => FieldMode::Top,
                (true, _) => FieldMode::Bottom,
            };
            if let Err(e) = self.writer.add_write_job(&self.ctx.queue, key.clone(), image, &planes, field) {
                for (_, rest) in images {
                    let _ = rest.release();
                }
                if i > 0 {
                    // the added field still owns its input
                    let _ = self.ctx.queue.run_queue(&key).await;
                }
                return Err(e);
            }
        }
        self.ctx.queue.run_queue(&key).await?;
        let planes = destinations.into_iter().map(BufferGuard::into_inner).collect();
        self.writer.download(device, planes, timestamp)
    }
}
