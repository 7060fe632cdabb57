//! The channel actor.
//!
//! One task per channel owns the layers and runs the composite once per
//! tick. Transport commands arrive over an mpsc channel and are handled
//! between ticks, so every command lands on a frame boundary. In real-time
//! mode ticks are paced by the channel's field rate; otherwise they run on
//! [`ChannelHandle::step`].

use crate::combiner::{AudioCombinePolicy, Combiner};
use crate::consumer::Consumer;
use crate::context::ChannelContext;
use crate::params::{LoadParams, MixerCommand};
use crate::pipe::{pipe, AudioSender, VideoSender};
use crate::producer::ProducerRegistry;
use serde::{Deserialize, Serialize};
use stagecast_color::ColorSpace;
use stagecast_core::{Result, VideoFormat};
use stagecast_gpu::{BufferGuard, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 32;

/// One channel in the server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Name from the format table, e.g. `1080p5000`.
    pub format: String,
    #[serde(default)]
    pub colour_space: Option<String>,
    #[serde(default)]
    pub audio_policy: AudioCombinePolicy,
    #[serde(default)]
    pub consumers: Vec<crate::consumer::ConsumerConfig>,
    /// Sources loaded when the channel starts.
    #[serde(default)]
    pub startup: Vec<LoadParams>,
}

impl ChannelConfig {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            colour_space: None,
            audio_policy: AudioCombinePolicy::default(),
            consumers: Vec::new(),
            startup: Vec::new(),
        }
    }

    pub fn video_format(&self) -> Result<VideoFormat> {
        VideoFormat::lookup(&self.format)
    }

    pub fn colour_space(&self) -> ColorSpace {
        self.colour_space.as_deref().map(ColorSpace::from_name).unwrap_or_default()
    }
}

/// What a layer is showing, as reported to the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    pub layer: u32,
    pub foreground: Option<String>,
    pub background: Option<String>,
    pub paused: bool,
}

enum Op {
    Load(LoadParams),
    Play(u32),
    Pause(u32),
    Resume(u32),
    Stop(u32),
    Clear(Option<u32>),
    Mixer { layer: u32, command: MixerCommand },
    AddConsumer(Box<dyn Consumer>),
    Step(u32),
    Shutdown,
}

enum Command {
    Op { op: Op, reply: oneshot::Sender<bool> },
    Query { layer: u32, reply: oneshot::Sender<Option<LayerState>> },
}

struct Output {
    name: String,
    audio: AudioSender,
    video: VideoSender,
}

pub struct Channel {
    ctx: ChannelContext,
    combiner: Combiner,
    registry: Arc<ProducerRegistry>,
    consumers: Vec<Box<dyn Consumer>>,
    outputs: Vec<Output>,
    tick: i64,
}

impl Channel {
    pub fn new(index: u32, config: &ChannelConfig, queue: JobQueue, registry: Arc<ProducerRegistry>) -> Result<Self> {
        let format = config.video_format()?;
        let ctx = ChannelContext::new(index, format, config.colour_space(), queue);
        info!(
            channel = index,
            format = %ctx.format.name,
            colour_space = %ctx.colour_space,
            policy = ?config.audio_policy,
            "channel created"
        );
        Ok(Self {
            combiner: Combiner::new(&ctx, config.audio_policy),
            ctx,
            registry,
            consumers: Vec::new(),
            outputs: Vec::new(),
            tick: 0,
        })
    }

    pub fn context(&self) -> &ChannelContext {
        &self.ctx
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> i64 {
        self.tick
    }

    /// Initialise `consumer` and connect it to the composite output.
    pub fn add_consumer(&mut self, mut consumer: Box<dyn Consumer>) -> Result<()> {
        consumer.initialise(&self.ctx)?;
        let name = consumer.name().to_string();
        let (audio, audio_rx) = pipe(format!("ch{}/{name}/audio", self.ctx.index));
        let (video, video_rx) = pipe(format!("ch{}/{name}/video", self.ctx.index));
        consumer.connect(audio_rx, video_rx)?;
        info!(channel = self.ctx.index, consumer = %name, "consumer connected");
        self.outputs.push(Output { name, audio, video });
        self.consumers.push(consumer);
        Ok(())
    }

    /// LOAD or LOADBG.
    pub fn load(&mut self, params: &LoadParams) -> bool {
        let registry = self.registry.clone();
        let result = self
            .combiner
            .layer_mut(params.layer)
            .and_then(|layer| layer.load(&registry, params));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(channel = self.ctx.index, layer = params.layer, url = %params.url, error = %e, "load failed");
                self.combiner.prune();
                false
            }
        }
    }

    fn on_layer(&mut self, layer: u32, f: impl FnOnce(&mut crate::layer::Layer) -> bool) -> bool {
        match self.combiner.get_mut(layer) {
            Some(layer) => f(layer),
            None => false,
        }
    }

    pub fn play(&mut self, layer: u32) -> bool {
        self.on_layer(layer, |l| l.play())
    }

    pub fn pause(&mut self, layer: u32) -> bool {
        self.on_layer(layer, |l| l.pause())
    }

    pub fn resume(&mut self, layer: u32) -> bool {
        self.on_layer(layer, |l| l.resume())
    }

    pub fn stop(&mut self, layer: u32) -> bool {
        self.on_layer(layer, |l| l.stop())
    }

    /// CLEAR one layer, or every layer when `layer` is `None`. Always succeeds.
    pub fn clear(&mut self, layer: Option<u32>) -> bool {
        match layer {
            Some(layer) => {
                self.on_layer(layer, |l| l.clear());
                self.combiner.prune();
            }
            None => self.combiner.clear_layers(),
        }
        true
    }

    pub fn mixer(&mut self, layer: u32, command: MixerCommand) -> bool {
        match self.combiner.layer_mut(layer) {
            Ok(layer) => {
                layer.control().apply(command);
                true
            }
            Err(e) => {
                warn!(channel = self.ctx.index, layer, error = %e, "mixer command rejected");
                false
            }
        }
    }

    pub fn layer_state(&self, layer: u32) -> Option<LayerState> {
        self.combiner.layer(layer).map(|l| LayerState {
            layer,
            foreground: l.foreground_id().map(str::to_string),
            background: l.background_id().map(str::to_string),
            paused: l.is_paused(),
        })
    }

    /// Composite one tick and fan it out to every consumer.
    pub async fn tick(&mut self) -> Result<()> {
        let tick = self.tick;
        self.tick += 1;
        let (video, audio) = self.combiner.tick(tick).await?;
        video.set_timestamp(tick);
        let video = BufferGuard::new(video);

        let mut closed = Vec::new();
        for (i, output) in self.outputs.iter().enumerate() {
            video.add_ref()?;
            let sent = match output.video.send(video.buffer().clone()).await {
                Ok(()) => output.audio.send(audio.clone()).await,
                Err(e) => Err(e),
            };
            if sent.is_err() {
                closed.push(i);
            }
        }
        for i in closed.into_iter().rev() {
            let output = self.outputs.remove(i);
            warn!(channel = self.ctx.index, consumer = %output.name, "consumer went away");
        }
        Ok(())
    }

    async fn apply(&mut self, op: Op) -> bool {
        match op {
            Op::Load(params) => self.load(&params),
            Op::Play(layer) => self.play(layer),
            Op::Pause(layer) => self.pause(layer),
            Op::Resume(layer) => self.resume(layer),
            Op::Stop(layer) => self.stop(layer),
            Op::Clear(layer) => self.clear(layer),
            Op::Mixer { layer, command } => self.mixer(layer, command),
            Op::AddConsumer(consumer) => match self.add_consumer(consumer) {
                Ok(()) => true,
                Err(e) => {
                    warn!(channel = self.ctx.index, error = %e, "consumer not added");
                    false
                }
            },
            Op::Step(frames) => {
                for _ in 0..frames {
                    if let Err(e) = self.tick().await {
                        error!(channel = self.ctx.index, tick = self.tick - 1, error = %e, "tick failed");
                        return false;
                    }
                }
                true
            }
            Op::Shutdown => true,
        }
    }

    /// Handle one command; false once the channel should stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Op { op, reply } => {
                let shutdown = matches!(op, Op::Shutdown);
                let ok = self.apply(op).await;
                let _ = reply.send(ok);
                !shutdown
            }
            Command::Query { layer, reply } => {
                let _ = reply.send(self.layer_state(layer));
                true
            }
        }
    }

    /// Start the actor. With `realtime` ticks follow the wall clock.
    pub fn spawn(self, realtime: bool) -> (ChannelHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = ChannelHandle {
            index: self.ctx.index,
            tx,
        };
        (handle, tokio::spawn(self.run(rx, realtime)))
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, realtime: bool) {
        let rate = self.ctx.format.tick_rate();
        let period = Duration::from_secs_f64(rate.denominator as f64 / rate.numerator as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(channel = self.ctx.index, realtime, ?period, "channel running");

        loop {
            let running = if realtime {
                tokio::select! {
                    biased;
                    command = rx.recv() => match command {
                        Some(command) => self.handle(command).await,
                        None => false,
                    },
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(channel = self.ctx.index, tick = self.tick - 1, error = %e, "tick failed");
                        }
                        true
                    }
                }
            } else {
                match rx.recv().await {
                    Some(command) => self.handle(command).await,
                    None => false,
                }
            };
            if !running {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        self.combiner.clear_layers();
        for output in self.outputs.drain(..) {
            output.video.end().await;
            output.audio.end().await;
        }
        info!(channel = self.ctx.index, ticks = self.tick, "channel stopped");
    }
}

/// Cloneable front end to a running channel. Every call returns whether the
/// command succeeded; a stopped channel answers false.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    index: u32,
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Op { .. } => f.write_str("Op"),
            Command::Query { layer, .. } => write!(f, "Query({layer})"),
        }
    }
}

impl ChannelHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    async fn op(&self, op: Op) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Op { op, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn load_source(&self, params: LoadParams) -> bool {
        self.op(Op::Load(params)).await
    }

    pub async fn play(&self, layer: u32) -> bool {
        self.op(Op::Play(layer)).await
    }

    pub async fn pause(&self, layer: u32) -> bool {
        self.op(Op::Pause(layer)).await
    }

    pub async fn resume(&self, layer: u32) -> bool {
        self.op(Op::Resume(layer)).await
    }

    pub async fn stop(&self, layer: u32) -> bool {
        self.op(Op::Stop(layer)).await
    }

    pub async fn clear(&self, layer: u32) -> bool {
        self.op(Op::Clear(Some(layer))).await
    }

    pub async fn clear_all(&self) -> bool {
        self.op(Op::Clear(None)).await
    }

    /// MIXER `name` with its parameter list, e.g. `("FILL", ["0", "0", "0.5", "0.5"])`.
    pub async fn set_mixer(&self, layer: u32, name: &str, params: &[&str]) -> bool {
        match MixerCommand::parse(name, params) {
            Ok(command) => self.op(Op::Mixer { layer, command }).await,
            Err(e) => {
                warn!(channel = self.index, layer, command = name, error = %e, "bad mixer command");
                false
            }
        }
    }

    pub async fn anchor(&self, layer: u32, params: &[&str]) -> bool {
        self.set_mixer(layer, "ANCHOR", params).await
    }

    pub async fn fill(&self, layer: u32, params: &[&str]) -> bool {
        self.set_mixer(layer, "FILL", params).await
    }

    pub async fn rotation(&self, layer: u32, params: &[&str]) -> bool {
        self.set_mixer(layer, "ROTATION", params).await
    }

    pub async fn volume(&self, layer: u32, params: &[&str]) -> bool {
        self.set_mixer(layer, "VOLUME", params).await
    }

    pub async fn add_consumer(&self, consumer: Box<dyn Consumer>) -> bool {
        self.op(Op::AddConsumer(consumer)).await
    }

    /// Run `frames` ticks now. Meant for channels spawned without real-time
    /// pacing.
    pub async fn step(&self, frames: u32) -> bool {
        self.op(Op::Step(frames)).await
    }

    pub async fn layer_state(&self, layer: u32) -> Option<LayerState> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Query { layer, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Stop the channel: producers end, stages drain and consumers see
    /// end of stream.
    pub async fn shutdown(&self) -> bool {
        self.op(Op::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::CaptureConsumer;
    use stagecast_core::PixelFormat;
    use stagecast_gpu::HostDevice;

    fn spawn_channel() -> (ChannelHandle, JoinHandle<()>) {
        let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
        let mut config = ChannelConfig::new("PAL");
        config.colour_space = Some("601".into());
        let channel = Channel::new(1, &config, queue, Arc::new(ProducerRegistry::default())).unwrap();
        channel.spawn(false)
    }

    #[test]
    fn test_config_defaults() {
        let config: ChannelConfig = serde_json::from_str(r#"{"format":"1080p5000"}"#).unwrap();
        assert_eq!(config, ChannelConfig::new("1080p5000"));
        assert_eq!(config.colour_space(), ColorSpace::Bt709);
        assert!(ChannelConfig::new("1080p9999").video_format().is_err());
    }

    #[tokio::test]
    async fn test_transport_replies() {
        let (channel, task) = spawn_channel();
        assert!(!channel.play(1).await);
        assert!(!channel.load_source(LoadParams::new(1, "not-a-source")).await);
        assert!(channel.load_source(LoadParams::new(1, "#102030")).await);

        let state = channel.layer_state(1).await.unwrap();
        assert!(state.foreground.is_none() && state.background.is_some());
        assert!(channel.play(1).await);
        assert!(channel.pause(1).await);
        assert!(channel.layer_state(1).await.unwrap().paused);
        assert!(channel.resume(1).await);

        assert!(channel.fill(1, &["0", "0", "0.5", "0.5"]).await);
        assert!(!channel.fill(1, &["0", "0"]).await);
        assert!(!channel.volume(1, &["-1"]).await);
        assert!(!channel.set_mixer(1, "BLEND", &[]).await);

        assert!(channel.stop(1).await);
        assert!(channel.clear(1).await);
        assert!(channel.clear(1).await);
        assert!(channel.layer_state(1).await.is_none());
        assert!(channel.clear_all().await);

        assert!(channel.shutdown().await);
        task.await.unwrap();
        assert!(!channel.play(1).await);
    }

    #[tokio::test]
    async fn test_interlaced_channel_captures_frames() {
        let (channel, task) = spawn_channel();
        let (consumer, frames) = CaptureConsumer::new(PixelFormat::Uyvy422, None, 8);
        assert!(channel.add_consumer(Box::new(consumer)).await);
        assert!(channel.load_source(LoadParams::new(1, "black")).await);
        assert!(channel.play(1).await);
        assert!(channel.step(4).await);

        let frames = tokio::task::spawn_blocking(move || {
            (0..2)
                .map(|_| frames.recv_timeout(Duration::from_secs(10)).unwrap())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
        assert_eq!(frames[0].frame.timestamp, 0);
        assert_eq!(frames[1].frame.timestamp, 1);
        for captured in &frames {
            assert_eq!((captured.frame.width, captured.frame.height), (720, 576));
            // 25i: two 960-sample fields per frame
            assert_eq!(captured.audio.iter().map(|a| a.nb_samples()).sum::<usize>(), 1920);
            // black luma on the first row
            assert_eq!(captured.frame.planes[0].row(0)[1], 16);
        }
        assert!(channel.shutdown().await);
        task.await.unwrap();
    }
}
