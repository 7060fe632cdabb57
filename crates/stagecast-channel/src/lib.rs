//! Stagecast Channel - the per-channel pipeline
//!
//! Producers fill pipes with canonical frames at their native rate. A
//! [`Mixer`] per producer converts them to the channel format, a
//! [`Transitioner`] per layer blends between sources, the [`Combiner`]
//! composites the layers and the [`Channel`] actor fans the result out to
//! its consumers, once per tick.

pub mod channel;
pub mod combiner;
pub mod consumer;
pub mod context;
pub mod layer;
pub mod mixer;
pub mod params;
pub mod pipe;
pub mod producer;
pub mod transitioner;

pub use channel::{Channel, ChannelConfig, ChannelHandle, LayerState};
pub use combiner::{AudioCombinePolicy, Combiner};
pub use consumer::{CaptureConsumer, CapturedFrame, Consumer, ConsumerConfig};
pub use context::ChannelContext;
pub use layer::Layer;
pub use mixer::{Mixer, MixerControl, MixerParams};
pub use params::{LoadParams, MixerCommand, TransitionSpec};
pub use pipe::{pipe, AudioReceiver, AudioSender, Packet, PipeReceiver, PipeSender, VideoReceiver, VideoSender};
pub use producer::{Producer, ProducerRegistry, SyntheticProducer};
pub use transitioner::{LayerFrame, TransitionEvent, TransitionSource, Transitioner};
