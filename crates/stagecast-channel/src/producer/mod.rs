//! Producers and the registry that picks one for a set of load parameters.
//!
//! A producer owns a task that fills one video and one audio pipe with
//! frames at its native format and rate. The registry tries its factories
//! in order; a factory that does not recognise the parameters returns
//! [`StageError::InvalidProducer`] and the next one gets a go.

mod bars;
mod colour;
mod synthetic;

pub use bars::bars_factory;
pub use colour::{black_factory, colour_factory, parse_colour};
pub use synthetic::SyntheticProducer;

use crate::context::ChannelContext;
use crate::params::LoadParams;
use crate::pipe::{AudioReceiver, VideoReceiver};
use stagecast_core::{AudioFormat, Result, StageError, VideoFormat};
use tracing::{debug, info};

/// A source of canonical video buffers and audio frames.
pub trait Producer: Send {
    /// Unique per instance; used as the job queue key for this source.
    fn source_id(&self) -> &str;

    /// Native raster and rate.
    fn format(&self) -> &VideoFormat;

    fn audio_format(&self) -> AudioFormat;

    /// Build the pipes and start producing.
    fn initialise(&mut self, ctx: &ChannelContext) -> Result<()>;

    /// The audio pipe, once. `None` before `initialise` or when taken.
    fn take_audio(&mut self) -> Option<AudioReceiver>;

    fn take_video(&mut self) -> Option<VideoReceiver>;

    /// Paused producers keep emitting their last frame, with silence.
    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    /// Stop producing. The pipes end once the current frame is out.
    fn release(&mut self);
}

pub type ProducerFactory =
    Box<dyn Fn(&LoadParams, &ChannelContext) -> Result<Box<dyn Producer>> + Send + Sync>;

/// Ordered list of producer factories.
pub struct ProducerRegistry {
    factories: Vec<(String, ProducerFactory)>,
}

impl ProducerRegistry {
    /// A registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Append a factory; earlier registrations are tried first.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&LoadParams, &ChannelContext) -> Result<Box<dyn Producer>> + Send + Sync + 'static,
    ) {
        self.factories.push((name.into(), Box::new(factory)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(name, _)| name.as_str())
    }

    /// Create and initialise the first producer that accepts `params`.
    pub fn create(&self, params: &LoadParams, ctx: &ChannelContext) -> Result<Box<dyn Producer>> {
        for (name, factory) in &self.factories {
            match factory(params, ctx) {
                Ok(mut producer) => {
                    producer.initialise(ctx)?;
                    info!(
                        factory = %name,
                        source_id = producer.source_id(),
                        format = %producer.format().name,
                        url = %params.url,
                        "producer created"
                    );
                    return Ok(producer);
                }
                Err(e) if e.is_invalid_producer() => {
                    debug!(factory = %name, url = %params.url, "factory declined");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StageError::InvalidProducer(format!(
            "no producer accepts '{}'",
            params.url
        )))
    }
}

impl Default for ProducerRegistry {
    /// `black`, `colour` and `bars`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("black", black_factory);
        registry.register("colour", colour_factory);
        registry.register("bars", bars_factory);
        registry
    }
}

/// A producer url split into its name and `key=value` query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SourceUrl<'a> {
    pub name: &'a str,
    pub query: Vec<(&'a str, &'a str)>,
}

impl<'a> SourceUrl<'a> {
    pub fn parse(url: &'a str) -> Self {
        let (name, query) = url.trim().split_once('?').unwrap_or((url.trim(), ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();
        Self { name, query }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }
}
