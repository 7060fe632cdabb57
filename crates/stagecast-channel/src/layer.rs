//! Transport state of one compositing slot.
//!
//! A layer holds at most one foreground and one background producer. LOADBG
//! fills the background, PLAY promotes it through the layer's transitioner,
//! PAUSE and RESUME act on the foreground, STOP drops the foreground and
//! CLEAR drops both.

use crate::context::ChannelContext;
use crate::mixer::{Mixer, MixerControl};
use crate::params::{LoadParams, TransitionSpec};
use crate::producer::{Producer, ProducerRegistry};
use crate::transitioner::{LayerFrame, TransitionEvent, TransitionSource, Transitioner};
use crossbeam_channel::Receiver;
use stagecast_core::{Result, StageError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A producer and the mixer feeding its output to the layer.
struct Slot {
    producer: Box<dyn Producer>,
    /// Held until the slot is played.
    source: Option<TransitionSource>,
    _mixer: JoinHandle<()>,
    autoplay: bool,
    transition: TransitionSpec,
}

impl Slot {
    fn source_id(&self) -> &str {
        self.producer.source_id()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.producer.release();
    }
}

pub struct Layer {
    index: u32,
    ctx: ChannelContext,
    control: MixerControl,
    transitioner: Transitioner,
    events: Receiver<TransitionEvent>,
    foreground: Option<Slot>,
    background: Option<Slot>,
    /// Foregrounds still being transitioned away from.
    outgoing: Vec<Slot>,
}

impl Layer {
    pub fn new(ctx: &ChannelContext, index: u32) -> Self {
        let (transitioner, events) = Transitioner::new(ctx, index);
        Self {
            index,
            ctx: ctx.clone(),
            control: MixerControl::default(),
            transitioner,
            events,
            foreground: None,
            background: None,
            outgoing: Vec::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn control(&self) -> &MixerControl {
        &self.control
    }

    pub fn foreground_id(&self) -> Option<&str> {
        self.foreground.as_ref().map(Slot::source_id)
    }

    pub fn background_id(&self) -> Option<&str> {
        self.background.as_ref().map(Slot::source_id)
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_none() && self.background.is_none()
    }

    pub fn is_paused(&self) -> bool {
        self.foreground.as_ref().is_some_and(|slot| slot.producer.is_paused())
    }

    /// LOADBG, or LOAD when `params.preview` is set.
    ///
    /// The new producer replaces any background, held on its first frame
    /// until played.
    pub fn load(&mut self, registry: &ProducerRegistry, params: &LoadParams) -> Result<()> {
        let mut producer = registry.create(params, &self.ctx)?;
        producer.set_paused(true);
        let video = producer
            .take_video()
            .ok_or_else(|| StageError::Pipeline(format!("{} has no video", producer.source_id())))?;
        let audio = producer.take_audio();
        let mixer = Mixer::new(
            &self.ctx,
            producer.source_id(),
            producer.format(),
            producer.audio_format(),
            self.control.clone(),
            params.deinterlace,
        )?;
        let (source, task) = mixer.spawn(audio, video);

        if let Some(old) = self.background.replace(Slot {
            producer,
            source: Some(source),
            _mixer: task,
            autoplay: params.autoplay,
            transition: params.transition,
        }) {
            debug!(layer = self.index, source_id = old.source_id(), "background replaced");
        }
        info!(layer = self.index, url = %params.url, preview = params.preview, autoplay = params.autoplay, "loaded");

        if params.preview {
            self.promote(false);
        } else if params.autoplay && self.foreground.is_none() {
            self.promote(true);
        }
        Ok(())
    }

    /// Move the background to the foreground through its transition.
    fn promote(&mut self, run: bool) -> bool {
        let Some(mut slot) = self.background.take() else {
            return false;
        };
        let Some(source) = slot.source.take() else {
            return false;
        };
        if run {
            slot.producer.set_paused(false);
        }
        self.transitioner
            .update(slot.transition.kind, slot.transition.duration, source);
        if let Some(previous) = self.foreground.replace(slot) {
            self.outgoing.push(previous);
        }
        self.drain_events();
        true
    }

    /// PLAY: promote the background, or resume a paused foreground.
    pub fn play(&mut self) -> bool {
        if self.background.is_some() {
            return self.promote(true);
        }
        self.resume()
    }

    pub fn pause(&mut self) -> bool {
        match &self.foreground {
            Some(slot) => {
                slot.producer.set_paused(true);
                true
            }
            None => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        match &self.foreground {
            Some(slot) => {
                slot.producer.set_paused(false);
                true
            }
            None => false,
        }
    }

    /// STOP: drop the foreground, cutting any running transition. The
    /// background stays loaded.
    pub fn stop(&mut self) -> bool {
        let stopped = self.foreground.take().is_some();
        drop(self.transitioner.take_sources());
        self.outgoing.clear();
        while self.events.try_recv().is_ok() {}
        if stopped {
            debug!(layer = self.index, "stopped");
        }
        stopped
    }

    /// CLEAR: drop foreground and background.
    pub fn clear(&mut self) -> bool {
        self.stop();
        self.background = None;
        debug!(layer = self.index, "cleared");
        true
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                TransitionEvent::TransitionEnd { source_id } => {
                    self.outgoing.retain(|slot| slot.source_id() != source_id);
                }
                TransitionEvent::AllEnd => {
                    if let Some(slot) = self.foreground.take() {
                        info!(layer = self.index, source_id = slot.source_id(), "foreground ended");
                    }
                    self.outgoing.clear();
                    if self.background.as_ref().is_some_and(|slot| slot.autoplay) {
                        self.promote(true);
                    }
                }
            }
        }
    }

    /// The layer's frame for channel tick `tick`.
    pub async fn tick(&mut self, tick: i64) -> Result<LayerFrame> {
        let frame = self.transitioner.tick(tick).await?;
        self.drain_events();
        Ok(frame)
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        drop(self.transitioner.take_sources());
    }
}
