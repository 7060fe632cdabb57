//! Stagecast Audio - per-source audio graph pieces
//!
//! - `Reformat`: channel remap and sample-rate conversion into the channel format
//! - `GainStage`: volume, pan and mute
//! - `AMix`: N-input mixer used by transitions and the channel combiner

pub mod amix;
pub mod gain;
pub mod reformat;

pub use amix::AMix;
pub use gain::GainStage;
pub use reformat::{ChannelMap, Reformat};
