//! Solid colour producers.

use super::synthetic::{Picture, SyntheticProducer, SyntheticSpec};
use super::Producer;
use crate::context::ChannelContext;
use crate::params::LoadParams;
use stagecast_color::ColorSpace;
use stagecast_core::{AudioFormat, PixelFormat, Result, StageError};

/// Parse `#RRGGBB`, `#RRGGBBAA`, optionally behind `colour:` or `color:`.
/// Returns straight-alpha RGBA bytes.
pub fn parse_colour(url: &str) -> Option<[u8; 4]> {
    let url = url.trim();
    let body = url
        .strip_prefix("colour:")
        .or_else(|| url.strip_prefix("color:"))
        .unwrap_or(url)
        .trim();
    let hex = body.strip_prefix('#')?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
    Some([byte(0)?, byte(2)?, byte(4)?, alpha])
}

fn solid(kind: &'static str, rgba: [u8; 4], params: &LoadParams, ctx: &ChannelContext) -> Result<Box<dyn Producer>> {
    let channels = params.audio_channels()?.unwrap_or(2);
    let spec = SyntheticSpec {
        kind,
        format: ctx.format.clone(),
        wire: PixelFormat::Bgra8,
        wire_space: ColorSpace::Srgb,
        audio: AudioFormat::new(ctx.format.audio_sample_rate, channels),
        picture: Picture::Solid(rgba),
        tone: None,
    };
    Ok(Box::new(SyntheticProducer::new(spec)))
}

pub fn colour_factory(params: &LoadParams, ctx: &ChannelContext) -> Result<Box<dyn Producer>> {
    let rgba = parse_colour(&params.url)
        .ok_or_else(|| StageError::InvalidProducer(format!("'{}' is not a colour", params.url)))?;
    solid("colour", rgba, params, ctx)
}

pub fn black_factory(params: &LoadParams, ctx: &ChannelContext) -> Result<Box<dyn Producer>> {
    if !params.url.trim().eq_ignore_ascii_case("black") {
        return Err(StageError::InvalidProducer(params.url.clone()));
    }
    solid("black", [0, 0, 0, 255], params, ctx)
}
