//! Colour bars and line-up tone.
//!
//! `bars?format=v210&fields=2&fps=25&size=1280x720`. Every query key is
//! optional; missing ones follow the channel.

use super::synthetic::{Picture, SyntheticProducer, SyntheticSpec, Tone};
use super::{Producer, SourceUrl};
use crate::context::ChannelContext;
use crate::params::LoadParams;
use stagecast_color::{gamma_to_linear, ColorSpace};
use stagecast_core::{AudioFormat, FrameRate, PixelFormat, Result, StageError, VideoFormat};

/// 75% bars, left to right.
const BARS: [[f64; 3]; 7] = [
    [0.75, 0.75, 0.75],
    [0.75, 0.75, 0.0],
    [0.0, 0.75, 0.75],
    [0.0, 0.75, 0.0],
    [0.75, 0.0, 0.75],
    [0.75, 0.0, 0.0],
    [0.0, 0.0, 0.75],
];

/// -20 dBFS
const TONE: Tone = Tone {
    frequency: 1000.0,
    amplitude: 0.1,
};

fn parse_rate(s: &str) -> Option<FrameRate> {
    let rate = match s {
        "23.98" | "23.976" => FrameRate::new(24000, 1001),
        "29.97" => FrameRate::FPS_29_97,
        "59.94" => FrameRate::FPS_59_94,
        _ => match s.split_once('/') {
            Some((n, d)) => FrameRate::new(n.parse().ok()?, d.parse().ok()?),
            None => FrameRate::new(s.parse().ok()?, 1),
        },
    };
    (rate.numerator > 0 && rate.denominator > 0).then_some(rate)
}

fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once(['x', 'X'])?;
    let (w, h) = (w.parse().ok()?, h.parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

fn invalid(key: &str, value: &str) -> StageError {
    StageError::Config(format!("bars: bad {key} '{value}'"))
}

/// Native format of a bars source on a channel with `channel` format.
fn native_format(url: &SourceUrl<'_>, channel: &VideoFormat) -> Result<VideoFormat> {
    let mut format = channel.clone();
    if let Some(size) = url.get("size") {
        let (w, h) = parse_size(size).ok_or_else(|| invalid("size", size))?;
        format.width = w;
        format.height = h;
        format.square_width = w;
        format.square_height = h;
    }
    if let Some(fields) = url.get("fields") {
        format.fields = match fields {
            "1" => 1,
            "2" => 2,
            other => return Err(invalid("fields", other)),
        };
    }
    if let Some(fps) = url.get("fps") {
        let rate = parse_rate(fps).ok_or_else(|| invalid("fps", fps))?;
        format.timescale = rate.numerator;
        format.duration = rate.denominator;
    }
    format.name = format!(
        "bars {}x{}{}{}",
        format.width,
        format.height,
        if format.fields == 2 { "i" } else { "p" },
        format.frame_rate()
    );
    Ok(format)
}

/// Canonical bars image: seven bars over the top two thirds, a grey ramp
/// below.
fn bars_image(width: usize, height: usize, channel: ColorSpace) -> Vec<f32> {
    let transfer = channel.transfer();
    let linear = |v: f64| gamma_to_linear(&transfer, v) as f32;
    let split = height * 2 / 3;
    let mut image = Vec::with_capacity(width * height * 4);
    for y in 0..height {
        for x in 0..width {
            let rgb = if y < split {
                BARS[(x * BARS.len() / width).min(BARS.len() - 1)].map(linear)
            } else {
                let v = linear(x as f64 / (width.max(2) - 1) as f64);
                [v, v, v]
            };
            image.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 1.0]);
        }
    }
    image
}

pub fn bars_factory(params: &LoadParams, ctx: &ChannelContext) -> Result<Box<dyn Producer>> {
    let url = SourceUrl::parse(&params.url);
    if !url.name.eq_ignore_ascii_case("bars") {
        return Err(StageError::InvalidProducer(params.url.clone()));
    }
    let wire = match url.get("format") {
        Some(name) => name.parse::<PixelFormat>()?,
        None => PixelFormat::V210,
    };
    let format = native_format(&url, &ctx.format)?;
    let channels = params.audio_channels()?.unwrap_or(2);
    let image = bars_image(format.width as usize, format.height as usize, ctx.colour_space);
    let spec = SyntheticSpec {
        kind: "bars",
        wire,
        wire_space: ctx.colour_space,
        audio: AudioFormat::new(ctx.format.audio_sample_rate, channels),
        picture: Picture::Pattern {
            image,
            marker: true,
        },
        tone: Some(TONE),
        format,
    };
    Ok(Box::new(SyntheticProducer::new(spec)))
}
