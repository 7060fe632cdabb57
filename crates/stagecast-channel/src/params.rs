//! Load parameters and mixer commands as the command layer hands them over.

use serde::{Deserialize, Serialize};
use stagecast_core::{Result, StageError};
use stagecast_effects::{TransitionType, YadifMode};
use std::str::FromStr;

/// Transition applied when a loaded source is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionSpec {
    #[serde(rename = "type", default)]
    pub kind: TransitionType,
    /// Length in channel ticks; 0 cuts.
    #[serde(default)]
    pub duration: u32,
}

impl TransitionSpec {
    pub fn new(kind: TransitionType, duration: u32) -> Self {
        Self { kind, duration }
    }
}

/// Everything a LOAD/LOADBG names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadParams {
    pub layer: u32,
    pub url: String,
    /// Promote to the foreground as soon as the layer has none.
    #[serde(default)]
    pub autoplay: bool,
    /// Show the first frame paused straight away (LOAD rather than LOADBG).
    #[serde(default)]
    pub preview: bool,
    #[serde(default)]
    pub transition: TransitionSpec,
    /// Deinterlace interlaced sources on a progressive channel.
    #[serde(default)]
    pub deinterlace: Option<YadifMode>,
    /// Audio layout of the source, e.g. `stereo` or `8ch`.
    #[serde(default)]
    pub channel_layout: Option<String>,
}

impl LoadParams {
    pub fn new(layer: u32, url: impl Into<String>) -> Self {
        Self {
            layer,
            url: url.into(),
            autoplay: false,
            preview: false,
            transition: TransitionSpec::default(),
            deinterlace: None,
            channel_layout: None,
        }
    }

    /// Parse the JSON the command layer forwards.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StageError::Serialization(e.to_string()))
    }

    pub fn with_transition(mut self, kind: TransitionType, duration: u32) -> Self {
        self.transition = TransitionSpec::new(kind, duration);
        self
    }

    /// Source audio channel count named by `channel_layout`, if any.
    pub fn audio_channels(&self) -> Result<Option<u32>> {
        self.channel_layout.as_deref().map(channel_count).transpose()
    }
}

/// Channel count of a named layout.
pub fn channel_count(layout: &str) -> Result<u32> {
    let lower = layout.trim().to_ascii_lowercase();
    let count = match lower.as_str() {
        "mono" => Some(1),
        "stereo" => Some(2),
        "quad" => Some(4),
        "5.1" => Some(6),
        other => other
            .strip_suffix("ch")
            .unwrap_or(other)
            .parse::<u32>()
            .ok()
            .filter(|n| (1..=64).contains(n)),
    };
    count.ok_or_else(|| StageError::Config(format!("unknown channel layout '{layout}'")))
}

/// A live mixer parameter change for one layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixerCommand {
    Anchor { x: f32, y: f32 },
    Fill { x: f32, y: f32, scale_x: f32, scale_y: f32 },
    Rotation(f32),
    Volume(f32),
}

impl MixerCommand {
    /// Parse a command name and its parameter list, e.g.
    /// `("FILL", ["0.25", "0.25", "0.5", "0.5"])`.
    pub fn parse(name: &str, params: &[&str]) -> Result<Self> {
        let numbers = params
            .iter()
            .map(|p| {
                p.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| StageError::Config(format!("{name}: '{p}' is not a number")))
            })
            .collect::<Result<Vec<f32>>>()?;

        let expect = |n: usize| -> Result<()> {
            if numbers.len() == n {
                Ok(())
            } else {
                Err(StageError::Config(format!(
                    "{name} takes {n} parameters, got {}",
                    numbers.len()
                )))
            }
        };

        match name.to_ascii_uppercase().as_str() {
            "ANCHOR" => {
                expect(2)?;
                Ok(Self::Anchor { x: numbers[0], y: numbers[1] })
            }
            "FILL" => {
                expect(4)?;
                Ok(Self::Fill {
                    x: numbers[0],
                    y: numbers[1],
                    scale_x: numbers[2],
                    scale_y: numbers[3],
                })
            }
            "ROTATION" => {
                expect(1)?;
                Ok(Self::Rotation(numbers[0]))
            }
            "VOLUME" => {
                expect(1)?;
                if numbers[0] < 0.0 {
                    return Err(StageError::Config("VOLUME must not be negative".into()));
                }
                Ok(Self::Volume(numbers[0]))
            }
            other => Err(StageError::Config(format!("unknown mixer command '{other}'"))),
        }
    }
}

impl FromStr for MixerCommand {
    type Err = StageError;

    /// `"ANCHOR 0.5 0.5"`
    fn from_str(s: &str) -> Result<Self> {
        let mut words = s.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| StageError::Config("empty mixer command".into()))?;
        let params: Vec<&str> = words.collect();
        Self::parse(name, &params)
    }
}
