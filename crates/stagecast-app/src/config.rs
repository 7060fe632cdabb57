//! Server configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagecast_channel::{ChannelConfig, ConsumerConfig, LoadParams};
use stagecast_core::PixelFormat;
use std::path::Path;

fn default_realtime() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Pace ticks by the wall clock. When off, channels only advance on
    /// explicit steps.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for ServerConfig {
    /// One 1080p50 channel playing colour bars into an RGBA capture.
    fn default() -> Self {
        let mut channel = ChannelConfig::new("1080p5000");
        channel.consumers.push(ConsumerConfig::Capture {
            pixel_format: PixelFormat::Rgba8,
            colour_space: None,
            capacity: 16,
        });
        let mut bars = LoadParams::new(10, "bars");
        bars.autoplay = true;
        channel.startup.push(bars);
        Self {
            channels: vec![channel],
            realtime: true,
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid server config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.channels.is_empty(), "no channels configured");
        for (i, channel) in self.channels.iter().enumerate() {
            channel
                .video_format()
                .with_context(|| format!("channel {}", i + 1))?;
        }
        Ok(())
    }
}
