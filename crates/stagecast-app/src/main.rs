//! Stagecast - real-time video channel server
//!
//! Entry point: loads the server config, builds the channels and runs them
//! until ctrl-c.

mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use stagecast_channel::{CaptureConsumer, CapturedFrame, Channel, ChannelHandle, ProducerRegistry};
use stagecast_core::limits::BUFFER_POOL_BUDGET;
use stagecast_gpu::{HostDevice, JobQueue};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    config: Option<PathBuf>,
    /// Run this many ticks per channel and exit.
    frames: Option<u32>,
}

/// `stagecast [config.json] [frames]`
fn parse_args() -> Result<Args> {
    let frames = match std::env::args().nth(2) {
        Some(value) => Some(value.parse().with_context(|| format!("bad frame count '{value}'"))?),
        None => None,
    };
    Ok(Args {
        config: std::env::args().nth(1).map(PathBuf::from),
        frames,
    })
}

/// Log what a capture consumer delivers until its channel stops.
fn drain_capture(channel: u32, frames: crossbeam_channel::Receiver<CapturedFrame>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut count = 0u64;
        for captured in frames {
            count += 1;
            debug!(
                channel,
                timestamp = captured.frame.timestamp,
                format = %captured.frame.format,
                bytes = captured.frame.memory_size(),
                "frame captured"
            );
        }
        info!(channel, frames = count, "capture drained");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    info!(channels = config.channels.len(), realtime = config.realtime, "Stagecast starting...");

    let queue = JobQueue::spawn(Arc::new(HostDevice::with_pool_budget(BUFFER_POOL_BUDGET)));
    let registry = Arc::new(ProducerRegistry::default());
    let realtime = config.realtime && args.frames.is_none();

    let mut handles: Vec<ChannelHandle> = Vec::new();
    let mut tasks = Vec::new();
    let mut drains = Vec::new();
    for (i, channel_config) in config.channels.iter().enumerate() {
        let index = i as u32 + 1;
        let mut channel = Channel::new(index, channel_config, queue.clone(), registry.clone())
            .with_context(|| format!("creating channel {index}"))?;
        for consumer_config in &channel_config.consumers {
            let (consumer, frames) = CaptureConsumer::from_config(consumer_config);
            channel
                .add_consumer(Box::new(consumer))
                .with_context(|| format!("channel {index} consumer"))?;
            drains.push(drain_capture(index, frames));
        }
        for params in &channel_config.startup {
            if !channel.load(params) {
                warn!(channel = index, layer = params.layer, url = %params.url, "startup load failed");
            }
        }
        let (handle, task) = channel.spawn(realtime);
        handles.push(handle);
        tasks.push(task);
    }

    match args.frames {
        Some(frames) => {
            for handle in &handles {
                if !handle.step(frames).await {
                    warn!(channel = handle.index(), frames, "step failed");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down");
        }
    }

    for handle in &handles {
        handle.shutdown().await;
    }
    for task in tasks {
        task.await.context("channel task panicked")?;
    }
    drop(handles);
    for drain in drains {
        if drain.join().is_err() {
            warn!("capture drain panicked");
        }
    }
    info!("Stagecast stopped");
    Ok(())
}
