//! End-to-end channel tests: producer through layer, combiner and capture.

use stagecast_channel::{CaptureConsumer, CapturedFrame, Channel, ChannelConfig, ChannelHandle, LoadParams, ProducerRegistry};
use stagecast_core::limits::AV_SYNC_TOLERANCE;
use stagecast_core::PixelFormat;
use stagecast_gpu::{HostDevice, JobQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn start(format: &str) -> (ChannelHandle, JoinHandle<()>) {
    let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
    let channel = Channel::new(1, &ChannelConfig::new(format), queue, Arc::new(ProducerRegistry::default())).unwrap();
    channel.spawn(false)
}

async fn collect(frames: crossbeam_channel::Receiver<CapturedFrame>, count: usize) -> Vec<CapturedFrame> {
    tokio::task::spawn_blocking(move || {
        (0..count)
            .map(|_| frames.recv_timeout(Duration::from_secs(30)).unwrap())
            .collect()
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loadbg_play_reaches_consumer_in_sync() {
    let (channel, task) = start("1080p5000");
    let (consumer, frames) = CaptureConsumer::new(PixelFormat::Rgba8, None, 8);
    assert!(channel.add_consumer(Box::new(consumer)).await);

    assert!(channel.load_source(LoadParams::new(10, "#FF0000")).await);
    assert!(channel.play(10).await);
    assert!(channel.step(3).await);

    let frames = collect(frames, 3).await;
    for (tick, captured) in frames.iter().enumerate() {
        let frame = &captured.frame;
        assert_eq!(frame.timestamp, tick as i64);
        assert_eq!((frame.width, frame.height), (1920, 1080));
        let px = &frame.planes[0].data[..4];
        assert!(px[0] >= 250 && px[1] <= 5 && px[2] <= 5 && px[3] == 255, "{px:?}");

        assert_eq!(captured.audio.len(), 1);
        let audio = &captured.audio[0];
        assert_eq!(audio.nb_samples(), 960);
        assert_eq!(audio.format.channels, 8);
        let video_seconds = frame.timestamp as f64 / 50.0;
        assert!((audio.pts_seconds() - video_seconds).abs() <= AV_SYNC_TOLERANCE);
    }

    assert!(channel.shutdown().await);
    task.await.unwrap();
}

#[tokio::test]
async fn clear_is_idempotent() {
    let (channel, task) = start("720p5000");
    assert!(channel.load_source(LoadParams::new(3, "black")).await);
    assert!(channel.play(3).await);
    assert!(channel.step(1).await);

    assert!(channel.clear(3).await);
    assert!(channel.layer_state(3).await.is_none());
    assert!(channel.clear(3).await);
    assert!(channel.layer_state(3).await.is_none());
    assert!(!channel.stop(3).await);
    assert!(channel.step(1).await);

    assert!(channel.shutdown().await);
    task.await.unwrap();
}

#[tokio::test]
async fn stopped_channel_rejects_commands() {
    let (channel, task) = start("720p5000");
    assert!(channel.shutdown().await);
    task.await.unwrap();
    assert!(!channel.load_source(LoadParams::new(1, "black")).await);
    assert!(!channel.step(1).await);
    assert!(channel.layer_state(1).await.is_none());
}

#[tokio::test]
async fn consumer_sees_end_of_stream_on_shutdown() {
    let (channel, task) = start("720p5000");
    let (consumer, frames) = CaptureConsumer::new(PixelFormat::Bgra8, None, 4);
    assert!(channel.add_consumer(Box::new(consumer)).await);
    assert!(channel.step(1).await);
    assert!(channel.shutdown().await);
    task.await.unwrap();

    let received = tokio::task::spawn_blocking(move || frames.iter().count())
        .await
        .unwrap();
    assert_eq!(received, 1);
}
