//! Transitions between real producers fed through their mixers.

use stagecast_channel::{
    ChannelContext, LoadParams, Mixer, MixerControl, Producer, ProducerRegistry, TransitionEvent, TransitionSource,
    Transitioner,
};
use stagecast_color::ColorSpace;
use stagecast_core::{FrameRate, VideoFormat};
use stagecast_effects::TransitionType;
use stagecast_gpu::{HostDevice, JobQueue};
use std::sync::Arc;

fn context() -> ChannelContext {
    let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
    ChannelContext::new(1, VideoFormat::progressive(8, 4, FrameRate::FPS_50), ColorSpace::Bt709, queue)
}

fn source(ctx: &ChannelContext, url: &str) -> (Box<dyn Producer>, TransitionSource) {
    let mut producer = ProducerRegistry::default()
        .create(&LoadParams::new(1, url), ctx)
        .unwrap();
    let video = producer.take_video().unwrap();
    let audio = producer.take_audio();
    let mixer = Mixer::new(
        ctx,
        producer.source_id(),
        producer.format(),
        producer.audio_format(),
        MixerControl::default(),
        None,
    )
    .unwrap();
    let (source, _task) = mixer.spawn(audio, video);
    (producer, source)
}

#[tokio::test]
async fn dissolve_ends_exactly_once() {
    let ctx = context();
    let (mut transitioner, events) = Transitioner::new(&ctx, 10);
    let (_white, white_source) = source(&ctx, "#FFFFFF");
    let white_id = white_source.id.clone();
    transitioner.update(TransitionType::Cut, 0, white_source);
    let first = transitioner.tick(0).await.unwrap();
    first.video.release().unwrap();
    while events.try_recv().is_ok() {}

    let (_black, black_source) = source(&ctx, "black");
    transitioner.update(TransitionType::Dissolve, 10, black_source);
    assert!(transitioner.is_transitioning());

    let mut mixes = Vec::new();
    for tick in 1..=12 {
        let frame = transitioner.tick(tick).await.unwrap();
        if let Some(mix) = frame.mix {
            mixes.push(mix);
        }
        assert!(frame.audio.pts >= 0);
        frame.video.release().unwrap();
    }
    assert_eq!(mixes.len(), 10);
    assert!(mixes.windows(2).all(|w| w[1] < w[0]));

    let ends: Vec<TransitionEvent> = events.try_iter().collect();
    assert_eq!(ends, vec![TransitionEvent::TransitionEnd { source_id: white_id }]);
    assert!(!transitioner.is_transitioning());
}

#[tokio::test]
async fn wipe_reveals_incoming_from_the_left() {
    let ctx = context();
    let (mut transitioner, _events) = Transitioner::new(&ctx, 10);
    let (_black, black_source) = source(&ctx, "black");
    transitioner.update(TransitionType::Cut, 0, black_source);
    transitioner.tick(0).await.unwrap().video.release().unwrap();

    let (_white, white_source) = source(&ctx, "#FFFFFF");
    transitioner.update(TransitionType::Wipe, 4, white_source);
    transitioner.tick(1).await.unwrap().video.release().unwrap();
    let frame = transitioner.tick(2).await.unwrap();
    {
        let data = frame.video.read().unwrap();
        // progress 0.25 after the first wipe frame: two of eight columns
        assert!(data[0] > 0.9);
        assert!(data[7 * 4] < 0.1);
    }
    frame.video.release().unwrap();
}
