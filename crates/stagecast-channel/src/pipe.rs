//! Bounded pipes between pipeline stages.
//!
//! A pipe carries [`Packet::Data`] items followed by exactly one
//! [`Packet::End`]. Capacity is [`PIPE_CAPACITY`], so a slow consumer holds
//! back its producer. Items still queued when the receiving side goes away
//! are discarded, which for image buffers means released.

use stagecast_core::limits::PIPE_CAPACITY;
use stagecast_core::{AudioFrame, Result, StageError};
use stagecast_gpu::ImageBuffer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// One item on a pipe, or the end-of-stream marker.
#[derive(Debug)]
pub enum Packet<T> {
    Data(T),
    End,
}

impl<T> Packet<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

/// What to do with an item nobody will receive.
pub trait Discard {
    fn discard(self);
}

impl Discard for ImageBuffer {
    fn discard(self) {
        let _ = self.release();
    }
}

impl Discard for AudioFrame {
    fn discard(self) {}
}

pub type VideoSender = PipeSender<ImageBuffer>;
pub type VideoReceiver = PipeReceiver<ImageBuffer>;
pub type AudioSender = PipeSender<AudioFrame>;
pub type AudioReceiver = PipeReceiver<AudioFrame>;

/// Create a pipe. `name` shows up in logs and errors.
pub fn pipe<T: Discard>(name: impl Into<Arc<str>>) -> (PipeSender<T>, PipeReceiver<T>) {
    let name = name.into();
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    (
        PipeSender {
            name: name.clone(),
            tx,
        },
        PipeReceiver {
            name,
            rx,
            ended: false,
        },
    )
}

pub struct PipeSender<T> {
    name: Arc<str>,
    tx: mpsc::Sender<Packet<T>>,
}

impl<T: Discard> PipeSender<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for room and queue `item`. When the receiver is gone the item is
    /// discarded and a [`StageError::Pipeline`] returned.
    pub async fn send(&self, item: T) -> Result<()> {
        match self.tx.send(Packet::Data(item)).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(packet)) => {
                if let Packet::Data(item) = packet {
                    item.discard();
                }
                Err(StageError::Pipeline(format!("pipe {} closed", self.name)))
            }
        }
    }

    /// Send the end marker. Consuming the sender makes a second end
    /// impossible.
    pub async fn end(self) {
        trace!(pipe = %self.name, "end of stream");
        let _ = self.tx.send(Packet::End).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct PipeReceiver<T: Discard> {
    name: Arc<str>,
    rx: mpsc::Receiver<Packet<T>>,
    ended: bool,
}

impl<T: Discard> PipeReceiver<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next packet. A dropped sender reads as [`Packet::End`], and every
    /// call after the end returns it again.
    pub async fn recv(&mut self) -> Packet<T> {
        if self.ended {
            return Packet::End;
        }
        match self.rx.recv().await {
            Some(Packet::Data(item)) => Packet::Data(item),
            Some(Packet::End) | None => {
                self.ended = true;
                Packet::End
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl<T: Discard> Drop for PipeReceiver<T> {
    fn drop(&mut self) {
        self.rx.close();
        let mut dropped = 0usize;
        while let Ok(packet) = self.rx.try_recv() {
            if let Packet::Data(item) = packet {
                item.discard();
                dropped += 1;
            }
        }
        if dropped > 0 {
            trace!(pipe = %self.name, dropped, "discarded queued items");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecast_gpu::{BufferDesc, ComputeDevice, HostDevice};
    use std::time::Duration;

    #[tokio::test]
    async fn test_data_then_end() {
        let (tx, mut rx) = pipe::<AudioFrame>("audio");
        let fmt = stagecast_core::AudioFormat::new(48000, 2);
        tx.send(AudioFrame::silence(fmt, 0, 4)).await.unwrap();
        tx.end().await;

        assert!(matches!(rx.recv().await, Packet::Data(f) if f.nb_samples() == 4));
        assert!(rx.recv().await.is_end());
        assert!(rx.recv().await.is_end());
        assert!(rx.is_ended());
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_end() {
        let (tx, mut rx) = pipe::<ImageBuffer>("video");
        drop(tx);
        assert!(rx.recv().await.is_end());
    }

    #[tokio::test]
    async fn test_bounded_capacity() {
        let device = HostDevice::new();
        let (tx, _rx) = pipe::<ImageBuffer>("video");
        for ts in 0..PIPE_CAPACITY as i64 {
            let buf = device.create_buffer(BufferDesc::image("f", 1, 1, ts)).unwrap();
            tx.send(buf).await.unwrap();
        }
        let extra = device.create_buffer(BufferDesc::image("f", 1, 1, 99)).unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(extra)).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_receiver_drop_releases_queued_buffers() {
        let device = HostDevice::new();
        let (tx, rx) = pipe::<ImageBuffer>("video");
        let a = device.create_buffer(BufferDesc::image("a", 1, 1, 0)).unwrap();
        let b = device.create_buffer(BufferDesc::image("b", 1, 1, 1)).unwrap();
        tx.send(a.clone()).await.unwrap();
        tx.send(b.clone()).await.unwrap();
        drop(rx);
        assert!(a.is_released());
        assert!(b.is_released());

        let c = device.create_buffer(BufferDesc::image("c", 1, 1, 2)).unwrap();
        assert!(tx.send(c.clone()).await.is_err());
        assert!(c.is_released());
        assert!(tx.is_closed());
    }
}
