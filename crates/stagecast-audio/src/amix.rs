//! N-input audio mixer.
//!
//! Each input has its own sample FIFO. A pull emits as many samples as the
//! shortest FIFO holds, summed and divided by the number of inputs.

use std::collections::VecDeque;

use stagecast_core::{AudioFormat, AudioFrame, Result, StageError};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct AMix {
    format: AudioFormat,
    fifos: Vec<VecDeque<f32>>,
    next_pts: Option<i64>,
}

impl AMix {
    pub fn new(format: AudioFormat, inputs: usize) -> Self {
        Self {
            format,
            fifos: vec![VecDeque::new(); inputs],
            next_pts: None,
        }
    }

    pub fn inputs(&self) -> usize {
        self.fifos.len()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Change the input count. Surviving inputs keep their queued samples.
    pub fn set_inputs(&mut self, inputs: usize) {
        if inputs != self.fifos.len() {
            trace!(from = self.fifos.len(), to = inputs, "amix inputs changed");
            self.fifos.resize_with(inputs, VecDeque::new);
        }
    }

    /// Samples per channel queued on `input`.
    pub fn queued(&self, input: usize) -> usize {
        self.fifos.get(input).map_or(0, |f| f.len() / self.format.channels.max(1) as usize)
    }

    pub fn push(&mut self, input: usize, frame: &AudioFrame) -> Result<()> {
        if frame.format != self.format {
            return Err(StageError::Config(format!(
                "amix expects {:?}, input {input} is {:?}",
                self.format, frame.format
            )));
        }
        let Some(fifo) = self.fifos.get_mut(input) else {
            return Err(StageError::Config(format!(
                "amix has {} inputs, no input {input}",
                self.fifos.len()
            )));
        };
        if self.next_pts.is_none() {
            self.next_pts = Some(frame.pts);
        }
        if frame.muted {
            fifo.resize(fifo.len() + frame.samples.len(), 0.0);
        } else {
            fifo.extend(frame.samples.iter().copied());
        }
        Ok(())
    }

    /// Mix what every input has ready, `None` if any input is empty.
    pub fn pull(&mut self) -> Option<AudioFrame> {
        let len = self.fifos.iter().map(VecDeque::len).min()?;
        if len == 0 {
            return None;
        }
        let scale = 1.0 / self.fifos.len() as f32;
        let mut samples = vec![0.0f32; len];
        for fifo in &mut self.fifos {
            for (out, s) in samples.iter_mut().zip(fifo.drain(..len)) {
                *out += s;
            }
        }
        samples.iter_mut().for_each(|s| *s *= scale);

        let pts = self.next_pts.unwrap_or(0);
        let frame = AudioFrame::new(self.format, pts, samples);
        self.next_pts = Some(pts + frame.nb_samples() as i64);
        Some(frame)
    }

    /// Push one frame per input and pull the mix.
    pub fn mix(&mut self, frames: &[AudioFrame]) -> Result<Option<AudioFrame>> {
        self.set_inputs(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            self.push(i, frame)?;
        }
        Ok(self.pull())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: AudioFormat = AudioFormat::new(48000, 2);

    #[test]
    fn test_shortest_input_wins() {
        let mut amix = AMix::new(FMT, 2);
        amix.push(0, &AudioFrame::new(FMT, 100, vec![1.0; 8])).unwrap();
        assert!(amix.pull().is_none());
        amix.push(1, &AudioFrame::new(FMT, 100, vec![0.5; 4])).unwrap();

        let out = amix.pull().unwrap();
        assert_eq!(out.pts, 100);
        assert_eq!(out.samples, vec![0.75; 4]);
        assert_eq!(amix.queued(0), 2);
        assert_eq!(amix.queued(1), 0);
    }

    #[test]
    fn test_single_input_passes_through() {
        let mut amix = AMix::new(FMT, 1);
        let out = amix.mix(&[AudioFrame::new(FMT, 0, vec![0.3, -0.3])]).unwrap().unwrap();
        assert_eq!(out.samples, vec![0.3, -0.3]);
    }

    #[test]
    fn test_muted_input_contributes_silence() {
        let mut amix = AMix::new(FMT, 2);
        let mut muted = AudioFrame::new(FMT, 0, vec![1.0; 2]);
        muted.muted = true;
        let out = amix
            .mix(&[AudioFrame::new(FMT, 0, vec![1.0; 2]), muted])
            .unwrap()
            .unwrap();
        assert_eq!(out.samples, vec![0.5, 0.5]);
    }

    #[test]
    fn test_pts_advances() {
        let mut amix = AMix::new(FMT, 1);
        amix.mix(&[AudioFrame::new(FMT, 960, vec![0.0; 1920])]).unwrap();
        let out = amix.mix(&[AudioFrame::new(FMT, 1920, vec![0.0; 1920])]).unwrap().unwrap();
        assert_eq!(out.pts, 1920);
    }

    #[test]
    fn test_format_mismatch() {
        let mut amix = AMix::new(FMT, 1);
        assert!(amix.push(0, &AudioFrame::new(AudioFormat::new(44100, 2), 0, vec![])).is_err());
        assert!(amix.push(3, &AudioFrame::new(FMT, 0, vec![])).is_err());
    }
}
