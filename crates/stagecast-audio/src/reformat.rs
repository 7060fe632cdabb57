//! Channel layout and sample rate conversion into the channel format.

use stagecast_core::{AudioFormat, AudioFrame, Result, StageError};
use tracing::debug;

/// How input channels map onto output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    Identity,
    /// Mono copied to every output channel.
    FanOut,
    /// Even inputs summed into left, odd into right.
    FoldStereo,
    /// Input channel `c` to output `c`; extra outputs silent.
    Truncate,
}

impl ChannelMap {
    pub fn between(input: u32, output: u32) -> Self {
        match (input, output) {
            (i, o) if i == o => Self::Identity,
            (1, _) => Self::FanOut,
            (i, 2) if i > 2 => Self::FoldStereo,
            _ => Self::Truncate,
        }
    }

    fn remap(self, input: &[f32], output: &mut [f32]) {
        match self {
            Self::Identity => output.copy_from_slice(input),
            Self::FanOut => output.fill(input[0]),
            Self::FoldStereo => {
                let pairs = input.len().div_ceil(2) as f32;
                output[0] = input.iter().step_by(2).sum::<f32>() / pairs;
                output[1] = input.iter().skip(1).step_by(2).sum::<f32>() / pairs;
            }
            Self::Truncate => {
                for (c, out) in output.iter_mut().enumerate() {
                    *out = input.get(c).copied().unwrap_or(0.0);
                }
            }
        }
    }
}

/// Linear-interpolating resampler state carried between frames.
#[derive(Debug, Clone)]
struct Resampler {
    /// Input samples advanced per output sample.
    step: f64,
    /// Position of the next output sample relative to the start of the next
    /// input block; -1 is the last sample of the previous block.
    pos: f64,
    last: Vec<f32>,
}

impl Resampler {
    fn new(input_rate: u32, output_rate: u32, channels: usize) -> Self {
        Self {
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
            last: vec![0.0; channels],
        }
    }

    fn process(&mut self, input: &[f32], channels: usize, output: &mut Vec<f32>) {
        let n = input.len() / channels;
        if n == 0 {
            return;
        }
        let sample = |i: isize, c: usize, last: &[f32]| {
            if i < 0 {
                last[c]
            } else {
                input[i as usize * channels + c]
            }
        };
        let mut p = self.pos;
        while (p.floor() as isize) + 1 < n as isize {
            let i = p.floor() as isize;
            let t = (p - p.floor()) as f32;
            for c in 0..channels {
                let a = sample(i, c, &self.last);
                let b = sample(i + 1, c, &self.last);
                output.push(a + (b - a) * t);
            }
            p += self.step;
        }
        self.pos = p - n as f64;
        self.last.copy_from_slice(&input[(n - 1) * channels..n * channels]);
    }
}

/// Converts one source's audio into the channel's sample rate and layout.
#[derive(Debug, Clone)]
pub struct Reformat {
    input: AudioFormat,
    output: AudioFormat,
    map: ChannelMap,
    resampler: Option<Resampler>,
    next_pts: Option<i64>,
}

impl Reformat {
    pub fn new(input: AudioFormat, output: AudioFormat) -> Result<Self> {
        if input.channels == 0 || output.channels == 0 || input.sample_rate == 0 || output.sample_rate == 0 {
            return Err(StageError::Config(format!(
                "cannot reformat {}Hz/{}ch to {}Hz/{}ch",
                input.sample_rate, input.channels, output.sample_rate, output.channels
            )));
        }
        let map = ChannelMap::between(input.channels, output.channels);
        let resampler = (input.sample_rate != output.sample_rate)
            .then(|| Resampler::new(input.sample_rate, output.sample_rate, output.channels as usize));
        debug!(?input, ?output, ?map, resample = resampler.is_some(), "audio reformat");
        Ok(Self {
            input,
            output,
            map,
            resampler,
            next_pts: None,
        })
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    pub fn process(&mut self, frame: &AudioFrame) -> Result<AudioFrame> {
        if frame.format != self.input {
            return Err(StageError::Config(format!(
                "reformat built for {:?} got {:?}",
                self.input, frame.format
            )));
        }
        let (in_ch, out_ch) = (self.input.channels as usize, self.output.channels as usize);
        let mut remapped = vec![0.0; frame.nb_samples() * out_ch];
        for (src, dst) in frame.samples.chunks_exact(in_ch).zip(remapped.chunks_exact_mut(out_ch)) {
            self.map.remap(src, dst);
        }

        let Some(resampler) = self.resampler.as_mut() else {
            let mut out = AudioFrame::new(self.output, frame.pts, remapped);
            out.muted = frame.muted;
            return Ok(out);
        };

        let pts = *self.next_pts.get_or_insert_with(|| {
            frame.pts * self.output.sample_rate as i64 / self.input.sample_rate as i64
        });
        let mut samples = Vec::with_capacity(remapped.len() * self.output.sample_rate as usize / self.input.sample_rate as usize + out_ch);
        resampler.process(&remapped, out_ch, &mut samples);
        let mut out = AudioFrame::new(self.output, pts, samples);
        out.muted = frame.muted;
        self.next_pts = Some(pts + out.nb_samples() as i64);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_fans_out() {
        let mut r = Reformat::new(AudioFormat::new(48000, 1), AudioFormat::new(48000, 8)).unwrap();
        let out = r.process(&AudioFrame::new(AudioFormat::new(48000, 1), 5, vec![0.25, 0.5])).unwrap();
        assert_eq!(out.nb_samples(), 2);
        assert_eq!(out.pts, 5);
        assert!(out.samples[..8].iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_stereo_into_eight() {
        let mut r = Reformat::new(AudioFormat::new(48000, 2), AudioFormat::new(48000, 8)).unwrap();
        let out = r.process(&AudioFrame::new(AudioFormat::new(48000, 2), 0, vec![0.1, 0.2])).unwrap();
        assert_eq!(out.samples, vec![0.1, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fold_to_stereo() {
        let mut out = [0.0; 2];
        ChannelMap::FoldStereo.remap(&[1.0, 0.0, 0.0, 1.0], &mut out);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn test_resample_keeps_rate_across_frames() {
        let fmt_in = AudioFormat::new(44100, 2);
        let mut r = Reformat::new(fmt_in, AudioFormat::new(48000, 2)).unwrap();
        let mut produced = 0;
        for i in 0..100 {
            let frame = AudioFrame::new(fmt_in, i * 441, vec![0.5; 441 * 2]);
            let out = r.process(&frame).unwrap();
            if i == 0 {
                assert_eq!(out.pts, 0);
            }
            assert_eq!(out.pts, produced);
            assert!(out.samples.iter().all(|s| (s - 0.5).abs() < 1e-6));
            produced += out.nb_samples() as i64;
        }
        // one second of input, within one sample of the output rate
        assert!((produced - 48000).abs() <= 1, "{produced}");
    }

    #[test]
    fn test_wrong_input_format_rejected() {
        let mut r = Reformat::new(AudioFormat::new(48000, 2), AudioFormat::new(48000, 2)).unwrap();
        assert!(r.process(&AudioFrame::new(AudioFormat::new(44100, 2), 0, vec![])).is_err());
    }
}
