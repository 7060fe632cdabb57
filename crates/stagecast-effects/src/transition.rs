//! Two-input dissolve or wipe, optionally shaped by a mask.

use crate::mix::{check_geometry, pair};
use crate::process::ImageProcess;
use crate::view::{lerp, par_rows, ImageView};
use serde::{Deserialize, Serialize};
use stagecast_core::Result;
use stagecast_gpu::{ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;

/// How a layer changes from one source to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    #[default]
    Cut,
    Dissolve,
    Wipe,
}

struct TransitionKernel;

impl Kernel for TransitionKernel {
    fn name(&self) -> &str {
        "transition"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let (from, to) = pair("transition", args.get_buffers("inputs")?)?;
        let output = args.get_buffer("output")?;
        let progress = args.get_float("progress")?;
        let wipe = args.get_uint("wipe")? != 0;
        let (w, h) = (output.width(), output.height());

        let (a, b) = (from.read()?, to.read()?);
        let (a, b) = (ImageView::new(&a, w, h)?, ImageView::new(&b, w, h)?);
        let mask_guard = match args.get_buffers("mask")?.first() {
            Some(mask) => Some((mask.read()?, mask.width(), mask.height())),
            None => None,
        };
        let mask = match &mask_guard {
            Some((data, mw, mh)) => Some(ImageView::new(data, *mw, *mh)?),
            None => None,
        };

        let mut out = output.write()?;
        par_rows(&mut out, w, h, |y, row| {
            let (r0, r1) = (a.row(y), b.row(y));
            for (x, px) in row.iter_mut().enumerate() {
                *px = if !wipe {
                    lerp(r0[x], r1[x], progress)
                } else {
                    let shown = match &mask {
                        Some(m) => {
                            let mx = (x * m.width() / w as usize).min(m.width() - 1);
                            let my = (y * m.height() / h as usize).min(m.height() - 1);
                            m.pixel(mx, my)[0] < progress
                        }
                        None => (x as f32) < w as f32 * progress,
                    };
                    if shown {
                        r1[x]
                    } else {
                        r0[x]
                    }
                };
            }
        })
    }
}

/// One transition frame from `inputs[0]` (outgoing) to `inputs[1]`.
#[derive(Debug, Clone)]
pub struct TransitionParams {
    pub inputs: Vec<ImageBuffer>,
    pub output: ImageBuffer,
    pub kind: TransitionType,
    /// 0 shows only the outgoing input, 1 only the incoming.
    pub progress: f32,
    /// Where the incoming side shows during a wipe: `mask.r < progress`.
    pub mask: Option<ImageBuffer>,
}

pub struct Transition {
    kernel: Arc<TransitionKernel>,
}

impl Transition {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(TransitionKernel),
        }
    }
}

impl Default for Transition {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcess for Transition {
    type Params = TransitionParams;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, params: &TransitionParams) -> Result<KernelArgs> {
        pair("transition", &params.inputs)?;
        check_geometry("transition", &params.inputs, &params.output)?;
        // a cut is a wipe that has either not started or already finished
        let (wipe, progress) = match params.kind {
            TransitionType::Cut => (true, if params.progress >= 1.0 { 1.0 } else { 0.0 }),
            TransitionType::Dissolve => (false, params.progress.clamp(0.0, 1.0)),
            TransitionType::Wipe => (true, params.progress.clamp(0.0, 1.0)),
        };
        let mask: Vec<ImageBuffer> = params.mask.iter().cloned().collect();
        Ok(KernelArgs::new()
            .buffers("inputs", &params.inputs)
            .buffer("output", &params.output)
            .buffers("mask", &mask)
            .float("progress", progress)
            .uint("wipe", u32::from(wipe)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::tests::{filled, run};
    use stagecast_core::StageError;
    use stagecast_gpu::HostDevice;

    fn params(device: &HostDevice, kind: TransitionType, progress: f32) -> TransitionParams {
        TransitionParams {
            inputs: vec![filled(device, 4, 2, [1.0; 4]), filled(device, 4, 2, [0.0, 0.0, 0.0, 1.0])],
            output: filled(device, 4, 2, [0.5; 4]),
            kind,
            progress,
            mask: None,
        }
    }

    #[test]
    fn test_dissolve_progress() {
        let device = HostDevice::new();
        let p = params(&device, TransitionType::Dissolve, 0.25);
        run(&Transition::new(), &p).unwrap();
        assert_eq!(&p.output.read().unwrap()[..4], &[0.75, 0.75, 0.75, 1.0]);
    }

    #[test]
    fn test_masked_wipe() {
        let device = HostDevice::new();
        let mut p = params(&device, TransitionType::Wipe, 0.5);
        let mask = filled(&device, 2, 1, [0.0; 4]);
        mask.write().unwrap()[4] = 1.0;
        p.mask = Some(mask);
        run(&Transition::new(), &p).unwrap();
        let out = p.output.read().unwrap();
        let firsts: Vec<f32> = out[..16].chunks_exact(4).map(|px| px[0]).collect();
        // left half of the mask is below progress and shows the incoming side
        assert_eq!(firsts, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_cut_before_end_shows_outgoing() {
        let device = HostDevice::new();
        let p = params(&device, TransitionType::Cut, 0.9);
        run(&Transition::new(), &p).unwrap();
        assert!(p.output.read().unwrap().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_requires_two_inputs() {
        let device = HostDevice::new();
        let mut p = params(&device, TransitionType::Dissolve, 0.5);
        p.inputs.pop();
        assert!(matches!(Transition::new().kernel_params(&p), Err(StageError::Config(_))));
    }
}
