//! Hard horizontal cut between two images.

use crate::mix::{check_geometry, pair};
use crate::process::ImageProcess;
use crate::view::{par_rows, ImageView};
use stagecast_core::Result;
use stagecast_gpu::{ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;

struct WipeKernel;

impl Kernel for WipeKernel {
    fn name(&self) -> &str {
        "wipe"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let (in0, in1) = pair("wipe", args.get_buffers("inputs")?)?;
        let output = args.get_buffer("output")?;
        let fraction = args.get_float("wipe")?;

        let (a, b) = (in0.read()?, in1.read()?);
        let (w, h) = (output.width(), output.height());
        let (a, b) = (ImageView::new(&a, w, h)?, ImageView::new(&b, w, h)?);
        let edge = w as f32 * fraction;
        let mut out = output.write()?;
        par_rows(&mut out, w, h, |y, row| {
            let (r0, r1) = (a.row(y), b.row(y));
            for (x, px) in row.iter_mut().enumerate() {
                *px = if (x as f32) < edge { r1[x] } else { r0[x] };
            }
        })
    }
}

/// Parameters for one wipe: `inputs[1]` fills the left `wipe` fraction.
#[derive(Debug, Clone)]
pub struct WipeParams {
    pub inputs: [ImageBuffer; 2],
    pub output: ImageBuffer,
    pub wipe: f32,
}

pub struct Wipe {
    kernel: Arc<WipeKernel>,
}

impl Wipe {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(WipeKernel),
        }
    }
}

impl Default for Wipe {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcess for Wipe {
    type Params = WipeParams;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, params: &WipeParams) -> Result<KernelArgs> {
        check_geometry("wipe", &params.inputs, &params.output)?;
        Ok(KernelArgs::new()
            .buffers("inputs", &params.inputs)
            .buffer("output", &params.output)
            .float("wipe", params.wipe.clamp(0.0, 1.0)))
    }
}
