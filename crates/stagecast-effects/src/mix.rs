//! Linear dissolve of two images.

use crate::process::ImageProcess;
use crate::view::{lerp, par_rows, ImageView};
use stagecast_core::{Result, StageError};
use stagecast_gpu::{ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;

/// Check that every input has the output's geometry.
pub(crate) fn check_geometry(kernel: &str, inputs: &[ImageBuffer], output: &ImageBuffer) -> Result<()> {
    for input in inputs {
        if input.width() != output.width() || input.height() != output.height() {
            return Err(StageError::Config(format!(
                "{kernel}: input '{}' is {}x{}, output is {}x{}",
                input.label(),
                input.width(),
                input.height(),
                output.width(),
                output.height()
            )));
        }
    }
    Ok(())
}

pub(crate) fn pair<'a>(kernel: &str, inputs: &'a [ImageBuffer]) -> Result<(&'a ImageBuffer, &'a ImageBuffer)> {
    match inputs {
        [a, b] => Ok((a, b)),
        _ => Err(StageError::Config(format!(
            "{kernel} needs exactly 2 inputs, got {}",
            inputs.len()
        ))),
    }
}

struct MixKernel;

impl Kernel for MixKernel {
    fn name(&self) -> &str {
        "mix"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let (in0, in1) = pair("mix", args.get_buffers("inputs")?)?;
        let output = args.get_buffer("output")?;
        let mix = args.get_float("mix")?;

        let (a, b) = (in0.read()?, in1.read()?);
        let (w, h) = (output.width(), output.height());
        let (a, b) = (ImageView::new(&a, w, h)?, ImageView::new(&b, w, h)?);
        let mut out = output.write()?;
        par_rows(&mut out, w, h, |y, row| {
            for (px, (p0, p1)) in row.iter_mut().zip(a.row(y).iter().zip(b.row(y))) {
                // out = in0 * mix + in1 * (1 - mix)
                *px = lerp(*p1, *p0, mix);
            }
        })
    }
}

/// Parameters for one dissolve.
#[derive(Debug, Clone)]
pub struct MixParams {
    pub inputs: [ImageBuffer; 2],
    pub output: ImageBuffer,
    /// Weight of `inputs[0]`.
    pub mix: f32,
}

pub struct Mix {
    kernel: Arc<MixKernel>,
}

impl Mix {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(MixKernel),
        }
    }
}

impl Default for Mix {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcess for Mix {
    type Params = MixParams;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, params: &MixParams) -> Result<KernelArgs> {
        check_geometry("mix", &params.inputs, &params.output)?;
        Ok(KernelArgs::new()
            .buffers("inputs", &params.inputs)
            .buffer("output", &params.output)
            .float("mix", params.mix.clamp(0.0, 1.0)))
    }
}
