//! Porter-Duff "over" composite of N layers.

use crate::mix::check_geometry;
use crate::process::ImageProcess;
use crate::view::{par_rows, ImageView, TRANSPARENT};
use smallvec::SmallVec;
use stagecast_core::{Result, StageError};
use stagecast_gpu::{ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;

struct CombineKernel;

impl Kernel for CombineKernel {
    fn name(&self) -> &str {
        "combine"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let inputs = args.get_buffers("inputs")?;
        let output = args.get_buffer("output")?;
        let (w, h) = (output.width(), output.height());

        let guards = inputs
            .iter()
            .map(ImageBuffer::read)
            .collect::<Result<SmallVec<[_; 8]>>>()?;
        let layers = guards
            .iter()
            .map(|g| ImageView::new(g, w, h))
            .collect::<Result<SmallVec<[_; 8]>>>()?;

        let mut out = output.write()?;
        par_rows(&mut out, w, h, |y, row| {
            for (x, px) in row.iter_mut().enumerate() {
                let mut acc = TRANSPARENT;
                for layer in &layers {
                    let src = layer.pixel(x, y);
                    let keep = 1.0 - src[3];
                    acc = std::array::from_fn(|c| acc[c] * keep + src[c]);
                }
                *px = acc;
            }
        })
    }
}

/// Layers bottom first.
#[derive(Debug, Clone)]
pub struct CombineParams {
    pub inputs: Vec<ImageBuffer>,
    pub output: ImageBuffer,
}

pub struct Combine {
    kernel: Arc<CombineKernel>,
}

impl Combine {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(CombineKernel),
        }
    }
}

impl Default for Combine {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcess for Combine {
    type Params = CombineParams;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, params: &CombineParams) -> Result<KernelArgs> {
        if params.inputs.is_empty() {
            return Err(StageError::Config("combine needs at least 1 input".into()));
        }
        check_geometry("combine", &params.inputs, &params.output)?;
        Ok(KernelArgs::new()
            .buffers("inputs", &params.inputs)
            .buffer("output", &params.output))
    }
}
