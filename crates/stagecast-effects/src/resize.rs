//! Bilinear remap between canonical images of different sizes.

use crate::process::ImageProcess;
use crate::view::{par_rows, Edge, ImageView};
use serde::{Deserialize, Serialize};
use stagecast_core::{Result, StageError};
use stagecast_gpu::{ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;

/// Placement of the source in the destination, in normalised coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResizeGeometry {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Default for ResizeGeometry {
    fn default() -> Self {
        Self {
            scale: [1.0, 1.0],
            offset: [0.0, 0.0],
            flip_h: false,
            flip_v: false,
        }
    }
}

struct ResizeKernel;

impl Kernel for ResizeKernel {
    fn name(&self) -> &str {
        "resize"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let input = args.get_buffer("input")?;
        let output = args.get_buffer("output")?;
        let g = args.get_floats("geometry")?;
        let [sx, sy, ox, oy, fh, fv] = match g {
            [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
            _ => return Err(StageError::Config("resize geometry needs 6 values".into())),
        };

        let src = input.read()?;
        let view = ImageView::new(&src, input.width(), input.height())?;
        let (dw, dh) = (output.width(), output.height());
        let (sw, sh) = (view.width() as f32, view.height() as f32);
        let mut out = output.write()?;
        par_rows(&mut out, dw, dh, |y, row| {
            let mut v = ((y as f32 + 0.5) / dh as f32 - oy) / sy;
            if fv != 0.0 {
                v = 1.0 - v;
            }
            for (x, px) in row.iter_mut().enumerate() {
                let mut u = ((x as f32 + 0.5) / dw as f32 - ox) / sx;
                if fh != 0.0 {
                    u = 1.0 - u;
                }
                *px = view.bilinear(u * sw - 0.5, v * sh - 0.5, Edge::Clamp);
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResizeParams {
    pub input: ImageBuffer,
    pub output: ImageBuffer,
    pub geometry: ResizeGeometry,
}

pub struct Resize {
    kernel: Arc<ResizeKernel>,
}

impl Resize {
    pub fn new() -> Self {
        Self {
            kernel: Arc::new(ResizeKernel),
        }
    }
}

impl Default for Resize {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcess for Resize {
    type Params = ResizeParams;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, params: &ResizeParams) -> Result<KernelArgs> {
        let g = &params.geometry;
        if g.scale[0] == 0.0 || g.scale[1] == 0.0 {
            return Err(StageError::Config("resize scale must be non-zero".into()));
        }
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Ok(KernelArgs::new()
            .buffer("input", &params.input)
            .buffer("output", &params.output)
            .floats(
                "geometry",
                [g.scale[0], g.scale[1], g.offset[0], g.offset[1], flag(g.flip_h), flag(g.flip_v)],
            ))
    }
}
