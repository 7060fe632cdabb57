//! Affine reposition of a layer into the channel raster.
//!
//! Coordinates are normalised to the unit square of each image. The forward
//! matrix maps source to destination; the kernel samples through its
//! inverse, which lives in a 9-float device buffer that is only re-uploaded
//! after a parameter change.

use crate::process::ImageProcess;
use crate::view::{par_rows, Edge, ImageView, TRANSPARENT};
use glam::{Mat3, Vec2};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stagecast_core::{Result, StageError};
use stagecast_gpu::{BufferDesc, ComputeDevice, ImageBuffer, Kernel, KernelArgs};
use std::sync::Arc;
use tracing::trace;

/// Layer placement parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Point of the source pinned to the fill translation.
    pub anchor: [f32; 2],
    pub fill_translation: [f32; 2],
    pub fill_scale: [f32; 2],
    /// Clockwise, in degrees, about the anchor.
    pub rotation: f32,
    /// Display aspect ratio of the source.
    pub src_aspect: f32,
    /// Display aspect ratio of the destination.
    pub dst_aspect: f32,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            anchor: [0.0, 0.0],
            fill_translation: [0.0, 0.0],
            fill_scale: [1.0, 1.0],
            rotation: 0.0,
            src_aspect: 16.0 / 9.0,
            dst_aspect: 16.0 / 9.0,
        }
    }
}

impl TransformParams {
    /// Same placement regardless of aspect.
    pub fn is_identity(&self) -> bool {
        self.anchor == [0.0, 0.0]
            && self.fill_translation == [0.0, 0.0]
            && self.fill_scale == [1.0, 1.0]
            && self.rotation == 0.0
            && (self.src_aspect - self.dst_aspect).abs() < 1e-6
    }

    /// Source → destination, composed scale, translate, rotate, then
    /// aspect projection.
    pub fn matrix(&self) -> Mat3 {
        let anchor = Vec2::from(self.anchor);
        let fill = Vec2::from(self.fill_translation);
        let square = Mat3::from_scale(Vec2::new(self.dst_aspect, 1.0));

        let scale = Mat3::from_scale(Vec2::from(self.fill_scale)) * Mat3::from_translation(-anchor);
        let translate = Mat3::from_translation(fill);
        let rotate = Mat3::from_translation(fill)
            * square.inverse()
            * Mat3::from_angle(self.rotation.to_radians())
            * square
            * Mat3::from_translation(-fill);
        let centre = Vec2::splat(0.5);
        let project = Mat3::from_translation(centre)
            * Mat3::from_scale(Vec2::new(self.src_aspect / self.dst_aspect, 1.0))
            * Mat3::from_translation(-centre);

        project * rotate * translate * scale
    }
}

struct TransformKernel;

impl Kernel for TransformKernel {
    fn name(&self) -> &str {
        "transform"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let input = args.get_buffer("input")?;
        let output = args.get_buffer("output")?;
        let matrix = args.get_buffer("matrix")?;
        let visible = args.get_uint("visible")? != 0;

        let m = matrix.read()?;
        if m.len() < 9 {
            return Err(StageError::Config("transform matrix buffer too small".into()));
        }
        let inverse = Mat3::from_cols_slice(&m[..9]);
        let src = input.read()?;
        let view = ImageView::new(&src, input.width(), input.height())?;
        let (dw, dh) = (output.width(), output.height());
        let (sw, sh) = (view.width() as f32, view.height() as f32);

        let mut out = output.write()?;
        par_rows(&mut out, dw, dh, |y, row| {
            let v = (y as f32 + 0.5) / dh as f32;
            for (x, px) in row.iter_mut().enumerate() {
                *px = if visible {
                    let uv = inverse.transform_point2(Vec2::new((x as f32 + 0.5) / dw as f32, v));
                    view.bilinear(uv.x * sw - 0.5, uv.y * sh - 0.5, Edge::Transparent)
                } else {
                    TRANSPARENT
                };
            }
        })
    }
}

struct TransformState {
    params: TransformParams,
    matrix: ImageBuffer,
    visible: bool,
    dirty: bool,
    uploads: u64,
}

/// The transform process with its device-resident matrix.
pub struct Transform {
    kernel: Arc<TransformKernel>,
    device: Arc<dyn ComputeDevice>,
    state: Mutex<TransformState>,
}

/// Buffers for one transform invocation.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub input: ImageBuffer,
    pub output: ImageBuffer,
}

impl Transform {
    pub fn new(device: Arc<dyn ComputeDevice>, params: TransformParams) -> Result<Self> {
        let matrix = device.create_buffer(BufferDesc::bytes("transform_matrix", 9 * 4, 0))?;
        Ok(Self {
            kernel: Arc::new(TransformKernel),
            device,
            state: Mutex::new(TransformState {
                params,
                matrix,
                visible: true,
                dirty: true,
                uploads: 0,
            }),
        })
    }

    pub fn params(&self) -> TransformParams {
        self.state.lock().params
    }

    /// Takes effect on the next bound invocation.
    pub fn set_params(&self, params: TransformParams) {
        let mut state = self.state.lock();
        if state.params != params {
            state.params = params;
            state.dirty = true;
        }
    }

    /// Number of matrix uploads so far.
    pub fn uploads(&self) -> u64 {
        self.state.lock().uploads
    }

    fn upload_if_dirty(&self, state: &mut TransformState) -> Result<()> {
        if !state.dirty {
            return Ok(());
        }
        let forward = state.params.matrix();
        state.visible = forward.determinant().abs() > 1e-12;
        let inverse = if state.visible { forward.inverse() } else { Mat3::IDENTITY };
        let cols = inverse.to_cols_array();
        self.device.upload(&state.matrix, bytemuck::cast_slice(&cols))?;
        state.dirty = false;
        state.uploads += 1;
        trace!(uploads = state.uploads, "transform matrix uploaded");
        Ok(())
    }
}

impl ImageProcess for Transform {
    type Params = TransformJob;

    fn kernel(&self) -> Arc<dyn Kernel> {
        self.kernel.clone()
    }

    fn kernel_params(&self, job: &TransformJob) -> Result<KernelArgs> {
        let mut state = self.state.lock();
        self.upload_if_dirty(&mut state)?;
        Ok(KernelArgs::new()
            .buffer("input", &job.input)
            .buffer("output", &job.output)
            .buffer("matrix", &state.matrix)
            .uint("visible", u32::from(state.visible)))
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        let _ = self.state.get_mut().matrix.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecast_gpu::HostDevice;

    fn gradient(device: &dyn ComputeDevice, w: u32, h: u32) -> ImageBuffer {
        let buf = device.create_buffer(BufferDesc::image("grad", w, h, 0)).unwrap();
        {
            let mut data = buf.write().unwrap();
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let v = i as f32 / (w * h) as f32;
                px.copy_from_slice(&[v, 1.0 - v, 0.5, 1.0]);
            }
        }
        buf
    }

    fn run(transform: &Transform, job: &TransformJob) {
        let args = transform.kernel_params(job).unwrap();
        transform.kernel().run(&args).unwrap();
    }

    #[test]
    fn test_identity_copies() {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
        let input = gradient(device.as_ref(), 16, 8);
        let output = device.create_buffer(BufferDesc::image("out", 16, 8, 0)).unwrap();
        let transform = Transform::new(device.clone(), TransformParams::default()).unwrap();
        run(&transform, &TransformJob { input: input.clone(), output: output.clone() });

        let (a, b) = (input.read().unwrap(), output.read().unwrap());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_matrix_upload_only_on_change() {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
        let transform = Transform::new(device.clone(), TransformParams::default()).unwrap();
        let job = TransformJob {
            input: gradient(device.as_ref(), 4, 4),
            output: device.create_buffer(BufferDesc::image("out", 4, 4, 0)).unwrap(),
        };
        transform.kernel_params(&job).unwrap();
        transform.kernel_params(&job).unwrap();
        assert_eq!(transform.uploads(), 1);

        transform.set_params(TransformParams::default());
        transform.kernel_params(&job).unwrap();
        assert_eq!(transform.uploads(), 1);

        transform.set_params(TransformParams {
            rotation: 90.0,
            ..Default::default()
        });
        transform.kernel_params(&job).unwrap();
        assert_eq!(transform.uploads(), 2);
    }

    #[test]
    fn test_translate_right_leaves_left_transparent() {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
        let input = gradient(device.as_ref(), 8, 2);
        let output = device.create_buffer(BufferDesc::image("out", 8, 2, 0)).unwrap();
        let transform = Transform::new(
            device.clone(),
            TransformParams {
                fill_translation: [0.5, 0.0],
                ..Default::default()
            },
        )
        .unwrap();
        run(&transform, &TransformJob { input: input.clone(), output: output.clone() });

        let out = output.read().unwrap();
        let src = input.read().unwrap();
        assert_eq!(&out[0..4], &[0.0; 4]);
        assert_eq!(&out[12..16], &[0.0; 4]);
        // destination x=4 shows source x=0
        for c in 0..4 {
            assert!((out[16 + c] - src[c]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_zero_scale_is_transparent() {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
        let input = gradient(device.as_ref(), 4, 4);
        let output = device.create_buffer(BufferDesc::image("out", 4, 4, 0)).unwrap();
        output.write().unwrap().fill(1.0);
        let params = TransformParams {
            fill_scale: [0.0, 0.0],
            ..Default::default()
        };
        let transform = Transform::new(device.clone(), params).unwrap();
        run(&transform, &TransformJob { input, output: output.clone() });
        assert!(output.read().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_matrix_maps_anchor_to_fill() {
        let params = TransformParams {
            anchor: [0.5, 0.5],
            fill_translation: [0.25, 0.75],
            fill_scale: [0.5, 0.5],
            rotation: 30.0,
            ..Default::default()
        };
        let p = params.matrix().transform_point2(Vec2::new(0.5, 0.5));
        assert!((p - Vec2::new(0.25, 0.75)).length() < 1e-5);
    }
}
