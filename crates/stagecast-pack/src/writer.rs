//! Canonical image → wire frame.

use crate::convert::ColourConverter;
use crate::image::encode_image;
use crate::layout::FieldMode;
use crate::pack_impl::PackImpl;
use smallvec::SmallVec;
use stagecast_color::ColorSpace;
use stagecast_core::{FramePlane, PackedFrame, PixelFormat, Result, StageError};
use stagecast_gpu::{
    BufferDesc, BufferGuard, ComputeDevice, ImageBuffer, JobKey, JobQueue, Kernel, KernelArgs,
};
use std::sync::Arc;
use tracing::debug;

struct WriteKernel {
    name: String,
    imp: &'static PackImpl,
    conv: ColourConverter,
}

impl Kernel for WriteKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let input = args.get_buffer("input")?;
        let destinations = args.get_buffers("destinations")?;
        let field = FieldMode::from_uint(args.get_uint("field")?);
        let width = args.get_uint("width")?;
        let height = args.get_uint("height")?;

        let image = input.read()?;
        let mut guards = destinations
            .iter()
            .map(ImageBuffer::write_bytes)
            .collect::<Result<SmallVec<[_; 3]>>>()?;
        let mut planes: SmallVec<[&mut [u8]; 3]> = guards.iter_mut().map(|g| &mut **g).collect();
        encode_image(self.imp, &self.conv, &image, width, height, field, &mut planes)
    }
}

/// Packs canonical images into one wire pixel format at a fixed geometry.
pub struct Writer {
    imp: &'static PackImpl,
    width: u32,
    height: u32,
    kernel: Arc<WriteKernel>,
}

impl Writer {
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        wire: ColorSpace,
        channel: ColorSpace,
    ) -> Result<Self> {
        let imp = PackImpl::for_format(format);
        let kernel = WriteKernel {
            name: format!("write_{format}"),
            imp,
            conv: ColourConverter::new(imp, wire, channel)?,
        };
        debug!(%format, width, height, %wire, %channel, "writer ready");
        Ok(Self {
            imp,
            width,
            height,
            kernel: Arc::new(kernel),
        })
    }

    pub fn pack_impl(&self) -> &'static PackImpl {
        self.imp
    }

    /// Allocate the wire planes one frame is written into.
    pub fn create_destinations(&self, device: &dyn ComputeDevice, timestamp: i64) -> Result<Vec<ImageBuffer>> {
        let mut planes: Vec<BufferGuard> = Vec::new();
        for (i, layout) in self.imp.plane_layouts(self.width, self.height).iter().enumerate() {
            let buffer = device.create_buffer(BufferDesc::bytes(
                format!("{}_plane{i}", self.imp.format),
                layout.bytes(),
                timestamp,
            ))?;
            planes.push(BufferGuard::new(buffer));
        }
        Ok(planes.into_iter().map(BufferGuard::into_inner).collect())
    }

    fn kernel_args(&self, input: &ImageBuffer, destinations: &[ImageBuffer], field: FieldMode) -> KernelArgs {
        KernelArgs::new()
            .buffer("input", input)
            .buffers("destinations", destinations)
            .uint("field", field.as_uint())
            .uint("width", self.width)
            .uint("height", self.height)
    }

    /// Add the pack of `input` into `destinations` to the batch for `key`.
    ///
    /// Only the rows of `field` are written. Takes over the caller's
    /// reference to `input`, released when the job completes.
    pub fn add_write_job(
        &self,
        queue: &JobQueue,
        key: JobKey,
        input: ImageBuffer,
        destinations: &[ImageBuffer],
        field: FieldMode,
    ) -> Result<()> {
        if input.width() != self.width || input.height() != self.height {
            let _ = input.release();
            return Err(StageError::Config(format!(
                "writer for {}x{} given a {}x{} image",
                self.width,
                self.height,
                input.width(),
                input.height()
            )));
        }
        let args = self.kernel_args(&input, destinations, field);
        queue.add(key, self.kernel.name.clone(), self.kernel.clone(), args, move || {
            let _ = input.release();
        });
        Ok(())
    }

    /// Copy written planes back to the host and release them.
    pub fn download(&self, device: &dyn ComputeDevice, destinations: Vec<ImageBuffer>, timestamp: i64) -> Result<PackedFrame> {
        let guards: Vec<BufferGuard> = destinations.into_iter().map(BufferGuard::new).collect();
        let layouts = self.imp.plane_layouts(self.width, self.height);
        let mut planes = SmallVec::new();
        for (layout, buffer) in layouts.iter().zip(guards.iter()) {
            let mut plane = FramePlane::new(layout.pitch, layout.rows);
            let bytes = device.download(buffer)?;
            let len = bytes.len().min(plane.data.len());
            plane.data[..len].copy_from_slice(&bytes[..len]);
            planes.push(plane);
        }
        Ok(PackedFrame {
            format: self.imp.format,
            width: self.width,
            height: self.height,
            timestamp,
            planes,
        })
    }
}
