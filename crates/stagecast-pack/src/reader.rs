//! Wire frame → canonical image.

use crate::convert::ColourConverter;
use crate::image::decode_image;
use crate::pack_impl::PackImpl;
use smallvec::SmallVec;
use stagecast_color::ColorSpace;
use stagecast_core::{PackedFrame, PixelFormat, Result, StageError};
use stagecast_gpu::{
    BufferDesc, BufferGuard, ComputeDevice, ImageBuffer, JobKey, JobQueue, Kernel, KernelArgs,
};
use std::sync::Arc;
use tracing::debug;

struct ReadKernel {
    name: String,
    imp: &'static PackImpl,
    conv: ColourConverter,
}

impl Kernel for ReadKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let sources = args.get_buffers("sources")?;
        let output = args.get_buffer("output")?;
        let width = args.get_uint("width")?;
        let height = args.get_uint("height")?;

        let guards = sources
            .iter()
            .map(ImageBuffer::read_bytes)
            .collect::<Result<SmallVec<[_; 3]>>>()?;
        let planes: SmallVec<[&[u8]; 3]> = guards.iter().map(|g| &**g).collect();
        let mut out = output.write()?;
        decode_image(self.imp, &self.conv, &planes, width, height, &mut out)
    }
}

/// Unpacks one wire pixel format at a fixed geometry into canonical images.
pub struct Reader {
    imp: &'static PackImpl,
    width: u32,
    height: u32,
    kernel: Arc<ReadKernel>,
}

impl Reader {
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        wire: ColorSpace,
        channel: ColorSpace,
    ) -> Result<Self> {
        let imp = PackImpl::for_format(format);
        let kernel = ReadKernel {
            name: format!("read_{format}"),
            imp,
            conv: ColourConverter::new(imp, wire, channel)?,
        };
        debug!(%format, width, height, %wire, %channel, "reader ready");
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

    pub fn output_desc(&self, label: impl Into<String>, timestamp: i64) -> BufferDesc {
        BufferDesc::image(label, self.width, self.height, timestamp)
    }

    /// Copy a host frame into one device buffer per plane.
    pub fn upload(&self, device: &dyn ComputeDevice, frame: &PackedFrame) -> Result<Vec<ImageBuffer>> {
        if frame.format != self.imp.format || frame.width != self.width || frame.height != self.height {
            return Err(StageError::Config(format!(
                "reader for {} {}x{} given {} {}x{}",
                self.imp.format, self.width, self.height, frame.format, frame.width, frame.height
            )));
        }
        let layouts = self.imp.plane_layouts(self.width, self.height);
        let mut planes: Vec<BufferGuard> = Vec::with_capacity(layouts.len());
        for (i, (layout, plane)) in layouts.iter().zip(frame.planes.iter()).enumerate() {
            let buffer = device.create_buffer(BufferDesc::bytes(
                format!("{}_plane{i}", self.imp.format),
                layout.bytes(),
                frame.timestamp,
            ))?;
            let buffer = BufferGuard::new(buffer);
            let len = plane.data.len().min(layout.bytes());
            device.upload(&buffer, &plane.data[..len])?;
            planes.push(buffer);
        }
        Ok(planes.into_iter().map(BufferGuard::into_inner).collect())
    }

    fn kernel_args(&self, sources: &[ImageBuffer], output: &ImageBuffer) -> KernelArgs {
        KernelArgs::new()
            .buffers("sources", sources)
            .buffer("output", output)
            .uint("width", self.width)
            .uint("height", self.height)
    }

    /// Add the unpack of `sources` into `output` to the batch for `key`.
    ///
    /// Takes over the caller's reference to each source plane; they are
    /// released when the job completes.
    pub fn add_read_job(&self, queue: &JobQueue, key: JobKey, sources: Vec<ImageBuffer>, output: &ImageBuffer) {
        let args = self.kernel_args(&sources, output);
        queue.add(key, self.kernel.name.clone(), self.kernel.clone(), args, move || {
            for src in sources {
                let _ = src.release();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{pack_host, solid_image};
    use stagecast_gpu::HostDevice;

    #[tokio::test]
    async fn test_read_job_unpacks_and_releases_planes() {
        let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
        let queue = JobQueue::spawn(device.clone());
        let reader = Reader::new(PixelFormat::Nv12, 16, 4, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();

        let image = solid_image(16, 4, [0.5, 0.5, 0.5, 1.0]);
        let frame = pack_host(PixelFormat::Nv12, ColorSpace::Bt709, ColorSpace::Bt709, &image, 16, 4, 3).unwrap();
        let planes = reader.upload(device.as_ref(), &frame).unwrap();
        assert_eq!(planes.len(), 2);
        let watch = planes.clone();

        let output = device.create_buffer(reader.output_desc("out", 3)).unwrap();
        let key = JobKey::new("src", 3);
        reader.add_read_job(&queue, key.clone(), planes, &output);
        queue.run_queue(&key).await.unwrap();

        assert!(watch.iter().all(ImageBuffer::is_released));
        let px = output.read().unwrap();
        for c in &px[..3] {
            assert!((c - 0.5).abs() < 0.01, "{c}");
        }
        assert_eq!(px[3], 1.0);
    }

    #[test]
    fn test_upload_rejects_other_geometry() {
        let device = HostDevice::new();
        let reader = Reader::new(PixelFormat::V210, 48, 2, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();
        let image = solid_image(8, 2, [0.0, 0.0, 0.0, 1.0]);
        let frame = pack_host(PixelFormat::V210, ColorSpace::Bt709, ColorSpace::Bt709, &image, 8, 2, 0).unwrap();
        assert!(reader.upload(&device, &frame).is_err());
    }
}
