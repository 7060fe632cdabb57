//! The compute device boundary.
//!
//! Pipeline stages only see [`ComputeDevice`]: buffer creation, host
//! transfers, kernel launch and a completion barrier. [`HostDevice`] runs
//! kernels on the CPU and is what the server uses when no accelerator
//! backend is linked in.

use crate::buffer::{BufferDesc, ImageBuffer};
use crate::buffer_pool::{BufferPool, PoolStats};
use crate::kernel::{Kernel, KernelArgs};
use stagecast_core::limits::BUFFER_POOL_BUDGET;
use stagecast_core::{Result, StageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

pub trait ComputeDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate a buffer with reference count 1.
    fn create_buffer(&self, desc: BufferDesc) -> Result<ImageBuffer>;

    /// Copy host bytes into the start of a buffer.
    fn upload(&self, buffer: &ImageBuffer, bytes: &[u8]) -> Result<()>;

    /// Copy a buffer's bytes back to the host.
    fn download(&self, buffer: &ImageBuffer) -> Result<Vec<u8>>;

    /// Enqueue one kernel invocation.
    fn run_kernel(&self, kernel: &dyn Kernel, args: &KernelArgs) -> Result<()>;

    /// Block until every enqueued command has completed.
    fn wait_finish(&self) -> Result<()>;
}

/// CPU implementation of [`ComputeDevice`].
pub struct HostDevice {
    pool: Arc<BufferPool>,
    kernels_run: AtomicU64,
    buffers_created: AtomicU64,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::with_pool_budget(BUFFER_POOL_BUDGET)
    }

    pub fn with_pool_budget(max_memory: usize) -> Self {
        info!(pool_budget = max_memory, "host compute device ready");
        Self {
            pool: Arc::new(BufferPool::new(max_memory)),
            kernels_run: AtomicU64::new(0),
            buffers_created: AtomicU64::new(0),
        }
    }

    /// Number of kernel invocations so far.
    pub fn kernels_run(&self) -> u64 {
        self.kernels_run.load(Ordering::Relaxed)
    }

    pub fn buffers_created(&self) -> u64 {
        self.buffers_created.load(Ordering::Relaxed)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn create_buffer(&self, desc: BufferDesc) -> Result<ImageBuffer> {
        if desc.byte_len == 0 {
            return Err(StageError::Gpu(format!(
                "cannot create empty buffer '{}'",
                desc.label
            )));
        }
        let storage = self.pool.acquire(desc.byte_len.div_ceil(4));
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(ImageBuffer::from_storage(desc, storage, Some(self.pool.clone())))
    }

    fn upload(&self, buffer: &ImageBuffer, bytes: &[u8]) -> Result<()> {
        let mut dst = buffer.write_bytes()?;
        if bytes.len() > dst.len() {
            return Err(StageError::Gpu(format!(
                "upload of {} bytes overflows buffer '{}' ({} bytes)",
                bytes.len(),
                buffer.label(),
                dst.len()
            )));
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn download(&self, buffer: &ImageBuffer) -> Result<Vec<u8>> {
        Ok(buffer.read_bytes()?.to_vec())
    }

    fn run_kernel(&self, kernel: &dyn Kernel, args: &KernelArgs) -> Result<()> {
        trace!(kernel = kernel.name(), "run kernel");
        self.kernels_run.fetch_add(1, Ordering::Relaxed);
        kernel.run(args)
    }

    fn wait_finish(&self) -> Result<()> {
        // host kernels complete synchronously inside run_kernel
        Ok(())
    }
}
