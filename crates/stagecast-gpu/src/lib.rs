//! Stagecast GPU - device boundary, image buffers and the job queue.
//!
//! Stages never touch a device directly: they create buffers, bind kernel
//! arguments and add jobs to the [`JobQueue`] under a `(source, timestamp)`
//! key, then await the batch.

pub mod buffer;
pub mod buffer_pool;
pub mod device;
pub mod job_queue;
pub mod kernel;

pub use buffer::{BufferDesc, BufferGuard, ImageBuffer, RGBA_F32_BYTES};
pub use buffer_pool::{BufferPool, PoolStats};
pub use device::{ComputeDevice, HostDevice};
pub use job_queue::{Job, JobKey, JobQueue};
pub use kernel::{Kernel, KernelArg, KernelArgs};
