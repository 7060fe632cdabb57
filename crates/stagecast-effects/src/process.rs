//! The bind-and-invoke contract shared by every image process.

use stagecast_core::Result;
use stagecast_gpu::{ImageBuffer, JobKey, JobQueue, Kernel, KernelArgs};
use std::sync::Arc;
use tracing::warn;

/// One kernel program plus the step that turns a semantic parameter struct
/// into bound kernel arguments.
pub trait ImageProcess {
    type Params;

    fn kernel(&self) -> Arc<dyn Kernel>;

    /// Bind `params`. Fails on a malformed parameter set.
    fn kernel_params(&self, params: &Self::Params) -> Result<KernelArgs>;

    /// Bind `params` and add the invocation to the batch for `key`.
    ///
    /// `on_complete` always runs exactly once: after the batch when the job
    /// was added, or immediately when binding failed.
    fn add_job(
        &self,
        queue: &JobQueue,
        key: JobKey,
        params: &Self::Params,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let kernel = self.kernel();
        match self.kernel_params(params) {
            Ok(args) => {
                queue.add(key, kernel.name().to_string(), kernel, args, on_complete);
                Ok(())
            }
            Err(e) => {
                warn!(kernel = kernel.name(), %key, error = %e, "kernel parameters rejected");
                on_complete();
                Err(e)
            }
        }
    }
}

/// Completion callback releasing every buffer in `buffers` once.
pub fn release_all(buffers: Vec<ImageBuffer>) -> impl FnOnce() + Send + 'static {
    move || {
        for buffer in buffers {
            let _ = buffer.release();
        }
    }
}
