//! Integration tests for the job queue and buffer lifetimes.
//!
//! Runs on the host device, no GPU required.

use stagecast_core::Result;
use stagecast_effects::{release_all, ImageProcess, Mix, MixParams};
use stagecast_gpu::{BufferDesc, ComputeDevice, HostDevice, JobKey, JobQueue, Kernel, KernelArgs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CountingKernel {
    runs: AtomicUsize,
}

impl Kernel for CountingKernel {
    fn name(&self) -> &str {
        "count"
    }

    fn run(&self, _args: &KernelArgs) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn job_batch_fires_every_callback_once() {
    let queue = JobQueue::spawn(Arc::new(HostDevice::new()));
    let kernel = Arc::new(CountingKernel {
        runs: AtomicUsize::new(0),
    });
    let callbacks = Arc::new(AtomicUsize::new(0));
    let key = JobKey::new("layer-1", 42);

    for i in 0..5 {
        let callbacks = callbacks.clone();
        queue.add(key.clone(), format!("job-{i}"), kernel.clone(), KernelArgs::new(), move || {
            callbacks.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(queue.pending_keys(), vec![key.clone()]);

    queue.run_queue(&key).await.unwrap();
    assert_eq!(kernel.runs.load(Ordering::SeqCst), 5);
    assert_eq!(callbacks.load(Ordering::SeqCst), 5);
    assert!(queue.pending_keys().is_empty());
    assert_eq!(queue.batches_run(), 1);
}

#[test]
fn buffer_freed_exactly_once() {
    let device = HostDevice::new();
    let buffer = device.create_buffer(BufferDesc::image("frame", 16, 8, 0)).unwrap();
    for _ in 0..3 {
        buffer.add_ref().unwrap();
    }
    let freed: Vec<bool> = (0..4).map(|_| buffer.release().unwrap()).collect();
    assert_eq!(freed, vec![false, false, false, true]);
    assert!(buffer.is_released());
    assert!(buffer.release().is_err());
    assert!(buffer.add_ref().is_err());
}

#[tokio::test]
async fn mix_job_releases_inputs_on_completion() {
    let device: Arc<dyn ComputeDevice> = Arc::new(HostDevice::new());
    let queue = JobQueue::spawn(device.clone());
    let a = device.create_buffer(BufferDesc::image("a", 4, 4, 0)).unwrap();
    let b = device.create_buffer(BufferDesc::image("b", 4, 4, 0)).unwrap();
    a.write().unwrap().fill(1.0);
    let output = device.create_buffer(BufferDesc::image("out", 4, 4, 0)).unwrap();

    let key = JobKey::new("mix", 0);
    let params = MixParams {
        inputs: [a.clone(), b.clone()],
        output: output.clone(),
        mix: 0.25,
    };
    Mix::new()
        .add_job(&queue, key.clone(), &params, release_all(vec![a.clone(), b.clone()]))
        .unwrap();
    queue.run_queue(&key).await.unwrap();

    assert!(a.is_released() && b.is_released());
    assert!(output.read().unwrap().iter().all(|v| (v - 0.25).abs() < 1e-6));
    assert!(output.release().unwrap());
}
