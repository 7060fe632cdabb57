//! Reference-counted device image buffers.
//!
//! An [`ImageBuffer`] is a cheap handle: cloning it copies the handle, not
//! the reference. Ownership is tracked by an explicit count that starts at 1
//! when the device creates the buffer. Every stage that keeps a buffer past
//! the call that handed it over calls [`ImageBuffer::add_ref`]; every
//! consuming path calls [`ImageBuffer::release`] exactly once. When the count
//! reaches zero the storage goes back to the [`BufferPool`] and every later
//! access fails with [`StageError::BufferReleased`].

use crate::buffer_pool::BufferPool;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use stagecast_core::{Result, StageError};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Bytes per pixel of a canonical image (four `f32` channels).
pub const RGBA_F32_BYTES: usize = 16;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Parameters for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub byte_len: usize,
    pub timestamp: i64,
}

impl BufferDesc {
    /// A canonical float RGBA image.
    pub fn image(label: impl Into<String>, width: u32, height: u32, timestamp: i64) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            byte_len: width as usize * height as usize * RGBA_F32_BYTES,
            timestamp,
        }
    }

    /// A raw byte buffer, e.g. one plane of a packed wire format or a
    /// parameter block.
    pub fn bytes(label: impl Into<String>, byte_len: usize, timestamp: i64) -> Self {
        Self {
            label: label.into(),
            width: 0,
            height: 0,
            byte_len,
            timestamp,
        }
    }
}

struct BufferInner {
    id: u64,
    label: String,
    width: u32,
    height: u32,
    byte_len: usize,
    timestamp: AtomicI64,
    refs: AtomicUsize,
    storage: RwLock<Option<Vec<f32>>>,
    pool: Option<Arc<BufferPool>>,
}

/// Handle to a device image buffer.
#[derive(Clone)]
pub struct ImageBuffer {
    inner: Arc<BufferInner>,
}

impl ImageBuffer {
    /// Wrap freshly allocated storage. The reference count starts at 1.
    pub(crate) fn from_storage(
        desc: BufferDesc,
        storage: Vec<f32>,
        pool: Option<Arc<BufferPool>>,
    ) -> Self {
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        trace!(id, label = %desc.label, bytes = desc.byte_len, "buffer created");
        Self {
            inner: Arc::new(BufferInner {
                id,
                label: desc.label,
                width: desc.width,
                height: desc.height,
                byte_len: desc.byte_len,
                timestamp: AtomicI64::new(desc.timestamp),
                refs: AtomicUsize::new(1),
                storage: RwLock::new(Some(storage)),
                pool,
            }),
        }
    }

    /// A buffer that is not backed by any pool.
    pub fn detached(desc: BufferDesc) -> Self {
        let storage = vec![0.0; desc.byte_len.div_ceil(4)];
        Self::from_storage(desc, storage, None)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn byte_len(&self) -> usize {
        self.inner.byte_len
    }

    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp.load(Ordering::Acquire)
    }

    pub fn set_timestamp(&self, timestamp: i64) {
        self.inner.timestamp.store(timestamp, Ordering::Release);
    }

    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.ref_count() == 0
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_buffer(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn released_error(&self, op: &str) -> StageError {
        error!(
            id = self.inner.id,
            label = %self.inner.label,
            op,
            "buffer used after final release"
        );
        StageError::BufferReleased {
            label: self.inner.label.clone(),
        }
    }

    /// Take an additional reference.
    pub fn add_ref(&self) -> Result<()> {
        let refs = &self.inner.refs;
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(self.released_error("add_ref"));
            }
            match refs.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drop one reference. Returns `true` when this call freed the buffer.
    pub fn release(&self) -> Result<bool> {
        let refs = &self.inner.refs;
        let mut current = refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(self.released_error("release"));
            }
            match refs.compare_exchange_weak(current, current - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(1) => {
                    self.free();
                    return Ok(true);
                }
                Ok(_) => return Ok(false),
                Err(actual) => current = actual,
            }
        }
    }

    fn free(&self) {
        let storage = self.inner.storage.write().take();
        trace!(id = self.inner.id, label = %self.inner.label, "buffer freed");
        if let (Some(storage), Some(pool)) = (storage, self.inner.pool.as_ref()) {
            pool.recycle(storage);
        }
    }

    /// Shared view of the buffer contents as `f32`s.
    pub fn read(&self) -> Result<MappedRwLockReadGuard<'_, [f32]>> {
        RwLockReadGuard::try_map(self.inner.storage.read(), |s| s.as_deref())
            .map_err(|_| self.released_error("read"))
    }

    /// Exclusive view of the buffer contents as `f32`s.
    pub fn write(&self) -> Result<MappedRwLockWriteGuard<'_, [f32]>> {
        RwLockWriteGuard::try_map(self.inner.storage.write(), |s| s.as_deref_mut())
            .map_err(|_| self.released_error("write"))
    }

    /// Shared view of the buffer contents as bytes.
    pub fn read_bytes(&self) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        let len = self.inner.byte_len;
        let floats = self.read()?;
        Ok(MappedRwLockReadGuard::map(floats, |f| {
            &bytemuck::cast_slice::<f32, u8>(f)[..len]
        }))
    }

    /// Exclusive view of the buffer contents as bytes.
    pub fn write_bytes(&self) -> Result<MappedRwLockWriteGuard<'_, [u8]>> {
        let len = self.inner.byte_len;
        let floats = self.write()?;
        Ok(MappedRwLockWriteGuard::map(floats, |f| {
            &mut bytemuck::cast_slice_mut::<f32, u8>(f)[..len]
        }))
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("size", &(self.inner.width, self.inner.height))
            .field("timestamp", &self.timestamp())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Releases the held buffer once when dropped.
///
/// Guards cover the early-exit paths of a stage: on success the stage hands
/// the buffer on with [`BufferGuard::into_inner`] and the guard does nothing.
pub struct BufferGuard {
    buffer: Option<ImageBuffer>,
}

impl BufferGuard {
    pub fn new(buffer: ImageBuffer) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    /// The guarded buffer.
    pub fn buffer(&self) -> &ImageBuffer {
        match &self.buffer {
            Some(buffer) => buffer,
            // `buffer` is only taken by `into_inner`, which consumes the guard.
            None => unreachable!("buffer guard is empty"),
        }
    }

    /// Hand the reference on without releasing it.
    pub fn into_inner(mut self) -> ImageBuffer {
        match self.buffer.take() {
            Some(buffer) => buffer,
            None => unreachable!("buffer guard is empty"),
        }
    }
}

impl std::ops::Deref for BufferGuard {
    type Target = ImageBuffer;

    fn deref(&self) -> &ImageBuffer {
        self.buffer()
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let _ = buffer.release();
        }
    }
}
