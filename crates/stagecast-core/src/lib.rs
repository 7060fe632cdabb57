//! Stagecast Core - Foundation types for the channel server
//!
//! This crate provides the types shared by every pipeline stage:
//! - Channel video formats (VideoFormat)
//! - Time representation (RationalTime, FrameRate)
//! - Audio frames and formats
//! - Wire pixel formats and host-side packed frames
//! - The common error type

pub mod audio;
pub mod error;
pub mod format;
pub mod frame;
pub mod time;

pub use audio::{AudioFormat, AudioFrame};
pub use error::{Result, StageError};
pub use format::VideoFormat;
pub use frame::{FramePlane, PackedFrame, PixelFormat};
pub use time::{FrameRate, RationalTime};

/// Pipeline sizing constants.
pub mod limits {
    /// Bounded capacity of every inter-stage pipe.
    pub const PIPE_CAPACITY: usize = 4;

    /// Memory kept in the freed-buffer pool for reuse.
    pub const BUFFER_POOL_BUDGET: usize = 512 * 1024 * 1024; // 512 MB

    /// Audio/video timestamp mismatch that triggers a warning, in seconds.
    pub const AV_SYNC_TOLERANCE: f64 = 0.1;

    /// Highest layer index a channel accepts.
    pub const MAX_LAYERS: u32 = 1000;
}
