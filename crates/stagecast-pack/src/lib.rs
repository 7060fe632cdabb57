//! Stagecast Pack - wire pixel formats.
//!
//! Each supported [`PixelFormat`](stagecast_core::PixelFormat) has one
//! [`PackImpl`] describing its plane layout, signal levels and the row
//! codecs behind its read and write kernels. Producers unpack wire frames
//! into the canonical image with a [`Reader`]; consumers pack the channel
//! output with a [`Writer`].

pub mod convert;
mod formats;
pub mod image;
pub mod layout;
pub mod pack_impl;
pub mod reader;
pub mod writer;

pub use convert::ColourConverter;
pub use image::{pack_host, solid_image, unpack_host};
pub use layout::{FieldMode, PlaneLayout, WorkGeometry};
pub use pack_impl::PackImpl;
pub use reader::Reader;
pub use writer::Writer;
