//! The closed set of wire pixel format descriptors.

use crate::formats::{
    planar::{nv12, yuv420p, yuv420p10, yuv422p10},
    rgba, uyvy, v210, DecodeFn, EncodeFn, LayoutFn,
};
use crate::layout::{PlaneLayout, WorkGeometry};
use smallvec::SmallVec;
use stagecast_color::YcbcrLevels;
use stagecast_core::PixelFormat;

/// Everything a reader or writer needs to know about one wire format.
///
/// Selected once per producer or consumer; never changes afterwards.
pub struct PackImpl {
    pub format: PixelFormat,
    pub bits: u32,
    pub luma_black: f64,
    pub luma_white: f64,
    pub chroma_range: f64,
    pub is_rgb: bool,
    /// Pixels handled by one work item.
    pub work_item_pixels: u32,
    /// Luma rows sharing one chroma row.
    pub rows_per_group: usize,
    pub(crate) layout: LayoutFn,
    pub(crate) decode: DecodeFn,
    pub(crate) encode: EncodeFn,
}

const NARROW_10: (u32, f64, f64, f64) = (10, 64.0, 940.0, 896.0);
const NARROW_8: (u32, f64, f64, f64) = (8, 16.0, 235.0, 224.0);
const FULL_8: (u32, f64, f64, f64) = (8, 0.0, 255.0, 255.0);

macro_rules! pack_impl {
    ($format:ident, $levels:expr, $rgb:expr, $group:expr, $rows:expr, $layout:path, $decode:path, $encode:path) => {
        PackImpl {
            format: PixelFormat::$format,
            bits: $levels.0,
            luma_black: $levels.1,
            luma_white: $levels.2,
            chroma_range: $levels.3,
            is_rgb: $rgb,
            work_item_pixels: $group,
            rows_per_group: $rows,
            layout: $layout,
            decode: $decode,
            encode: $encode,
        }
    };
}

static V210: PackImpl = pack_impl!(V210, NARROW_10, false, v210::GROUP_PIXELS, 1, v210::layout, v210::decode, v210::encode);
static UYVY422: PackImpl = pack_impl!(Uyvy422, NARROW_8, false, 64, 1, uyvy::layout, uyvy::decode, uyvy::encode);
static YUV422P10: PackImpl = pack_impl!(Yuv422p10, NARROW_10, false, 64, 1, yuv422p10::layout, yuv422p10::decode, yuv422p10::encode);
static NV12: PackImpl = pack_impl!(Nv12, NARROW_8, false, 64, 2, nv12::layout, nv12::decode, nv12::encode);
static YUV420P: PackImpl = pack_impl!(Yuv420p, NARROW_8, false, 64, 2, yuv420p::layout, yuv420p::decode, yuv420p::encode);
static YUV420P10: PackImpl = pack_impl!(Yuv420p10, NARROW_10, false, 64, 2, yuv420p10::layout, yuv420p10::decode, yuv420p10::encode);
static RGBA8: PackImpl = pack_impl!(Rgba8, FULL_8, true, 64, 1, rgba::layout, rgba::decode_rgba, rgba::encode_rgba);
static BGRA8: PackImpl = pack_impl!(Bgra8, FULL_8, true, 64, 1, rgba::layout, rgba::decode_bgra, rgba::encode_bgra);

impl PackImpl {
    pub fn for_format(format: PixelFormat) -> &'static PackImpl {
        match format {
            PixelFormat::V210 => &V210,
            PixelFormat::Uyvy422 => &UYVY422,
            PixelFormat::Yuv422p10 => &YUV422P10,
            PixelFormat::Nv12 => &NV12,
            PixelFormat::Yuv420p => &YUV420P,
            PixelFormat::Yuv420p10 => &YUV420P10,
            PixelFormat::Rgba8 => &RGBA8,
            PixelFormat::Bgra8 => &BGRA8,
        }
    }

    pub fn plane_layouts(&self, width: u32, height: u32) -> SmallVec<[PlaneLayout; 3]> {
        (self.layout)(width, height)
    }

    /// Total packed size of one frame.
    pub fn frame_bytes(&self, width: u32, height: u32) -> usize {
        self.plane_layouts(width, height).iter().map(PlaneLayout::bytes).sum()
    }

    pub fn levels(&self) -> YcbcrLevels {
        YcbcrLevels {
            bits: self.bits,
            luma_black: self.luma_black,
            luma_white: self.luma_white,
            chroma_range: self.chroma_range,
        }
    }

    pub fn work_geometry(&self, width: u32) -> WorkGeometry {
        WorkGeometry::new(width, self.work_item_pixels)
    }
}

impl std::fmt::Debug for PackImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackImpl")
            .field("format", &self.format)
            .field("bits", &self.bits)
            .field("is_rgb", &self.is_rgb)
            .field("work_item_pixels", &self.work_item_pixels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_format_has_an_impl() {
        for format in PixelFormat::ALL {
            let imp = PackImpl::for_format(format);
            assert_eq!(imp.format, format);
            assert_eq!(imp.plane_layouts(64, 4).len(), format.plane_count());
            assert_eq!(imp.is_rgb, format.is_rgb());
        }
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PackImpl::for_format(PixelFormat::V210).frame_bytes(1920, 1080), 5120 * 1080);
        assert_eq!(PackImpl::for_format(PixelFormat::Nv12).frame_bytes(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(PackImpl::for_format(PixelFormat::Bgra8).frame_bytes(2, 2), 16);
    }

    #[test]
    fn test_levels() {
        let l = PackImpl::for_format(PixelFormat::Yuv420p10).levels();
        assert_eq!((l.luma_black, l.luma_white, l.chroma_range), (64.0, 940.0, 896.0));
        assert_eq!(PackImpl::for_format(PixelFormat::V210).work_geometry(1921).remain, 1);
    }
}
