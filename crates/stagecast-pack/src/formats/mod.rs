//! Per-format row codecs.
//!
//! Decoders turn one wire row into per-pixel signal values; encoders do the
//! inverse for one row group. Signal values are `[Y, Cb, Cr, 1]` code values
//! for YCbCr formats and normalised `[R, G, B, A]` for RGB formats. Colour
//! conversion happens outside, in [`crate::convert`].

pub(crate) mod planar;
pub(crate) mod rgba;
pub(crate) mod uyvy;
pub(crate) mod v210;

use crate::layout::PlaneLayout;
use smallvec::SmallVec;

pub(crate) type Pixel = [f32; 4];
pub(crate) type Layouts = SmallVec<[PlaneLayout; 3]>;

/// Rows of a group that an encode pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowMask {
    pub luma: [bool; 2],
    pub chroma: bool,
}

#[cfg(test)]
impl RowMask {
    pub const ALL: RowMask = RowMask {
        luma: [true, true],
        chroma: true,
    };
}

pub(crate) type LayoutFn = fn(width: u32, height: u32) -> Layouts;
pub(crate) type DecodeFn =
    fn(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]);
pub(crate) type EncodeFn =
    fn(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask);

/// Round and clamp a code value to `0..=max`.
#[inline]
pub(crate) fn quantize(v: f32, max: u32) -> u32 {
    let r = v.round();
    if r >= max as f32 {
        max
    } else if r > 0.0 {
        r as u32
    } else {
        0
    }
}

/// Mean Cb/Cr over the given pixels, `None` when there are none.
#[inline]
pub(crate) fn mean_chroma<'a>(pixels: impl IntoIterator<Item = &'a Pixel>) -> Option<(f32, f32)> {
    let (mut cb, mut cr, mut n) = (0.0f32, 0.0f32, 0u32);
    for p in pixels {
        cb += p[1];
        cr += p[2];
        n += 1;
    }
    (n > 0).then(|| (cb / n as f32, cr / n as f32))
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([bytes[index * 2], bytes[index * 2 + 1]])
}

#[inline]
pub(crate) fn write_u16(bytes: &mut [u8], index: usize, value: u16) {
    bytes[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize(-3.0, 1023), 0);
        assert_eq!(quantize(511.6, 1023), 512);
        assert_eq!(quantize(5000.0, 1023), 1023);
        assert_eq!(quantize(f32::NAN, 255), 0);
    }

    #[test]
    fn test_mean_chroma() {
        let a = [64.0, 500.0, 520.0, 1.0];
        let b = [64.0, 510.0, 530.0, 1.0];
        assert_eq!(mean_chroma([&a, &b]), Some((505.0, 525.0)));
        assert_eq!(mean_chroma(std::iter::empty()), None);
    }
}
