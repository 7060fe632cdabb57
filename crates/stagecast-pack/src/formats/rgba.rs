//! 8-bit packed RGB with straight alpha.

use super::{quantize, Layouts, Pixel, RowMask};
use crate::layout::PlaneLayout;
use smallvec::smallvec;

/// Byte position of R, G, B and A within a pixel.
type Order = [usize; 4];

const RGBA: Order = [0, 1, 2, 3];
const BGRA: Order = [2, 1, 0, 3];

pub(crate) fn layout(width: u32, height: u32) -> Layouts {
    smallvec![PlaneLayout::new(width as usize * 4, height as usize)]
}

fn decode(order: Order, planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    let pitch = layouts[0].pitch;
    let row = &planes[0][y * pitch..(y + 1) * pitch];
    for (px, bytes) in out[..width].iter_mut().zip(row.chunks_exact(4)) {
        *px = std::array::from_fn(|c| bytes[order[c]] as f32 / 255.0);
    }
}

fn encode(order: Order, rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    if !mask.luma[0] {
        return;
    }
    for (px, bytes) in rows[0][..width].iter().zip(planes[0].chunks_exact_mut(4)) {
        for c in 0..4 {
            bytes[order[c]] = quantize(px[c] * 255.0, 255) as u8;
        }
    }
}

pub(crate) fn decode_rgba(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    decode(RGBA, planes, layouts, width, y, out)
}

pub(crate) fn encode_rgba(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    encode(RGBA, rows, planes, width, mask)
}

pub(crate) fn decode_bgra(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    decode(BGRA, planes, layouts, width, y, out)
}

pub(crate) fn encode_bgra(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    encode(BGRA, rows, planes, width, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_byte_order() {
        let px = [[1.0, 0.5, 0.0, 1.0]];
        let mut row = vec![0u8; 4];
        encode_bgra(&[px.as_slice()], &mut [row.as_mut_slice()], 1, RowMask::ALL);
        assert_eq!(row, vec![0, 128, 255, 255]);

        let mut out = [[0.0; 4]];
        decode_rgba(&[row.as_slice()], &[PlaneLayout::new(4, 1)], 1, 0, &mut out);
        assert_eq!(out[0][0], 0.0);
        assert_eq!(out[0][2], 1.0);
    }
}
