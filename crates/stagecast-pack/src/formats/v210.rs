//! 10-bit 4:2:2 packed as six pixels in four little-endian words.
//!
//! ```text
//! w0 = Cb0 | Y0 << 10 | Cr0 << 20
//! w1 = Y1  | Cb1 << 10 | Y2 << 20
//! w2 = Cr1 | Y3 << 10 | Cb2 << 20
//! w3 = Y4  | Cr2 << 10 | Y5 << 20
//! ```
//!
//! Rows are padded to a multiple of 48 pixels (128 bytes). Padding pixels
//! are written as black.

use super::{mean_chroma, quantize, Layouts, Pixel, RowMask};
use crate::layout::PlaneLayout;
use smallvec::smallvec;

pub(crate) const GROUP_PIXELS: u32 = 48;
const BLOCK_PIXELS: usize = 6;
const BLOCK_BYTES: usize = 16;
const MAX: u32 = 1023;
const BLACK: u32 = 64;
const NULL: u32 = 512;

pub(crate) fn layout(width: u32, height: u32) -> Layouts {
    let pitch = width.div_ceil(GROUP_PIXELS) as usize * 128;
    smallvec![PlaneLayout::new(pitch, height as usize)]
}

#[inline]
fn word(row: &[u8], block: usize, i: usize) -> u32 {
    let at = block * BLOCK_BYTES + i * 4;
    u32::from_le_bytes([row[at], row[at + 1], row[at + 2], row[at + 3]])
}

fn unpack_block(row: &[u8], block: usize) -> [Pixel; BLOCK_PIXELS] {
    let w: [u32; 4] = std::array::from_fn(|i| word(row, block, i));
    let c = |v: u32, shift: u32| ((v >> shift) & 0x3FF) as f32;

    let y = [c(w[0], 10), c(w[1], 0), c(w[1], 20), c(w[2], 10), c(w[3], 0), c(w[3], 20)];
    let cb = [c(w[0], 0), c(w[1], 10), c(w[2], 20)];
    let cr = [c(w[0], 20), c(w[2], 0), c(w[3], 10)];

    std::array::from_fn(|i| [y[i], cb[i / 2], cr[i / 2], 1.0])
}

pub(crate) fn decode(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    let pitch = layouts[0].pitch;
    let row = &planes[0][y * pitch..(y + 1) * pitch];
    let full = width / BLOCK_PIXELS;
    for b in 0..full {
        out[b * BLOCK_PIXELS..(b + 1) * BLOCK_PIXELS].copy_from_slice(&unpack_block(row, b));
    }
    let remain = width % BLOCK_PIXELS;
    if remain > 0 {
        let px = unpack_block(row, full);
        out[full * BLOCK_PIXELS..width].copy_from_slice(&px[..remain]);
    }
}

fn store_block(row: &mut [u8], block: usize, y: [u32; 6], cb: [u32; 3], cr: [u32; 3]) {
    let words = [
        cb[0] | y[0] << 10 | cr[0] << 20,
        y[1] | cb[1] << 10 | y[2] << 20,
        cr[1] | y[3] << 10 | cb[2] << 20,
        y[4] | cr[2] << 10 | y[5] << 20,
    ];
    for (i, w) in words.iter().enumerate() {
        let at = block * BLOCK_BYTES + i * 4;
        row[at..at + 4].copy_from_slice(&w.to_le_bytes());
    }
}

fn pack_full(row: &mut [u8], block: usize, px: &[Pixel]) {
    let y: [u32; 6] = std::array::from_fn(|i| quantize(px[i][0], MAX));
    let cb: [u32; 3] = std::array::from_fn(|k| quantize((px[2 * k][1] + px[2 * k + 1][1]) * 0.5, MAX));
    let cr: [u32; 3] = std::array::from_fn(|k| quantize((px[2 * k][2] + px[2 * k + 1][2]) * 0.5, MAX));
    store_block(row, block, y, cb, cr);
}

/// A block with fewer than six real pixels; the rest is black padding.
fn pack_partial(row: &mut [u8], block: usize, px: &[Pixel]) {
    let n = px.len();
    let y: [u32; 6] = std::array::from_fn(|i| if i < n { quantize(px[i][0], MAX) } else { BLACK });
    let mut cb = [NULL; 3];
    let mut cr = [NULL; 3];
    for k in 0..3 {
        let pair = &px[(2 * k).min(n)..(2 * k + 2).min(n)];
        if let Some((b, r)) = mean_chroma(pair) {
            cb[k] = quantize(b, MAX);
            cr[k] = quantize(r, MAX);
        }
    }
    store_block(row, block, y, cb, cr);
}

pub(crate) fn encode(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    if !mask.luma[0] {
        return;
    }
    let src = rows[0];
    let row = &mut *planes[0];
    let blocks = row.len() / BLOCK_BYTES;
    let full = width / BLOCK_PIXELS;

    for b in 0..full {
        pack_full(row, b, &src[b * BLOCK_PIXELS..(b + 1) * BLOCK_PIXELS]);
    }
    for b in full..blocks {
        let start = (b * BLOCK_PIXELS).min(width);
        let end = ((b + 1) * BLOCK_PIXELS).min(width);
        pack_partial(row, b, &src[start..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_rounds_to_48() {
        assert_eq!(layout(1920, 1080)[0], PlaneLayout::new(5120, 1080));
        assert_eq!(layout(1921, 2)[0].pitch, 41 * 128);
        assert_eq!(layout(720, 576)[0].pitch, 1920);
    }

    #[test]
    fn test_word_packing() {
        let px: Vec<Pixel> = (0..6)
            .map(|i| [100.0 + i as f32, 200.0 + (i / 2) as f32, 300.0 + (i / 2) as f32, 1.0])
            .collect();
        let mut row = vec![0u8; 128];
        encode(&[px.as_slice()], &mut [row.as_mut_slice()], 6, RowMask::ALL);
        assert_eq!(word(&row, 0, 0), 200 | 100 << 10 | 300 << 20);
        assert_eq!(word(&row, 0, 1), 101 | 201 << 10 | 102 << 20);
        assert_eq!(word(&row, 0, 2), 301 | 103 << 10 | 202 << 20);
        assert_eq!(word(&row, 0, 3), 104 | 302 << 10 | 105 << 20);

        let mut out = vec![[0.0; 4]; 6];
        decode(&[row.as_slice()], &[PlaneLayout::new(128, 1)], 6, 0, &mut out);
        assert_eq!(out, px);
    }

    #[test]
    fn test_padding_is_black() {
        let px = vec![[500.0, 400.0, 600.0, 1.0]; 7];
        let mut row = vec![0xFFu8; 128];
        encode(&[px.as_slice()], &mut [row.as_mut_slice()], 7, RowMask::ALL);
        let mut out = vec![[0.0; 4]; 48];
        decode(&[row.as_slice()], &[PlaneLayout::new(128, 1)], 48, 0, &mut out);
        assert_eq!(out[6], [500.0, 400.0, 600.0, 1.0]);
        // pixel 7 shares pixel 6's chroma pair but is padding
        assert_eq!(out[7][0], 64.0);
        assert_eq!(out[7][1], 400.0);
        for p in &out[8..] {
            assert_eq!(*p, [64.0, 512.0, 512.0, 1.0]);
        }
    }
}
