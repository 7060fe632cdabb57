//! 8-bit 4:2:2 packed as `U Y0 V Y1`.

use super::{mean_chroma, quantize, Layouts, Pixel, RowMask};
use crate::layout::PlaneLayout;
use smallvec::smallvec;

const BLACK: u8 = 16;

pub(crate) fn layout(width: u32, height: u32) -> Layouts {
    smallvec![PlaneLayout::new(width.div_ceil(2) as usize * 4, height as usize)]
}

pub(crate) fn decode(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    let pitch = layouts[0].pitch;
    let row = &planes[0][y * pitch..(y + 1) * pitch];
    for (x, px) in out[..width].iter_mut().enumerate() {
        let pair = &row[(x / 2) * 4..(x / 2) * 4 + 4];
        let luma = pair[1 + 2 * (x % 2)];
        *px = [luma as f32, pair[0] as f32, pair[2] as f32, 1.0];
    }
}

pub(crate) fn encode(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    if !mask.luma[0] {
        return;
    }
    let src = rows[0];
    let row = &mut *planes[0];
    for (p, out) in row.chunks_exact_mut(4).enumerate() {
        let x0 = 2 * p;
        let real = &src[x0.min(width)..(x0 + 2).min(width)];
        let (cb, cr) = mean_chroma(real).unwrap_or((128.0, 128.0));
        out[0] = quantize(cb, 255) as u8;
        out[2] = quantize(cr, 255) as u8;
        out[1] = real.first().map_or(BLACK, |px| quantize(px[0], 255) as u8);
        out[3] = real.get(1).map_or(BLACK, |px| quantize(px[0], 255) as u8);
    }
}
