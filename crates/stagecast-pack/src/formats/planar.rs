//! Planar YCbCr: a luma plane plus either separate Cb and Cr planes or one
//! interleaved CbCr plane. Chroma is always halved horizontally and,
//! for 4:2:0, vertically.
//!
//! A 4:2:0 row group is two luma rows and the chroma row they share.

use super::{mean_chroma, quantize, read_u16, write_u16, Layouts, Pixel, RowMask};
use crate::layout::PlaneLayout;
use smallvec::smallvec;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Planar {
    /// 16-bit little-endian containers holding 10-bit samples.
    wide: bool,
    /// Luma rows per chroma row.
    chroma_rows: usize,
    /// Cb and Cr interleaved in one plane.
    interleaved: bool,
}

pub(crate) const YUV422P10: Planar = Planar {
    wide: true,
    chroma_rows: 1,
    interleaved: false,
};
pub(crate) const NV12: Planar = Planar {
    wide: false,
    chroma_rows: 2,
    interleaved: true,
};
pub(crate) const YUV420P: Planar = Planar {
    wide: false,
    chroma_rows: 2,
    interleaved: false,
};
pub(crate) const YUV420P10: Planar = Planar {
    wide: true,
    chroma_rows: 2,
    interleaved: false,
};

impl Planar {
    fn sample_bytes(&self) -> usize {
        if self.wide {
            2
        } else {
            1
        }
    }

    fn max(&self) -> u32 {
        if self.wide {
            1023
        } else {
            255
        }
    }

    fn null(&self) -> f32 {
        if self.wide {
            512.0
        } else {
            128.0
        }
    }

    #[inline]
    fn get(&self, row: &[u8], index: usize) -> f32 {
        if self.wide {
            read_u16(row, index) as f32
        } else {
            row[index] as f32
        }
    }

    #[inline]
    fn put(&self, row: &mut [u8], index: usize, value: f32) {
        let v = quantize(value, self.max());
        if self.wide {
            write_u16(row, index, v as u16);
        } else {
            row[index] = v as u8;
        }
    }
}

fn layout(p: &Planar, width: u32, height: u32) -> Layouts {
    let s = p.sample_bytes();
    let w = width as usize;
    let cw = width.div_ceil(2) as usize;
    let ch = (height as usize).div_ceil(p.chroma_rows);
    let luma = PlaneLayout::new(w * s, height as usize);
    if p.interleaved {
        smallvec![luma, PlaneLayout::new(cw * 2 * s, ch)]
    } else {
        let chroma = PlaneLayout::new(cw * s, ch);
        smallvec![luma, chroma, chroma]
    }
}

fn decode(p: &Planar, planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
    let row_of = |i: usize, r: usize| &planes[i][r * layouts[i].pitch..(r + 1) * layouts[i].pitch];
    let luma = row_of(0, y);
    let cy = y / p.chroma_rows;

    if p.interleaved {
        let uv = row_of(1, cy);
        for (x, px) in out[..width].iter_mut().enumerate() {
            let c = x / 2;
            *px = [p.get(luma, x), p.get(uv, 2 * c), p.get(uv, 2 * c + 1), 1.0];
        }
    } else {
        let (u, v) = (row_of(1, cy), row_of(2, cy));
        for (x, px) in out[..width].iter_mut().enumerate() {
            *px = [p.get(luma, x), p.get(u, x / 2), p.get(v, x / 2), 1.0];
        }
    }
}

fn encode(p: &Planar, rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
    let luma_pitch = planes[0].len() / rows.len().max(1);
    for (r, src) in rows.iter().enumerate() {
        if !mask.luma[r] {
            continue;
        }
        let dst = &mut planes[0][r * luma_pitch..(r + 1) * luma_pitch];
        for (x, px) in src[..width].iter().enumerate() {
            p.put(dst, x, px[0]);
        }
    }

    if !mask.chroma {
        return;
    }
    let null = p.null();
    for c in 0..width.div_ceil(2) {
        let (x0, x1) = (2 * c, (2 * c + 2).min(width));
        let (cb, cr) = mean_chroma(rows.iter().flat_map(|row| row[x0..x1].iter())).unwrap_or((null, null));
        if p.interleaved {
            p.put(&mut *planes[1], 2 * c, cb);
            p.put(&mut *planes[1], 2 * c + 1, cr);
        } else {
            p.put(&mut *planes[1], c, cb);
            p.put(&mut *planes[2], c, cr);
        }
    }
}

macro_rules! planar_format {
    ($name:ident, $desc:expr) => {
        pub(crate) mod $name {
            use super::*;

            pub(crate) fn layout(width: u32, height: u32) -> Layouts {
                super::layout(&$desc, width, height)
            }

            pub(crate) fn decode(planes: &[&[u8]], layouts: &[PlaneLayout], width: usize, y: usize, out: &mut [Pixel]) {
                super::decode(&$desc, planes, layouts, width, y, out)
            }

            pub(crate) fn encode(rows: &[&[Pixel]], planes: &mut [&mut [u8]], width: usize, mask: RowMask) {
                super::encode(&$desc, rows, planes, width, mask)
            }
        }
    };
}

planar_format!(yuv422p10, YUV422P10);
planar_format!(nv12, NV12);
planar_format!(yuv420p, YUV420P);
planar_format!(yuv420p10, YUV420P10);
