//! Whole-image unpack and pack loops.
//!
//! Rows (or 4:2:0 row pairs) are independent work items and run in
//! parallel. The same loops back the device kernels and the host helpers
//! producers use to synthesise wire frames.

use crate::convert::ColourConverter;
use crate::formats::{Pixel, RowMask};
use crate::layout::FieldMode;
use crate::pack_impl::PackImpl;
use rayon::prelude::*;
use smallvec::SmallVec;
use stagecast_color::ColorSpace;
use stagecast_core::{FramePlane, PackedFrame, PixelFormat, Result, StageError};

fn check_planes(imp: &PackImpl, width: u32, height: u32, lens: impl ExactSizeIterator<Item = usize>) -> Result<()> {
    let layouts = imp.plane_layouts(width, height);
    if lens.len() != layouts.len() {
        return Err(StageError::Config(format!(
            "{} expects {} planes, got {}",
            imp.format,
            layouts.len(),
            lens.len()
        )));
    }
    for (i, (len, layout)) in lens.zip(layouts.iter()).enumerate() {
        if len < layout.bytes() {
            return Err(StageError::Config(format!(
                "{} plane {i} holds {len} bytes, needs {}",
                imp.format,
                layout.bytes()
            )));
        }
    }
    Ok(())
}

fn check_image(len: usize, width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(StageError::Config(format!("empty image {width}x{height}")));
    }
    let needed = width as usize * height as usize * 4;
    if len < needed {
        return Err(StageError::Config(format!(
            "image of {len} floats is smaller than {width}x{height} RGBA"
        )));
    }
    Ok(())
}

/// Unpack wire planes into a canonical RGBA image.
pub(crate) fn decode_image(
    imp: &PackImpl,
    conv: &ColourConverter,
    planes: &[&[u8]],
    width: u32,
    height: u32,
    out: &mut [f32],
) -> Result<()> {
    check_planes(imp, width, height, planes.iter().map(|p| p.len()))?;
    check_image(out.len(), width, height)?;
    let layouts = imp.plane_layouts(width, height);
    let w = width as usize;
    let row_len = w * 4;

    out[..row_len * height as usize]
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let px: &mut [Pixel] = bytemuck::cast_slice_mut(row);
            (imp.decode)(planes, &layouts, w, y, px);
            for p in px.iter_mut() {
                *p = conv.unpack_pixel(*p);
            }
        });
    Ok(())
}

/// Which rows of group `g` (rows `y0..y1`) a pass writes.
fn group_mask(field: FieldMode, rows_per_group: usize, g: usize, y0: usize, y1: usize) -> RowMask {
    let luma = [field.covers(y0), y0 + 1 < y1 && field.covers(y0 + 1)];
    let chroma = if rows_per_group == 1 {
        luma[0]
    } else {
        // each shared chroma row belongs to one field
        match field {
            FieldMode::Progressive => true,
            FieldMode::Top => g % 2 == 0,
            FieldMode::Bottom => g % 2 == 1,
        }
    };
    RowMask { luma, chroma }
}

/// Pack a canonical RGBA image into wire planes. Rows outside `field` are
/// left as they were.
pub(crate) fn encode_image(
    imp: &PackImpl,
    conv: &ColourConverter,
    input: &[f32],
    width: u32,
    height: u32,
    field: FieldMode,
    planes: &mut [&mut [u8]],
) -> Result<()> {
    check_planes(imp, width, height, planes.iter().map(|p| p.len()))?;
    check_image(input.len(), width, height)?;
    let layouts = imp.plane_layouts(width, height);
    let (w, h) = (width as usize, height as usize);
    let rpg = imp.rows_per_group;
    let groups = h.div_ceil(rpg);

    // split every plane into the chunk each row group owns
    let mut chunks: Vec<SmallVec<[&mut [u8]; 3]>> = (0..groups).map(|_| SmallVec::new()).collect();
    for (i, plane) in planes.iter_mut().enumerate() {
        let rows = if i == 0 { rpg } else { 1 };
        let chunk = layouts[i].pitch * rows;
        let used = layouts[i].bytes();
        for (g, part) in plane[..used].chunks_mut(chunk).enumerate().take(groups) {
            chunks[g].push(part);
        }
    }

    let pixels: &[Pixel] = bytemuck::cast_slice(&input[..w * h * 4]);
    chunks
        .into_par_iter()
        .enumerate()
        .for_each_init(Vec::new, |scratch: &mut Vec<Pixel>, (g, mut dst)| {
            let y0 = g * rpg;
            let y1 = (y0 + rpg).min(h);
            let mask = group_mask(field, rpg, g, y0, y1);
            if !mask.luma[0] && !mask.luma[1] && !mask.chroma {
                return;
            }
            scratch.clear();
            scratch.extend(pixels[y0 * w..y1 * w].iter().map(|p| conv.pack_pixel(*p)));
            let rows: SmallVec<[&[Pixel]; 2]> = scratch.chunks(w).collect();
            (imp.encode)(&rows, &mut dst, w, mask);
        });
    Ok(())
}

/// Pack a canonical image on the host into a new wire frame.
///
/// `image` is linear-light premultiplied RGBA in `channel`; the frame is
/// encoded in `wire`.
pub fn pack_host(
    format: PixelFormat,
    wire: ColorSpace,
    channel: ColorSpace,
    image: &[f32],
    width: u32,
    height: u32,
    timestamp: i64,
) -> Result<PackedFrame> {
    let imp = PackImpl::for_format(format);
    let conv = ColourConverter::new(imp, wire, channel)?;
    let mut planes: SmallVec<[FramePlane; 3]> = imp
        .plane_layouts(width, height)
        .iter()
        .map(|l| FramePlane::new(l.pitch, l.rows))
        .collect();
    {
        let mut slices: SmallVec<[&mut [u8]; 3]> = planes.iter_mut().map(|p| p.data.as_mut_slice()).collect();
        encode_image(imp, &conv, image, width, height, FieldMode::Progressive, &mut slices)?;
    }
    Ok(PackedFrame {
        format,
        width,
        height,
        timestamp,
        planes,
    })
}

/// Unpack a host wire frame into a canonical image.
pub fn unpack_host(frame: &PackedFrame, wire: ColorSpace, channel: ColorSpace) -> Result<Vec<f32>> {
    let imp = PackImpl::for_format(frame.format);
    let conv = ColourConverter::new(imp, wire, channel)?;
    let planes: SmallVec<[&[u8]; 3]> = frame.planes.iter().map(|p| p.data.as_slice()).collect();
    let mut out = vec![0.0; frame.width as usize * frame.height as usize * 4];
    decode_image(imp, &conv, &planes, frame.width, frame.height, &mut out)?;
    Ok(out)
}

/// A canonical image filled with one linear-light colour.
pub fn solid_image(width: u32, height: u32, rgba: [f32; 4]) -> Vec<f32> {
    let a = rgba[3];
    let px = [rgba[0] * a, rgba[1] * a, rgba[2] * a, a];
    px.iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth in-gamut test card; 2×2 blocks share a colour so chroma
    /// subsampling is lossless.
    fn test_card(width: u32, height: u32) -> Vec<f32> {
        let mut img = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let (bx, by) = ((x / 2) as f32, (y / 2) as f32);
                let r = 0.05 + 0.9 * (bx / (width as f32 / 2.0));
                let g = 0.05 + 0.9 * (by / (height as f32 / 2.0));
                let b = 0.05 + 0.9 * (((bx + by) % 7.0) / 7.0);
                img.extend_from_slice(&[r, g, b, 1.0]);
            }
        }
        img
    }

    fn samples(frame: &PackedFrame) -> Vec<u32> {
        let wide = matches!(frame.format, PixelFormat::Yuv422p10 | PixelFormat::Yuv420p10);
        frame
            .planes
            .iter()
            .flat_map(|p| {
                if wide {
                    p.data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]]) as u32).collect::<Vec<_>>()
                } else if frame.format == PixelFormat::V210 {
                    p.data
                        .chunks_exact(4)
                        .flat_map(|c| {
                            let w = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                            [w & 0x3FF, (w >> 10) & 0x3FF, (w >> 20) & 0x3FF]
                        })
                        .collect()
                } else {
                    p.data.iter().map(|b| *b as u32).collect()
                }
            })
            .collect()
    }

    #[test]
    fn test_write_read_write_within_one_lsb() {
        let (w, h) = (1921, 6);
        let card = test_card(w, h);
        for format in PixelFormat::ALL {
            let first = pack_host(format, ColorSpace::Bt709, ColorSpace::Bt709, &card, w, h, 0).unwrap();
            let image = unpack_host(&first, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();
            let second = pack_host(format, ColorSpace::Bt709, ColorSpace::Bt709, &image, w, h, 0).unwrap();
            let (a, b) = (samples(&first), samples(&second));
            assert_eq!(a.len(), b.len());
            for (i, (x, y)) in a.iter().zip(&b).enumerate() {
                assert!(x.abs_diff(*y) <= 1, "{format}: sample {i} {x} vs {y}");
            }
        }
    }

    #[test]
    fn test_canonical_roundtrip_close() {
        let card = test_card(64, 4);
        let frame = pack_host(PixelFormat::Yuv422p10, ColorSpace::Bt709, ColorSpace::Bt709, &card, 64, 4, 3).unwrap();
        assert_eq!(frame.timestamp, 3);
        let image = unpack_host(&frame, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();
        for (a, b) in card.iter().zip(&image) {
            // one 10-bit step in linear light near black is well under 0.01
            assert!((a - b).abs() < 0.01, "{a} vs {b}");
        }
    }

    #[test]
    fn test_v210_1921_padding_is_black() {
        let card = solid_image(1921, 2, [0.5, 0.5, 0.5, 1.0]);
        let frame = pack_host(PixelFormat::V210, ColorSpace::Bt709, ColorSpace::Bt709, &card, 1921, 2, 0).unwrap();
        let row = frame.planes[0].row(1);
        // the last real pixel opens block 320; every later block is padding
        for block in row.chunks_exact(16).skip(321) {
            let w1 = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
            assert_eq!(w1 & 0x3FF, 64);
            assert_eq!((w1 >> 10) & 0x3FF, 512);
        }
    }

    #[test]
    fn test_field_write_leaves_other_rows() {
        let (w, h) = (8, 4);
        let white = solid_image(w, h, [1.0, 1.0, 1.0, 1.0]);
        let black = solid_image(w, h, [0.0, 0.0, 0.0, 1.0]);
        let imp = PackImpl::for_format(PixelFormat::Uyvy422);
        let conv = ColourConverter::new(imp, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();
        let mut plane = vec![0u8; imp.frame_bytes(w, h)];
        {
            let mut planes = [plane.as_mut_slice()];
            encode_image(imp, &conv, &white, w, h, FieldMode::Top, &mut planes).unwrap();
            encode_image(imp, &conv, &black, w, h, FieldMode::Bottom, &mut planes).unwrap();
        }
        let pitch = 16;
        assert_eq!(plane[1], 235); // row 0, white luma
        assert_eq!(plane[pitch + 1], 16); // row 1, black luma
        assert_eq!(plane[2 * pitch + 3], 235);
    }

    #[test]
    fn test_plane_size_mismatch_rejected() {
        let imp = PackImpl::for_format(PixelFormat::Nv12);
        let conv = ColourConverter::new(imp, ColorSpace::Bt709, ColorSpace::Bt709).unwrap();
        let mut out = vec![0.0; 16 * 4];
        let y = vec![0u8; 16];
        let result = decode_image(imp, &conv, &[y.as_slice()], 4, 4, &mut out);
        assert!(matches!(result, Err(StageError::Config(_))));
    }
}
