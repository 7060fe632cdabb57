//! Read access to canonical images inside host kernels.

use rayon::prelude::*;
use stagecast_core::{Result, StageError};

/// One premultiplied linear RGBA pixel.
pub type Pixel = [f32; 4];

pub const TRANSPARENT: Pixel = [0.0; 4];

/// What a sample outside the image returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Nearest edge pixel.
    Clamp,
    /// Transparent black.
    Transparent,
}

/// A borrowed canonical image.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [Pixel],
    width: usize,
    height: usize,
}

impl<'a> ImageView<'a> {
    pub fn new(data: &'a [f32], width: u32, height: u32) -> Result<Self> {
        let pixels = width as usize * height as usize;
        if data.len() < pixels * 4 {
            return Err(StageError::Config(format!(
                "image of {} floats is smaller than {width}x{height} RGBA",
                data.len()
            )));
        }
        Ok(Self {
            data: bytemuck::cast_slice(&data[..pixels * 4]),
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Pixel {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &'a [Pixel] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    #[inline]
    pub fn clamped(&self, x: isize, y: isize) -> Pixel {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.pixel(x, y)
    }

    #[inline]
    fn fetch(&self, x: isize, y: isize, edge: Edge) -> Pixel {
        let inside = x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height;
        match (inside, edge) {
            (true, _) => self.pixel(x as usize, y as usize),
            (false, Edge::Clamp) => self.clamped(x, y),
            (false, Edge::Transparent) => TRANSPARENT,
        }
    }

    /// Bilinear sample at pixel coordinates, where `(0, 0)` is the centre of
    /// the top-left pixel.
    pub fn bilinear(&self, fx: f32, fy: f32, edge: Edge) -> Pixel {
        let (x0, y0) = (fx.floor(), fy.floor());
        let (tx, ty) = (fx - x0, fy - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);
        let p00 = self.fetch(x0, y0, edge);
        let p10 = self.fetch(x0 + 1, y0, edge);
        let p01 = self.fetch(x0, y0 + 1, edge);
        let p11 = self.fetch(x0 + 1, y0 + 1, edge);
        std::array::from_fn(|c| {
            let top = p00[c] + (p10[c] - p00[c]) * tx;
            let bottom = p01[c] + (p11[c] - p01[c]) * tx;
            top + (bottom - top) * ty
        })
    }
}

/// Run `f` over every output row in parallel.
pub(crate) fn par_rows<F>(out: &mut [f32], width: u32, height: u32, f: F) -> Result<()>
where
    F: Fn(usize, &mut [Pixel]) + Sync,
{
    let row_len = width as usize * 4;
    let len = row_len * height as usize;
    if row_len == 0 || out.len() < len {
        return Err(StageError::Config(format!(
            "output of {} floats does not hold {width}x{height} RGBA",
            out.len()
        )));
    }
    out[..len]
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| f(y, bytemuck::cast_slice_mut(row)));
    Ok(())
}

#[inline]
pub(crate) fn lerp(a: Pixel, b: Pixel, t: f32) -> Pixel {
    std::array::from_fn(|c| a[c] + (b[c] - a[c]) * t)
}
