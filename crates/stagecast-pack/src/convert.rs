//! Per-pixel colour conversion between wire signal values and canonical
//! linear-light premultiplied RGBA.

use crate::formats::Pixel;
use crate::pack_impl::PackImpl;
use stagecast_color::matrix::{to_f32_3x3, to_f32_3x4, IDENTITY};
use stagecast_color::{
    gamma2linear_lut, linear2gamma_lut, rgb2rgb_matrix, rgb2ycbcr_matrix, ycbcr2rgb_matrix,
    ColorError, ColorSpace, Lut1D,
};
use stagecast_core::{Result, StageError};

fn colour_error(e: ColorError) -> StageError {
    StageError::Config(e.to_string())
}

#[inline]
fn affine(m: &[f32; 12], v: [f32; 3]) -> [f32; 3] {
    std::array::from_fn(|r| m[r * 4] * v[0] + m[r * 4 + 1] * v[1] + m[r * 4 + 2] * v[2] + m[r * 4 + 3])
}

#[inline]
fn linear(m: &[f32; 9], v: [f32; 3]) -> [f32; 3] {
    std::array::from_fn(|r| m[r * 3] * v[0] + m[r * 3 + 1] * v[1] + m[r * 3 + 2] * v[2])
}

/// Tables and matrices for one wire format in one colourspace, converting
/// to and from a channel colourspace.
#[derive(Debug, Clone)]
pub struct ColourConverter {
    is_rgb: bool,
    ycc_to_rgb: [f32; 12],
    rgb_to_ycc: [f32; 12],
    to_linear: Lut1D,
    to_gamma: Lut1D,
    /// Wire gamut → channel gamut, `None` when they match.
    into_channel: Option<[f32; 9]>,
    from_channel: Option<[f32; 9]>,
}

impl ColourConverter {
    pub fn new(imp: &PackImpl, wire: ColorSpace, channel: ColorSpace) -> Result<Self> {
        let (ycc_to_rgb, rgb_to_ycc) = if imp.is_rgb {
            ([0.0; 12], [0.0; 12])
        } else {
            let levels = imp.levels();
            (
                to_f32_3x4(&ycbcr2rgb_matrix(wire, levels).map_err(colour_error)?),
                to_f32_3x4(&rgb2ycbcr_matrix(wire, levels).map_err(colour_error)?),
            )
        };

        let gamut = |from: ColorSpace, to: ColorSpace| -> Result<Option<[f32; 9]>> {
            let m = rgb2rgb_matrix(from, to).map_err(colour_error)?;
            Ok((from != to && m != IDENTITY).then(|| to_f32_3x3(&m)))
        };

        Ok(Self {
            is_rgb: imp.is_rgb,
            ycc_to_rgb,
            rgb_to_ycc,
            to_linear: gamma2linear_lut(wire),
            to_gamma: linear2gamma_lut(wire),
            into_channel: gamut(wire, channel)?,
            from_channel: gamut(channel, wire)?,
        })
    }

    /// Wire signal → canonical pixel.
    #[inline]
    pub(crate) fn unpack_pixel(&self, signal: Pixel) -> Pixel {
        let (rgb, alpha) = if self.is_rgb {
            ([signal[0], signal[1], signal[2]], signal[3])
        } else {
            (affine(&self.ycc_to_rgb, [signal[0], signal[1], signal[2]]), 1.0)
        };
        let mut lin = rgb.map(|v| self.to_linear.lookup(v));
        if let Some(m) = &self.into_channel {
            lin = linear(m, lin);
        }
        [lin[0] * alpha, lin[1] * alpha, lin[2] * alpha, alpha]
    }

    /// Canonical pixel → wire signal.
    #[inline]
    pub(crate) fn pack_pixel(&self, px: Pixel) -> Pixel {
        let alpha = px[3].clamp(0.0, 1.0);
        let mut rgb = if px[3] > 0.0 {
            [px[0] / px[3], px[1] / px[3], px[2] / px[3]]
        } else {
            [0.0; 3]
        };
        if let Some(m) = &self.from_channel {
            rgb = linear(m, rgb);
        }
        let gam = rgb.map(|v| self.to_gamma.lookup(v));
        if self.is_rgb {
            [gam[0], gam[1], gam[2], alpha]
        } else {
            let ycc = affine(&self.rgb_to_ycc, gam);
            [ycc[0], ycc[1], ycc[2], alpha]
        }
    }
}
