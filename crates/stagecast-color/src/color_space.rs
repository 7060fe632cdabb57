//! Colourspace definitions and the matrices derived from them.
//!
//! Every matrix is computed from primaries, white point and luma
//! coefficients rather than tabulated, so any pair of colourspaces can be
//! converted.

use crate::error::ColorError;
use crate::matrix::{
    affine_invert, diag, join_affine, mat3_invert, mat3_mul, mat3_mul_vec, Mat3, Mat3x4,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Supported colourspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[serde(rename = "601")]
    Bt601,
    #[default]
    #[serde(rename = "709")]
    Bt709,
    #[serde(rename = "2020")]
    Bt2020,
    #[serde(rename = "sRGB")]
    Srgb,
}

/// Piecewise transfer curve parameters.
///
/// Encoded `V = δ·L` for `L < β`, else `V = α·L^γ − (α − 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

/// CIE xy chromaticities of the primaries and white point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chromaticities {
    pub red: [f64; 2],
    pub green: [f64; 2],
    pub blue: [f64; 2],
    pub white: [f64; 2],
}

const REC709_TRANSFER: TransferParams = TransferParams {
    alpha: 1.099_296_826_809_44,
    beta: 0.018_053_968_510_807,
    gamma: 0.45,
    delta: 4.5,
};

const SRGB_TRANSFER: TransferParams = TransferParams {
    alpha: 1.055,
    beta: 0.003_130_8,
    gamma: 1.0 / 2.4,
    delta: 12.92,
};

const D65: [f64; 2] = [0.3127, 0.3290];

impl ColorSpace {
    pub const ALL: [ColorSpace; 4] = [Self::Bt601, Self::Bt709, Self::Bt2020, Self::Srgb];

    /// Resolve a configuration name. Unknown names log a warning and fall
    /// back to 709; this never fails.
    pub fn from_name(name: &str) -> Self {
        match name.parse() {
            Ok(cs) => cs,
            Err(_) => {
                warn!(colourspace = name, "unrecognised colourspace, using 709");
                Self::Bt709
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bt601 => "601",
            Self::Bt709 => "709",
            Self::Bt2020 => "2020",
            Self::Srgb => "sRGB",
        }
    }

    pub fn transfer(self) -> TransferParams {
        match self {
            Self::Bt601 | Self::Bt709 | Self::Bt2020 => REC709_TRANSFER,
            Self::Srgb => SRGB_TRANSFER,
        }
    }

    /// Luma coefficients `(kR, kB)`.
    pub fn luma_coefficients(self) -> (f64, f64) {
        match self {
            Self::Bt601 => (0.299, 0.114),
            Self::Bt709 | Self::Srgb => (0.2126, 0.0722),
            Self::Bt2020 => (0.2627, 0.0593),
        }
    }

    pub fn chromaticities(self) -> Chromaticities {
        match self {
            Self::Bt601 => Chromaticities {
                red: [0.64, 0.33],
                green: [0.29, 0.60],
                blue: [0.15, 0.06],
                white: D65,
            },
            Self::Bt709 | Self::Srgb => Chromaticities {
                red: [0.64, 0.33],
                green: [0.30, 0.60],
                blue: [0.15, 0.06],
                white: D65,
            },
            Self::Bt2020 => Chromaticities {
                red: [0.708, 0.292],
                green: [0.170, 0.797],
                blue: [0.131, 0.046],
                white: D65,
            },
        }
    }
}

impl std::fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorSpace {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, ColorError> {
        Self::ALL
            .into_iter()
            .find(|cs| cs.name() == s)
            .or_else(|| Self::ALL.into_iter().find(|cs| cs.name().eq_ignore_ascii_case(s)))
            .or(match s {
                "bt601" | "BT601" | "smpte170m" => Some(Self::Bt601),
                "bt709" | "BT709" => Some(Self::Bt709),
                "bt2020" | "BT2020" => Some(Self::Bt2020),
                _ => None,
            })
            .ok_or_else(|| ColorError::UnsupportedSpace(s.to_string()))
    }
}

fn xy_to_xyz(xy: [f64; 2]) -> [f64; 3] {
    [xy[0] / xy[1], 1.0, (1.0 - xy[0] - xy[1]) / xy[1]]
}

/// RGB → CIE XYZ for linear-light RGB in `cs`.
///
/// The primaries' XYZ vectors form the columns of `P`; the per-primary
/// scale `S = P⁻¹·W` makes RGB white land on the white point.
pub fn rgb2xyz(cs: ColorSpace) -> Result<Mat3, ColorError> {
    let ch = cs.chromaticities();
    let (r, g, b) = (
        xy_to_xyz(ch.red),
        xy_to_xyz(ch.green),
        xy_to_xyz(ch.blue),
    );
    let p = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
    let w = xy_to_xyz(ch.white);
    let s = mat3_mul_vec(&mat3_invert(&p)?, w);
    Ok(mat3_mul(&p, &diag(s)))
}

/// CIE XYZ → linear-light RGB in `cs`.
pub fn xyz2rgb(cs: ColorSpace) -> Result<Mat3, ColorError> {
    mat3_invert(&rgb2xyz(cs)?)
}

/// Linear RGB in `from` → linear RGB in `to`, via XYZ.
pub fn rgb2rgb_matrix(from: ColorSpace, to: ColorSpace) -> Result<Mat3, ColorError> {
    Ok(mat3_mul(&xyz2rgb(to)?, &rgb2xyz(from)?))
}

/// Code-value levels of a YCbCr signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YcbcrLevels {
    pub bits: u32,
    pub luma_black: f64,
    pub luma_white: f64,
    /// Full excursion of the chroma channels, e.g. 896 for 10-bit narrow range.
    pub chroma_range: f64,
}

impl YcbcrLevels {
    /// Narrow ("video") range at the given bit depth: 16..235 / 16..240 at 8 bits.
    pub fn narrow(bits: u32) -> Self {
        let scale = (1u32 << bits.saturating_sub(8)) as f64;
        Self {
            bits,
            luma_black: 16.0 * scale,
            luma_white: 235.0 * scale,
            chroma_range: 224.0 * scale,
        }
    }

    pub fn chroma_null(&self) -> f64 {
        (128u32 << self.bits.saturating_sub(8)) as f64
    }

    fn validate(&self) -> Result<(), ColorError> {
        if (8..=16).contains(&self.bits) {
            Ok(())
        } else {
            Err(ColorError::BitDepth(self.bits))
        }
    }
}

/// Raw code values `[Y, Cb, Cr, 1]` → gamma-encoded RGB in `0..=1`.
pub fn ycbcr2rgb_matrix(cs: ColorSpace, levels: YcbcrLevels) -> Result<Mat3x4, ColorError> {
    levels.validate()?;
    let (kr, kb) = cs.luma_coefficients();
    let kg = 1.0 - kr - kb;

    let to_rgb: Mat3 = [
        [1.0, 0.0, 2.0 * (1.0 - kr)],
        [1.0, -2.0 * (1.0 - kb) * kb / kg, -2.0 * (1.0 - kr) * kr / kg],
        [1.0, 2.0 * (1.0 - kb), 0.0],
    ];

    let luma_range = levels.luma_white - levels.luma_black;
    let null = levels.chroma_null();
    let normalise = [
        [1.0 / luma_range, 0.0, 0.0],
        [0.0, 1.0 / levels.chroma_range, 0.0],
        [0.0, 0.0, 1.0 / levels.chroma_range],
    ];
    let offset = [
        -levels.luma_black / luma_range,
        -null / levels.chroma_range,
        -null / levels.chroma_range,
    ];

    let lin = mat3_mul(&to_rgb, &normalise);
    let off = mat3_mul_vec(&to_rgb, offset);
    Ok(join_affine(&lin, off))
}

/// Gamma-encoded RGB in `0..=1` → raw code values `[Y, Cb, Cr]`.
pub fn rgb2ycbcr_matrix(cs: ColorSpace, levels: YcbcrLevels) -> Result<Mat3x4, ColorError> {
    affine_invert(&ycbcr2rgb_matrix(cs, levels)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{affine_apply, approx_eq, IDENTITY};

    #[test]
    fn test_same_space_is_identity() {
        for cs in ColorSpace::ALL {
            let m = rgb2rgb_matrix(cs, cs).unwrap();
            assert!(approx_eq(&m, &IDENTITY, 1e-9), "{cs:?} → {cs:?}: {m:?}");
        }
    }

    #[test]
    fn test_white_maps_to_white_point() {
        let m = rgb2xyz(ColorSpace::Bt709).unwrap();
        let xyz = mat3_mul_vec(&m, [1.0, 1.0, 1.0]);
        assert!((xyz[1] - 1.0).abs() < 1e-9);
        assert!((xyz[0] - 0.3127 / 0.3290).abs() < 1e-9);
    }

    #[test]
    fn test_709_luma_row_matches_coefficients() {
        let m = rgb2xyz(ColorSpace::Bt709).unwrap();
        // Y row of RGB→XYZ is the luma weighting
        assert!((m[1][0] - 0.2126).abs() < 1e-3);
        assert!((m[1][1] - 0.7152).abs() < 1e-3);
        assert!((m[1][2] - 0.0722).abs() < 1e-3);
    }

    #[test]
    fn test_709_to_2020_keeps_white() {
        let m = rgb2rgb_matrix(ColorSpace::Bt709, ColorSpace::Bt2020).unwrap();
        let white = mat3_mul_vec(&m, [1.0, 1.0, 1.0]);
        for c in white {
            assert!((c - 1.0).abs() < 1e-9);
        }
        // the 709 red primary sits inside the 2020 gamut
        let red = mat3_mul_vec(&m, [1.0, 0.0, 0.0]);
        assert!(red.iter().all(|c| *c >= 0.0));
        assert!((red[0] - 0.6274).abs() < 1e-3);
    }

    #[test]
    fn test_ycbcr_levels_10bit() {
        let m = ycbcr2rgb_matrix(ColorSpace::Bt709, YcbcrLevels::narrow(10)).unwrap();
        let black = affine_apply(&m, [64.0, 512.0, 512.0]);
        let white = affine_apply(&m, [940.0, 512.0, 512.0]);
        for c in 0..3 {
            assert!(black[c].abs() < 1e-9);
            assert!((white[c] - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rgb2ycbcr_inverts() {
        let levels = YcbcrLevels::narrow(8);
        let fwd = rgb2ycbcr_matrix(ColorSpace::Bt601, levels).unwrap();
        let back = ycbcr2rgb_matrix(ColorSpace::Bt601, levels).unwrap();
        let rgb = [0.2, 0.6, 0.9];
        let ycc = affine_apply(&fwd, rgb);
        let out = affine_apply(&back, ycc);
        for c in 0..3 {
            assert!((out[c] - rgb[c]).abs() < 1e-9);
        }
        // pure blue drives Cb to its ceiling
        let blue = affine_apply(&fwd, [0.0, 0.0, 1.0]);
        assert!((blue[1] - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_name_falls_back_to_709() {
        assert_eq!(ColorSpace::from_name("2020"), ColorSpace::Bt2020);
        assert_eq!(ColorSpace::from_name("srgb"), ColorSpace::Srgb);
        assert_eq!(ColorSpace::from_name("rec.9000"), ColorSpace::Bt709);
        assert!("rec.9000".parse::<ColorSpace>().is_err());
    }

    #[test]
    fn test_bad_bit_depth() {
        let levels = YcbcrLevels {
            bits: 4,
            luma_black: 1.0,
            luma_white: 14.0,
            chroma_range: 14.0,
        };
        assert!(matches!(
            ycbcr2rgb_matrix(ColorSpace::Bt709, levels),
            Err(ColorError::BitDepth(4))
        ));
    }
}
