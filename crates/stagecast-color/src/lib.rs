//! Stagecast Color - colourspace maths for the pixel packers.
//!
//! Everything here runs once per format change: matrices are derived in
//! `f64` and narrowed to `f32` when handed to kernels.

pub mod color_space;
pub mod error;
pub mod lut;
pub mod matrix;
pub mod transfer;

pub use color_space::{
    rgb2rgb_matrix, rgb2xyz, rgb2ycbcr_matrix, xyz2rgb, ycbcr2rgb_matrix, Chromaticities,
    ColorSpace, TransferParams, YcbcrLevels,
};
pub use error::ColorError;
pub use lut::{gamma2linear_lut, linear2gamma_lut, lookup_slice, Lut1D, LUT_SIZE};
pub use matrix::{Mat3, Mat3x4};
pub use transfer::{gamma_to_linear, linear_to_gamma};
