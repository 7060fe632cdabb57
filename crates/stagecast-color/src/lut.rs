//! Tabulated transfer curves.
//!
//! Kernels look the curves up instead of evaluating `powf` per pixel. The
//! tables are sampled densely enough that interpolated lookups round-trip
//! to well under a 10-bit code value.

use crate::color_space::{ColorSpace, TransferParams};
use crate::transfer::{gamma_to_linear, linear_to_gamma};

/// Number of entries in every transfer LUT.
pub const LUT_SIZE: usize = 65536;

/// A 1D lookup table over the domain `0..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut1D {
    data: Vec<f32>,
}

impl Lut1D {
    /// Sample `f` at `size` evenly spaced points over `0..=1`.
    pub fn from_fn(size: usize, f: impl Fn(f64) -> f64) -> Self {
        let size = size.max(2);
        let last = (size - 1) as f64;
        let data = (0..size).map(|i| f(i as f64 / last) as f32).collect();
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Linear-interpolated lookup; input is clamped to `0..=1`.
    #[inline]
    pub fn lookup(&self, x: f32) -> f32 {
        lookup_slice(&self.data, x)
    }
}

/// Interpolated lookup into a raw table, as a kernel sees it.
#[inline]
pub fn lookup_slice(table: &[f32], x: f32) -> f32 {
    let n = table.len();
    if n == 0 {
        return x;
    }
    if n == 1 {
        return table[0];
    }
    let pos = x.clamp(0.0, 1.0) * (n - 1) as f32;
    let lo = (pos as usize).min(n - 2);
    let frac = pos - lo as f32;
    table[lo] + (table[lo + 1] - table[lo]) * frac
}

fn build(params: TransferParams, f: fn(&TransferParams, f64) -> f64) -> Lut1D {
    Lut1D::from_fn(LUT_SIZE, |x| f(&params, x))
}

/// Encoded → linear table for `cs`.
pub fn gamma2linear_lut(cs: ColorSpace) -> Lut1D {
    build(cs.transfer(), gamma_to_linear)
}

/// Linear → encoded table for `cs`.
pub fn linear2gamma_lut(cs: ColorSpace) -> Lut1D {
    build(cs.transfer(), linear_to_gamma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table_size_and_ends() {
        let lut = gamma2linear_lut(ColorSpace::Bt709);
        assert_eq!(lut.len(), LUT_SIZE);
        assert_eq!(lut.as_slice()[0], 0.0);
        assert!((lut.as_slice()[LUT_SIZE - 1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lookup_clamps() {
        let lut = Lut1D::from_fn(3, |x| x * 2.0);
        assert_eq!(lut.lookup(-1.0), 0.0);
        assert_eq!(lut.lookup(5.0), 2.0);
        assert!((lut.lookup(0.25) - 0.5).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_gamma_roundtrip(x in 0.0f32..=1.0, idx in 0usize..4) {
            let cs = ColorSpace::ALL[idx];
            let to_lin = gamma2linear_lut(cs);
            let to_gam = linear2gamma_lut(cs);
            let back = to_gam.lookup(to_lin.lookup(x));
            prop_assert!((back - x).abs() < 1e-4, "{cs:?}: {x} -> {back}");
        }
    }
}
