//! Opto-electronic transfer curves.

use crate::color_space::TransferParams;

/// Encoded (gamma) value → linear light.
///
/// Inputs are clamped to `0..=1`; the curve is not extended past the ends.
#[inline]
pub fn gamma_to_linear(p: &TransferParams, v: f64) -> f64 {
    let v = v.clamp(0.0, 1.0);
    if v < p.beta * p.delta {
        v / p.delta
    } else {
        ((v + p.alpha - 1.0) / p.alpha).powf(1.0 / p.gamma)
    }
}

/// Linear light → encoded (gamma) value.
#[inline]
pub fn linear_to_gamma(p: &TransferParams, l: f64) -> f64 {
    let l = l.clamp(0.0, 1.0);
    if l < p.beta {
        l * p.delta
    } else {
        p.alpha * l.powf(p.gamma) - (p.alpha - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color_space::ColorSpace;

    #[test]
    fn test_endpoints() {
        for cs in ColorSpace::ALL {
            let p = cs.transfer();
            assert!(gamma_to_linear(&p, 0.0).abs() < 1e-12);
            assert!((gamma_to_linear(&p, 1.0) - 1.0).abs() < 1e-9);
            assert!((linear_to_gamma(&p, 1.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_curve_is_continuous_at_knee() {
        let p = ColorSpace::Bt709.transfer();
        let below = linear_to_gamma(&p, p.beta - 1e-9);
        let above = linear_to_gamma(&p, p.beta + 1e-9);
        assert!((below - above).abs() < 1e-6);
    }

    #[test]
    fn test_srgb_midgrey() {
        let p = ColorSpace::Srgb.transfer();
        // 18% grey encodes to roughly 0.46 in sRGB
        let v = linear_to_gamma(&p, 0.18);
        assert!((v - 0.4614).abs() < 1e-3);
        assert!((gamma_to_linear(&p, v) - 0.18).abs() < 1e-9);
    }
}
