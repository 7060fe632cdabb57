//! Row-major 3×3 and 3×4 matrix helpers.
//!
//! A 3×4 matrix is an affine transform `[A | t]` acting on `[x, y, z, 1]`.
//! Products are plain dot-product composition, no broadcasting.

use crate::error::ColorError;

pub type Mat3 = [[f64; 3]; 3];
pub type Mat3x4 = [[f64; 4]; 3];

pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// `a · b`
pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

/// `m · v`
pub fn mat3_mul_vec(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn determinant(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Invert via the adjugate: `inv = adj(m) / det(m)`, where the adjugate is
/// the transpose of the cofactor matrix.
pub fn mat3_invert(m: &Mat3) -> Result<Mat3, ColorError> {
    let det = determinant(m);
    if det.abs() < 1e-12 {
        return Err(ColorError::SingularMatrix(det));
    }

    let mut cofactor = [[0.0; 3]; 3];
    for (r, row) in cofactor.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            let rows: Vec<usize> = (0..3).filter(|&i| i != r).collect();
            let cols: Vec<usize> = (0..3).filter(|&i| i != c).collect();
            let minor = m[rows[0]][cols[0]] * m[rows[1]][cols[1]]
                - m[rows[0]][cols[1]] * m[rows[1]][cols[0]];
            let sign = if (r + c) % 2 == 0 { 1.0 } else { -1.0 };
            *cell = sign * minor;
        }
    }

    let mut inv = [[0.0; 3]; 3];
    for (r, row) in inv.iter_mut().enumerate() {
        for (c, cell) in row.iter_mut().enumerate() {
            // transpose while scaling
            *cell = cofactor[c][r] / det;
        }
    }
    Ok(inv)
}

/// Diagonal matrix from a vector.
pub fn diag(v: [f64; 3]) -> Mat3 {
    [[v[0], 0.0, 0.0], [0.0, v[1], 0.0], [0.0, 0.0, v[2]]]
}

/// Split an affine 3×4 into its linear part and offset.
pub fn split_affine(m: &Mat3x4) -> (Mat3, [f64; 3]) {
    let a = [
        [m[0][0], m[0][1], m[0][2]],
        [m[1][0], m[1][1], m[1][2]],
        [m[2][0], m[2][1], m[2][2]],
    ];
    (a, [m[0][3], m[1][3], m[2][3]])
}

pub fn join_affine(a: &Mat3, t: [f64; 3]) -> Mat3x4 {
    [
        [a[0][0], a[0][1], a[0][2], t[0]],
        [a[1][0], a[1][1], a[1][2], t[1]],
        [a[2][0], a[2][1], a[2][2], t[2]],
    ]
}

/// Compose two affine transforms: apply `b` first, then `a`.
pub fn affine_mul(a: &Mat3x4, b: &Mat3x4) -> Mat3x4 {
    let (la, ta) = split_affine(a);
    let (lb, tb) = split_affine(b);
    let lin = mat3_mul(&la, &lb);
    let off = mat3_mul_vec(&la, tb);
    join_affine(&lin, [off[0] + ta[0], off[1] + ta[1], off[2] + ta[2]])
}

/// Inverse of an affine transform: `[A | t]⁻¹ = [A⁻¹ | -A⁻¹·t]`.
pub fn affine_invert(m: &Mat3x4) -> Result<Mat3x4, ColorError> {
    let (a, t) = split_affine(m);
    let inv = mat3_invert(&a)?;
    let off = mat3_mul_vec(&inv, t);
    Ok(join_affine(&inv, [-off[0], -off[1], -off[2]]))
}

pub fn affine_apply(m: &Mat3x4, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2] + m[0][3],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2] + m[1][3],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2] + m[2][3],
    ]
}

/// Narrow to the `f32` row-major layout kernels consume.
pub fn to_f32_3x3(m: &Mat3) -> [f32; 9] {
    let mut out = [0.0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[r * 3 + c] = m[r][c] as f32;
        }
    }
    out
}

pub fn to_f32_3x4(m: &Mat3x4) -> [f32; 12] {
    let mut out = [0.0f32; 12];
    for r in 0..3 {
        for c in 0..4 {
            out[r * 4 + c] = m[r][c] as f32;
        }
    }
    out
}

pub fn approx_eq(a: &Mat3, b: &Mat3, tolerance: f64) -> bool {
    a.iter()
        .flatten()
        .zip(b.iter().flatten())
        .all(|(x, y)| (x - y).abs() <= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invert_roundtrip() {
        let m = [[2.0, 0.5, 1.0], [0.0, 3.0, -1.0], [1.0, 1.0, 1.0]];
        let inv = mat3_invert(&m).unwrap();
        assert!(approx_eq(&mat3_mul(&m, &inv), &IDENTITY, 1e-12));
        assert!(approx_eq(&mat3_mul(&inv, &m), &IDENTITY, 1e-12));
    }

    #[test]
    fn test_singular_rejected() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 0.0]];
        assert!(matches!(mat3_invert(&m), Err(ColorError::SingularMatrix(_))));
    }

    #[test]
    fn test_affine_inverse() {
        let m = join_affine(&[[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [1.0, 0.0, 1.0]], [1.0, -2.0, 3.0]);
        let inv = affine_invert(&m).unwrap();
        let v = [0.25, 0.5, 0.75];
        let back = affine_apply(&inv, affine_apply(&m, v));
        for i in 0..3 {
            assert!((back[i] - v[i]).abs() < 1e-12);
        }
        let id = affine_mul(&inv, &m);
        let (lin, off) = split_affine(&id);
        assert!(approx_eq(&lin, &IDENTITY, 1e-12));
        assert!(off.iter().all(|o| o.abs() < 1e-12));
    }

    #[test]
    fn test_f32_layout_is_row_major() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        assert_eq!(to_f32_3x3(&m), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }
}
