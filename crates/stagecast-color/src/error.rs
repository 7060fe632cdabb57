//! Color subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColorError {
    #[error("unsupported colourspace: {0}")]
    UnsupportedSpace(String),
    #[error("matrix is singular (determinant {0})")]
    SingularMatrix(f64),
    #[error("unsupported bit depth: {0}")]
    BitDepth(u32),
}
