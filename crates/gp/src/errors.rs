use linfa_linalg::LinalgError;
use thiserror::Error;

/// A result type for HODLR gaussian process computations
pub type Result<T> = std::result::Result<T, HodlrError>;

/// An error when building or querying a [`GaussianProcess`](crate::GaussianProcess)
#[derive(Error, Debug)]
pub enum HodlrError {
    /// When coordinates, noise or observations do not have compatible shapes,
    /// or when noise values are negative or not finite
    #[error("Shape mismatch error: {0}")]
    ShapeMismatchError(String),
    /// When a query is made before a successful `build`
    #[error("NotComputed error: the covariance factorization has to be built first")]
    NotComputedError,
    /// When a leaf block or a low-rank correction is not positive definite
    #[error("NonPositiveDefinite error: {0}")]
    NonPositiveDefiniteError(String),
    /// When an off-diagonal block does not reach the tolerance within the rank cap
    #[error("CompressionFailure error: {0}")]
    CompressionFailureError(String),
    /// When error due to a bad parameter value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] LinalgError),
}

impl HodlrError {
    /// Cholesky failures are reported as positive-definiteness errors,
    /// other linear algebra failures are kept as is.
    pub(crate) fn from_cholesky(err: LinalgError, what: &str) -> HodlrError {
        match err {
            LinalgError::NotPositiveDefinite => {
                HodlrError::NonPositiveDefiniteError(format!("{what} is not positive definite"))
            }
            err => HodlrError::LinalgError(err),
        }
    }
}
