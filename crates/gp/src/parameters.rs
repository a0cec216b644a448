use crate::errors::{HodlrError, Result};
use crate::kernels::Kernel;
use crate::{HODLR_DEFAULT_MAX_RANK, HODLR_DEFAULT_NLEAF, HODLR_DEFAULT_TOL};
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A set of validated HODLR GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct HodlrValidParams<F: Float, K: Kernel<F>> {
    /// Covariance kernel k(x, x')
    pub(crate) kernel: K,
    /// Maximum size of dense diagonal blocks
    pub(crate) nleaf: usize,
    /// Relative Frobenius tolerance of off-diagonal block compression
    pub(crate) tol: F,
    /// Maximum rank of a compressed off-diagonal block
    pub(crate) max_rank: usize,
    /// Value added to the diagonal of the covariance matrix
    pub(crate) jitter: F,
}

impl<F: Float, K: Kernel<F> + Default> Default for HodlrValidParams<F, K> {
    fn default() -> HodlrValidParams<F, K> {
        HodlrValidParams::new(K::default())
    }
}

impl<F: Float, K: Kernel<F>> HodlrValidParams<F, K> {
    pub(crate) fn new(kernel: K) -> Self {
        HodlrValidParams {
            kernel,
            nleaf: HODLR_DEFAULT_NLEAF,
            tol: F::cast(HODLR_DEFAULT_TOL),
            max_rank: HODLR_DEFAULT_MAX_RANK,
            jitter: F::zero(),
        }
    }

    /// Get kernel k(x, x')
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get the maximum size of leaf blocks
    pub fn nleaf(&self) -> usize {
        self.nleaf
    }

    /// Get compression tolerance
    pub fn tol(&self) -> F {
        self.tol
    }

    /// Get the rank cap of compressed blocks
    pub fn max_rank(&self) -> usize {
        self.max_rank
    }

    /// Get diagonal jitter
    pub fn jitter(&self) -> F {
        self.jitter
    }
}

#[derive(Clone, Debug)]
/// The set of parameters that can be specified for the execution of
/// the [HODLR GP algorithm](struct.GaussianProcess.html).
pub struct HodlrParams<F: Float, K: Kernel<F>>(HodlrValidParams<F, K>);

impl<F: Float, K: Kernel<F>> HodlrParams<F, K> {
    /// A constructor for HODLR GP parameters given the covariance kernel
    pub fn new(kernel: K) -> HodlrParams<F, K> {
        Self(HodlrValidParams::new(kernel))
    }

    /// A constructor for HODLR GP parameters from validated parameters
    pub fn new_from_valid(params: &HodlrValidParams<F, K>) -> Self
    where
        K: Clone,
    {
        Self(params.clone())
    }

    /// Set covariance kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set the maximum number of points of a leaf, factorized with a dense cholesky.
    /// Should be > 0
    pub fn nleaf(mut self, nleaf: usize) -> Self {
        self.0.nleaf = nleaf;
        self
    }

    /// Set the relative tolerance used to compress off-diagonal blocks.
    /// Should be > 0
    pub fn tol(mut self, tol: F) -> Self {
        self.0.tol = tol;
        self
    }

    /// Set the maximum rank of compressed off-diagonal blocks.
    /// Building fails when a block needs more than `max_rank` to reach the tolerance.
    pub fn max_rank(mut self, max_rank: usize) -> Self {
        self.0.max_rank = max_rank;
        self
    }

    /// Set jitter.
    ///
    /// Jitter is added to the diagonal to improve numerical stability
    pub fn jitter(mut self, jitter: F) -> Self {
        self.0.jitter = jitter;
        self
    }
}

impl<F: Float, K: Kernel<F>> From<HodlrValidParams<F, K>> for HodlrParams<F, K> {
    fn from(valid: HodlrValidParams<F, K>) -> Self {
        HodlrParams(valid)
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for HodlrParams<F, K> {
    type Checked = HodlrValidParams<F, K>;
    type Error = HodlrError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.nleaf == 0 {
            return Err(HodlrError::InvalidValueError(
                "`nleaf` cannot be 0!".to_string(),
            ));
        }
        if !self.0.tol.is_finite() || self.0.tol <= F::zero() {
            return Err(HodlrError::InvalidValueError(format!(
                "`tol` should be a positive value, got {}",
                self.0.tol
            )));
        }
        if self.0.max_rank == 0 {
            return Err(HodlrError::InvalidValueError(
                "`max_rank` cannot be 0!".to_string(),
            ));
        }
        if !self.0.jitter.is_finite() || self.0.jitter < F::zero() {
            return Err(HodlrError::InvalidValueError(format!(
                "`jitter` should be a non negative value, got {}",
                self.0.jitter
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::SquaredExponentialKernel;

    #[test]
    fn test_default_params() {
        let params = HodlrParams::new(SquaredExponentialKernel::<f64>::default())
            .check()
            .expect("valid params");
        assert_eq!(params.nleaf(), 100);
        assert_eq!(params.tol(), 1e-12);
        assert_eq!(params.max_rank(), 256);
        assert_eq!(params.jitter(), 0.);
        assert_eq!(params, HodlrValidParams::default());
    }

    #[test]
    fn test_invalid_params() {
        let kernel = SquaredExponentialKernel::<f64>::default();
        let invalids = [
            HodlrParams::new(kernel).nleaf(0),
            HodlrParams::new(kernel).tol(0.),
            HodlrParams::new(kernel).tol(f64::NAN),
            HodlrParams::new(kernel).max_rank(0),
            HodlrParams::new(kernel).jitter(-1e-6),
        ];
        for params in invalids {
            assert!(matches!(
                params.check(),
                Err(HodlrError::InvalidValueError(_))
            ));
        }
        let valid = HodlrParams::new(kernel).nleaf(1).tol(1e-3).jitter(1e-8);
        assert!(valid.check_ref().is_ok());
    }
}
