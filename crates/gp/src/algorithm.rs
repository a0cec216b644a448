use crate::covariance::{get_matrix, CovarianceBuilder};
use crate::errors::{HodlrError, Result};
use crate::factorization::Factorization;
use crate::kernels::Kernel;
use crate::parameters::{HodlrParams, HodlrValidParams};
use crate::tree::HodlrTree;
use crate::utils::{check_length, check_training_inputs, symmetrize};

use linfa::{Float, ParamGuard};
use linfa_linalg::eigh::*;
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

use log::{debug, warn};
use std::fmt;
use std::time::Instant;

/// Default maximum number of points in a leaf of the HODLR tree
pub const HODLR_DEFAULT_NLEAF: usize = 100;
/// Default relative tolerance of the off-diagonal blocks compression
pub const HODLR_DEFAULT_TOL: f64 = 1e-12;
/// Default maximum rank of a compressed off-diagonal block
pub const HODLR_DEFAULT_MAX_RANK: usize = 256;

/// Eigenvalues of covariance matrices below this threshold are ignored when sampling
const SAMPLING_EIGEN_THRESHOLD: f64 = 1e-9;

/// State of the engine: a factorization is only available after a successful build
/// and is tied to the inputs it was computed from.
#[derive(Debug)]
enum State<F: Float> {
    Uncomputed,
    Computed {
        x: Array2<F>,
        yerr: Array1<F>,
        factorization: Factorization<F>,
    },
}

/// Exact Gaussian Process regression based on a hierarchical off-diagonal
/// low-rank (HODLR) factorization of the covariance matrix.
///
/// The covariance matrix `S = K(x, x) + diag(yerr^2 + jitter)` of the training
/// points is recursively split into dense diagonal leaves and off-diagonal blocks compressed
/// with adaptive cross approximation. The resulting factorization gives the
/// log-likelihood and the posterior predictions in near-linear time with respect to
/// the number of training points.
///
/// The factorization depends on the training coordinates and their uncertainties only,
/// observations are given at query time so that several datasets sharing the same
/// inputs can be evaluated without refactorizing.
///
/// # Example
///
/// ```
/// use hodlr_gp::{GaussianProcess, SquaredExponentialKernel};
/// use ndarray::{Array, Axis};
///
/// let x = Array::linspace(0., 10., 50).insert_axis(Axis(1));
/// let yerr = Array::from_elem(50, 0.1);
/// let y = x.column(0).mapv(f64::sin);
///
/// let mut gp = GaussianProcess::params(SquaredExponentialKernel::new(1., 1.))
///     .nleaf(16)
///     .tol(1e-10)
///     .build(&x, &yerr)
///     .expect("HODLR factorization");
///
/// let ll = gp.log_likelihood(&y).expect("log likelihood");
/// assert!(ll.is_finite());
///
/// let xtest = Array::linspace(0., 10., 20).insert_axis(Axis(1));
/// let (mean, cov) = gp.predict(&y, &xtest).expect("prediction");
/// assert_eq!(mean.len(), 20);
/// assert_eq!(cov.dim(), (20, 20));
///
/// // new training inputs, same kernel
/// let x = Array::linspace(0., 5., 30).insert_axis(Axis(1));
/// gp.build(&x, &Array::from_elem(30, 0.2)).expect("HODLR factorization");
/// ```
///
/// # Reference:
///
/// S. Ambikasaran, D. Foreman-Mackey, L. Greengard, D. W. Hogg, M. O'Neil,
/// [Fast Direct Methods for Gaussian Processes](https://arxiv.org/abs/1403.6015),
/// IEEE Transactions on Pattern Analysis and Machine Intelligence 38.2 (2016): 252-265.
#[derive(Debug)]
pub struct GaussianProcess<F: Float, K: Kernel<F>> {
    /// Parameters used to build the factorization
    params: HodlrValidParams<F, K>,
    state: State<F>,
}

impl<F: Float, K: Kernel<F> + fmt::Display> fmt::Display for GaussianProcess<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let n = match &self.state {
            State::Computed { x, .. } => x.nrows(),
            State::Uncomputed => 0,
        };
        write!(
            f,
            "HodlrGP(kernel={}, nleaf={}, tol={}, max_rank={}, n={}, computed={})",
            self.params.kernel,
            self.params.nleaf,
            self.params.tol,
            self.params.max_rank,
            n,
            self.is_computed()
        )
    }
}

impl<F: Float, K: Kernel<F>> HodlrValidParams<F, K> {
    /// Build a gaussian process engine with these parameters and factorize the covariance
    /// matrix of the given training inputs.
    pub fn build(
        self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        yerr: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<GaussianProcess<F, K>> {
        let mut gp = GaussianProcess {
            params: self,
            state: State::Uncomputed,
        };
        gp.build(x, yerr)?;
        Ok(gp)
    }
}

impl<F: Float, K: Kernel<F>> HodlrParams<F, K> {
    /// Check parameters, then build a gaussian process engine and factorize
    /// the covariance matrix of the given training inputs.
    pub fn build(
        self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        yerr: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<GaussianProcess<F, K>> {
        self.check()?.build(x, yerr)
    }
}

impl<F: Float, K: Kernel<F>> GaussianProcess<F, K> {
    /// HODLR GP parameters constructor given the covariance kernel
    pub fn params(kernel: K) -> HodlrParams<F, K> {
        HodlrParams::new(kernel)
    }

    /// Uncomputed engine with default parameters
    pub fn new(kernel: K) -> Self {
        GaussianProcess {
            params: HodlrValidParams::new(kernel),
            state: State::Uncomputed,
        }
    }

    /// Uncomputed engine from given parameters
    pub fn from_params(params: HodlrParams<F, K>) -> Result<Self> {
        Ok(GaussianProcess {
            params: params.check()?,
            state: State::Uncomputed,
        })
    }

    /// Validated parameters of the engine
    pub fn parameters(&self) -> &HodlrValidParams<F, K> {
        &self.params
    }

    /// Covariance kernel
    pub fn kernel(&self) -> &K {
        &self.params.kernel
    }

    /// Replace the covariance kernel, any previous factorization is dropped
    pub fn set_kernel(&mut self, kernel: K) {
        self.params.kernel = kernel;
        self.state = State::Uncomputed;
    }

    /// Whether a factorization is available for queries
    pub fn is_computed(&self) -> bool {
        matches!(self.state, State::Computed { .. })
    }

    /// Training coordinates (n, nx) and uncertainties (n,) of the current factorization
    pub fn training_data(&self) -> Result<(&Array2<F>, &Array1<F>)> {
        match &self.state {
            State::Computed { x, yerr, .. } => Ok((x, yerr)),
            State::Uncomputed => Err(HodlrError::NotComputedError),
        }
    }

    /// Current factorization of the training covariance matrix
    pub fn factorization(&self) -> Result<&Factorization<F>> {
        match &self.state {
            State::Computed { factorization, .. } => Ok(factorization),
            State::Uncomputed => Err(HodlrError::NotComputedError),
        }
    }

    /// Factorize the covariance matrix of the training points `x` (n, nx)
    /// with uncertainties `yerr` (n,).
    ///
    /// Any previous factorization is dropped first: on failure the engine is left uncomputed.
    pub fn build(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        yerr: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<()> {
        self.state = State::Uncomputed;
        check_training_inputs(x, yerr)?;

        let now = Instant::now();
        let cov = CovarianceBuilder::new(
            &self.params.kernel,
            x.view(),
            yerr.view(),
            self.params.jitter,
        );
        let tree = HodlrTree::new(
            &cov,
            self.params.nleaf,
            self.params.tol,
            self.params.max_rank,
        )?;
        debug!(
            "HODLR tree of {} points (depth={}, max rank={}) built in {} ms",
            cov.n(),
            tree.depth(),
            tree.max_rank(),
            now.elapsed().as_millis()
        );

        let now = Instant::now();
        let factorization = Factorization::new(tree)?;
        debug!("HODLR factorization in {} ms", now.elapsed().as_millis());

        self.state = State::Computed {
            x: x.to_owned(),
            yerr: yerr.to_owned(),
            factorization,
        };
        Ok(())
    }

    /// Kernel matrix (m, m) at `t` points given as a (m, nx) matrix, without noise.
    /// Does not require a factorization.
    pub fn get_matrix(&self, t: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        get_matrix(&self.params.kernel, t)
    }

    /// Solve `S.x = b` for a (n,) right hand side
    pub fn solve(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Array1<F>> {
        self.factorization()?.solve(b)
    }

    /// Solve `S.x = b` for a (n, k) right hand side
    pub fn solve_many(&self, b: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        self.factorization()?.solve_many(b)
    }

    /// Natural logarithm of the determinant of the training covariance matrix
    pub fn log_determinant(&self) -> Result<F> {
        Ok(self.factorization()?.log_determinant())
    }

    /// Log marginal likelihood of the observations `y` (n,)
    /// `-0.5 * (y.S^-1.y + log(det(S)) + n.log(2.pi))`.
    ///
    /// Returns negative infinity when the value is not finite.
    pub fn log_likelihood(&self, y: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        let factorization = self.factorization()?;
        check_length("observations", y.len(), factorization.n())?;
        let alpha = match factorization.solve(y) {
            Ok(alpha) => alpha,
            Err(HodlrError::NonPositiveDefiniteError(_)) => return Ok(F::neg_infinity()),
            Err(err) => return Err(err),
        };
        let n = F::cast(y.len());
        let ll = F::cast(-0.5)
            * (y.dot(&alpha)
                + factorization.log_determinant()
                + n * F::cast(2. * std::f64::consts::PI).ln());
        if ll.is_finite() {
            Ok(ll)
        } else {
            Ok(F::neg_infinity())
        }
    }

    /// Check observations and test points, returns the factorization
    /// and the cross covariance K(t, x) (m, n)
    fn cross_covariance(
        &self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(&Factorization<F>, Array2<F>)> {
        let (x, _) = self.training_data()?;
        let factorization = self.factorization()?;
        check_length("observations", y.len(), factorization.n())?;
        if t.ncols() != x.ncols() {
            return Err(HodlrError::ShapeMismatchError(format!(
                "test points have {} components, expected {}",
                t.ncols(),
                x.ncols()
            )));
        }
        Ok((factorization, self.params.kernel.matrix(t, x)))
    }

    /// Predict the posterior mean (m,) and covariance (m, m) at `t` points given as
    /// a (m, nx) matrix conditioned on the observations `y` (n,).
    pub fn predict(
        &self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array2<F>)> {
        let (factorization, kxs) = self.cross_covariance(y, t)?;
        let mean = kxs.dot(&factorization.solve(y)?);
        let v = factorization.solve_many(&kxs.t())?;
        let cov = symmetrize(self.get_matrix(t) - kxs.dot(&v));
        Ok((mean, cov))
    }

    /// Predict the posterior mean (m,) and variances (m,) at `t` points given as
    /// a (m, nx) matrix conditioned on the observations `y` (n,).
    ///
    /// The full (m, m) covariance matrix is never built.
    pub fn predict_var(
        &self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let (factorization, kxs) = self.cross_covariance(y, t)?;
        let mean = kxs.dot(&factorization.solve(y)?);
        let v = factorization.solve_many(&kxs.t())?;
        let prior_var = Array1::from_iter(t.rows().into_iter().map(|r| self.params.kernel.value(r, r)));
        let mut var = prior_var - (&kxs * &v.t()).sum_axis(Axis(1));

        // Variance might be slightly negative depending on
        // machine precision: set to zero in that case
        let mut n_neg = 0;
        Zip::from(&mut var).for_each(|v| {
            if *v < F::zero() {
                *v = F::zero();
                n_neg += 1;
            }
        });
        if n_neg > 0 {
            warn!("{n_neg} negative predicted variances set to zero");
        }
        Ok((mean, var))
    }

    /// Sample `n_traj` trajectories of the prior process at `t` points given as a (m, nx) matrix.
    /// Returns a (m, n_traj) matrix.
    pub fn sample_prior(
        &self,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        self.sample_prior_with_rng(t, n_traj, &mut Xoshiro256Plus::from_entropy())
    }

    /// Same as [`GaussianProcess::sample_prior`] using the given random generator
    pub fn sample_prior_with_rng<R: Rng>(
        &self,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        sample(
            Array1::zeros(t.nrows()),
            self.get_matrix(t),
            n_traj,
            rng,
        )
    }

    /// Sample `n_traj` trajectories of the posterior process conditioned on the observations `y` (n,)
    /// at `t` points given as a (m, nx) matrix. Returns a (m, n_traj) matrix.
    pub fn sample_conditional(
        &self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
    ) -> Result<Array2<F>> {
        self.sample_conditional_with_rng(y, t, n_traj, &mut Xoshiro256Plus::from_entropy())
    }

    /// Same as [`GaussianProcess::sample_conditional`] using the given random generator
    pub fn sample_conditional_with_rng<R: Rng>(
        &self,
        y: &ArrayBase<impl Data<Elem = F>, Ix1>,
        t: &ArrayBase<impl Data<Elem = F>, Ix2>,
        n_traj: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        let (mean, cov) = self.predict(y, t)?;
        sample(mean, cov, n_traj, rng)
    }
}

/// Draw `n_traj` trajectories from the multivariate normal distribution given its
/// mean (m,) and covariance (m, m) using eigenvalues decomposition,
/// which copes with ill-conditioned covariance matrices better than cholesky.
pub(crate) fn sample<F: Float, R: Rng>(
    mean: Array1<F>,
    cov: Array2<F>,
    n_traj: usize,
    rng: &mut R,
) -> Result<Array2<F>> {
    let n_eval = mean.len();
    let (v, w) = cov.eigh_into()?;
    let v = v.mapv(|x| {
        // We lower bound the float value at 1e-9
        if x < F::cast(SAMPLING_EIGEN_THRESHOLD) {
            return F::zero();
        }
        x.sqrt()
    });
    let c = w * &v;
    let ary = Array::<f64, _>::random_using((n_eval, n_traj), StandardNormal, rng).mapv(|v| F::cast(v));
    Ok(mean.insert_axis(Axis(1)) + c.dot(&ary))
}
