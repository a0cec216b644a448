//! Recursive factorization of a HODLR covariance matrix.
//!
//! At an internal node the matrix reads
//! ```text
//! | A1     U.Vt |
//! | V.Ut   A2   |
//! ```
//! where A1 and A2 are the (already factorized) children. Using `G1 = Ut.A1^-1.U = L1.L1t`
//! and `G2 = Vt.A2^-1.V`, the Schur complement `A2 - V.G1.Vt` is handled with the
//! Woodbury identity through the small (r, r) matrix `M = I - L1t.G2.L1` so that
//! ```text
//! det(A) = det(A1) det(A2) det(M)
//! ```
//! Every node only requires symmetric positive definite factorizations.

use crate::errors::{HodlrError, Result};
use crate::tree::{HodlrTree, TreeNode};
use crate::utils::{check_length, checked_cholesky, cholesky_log_det, cholesky_solve, symmetrize};
use linfa::Float;
use linfa_linalg::eigh::*;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};

/// Low-rank correction of an internal node
#[derive(Debug)]
struct WoodburyCorrection<F: Float> {
    /// Coupling factors of the off-diagonal block U.Vt, (n1, r) and (n2, r)
    u: Array2<F>,
    v: Array2<F>,
    /// A1^-1.U (n1, r)
    y1: Array2<F>,
    /// A2^-1.V (n2, r)
    y2: Array2<F>,
    /// Square root of Ut.A1^-1.U (r, r)
    l1: Array2<F>,
    /// Lower cholesky factor of I - L1t.Vt.A2^-1.V.L1 (r, r)
    m_chol: Array2<F>,
}

#[derive(Debug)]
enum FactorNode<F: Float> {
    Leaf {
        chol: Array2<F>,
    },
    Branch {
        n_left: usize,
        left: Box<FactorNode<F>>,
        right: Box<FactorNode<F>>,
        /// None when the off-diagonal block is zero
        correction: Option<WoodburyCorrection<F>>,
    },
}

impl<F: Float> FactorNode<F> {
    fn new(node: TreeNode<F>) -> Result<Self> {
        match node {
            TreeNode::Leaf { lo, hi, block } => {
                let chol = checked_cholesky(&block, &format!("leaf block [{lo}, {hi})"))?;
                Ok(FactorNode::Leaf { chol })
            }
            TreeNode::Branch {
                lo,
                mid,
                hi,
                left,
                right,
                coupling,
            } => {
                let (left, right) = rayon::join(
                    move || FactorNode::new(*left),
                    move || FactorNode::new(*right),
                );
                let (left, right) = (left?, right?);

                let correction = if coupling.rank() == 0 {
                    None
                } else {
                    let (u, v) = (coupling.u, coupling.v);
                    let (y1, y2) = rayon::join(|| left.solve(u.view()), || right.solve(v.view()));
                    let (y1, y2) = (y1?, y2?);

                    let g1 = symmetrize(u.t().dot(&y1));
                    let (vals, vecs) = g1.eigh_into()?;
                    let sqrt_vals = vals.mapv(|e| if e > F::zero() { e.sqrt() } else { F::zero() });
                    let l1 = vecs * &sqrt_vals;

                    let g2 = v.t().dot(&y2);
                    let m = symmetrize(Array2::eye(l1.ncols()) - l1.t().dot(&g2).dot(&l1));
                    let m_chol = checked_cholesky(
                        &m,
                        &format!("Schur complement of block [{lo}, {mid}) x [{mid}, {hi})"),
                    )?;
                    Some(WoodburyCorrection {
                        u,
                        v,
                        y1,
                        y2,
                        l1,
                        m_chol,
                    })
                };
                Ok(FactorNode::Branch {
                    n_left: mid - lo,
                    left: Box::new(left),
                    right: Box::new(right),
                    correction,
                })
            }
        }
    }

    /// Solve A.x = b for a (n, k) right hand side
    fn solve(&self, b: ArrayView2<F>) -> Result<Array2<F>> {
        match self {
            FactorNode::Leaf { chol } => cholesky_solve(chol, &b),
            FactorNode::Branch {
                n_left,
                left,
                right,
                correction,
            } => {
                let mut x = Array2::zeros(b.raw_dim());
                let (b1, b2) = b.split_at(Axis(0), *n_left);
                let (z1, z2) = rayon::join(|| left.solve(b1), || right.solve(b2));
                let (z1, z2) = (z1?, z2?);

                let (x1, x2) = match correction {
                    None => (z1, z2),
                    Some(c) => {
                        let w = z2 - c.y2.dot(&c.u.t().dot(&z1));
                        let t = c.l1.t().dot(&c.v.t().dot(&w));
                        let s = cholesky_solve(&c.m_chol, &t)?;
                        let x2 = w + c.y2.dot(&c.l1.dot(&s));
                        let x1 = z1 - c.y1.dot(&c.v.t().dot(&x2));
                        (x1, x2)
                    }
                };

                x.slice_mut(s![..*n_left, ..]).assign(&x1);
                x.slice_mut(s![*n_left.., ..]).assign(&x2);
                Ok(x)
            }
        }
    }

    fn log_determinant(&self) -> F {
        match self {
            FactorNode::Leaf { chol } => cholesky_log_det(chol),
            FactorNode::Branch {
                left,
                right,
                correction,
                ..
            } => {
                let ld_correction = correction
                    .as_ref()
                    .map_or(F::zero(), |c| cholesky_log_det(&c.m_chol));
                left.log_determinant() + right.log_determinant() + ld_correction
            }
        }
    }
}

/// Factorized representation of the (n, n) training covariance matrix
/// allowing linear solves and log-determinant evaluation.
#[derive(Debug)]
pub struct Factorization<F: Float> {
    n: usize,
    root: FactorNode<F>,
}

impl<F: Float> Factorization<F> {
    /// Factorize the given HODLR tree, children first.
    ///
    /// Fails with a `NonPositiveDefiniteError` when a leaf block or a Schur complement
    /// is not positive definite.
    pub(crate) fn new(tree: HodlrTree<F>) -> Result<Self> {
        let n = tree.root.range().1;
        let root = FactorNode::new(tree.root)?;
        Ok(Factorization { n, root })
    }

    /// Size of the factorized matrix
    pub fn n(&self) -> usize {
        self.n
    }

    /// Solve S.x = b for a (n,) right hand side
    pub fn solve(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Array1<F>> {
        check_length("right hand side", b.len(), self.n)?;
        let x = self.root.solve(b.view().insert_axis(Axis(1)))?;
        Ok(x.index_axis_move(Axis(1), 0))
    }

    /// Solve S.x = b for a (n, k) right hand side, columns being independent systems
    pub fn solve_many(&self, b: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        if b.nrows() != self.n {
            return Err(HodlrError::ShapeMismatchError(format!(
                "right hand side has {} rows, expected {}",
                b.nrows(),
                self.n
            )));
        }
        self.root.solve(b.view())
    }

    /// Natural logarithm of the determinant of S
    pub fn log_determinant(&self) -> F {
        self.root.log_determinant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::CovarianceBuilder;
    use crate::kernels::{Kernel, Matern32Kernel, SquaredExponentialKernel};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, ArrayView1};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn factorize<K: Kernel<f64>>(
        kernel: &K,
        x: &Array2<f64>,
        yerr: &Array1<f64>,
        nleaf: usize,
    ) -> (Array2<f64>, Result<Factorization<f64>>) {
        let cov = CovarianceBuilder::new(kernel, x.view(), yerr.view(), 0.);
        let dense = cov.block((0, cov.n()), (0, cov.n()));
        let fact = HodlrTree::new(&cov, nleaf, 1e-12, 256).and_then(Factorization::new);
        (dense, fact)
    }

    #[test]
    fn test_solve_against_dense() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let mut xs = Array::random_using(300, Uniform::new(0., 10.), &mut rng).to_vec();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let x = Array::from_shape_vec((300, 1), xs).unwrap();
        let yerr = Array::random_using(300, Uniform::new(0.05, 0.2), &mut rng);
        let (dense, fact) = factorize(&SquaredExponentialKernel::new(1., 0.8), &x, &yerr, 16);
        let fact = fact.expect("factorization");
        assert_eq!(fact.n(), 300);

        let b = Array::random_using(300, Uniform::new(-1., 1.), &mut rng);
        let sol = fact.solve(&b).expect("solve");
        assert_abs_diff_eq!(dense.dot(&sol), b, epsilon = 1e-6);

        let dense_chol = checked_cholesky(&dense, "dense").unwrap();
        assert_abs_diff_eq!(
            fact.log_determinant(),
            cholesky_log_det(&dense_chol),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_solve_many() {
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        let x = Array::random_using((120, 2), Uniform::new(0., 1.), &mut rng);
        let yerr = Array::from_elem(120, 0.1);
        let (dense, fact) = factorize(&Matern32Kernel::new(2., 0.3), &x, &yerr, 10);
        let fact = fact.expect("factorization");

        let b = Array::random_using((120, 3), Uniform::new(-1., 1.), &mut rng);
        let sol = fact.solve_many(&b).expect("solve");
        assert_abs_diff_eq!(dense.dot(&sol), b, epsilon = 1e-6);
        for j in 0..3 {
            let col = fact.solve(&b.column(j)).expect("solve");
            assert_abs_diff_eq!(col, sol.column(j), epsilon = 1e-10);
        }

        assert!(matches!(
            fact.solve(&Array1::<f64>::zeros(10)),
            Err(HodlrError::ShapeMismatchError(_))
        ));
        assert!(matches!(
            fact.solve_many(&Array2::<f64>::zeros((119, 2))),
            Err(HodlrError::ShapeMismatchError(_))
        ));
    }

    #[test]
    fn test_uncoupled_blocks() {
        // far away clusters give zero off-diagonal blocks at the root
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| {
            if (a[0] - b[0]).abs() < 5. {
                (-(a[0] - b[0]).powi(2)).exp()
            } else {
                0.
            }
        };
        let x = Array::from_shape_fn((20, 1), |(i, _)| {
            if i < 10 {
                i as f64 * 0.1
            } else {
                100. + i as f64 * 0.1
            }
        });
        let yerr = Array::from_elem(20, 0.1);
        let (dense, fact) = factorize(&kernel, &x, &yerr, 5);
        let fact = fact.expect("factorization");
        let b = Array::linspace(-1., 1., 20);
        assert_abs_diff_eq!(dense.dot(&fact.solve(&b).unwrap()), b, epsilon = 1e-8);
        let dense_chol = checked_cholesky(&dense, "dense").unwrap();
        assert_abs_diff_eq!(
            fact.log_determinant(),
            cholesky_log_det(&dense_chol),
            epsilon = 1e-8
        );
    }

    #[test]
    fn test_non_positive_leaf() {
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| if a == b { 1. } else { 2. };
        let x = Array::linspace(0., 1., 8).insert_axis(Axis(1));
        let yerr = Array::zeros(8);
        let (_, fact) = factorize(&kernel, &x, &yerr, 2);
        assert!(matches!(fact, Err(HodlrError::NonPositiveDefiniteError(_))));
    }

    #[test]
    fn test_non_positive_schur_complement() {
        // both diagonal blocks are positive definite, the whole matrix is not
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| {
            let d = (a[0] - b[0]).abs();
            if d == 0. {
                1.
            } else if d < 1. {
                0.5
            } else {
                1.5
            }
        };
        let x = ndarray::array![[0.], [0.5], [10.], [10.5]];
        let yerr = Array::zeros(4);
        let (_, fact) = factorize(&kernel, &x, &yerr, 2);
        assert!(matches!(fact, Err(HodlrError::NonPositiveDefiniteError(_))));
    }
}
