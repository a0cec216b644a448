use crate::kernels::Kernel;
use linfa::Float;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Ix2};

/// Lazy covariance matrix `S_ij = k(x_i, x_j) + d_ij (yerr_i^2 + jitter)`.
///
/// Entries are only evaluated when requested by leaf blocks or compression,
/// the full (n, n) matrix is never built.
pub(crate) struct CovarianceBuilder<'a, F: Float, K: Kernel<F>> {
    kernel: &'a K,
    x: ArrayView2<'a, F>,
    /// Diagonal noise term yerr^2 + jitter
    noise: Array1<F>,
}

impl<'a, F: Float, K: Kernel<F>> CovarianceBuilder<'a, F, K> {
    /// Constructor given the kernel, the (n, nx) coordinates and (n,) uncertainties.
    /// Inputs are expected to be checked beforehand.
    pub fn new(kernel: &'a K, x: ArrayView2<'a, F>, yerr: ArrayView1<'a, F>, jitter: F) -> Self {
        CovarianceBuilder {
            kernel,
            x,
            noise: yerr.mapv(|e| e * e + jitter),
        }
    }

    /// Size of the matrix
    pub fn n(&self) -> usize {
        self.x.nrows()
    }

    /// Single entry S_ij
    pub fn entry(&self, i: usize, j: usize) -> F {
        let k = self.kernel.value(self.x.row(i), self.x.row(j));
        if i == j {
            k + self.noise[i]
        } else {
            k
        }
    }

    /// Row `i` restricted to columns `[lo, hi)`
    pub fn row(&self, i: usize, lo: usize, hi: usize) -> Array1<F> {
        Array1::from_shape_fn(hi - lo, |j| self.entry(i, lo + j))
    }

    /// Column `j` restricted to rows `[lo, hi)`
    pub fn column(&self, lo: usize, hi: usize, j: usize) -> Array1<F> {
        Array1::from_shape_fn(hi - lo, |i| self.entry(lo + i, j))
    }

    /// Dense block of rows `[row_lo, row_hi)` and columns `[col_lo, col_hi)`
    pub fn block(
        &self,
        (row_lo, row_hi): (usize, usize),
        (col_lo, col_hi): (usize, usize),
    ) -> Array2<F> {
        let mut block = self.kernel.matrix(
            &self.x.slice(s![row_lo..row_hi, ..]),
            &self.x.slice(s![col_lo..col_hi, ..]),
        );
        for i in row_lo.max(col_lo)..row_hi.min(col_hi) {
            block[[i - row_lo, i - col_lo]] += self.noise[i];
        }
        block
    }
}

/// Kernel matrix (n, n) at `t` points given as a (n, nx) matrix, without any noise
pub(crate) fn get_matrix<F: Float, K: Kernel<F>>(
    kernel: &K,
    t: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    kernel.matrix(t, t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::SquaredExponentialKernel;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};

    #[test]
    fn test_entries_and_noise() {
        let kernel = SquaredExponentialKernel::new(1., 1.);
        let x = array![[0.], [1.], [3.]];
        let yerr = array![0.1, 0.2, 0.3];
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 1e-6);
        assert_eq!(cov.n(), 3);
        assert_abs_diff_eq!(cov.entry(0, 0), 1. + 0.01 + 1e-6, epsilon = 1e-15);
        assert_abs_diff_eq!(cov.entry(2, 2), 1. + 0.09 + 1e-6, epsilon = 1e-15);
        assert_abs_diff_eq!(cov.entry(0, 1), (-0.5f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(cov.entry(1, 0), cov.entry(0, 1));
    }

    #[test]
    fn test_block_matches_entries() {
        let kernel = SquaredExponentialKernel::new(2., 0.5);
        let x = Array::linspace(0., 2., 9).insert_axis(Axis(1));
        let yerr = Array::from_elem(9, 0.1);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);
        // overlapping ranges exercise the diagonal correction
        let block = cov.block((2, 7), (4, 9));
        for i in 0..5 {
            for j in 0..5 {
                assert_abs_diff_eq!(block[[i, j]], cov.entry(2 + i, 4 + j), epsilon = 1e-15);
            }
        }
        assert_abs_diff_eq!(cov.row(3, 4, 9), block.row(1).to_owned(), epsilon = 1e-15);
        assert_abs_diff_eq!(cov.column(2, 7, 5), block.column(1).to_owned(), epsilon = 1e-15);
    }

    #[test]
    fn test_get_matrix() {
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| (a[0] - b[0]).abs() + a[1] * b[1];
        let t = array![[0., 1.], [2., -1.], [0.5, 3.]];
        let m = get_matrix(&kernel, &t);
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(m[[i, j]], kernel(t.row(i), t.row(j)));
            }
        }
    }
}
