//! Off-diagonal block compression using adaptive cross approximation (ACA)
//! with partial pivoting.
//!
//! Reference: M. Bebendorf, Approximation of boundary element matrices,
//! Numerische Mathematik 86 (2000), 565-589.

use crate::covariance::CovarianceBuilder;
use crate::errors::{HodlrError, Result};
use crate::kernels::Kernel;
use linfa::Float;
use ndarray::{Array1, Array2};
use ndarray_stats::QuantileExt;

/// Low-rank factors (U, V) such that `U.Vt` approximates a (nrows, ncols) block,
/// U is (nrows, r) and V is (ncols, r).
#[derive(Debug, Clone)]
pub(crate) struct LowRankBlock<F: Float> {
    pub u: Array2<F>,
    pub v: Array2<F>,
}

impl<F: Float> LowRankBlock<F> {
    fn from_crosses(nrows: usize, ncols: usize, us: &[Array1<F>], vs: &[Array1<F>]) -> Self {
        LowRankBlock {
            u: Array2::from_shape_fn((nrows, us.len()), |(i, k)| us[k][i]),
            v: Array2::from_shape_fn((ncols, vs.len()), |(j, k)| vs[k][j]),
        }
    }

    /// Rank of the approximation
    pub fn rank(&self) -> usize {
        self.u.ncols()
    }

    /// Dense (nrows, ncols) matrix U.Vt
    #[cfg(test)]
    pub fn to_dense(&self) -> Array2<F> {
        self.u.dot(&self.v.t())
    }
}

/// Unused index with the smallest `weight`
fn least_sampled<F: Float>(weight: &Array1<F>, used: &[bool]) -> Option<usize> {
    (0..used.len())
        .filter(|&i| !used[i])
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if weight[b] <= weight[i] => Some(b),
            _ => Some(i),
        })
}

/// Unused index with the largest absolute `values`
fn largest_unused<F: Float>(values: &Array1<F>, used: &[bool]) -> Option<usize> {
    (0..used.len())
        .filter(|&i| !used[i])
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if values[b].abs() >= values[i].abs() => Some(b),
            _ => Some(i),
        })
}

/// Compress the block of `cov` coupling rows `[rows.0, rows.1)` with columns `[cols.0, cols.1)`.
///
/// Iterations stop when the norm of the last cross `|u_k| |v_k|` falls below
/// `tol` times the Frobenius norm estimate of the approximation, and when the residuals
/// of the least sampled row and column meet the same tolerance. Rows (resp. columns)
/// which no cross has reached yet, as for clusters without coupling with the sampled
/// ones, are thus visited before convergence is accepted.
/// A block which needs more than `max_rank` crosses while not being exactly reproduced
/// yet is a failure.
pub(crate) fn aca<F: Float, K: Kernel<F>>(
    cov: &CovarianceBuilder<F, K>,
    rows: (usize, usize),
    cols: (usize, usize),
    tol: F,
    max_rank: usize,
) -> Result<LowRankBlock<F>> {
    let (nrows, ncols) = (rows.1 - rows.0, cols.1 - cols.0);
    let full_rank = nrows.min(ncols);

    let residual_row = |i: usize, us: &[Array1<F>], vs: &[Array1<F>]| {
        let mut row = cov.row(rows.0 + i, cols.0, cols.1);
        for (u, v) in us.iter().zip(vs) {
            row.scaled_add(-u[i], v);
        }
        row
    };
    let residual_column = |j: usize, us: &[Array1<F>], vs: &[Array1<F>]| {
        let mut col = cov.column(rows.0, rows.1, cols.0 + j);
        for (u, v) in us.iter().zip(vs) {
            col.scaled_add(-v[j], u);
        }
        col
    };
    let mut us: Vec<Array1<F>> = Vec::new();
    let mut vs: Vec<Array1<F>> = Vec::new();
    let mut used_rows = vec![false; nrows];
    let mut used_cols = vec![false; ncols];
    // accumulated |u| (resp. |v|) telling how much each row (resp. column) was reached
    let mut row_weight = Array1::<F>::zeros(nrows);
    let mut col_weight = Array1::<F>::zeros(ncols);
    // squared Frobenius norm of the current approximation
    let mut norm2 = F::zero();
    let mut pivot_row = 0;

    loop {
        used_rows[pivot_row] = true;
        let row = residual_row(pivot_row, &us, &vs);
        let pivot_col = row.mapv(|r| r.abs()).argmax().map_err(|_| {
            HodlrError::CompressionFailureError(format!(
                "non finite covariance value in block [{}, {}) x [{}, {})",
                rows.0, rows.1, cols.0, cols.1
            ))
        })?;
        let pivot = row[pivot_col];

        if pivot.abs() <= F::min_positive_value() {
            // this row is already reproduced, try another one
            match used_rows.iter().position(|u| !u) {
                Some(i) => {
                    pivot_row = i;
                    continue;
                }
                None => break,
            }
        }
        used_cols[pivot_col] = true;

        let v = row.mapv(|r| r / pivot);
        let u = residual_column(pivot_col, &us, &vs);

        let cross2 = u.dot(&u) * v.dot(&v);
        let coupling = us
            .iter()
            .zip(&vs)
            .fold(F::zero(), |acc, (uk, vk)| acc + uk.dot(&u) * vk.dot(&v));
        norm2 += F::cast(2.) * coupling + cross2;
        if !norm2.is_finite() {
            return Err(HodlrError::CompressionFailureError(format!(
                "non finite approximation of block [{}, {}) x [{}, {})",
                rows.0, rows.1, cols.0, cols.1
            )));
        }

        row_weight.zip_mut_with(&u, |w, &e| *w += e.abs());
        col_weight.zip_mut_with(&v, |w, &e| *w += e.abs());
        let next_row = largest_unused(&u, &used_rows);
        us.push(u);
        vs.push(v);

        let rank = us.len();
        if rank == full_rank {
            break;
        }
        let threshold = tol * tol * norm2;
        let next = if cross2 <= threshold {
            // the sampled crosses converged: check the least reached row then column,
            // a residual row sampled once stands for all the block rows
            let mut restart = None;
            if let Some(i) = least_sampled(&row_weight, &used_rows) {
                let r = residual_row(i, &us, &vs);
                let err2 = r.dot(&r) * F::cast(nrows);
                if err2.is_nan() || err2 > threshold {
                    restart = Some(i);
                }
            }
            if restart.is_none() {
                if let Some(j) = least_sampled(&col_weight, &used_cols) {
                    let c = residual_column(j, &us, &vs);
                    let err2 = c.dot(&c) * F::cast(ncols);
                    if err2.is_nan() || err2 > threshold {
                        restart = largest_unused(&c, &used_rows);
                    }
                }
            }
            match restart {
                Some(i) => i,
                None => break,
            }
        } else {
            match next_row {
                Some(i) => i,
                None => break,
            }
        };
        if rank >= max_rank {
            return Err(HodlrError::CompressionFailureError(format!(
                "block [{}, {}) x [{}, {}) not compressed within tolerance {} using max rank {}",
                rows.0, rows.1, cols.0, cols.1, tol, max_rank
            )));
        }
        pivot_row = next;
    }

    Ok(LowRankBlock::from_crosses(nrows, ncols, &us, &vs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{Matern52Kernel, SquaredExponentialKernel};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, ArrayView1, Axis};
    use ndarray_rand::rand::seq::SliceRandom;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    fn frobenius(a: &Array2<f64>) -> f64 {
        a.mapv(|v| v * v).sum().sqrt()
    }

    #[test]
    fn test_aca_smooth_block() {
        let kernel = SquaredExponentialKernel::new(1., 1.);
        let x = Array::linspace(0., 10., 120).insert_axis(Axis(1));
        let yerr = Array::from_elem(120, 0.1);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);

        let block = aca(&cov, (0, 60), (60, 120), 1e-10, 60).expect("ACA compression");
        let dense = cov.block((0, 60), (60, 120));
        assert!(block.rank() < 30, "rank = {}", block.rank());
        let err = frobenius(&(&dense - &block.to_dense())) / frobenius(&dense);
        assert!(err < 1e-8, "relative error = {err}");
    }

    #[test]
    fn test_aca_matern_2d() {
        let kernel = Matern52Kernel::new(1., 0.5);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let mut pts: Vec<(f64, f64)> = (0..80)
            .map(|i| ((i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1))
            .collect();
        pts.shuffle(&mut rng);
        let x = Array2::from_shape_fn((80, 2), |(i, j)| if j == 0 { pts[i].0 } else { pts[i].1 });
        let yerr = Array::zeros(80);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);

        let block = aca(&cov, (0, 40), (40, 80), 1e-12, 40).expect("ACA compression");
        let dense = cov.block((0, 40), (40, 80));
        assert_abs_diff_eq!(dense, block.to_dense(), epsilon = 1e-8);
    }

    #[test]
    fn test_aca_disconnected_clusters() {
        // three clusters far apart, interleaved so that every block row and column
        // range mixes them, the cross-cluster covariance is exactly zero
        let kernel = SquaredExponentialKernel::new(1., 1.);
        let n = 60;
        let x = Array::from_shape_fn((n, 1), |(i, _)| {
            (i % 3) as f64 * 1000. + 5. * (i / 3) as f64 / 20.
        });
        let yerr = Array::from_elem(n, 0.1);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);

        let block = aca(&cov, (0, 30), (30, 60), 1e-12, 30).expect("ACA compression");
        let dense = cov.block((0, 30), (30, 60));
        let err = frobenius(&(&dense - &block.to_dense())) / frobenius(&dense);
        assert!(err < 1e-10, "relative error = {err}, rank = {}", block.rank());
    }

    #[test]
    fn test_aca_zero_block() {
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| if a == b { 1. } else { 0. };
        let x = Array::linspace(0., 1., 10).insert_axis(Axis(1));
        let yerr = Array::zeros(10);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);
        let block = aca(&cov, (0, 5), (5, 10), 1e-12, 2).expect("ACA compression");
        assert_eq!(block.rank(), 0);
        assert_eq!(block.u.dim(), (5, 0));
        assert_eq!(block.v.dim(), (5, 0));
    }

    #[test]
    fn test_aca_full_rank_is_exact() {
        // absolute exponential on interleaved points is far from low rank
        let kernel = |a: ArrayView1<f64>, b: ArrayView1<f64>| (-(a[0] - b[0]).abs() * 20.).exp();
        let x = Array::from_shape_fn((12, 1), |(i, _)| if i < 6 { i as f64 } else { i as f64 - 5.5 });
        let yerr = Array::zeros(12);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);
        let block = aca(&cov, (0, 6), (6, 12), 1e-15, 100).expect("ACA compression");
        assert!(block.rank() <= 6);
        assert_abs_diff_eq!(cov.block((0, 6), (6, 12)), block.to_dense(), epsilon = 1e-12);
    }

    #[test]
    fn test_aca_rank_cap() {
        let kernel = SquaredExponentialKernel::new(1., 1.);
        let x = Array::linspace(0., 10., 64).insert_axis(Axis(1));
        let yerr = Array::zeros(64);
        let cov = CovarianceBuilder::new(&kernel, x.view(), yerr.view(), 0.);
        let res = aca(&cov, (0, 32), (32, 64), 1e-14, 1);
        assert!(matches!(res, Err(HodlrError::CompressionFailureError(_))));
    }
}
