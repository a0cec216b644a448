use crate::errors::{HodlrError, Result};
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};

/// Check training inputs `x` (n, nx) and noise `yerr` (n,) before any factorization work
pub(crate) fn check_training_inputs<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    yerr: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    if x.nrows() == 0 {
        return Err(HodlrError::ShapeMismatchError(
            "at least one training point is required".to_string(),
        ));
    }
    if x.nrows() != yerr.len() {
        return Err(HodlrError::ShapeMismatchError(format!(
            "coordinates ({}) and noise ({}) lengths differ",
            x.nrows(),
            yerr.len()
        )));
    }
    if let Some(i) = yerr.iter().position(|e| !e.is_finite() || *e < F::zero()) {
        return Err(HodlrError::ShapeMismatchError(format!(
            "noise has to be finite and non negative, got yerr[{}] = {}",
            i, yerr[i]
        )));
    }
    Ok(())
}

/// Check `len` against the number of training points `n`
pub(crate) fn check_length(what: &str, len: usize, n: usize) -> Result<()> {
    if len != n {
        return Err(HodlrError::ShapeMismatchError(format!(
            "{what} has length {len}, expected {n}"
        )));
    }
    Ok(())
}

/// Lower cholesky factor of the symmetric matrix `a`.
///
/// Fails with a `NonPositiveDefiniteError` when a pivot is non positive or not finite.
pub(crate) fn checked_cholesky<F: Float>(
    a: &ArrayBase<impl Data<Elem = F>, Ix2>,
    what: &str,
) -> Result<Array2<F>> {
    let chol = a
        .cholesky()
        .map_err(|err| HodlrError::from_cholesky(err, what))?;
    if chol.diag().iter().any(|d| !d.is_finite() || *d <= F::zero()) {
        return Err(HodlrError::NonPositiveDefiniteError(format!(
            "{what} is not positive definite"
        )));
    }
    Ok(chol)
}

/// Solve `L.Lt x = b` given the lower cholesky factor `L`
pub(crate) fn cholesky_solve<F: Float>(
    chol: &Array2<F>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    let z = chol.solve_triangular(b, UPLO::Lower)?;
    Ok(chol.t().solve_triangular_into(z, UPLO::Upper)?)
}

/// log(det(L.Lt)) given the lower cholesky factor `L`
pub(crate) fn cholesky_log_det<F: Float>(chol: &Array2<F>) -> F {
    chol.diag().mapv(|v| v.ln()).sum() * F::cast(2.)
}

/// (a + at) / 2
pub(crate) fn symmetrize<F: Float>(a: Array2<F>) -> Array2<F> {
    (&a + &a.t()) * F::cast(0.5)
}
