//! A module for covariance kernels used to build the covariance matrix of the GP model.
//!
//! Any type implementing [`Kernel`] can be used, including closures
//! `Fn(ArrayView1<F>, ArrayView1<F>) -> F`.
//! The following stationary kernels are implemented:
//! * squared exponential,
//! * absolute exponential,
//! * matern 3/2,
//! * matern 5/2,
//!
//! and kernels can be combined with [`SumKernel`] and [`ProductKernel`].

use linfa::Float;
use ndarray::{Array2, ArrayBase, ArrayView1, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for covariance functions k(x, x')
///
/// Implementations have to be symmetric, `value(a, b) == value(b, a)`, and yield
/// a positive semi-definite matrix for any finite set of points.
pub trait Kernel<F: Float>: Sync {
    /// Covariance between two points given as (nx,) vectors
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F;

    /// Covariance matrix (n1, n2) between two sets of points given as (n1, nx) and (n2, nx) matrices.
    ///
    /// Rows are evaluated in parallel.
    fn matrix(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array2<F> {
        let (x1, x2) = (x1.view(), x2.view());
        let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
        Zip::from(k.rows_mut())
            .and(x1.rows())
            .par_for_each(|mut krow, xi| {
                Zip::from(&mut krow)
                    .and(x2.rows())
                    .for_each(|kij, xj| *kij = self.value(xi, xj));
            });
        k
    }
}

impl<F, T> Kernel<F> for T
where
    F: Float,
    T: Fn(ArrayView1<F>, ArrayView1<F>) -> F + Sync,
{
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        self(x1, x2)
    }
}

/// Euclidean distance between `x1` and `x2` divided by `scale`
fn scaled_distance<F: Float>(x1: ArrayView1<F>, x2: ArrayView1<F>, scale: F) -> F {
    let r2 = Zip::from(&x1)
        .and(&x2)
        .fold(F::zero(), |acc, &a, &b| acc + (a - b) * (a - b));
    r2.sqrt() / scale
}

macro_rules! stationary_kernel {
    ($(#[$doc:meta])* $name:ident, $label:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq)]
        #[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
        pub struct $name<F: Float> {
            /// Variance of the process, k(x, x)
            pub amplitude: F,
            /// Length scale applied to euclidean distances
            pub scale: F,
        }

        impl<F: Float> $name<F> {
            /// Constructor given amplitude and length scale
            pub fn new(amplitude: F, scale: F) -> Self {
                Self { amplitude, scale }
            }
        }

        impl<F: Float> Default for $name<F> {
            fn default() -> Self {
                Self::new(F::one(), F::one())
            }
        }

        impl<F: Float> fmt::Display for $name<F> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    f,
                    "{}(amplitude={}, scale={})",
                    $label, self.amplitude, self.scale
                )
            }
        }
    };
}

stationary_kernel!(
    /// Squared exponential kernel: `amplitude * exp(-r^2 / 2)` with `r = |x - x'| / scale`
    SquaredExponentialKernel,
    "SquaredExponential"
);

stationary_kernel!(
    /// Absolute exponential kernel: `amplitude * exp(-r)` with `r = |x - x'| / scale`
    AbsoluteExponentialKernel,
    "AbsoluteExponential"
);

stationary_kernel!(
    /// Matern 3/2 kernel: `amplitude * (1 + sqrt(3) r) exp(-sqrt(3) r)` with `r = |x - x'| / scale`
    Matern32Kernel,
    "Matern32"
);

stationary_kernel!(
    /// Matern 5/2 kernel: `amplitude * (1 + sqrt(5) r + 5 r^2 / 3) exp(-sqrt(5) r)` with `r = |x - x'| / scale`
    Matern52Kernel,
    "Matern52"
);

impl<F: Float> Kernel<F> for SquaredExponentialKernel<F> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        let r = scaled_distance(x1, x2, self.scale);
        self.amplitude * F::exp(F::cast(-0.5) * r * r)
    }
}

impl<F: Float> Kernel<F> for AbsoluteExponentialKernel<F> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        let r = scaled_distance(x1, x2, self.scale);
        self.amplitude * F::exp(-r)
    }
}

impl<F: Float> Kernel<F> for Matern32Kernel<F> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        let r = F::cast(3.).sqrt() * scaled_distance(x1, x2, self.scale);
        self.amplitude * (F::one() + r) * F::exp(-r)
    }
}

impl<F: Float> Kernel<F> for Matern52Kernel<F> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        let r = F::cast(5.).sqrt() * scaled_distance(x1, x2, self.scale);
        self.amplitude * (F::one() + r + r * r / F::cast(3.)) * F::exp(-r)
    }
}

/// Sum of two kernels: k(x, x') = k1(x, x') + k2(x, x')
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SumKernel<K1, K2>(pub K1, pub K2);

/// Product of two kernels: k(x, x') = k1(x, x') * k2(x, x')
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ProductKernel<K1, K2>(pub K1, pub K2);

impl<F: Float, K1: Kernel<F>, K2: Kernel<F>> Kernel<F> for SumKernel<K1, K2> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        self.0.value(x1, x2) + self.1.value(x1, x2)
    }
}

impl<F: Float, K1: Kernel<F>, K2: Kernel<F>> Kernel<F> for ProductKernel<K1, K2> {
    fn value(&self, x1: ArrayView1<F>, x2: ArrayView1<F>) -> F {
        self.0.value(x1, x2) * self.1.value(x1, x2)
    }
}

impl<K1: fmt::Display, K2: fmt::Display> fmt::Display for SumKernel<K1, K2> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} + {}", self.0, self.1)
    }
}

impl<K1: fmt::Display, K2: fmt::Display> fmt::Display for ProductKernel<K1, K2> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} * {}", self.0, self.1)
    }
}
