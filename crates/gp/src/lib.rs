//! This library implements exact [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! for large datasets using a hierarchical off-diagonal low-rank (HODLR) factorization
//! of the covariance matrix, as described in [Fast Direct Methods for Gaussian Processes](https://arxiv.org/abs/1403.6015).
//!
//! The complexity of the dense GP algorithm is O(N^3) in processing time and O(N^2) in memory
//! where N is the number of training points. The covariance matrix is here recursively split in two halves
//! until diagonal blocks are small enough to be factorized with a dense cholesky decomposition,
//! while off-diagonal blocks are compressed with adaptive cross approximation (ACA).
//! Solves and log-determinant are then computed in O(N.log(N)^2) for smooth kernels.
//!
//! The engine is implemented by [GaussianProcess] parameterized by [HodlrParams].
//! Covariance functions implement the [Kernel](kernels::Kernel) trait.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod compression;
mod covariance;
mod errors;
mod factorization;
pub mod kernels;
mod parameters;
mod tree;
mod utils;

pub use algorithm::*;
pub use errors::*;
pub use factorization::Factorization;
pub use kernels::{
    AbsoluteExponentialKernel, Kernel, Matern32Kernel, Matern52Kernel, ProductKernel,
    SquaredExponentialKernel, SumKernel,
};
pub use parameters::*;
