use crate::compression::{aca, LowRankBlock};
use crate::covariance::CovarianceBuilder;
use crate::errors::Result;
use crate::kernels::Kernel;
use linfa::Float;
use ndarray::Array2;

/// A node of the HODLR tree covering the index range `[lo, hi)`
#[derive(Debug)]
pub(crate) enum TreeNode<F: Float> {
    /// Range of length <= nleaf stored as a dense diagonal block
    Leaf { lo: usize, hi: usize, block: Array2<F> },
    /// Range split at `mid` with the compressed block coupling `[lo, mid)` with `[mid, hi)`
    Branch {
        lo: usize,
        mid: usize,
        hi: usize,
        left: Box<TreeNode<F>>,
        right: Box<TreeNode<F>>,
        coupling: LowRankBlock<F>,
    },
}

impl<F: Float> TreeNode<F> {
    pub fn range(&self) -> (usize, usize) {
        match self {
            TreeNode::Leaf { lo, hi, .. } | TreeNode::Branch { lo, hi, .. } => (*lo, *hi),
        }
    }

    fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Branch { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn max_rank(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Branch {
                left,
                right,
                coupling,
                ..
            } => coupling
                .rank()
                .max(left.max_rank())
                .max(right.max_rank()),
        }
    }
}

/// Hierarchical off-diagonal low-rank representation of a covariance matrix.
///
/// The index range `[0, n)` is recursively split in two halves (the left one gets `len / 2`
/// indices) until ranges contain at most `nleaf` indices. The partition only depends
/// on `n` and `nleaf`, not on coordinate values. Sibling subtrees and the coupling
/// block of their parent are built concurrently.
#[derive(Debug)]
pub(crate) struct HodlrTree<F: Float> {
    pub root: TreeNode<F>,
}

impl<F: Float> HodlrTree<F> {
    /// Build the tree of `cov`, compressing off-diagonal blocks with ACA
    pub fn new<K: Kernel<F>>(
        cov: &CovarianceBuilder<F, K>,
        nleaf: usize,
        tol: F,
        max_rank: usize,
    ) -> Result<Self> {
        let root = build_node(cov, 0, cov.n(), nleaf, tol, max_rank)?;
        Ok(HodlrTree { root })
    }

    /// Number of levels below the root
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Largest rank among off-diagonal blocks
    pub fn max_rank(&self) -> usize {
        self.root.max_rank()
    }
}

fn build_node<F: Float, K: Kernel<F>>(
    cov: &CovarianceBuilder<F, K>,
    lo: usize,
    hi: usize,
    nleaf: usize,
    tol: F,
    max_rank: usize,
) -> Result<TreeNode<F>> {
    if hi - lo <= nleaf {
        return Ok(TreeNode::Leaf {
            lo,
            hi,
            block: cov.block((lo, hi), (lo, hi)),
        });
    }
    let mid = lo + (hi - lo) / 2;
    let ((left, right), coupling) = rayon::join(
        || {
            rayon::join(
                || build_node(cov, lo, mid, nleaf, tol, max_rank),
                || build_node(cov, mid, hi, nleaf, tol, max_rank),
            )
        },
        || aca(cov, (lo, mid), (mid, hi), tol, max_rank),
    );
    Ok(TreeNode::Branch {
        lo,
        mid,
        hi,
        left: Box::new(left?),
        right: Box::new(right?),
        coupling: coupling?,
    })
}
