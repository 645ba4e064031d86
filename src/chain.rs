//! A fixed-length, row-stochastic sparse Markov operator stored in
//! in-neighbor (CSR-like) form.
//!
//! For each node index `i` we keep a dense pair of parallel arrays
//! `(in_neighbor_indices[i], in_weights[i])` listing every `(j, p)` such
//! that an edge of probability `p` goes from `j` to `i`. Parallel edges
//! are **not** coalesced — their contributions are simply summed during
//! iteration, matching the spec's explicit non-goal of de-duplication here.

#![forbid(unsafe_code)]

use crate::address::Address;

/// Raised when a chain fails the row-stochasticity precondition checked
/// before iteration.
#[derive(Debug, thiserror::Error)]
pub enum StochasticityError {
    #[error("row for node {address:?} (index {index}) sums to {sum}, outside 1 ± {tolerance}")]
    RowSumOutOfTolerance {
        index: usize,
        address: Address,
        sum: f64,
        tolerance: f64,
    },
}

/// Tolerance used for all row-sum (stochasticity) checks in this crate.
pub const ROW_STOCHASTIC_TOLERANCE: f64 = 1e-3;

/// A sparse, fixed-length Markov operator in in-neighbor form.
///
/// `iterate` performs one power-iteration step:
/// `pi'[i] = alpha * seed[i] + (1 - alpha) * sum_k in_weights[i][k] * pi[in_neighbor_indices[i][k]]`.
///
/// This system always calls [`SparseMarkovChain::iterate`] with `alpha = 0`;
/// the `alpha`/`seed` parameters exist purely for reuse by other
/// teleportation-mixing callers.
pub struct SparseMarkovChain {
    in_neighbors: Vec<Vec<(usize, f64)>>,
}

impl SparseMarkovChain {
    /// Build a chain directly from per-node in-neighbor lists. `in_neighbors[i]`
    /// is the list of `(src_index, probability)` pairs for node `i`.
    pub fn new(in_neighbors: Vec<Vec<(usize, f64)>>) -> Self {
        Self { in_neighbors }
    }

    /// Number of nodes in the chain.
    pub fn len(&self) -> usize {
        self.in_neighbors.len()
    }

    /// `true` if the chain has no nodes.
    pub fn is_empty(&self) -> bool {
        self.in_neighbors.is_empty()
    }

    /// The in-neighbor list for node `i`.
    pub fn in_neighbors(&self, i: usize) -> &[(usize, f64)] {
        &self.in_neighbors[i]
    }

    /// One power-iteration step.
    pub fn iterate(&self, pi: &[f64], alpha: f64, seed: &[f64]) -> Vec<f64> {
        debug_assert_eq!(pi.len(), self.len());
        debug_assert_eq!(seed.len(), self.len());
        let mut out = vec![0.0_f64; self.len()];
        for (i, neighbors) in self.in_neighbors.iter().enumerate() {
            let mut acc = 0.0_f64;
            for &(j, p) in neighbors {
                acc += p * pi[j];
            }
            out[i] = alpha * seed[i] + (1.0 - alpha) * acc;
        }
        out
    }

    /// Validate that the chain is (approximately) row-stochastic, i.e. that
    /// for every node `v` the sum of its *out*-probabilities is within
    /// [`ROW_STOCHASTIC_TOLERANCE`] of 1.
    ///
    /// Because the chain is stored by in-neighbor, out-mass per source node
    /// is accumulated by scanning every in-neighbor list once
    /// (`O(total edges)`). `node_address` resolves a canonical index to its
    /// address for error reporting.
    pub fn validate(
        &self,
        node_address: impl Fn(usize) -> Address,
    ) -> Result<(), StochasticityError> {
        let n = self.len();
        let mut out_mass = vec![0.0_f64; n];
        for neighbors in &self.in_neighbors {
            for &(j, p) in neighbors {
                out_mass[j] += p;
            }
        }
        for (i, sum) in out_mass.into_iter().enumerate() {
            if (sum - 1.0).abs() > ROW_STOCHASTIC_TOLERANCE {
                return Err(StochasticityError::RowSumOutOfTolerance {
                    index: i,
                    address: node_address(i),
                    sum,
                    tolerance: ROW_STOCHASTIC_TOLERANCE,
                });
            }
        }
        Ok(())
    }
}
