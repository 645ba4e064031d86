//! Multiplicative weight composition over [`AddressTrie`]s.
//!
//! A [`Weights`] object holds two independent mappings (node-address-prefix
//! → positive real, edge-address-prefix → `(forward, backward)` pair of
//! positive reals). [`WeightEvaluator`] composes all matching prefixes of a
//! queried address multiplicatively; the empty match set is the identity
//! (`1.0` or `(1.0, 1.0)`).

#![forbid(unsafe_code)]

use crate::address::{AddressTrie, EdgeAddress, NodeAddress};

/// Errors raised when registering a weight.
#[derive(Debug, thiserror::Error)]
pub enum WeightError {
    #[error("node weight for {address:?} must be finite and non-negative (got {value})")]
    InvalidNodeWeight { address: NodeAddress, value: f64 },
    #[error("edge weight for {address:?} must be finite and non-negative (got {forward}, {backward})")]
    InvalidEdgeWeight {
        address: EdgeAddress,
        forward: f64,
        backward: f64,
    },
}

/// Two finite mappings: node-address-prefix → weight, edge-address-prefix →
/// `(forward, backward)` weight pair. An absent mapping implies the identity.
pub struct Weights {
    node: AddressTrie<f64>,
    edge: AddressTrie<(f64, f64)>,
}

impl Weights {
    /// An empty set of weights (every query yields the identity).
    pub fn new() -> Self {
        Self {
            node: AddressTrie::new(),
            edge: AddressTrie::new(),
        }
    }

    /// Register a node weight at `prefix`. Re-registering overwrites the
    /// previous value (last-write-wins, matching [`AddressTrie::add`]).
    pub fn set_node_weight(&mut self, prefix: &NodeAddress, weight: f64) -> Result<(), WeightError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(WeightError::InvalidNodeWeight {
                address: prefix.clone(),
                value: weight,
            });
        }
        self.node.add(prefix, weight);
        Ok(())
    }

    /// Register an edge weight pair at `prefix`.
    pub fn set_edge_weight(
        &mut self,
        prefix: &EdgeAddress,
        forward: f64,
        backward: f64,
    ) -> Result<(), WeightError> {
        if !forward.is_finite() || forward < 0.0 || !backward.is_finite() || backward < 0.0 {
            return Err(WeightError::InvalidEdgeWeight {
                address: prefix.clone(),
                forward,
                backward,
            });
        }
        self.edge.add(prefix, (forward, backward));
        Ok(())
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes multiplicative node/edge weights from a [`Weights`] table for
/// any address. Lookup is total: there is no failure mode here, only the
/// identity when nothing matches.
pub struct WeightEvaluator<'w> {
    weights: &'w Weights,
}

impl<'w> WeightEvaluator<'w> {
    /// Build an evaluator borrowing `weights` for its lifetime.
    pub fn new(weights: &'w Weights) -> Self {
        Self { weights }
    }

    /// `fold(get_node(addr), ×, 1.0)`.
    pub fn node_weight(&self, addr: &NodeAddress) -> f64 {
        self.weights.node.get(addr).into_iter().product()
    }

    /// `fold(get_edge(addr), componentwise ×, (1.0, 1.0))`.
    pub fn edge_weight(&self, addr: &EdgeAddress) -> (f64, f64) {
        self.weights
            .edge
            .get(addr)
            .into_iter()
            .fold((1.0, 1.0), |(af, ab), (f, b)| (af * f, ab * b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    /// Scenario A — empty weights yield unit composition.
    #[test]
    fn empty_weights_yield_unit_composition() {
        let weights = Weights::new();
        let eval = WeightEvaluator::new(&weights);
        let node_addr = NodeAddress(Address::from_parts(["anything"]));
        let edge_addr = EdgeAddress(Address::from_parts(["anything"]));
        assert_eq!(eval.node_weight(&node_addr), 1.0);
        assert_eq!(eval.edge_weight(&edge_addr), (1.0, 1.0));
    }

    /// Scenario B — multiplicative weight composition.
    #[test]
    fn multiplicative_weight_composition() {
        let mut weights = Weights::new();
        weights
            .set_node_weight(&NodeAddress(Address::from_parts(["foo"])), 2.0)
            .unwrap();
        weights
            .set_node_weight(&NodeAddress(Address::from_parts(["foo", "bar"])), 3.0)
            .unwrap();
        let eval = WeightEvaluator::new(&weights);

        assert_eq!(eval.node_weight(&NodeAddress(Address::from_parts(["foo"]))), 2.0);
        assert_eq!(
            eval.node_weight(&NodeAddress(Address::from_parts(["foo", "bar"]))),
            6.0
        );
        assert_eq!(
            eval.node_weight(&NodeAddress(Address::from_parts(["foo", "bar", "qox"]))),
            6.0
        );
        assert_eq!(eval.node_weight(&NodeAddress(Address::from_parts(["qox"]))), 1.0);
    }

    #[test]
    fn edge_weight_composes_componentwise() {
        let mut weights = Weights::new();
        weights
            .set_edge_weight(&EdgeAddress(Address::from_parts(["foo"])), 2.0, 4.0)
            .unwrap();
        weights
            .set_edge_weight(&EdgeAddress(Address::from_parts(["foo", "bar"])), 3.0, 0.5)
            .unwrap();
        let eval = WeightEvaluator::new(&weights);

        assert_eq!(
            eval.edge_weight(&EdgeAddress(Address::from_parts(["foo", "bar"]))),
            (6.0, 2.0)
        );
    }

    #[test]
    fn negative_or_non_finite_weight_is_rejected() {
        let mut weights = Weights::new();
        let addr = NodeAddress(Address::from_parts(["foo"]));
        assert!(weights.set_node_weight(&addr, -1.0).is_err());
        assert!(weights.set_node_weight(&addr, f64::NAN).is_err());
        assert!(weights.set_node_weight(&addr, f64::INFINITY).is_err());
        assert!(weights.set_node_weight(&addr, 0.0).is_ok());
    }
}
