//! Scales a solved stationary distribution into participant cred (C6).
//!
//! `S`, the sum of stationary mass resting on every epoch accumulator
//! node, is the total mass that ever reached a payout. Every node's cred
//! is `pi[node] / S * total_mint`; a participant's per-epoch cred is the
//! flow along *that epoch's payout edge specifically* —
//! `cred[user_epoch(e, p)] * payout_probability(e, p)` — not the raw
//! stationary mass on the user-epoch node, which also includes mass that
//! recirculates via webbing or leaves along contribution edges. Summed
//! over participants and epochs, these payout flows total exactly `S`,
//! so participant totals sum to `total_mint`.

#![forbid(unsafe_code)]

use crate::graph::{MarkovProcessGraph, ParticipantId};

/// Raised when every epoch accumulator holds zero stationary mass, making
/// the cred scale undefined.
#[derive(Debug, thiserror::Error)]
pub enum CredError {
    #[error("every epoch accumulator holds zero stationary mass; cred is undefined")]
    ZeroAccumulatorMass,
}

/// One participant's assembled cred, plus the per-epoch breakdown it was
/// summed from.
#[derive(Debug, Clone)]
pub struct ParticipantCred {
    pub participant_id: ParticipantId,
    pub per_epoch: Vec<f64>,
    pub total: f64,
}

/// The assembled cred for every participant, plus the accumulator mass
/// the scaling was computed against.
#[derive(Debug, Clone)]
pub struct CredResult {
    pub participants: Vec<ParticipantCred>,
    pub accumulator_mass: f64,
}

/// Scales a solved `pi` into cred using a borrowed [`MarkovProcessGraph`]
/// for its canonical index layout.
pub struct CredAssembler<'g> {
    graph: &'g MarkovProcessGraph,
}

impl<'g> CredAssembler<'g> {
    pub fn new(graph: &'g MarkovProcessGraph) -> Self {
        Self { graph }
    }

    /// `pi` must be a stationary distribution over exactly
    /// `graph.len()` nodes, in canonical order (as returned by
    /// [`MarkovProcessGraph::to_markov_chain`] paired with
    /// [`crate::solver::find_stationary_distribution`]).
    pub fn assemble(&self, pi: &[f64]) -> Result<CredResult, CredError> {
        debug_assert_eq!(pi.len(), self.graph.len());

        let n_epochs = self.graph.epoch_starts().len();
        let accumulator_mass: f64 = (0..n_epochs)
            .map(|e| pi[self.graph.accumulator_index(e)])
            .sum();
        if accumulator_mass <= 0.0 {
            return Err(CredError::ZeroAccumulatorMass);
        }

        let total_mint = self.graph.total_mint();
        let participants = self
            .graph
            .participants()
            .iter()
            .enumerate()
            .map(|(p_idx, p)| {
                let per_epoch: Vec<f64> = (0..n_epochs)
                    .map(|e| {
                        let cred_ue = pi[self.graph.user_epoch_index(e, p_idx)] / accumulator_mass
                            * total_mint;
                        cred_ue * self.graph.payout_probability(e, p_idx)
                    })
                    .collect();
                let total = per_epoch.iter().sum();
                ParticipantCred {
                    participant_id: p.id.clone(),
                    per_epoch,
                    total,
                }
            })
            .collect();

        Ok(CredResult {
            participants,
            accumulator_mass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, EdgeAddress, NodeAddress};
    use crate::external::{ContributionEdge, ContributionNode, InMemoryContributionGraph};
    use crate::graph::{Interval, MarkovProcessGraphBuilder, Parameters, Participant};
    use crate::solver::{find_stationary_distribution, SolverOptions, ThreadScheduler};
    use crate::weights::{WeightEvaluator, Weights};

    fn two_participant_graph() -> MarkovProcessGraph {
        let participants = vec![
            Participant {
                address: NodeAddress(Address::from_parts(["alice"])),
                id: ParticipantId("alice".into()),
                description: "".into(),
            },
            Participant {
                address: NodeAddress(Address::from_parts(["bob"])),
                id: ParticipantId("bob".into()),
                description: "".into(),
            },
        ];
        let graph = InMemoryContributionGraph {
            nodes: vec![ContributionNode {
                address: NodeAddress(Address::from_parts(["c1"])),
                description: "".into(),
                timestamp_ms: Some(0),
            }],
            edges: vec![
                ContributionEdge {
                    address: EdgeAddress(Address::from_parts(["c1", "to", "alice"])),
                    src: NodeAddress(Address::from_parts(["c1"])),
                    dst: NodeAddress(Address::from_parts(["alice"])),
                    timestamp_ms: 10,
                },
                ContributionEdge {
                    address: EdgeAddress(Address::from_parts(["c1", "to", "bob"])),
                    src: NodeAddress(Address::from_parts(["c1"])),
                    dst: NodeAddress(Address::from_parts(["bob"])),
                    timestamp_ms: 10,
                },
            ],
        };
        let weights = Weights::new();
        let evaluator = WeightEvaluator::new(&weights);
        let parameters = Parameters {
            alpha: 0.1,
            beta: 0.4,
            gamma_forward: 0.1,
            gamma_backward: 0.1,
        };
        let intervals = vec![Interval { start_ms: 0, end_ms: 100 }];
        MarkovProcessGraphBuilder::new(&graph, evaluator, participants, intervals, vec![], parameters)
            .build()
            .unwrap()
    }

    #[test]
    fn equal_contribution_yields_equal_cred() {
        let built = two_participant_graph();
        let chain = built.to_markov_chain().unwrap();
        let n = built.len();
        let result = find_stationary_distribution(
            &chain,
            vec![1.0 / n as f64; n],
            &vec![0.0; n],
            0.0,
            &SolverOptions::default(),
            &ThreadScheduler,
            |i| built.node_address(i),
        )
        .unwrap();

        let cred = CredAssembler::new(&built).assemble(&result.pi).unwrap();
        assert_eq!(cred.participants.len(), 2);
        let alice = cred.participants.iter().find(|p| p.participant_id.0 == "alice").unwrap();
        let bob = cred.participants.iter().find(|p| p.participant_id.0 == "bob").unwrap();
        assert!((alice.total - bob.total).abs() < 1e-6);
        assert!(alice.total > 0.0);
    }

    /// Testable property 7 — participant cred totals (summed across every
    /// payout edge, the only way mass reaches an accumulator) sum to the
    /// total mint weight.
    #[test]
    fn participant_totals_sum_to_total_mint() {
        let built = two_participant_graph();
        let chain = built.to_markov_chain().unwrap();
        let n = built.len();
        let result = find_stationary_distribution(
            &chain,
            vec![1.0 / n as f64; n],
            &vec![0.0; n],
            0.0,
            &SolverOptions::default(),
            &ThreadScheduler,
            |i| built.node_address(i),
        )
        .unwrap();

        let cred = CredAssembler::new(&built).assemble(&result.pi).unwrap();
        let sum: f64 = cred.participants.iter().map(|p| p.total).sum();
        assert!((sum - built.total_mint()).abs() < 1e-3);
    }

    #[test]
    fn zero_accumulator_mass_is_an_error() {
        let built = two_participant_graph();
        let zeros = vec![0.0; built.len()];
        let err = CredAssembler::new(&built).assemble(&zeros).unwrap_err();
        assert!(matches!(err, CredError::ZeroAccumulatorMass));
    }
}
