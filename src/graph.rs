//! Builds the augmented Markov process graph from a contribution graph,
//! participant list, interval sequence, and transition parameters (C5).
//!
//! The augmented graph is *built once* and is immutable afterward. Only
//! real base nodes and materialized base edges are stored; payout,
//! webbing, minting, radiation, and personal-attribution edges (plus
//! seed/accumulator/user-epoch nodes) are never materialized — they are
//! reconstructed on demand from the parameters, the mint table, the
//! radiation table, and the indexed personal-attribution table. This is
//! what keeps memory linear in `|nodes| + |edges| + |attributions|`
//! instead of quadratic in `|participants| * |epochs|`.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::address::{Address, NodeAddress};
use crate::chain::{SparseMarkovChain, StochasticityError};
use crate::external::{
    self, ContributionGraph, PersistedEdge, PersistedMarkovProcessGraph, PersistedNode,
    PersistedParameters, PersistedParticipant, PersonalAttributionInput,
};
use crate::weights::WeightEvaluator;

// ---------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------

/// A half-open `[start_ms, end_ms)` span. The sequence of intervals must
/// be non-empty and strictly increasing; each span's `start_ms` defines
/// one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// The four scalar transition parameters, jointly constrained to
/// `alpha + beta + gamma_forward + gamma_backward <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parameters {
    /// Teleportation probability from organic (base) nodes back to the seed.
    pub alpha: f64,
    /// Payout probability from a user-epoch node to its epoch accumulator.
    pub beta: f64,
    /// Forward temporal-coupling probability between adjacent user-epoch nodes.
    pub gamma_forward: f64,
    /// Backward temporal-coupling probability between adjacent user-epoch nodes.
    pub gamma_backward: f64,
}

impl Parameters {
    /// `1 - (alpha + beta + gamma_forward + gamma_backward)`: the mass
    /// available for contribution edges leaving a user-epoch node.
    pub fn epoch_transition_remainder(&self) -> f64 {
        1.0 - (self.alpha + self.beta + self.gamma_forward + self.gamma_backward)
    }

    fn validate(&self) -> Result<(), ParameterError> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("gammaForward", self.gamma_forward),
            ("gammaBackward", self.gamma_backward),
        ] {
            if !(0.0..=1.0).contains(&value) || !value.is_finite() {
                return Err(ParameterError::OutOfRange { name, value });
            }
        }
        let remainder = self.epoch_transition_remainder();
        if remainder < 0.0 {
            return Err(ParameterError::NegativeRemainder(remainder));
        }
        Ok(())
    }
}

/// A stable, opaque participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(pub String);

/// One participant identity.
#[derive(Debug, Clone)]
pub struct Participant {
    pub address: NodeAddress,
    pub id: ParticipantId,
    pub description: String,
}

// ---------------------------------------------------------------------
// Error taxonomy (§7)
// ---------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParameterError {
    #[error("{name} must be a finite value in [0, 1] (got {value})")]
    OutOfRange { name: &'static str, value: f64 },
    #[error("epochTransitionRemainder must be >= 0 (got {0})")]
    NegativeRemainder(f64),
    #[error("intervals must be non-empty")]
    EmptyIntervals,
    #[error("intervals must be strictly increasing and non-overlapping")]
    IntervalsNotIncreasing,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeWeightError {
    #[error("node weight for {address:?} must be finite and non-negative (got {value})")]
    Invalid { address: NodeAddress, value: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum GraphStructureError {
    #[error("node {0:?} is in the reserved core namespace")]
    UnexpectedCoreNode(NodeAddress),
    #[error("edge references address {0:?}, which is not a known node")]
    DanglingReference(Address),
    #[error("edge timestamp {timestamp_ms} predates the first epoch start {first_epoch_start}")]
    TimestampBeforeFirstEpoch {
        timestamp_ms: i64,
        first_epoch_start: i64,
    },
    #[error("assigned transition probability {value} for edge {address:?} is outside [0, 1]")]
    InvalidProbability { address: Address, value: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum MintExhaustionError {
    #[error("no positive-weight node exists; the seed has no outflow")]
    NoOutflow,
}

#[derive(Debug, thiserror::Error)]
pub enum AttributionError {
    #[error("personal attribution references unknown participant id {0:?}")]
    UnknownParticipant(String),
    #[error("personal attribution references unknown epoch start {0}")]
    UnknownEpoch(i64),
    #[error(
        "sum of personal-attribution proportions for epoch {epoch_start} from {from_id:?} is {sum}, exceeding 1"
    )]
    ProportionSumExceedsOne {
        epoch_start: i64,
        from_id: String,
        sum: f64,
    },
    #[error("proportion for {from_id:?} -> {to_id:?} must be finite and within [0, 1] (got {value})")]
    InvalidProportion {
        from_id: String,
        to_id: String,
        value: f64,
    },
}

/// Aggregate build-stage error. All build-stage errors abort construction;
/// the builder never attempts recovery.
#[derive(Debug, thiserror::Error)]
pub enum GraphBuildError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    NodeWeight(#[from] NodeWeightError),
    #[error(transparent)]
    GraphStructure(#[from] GraphStructureError),
    #[error(transparent)]
    MintExhaustion(#[from] MintExhaustionError),
    #[error(transparent)]
    Attribution(#[from] AttributionError),
}

// ---------------------------------------------------------------------
// Materialized records
// ---------------------------------------------------------------------

/// A real (non-synthetic) node carrying its composed mint weight.
#[derive(Debug, Clone)]
pub struct BaseNode {
    pub address: NodeAddress,
    pub description: String,
    pub mint: f64,
}

/// A materialized, directed, already-normalized base edge.
#[derive(Debug, Clone)]
pub struct MaterializedEdge {
    pub address: Address,
    pub reversed: bool,
    pub src: usize,
    pub dst: usize,
    pub probability: f64,
}

/// What canonical index `idx` decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Base(usize),
    Seed,
    Accumulator(usize),
    UserEpoch(usize, usize),
}

/// Maps canonical node indices to/from their `(base count, participant
/// count, epoch count)` coordinates, matching §4.5.2's order: real base
/// nodes, then `seed`, then per epoch `[accumulator, user-epoch(p0),
/// user-epoch(p1), ...]`.
#[derive(Debug, Clone, Copy)]
struct NodeIndexer {
    n_base: usize,
    n_participants: usize,
    n_epochs: usize,
}

impl NodeIndexer {
    fn total(&self) -> usize {
        self.n_base + 1 + self.n_epochs * (1 + self.n_participants)
    }

    fn seed(&self) -> usize {
        self.n_base
    }

    fn accumulator(&self, epoch_idx: usize) -> usize {
        self.n_base + 1 + epoch_idx * (1 + self.n_participants)
    }

    fn user_epoch(&self, epoch_idx: usize, participant_idx: usize) -> usize {
        self.accumulator(epoch_idx) + 1 + participant_idx
    }

    fn kind(&self, idx: usize) -> NodeKind {
        if idx < self.n_base {
            return NodeKind::Base(idx);
        }
        if idx == self.n_base {
            return NodeKind::Seed;
        }
        let block = 1 + self.n_participants;
        let rel = idx - (self.n_base + 1);
        let epoch_idx = rel / block;
        let within = rel % block;
        if within == 0 {
            NodeKind::Accumulator(epoch_idx)
        } else {
            NodeKind::UserEpoch(epoch_idx, within - 1)
        }
    }
}

/// A key identifying a (epoch, participant) pair inside the personal
/// attribution tables.
type EpochParticipant = (usize, usize);

/// The built, immutable Markov process graph.
pub struct MarkovProcessGraph {
    base_nodes: Vec<BaseNode>,
    base_index_by_address: HashMap<NodeAddress, usize>,
    base_edges: Vec<MaterializedEdge>,
    base_edges_by_dst: HashMap<usize, Vec<usize>>,
    participants: Vec<Participant>,
    epoch_starts: Vec<i64>,
    last_epoch_end_ms: i64,
    parameters: Parameters,
    indexer: NodeIndexer,
    mint_edges: Vec<(usize, f64)>,
    mint_by_base: HashMap<usize, f64>,
    total_mint: f64,
    radiation: Vec<f64>,
    attribution_fwd: HashMap<EpochParticipant, Vec<(usize, f64)>>,
    attribution_rev: HashMap<EpochParticipant, Vec<(usize, f64)>>,
}

impl MarkovProcessGraph {
    /// Total number of nodes in the augmented graph.
    pub fn len(&self) -> usize {
        self.indexer.total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_mint(&self) -> f64 {
        self.total_mint
    }

    pub fn epoch_starts(&self) -> &[i64] {
        &self.epoch_starts
    }

    pub fn last_epoch_end_ms(&self) -> i64 {
        self.last_epoch_end_ms
    }

    pub fn parameters(&self) -> Parameters {
        self.parameters
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn base_nodes(&self) -> &[BaseNode] {
        &self.base_nodes
    }

    pub fn base_edges(&self) -> &[MaterializedEdge] {
        &self.base_edges
    }

    pub fn seed_index(&self) -> usize {
        self.indexer.seed()
    }

    pub fn accumulator_index(&self, epoch_idx: usize) -> usize {
        self.indexer.accumulator(epoch_idx)
    }

    pub fn user_epoch_index(&self, epoch_idx: usize, participant_idx: usize) -> usize {
        self.indexer.user_epoch(epoch_idx, participant_idx)
    }

    /// Probability on the payout edge `user-epoch(p, e) -> accumulator(e)`,
    /// after accounting for any personal attribution `p` has configured for
    /// that epoch (`beta * (1 - s)`).
    pub fn payout_probability(&self, epoch_idx: usize, participant_idx: usize) -> f64 {
        let s = self.attribution_sum(epoch_idx, participant_idx);
        self.parameters.beta * (1.0 - s)
    }

    fn attribution_sum(&self, epoch_idx: usize, participant_idx: usize) -> f64 {
        self.attribution_fwd
            .get(&(epoch_idx, participant_idx))
            .map(|v| v.iter().map(|(_, f)| f).sum())
            .unwrap_or(0.0)
    }

    /// Look up the canonical index of a node by its address, detecting the
    /// reserved core-namespace prefix for synthetic nodes (seed, epoch
    /// accumulator, user-epoch) and falling back to the materialized base
    /// node table otherwise. Returns `None` for an address with no
    /// corresponding node in this graph.
    pub fn node_index(&self, address: &NodeAddress) -> Option<usize> {
        if !address.is_core() {
            return self.base_index_by_address.get(address).copied();
        }
        if *address == external::seed_address() {
            return Some(self.indexer.seed());
        }
        for (e, &epoch_start) in self.epoch_starts.iter().enumerate() {
            if *address == external::epoch_accumulator_address(epoch_start) {
                return Some(self.indexer.accumulator(e));
            }
            for (p, participant) in self.participants.iter().enumerate() {
                if *address == external::user_epoch_address(epoch_start, &participant.id.0) {
                    return Some(self.indexer.user_epoch(e, p));
                }
            }
        }
        None
    }

    /// Decode a canonical index back to its address — used for error
    /// reporting and for persisted-artifact round-tripping.
    pub fn node_address(&self, idx: usize) -> Address {
        match self.indexer.kind(idx) {
            NodeKind::Base(i) => self.base_nodes[i].address.0.clone(),
            NodeKind::Seed => external::seed_address().0,
            NodeKind::Accumulator(e) => external::epoch_accumulator_address(self.epoch_starts[e]).0,
            NodeKind::UserEpoch(e, p) => {
                external::user_epoch_address(self.epoch_starts[e], &self.participants[p].id.0).0
            }
        }
    }

    /// All in-edges of node `idx`: materialized base edges plus every
    /// virtualized family (payout, webbing, minting, radiation,
    /// attribution) reconstructed on demand. Duplicates (parallel edges)
    /// are preserved, not coalesced.
    pub fn in_edges(&self, idx: usize) -> Vec<(usize, f64)> {
        let mut out = Vec::new();
        match self.indexer.kind(idx) {
            NodeKind::Seed => {
                for i in 0..self.len() {
                    if i == idx {
                        continue;
                    }
                    let p = self.radiation[i];
                    if p > 0.0 {
                        out.push((i, p));
                    }
                }
            }
            NodeKind::Base(i) => {
                if let Some(srcs) = self.base_edges_by_dst.get(&idx) {
                    for &edge_idx in srcs {
                        let e = &self.base_edges[edge_idx];
                        out.push((e.src, e.probability));
                    }
                }
                if let Some(&p) = self.mint_by_base.get(&i) {
                    out.push((self.indexer.seed(), p));
                }
            }
            NodeKind::Accumulator(e) => {
                for p in 0..self.participants.len() {
                    let ue = self.indexer.user_epoch(e, p);
                    let prob = self.payout_probability(e, p);
                    if prob > 0.0 {
                        out.push((ue, prob));
                    }
                }
            }
            NodeKind::UserEpoch(e, p) => {
                if let Some(srcs) = self.base_edges_by_dst.get(&idx) {
                    for &edge_idx in srcs {
                        let edge = &self.base_edges[edge_idx];
                        out.push((edge.src, edge.probability));
                    }
                }
                let n_epochs = self.epoch_starts.len();
                if e > 0 {
                    out.push((self.indexer.user_epoch(e - 1, p), self.parameters.gamma_forward));
                } else {
                    out.push((idx, self.parameters.gamma_backward));
                }
                if e + 1 < n_epochs {
                    out.push((self.indexer.user_epoch(e + 1, p), self.parameters.gamma_backward));
                } else {
                    out.push((idx, self.parameters.gamma_forward));
                }
                if let Some(froms) = self.attribution_rev.get(&(e, p)) {
                    for &(from_idx, fraction) in froms {
                        out.push((self.indexer.user_epoch(e, from_idx), self.parameters.beta * fraction));
                    }
                }
            }
        }
        out
    }

    /// Convert to a [`SparseMarkovChain`] by collecting every node's
    /// in-edges in canonical order, then verifying the result is
    /// approximately row-stochastic.
    pub fn to_markov_chain(&self) -> Result<SparseMarkovChain, StochasticityError> {
        let in_neighbors: Vec<Vec<(usize, f64)>> = (0..self.len()).map(|i| self.in_edges(i)).collect();
        let chain = SparseMarkovChain::new(in_neighbors);
        chain.validate(|i| self.node_address(i))?;
        Ok(chain)
    }

    /// Export the materialized portion of the graph as the persisted JSON
    /// artifact described in the external interfaces (virtualized edges
    /// are omitted; they are re-derived on load).
    pub fn to_persisted(&self) -> PersistedMarkovProcessGraph {
        PersistedMarkovProcessGraph {
            nodes: self
                .base_nodes
                .iter()
                .map(|n| PersistedNode {
                    address: n.address.0.clone(),
                    description: n.description.clone(),
                    mint: n.mint,
                })
                .collect(),
            indexed_edges: self
                .base_edges
                .iter()
                .map(|e| PersistedEdge {
                    address: e.address.clone(),
                    reversed: e.reversed,
                    src: e.src,
                    dst: e.dst,
                    transition_probability: e.probability,
                })
                .collect(),
            participants: self
                .participants
                .iter()
                .map(|p| PersistedParticipant {
                    address: p.address.0.clone(),
                    id: p.id.0.clone(),
                    description: p.description.clone(),
                })
                .collect(),
            epoch_starts: self.epoch_starts.clone(),
            last_epoch_end_ms: self.last_epoch_end_ms,
            parameters: PersistedParameters {
                alpha: self.parameters.alpha,
                beta: self.parameters.beta,
                gamma_forward: self.parameters.gamma_forward,
                gamma_backward: self.parameters.gamma_backward,
            },
            radiation_transition_probabilities: self.radiation.clone(),
            indexed_mints: self.mint_edges.clone(),
            personal_attributions: self.personal_attribution_inputs(),
        }
    }

    fn personal_attribution_inputs(&self) -> Vec<PersonalAttributionInput> {
        let mut out = Vec::new();
        for (&(epoch_idx, from_idx), tos) in &self.attribution_fwd {
            for &(to_idx, fraction) in tos {
                out.push(PersonalAttributionInput {
                    from_id: self.participants[from_idx].id.0.clone(),
                    to_id: self.participants[to_idx].id.0.clone(),
                    epoch_start: self.epoch_starts[epoch_idx],
                    proportion: fraction,
                });
            }
        }
        out
    }

    /// Reconstruct a graph from a previously-persisted artifact, without
    /// re-running weight composition. Used to exercise the round-trip
    /// invariant (serialize then reload yields identical materialized
    /// nodes/edges and identical virtualized probabilities).
    pub fn from_persisted(p: &PersistedMarkovProcessGraph) -> Result<Self, GraphBuildError> {
        let parameters = Parameters {
            alpha: p.parameters.alpha,
            beta: p.parameters.beta,
            gamma_forward: p.parameters.gamma_forward,
            gamma_backward: p.parameters.gamma_backward,
        };
        parameters.validate()?;
        if p.epoch_starts.is_empty() {
            return Err(ParameterError::EmptyIntervals.into());
        }

        let base_nodes: Vec<BaseNode> = p
            .nodes
            .iter()
            .map(|n| BaseNode {
                address: NodeAddress(n.address.clone()),
                description: n.description.clone(),
                mint: n.mint,
            })
            .collect();
        let mut base_index_by_address = HashMap::new();
        for (i, n) in base_nodes.iter().enumerate() {
            base_index_by_address.insert(n.address.clone(), i);
        }

        let participants: Vec<Participant> = p
            .participants
            .iter()
            .map(|pp| Participant {
                address: NodeAddress(pp.address.clone()),
                id: ParticipantId(pp.id.clone()),
                description: pp.description.clone(),
            })
            .collect();
        let participant_index_by_id: HashMap<String, usize> = participants
            .iter()
            .enumerate()
            .map(|(i, pp)| (pp.id.0.clone(), i))
            .collect();

        let indexer = NodeIndexer {
            n_base: base_nodes.len(),
            n_participants: participants.len(),
            n_epochs: p.epoch_starts.len(),
        };

        let base_edges: Vec<MaterializedEdge> = p
            .indexed_edges
            .iter()
            .map(|e| MaterializedEdge {
                address: e.address.clone(),
                reversed: e.reversed,
                src: e.src,
                dst: e.dst,
                probability: e.transition_probability,
            })
            .collect();
        let mut base_edges_by_dst: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, e) in base_edges.iter().enumerate() {
            base_edges_by_dst.entry(e.dst).or_default().push(i);
        }

        let total_mint = base_nodes.iter().filter(|n| n.mint > 0.0).map(|n| n.mint).sum();

        let mut attribution_fwd: HashMap<EpochParticipant, Vec<(usize, f64)>> = HashMap::new();
        let mut attribution_rev: HashMap<EpochParticipant, Vec<(usize, f64)>> = HashMap::new();
        for a in &p.personal_attributions {
            let epoch_idx = p
                .epoch_starts
                .iter()
                .position(|&s| s == a.epoch_start)
                .ok_or(AttributionError::UnknownEpoch(a.epoch_start))?;
            let from_idx = *participant_index_by_id
                .get(&a.from_id)
                .ok_or_else(|| AttributionError::UnknownParticipant(a.from_id.clone()))?;
            let to_idx = *participant_index_by_id
                .get(&a.to_id)
                .ok_or_else(|| AttributionError::UnknownParticipant(a.to_id.clone()))?;
            attribution_fwd
                .entry((epoch_idx, from_idx))
                .or_default()
                .push((to_idx, a.proportion));
            attribution_rev
                .entry((epoch_idx, to_idx))
                .or_default()
                .push((from_idx, a.proportion));
        }

        Ok(Self {
            base_nodes,
            base_index_by_address,
            base_edges,
            base_edges_by_dst,
            participants,
            epoch_starts: p.epoch_starts.clone(),
            last_epoch_end_ms: p.last_epoch_end_ms,
            parameters,
            indexer,
            mint_edges: p.indexed_mints.clone(),
            mint_by_base: p.indexed_mints.iter().copied().collect(),
            total_mint,
            radiation: p.radiation_transition_probabilities.clone(),
            attribution_fwd,
            attribution_rev,
        })
    }
}

// ---------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------

/// Single public builder for [`MarkovProcessGraph`]. Threads the
/// in-progress node list, edge list, and out-mass accumulator as explicit
/// mutable locals through the build steps, consuming itself into the
/// immutable graph on success.
pub struct MarkovProcessGraphBuilder<'a, G: ContributionGraph> {
    graph: &'a G,
    evaluator: WeightEvaluator<'a>,
    participants: Vec<Participant>,
    intervals: Vec<Interval>,
    attribution_inputs: Vec<PersonalAttributionInput>,
    parameters: Parameters,
}

impl<'a, G: ContributionGraph> MarkovProcessGraphBuilder<'a, G> {
    pub fn new(
        graph: &'a G,
        evaluator: WeightEvaluator<'a>,
        participants: Vec<Participant>,
        intervals: Vec<Interval>,
        attribution_inputs: Vec<PersonalAttributionInput>,
        parameters: Parameters,
    ) -> Self {
        Self {
            graph,
            evaluator,
            participants,
            intervals,
            attribution_inputs,
            parameters,
        }
    }

    pub fn build(self) -> Result<MarkovProcessGraph, GraphBuildError> {
        tracing::debug!(
            participants = self.participants.len(),
            intervals = self.intervals.len(),
            alpha = self.parameters.alpha,
            beta = self.parameters.beta,
            "building markov process graph"
        );

        // Step 1: validate parameters.
        self.parameters.validate()?;
        if self.intervals.is_empty() {
            return Err(ParameterError::EmptyIntervals.into());
        }
        for w in self.intervals.windows(2) {
            if w[1].start_ms <= w[0].start_ms {
                return Err(ParameterError::IntervalsNotIncreasing.into());
            }
        }

        // Step 2: derive epoch starts.
        let epoch_starts: Vec<i64> = self.intervals.iter().map(|i| i.start_ms).collect();
        let last_epoch_end_ms = self
            .intervals
            .last()
            .ok_or(ParameterError::EmptyIntervals)?
            .end_ms;

        let participant_index_by_address: HashMap<NodeAddress, usize> = self
            .participants
            .iter()
            .enumerate()
            .map(|(i, p)| (p.address.clone(), i))
            .collect();
        let participant_index_by_id: HashMap<String, usize> = self
            .participants
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.0.clone(), i))
            .collect();

        // Step 3: materialize base nodes.
        let mut base_nodes = Vec::new();
        let mut base_index_by_address = HashMap::new();
        for node in self.graph.nodes() {
            if participant_index_by_address.contains_key(&node.address) {
                continue;
            }
            if node.address.is_core() {
                return Err(GraphStructureError::UnexpectedCoreNode(node.address).into());
            }
            let w = self.evaluator.node_weight(&node.address);
            if !w.is_finite() || w < 0.0 {
                return Err(NodeWeightError::Invalid {
                    address: node.address,
                    value: w,
                }
                .into());
            }
            let idx = base_nodes.len();
            base_index_by_address.insert(node.address.clone(), idx);
            base_nodes.push(BaseNode {
                address: node.address,
                description: node.description,
                mint: w,
            });
        }

        let indexer = NodeIndexer {
            n_base: base_nodes.len(),
            n_participants: self.participants.len(),
            n_epochs: epoch_starts.len(),
        };

        // Step 4 (partial): personal attribution tables.
        let mut attribution_fwd: HashMap<EpochParticipant, Vec<(usize, f64)>> = HashMap::new();
        let mut attribution_rev: HashMap<EpochParticipant, Vec<(usize, f64)>> = HashMap::new();
        let mut attribution_sum: HashMap<EpochParticipant, f64> = HashMap::new();
        for a in &self.attribution_inputs {
            if !a.proportion.is_finite() || !(0.0..=1.0).contains(&a.proportion) {
                return Err(AttributionError::InvalidProportion {
                    from_id: a.from_id.clone(),
                    to_id: a.to_id.clone(),
                    value: a.proportion,
                }
                .into());
            }
            let epoch_idx = epoch_starts
                .iter()
                .position(|&s| s == a.epoch_start)
                .ok_or_else(|| AttributionError::UnknownEpoch(a.epoch_start))?;
            let from_idx = *participant_index_by_id
                .get(&a.from_id)
                .ok_or_else(|| AttributionError::UnknownParticipant(a.from_id.clone()))?;
            let to_idx = *participant_index_by_id
                .get(&a.to_id)
                .ok_or_else(|| AttributionError::UnknownParticipant(a.to_id.clone()))?;

            let sum = attribution_sum.entry((epoch_idx, from_idx)).or_insert(0.0);
            *sum += a.proportion;
            if *sum > 1.0 + 1e-9 {
                return Err(AttributionError::ProportionSumExceedsOne {
                    epoch_start: a.epoch_start,
                    from_id: a.from_id.clone(),
                    sum: *sum,
                }
                .into());
            }
            attribution_fwd
                .entry((epoch_idx, from_idx))
                .or_default()
                .push((to_idx, a.proportion));
            attribution_rev
                .entry((epoch_idx, to_idx))
                .or_default()
                .push((from_idx, a.proportion));
        }

        // Step 5: compute mint distribution.
        let total_mint: f64 = base_nodes.iter().filter(|n| n.mint > 0.0).map(|n| n.mint).sum();
        if total_mint <= 0.0 {
            tracing::warn!("no positive-weight base node; seed has no outflow");
            return Err(MintExhaustionError::NoOutflow.into());
        }
        let mint_edges: Vec<(usize, f64)> = base_nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.mint > 0.0)
            .map(|(i, n)| (i, n.mint / total_mint))
            .collect();
        let mint_by_base: HashMap<usize, f64> = mint_edges.iter().copied().collect();

        // Step 6: compile base edges.
        struct RawEdge {
            address: Address,
            reversed: bool,
            src: usize,
            dst: usize,
            weight: f64,
        }
        let mut raw_edges: Vec<RawEdge> = Vec::new();
        let rewrite = |addr: &NodeAddress, t: i64| -> Result<usize, GraphBuildError> {
            if let Some(&pi) = participant_index_by_address.get(addr) {
                let epoch_idx = match epoch_starts.iter().rposition(|&s| s <= t) {
                    Some(e) => e,
                    None => {
                        return Err(GraphStructureError::TimestampBeforeFirstEpoch {
                            timestamp_ms: t,
                            first_epoch_start: epoch_starts[0],
                        }
                        .into())
                    }
                };
                Ok(indexer.user_epoch(epoch_idx, pi))
            } else if let Some(&bi) = base_index_by_address.get(addr) {
                Ok(bi)
            } else {
                Err(GraphStructureError::DanglingReference(addr.0.clone()).into())
            }
        };

        for edge in self.graph.edges() {
            let (fw, bw) = self.evaluator.edge_weight(&edge.address);
            let src_idx = rewrite(&edge.src, edge.timestamp_ms)?;
            let dst_idx = rewrite(&edge.dst, edge.timestamp_ms)?;
            if fw > 0.0 {
                raw_edges.push(RawEdge {
                    address: edge.address.0.clone(),
                    reversed: false,
                    src: src_idx,
                    dst: dst_idx,
                    weight: fw,
                });
            }
            if bw > 0.0 {
                raw_edges.push(RawEdge {
                    address: edge.address.0.clone(),
                    reversed: true,
                    src: dst_idx,
                    dst: src_idx,
                    weight: bw,
                });
            }
        }

        let mut group_w: HashMap<usize, f64> = HashMap::new();
        for e in &raw_edges {
            *group_w.entry(e.src).or_insert(0.0) += e.weight;
        }

        let mut node_out_mass = vec![0.0_f64; indexer.total()];
        let mut base_edges = Vec::with_capacity(raw_edges.len());
        let mut base_edges_by_dst: HashMap<usize, Vec<usize>> = HashMap::new();
        for e in raw_edges {
            let is_user_epoch = matches!(indexer.kind(e.src), NodeKind::UserEpoch(_, _));
            let p_budget = if is_user_epoch {
                self.parameters.epoch_transition_remainder()
            } else {
                1.0 - self.parameters.alpha
            };
            let w = group_w[&e.src];
            let probability = (e.weight / w) * p_budget;
            if !(0.0..=1.0 + 1e-9).contains(&probability) {
                return Err(GraphStructureError::InvalidProbability {
                    address: e.address,
                    value: probability,
                }
                .into());
            }
            node_out_mass[e.src] += probability;
            let idx = base_edges.len();
            base_edges_by_dst.entry(e.dst).or_default().push(idx);
            base_edges.push(MaterializedEdge {
                address: e.address,
                reversed: e.reversed,
                src: e.src,
                dst: e.dst,
                probability,
            });
        }

        // Step 4 (remainder): payout + webbing out-mass, using the
        // indexer now that node counts are known.
        let n_epochs = epoch_starts.len();
        for epoch_idx in 0..n_epochs {
            for participant_idx in 0..self.participants.len() {
                let ue = indexer.user_epoch(epoch_idx, participant_idx);
                node_out_mass[ue] += self.parameters.beta;
                if epoch_idx == 0 {
                    node_out_mass[ue] += self.parameters.gamma_backward;
                } else {
                    node_out_mass[indexer.user_epoch(epoch_idx - 1, participant_idx)] +=
                        self.parameters.gamma_forward;
                    node_out_mass[ue] += self.parameters.gamma_backward;
                }
                if epoch_idx == n_epochs - 1 {
                    node_out_mass[ue] += self.parameters.gamma_forward;
                }
            }
        }
        for &(_, p) in &mint_edges {
            node_out_mass[indexer.seed()] += p;
        }

        // Step 7: derive radiation for every non-seed node.
        let mut radiation = vec![0.0_f64; indexer.total()];
        for (i, r) in radiation.iter_mut().enumerate() {
            if i == indexer.seed() {
                continue;
            }
            *r = 1.0 - node_out_mass[i];
        }

        tracing::debug!(
            base_nodes = indexer.n_base,
            base_edges = base_edges.len(),
            total_nodes = indexer.total(),
            total_mint,
            "markov process graph built"
        );

        Ok(MarkovProcessGraph {
            base_nodes,
            base_index_by_address,
            base_edges,
            base_edges_by_dst,
            participants: self.participants,
            epoch_starts,
            last_epoch_end_ms,
            parameters: self.parameters,
            indexer,
            mint_edges,
            mint_by_base,
            total_mint,
            radiation,
            attribution_fwd,
            attribution_rev,
        })
    }
}
