//! Stationary-distribution cred (reputation) computation over a
//! time-stamped, heterogeneous contribution graph.
//!
//! The pipeline is a straight line through the modules below:
//!
//! 1. [`weights`] composes multiplicative node/edge weights from
//!    [`address`] prefixes.
//! 2. [`graph`] augments the raw contribution graph (via [`external`])
//!    with synthetic seed, epoch-accumulator, and per-participant
//!    per-epoch nodes, and compiles it into a normalized, row-stochastic
//!    operator.
//! 3. [`chain`] is that operator's storage and single-step transition.
//! 4. [`solver`] powers-iterates the operator to a stationary
//!    distribution.
//! 5. [`cred`] scales the stationary distribution into per-participant
//!    cred.
//!
//! Nothing here owns persistence or the contribution-graph data model
//! directly; [`external`] is the seam to both.

#![forbid(unsafe_code)]

pub mod address;
pub mod chain;
pub mod cred;
pub mod external;
pub mod graph;
pub mod solver;
pub mod weights;

pub use address::{Address, AddressTrie, EdgeAddress, NodeAddress};
pub use chain::{SparseMarkovChain, StochasticityError};
pub use cred::{CredAssembler, CredError, CredResult, ParticipantCred};
pub use graph::{
    GraphBuildError, Interval, MarkovProcessGraph, MarkovProcessGraphBuilder, Parameters,
    Participant, ParticipantId,
};
pub use solver::{
    find_stationary_distribution, ConvergenceStatus, Scheduler, SolverOptions, StationaryResult,
    ThreadScheduler,
};
pub use weights::{WeightEvaluator, WeightError, Weights};

#[cfg(feature = "tokio-scheduler")]
pub use solver::{find_stationary_distribution_async, TokioScheduler};

/// The full run error surface: building the graph, converting it to a
/// chain, and solving can each fail in their own way; callers that drive
/// the whole pipeline in one call generally want this rather than
/// matching on each stage's error type individually.
#[derive(Debug, thiserror::Error)]
pub enum CredEngineError {
    #[error(transparent)]
    Build(#[from] GraphBuildError),
    #[error(transparent)]
    Stochasticity(#[from] StochasticityError),
    #[error(transparent)]
    Cred(#[from] cred::CredError),
}

/// Run the full pipeline: build the graph, convert to a chain, solve for
/// the stationary distribution, and scale into cred. `pi0` defaults to a
/// uniform distribution when `None`.
pub fn compute_cred<G: external::ContributionGraph>(
    contribution_graph: &G,
    evaluator: WeightEvaluator<'_>,
    participants: Vec<Participant>,
    intervals: Vec<Interval>,
    attribution_inputs: Vec<external::PersonalAttributionInput>,
    parameters: Parameters,
    options: &SolverOptions,
) -> Result<(CredResult, StationaryResult), CredEngineError> {
    let built = MarkovProcessGraphBuilder::new(
        contribution_graph,
        evaluator,
        participants,
        intervals,
        attribution_inputs,
        parameters,
    )
    .build()?;

    let chain = built.to_markov_chain()?;
    let n = built.len();
    let result = find_stationary_distribution(
        &chain,
        vec![1.0 / n as f64; n],
        &vec![0.0; n],
        0.0,
        options,
        &ThreadScheduler,
        |i| built.node_address(i),
    )?;

    let cred = CredAssembler::new(&built).assemble(&result.pi)?;
    Ok((cred, result))
}
