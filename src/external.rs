//! External collaborator boundary contracts (C7).
//!
//! This module is the narrow seam between the cred engine and everything it
//! deliberately does not own: the contribution-graph data model, address
//! wire encoding, and canonical JSON for persisted artifacts. The core only
//! ever reads through [`ContributionGraph`]; it never mutates the graph.

#![forbid(unsafe_code)]

use crate::address::{Address, EdgeAddress, NodeAddress, CORE_PREFIX};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------
// Graph iteration interface
// ---------------------------------------------------------------------

/// One node as seen by the core: an address, a human-readable description,
/// and an optional creation timestamp.
#[derive(Debug, Clone)]
pub struct ContributionNode {
    pub address: NodeAddress,
    pub description: String,
    pub timestamp_ms: Option<i64>,
}

/// One edge as seen by the core. The external graph guarantees this
/// iteration only yields non-dangling edges (both endpoints exist).
#[derive(Debug, Clone)]
pub struct ContributionEdge {
    pub address: EdgeAddress,
    pub src: NodeAddress,
    pub dst: NodeAddress,
    pub timestamp_ms: i64,
}

/// The boundary contract to the contribution-graph data model. Addresses
/// are unique; dangling edges are excluded from `edges()` by the
/// implementor, not by the core.
pub trait ContributionGraph {
    /// Iterate every node in the graph, in an implementor-defined but
    /// stable order (the cred engine treats "order observed from the
    /// input graph" as this iteration order).
    fn nodes(&self) -> Box<dyn Iterator<Item = ContributionNode> + '_>;

    /// Iterate every non-dangling edge in the graph.
    fn edges(&self) -> Box<dyn Iterator<Item = ContributionEdge> + '_>;
}

/// A simple in-memory [`ContributionGraph`], useful for tests and small
/// programs that already have the full node/edge lists in hand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContributionGraph {
    pub nodes: Vec<ContributionNode>,
    pub edges: Vec<ContributionEdge>,
}

impl ContributionGraph for InMemoryContributionGraph {
    fn nodes(&self) -> Box<dyn Iterator<Item = ContributionNode> + '_> {
        Box::new(self.nodes.iter().cloned())
    }

    fn edges(&self) -> Box<dyn Iterator<Item = ContributionEdge> + '_> {
        Box::new(self.edges.iter().cloned())
    }
}

/// One entry of the personal-attribution input: participant `from_id`
/// allocates `proportion` of their `epoch_start` payout to `to_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalAttributionInput {
    pub from_id: String,
    pub to_id: String,
    pub epoch_start: i64,
    pub proportion: f64,
}

// ---------------------------------------------------------------------
// Wire-level address encoding
// ---------------------------------------------------------------------

/// Errors from decoding a wire-encoded address.
#[derive(Debug, thiserror::Error)]
pub enum AddressDecodeError {
    #[error("unexpected end of input while decoding address")]
    UnexpectedEof,
    #[error("part length {0} exceeds remaining input")]
    PartLengthOverflow(usize),
    #[error("part bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Encode an address as a length-prefixed, dot-free part sequence: a
/// little-endian `u32` part count, then for each part a little-endian
/// `u32` byte length followed by the UTF-8 bytes.
pub fn encode_address(addr: &Address) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(addr.parts().len() as u32).to_le_bytes());
    for part in addr.parts() {
        out.extend_from_slice(&(part.len() as u32).to_le_bytes());
        out.extend_from_slice(part.as_bytes());
    }
    out
}

/// Decode an address from the front of `bytes`, returning the address and
/// the number of bytes consumed.
pub fn decode_address(bytes: &[u8]) -> Result<(Address, usize), AddressDecodeError> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)?;
    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_u32(bytes, &mut cursor)? as usize;
        if cursor + len > bytes.len() {
            return Err(AddressDecodeError::PartLengthOverflow(len));
        }
        let part = std::str::from_utf8(&bytes[cursor..cursor + len])
            .map_err(|_| AddressDecodeError::InvalidUtf8)?
            .to_string();
        cursor += len;
        parts.push(part);
    }
    Ok((Address::from_parts(parts), cursor))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, AddressDecodeError> {
    if *cursor + 4 > bytes.len() {
        return Err(AddressDecodeError::UnexpectedEof);
    }
    let c = *cursor;
    let v = u32::from_le_bytes([bytes[c], bytes[c + 1], bytes[c + 2], bytes[c + 3]]);
    *cursor += 4;
    Ok(v)
}

/// Encode several addresses as a single nested blob: a `u32` address
/// count, then each address via [`encode_address`]. Used for edge
/// addresses that embed more than one node address (e.g. `has-parent`).
pub fn encode_nested(addrs: &[&Address]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(addrs.len() as u32).to_le_bytes());
    for a in addrs {
        out.extend_from_slice(&encode_address(a));
    }
    out
}

/// Decode a nested blob produced by [`encode_nested`].
pub fn decode_nested(bytes: &[u8]) -> Result<Vec<Address>, AddressDecodeError> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (addr, consumed) = decode_address(&bytes[cursor..])?;
        cursor += consumed;
        out.push(addr);
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Synthetic address constructors (seed / epoch / user-epoch / fibration
// edges / radiation / minting). Exact strings are an implementation
// choice; what matters is that every prefix is unique and round-trips.
// ---------------------------------------------------------------------

/// `core/SEED`
pub fn seed_address() -> NodeAddress {
    NodeAddress(Address::from_parts([CORE_PREFIX, "SEED"]))
}

/// `core/EPOCH/<epochStart>`
pub fn epoch_accumulator_address(epoch_start: i64) -> NodeAddress {
    NodeAddress(Address::from_parts([
        CORE_PREFIX.to_string(),
        "EPOCH".to_string(),
        epoch_start.to_string(),
    ]))
}

/// `core/USER_EPOCH/<epochStart>/<ownerId>`
pub fn user_epoch_address(epoch_start: i64, owner_id: &str) -> NodeAddress {
    NodeAddress(Address::from_parts([
        CORE_PREFIX.to_string(),
        "USER_EPOCH".to_string(),
        epoch_start.to_string(),
        owner_id.to_string(),
    ]))
}

/// `core/fibration/EPOCH_PAYOUT/<epochStart>/<ownerId>`
pub fn payout_edge_address(epoch_start: i64, owner_id: &str) -> EdgeAddress {
    EdgeAddress(Address::from_parts([
        CORE_PREFIX.to_string(),
        "fibration".to_string(),
        "EPOCH_PAYOUT".to_string(),
        epoch_start.to_string(),
        owner_id.to_string(),
    ]))
}

/// `core/fibration/EPOCH_WEBBING/<thisStart>/<lastStart>/<ownerId>`
pub fn webbing_edge_address(this_start: i64, last_start: i64, owner_id: &str) -> EdgeAddress {
    EdgeAddress(Address::from_parts([
        CORE_PREFIX.to_string(),
        "fibration".to_string(),
        "EPOCH_WEBBING".to_string(),
        this_start.to_string(),
        last_start.to_string(),
        owner_id.to_string(),
    ]))
}

/// `core/fibration/EPOCH_ATTRIBUTION/<epochStart>/<fromId>/<toId>`
pub fn attribution_edge_address(epoch_start: i64, from_id: &str, to_id: &str) -> EdgeAddress {
    EdgeAddress(Address::from_parts([
        CORE_PREFIX.to_string(),
        "fibration".to_string(),
        "EPOCH_ATTRIBUTION".to_string(),
        epoch_start.to_string(),
        from_id.to_string(),
        to_id.to_string(),
    ]))
}

/// `core/CONTRIBUTION_RADIATION/<...parts of the radiating node>`
pub fn radiation_edge_address(for_address: &Address) -> EdgeAddress {
    let mut parts = vec![CORE_PREFIX.to_string(), "CONTRIBUTION_RADIATION".to_string()];
    parts.extend(for_address.parts().iter().cloned());
    EdgeAddress(Address::from_parts(parts))
}

/// `core/SEED_MINT/<...parts of the minting target>`
pub fn mint_edge_address(for_address: &Address) -> EdgeAddress {
    let mut parts = vec![CORE_PREFIX.to_string(), "SEED_MINT".to_string()];
    parts.extend(for_address.parts().iter().cloned());
    EdgeAddress(Address::from_parts(parts))
}

// ---------------------------------------------------------------------
// Canonical (persisted) JSON
// ---------------------------------------------------------------------

/// Serializable record for one materialized (real) node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedNode {
    pub address: Address,
    pub description: String,
    pub mint: f64,
}

/// Serializable record for one materialized edge, with endpoints encoded
/// as indices into the canonical node order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEdge {
    pub address: Address,
    pub reversed: bool,
    pub src: usize,
    pub dst: usize,
    pub transition_probability: f64,
}

/// Serializable participant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedParticipant {
    pub address: Address,
    pub id: String,
    pub description: String,
}

/// Serializable transition parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersistedParameters {
    pub alpha: f64,
    pub beta: f64,
    pub gamma_forward: f64,
    pub gamma_backward: f64,
}

/// The optional, externally-serialized Markov process graph artifact.
/// Virtualized edges are omitted; they are re-derived on load from
/// `parameters`, `indexed_mints`, `radiation_transition_probabilities`,
/// and `personal_attributions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMarkovProcessGraph {
    pub nodes: Vec<PersistedNode>,
    pub indexed_edges: Vec<PersistedEdge>,
    pub participants: Vec<PersistedParticipant>,
    pub epoch_starts: Vec<i64>,
    pub last_epoch_end_ms: i64,
    pub parameters: PersistedParameters,
    pub radiation_transition_probabilities: Vec<f64>,
    pub indexed_mints: Vec<(usize, f64)>,
    pub personal_attributions: Vec<PersonalAttributionInput>,
}
