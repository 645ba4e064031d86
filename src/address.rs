//! Addresses and the prefix trie used to look up weights.
//!
//! An [`Address`] is an ordered sequence of string parts with no semantics
//! beyond prefix matching. [`AddressTrie`] stores a value at an arbitrary
//! subset of prefixes and, given a full address, returns every stored value
//! whose key is a prefix of it, in root-to-leaf order.
//!
//! Two disjoint address flavors exist ([`NodeAddress`], [`EdgeAddress`]);
//! they are thin newtypes over the same underlying [`Address`] so that a
//! node weight can never accidentally be looked up with an edge address and
//! vice versa.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

/// The reserved namespace prefix for synthesized nodes/edges (seed, epoch
/// accumulators, user-epoch nodes, and all virtualized edge families). An
/// address beginning with this part is forbidden in external input.
pub const CORE_PREFIX: &str = "core";

/// An ordered sequence of string parts. Carries no semantics beyond prefix
/// matching.
#[derive(Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Address(Vec<String>);

impl Address {
    /// The empty address (matches nothing but is a prefix of everything).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build an address from owned parts.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// The ordered parts of this address.
    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Append a part, returning the extended address.
    pub fn appended(&self, part: impl Into<String>) -> Self {
        let mut parts = self.0.clone();
        parts.push(part.into());
        Self(parts)
    }

    /// `true` if `self` is a prefix of `other` (including equality).
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// `true` if this address's first part is the reserved core namespace
    /// sentinel.
    pub fn is_core(&self) -> bool {
        self.0.first().map(|p| p.as_str()) == Some(CORE_PREFIX)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Macro-free boilerplate for the two address flavors: a thin newtype that
/// derefs to [`Address`] so ordinary address methods stay available, while
/// keeping the two flavors distinct at the type level.
macro_rules! address_newtype {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub Address);

        impl std::ops::Deref for $name {
            type Target = Address;
            fn deref(&self) -> &Address {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }

        impl From<Address> for $name {
            fn from(a: Address) -> Self {
                Self(a)
            }
        }
    };
}

address_newtype!(NodeAddress);
address_newtype!(EdgeAddress);

/// A trie node: an optional stored value plus a map of children keyed by
/// the next address part.
struct TrieNode<T> {
    value: Option<T>,
    children: HashMap<String, TrieNode<T>>,
}

impl<T> TrieNode<T> {
    fn empty() -> Self {
        Self {
            value: None,
            children: HashMap::new(),
        }
    }
}

/// A prefix trie keyed by the ordered parts of an [`Address`].
///
/// `add` is last-write-wins on an exact prefix collision (no error). `get`
/// walks root-to-leaf along `address`'s parts and collects every stored
/// value it passes, in that same root-to-leaf order; the empty set of
/// matches is a valid, common result.
///
/// Complexity: both operations are `O(len(address))`. Sibling insertion
/// order never affects `get`.
pub struct AddressTrie<T> {
    root: TrieNode<T>,
}

impl<T: Copy> AddressTrie<T> {
    /// An empty trie.
    pub fn new() -> Self {
        Self {
            root: TrieNode::empty(),
        }
    }

    /// Store `value` at `prefix`. Re-adding the same prefix overwrites the
    /// previous value.
    pub fn add(&mut self, prefix: &Address, value: T) {
        let mut node = &mut self.root;
        for part in prefix.parts() {
            node = node
                .children
                .entry(part.clone())
                .or_insert_with(TrieNode::empty);
        }
        node.value = Some(value);
    }

    /// Every stored value whose key is a prefix of `address`, in
    /// root-to-leaf order.
    pub fn get(&self, address: &Address) -> Vec<T> {
        let mut out = Vec::new();
        let mut node = &self.root;
        if let Some(v) = node.value {
            out.push(v);
        }
        for part in address.parts() {
            match node.children.get(part) {
                Some(next) => {
                    node = next;
                    if let Some(v) = node.value {
                        out.push(v);
                    }
                }
                None => break,
            }
        }
        out
    }
}

impl<T: Copy> Default for AddressTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}
