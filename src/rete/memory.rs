//! Per-node memories
//!
//! Nodes in the network are static topology plus closures; everything that
//! changes as facts flow lives here and is owned by working memory, one
//! memory per stateful node. All maps preserve insertion order so that
//! downstream emission order is reproducible.

use std::rc::Rc;

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::fact::{FactCell, FactId};
use crate::rete::aggregate::Aggregator;
use crate::rete::tuple::{JoinKey, Tuple};

/// A left tuple admitted at a beta node, with its stored join key.
///
/// Keys are computed when the token is admitted and reused on the retract
/// path, which therefore never calls user closures.
#[derive(Debug)]
pub struct LeftToken {
    /// The admitted tuple
    pub tuple: Rc<Tuple>,
    /// Join key computed on admission
    pub key: JoinKey,
}

/// A right-channel fact admitted at a beta node, with its stored key.
#[derive(Debug)]
pub struct RightToken {
    /// The fact cell
    pub cell: Rc<FactCell>,
    /// Join key computed on admission
    pub key: JoinKey,
}

/// Facts that passed one alpha chain, in arrival order.
#[derive(Debug, Default)]
pub struct AlphaMemory {
    /// fact identity → fact cell
    pub facts: IndexMap<FactId, Rc<FactCell>>,
}

/// State of one join node: both input sides, hash indexes per key, and
/// the child tuples admitted so far keyed by lineage.
#[derive(Debug, Default)]
pub struct JoinMemory {
    /// left tuple serial → token
    pub left: IndexMap<u64, LeftToken>,
    /// join key → left tuple serials, arrival order
    pub left_index: HashMap<JoinKey, Vec<u64>>,
    /// right fact identity → token
    pub right: IndexMap<FactId, RightToken>,
    /// join key → right fact identities, arrival order
    pub right_index: HashMap<JoinKey, Vec<FactId>>,
    /// (left serial, right fact) → child tuple
    pub children: IndexMap<(u64, FactId), Rc<Tuple>>,
}

/// State of a tuple-filter node: the tuples currently admitted.
#[derive(Debug, Default)]
pub struct FilterMemory {
    /// tuple serial → tuple
    pub admitted: IndexMap<u64, Rc<Tuple>>,
}

/// State of a binding node: one projected child per parent tuple.
#[derive(Debug, Default)]
pub struct BindingMemory {
    /// parent tuple serial → child tuple
    pub children: IndexMap<u64, Rc<Tuple>>,
}

/// State of a not/exists node. The node passes its left tuple through;
/// `emitting` holds the serials currently emitted downstream.
#[derive(Debug, Default)]
pub struct QuantifierMemory {
    /// left tuple serial → token
    pub left: IndexMap<u64, LeftToken>,
    /// join key → left tuple serials
    pub left_index: HashMap<JoinKey, Vec<u64>>,
    /// right fact identity → token
    pub right: IndexMap<FactId, RightToken>,
    /// join key → right fact identities
    pub right_index: HashMap<JoinKey, Vec<FactId>>,
    /// left tuples currently emitted downstream
    pub emitting: IndexMap<u64, Rc<Tuple>>,
}

/// Incremental state of one aggregate group.
pub struct GroupState {
    /// The running aggregation
    pub aggregator: Box<dyn Aggregator>,
    /// Child tuple emitted for this group, when the result is present
    pub child: Option<Rc<Tuple>>,
}

impl std::fmt::Debug for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupState")
            .field("emitting", &self.child.is_some())
            .finish()
    }
}

/// State of an aggregate node: per left tuple, the groups of right facts
/// and their running aggregations.
#[derive(Debug, Default)]
pub struct AggregateMemory {
    /// left tuple serial → tuple
    pub left: IndexMap<u64, Rc<Tuple>>,
    /// right fact identity → cell
    pub right: IndexMap<FactId, Rc<FactCell>>,
    /// left serial → group key → group state
    pub groups: HashMap<u64, IndexMap<JoinKey, GroupState>>,
    /// (left serial, fact identity) → the group the fact counted into
    pub fact_groups: HashMap<(u64, FactId), JoinKey>,
}

/// State of a terminal node: the tuples currently matching the rule.
#[derive(Debug, Default)]
pub struct TerminalMemory {
    /// tuple serial → tuple
    pub matches: IndexMap<u64, Rc<Tuple>>,
}

/// The memory of one stateful node.
#[derive(Debug)]
pub enum NodeMemory {
    /// Alpha memory
    Alpha(AlphaMemory),
    /// Join node memory
    Join(JoinMemory),
    /// Tuple-filter memory
    Filter(FilterMemory),
    /// Binding node memory
    Binding(BindingMemory),
    /// Not/exists node memory
    Quantifier(QuantifierMemory),
    /// Aggregate node memory
    Aggregate(AggregateMemory),
    /// Terminal node memory
    Terminal(TerminalMemory),
}

impl NodeMemory {
    /// Number of entries a snapshot reports for this memory.
    pub fn len(&self) -> usize {
        match self {
            NodeMemory::Alpha(m) => m.facts.len(),
            NodeMemory::Join(m) => m.children.len(),
            NodeMemory::Filter(m) => m.admitted.len(),
            NodeMemory::Binding(m) => m.children.len(),
            NodeMemory::Quantifier(m) => m.emitting.len(),
            NodeMemory::Aggregate(m) => {
                m.groups.values().flat_map(|g| g.values()).filter(|g| g.child.is_some()).count()
            }
            NodeMemory::Terminal(m) => m.matches.len(),
        }
    }

    /// True when the memory holds nothing a snapshot would report.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove one value from an index bucket, dropping the bucket when empty.
pub(crate) fn unindex<K: std::hash::Hash + Eq, V: PartialEq>(
    index: &mut HashMap<K, Vec<V>>,
    key: &K,
    value: &V,
) {
    if let Some(bucket) = index.get_mut(key) {
        bucket.retain(|v| v != value);
        if bucket.is_empty() {
            index.remove(key);
        }
    }
}
