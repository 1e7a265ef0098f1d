//! Working memory
//!
//! The session's registry of facts currently present, plus the dynamic
//! state of every stateful network node. Fact wrappers (identity, value
//! cell, alpha memberships) are owned exclusively here; node memories are
//! created by the network when a session starts and addressed by node id.

use std::rc::Rc;

use indexmap::IndexMap;
use std::collections::HashMap;

use crate::fact::{Fact, FactCell, FactId};
use crate::rete::memory::{
    AggregateMemory, AlphaMemory, BindingMemory, FilterMemory, JoinMemory, NodeMemory,
    QuantifierMemory, TerminalMemory,
};
use crate::rete::network::NodeId;
use crate::rete::tuple::Tuple;

/// A fact wrapper: the registry entry owning a fact's cell and its
/// derived alpha memberships, in alpha-walk order.
#[derive(Debug)]
pub struct FactEntry {
    pub(crate) cell: Rc<FactCell>,
    pub(crate) memberships: Vec<NodeId>,
}

impl FactEntry {
    /// The fact's value cell.
    pub fn cell(&self) -> &Rc<FactCell> {
        &self.cell
    }

    /// Alpha memories currently containing the fact.
    pub fn memberships(&self) -> &[NodeId] {
        &self.memberships
    }
}

/// The engine's registry of facts and per-node memories.
pub struct WorkingMemory {
    registry: IndexMap<FactId, FactEntry>,
    memories: HashMap<NodeId, NodeMemory>,
    root_tuple: Rc<Tuple>,
    next_fact_serial: u64,
    next_tuple_serial: u64,
}

impl WorkingMemory {
    /// Create an empty working memory.
    pub fn new() -> Self {
        Self {
            registry: IndexMap::new(),
            memories: HashMap::new(),
            root_tuple: Tuple::root(),
            next_fact_serial: 1,
            next_tuple_serial: 1,
        }
    }

    /// The shared empty tuple every beta path starts from.
    pub fn root_tuple(&self) -> &Rc<Tuple> {
        &self.root_tuple
    }

    /// True when a fact with this identity is registered.
    pub fn contains(&self, id: FactId) -> bool {
        self.registry.contains_key(&id)
    }

    /// Number of facts currently present.
    pub fn fact_count(&self) -> usize {
        self.registry.len()
    }

    /// Registry entry for a fact.
    pub fn entry(&self, id: FactId) -> Option<&FactEntry> {
        self.registry.get(&id)
    }

    /// Iterate the fact cells in insertion order.
    pub fn iter_facts(&self) -> impl Iterator<Item = &Rc<FactCell>> {
        self.registry.values().map(|entry| &entry.cell)
    }

    pub(crate) fn register(&mut self, id: FactId, value: Rc<dyn Fact>) -> Rc<FactCell> {
        let serial = self.next_fact_serial;
        self.next_fact_serial += 1;
        let cell = FactCell::new(id, serial, value);
        self.registry.insert(id, FactEntry { cell: cell.clone(), memberships: Vec::new() });
        cell
    }

    pub(crate) fn unregister(&mut self, id: FactId) -> Option<FactEntry> {
        self.registry.shift_remove(&id)
    }

    pub(crate) fn cell(&self, id: FactId) -> Option<Rc<FactCell>> {
        self.registry.get(&id).map(|entry| entry.cell.clone())
    }

    pub(crate) fn memberships(&self, id: FactId) -> Vec<NodeId> {
        self.registry.get(&id).map(|e| e.memberships.clone()).unwrap_or_default()
    }

    pub(crate) fn add_membership(&mut self, id: FactId, node: NodeId) {
        if let Some(entry) = self.registry.get_mut(&id) {
            entry.memberships.push(node);
        }
    }

    pub(crate) fn remove_membership(&mut self, id: FactId, node: NodeId) {
        if let Some(entry) = self.registry.get_mut(&id) {
            entry.memberships.retain(|n| *n != node);
        }
    }

    pub(crate) fn set_memberships(&mut self, id: FactId, memberships: Vec<NodeId>) {
        if let Some(entry) = self.registry.get_mut(&id) {
            entry.memberships = memberships;
        }
    }

    pub(crate) fn fresh_tuple_serial(&mut self) -> u64 {
        let serial = self.next_tuple_serial;
        self.next_tuple_serial += 1;
        serial
    }

    pub(crate) fn install_memory(&mut self, node: NodeId, memory: NodeMemory) {
        self.memories.insert(node, memory);
    }

    /// Memory of a node, when it has one.
    pub fn memory(&self, node: NodeId) -> Option<&NodeMemory> {
        self.memories.get(&node)
    }

    pub(crate) fn alpha_mut(&mut self, node: NodeId) -> &mut AlphaMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Alpha(m)) => m,
            _ => unreachable!("node {node:?} has no alpha memory"),
        }
    }

    pub(crate) fn join_mut(&mut self, node: NodeId) -> &mut JoinMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Join(m)) => m,
            _ => unreachable!("node {node:?} has no join memory"),
        }
    }

    pub(crate) fn filter_mut(&mut self, node: NodeId) -> &mut FilterMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Filter(m)) => m,
            _ => unreachable!("node {node:?} has no filter memory"),
        }
    }

    pub(crate) fn binding_mut(&mut self, node: NodeId) -> &mut BindingMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Binding(m)) => m,
            _ => unreachable!("node {node:?} has no binding memory"),
        }
    }

    pub(crate) fn quantifier_mut(&mut self, node: NodeId) -> &mut QuantifierMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Quantifier(m)) => m,
            _ => unreachable!("node {node:?} has no quantifier memory"),
        }
    }

    pub(crate) fn aggregate_mut(&mut self, node: NodeId) -> &mut AggregateMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Aggregate(m)) => m,
            _ => unreachable!("node {node:?} has no aggregate memory"),
        }
    }

    pub(crate) fn terminal_mut(&mut self, node: NodeId) -> &mut TerminalMemory {
        match self.memories.get_mut(&node) {
            Some(NodeMemory::Terminal(m)) => m,
            _ => unreachable!("node {node:?} has no terminal memory"),
        }
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkingMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingMemory")
            .field("facts", &self.registry.len())
            .field("memories", &self.memories.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::fact_id_of;

    #[derive(Debug)]
    struct Item {
        id: u32,
    }
    impl Fact for Item {}

    #[test]
    fn register_and_unregister_round_trip() {
        let mut wm = WorkingMemory::new();
        let fact: Rc<dyn Fact> = Rc::new(Item { id: 1 });
        let id = fact_id_of(&fact);

        wm.register(id, fact);
        assert!(wm.contains(id));
        assert_eq!(wm.fact_count(), 1);

        wm.unregister(id);
        assert!(!wm.contains(id));
        assert_eq!(wm.fact_count(), 0);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut wm = WorkingMemory::new();
        for n in 0..4u32 {
            let fact: Rc<dyn Fact> = Rc::new(Item { id: n });
            wm.register(fact_id_of(&fact), fact);
        }

        let serials: Vec<u64> = wm.iter_facts().map(|c| c.serial()).collect();
        assert_eq!(serials, vec![1, 2, 3, 4]);
    }

    #[test]
    fn memberships_track_additions_and_removals() {
        let mut wm = WorkingMemory::new();
        let fact: Rc<dyn Fact> = Rc::new(Item { id: 1 });
        let id = fact_id_of(&fact);
        wm.register(id, fact);

        wm.add_membership(id, NodeId(3));
        wm.add_membership(id, NodeId(5));
        assert_eq!(wm.memberships(id), vec![NodeId(3), NodeId(5)]);

        wm.remove_membership(id, NodeId(3));
        assert_eq!(wm.memberships(id), vec![NodeId(5)]);
    }

    #[test]
    fn tuple_serials_are_monotone() {
        let mut wm = WorkingMemory::new();
        let a = wm.fresh_tuple_serial();
        let b = wm.fresh_tuple_serial();
        assert!(b > a);
    }
}
