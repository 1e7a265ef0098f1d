//! Aggregate nodes and aggregators
//!
//! An aggregate node reduces the right-channel facts matching a left
//! tuple to one synthetic element per group. Group state is incremental:
//! a right insert/update/retract touches exactly the affected group, and
//! the transition of [`Aggregator::result`] decides what flows
//! downstream. `None→Some` asserts a child tuple, `Some→Some` updates
//! its payload in place (tuple identity preserved), `Some→None` retracts
//! it. Whether an empty group emits is the aggregator's call: a collect
//! with minimum cardinality 0 emits an empty collection, a sum does not
//! emit at all.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::ExecutionContext;
use crate::errors::{EngineError, Result};
use crate::fact::{Fact, FactCell, FactId};
use crate::rete::memory::{AggregateMemory, GroupState};
use crate::rete::network::{
    condition_failure, AggregateNode, Delta, Grouping, NodeId, ReteNetwork, RightOp,
};
use crate::rete::tuple::{Element, ElementKey, JoinKey, Tuple};

/// Incremental reduction of one group of facts.
pub trait Aggregator {
    /// A fact joined the group.
    fn insert(&mut self, fact: &Rc<FactCell>) -> Result<()>;
    /// A fact in the group changed contents.
    fn modify(&mut self, fact: &Rc<FactCell>) -> Result<()>;
    /// A fact left the group.
    fn remove(&mut self, id: FactId);
    /// The current result, or `None` while the group should not emit.
    fn result(&self) -> Option<Rc<dyn Any>>;
    /// True when the group holds no facts.
    fn is_empty(&self) -> bool;
}

/// Collects the group's facts into a `Vec<Rc<dyn Fact>>`, emitting once
/// the configured minimum cardinality is reached. The default minimum of
/// zero emits an empty collection for an empty group.
pub struct CollectAggregator {
    min_count: usize,
    facts: IndexMap<FactId, Rc<FactCell>>,
}

impl CollectAggregator {
    /// Collect with no minimum; empty groups emit an empty collection.
    pub fn new() -> Self {
        Self { min_count: 0, facts: IndexMap::new() }
    }

    /// Collect, emitting only once the group holds at least `min_count`
    /// facts.
    pub fn with_min_count(min_count: usize) -> Self {
        Self { min_count, facts: IndexMap::new() }
    }
}

impl Default for CollectAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator for CollectAggregator {
    fn insert(&mut self, fact: &Rc<FactCell>) -> Result<()> {
        self.facts.insert(fact.id(), fact.clone());
        Ok(())
    }

    fn modify(&mut self, _fact: &Rc<FactCell>) -> Result<()> {
        Ok(())
    }

    fn remove(&mut self, id: FactId) {
        self.facts.shift_remove(&id);
    }

    fn result(&self) -> Option<Rc<dyn Any>> {
        if self.facts.len() < self.min_count {
            return None;
        }
        let collected: Vec<Rc<dyn Fact>> = self.facts.values().map(|c| c.value()).collect();
        Some(Rc::new(collected))
    }

    fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Counts the group's facts; always emits, including zero.
#[derive(Default)]
pub struct CountAggregator {
    ids: IndexMap<FactId, ()>,
}

impl CountAggregator {
    /// A fresh, empty count.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for CountAggregator {
    fn insert(&mut self, fact: &Rc<FactCell>) -> Result<()> {
        self.ids.insert(fact.id(), ());
        Ok(())
    }

    fn modify(&mut self, _fact: &Rc<FactCell>) -> Result<()> {
        Ok(())
    }

    fn remove(&mut self, id: FactId) {
        self.ids.shift_remove(&id);
    }

    fn result(&self) -> Option<Rc<dyn Any>> {
        Some(Rc::new(self.ids.len()))
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Sums a numeric projection of the group's facts; does not emit for an
/// empty group. Per-fact contributions are stored so retraction never
/// re-reads the (possibly already mutated) fact.
pub struct SumAggregator {
    extract: Box<dyn Fn(&dyn Fact) -> Result<f64>>,
    contributions: IndexMap<FactId, f64>,
}

impl SumAggregator {
    /// Sum the projection `extract` over the group.
    pub fn new<T: Fact>(extract: impl Fn(&T) -> f64 + 'static) -> Self {
        Self {
            extract: Box::new(move |fact: &dyn Fact| {
                let typed = fact.downcast_ref::<T>().ok_or(EngineError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                    actual: format!("{fact:?}"),
                })?;
                Ok(extract(typed))
            }),
            contributions: IndexMap::new(),
        }
    }
}

impl Aggregator for SumAggregator {
    fn insert(&mut self, fact: &Rc<FactCell>) -> Result<()> {
        let value = fact.value();
        let contribution = (self.extract)(value.as_ref())?;
        self.contributions.insert(fact.id(), contribution);
        Ok(())
    }

    fn modify(&mut self, fact: &Rc<FactCell>) -> Result<()> {
        self.insert(fact)
    }

    fn remove(&mut self, id: FactId) {
        self.contributions.shift_remove(&id);
    }

    fn result(&self) -> Option<Rc<dyn Any>> {
        if self.contributions.is_empty() {
            return None;
        }
        Some(Rc::new(self.contributions.values().sum::<f64>()))
    }

    fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }
}

/// Downcast a collection emitted by [`CollectAggregator`] to a concrete
/// fact type.
pub fn collected<T: Fact>(tuple: &Tuple, index: usize) -> Result<Vec<Rc<T>>> {
    let collection = tuple.downcast_value_at::<Vec<Rc<dyn Fact>>>(index)?;
    collection
        .iter()
        .map(|fact| {
            crate::fact::downcast_fact::<T>(fact.clone()).ok_or(EngineError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: format!("{fact:?}"),
            })
        })
        .collect()
}

fn group_key_for(
    node: &AggregateNode,
    tuple: &Tuple,
    fact: &Rc<FactCell>,
    ctx: &ExecutionContext<'_>,
) -> Result<JoinKey> {
    match &node.grouping {
        Grouping::Unit => Ok(JoinKey::Unit),
        Grouping::ByKey(f) => {
            let value = fact.value();
            f(tuple, value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))
        }
    }
}

fn group_entry<'m>(
    memory: &'m mut AggregateMemory,
    node: &AggregateNode,
    left_serial: u64,
    key: &JoinKey,
) -> &'m mut GroupState {
    memory
        .groups
        .entry(left_serial)
        .or_default()
        .entry(key.clone())
        .or_insert_with(|| GroupState { aggregator: (node.factory)(), child: None })
}

/// Add one fact to one group and record the fact→group assignment.
fn add_to_group(
    memory: &mut AggregateMemory,
    node: &AggregateNode,
    left_serial: u64,
    key: &JoinKey,
    cell: &Rc<FactCell>,
) -> Result<()> {
    group_entry(memory, node, left_serial, key).aggregator.insert(cell)?;
    memory.fact_groups.insert((left_serial, cell.id()), key.clone());
    Ok(())
}

fn remove_from_group(memory: &mut AggregateMemory, left_serial: u64, key: &JoinKey, id: FactId) {
    if let Some(group) =
        memory.groups.get_mut(&left_serial).and_then(|groups| groups.get_mut(key))
    {
        group.aggregator.remove(id);
    }
}

/// What happened to one group's emission after a mutation.
enum GroupChange {
    None,
    Created(JoinKey, Rc<dyn Any>),
    Updated(Rc<Tuple>, Rc<dyn Any>),
    Dropped(Rc<Tuple>),
}

fn settle_group(
    memory: &mut AggregateMemory,
    left_serial: u64,
    key: &JoinKey,
    drop_empty: bool,
) -> GroupChange {
    let Some(groups) = memory.groups.get_mut(&left_serial) else {
        return GroupChange::None;
    };
    let Some(group) = groups.get_mut(key) else {
        return GroupChange::None;
    };
    let after = group.aggregator.result();
    let change = match (group.child.clone(), after) {
        (None, None) => GroupChange::None,
        (None, Some(result)) => GroupChange::Created(key.clone(), result),
        (Some(child), Some(result)) => GroupChange::Updated(child, result),
        (Some(child), None) => {
            group.child = None;
            GroupChange::Dropped(child)
        }
    };
    if drop_empty && group.aggregator.is_empty() && group.child.is_none() {
        groups.shift_remove(key);
    }
    change
}

/// Apply a settled change: create/refresh/drop the child tuple and emit.
fn emit_change(
    network: &ReteNetwork,
    id: NodeId,
    node: &AggregateNode,
    left: &Rc<Tuple>,
    change: GroupChange,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match change {
        GroupChange::None => Ok(()),
        GroupChange::Created(key, result) => {
            let serial = ctx.wm.fresh_tuple_serial();
            let child = Tuple::extend(
                left,
                serial,
                ElementKey::Group(key.clone()),
                Element::Value(RefCell::new(result)),
            );
            let memory = ctx.wm.aggregate_mut(id);
            if let Some(group) =
                memory.groups.get_mut(&left.serial()).and_then(|groups| groups.get_mut(&key))
            {
                group.child = Some(child.clone());
            }
            network.emit(&node.children, &Delta::Assert(child), ctx)
        }
        GroupChange::Updated(child, result) => {
            child.set_value(result);
            network.emit(&node.children, &Delta::Update(child), ctx)
        }
        GroupChange::Dropped(child) => network.emit(&node.children, &Delta::Retract(child), ctx),
    }
}

pub(crate) fn left(
    network: &ReteNetwork,
    id: NodeId,
    node: &AggregateNode,
    delta: &Delta,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match delta {
        Delta::Assert(tuple) => {
            {
                let memory = ctx.wm.aggregate_mut(id);
                memory.left.insert(tuple.serial(), tuple.clone());
                memory.groups.insert(tuple.serial(), IndexMap::new());
            }
            let right: Vec<Rc<FactCell>> =
                ctx.wm.aggregate_mut(id).right.values().cloned().collect();
            for cell in &right {
                let key = group_key_for(node, tuple, cell, ctx)?;
                let added = add_to_group(ctx.wm.aggregate_mut(id), node, tuple.serial(), &key, cell);
                added.map_err(|e| condition_failure(&node.name, Some(cell.value()), e, ctx))?;
            }
            if matches!(node.grouping, Grouping::Unit) {
                group_entry(ctx.wm.aggregate_mut(id), node, tuple.serial(), &JoinKey::Unit);
            }
            reconcile_left(network, id, node, tuple, ctx)
        }
        Delta::Update(tuple) => {
            if !ctx.wm.aggregate_mut(id).left.contains_key(&tuple.serial()) {
                return Ok(());
            }
            ctx.wm.aggregate_mut(id).left.insert(tuple.serial(), tuple.clone());
            let right: Vec<Rc<FactCell>> =
                ctx.wm.aggregate_mut(id).right.values().cloned().collect();
            // Group keys may depend on the left tuple; regroup any fact
            // whose key moved.
            for cell in &right {
                let new_key = group_key_for(node, tuple, cell, ctx)?;
                let moved = {
                    let memory = ctx.wm.aggregate_mut(id);
                    let slot = (tuple.serial(), cell.id());
                    match memory.fact_groups.get(&slot).cloned() {
                        Some(ref old) if *old == new_key => Ok(()),
                        Some(old) => {
                            remove_from_group(memory, tuple.serial(), &old, cell.id());
                            add_to_group(memory, node, tuple.serial(), &new_key, cell)
                        }
                        None => Ok(()),
                    }
                };
                moved.map_err(|e| condition_failure(&node.name, Some(cell.value()), e, ctx))?;
            }
            reconcile_left(network, id, node, tuple, ctx)
        }
        Delta::Retract(tuple) => {
            let dropped: Vec<Rc<Tuple>> = {
                let memory = ctx.wm.aggregate_mut(id);
                if memory.left.shift_remove(&tuple.serial()).is_none() {
                    return Ok(());
                }
                let right_ids: Vec<FactId> = memory.right.keys().copied().collect();
                for fid in right_ids {
                    memory.fact_groups.remove(&(tuple.serial(), fid));
                }
                memory
                    .groups
                    .remove(&tuple.serial())
                    .map(|groups| groups.into_values().filter_map(|group| group.child).collect())
                    .unwrap_or_default()
            };
            for child in dropped {
                network.emit(&node.children, &Delta::Retract(child), ctx)?;
            }
            Ok(())
        }
    }
}

/// Re-derive every group of one left tuple and emit the transitions, in
/// group insertion order.
fn reconcile_left(
    network: &ReteNetwork,
    id: NodeId,
    node: &AggregateNode,
    tuple: &Rc<Tuple>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let keys: Vec<JoinKey> = ctx
        .wm
        .aggregate_mut(id)
        .groups
        .get(&tuple.serial())
        .map(|groups| groups.keys().cloned().collect())
        .unwrap_or_default();
    let drop_empty = !matches!(node.grouping, Grouping::Unit);
    for key in keys {
        let change = settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &key, drop_empty);
        emit_change(network, id, node, tuple, change, ctx)?;
    }
    Ok(())
}

pub(crate) fn right(
    network: &ReteNetwork,
    id: NodeId,
    node: &AggregateNode,
    cell: &Rc<FactCell>,
    op: RightOp,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let drop_empty = !matches!(node.grouping, Grouping::Unit);
    match op {
        RightOp::Assert => {
            ctx.wm.aggregate_mut(id).right.insert(cell.id(), cell.clone());
            let lefts: Vec<Rc<Tuple>> = ctx.wm.aggregate_mut(id).left.values().cloned().collect();
            for tuple in lefts {
                let key = group_key_for(node, &tuple, cell, ctx)?;
                let added = add_to_group(ctx.wm.aggregate_mut(id), node, tuple.serial(), &key, cell);
                added.map_err(|e| condition_failure(&node.name, Some(cell.value()), e, ctx))?;
                let change =
                    settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &key, drop_empty);
                emit_change(network, id, node, &tuple, change, ctx)?;
            }
            Ok(())
        }
        RightOp::Update => {
            if !ctx.wm.aggregate_mut(id).right.contains_key(&cell.id()) {
                return Ok(());
            }
            let lefts: Vec<Rc<Tuple>> = ctx.wm.aggregate_mut(id).left.values().cloned().collect();
            for tuple in lefts {
                let new_key = group_key_for(node, &tuple, cell, ctx)?;
                let slot = (tuple.serial(), cell.id());
                let old_key = ctx.wm.aggregate_mut(id).fact_groups.get(&slot).cloned();
                match old_key {
                    Some(ref old) if *old == new_key => {
                        let modified = {
                            let memory = ctx.wm.aggregate_mut(id);
                            match memory
                                .groups
                                .get_mut(&tuple.serial())
                                .and_then(|groups| groups.get_mut(&new_key))
                            {
                                Some(group) => group.aggregator.modify(cell),
                                None => Ok(()),
                            }
                        };
                        modified
                            .map_err(|e| condition_failure(&node.name, Some(cell.value()), e, ctx))?;
                        let change =
                            settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &new_key, drop_empty);
                        emit_change(network, id, node, &tuple, change, ctx)?;
                    }
                    Some(old) => {
                        remove_from_group(ctx.wm.aggregate_mut(id), tuple.serial(), &old, cell.id());
                        let change =
                            settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &old, drop_empty);
                        emit_change(network, id, node, &tuple, change, ctx)?;
                        let added =
                            add_to_group(ctx.wm.aggregate_mut(id), node, tuple.serial(), &new_key, cell);
                        added.map_err(|e| condition_failure(&node.name, Some(cell.value()), e, ctx))?;
                        let change =
                            settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &new_key, drop_empty);
                        emit_change(network, id, node, &tuple, change, ctx)?;
                    }
                    None => {}
                }
            }
            Ok(())
        }
        RightOp::Retract => {
            if ctx.wm.aggregate_mut(id).right.shift_remove(&cell.id()).is_none() {
                return Ok(());
            }
            let lefts: Vec<Rc<Tuple>> = ctx.wm.aggregate_mut(id).left.values().cloned().collect();
            for tuple in lefts {
                let slot = (tuple.serial(), cell.id());
                let Some(key) = ctx.wm.aggregate_mut(id).fact_groups.remove(&slot) else {
                    continue;
                };
                remove_from_group(ctx.wm.aggregate_mut(id), tuple.serial(), &key, cell.id());
                let change = settle_group(ctx.wm.aggregate_mut(id), tuple.serial(), &key, drop_empty);
                emit_change(network, id, node, &tuple, change, ctx)?;
            }
            Ok(())
        }
    }
}
