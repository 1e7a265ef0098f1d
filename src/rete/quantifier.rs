//! Not and exists nodes
//!
//! Both quantifiers pass the left tuple through unchanged and differ only
//! in when they emit it: a not node while *zero* right facts match the
//! tuple's key, an exists node while *at least one* does. The `emitting`
//! set in the node memory records which left tuples are currently
//! downstream, so transitions emit exactly one assert or retract.

use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::errors::Result;
use crate::fact::FactCell;
use crate::rete::memory::{unindex, LeftToken, QuantifierMemory, RightToken};
use crate::rete::network::{
    condition_failure, Delta, NodeId, QuantifierNode, ReteNetwork, RightOp,
};
use crate::rete::tuple::JoinKey;

/// Which polarity a quantifier node has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierKind {
    /// Emit while no right fact matches.
    Not,
    /// Emit while at least one right fact matches.
    Exists,
}

impl QuantifierKind {
    fn should_emit(self, matching_right: usize) -> bool {
        match self {
            QuantifierKind::Not => matching_right == 0,
            QuantifierKind::Exists => matching_right > 0,
        }
    }
}

fn matching_right(memory: &QuantifierMemory, key: &JoinKey) -> usize {
    memory.right_index.get(key).map(Vec::len).unwrap_or(0)
}

pub(crate) fn left(
    network: &ReteNetwork,
    id: NodeId,
    node: &QuantifierNode,
    delta: &Delta,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match delta {
        Delta::Assert(tuple) => {
            let key = (node.left_key)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            let emit = {
                let memory = ctx.wm.quantifier_mut(id);
                memory
                    .left
                    .insert(tuple.serial(), LeftToken { tuple: tuple.clone(), key: key.clone() });
                memory.left_index.entry(key.clone()).or_default().push(tuple.serial());
                let emit = node.kind.should_emit(matching_right(memory, &key));
                if emit {
                    memory.emitting.insert(tuple.serial(), tuple.clone());
                }
                emit
            };
            if emit {
                network.emit(&node.children, &Delta::Assert(tuple.clone()), ctx)?;
            }
            Ok(())
        }
        Delta::Update(tuple) => {
            let Some(old_key) =
                ctx.wm.quantifier_mut(id).left.get(&tuple.serial()).map(|t| t.key.clone())
            else {
                return Ok(());
            };
            let new_key = (node.left_key)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            let (was, should) = {
                let memory = ctx.wm.quantifier_mut(id);
                if new_key != old_key {
                    unindex(&mut memory.left_index, &old_key, &tuple.serial());
                    memory.left_index.entry(new_key.clone()).or_default().push(tuple.serial());
                    if let Some(token) = memory.left.get_mut(&tuple.serial()) {
                        token.key = new_key.clone();
                    }
                }
                let was = memory.emitting.contains_key(&tuple.serial());
                let should = node.kind.should_emit(matching_right(memory, &new_key));
                match (was, should) {
                    (true, false) => {
                        memory.emitting.shift_remove(&tuple.serial());
                    }
                    (false, true) => {
                        memory.emitting.insert(tuple.serial(), tuple.clone());
                    }
                    _ => {}
                }
                (was, should)
            };
            match (was, should) {
                (true, true) => network.emit(&node.children, &Delta::Update(tuple.clone()), ctx),
                (true, false) => network.emit(&node.children, &Delta::Retract(tuple.clone()), ctx),
                (false, true) => network.emit(&node.children, &Delta::Assert(tuple.clone()), ctx),
                (false, false) => Ok(()),
            }
        }
        Delta::Retract(tuple) => {
            let emitted = {
                let memory = ctx.wm.quantifier_mut(id);
                let Some(token) = memory.left.shift_remove(&tuple.serial()) else {
                    return Ok(());
                };
                unindex(&mut memory.left_index, &token.key, &tuple.serial());
                memory.emitting.shift_remove(&tuple.serial()).is_some()
            };
            if emitted {
                network.emit(&node.children, &Delta::Retract(tuple.clone()), ctx)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn right(
    network: &ReteNetwork,
    id: NodeId,
    node: &QuantifierNode,
    cell: &Rc<FactCell>,
    op: RightOp,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match op {
        RightOp::Assert => {
            let value = cell.value();
            let key = (node.right_key)(value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))?;
            add_right(network, id, node, cell, key, ctx)
        }
        RightOp::Update => {
            let Some(old_key) =
                ctx.wm.quantifier_mut(id).right.get(&cell.id()).map(|t| t.key.clone())
            else {
                return Ok(());
            };
            let value = cell.value();
            let new_key = (node.right_key)(value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))?;
            if new_key == old_key {
                // The partner count per key is unchanged; quantifiers
                // expose no fact contents downstream.
                return Ok(());
            }
            remove_right(network, id, node, cell, &old_key, ctx)?;
            add_right(network, id, node, cell, new_key, ctx)
        }
        RightOp::Retract => {
            let Some(key) =
                ctx.wm.quantifier_mut(id).right.get(&cell.id()).map(|t| t.key.clone())
            else {
                return Ok(());
            };
            remove_right(network, id, node, cell, &key, ctx)
        }
    }
}

fn add_right(
    network: &ReteNetwork,
    id: NodeId,
    node: &QuantifierNode,
    cell: &Rc<FactCell>,
    key: JoinKey,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let transitions: Vec<Delta> = {
        let memory = ctx.wm.quantifier_mut(id);
        let before = matching_right(memory, &key);
        memory.right.insert(cell.id(), RightToken { cell: cell.clone(), key: key.clone() });
        memory.right_index.entry(key.clone()).or_default().push(cell.id());
        if before > 0 {
            Vec::new()
        } else {
            flip_lefts(memory, node.kind, &key, 1)
        }
    };
    for delta in &transitions {
        network.emit(&node.children, delta, ctx)?;
    }
    Ok(())
}

fn remove_right(
    network: &ReteNetwork,
    id: NodeId,
    node: &QuantifierNode,
    cell: &Rc<FactCell>,
    key: &JoinKey,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let transitions: Vec<Delta> = {
        let memory = ctx.wm.quantifier_mut(id);
        if memory.right.shift_remove(&cell.id()).is_none() {
            return Ok(());
        }
        unindex(&mut memory.right_index, key, &cell.id());
        if matching_right(memory, key) > 0 {
            Vec::new()
        } else {
            flip_lefts(memory, node.kind, key, 0)
        }
    };
    for delta in &transitions {
        network.emit(&node.children, delta, ctx)?;
    }
    Ok(())
}

/// Compute the assert/retract transitions for the left tuples keyed by
/// `key` after the matching-partner count changed to `count`.
fn flip_lefts(
    memory: &mut QuantifierMemory,
    kind: QuantifierKind,
    key: &JoinKey,
    count: usize,
) -> Vec<Delta> {
    let serials = memory.left_index.get(key).cloned().unwrap_or_default();
    let should = kind.should_emit(count);
    let mut transitions = Vec::new();
    for serial in serials {
        let Some(token) = memory.left.get(&serial) else {
            continue;
        };
        let tuple = token.tuple.clone();
        let was = memory.emitting.contains_key(&serial);
        match (was, should) {
            (true, false) => {
                memory.emitting.shift_remove(&serial);
                transitions.push(Delta::Retract(tuple));
            }
            (false, true) => {
                memory.emitting.insert(serial, tuple.clone());
                transitions.push(Delta::Assert(tuple));
            }
            _ => {}
        }
    }
    transitions
}
