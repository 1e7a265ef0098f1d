//! Join, filter, and binding nodes
//!
//! The workhorses of the beta network. Join nodes pair left tuples with
//! right-channel facts on equal keys and emit a child tuple per pair;
//! filter nodes gate tuples on a full-tuple predicate; binding nodes
//! append a computed projection. Every handler stores the keys it
//! computed, so the retract paths below never call user closures.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::errors::Result;
use crate::fact::{FactCell, FactId};
use crate::rete::memory::{unindex, LeftToken, RightToken};
use crate::rete::network::{
    condition_failure, BindingNode, Delta, FilterNode, JoinNode, NodeId, ReteNetwork, RightOp,
};
use crate::rete::tuple::{Element, ElementKey, JoinKey, Tuple};

pub(crate) fn join_left(
    network: &ReteNetwork,
    id: NodeId,
    node: &JoinNode,
    delta: &Delta,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match delta {
        Delta::Assert(tuple) => {
            let key = (node.left_key)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            let partners: Vec<Rc<FactCell>> = {
                let memory = ctx.wm.join_mut(id);
                memory
                    .left
                    .insert(tuple.serial(), LeftToken { tuple: tuple.clone(), key: key.clone() });
                memory.left_index.entry(key.clone()).or_default().push(tuple.serial());
                partners_for(memory, &key)
            };
            for cell in partners {
                attach_child(network, id, node, tuple, &cell, ctx)?;
            }
            Ok(())
        }
        Delta::Update(tuple) => {
            let Some(old_key) = ctx.wm.join_mut(id).left.get(&tuple.serial()).map(|t| t.key.clone())
            else {
                return Ok(());
            };
            let new_key = (node.left_key)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            if new_key == old_key {
                let children = children_of_left(ctx, id, tuple.serial(), &old_key);
                for child in children {
                    network.emit(&node.children, &Delta::Update(child), ctx)?;
                }
                return Ok(());
            }
            let dropped = {
                let memory = ctx.wm.join_mut(id);
                let dropped = detach_left_children(memory, tuple.serial(), &old_key);
                unindex(&mut memory.left_index, &old_key, &tuple.serial());
                memory.left_index.entry(new_key.clone()).or_default().push(tuple.serial());
                if let Some(token) = memory.left.get_mut(&tuple.serial()) {
                    token.key = new_key.clone();
                }
                dropped
            };
            for child in dropped {
                network.emit(&node.children, &Delta::Retract(child), ctx)?;
            }
            let partners = partners_for(ctx.wm.join_mut(id), &new_key);
            for cell in partners {
                attach_child(network, id, node, tuple, &cell, ctx)?;
            }
            Ok(())
        }
        Delta::Retract(tuple) => {
            let dropped = {
                let memory = ctx.wm.join_mut(id);
                let Some(token) = memory.left.shift_remove(&tuple.serial()) else {
                    return Ok(());
                };
                unindex(&mut memory.left_index, &token.key, &tuple.serial());
                detach_left_children(memory, tuple.serial(), &token.key)
            };
            for child in dropped {
                network.emit(&node.children, &Delta::Retract(child), ctx)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn join_right(
    network: &ReteNetwork,
    id: NodeId,
    node: &JoinNode,
    cell: &Rc<FactCell>,
    op: RightOp,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match op {
        RightOp::Assert => {
            let value = cell.value();
            let key = (node.right_key)(value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))?;
            let lefts: Vec<Rc<Tuple>> = {
                let memory = ctx.wm.join_mut(id);
                memory
                    .right
                    .insert(cell.id(), RightToken { cell: cell.clone(), key: key.clone() });
                memory.right_index.entry(key.clone()).or_default().push(cell.id());
                lefts_for(memory, &key)
            };
            for left in lefts {
                attach_child(network, id, node, &left, cell, ctx)?;
            }
            Ok(())
        }
        RightOp::Update => {
            let Some(old_key) = ctx.wm.join_mut(id).right.get(&cell.id()).map(|t| t.key.clone())
            else {
                return Ok(());
            };
            let value = cell.value();
            let new_key = (node.right_key)(value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))?;
            if new_key == old_key {
                let children: Vec<Rc<Tuple>> = {
                    let memory = ctx.wm.join_mut(id);
                    let serials =
                        memory.left_index.get(&old_key).cloned().unwrap_or_default();
                    serials
                        .iter()
                        .filter_map(|serial| memory.children.get(&(*serial, cell.id())).cloned())
                        .collect()
                };
                for child in children {
                    network.emit(&node.children, &Delta::Update(child), ctx)?;
                }
                return Ok(());
            }
            let dropped = {
                let memory = ctx.wm.join_mut(id);
                let dropped = detach_right_children(memory, cell.id(), &old_key);
                unindex(&mut memory.right_index, &old_key, &cell.id());
                memory.right_index.entry(new_key.clone()).or_default().push(cell.id());
                if let Some(token) = memory.right.get_mut(&cell.id()) {
                    token.key = new_key.clone();
                }
                dropped
            };
            for child in dropped {
                network.emit(&node.children, &Delta::Retract(child), ctx)?;
            }
            let lefts = lefts_for(ctx.wm.join_mut(id), &new_key);
            for left in lefts {
                attach_child(network, id, node, &left, cell, ctx)?;
            }
            Ok(())
        }
        RightOp::Retract => {
            let dropped = {
                let memory = ctx.wm.join_mut(id);
                let Some(token) = memory.right.shift_remove(&cell.id()) else {
                    return Ok(());
                };
                unindex(&mut memory.right_index, &token.key, &cell.id());
                detach_right_children(memory, cell.id(), &token.key)
            };
            for child in dropped {
                network.emit(&node.children, &Delta::Retract(child), ctx)?;
            }
            Ok(())
        }
    }
}

/// Build, store, and emit the child tuple for one (left, right) pair.
fn attach_child(
    network: &ReteNetwork,
    id: NodeId,
    node: &JoinNode,
    left: &Rc<Tuple>,
    cell: &Rc<FactCell>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    let serial = ctx.wm.fresh_tuple_serial();
    let child =
        Tuple::extend(left, serial, ElementKey::Fact(cell.id()), Element::Fact(cell.clone()));
    ctx.wm.join_mut(id).children.insert((left.serial(), cell.id()), child.clone());
    network.emit(&node.children, &Delta::Assert(child), ctx)
}

fn partners_for(
    memory: &crate::rete::memory::JoinMemory,
    key: &JoinKey,
) -> Vec<Rc<FactCell>> {
    memory
        .right_index
        .get(key)
        .map(|ids| {
            ids.iter().filter_map(|fid| memory.right.get(fid).map(|t| t.cell.clone())).collect()
        })
        .unwrap_or_default()
}

fn lefts_for(memory: &crate::rete::memory::JoinMemory, key: &JoinKey) -> Vec<Rc<Tuple>> {
    memory
        .left_index
        .get(key)
        .map(|serials| {
            serials
                .iter()
                .filter_map(|serial| memory.left.get(serial).map(|t| t.tuple.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn children_of_left(
    ctx: &mut ExecutionContext<'_>,
    id: NodeId,
    serial: u64,
    key: &JoinKey,
) -> Vec<Rc<Tuple>> {
    let memory = ctx.wm.join_mut(id);
    let fact_ids = memory.right_index.get(key).cloned().unwrap_or_default();
    fact_ids
        .iter()
        .filter_map(|fid| memory.children.get(&(serial, *fid)).cloned())
        .collect()
}

fn detach_left_children(
    memory: &mut crate::rete::memory::JoinMemory,
    serial: u64,
    key: &JoinKey,
) -> Vec<Rc<Tuple>> {
    let fact_ids = memory.right_index.get(key).cloned().unwrap_or_default();
    fact_ids
        .iter()
        .filter_map(|fid| memory.children.shift_remove(&(serial, *fid)))
        .collect()
}

fn detach_right_children(
    memory: &mut crate::rete::memory::JoinMemory,
    fact: FactId,
    key: &JoinKey,
) -> Vec<Rc<Tuple>> {
    let serials = memory.left_index.get(key).cloned().unwrap_or_default();
    serials.iter().filter_map(|serial| memory.children.shift_remove(&(*serial, fact))).collect()
}

pub(crate) fn filter_left(
    network: &ReteNetwork,
    id: NodeId,
    node: &FilterNode,
    delta: &Delta,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match delta {
        Delta::Assert(tuple) => {
            let passed = (node.predicate)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            if passed {
                ctx.wm.filter_mut(id).admitted.insert(tuple.serial(), tuple.clone());
                network.emit(&node.children, delta, ctx)?;
            }
            Ok(())
        }
        Delta::Update(tuple) => {
            let was = ctx.wm.filter_mut(id).admitted.contains_key(&tuple.serial());
            let now = (node.predicate)(tuple)
                .map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            match (was, now) {
                (true, true) => network.emit(&node.children, delta, ctx),
                (true, false) => {
                    ctx.wm.filter_mut(id).admitted.shift_remove(&tuple.serial());
                    network.emit(&node.children, &Delta::Retract(tuple.clone()), ctx)
                }
                (false, true) => {
                    ctx.wm.filter_mut(id).admitted.insert(tuple.serial(), tuple.clone());
                    network.emit(&node.children, &Delta::Assert(tuple.clone()), ctx)
                }
                (false, false) => Ok(()),
            }
        }
        Delta::Retract(tuple) => {
            if ctx.wm.filter_mut(id).admitted.shift_remove(&tuple.serial()).is_some() {
                network.emit(&node.children, delta, ctx)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn binding_left(
    network: &ReteNetwork,
    id: NodeId,
    node: &BindingNode,
    delta: &Delta,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match delta {
        Delta::Assert(tuple) => {
            let value =
                (node.expr)(tuple).map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            let serial = ctx.wm.fresh_tuple_serial();
            let child = Tuple::extend(
                tuple,
                serial,
                ElementKey::Binding,
                Element::Value(RefCell::new(value)),
            );
            ctx.wm.binding_mut(id).children.insert(tuple.serial(), child.clone());
            network.emit(&node.children, &Delta::Assert(child), ctx)
        }
        Delta::Update(tuple) => {
            let Some(child) = ctx.wm.binding_mut(id).children.get(&tuple.serial()).cloned() else {
                return Ok(());
            };
            let value =
                (node.expr)(tuple).map_err(|e| condition_failure(&node.name, None, e, ctx))?;
            child.set_value(value);
            network.emit(&node.children, &Delta::Update(child), ctx)
        }
        Delta::Retract(tuple) => {
            let Some(child) = ctx.wm.binding_mut(id).children.shift_remove(&tuple.serial()) else {
                return Ok(());
            };
            network.emit(&node.children, &Delta::Retract(child), ctx)
        }
    }
}
