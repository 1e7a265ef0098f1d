//! Alpha network walk
//!
//! The alpha network is a rooted DAG per fact type: the type sub-root
//! dispatches on runtime type identity, selection nodes each test one
//! predicate over the fact, and every satisfied path ends in an alpha
//! memory. The walk here only *evaluates*; applying the reached
//! memberships (memory inserts, membership bookkeeping, beta
//! notification) is driven by the network so that assert and update share
//! one evaluation path.

use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::errors::Result;
use crate::fact::FactCell;
use crate::rete::network::{condition_failure, NodeId, ReteNetwork, ReteNode};

/// Evaluate the alpha network for a fact and collect the alpha memories
/// it belongs in, in walk order. A failing predicate publishes
/// `condition_failed` and surfaces the wrapped error.
pub(crate) fn collect_memberships(
    network: &ReteNetwork,
    cell: &Rc<FactCell>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<Vec<NodeId>> {
    let value = cell.value();
    let type_id = value.as_any().type_id();
    let mut reached = Vec::new();
    for root in network.type_roots(type_id) {
        walk(network, *root, cell, &mut reached, ctx)?;
    }
    Ok(reached)
}

fn walk(
    network: &ReteNetwork,
    id: NodeId,
    cell: &Rc<FactCell>,
    reached: &mut Vec<NodeId>,
    ctx: &mut ExecutionContext<'_>,
) -> Result<()> {
    match network.node(id) {
        ReteNode::Type(node) => {
            for child in &node.children {
                walk(network, *child, cell, reached, ctx)?;
            }
            Ok(())
        }
        ReteNode::Select(node) => {
            let value = cell.value();
            let passed = (node.predicate)(value.as_ref())
                .map_err(|e| condition_failure(&node.name, Some(value.clone()), e, ctx))?;
            if passed {
                for child in &node.children {
                    walk(network, *child, cell, reached, ctx)?;
                }
            }
            Ok(())
        }
        ReteNode::AlphaMemory(_) => {
            if !reached.contains(&id) {
                reached.push(id);
            }
            Ok(())
        }
        other => unreachable!("{} node cannot appear in an alpha chain", other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{fact_id_of, Fact};
    use crate::events::EventAggregator;
    use crate::context::Operation;
    use crate::errors::EngineError;
    use crate::rete::agenda::Agenda;
    use crate::rete::network::NetworkBuilder;
    use crate::rete::working_memory::WorkingMemory;

    #[derive(Debug)]
    struct Sensor {
        level: i64,
    }
    impl Fact for Sensor {}

    #[derive(Debug)]
    struct Other;
    impl Fact for Other {}

    fn cell_for(fact: Rc<dyn Fact>, wm: &mut WorkingMemory) -> Rc<FactCell> {
        wm.register(fact_id_of(&fact), fact)
    }

    #[test]
    fn walk_reaches_only_satisfied_paths() {
        let mut builder = NetworkBuilder::new();
        let root = builder.fact_type::<Sensor>();
        let high = builder.select(root, "level-high", |s: &Sensor| Ok(s.level > 10));
        let am_high = builder.alpha_memory(high);
        let low = builder.select(root, "level-low", |s: &Sensor| Ok(s.level <= 10));
        let am_low = builder.alpha_memory(low);
        let network = builder.build();

        let mut wm = WorkingMemory::new();
        let mut agenda = Agenda::new();
        let events = EventAggregator::new();
        let mut ctx = ExecutionContext::new(Operation::Insert, &mut wm, &mut agenda, &events);

        let fact: Rc<dyn Fact> = Rc::new(Sensor { level: 50 });
        let cell = cell_for(fact, ctx.wm);
        let reached = collect_memberships(&network, &cell, &mut ctx).unwrap();
        assert_eq!(reached, vec![am_high]);
        assert!(!reached.contains(&am_low));
    }

    #[test]
    fn unknown_types_reach_nothing() {
        let mut builder = NetworkBuilder::new();
        let root = builder.fact_type::<Sensor>();
        let select = builder.select(root, "any", |_: &Sensor| Ok(true));
        builder.alpha_memory(select);
        let network = builder.build();

        let mut wm = WorkingMemory::new();
        let mut agenda = Agenda::new();
        let events = EventAggregator::new();
        let mut ctx = ExecutionContext::new(Operation::Insert, &mut wm, &mut agenda, &events);

        let fact: Rc<dyn Fact> = Rc::new(Other);
        let cell = cell_for(fact, ctx.wm);
        let reached = collect_memberships(&network, &cell, &mut ctx).unwrap();
        assert!(reached.is_empty());
    }

    #[test]
    fn failing_predicates_surface_as_condition_errors() {
        let mut builder = NetworkBuilder::new();
        let root = builder.fact_type::<Sensor>();
        let bad = builder.select(root, "broken", |_: &Sensor| {
            Err(EngineError::evaluation("no such field"))
        });
        builder.alpha_memory(bad);
        let network = builder.build();

        let mut wm = WorkingMemory::new();
        let mut agenda = Agenda::new();
        let events = EventAggregator::new();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe(move |event| sink.borrow_mut().push(event.kind()));

        let mut ctx = ExecutionContext::new(Operation::Insert, &mut wm, &mut agenda, &events);
        let fact: Rc<dyn Fact> = Rc::new(Sensor { level: 1 });
        let cell = cell_for(fact, ctx.wm);

        let err = collect_memberships(&network, &cell, &mut ctx).unwrap_err();
        assert!(matches!(err, EngineError::ConditionEvaluation { .. }));
        assert_eq!(*seen.borrow(), vec!["condition_failed"]);
    }
}
