//! End-to-end match scenarios driven through the session façade.

use std::cell::Cell;
use std::rc::Rc;

use rete_session::{
    collected, BetaSource, CollectAggregator, Fact, JoinKey, NetworkBuilder, RuleDefinition,
    Session, SessionEvent,
};

#[derive(Debug)]
struct FactA {
    x: Cell<i64>,
    key: i64,
}
impl Fact for FactA {}

impl FactA {
    fn new(x: i64) -> Rc<Self> {
        Rc::new(Self { x: Cell::new(x), key: 0 })
    }

    fn keyed(key: i64) -> Rc<Self> {
        Rc::new(Self { x: Cell::new(0), key })
    }
}

#[derive(Debug)]
struct FactB {
    key: i64,
}
impl Fact for FactB {}

#[derive(Debug)]
struct Reading {
    value: i64,
}
impl Fact for Reading {}

/// Rule: "when FactA.x > 0, fire"; counts firings through a Cell.
fn positive_x_session() -> (Session, Rc<Cell<usize>>) {
    let fired = Rc::new(Cell::new(0usize));
    let counter = fired.clone();

    let mut builder = NetworkBuilder::new();
    let rule = builder.add_rule(RuleDefinition::new("positive-x").action(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    }));
    let root = builder.fact_type::<FactA>();
    let select = builder.select(root, "x>0", |a: &FactA| Ok(a.x.get() > 0));
    let memory = builder.alpha_memory(select);
    let join = builder.join(
        BetaSource::Root,
        memory,
        "a",
        |_| Ok(JoinKey::Unit),
        |_: &FactA| Ok(JoinKey::Unit),
    );
    builder.terminal(BetaSource::Node(join), rule, &["a"]);

    (Session::new(builder.build()).unwrap(), fired)
}

#[test]
fn simple_match_fires_once_per_matching_fact() {
    let (mut session, fired) = positive_x_session();

    session.insert(FactA::new(5)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(fired.get(), 1);

    session.insert(FactA::new(-1)).unwrap();
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(fired.get(), 1);
}

#[test]
fn join_matches_facts_on_equal_keys() {
    let pairs: Rc<std::cell::RefCell<Vec<(i64, i64)>>> = Rc::default();
    let seen = pairs.clone();

    let mut builder = NetworkBuilder::new();
    let rule = builder.add_rule(RuleDefinition::new("a-joins-b").action(move |ctx| {
        let a = ctx.activation().get::<FactA>("a")?;
        let b = ctx.activation().get::<FactB>("b")?;
        seen.borrow_mut().push((a.key, b.key));
        Ok(())
    }));
    let a_root = builder.fact_type::<FactA>();
    let a_mem = builder.alpha_memory(a_root);
    let b_root = builder.fact_type::<FactB>();
    let b_mem = builder.alpha_memory(b_root);
    let j_a = builder.join(
        BetaSource::Root,
        a_mem,
        "a",
        |_| Ok(JoinKey::Unit),
        |_: &FactA| Ok(JoinKey::Unit),
    );
    let j_b = builder.join(
        BetaSource::Node(j_a),
        b_mem,
        "a.key == b.key",
        |t| Ok(JoinKey::Int(t.downcast_at::<FactA>(0)?.key)),
        |b: &FactB| Ok(JoinKey::Int(b.key)),
    );
    builder.terminal(BetaSource::Node(j_b), rule, &["a", "b"]);

    let mut session = Session::new(builder.build()).unwrap();
    session.insert(FactA::keyed(1)).unwrap();
    session.insert(Rc::new(FactB { key: 1 })).unwrap();
    session.insert(Rc::new(FactB { key: 2 })).unwrap();

    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*pairs.borrow(), vec![(1, 1)]);

    session.insert(Rc::new(FactB { key: 1 })).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*pairs.borrow(), vec![(1, 1), (1, 1)]);
}

#[test]
fn collection_aggregate_needs_min_cardinality() {
    let sizes: Rc<std::cell::RefCell<Vec<usize>>> = Rc::default();
    let seen = sizes.clone();

    let mut builder = NetworkBuilder::new();
    let rule = builder.add_rule(RuleDefinition::new("three-readings").action(move |ctx| {
        let readings = collected::<Reading>(ctx.activation().tuple(), 0)?;
        seen.borrow_mut().push(readings.len());
        Ok(())
    }));
    let root = builder.fact_type::<Reading>();
    let memory = builder.alpha_memory(root);
    let agg = builder.aggregate(BetaSource::Root, memory, "collect-readings", || {
        Box::new(CollectAggregator::with_min_count(3))
    });
    builder.terminal(BetaSource::Node(agg), rule, &["readings"]);

    let mut session = Session::new(builder.build()).unwrap();
    let deletions = Rc::new(Cell::new(0usize));
    let seen_deletions = deletions.clone();
    session.events().subscribe(move |event| {
        if matches!(event, SessionEvent::ActivationDeleted { .. }) {
            seen_deletions.set(seen_deletions.get() + 1);
        }
    });

    let first = Rc::new(Reading { value: 1 });
    session.insert(first.clone()).unwrap();
    session.insert(Rc::new(Reading { value: 2 })).unwrap();
    assert_eq!(session.fire().unwrap(), 0);

    session.insert(Rc::new(Reading { value: 3 })).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*sizes.borrow(), vec![3]);

    session.retract(first).unwrap();
    assert_eq!(deletions.get(), 1);
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(*sizes.borrow(), vec![3]);
}

#[test]
fn not_quantifier_toggles_with_blocking_facts() {
    let fired = Rc::new(Cell::new(0usize));
    let counter = fired.clone();

    let mut builder = NetworkBuilder::new();
    let rule = builder.add_rule(RuleDefinition::new("a-without-b").action(move |_| {
        counter.set(counter.get() + 1);
        Ok(())
    }));
    let a_root = builder.fact_type::<FactA>();
    let a_mem = builder.alpha_memory(a_root);
    let b_root = builder.fact_type::<FactB>();
    let b_mem = builder.alpha_memory(b_root);
    let j_a = builder.join(
        BetaSource::Root,
        a_mem,
        "a",
        |_| Ok(JoinKey::Unit),
        |_: &FactA| Ok(JoinKey::Unit),
    );
    let no_b = builder.not(
        BetaSource::Node(j_a),
        b_mem,
        "no-b",
        |_| Ok(JoinKey::Unit),
        |_: &FactB| Ok(JoinKey::Unit),
    );
    builder.terminal(BetaSource::Node(no_b), rule, &["a"]);

    let mut session = Session::new(builder.build()).unwrap();
    let deletions = Rc::new(Cell::new(0usize));
    let seen_deletions = deletions.clone();
    session.events().subscribe(move |event| {
        if matches!(event, SessionEvent::ActivationDeleted { .. }) {
            seen_deletions.set(seen_deletions.get() + 1);
        }
    });

    session.insert(FactA::new(1)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(fired.get(), 1);

    let b = Rc::new(FactB { key: 9 });
    session.insert(b.clone()).unwrap();
    assert_eq!(deletions.get(), 1);
    assert_eq!(session.fire().unwrap(), 0);

    session.retract(b).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(fired.get(), 2);
}

#[test]
fn update_preserves_activation_identity() {
    let (mut session, fired) = positive_x_session();

    let events: Rc<std::cell::RefCell<Vec<&'static str>>> = Rc::default();
    let sink = events.clone();
    session.events().subscribe(move |event| {
        if matches!(
            event,
            SessionEvent::ActivationCreated { .. }
                | SessionEvent::ActivationUpdated { .. }
                | SessionEvent::ActivationDeleted { .. }
        ) {
            sink.borrow_mut().push(event.kind());
        }
    });

    let a = FactA::new(5);
    session.insert(a.clone()).unwrap();
    assert_eq!(session.fire().unwrap(), 1);

    a.x.set(7);
    session.update(a).unwrap();

    assert_eq!(*events.borrow(), vec!["activation_created", "activation_updated"]);
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(fired.get(), 1);
}

#[test]
fn halt_leaves_the_rest_of_the_agenda_queued() {
    let order: Rc<std::cell::RefCell<Vec<&'static str>>> = Rc::default();

    let mut builder = NetworkBuilder::new();
    let seen = order.clone();
    let first = builder.add_rule(RuleDefinition::new("first").priority(10).action(move |ctx| {
        seen.borrow_mut().push("first");
        ctx.halt();
        Ok(())
    }));
    let seen = order.clone();
    let second = builder.add_rule(RuleDefinition::new("second").priority(5).action(move |_| {
        seen.borrow_mut().push("second");
        Ok(())
    }));

    let root = builder.fact_type::<FactA>();
    let memory = builder.alpha_memory(root);
    let j1 = builder.join(
        BetaSource::Root,
        memory,
        "a",
        |_| Ok(JoinKey::Unit),
        |_: &FactA| Ok(JoinKey::Unit),
    );
    builder.terminal(BetaSource::Node(j1), first, &["a"]);
    let j2 = builder.join(
        BetaSource::Root,
        memory,
        "a",
        |_| Ok(JoinKey::Unit),
        |_: &FactA| Ok(JoinKey::Unit),
    );
    builder.terminal(BetaSource::Node(j2), second, &["a"]);

    let mut session = Session::new(builder.build()).unwrap();
    session.insert(FactA::new(1)).unwrap();

    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*order.borrow(), vec!["first"]);
    assert_eq!(session.agenda_len(), 1);

    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}
