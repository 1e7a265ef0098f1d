//! The Rete discrimination network
//!
//! Nodes live in an arena indexed by [`NodeId`]; parent/child links are
//! indices, so the cyclic structure carries no ownership. Nodes hold the
//! static topology and the compiled closures; all mutable state sits in
//! working memory, one memory per stateful node. The network itself is
//! immutable once built, which keeps propagation re-entrant: an action
//! firing mid-`fire()` can insert facts through the very same network.
//!
//! [`NetworkBuilder`] is the form an external rule compiler targets. It is
//! purely structural: type-discriminated alpha chains ending in shared
//! alpha memories, beta nodes joining them into tuples, and one terminal
//! per rule.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::errors::{EngineError, Result};
use crate::events::SessionEvent;
use crate::fact::{Fact, FactCell, FactId};
use crate::rete::agenda::Activation;
use crate::rete::aggregate::{self, Aggregator};
use crate::rete::alpha;
use crate::rete::beta;
use crate::rete::memory::{
    AggregateMemory, AlphaMemory, BindingMemory, FilterMemory, JoinMemory, NodeMemory,
    QuantifierMemory, TerminalMemory,
};
use crate::rete::quantifier::{self, QuantifierKind};
use crate::rete::tuple::{JoinKey, Tuple};
use crate::rule::RuleDefinition;

/// Index of a node in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The left input of a beta node: the shared root tuple or an upstream
/// beta node.
#[derive(Debug, Clone, Copy)]
pub enum BetaSource {
    /// Start a new path from the empty root tuple.
    Root,
    /// Extend the tuples emitted by an upstream beta node.
    Node(NodeId),
}

/// Single-fact predicate of a selection node.
pub type AlphaPredicate = Box<dyn Fn(&dyn Fact) -> Result<bool>>;
/// Join key extractor over the right-channel fact.
pub type FactKeyFn = Box<dyn Fn(&dyn Fact) -> Result<JoinKey>>;
/// Join key extractor over the left tuple.
pub type TupleKeyFn = Box<dyn Fn(&Tuple) -> Result<JoinKey>>;
/// Predicate over a full tuple.
pub type TuplePredicate = Box<dyn Fn(&Tuple) -> Result<bool>>;
/// Projection computed by a binding node.
pub type BindingExpr = Box<dyn Fn(&Tuple) -> Result<Rc<dyn Any>>>;
/// Group key derived from the left tuple and a right-channel fact.
pub type GroupKeyFn = Box<dyn Fn(&Tuple, &dyn Fact) -> Result<JoinKey>>;
/// Factory producing fresh aggregate state for one group.
pub type AggregatorFactory = Box<dyn Fn() -> Box<dyn Aggregator>>;

/// How an aggregate node assigns right facts to groups.
pub enum Grouping {
    /// One group per left tuple.
    Unit,
    /// Grouped by a key closure.
    ByKey(GroupKeyFn),
}

pub(crate) struct TypeNode {
    pub type_name: &'static str,
    pub children: Vec<NodeId>,
}

pub(crate) struct SelectNode {
    pub name: String,
    pub predicate: AlphaPredicate,
    pub children: Vec<NodeId>,
}

pub(crate) struct AlphaMemoryNode {
    pub successors: Vec<NodeId>,
}

pub(crate) struct AdapterNode {
    pub target: NodeId,
}

pub(crate) struct JoinNode {
    pub name: String,
    pub left_key: TupleKeyFn,
    pub right_key: FactKeyFn,
    pub children: Vec<NodeId>,
}

pub(crate) struct FilterNode {
    pub name: String,
    pub predicate: TuplePredicate,
    pub children: Vec<NodeId>,
}

pub(crate) struct BindingNode {
    pub name: String,
    pub expr: BindingExpr,
    pub children: Vec<NodeId>,
}

pub(crate) struct QuantifierNode {
    pub name: String,
    pub kind: QuantifierKind,
    pub left_key: TupleKeyFn,
    pub right_key: FactKeyFn,
    pub children: Vec<NodeId>,
}

pub(crate) struct AggregateNode {
    pub name: String,
    pub grouping: Grouping,
    pub factory: AggregatorFactory,
    pub children: Vec<NodeId>,
}

pub(crate) struct TerminalNode {
    pub rule: usize,
    pub declarations: Rc<Vec<String>>,
}

pub(crate) enum ReteNode {
    Type(TypeNode),
    Select(SelectNode),
    AlphaMemory(AlphaMemoryNode),
    Adapter(AdapterNode),
    Join(JoinNode),
    Filter(FilterNode),
    Binding(BindingNode),
    Quantifier(QuantifierNode),
    Aggregate(AggregateNode),
    Terminal(TerminalNode),
}

impl ReteNode {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ReteNode::Type(_) => "type",
            ReteNode::Select(_) => "select",
            ReteNode::AlphaMemory(_) => "alpha-memory",
            ReteNode::Adapter(_) => "adapter",
            ReteNode::Join(_) => "join",
            ReteNode::Filter(_) => "filter",
            ReteNode::Binding(_) => "binding",
            ReteNode::Quantifier(q) => match q.kind {
                QuantifierKind::Not => "not",
                QuantifierKind::Exists => "exists",
            },
            ReteNode::Aggregate(_) => "aggregate",
            ReteNode::Terminal(_) => "terminal",
        }
    }

    pub(crate) fn label(&self) -> String {
        match self {
            ReteNode::Type(t) => t.type_name.to_string(),
            ReteNode::Select(s) => s.name.clone(),
            ReteNode::Join(j) => j.name.clone(),
            ReteNode::Filter(f) => f.name.clone(),
            ReteNode::Binding(b) => b.name.clone(),
            ReteNode::Quantifier(q) => q.name.clone(),
            ReteNode::Aggregate(a) => a.name.clone(),
            _ => String::new(),
        }
    }

    fn children_mut(&mut self) -> &mut Vec<NodeId> {
        match self {
            ReteNode::Type(t) => &mut t.children,
            ReteNode::Select(s) => &mut s.children,
            ReteNode::Join(j) => &mut j.children,
            ReteNode::Filter(f) => &mut f.children,
            ReteNode::Binding(b) => &mut b.children,
            ReteNode::Quantifier(q) => &mut q.children,
            ReteNode::Aggregate(a) => &mut a.children,
            ReteNode::AlphaMemory(_) | ReteNode::Adapter(_) | ReteNode::Terminal(_) => {
                panic!("node kind cannot be a parent")
            }
        }
    }
}

/// A tuple change flowing down the beta network.
#[derive(Clone)]
pub(crate) enum Delta {
    Assert(Rc<Tuple>),
    Update(Rc<Tuple>),
    Retract(Rc<Tuple>),
}

/// A fact change arriving on a right channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RightOp {
    Assert,
    Update,
    Retract,
}

/// The compiled discrimination network a session runs against.
pub struct ReteNetwork {
    nodes: Vec<ReteNode>,
    type_roots: HashMap<TypeId, Vec<NodeId>>,
    root_successors: Vec<NodeId>,
    rules: Vec<RuleDefinition>,
}

impl ReteNetwork {
    pub(crate) fn node(&self, id: NodeId) -> &ReteNode {
        &self.nodes[id.0]
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The compiled rules the network terminates into.
    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub(crate) fn rule(&self, index: usize) -> &RuleDefinition {
        &self.rules[index]
    }

    pub(crate) fn type_roots(&self, type_id: TypeId) -> &[NodeId] {
        self.type_roots.get(&type_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &ReteNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Install the per-node memories and seed the root tuple into every
    /// beta path that starts from it.
    pub(crate) fn bootstrap(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for (id, node) in self.iter_nodes() {
            let memory = match node {
                ReteNode::AlphaMemory(_) => NodeMemory::Alpha(AlphaMemory::default()),
                ReteNode::Join(_) => NodeMemory::Join(JoinMemory::default()),
                ReteNode::Filter(_) => NodeMemory::Filter(FilterMemory::default()),
                ReteNode::Binding(_) => NodeMemory::Binding(BindingMemory::default()),
                ReteNode::Quantifier(_) => NodeMemory::Quantifier(QuantifierMemory::default()),
                ReteNode::Aggregate(_) => NodeMemory::Aggregate(AggregateMemory::default()),
                ReteNode::Terminal(_) => NodeMemory::Terminal(TerminalMemory::default()),
                ReteNode::Type(_) | ReteNode::Select(_) | ReteNode::Adapter(_) => continue,
            };
            ctx.wm.install_memory(id, memory);
        }
        let root = ctx.wm.root_tuple().clone();
        for id in &self.root_successors {
            self.propagate(*id, &Delta::Assert(root.clone()), ctx)?;
        }
        Ok(())
    }

    /// Propagate a freshly registered fact through the alpha network and
    /// onward into the beta network.
    pub(crate) fn assert_fact(
        &self,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let reached = alpha::collect_memberships(self, cell, ctx)?;
        for memory in reached {
            self.alpha_add(memory, cell, ctx)?;
        }
        Ok(())
    }

    /// Re-propagate a fact after a host-side mutation. Memberships whose
    /// predicates still hold keep their tuples and receive updates;
    /// flipped memberships retract and assert.
    pub(crate) fn update_fact(
        &self,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let old = ctx.wm.memberships(cell.id());
        let new = alpha::collect_memberships(self, cell, ctx)?;

        let removed: Vec<NodeId> = old.iter().copied().filter(|m| !new.contains(m)).collect();
        let unchanged: Vec<NodeId> = old.iter().copied().filter(|m| new.contains(m)).collect();
        let added: Vec<NodeId> = new.iter().copied().filter(|m| !old.contains(m)).collect();

        for memory in removed {
            self.alpha_remove(memory, cell, ctx)?;
        }
        for memory in unchanged {
            self.alpha_touch(memory, cell, ctx)?;
        }
        for memory in added {
            self.alpha_add(memory, cell, ctx)?;
        }
        Ok(())
    }

    /// Remove a fact from every alpha memory it occupies, unwinding all
    /// dependent tuples. Driven by the stored membership list; no user
    /// closure runs on this path.
    pub(crate) fn retract_fact(
        &self,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        for memory in ctx.wm.memberships(cell.id()) {
            self.alpha_remove(memory, cell, ctx)?;
        }
        Ok(())
    }

    /// Mechanical rollback of a fact whose propagation failed: retract
    /// whatever it reached and drop it from the registry.
    pub(crate) fn expel(&self, id: FactId, ctx: &mut ExecutionContext<'_>) {
        let Some(cell) = ctx.wm.cell(id) else {
            return;
        };
        if let Err(err) = self.retract_fact(&cell, ctx) {
            log::warn!("rollback of fact {id} hit an error: {err}");
        }
        ctx.wm.unregister(id);
    }

    fn alpha_add(
        &self,
        memory: NodeId,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        ctx.wm.alpha_mut(memory).facts.insert(cell.id(), cell.clone());
        ctx.wm.add_membership(cell.id(), memory);
        self.alpha_notify(memory, cell, RightOp::Assert, ctx)
    }

    fn alpha_remove(
        &self,
        memory: NodeId,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        ctx.wm.alpha_mut(memory).facts.shift_remove(&cell.id());
        ctx.wm.remove_membership(cell.id(), memory);
        self.alpha_notify(memory, cell, RightOp::Retract, ctx)
    }

    fn alpha_touch(
        &self,
        memory: NodeId,
        cell: &Rc<FactCell>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        self.alpha_notify(memory, cell, RightOp::Update, ctx)
    }

    fn alpha_notify(
        &self,
        memory: NodeId,
        cell: &Rc<FactCell>,
        op: RightOp,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let ReteNode::AlphaMemory(node) = self.node(memory) else {
            unreachable!("alpha membership points at a non-memory node");
        };
        for successor in &node.successors {
            self.right_delta(*successor, cell, op, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn right_delta(
        &self,
        id: NodeId,
        cell: &Rc<FactCell>,
        op: RightOp,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        match self.node(id) {
            ReteNode::Adapter(adapter) => self.right_delta(adapter.target, cell, op, ctx),
            ReteNode::Join(node) => beta::join_right(self, id, node, cell, op, ctx),
            ReteNode::Quantifier(node) => quantifier::right(self, id, node, cell, op, ctx),
            ReteNode::Aggregate(node) => aggregate::right(self, id, node, cell, op, ctx),
            other => unreachable!("{} node cannot sit on a right channel", other.kind()),
        }
    }

    pub(crate) fn propagate(
        &self,
        id: NodeId,
        delta: &Delta,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        match self.node(id) {
            ReteNode::Join(node) => beta::join_left(self, id, node, delta, ctx),
            ReteNode::Filter(node) => beta::filter_left(self, id, node, delta, ctx),
            ReteNode::Binding(node) => beta::binding_left(self, id, node, delta, ctx),
            ReteNode::Quantifier(node) => quantifier::left(self, id, node, delta, ctx),
            ReteNode::Aggregate(node) => aggregate::left(self, id, node, delta, ctx),
            ReteNode::Terminal(node) => self.terminal_left(id, node, delta, ctx),
            other => unreachable!("{} node cannot receive tuples", other.kind()),
        }
    }

    pub(crate) fn emit(
        &self,
        children: &[NodeId],
        delta: &Delta,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        for child in children {
            self.propagate(*child, delta, ctx)?;
        }
        Ok(())
    }

    fn terminal_left(
        &self,
        id: NodeId,
        node: &TerminalNode,
        delta: &Delta,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        let rule = self.rule(node.rule);
        match delta {
            Delta::Assert(tuple) => {
                ctx.wm.terminal_mut(id).matches.insert(tuple.serial(), tuple.clone());
                let activation = Activation::new(
                    node.rule,
                    rule.name_rc(),
                    rule.priority_value(),
                    rule.group_rc(),
                    node.declarations.clone(),
                    tuple.clone(),
                );
                if ctx.agenda.add(activation) {
                    ctx.events.publish(&SessionEvent::ActivationCreated {
                        rule: rule.name().to_string(),
                        facts: tuple.facts(),
                    });
                }
            }
            Delta::Update(tuple) => {
                if ctx.wm.terminal_mut(id).matches.contains_key(&tuple.serial()) {
                    ctx.agenda.modify(node.rule, tuple.serial());
                    ctx.events.publish(&SessionEvent::ActivationUpdated {
                        rule: rule.name().to_string(),
                        facts: tuple.facts(),
                    });
                }
            }
            Delta::Retract(tuple) => {
                if ctx.wm.terminal_mut(id).matches.shift_remove(&tuple.serial()).is_some() {
                    ctx.agenda.remove(node.rule, tuple.serial());
                    ctx.events.publish(&SessionEvent::ActivationDeleted {
                        rule: rule.name().to_string(),
                        facts: tuple.facts(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReteNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReteNetwork")
            .field("nodes", &self.nodes.len())
            .field("types", &self.type_roots.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Wrap a condition failure: publish the event, return the surfaced error.
pub(crate) fn condition_failure(
    condition: &str,
    fact: Option<Rc<dyn Fact>>,
    source: EngineError,
    ctx: &ExecutionContext<'_>,
) -> EngineError {
    let wrapped = EngineError::ConditionEvaluation {
        condition: condition.to_string(),
        operation: ctx.operation.to_string(),
        message: source.to_string(),
    };
    ctx.events.publish(&SessionEvent::ConditionFailed {
        condition: condition.to_string(),
        fact,
        error: wrapped.to_string(),
    });
    wrapped
}

/// Handle to a rule registered on a [`NetworkBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct RuleHandle(pub(crate) usize);

/// Programmatic construction of a [`ReteNetwork`].
///
/// This is the target an external rule compiler lowers into; it wires
/// structure and closures only, no rule language lives here. Structural
/// misuse (attaching children to a terminal, unknown parents) is a
/// compiler bug and panics.
#[derive(Default)]
pub struct NetworkBuilder {
    nodes: Vec<ReteNode>,
    type_roots: HashMap<TypeId, Vec<NodeId>>,
    root_successors: Vec<NodeId>,
    rules: Vec<RuleDefinition>,
}

impl NetworkBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled rule; terminals reference the handle.
    pub fn add_rule(&mut self, rule: RuleDefinition) -> RuleHandle {
        self.rules.push(rule);
        RuleHandle(self.rules.len() - 1)
    }

    /// The sub-root for facts of concrete type `T`, created on first use.
    ///
    /// The map from runtime type to sub-roots is the per-type dispatch
    /// cache consulted once per insert.
    pub fn fact_type<T: Fact>(&mut self) -> NodeId {
        let type_id = TypeId::of::<T>();
        if let Some(roots) = self.type_roots.get(&type_id) {
            if let Some(existing) = roots.first() {
                return *existing;
            }
        }
        let id = self.push(ReteNode::Type(TypeNode {
            type_name: std::any::type_name::<T>(),
            children: Vec::new(),
        }));
        self.type_roots.entry(type_id).or_default().push(id);
        id
    }

    /// Append a selection node holding one predicate over a single fact.
    pub fn select<T: Fact>(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        predicate: impl Fn(&T) -> Result<bool> + 'static,
    ) -> NodeId {
        let id = self.push(ReteNode::Select(SelectNode {
            name: name.into(),
            predicate: wrap_fact_fn(predicate),
            children: Vec::new(),
        }));
        self.nodes[parent.0].children_mut().push(id);
        id
    }

    /// The alpha memory at the end of an alpha chain, shared across every
    /// rule that filters on the same predicate prefix.
    pub fn alpha_memory(&mut self, parent: NodeId) -> NodeId {
        let existing = match &self.nodes[parent.0] {
            ReteNode::Type(t) => t.children.iter(),
            ReteNode::Select(s) => s.children.iter(),
            _ => panic!("alpha memory parent must be a type or selection node"),
        }
        .copied()
        .find(|c| matches!(self.nodes[c.0], ReteNode::AlphaMemory(_)));
        if let Some(id) = existing {
            return id;
        }
        let id = self.push(ReteNode::AlphaMemory(AlphaMemoryNode { successors: Vec::new() }));
        self.nodes[parent.0].children_mut().push(id);
        id
    }

    /// Join the left source with an alpha memory on matching keys.
    pub fn join<T: Fact>(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        left_key: impl Fn(&Tuple) -> Result<JoinKey> + 'static,
        right_key: impl Fn(&T) -> Result<JoinKey> + 'static,
    ) -> NodeId {
        let id = self.push(ReteNode::Join(JoinNode {
            name: name.into(),
            left_key: Box::new(left_key),
            right_key: wrap_fact_fn(right_key),
            children: Vec::new(),
        }));
        self.attach_left(left, id);
        self.attach_right(alpha, id);
        id
    }

    /// Filter tuples by a predicate over the full tuple.
    pub fn filter(
        &mut self,
        left: BetaSource,
        name: impl Into<String>,
        predicate: impl Fn(&Tuple) -> Result<bool> + 'static,
    ) -> NodeId {
        let id = self.push(ReteNode::Filter(FilterNode {
            name: name.into(),
            predicate: Box::new(predicate),
            children: Vec::new(),
        }));
        self.attach_left(left, id);
        id
    }

    /// Project a computed value into the tuple for downstream use.
    pub fn binding(
        &mut self,
        left: BetaSource,
        name: impl Into<String>,
        expr: impl Fn(&Tuple) -> Result<Rc<dyn Any>> + 'static,
    ) -> NodeId {
        let id = self.push(ReteNode::Binding(BindingNode {
            name: name.into(),
            expr: Box::new(expr),
            children: Vec::new(),
        }));
        self.attach_left(left, id);
        id
    }

    /// Emit the left tuple exactly while zero right facts match it.
    pub fn not<T: Fact>(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        left_key: impl Fn(&Tuple) -> Result<JoinKey> + 'static,
        right_key: impl Fn(&T) -> Result<JoinKey> + 'static,
    ) -> NodeId {
        self.quantifier(left, alpha, name, QuantifierKind::Not, left_key, right_key)
    }

    /// Emit the left tuple exactly while at least one right fact matches.
    pub fn exists<T: Fact>(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        left_key: impl Fn(&Tuple) -> Result<JoinKey> + 'static,
        right_key: impl Fn(&T) -> Result<JoinKey> + 'static,
    ) -> NodeId {
        self.quantifier(left, alpha, name, QuantifierKind::Exists, left_key, right_key)
    }

    fn quantifier<T: Fact>(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        kind: QuantifierKind,
        left_key: impl Fn(&Tuple) -> Result<JoinKey> + 'static,
        right_key: impl Fn(&T) -> Result<JoinKey> + 'static,
    ) -> NodeId {
        let id = self.push(ReteNode::Quantifier(QuantifierNode {
            name: name.into(),
            kind,
            left_key: Box::new(left_key),
            right_key: wrap_fact_fn(right_key),
            children: Vec::new(),
        }));
        self.attach_left(left, id);
        self.attach_right(alpha, id);
        id
    }

    /// Reduce the matching right facts to one synthetic element per left
    /// tuple.
    pub fn aggregate(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Aggregator> + 'static,
    ) -> NodeId {
        self.aggregate_node(left, alpha, name, Grouping::Unit, Box::new(factory))
    }

    /// Reduce the matching right facts into one synthetic element per
    /// group, grouped by a key over (left tuple, right fact).
    pub fn aggregate_by<T: Fact>(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        group_key: impl Fn(&Tuple, &T) -> Result<JoinKey> + 'static,
        factory: impl Fn() -> Box<dyn Aggregator> + 'static,
    ) -> NodeId {
        let wrapped: GroupKeyFn = Box::new(move |tuple: &Tuple, fact: &dyn Fact| {
            let typed = fact.downcast_ref::<T>().ok_or(EngineError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: format!("{fact:?}"),
            })?;
            group_key(tuple, typed)
        });
        self.aggregate_node(left, alpha, name, Grouping::ByKey(wrapped), Box::new(factory))
    }

    fn aggregate_node(
        &mut self,
        left: BetaSource,
        alpha: NodeId,
        name: impl Into<String>,
        grouping: Grouping,
        factory: AggregatorFactory,
    ) -> NodeId {
        let id = self.push(ReteNode::Aggregate(AggregateNode {
            name: name.into(),
            grouping,
            factory,
            children: Vec::new(),
        }));
        self.attach_left(left, id);
        self.attach_right(alpha, id);
        id
    }

    /// Terminate a path into a rule. `declarations` name the tuple
    /// elements in path order for the activation's fact map.
    pub fn terminal(
        &mut self,
        left: BetaSource,
        rule: RuleHandle,
        declarations: &[&str],
    ) -> NodeId {
        let id = self.push(ReteNode::Terminal(TerminalNode {
            rule: rule.0,
            declarations: Rc::new(declarations.iter().map(|d| d.to_string()).collect()),
        }));
        self.attach_left(left, id);
        id
    }

    /// Finish construction.
    pub fn build(self) -> ReteNetwork {
        ReteNetwork {
            nodes: self.nodes,
            type_roots: self.type_roots,
            root_successors: self.root_successors,
            rules: self.rules,
        }
    }

    fn push(&mut self, node: ReteNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn attach_left(&mut self, left: BetaSource, id: NodeId) {
        match left {
            BetaSource::Root => self.root_successors.push(id),
            BetaSource::Node(parent) => self.nodes[parent.0].children_mut().push(id),
        }
    }

    fn attach_right(&mut self, alpha: NodeId, target: NodeId) {
        let adapter = self.push(ReteNode::Adapter(AdapterNode { target }));
        match &mut self.nodes[alpha.0] {
            ReteNode::AlphaMemory(memory) => memory.successors.push(adapter),
            _ => panic!("right channel must be fed by an alpha memory"),
        }
    }
}

impl std::fmt::Debug for NetworkBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkBuilder")
            .field("nodes", &self.nodes.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn wrap_fact_fn<T: Fact, R>(
    f: impl Fn(&T) -> Result<R> + 'static,
) -> Box<dyn Fn(&dyn Fact) -> Result<R>> {
    Box::new(move |fact: &dyn Fact| {
        let typed = fact.downcast_ref::<T>().ok_or(EngineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: format!("{fact:?}"),
        })?;
        f(typed)
    })
}
