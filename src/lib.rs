//! # rete-session
//!
//! An incremental forward-chaining rule session for Rust: a compiled
//! Rete discrimination network, a working memory of host facts, a
//! priority agenda, and a synchronous event surface.
//!
//! ## Features
//!
//! - **Incremental match**: insert/update/retract propagate deltas; the
//!   network never re-evaluates from scratch
//! - **Joins, quantifiers, aggregates**: join, filter, binding, not,
//!   exists, and grouped aggregate nodes with incremental group state
//! - **Deterministic**: insertion-ordered memories and FIFO tie-breaking
//!   give a reproducible event sequence for a given input order
//! - **Update-preserving**: an update that keeps a fact's predicates
//!   intact preserves tuple identity and surfaces `activation_updated`
//! - **Re-entrant fire loop**: actions may insert/update/retract and the
//!   agenda follows along, including the rule currently firing
//! - **Event surface**: fact, activation, rule, and failure events fan
//!   out synchronously to subscribers
//!
//! ## Quick start
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use rete_session::{
//!     BetaSource, Fact, JoinKey, NetworkBuilder, RuleDefinition, Session,
//! };
//!
//! #[derive(Debug)]
//! struct Order {
//!     total: Cell<i64>,
//!     flagged: Cell<bool>,
//! }
//! impl Fact for Order {}
//!
//! fn main() -> rete_session::Result<()> {
//!     // Networks come from an external rule compiler; the builder is
//!     // its target. One rule: "when an order totals over 100, flag it".
//!     let mut builder = NetworkBuilder::new();
//!     let rule = builder.add_rule(
//!         RuleDefinition::new("flag-big-order").priority(10).action(|ctx| {
//!             let order = ctx.activation().get::<Order>("order")?;
//!             order.flagged.set(true);
//!             Ok(())
//!         }),
//!     );
//!     let orders = builder.fact_type::<Order>();
//!     let big = builder.select(orders, "total>100", |o: &Order| Ok(o.total.get() > 100));
//!     let memory = builder.alpha_memory(big);
//!     let join = builder.join(
//!         BetaSource::Root,
//!         memory,
//!         "order",
//!         |_| Ok(JoinKey::Unit),
//!         |_: &Order| Ok(JoinKey::Unit),
//!     );
//!     builder.terminal(BetaSource::Node(join), rule, &["order"]);
//!
//!     let mut session = Session::new(builder.build())?;
//!     let order = Rc::new(Order { total: Cell::new(250), flagged: Cell::new(false) });
//!     session.insert(order.clone())?;
//!     assert_eq!(session.fire()?, 1);
//!     assert!(order.flagged.get());
//!     Ok(())
//! }
//! ```
//!
//! ## Core components
//!
//! - [`Session`]: the façade: insert/update/retract, fire, query, events
//! - [`NetworkBuilder`] / [`ReteNetwork`]: the compiled match network
//! - [`RuleDefinition`]: rule metadata and actions
//! - [`Fact`]: trait host values implement to enter working memory
//! - [`EventAggregator`] / [`SessionEvent`]: the lifecycle event surface
//! - [`DependencyResolver`]: pluggable service lookup for actions

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Execution contexts threaded through propagation and actions
pub mod context;
/// Error types and result handling
pub mod errors;
/// Session lifecycle events and the aggregator
pub mod events;
/// Facts, identity, and downcasting
pub mod fact;
/// Dependency resolution for rule actions
pub mod resolver;
/// The Rete network core: nodes, memories, agenda, snapshots
pub mod rete;
/// Compiled rule definitions
pub mod rule;
/// The session façade
pub mod session;

pub use context::{ActionContext, ExecutionContext, Operation};
pub use errors::{EngineError, Result};
pub use events::{EventAggregator, SessionEvent};
pub use fact::{downcast_fact, fact_id_of, AsAny, Fact, FactCell, FactId};
pub use resolver::{DependencyResolver, NullResolver, ServiceMap};
pub use rete::{
    collected, Activation, Agenda, Aggregator, BetaSource, CollectAggregator, CountAggregator,
    Grouping, JoinKey, NetworkBuilder, NetworkVisitor, NodeDescription, NodeId, ReteNetwork,
    RuleHandle, SumAggregator, Tuple, WorkingMemory, WorkingMemorySummary,
};
pub use rule::{ActionFn, RuleDefinition};
pub use session::Session;
