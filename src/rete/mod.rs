//! Rete discrimination network core
//!
//! The incremental match engine behind a session: alpha chains filter
//! single facts, beta nodes join them into tuples, quantifier and
//! aggregate nodes reshape the stream, and terminal nodes turn admitted
//! tuples into agenda activations. Topology lives in [`network`], dynamic
//! state in [`working_memory`] and [`memory`].

pub mod agenda;
pub mod aggregate;
mod alpha;
mod beta;
pub mod memory;
pub mod network;
mod quantifier;
pub mod snapshot;
pub mod tuple;
pub mod working_memory;

pub use agenda::{Activation, Agenda};
pub use aggregate::{
    collected, Aggregator, CollectAggregator, CountAggregator, SumAggregator,
};
pub use network::{
    BetaSource, Grouping, NetworkBuilder, NodeId, ReteNetwork, RuleHandle,
};
pub use quantifier::QuantifierKind;
pub use snapshot::{NetworkVisitor, NodeDescription, WorkingMemorySummary};
pub use tuple::{Element, ElementKey, JoinKey, Tuple};
pub use working_memory::{FactEntry, WorkingMemory};
