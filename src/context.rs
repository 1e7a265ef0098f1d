//! Execution contexts
//!
//! [`ExecutionContext`] is the per-propagation scratch threaded by mutable
//! reference through every node: the current top-level operation, the
//! working-memory and agenda handles, the event aggregator, and the halt
//! flag. One instance exists per top-level session call.
//!
//! [`ActionContext`] is the view handed to rule actions: the firing
//! activation, typed dependency resolution, halt, and re-entrant fact
//! operations that propagate fully before returning.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::errors::Result;
use crate::events::EventAggregator;
use crate::fact::Fact;
use crate::resolver::DependencyResolver;
use crate::rete::agenda::{Activation, Agenda};
use crate::rete::network::ReteNetwork;
use crate::rete::working_memory::WorkingMemory;
use crate::session::ops;

/// The top-level session operation currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// A fact insert is propagating.
    Insert,
    /// A fact update is propagating.
    Update,
    /// A fact retract is propagating.
    Retract,
    /// The fire loop is draining the agenda.
    Fire,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Retract => "retract",
            Operation::Fire => "fire",
        };
        f.write_str(name)
    }
}

/// Per-propagation scratch state. Not long-lived: built at the start of a
/// top-level call and dropped when it returns.
pub struct ExecutionContext<'a> {
    pub(crate) operation: Operation,
    pub(crate) wm: &'a mut WorkingMemory,
    pub(crate) agenda: &'a mut Agenda,
    pub(crate) events: &'a EventAggregator,
    pub(crate) halted: bool,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        operation: Operation,
        wm: &'a mut WorkingMemory,
        agenda: &'a mut Agenda,
        events: &'a EventAggregator,
    ) -> Self {
        Self { operation, wm, agenda, events, halted: false }
    }

    /// The operation this propagation serves.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Whether an action has requested the fire loop to stop.
    pub fn halted(&self) -> bool {
        self.halted
    }
}

impl fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operation", &self.operation)
            .field("halted", &self.halted)
            .finish()
    }
}

/// The view a rule action receives while firing.
pub struct ActionContext<'a, 'b> {
    pub(crate) network: &'a ReteNetwork,
    pub(crate) ctx: &'a mut ExecutionContext<'b>,
    pub(crate) activation: &'a Activation,
    pub(crate) resolver: Rc<dyn DependencyResolver>,
}

impl ActionContext<'_, '_> {
    /// The activation being fired.
    pub fn activation(&self) -> &Activation {
        self.activation
    }

    /// Stop the fire loop after the current rule completes.
    pub fn halt(&mut self) {
        self.ctx.halted = true;
    }

    /// Resolve a host service by type through the session's resolver.
    pub fn resolve<T: Any>(&self) -> Option<Rc<T>> {
        self.resolver
            .resolve(std::any::TypeId::of::<T>())
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Insert a fact; fails when it is already present. Propagates fully
    /// before returning, possibly changing the agenda mid-fire.
    pub fn insert(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        ops::insert(self.network, self.ctx, fact)
    }

    /// Insert a fact unless already present; true when inserted.
    pub fn try_insert(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        ops::try_insert(self.network, self.ctx, fact)
    }

    /// Re-propagate a mutated fact; fails when it is unknown.
    pub fn update(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        ops::update(self.network, self.ctx, fact)
    }

    /// Update if present; true when the fact was known.
    pub fn try_update(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        ops::try_update(self.network, self.ctx, fact)
    }

    /// Retract a fact; fails when it is unknown.
    pub fn retract(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        ops::retract(self.network, self.ctx, fact)
    }

    /// Retract if present; true when the fact was known.
    pub fn try_retract(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        ops::try_retract(self.network, self.ctx, fact)
    }
}

impl fmt::Debug for ActionContext<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("rule", &self.activation.rule_name())
            .field("halted", &self.ctx.halted)
            .finish()
    }
}
