//! Rule sessions
//!
//! The public façade over the match engine: a single-threaded state
//! machine owning the working memory, the agenda, and the event
//! aggregator, and driving propagation through an immutable compiled
//! network. Strict bulk operations validate the whole batch before any
//! propagation; `try_*` variants process the valid subset.
//!
//! Abort semantics: when a condition closure fails mid-propagation, the
//! in-flight fact is mechanically expelled (removed from the registry
//! and from every memory it reached, dependent activations dropped) and
//! the wrapped error surfaces. Facts of the same batch that completed
//! propagation stay. The cleanup path never runs user closures, so the
//! rollback itself cannot fail and every memory invariant holds after an
//! abort.

use std::collections::HashSet;
use std::rc::Rc;

use crate::context::{ActionContext, ExecutionContext, Operation};
use crate::errors::{EngineError, Result};
use crate::events::{EventAggregator, SessionEvent};
use crate::fact::{downcast_fact, fact_id_of, Fact, FactId};
use crate::resolver::{DependencyResolver, NullResolver};
use crate::rete::agenda::Agenda;
use crate::rete::network::ReteNetwork;
use crate::rete::snapshot::{self, NetworkVisitor};
use crate::rete::working_memory::WorkingMemory;

/// The core fact operations, shared between the session façade and the
/// re-entrant action context. Each call propagates fully before
/// returning.
pub(crate) mod ops {
    use super::*;

    pub(crate) fn insert(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let id = fact_id_of(&fact);
        if ctx.wm.contains(id) {
            return Err(EngineError::AlreadyExists { fact: format!("{fact:?}") });
        }
        insert_unchecked(network, ctx, id, fact)
    }

    pub(crate) fn try_insert(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<bool> {
        let id = fact_id_of(&fact);
        if ctx.wm.contains(id) {
            return Ok(false);
        }
        insert_unchecked(network, ctx, id, fact)?;
        Ok(true)
    }

    pub(crate) fn insert_unchecked(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        id: FactId,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let prev = ctx.operation;
        ctx.operation = Operation::Insert;
        let result = (|| {
            log::debug!("insert {id}: {fact:?}");
            ctx.events.publish(&SessionEvent::FactInserting { fact: fact.clone() });
            let cell = ctx.wm.register(id, fact.clone());
            if let Err(err) = network.assert_fact(&cell, ctx) {
                network.expel(id, ctx);
                return Err(err);
            }
            ctx.events.publish(&SessionEvent::FactInserted { fact });
            Ok(())
        })();
        ctx.operation = prev;
        result
    }

    pub(crate) fn update(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let id = fact_id_of(&fact);
        if !ctx.wm.contains(id) {
            return Err(EngineError::UnknownFact { fact: format!("{fact:?}") });
        }
        update_unchecked(network, ctx, id, fact)
    }

    pub(crate) fn try_update(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<bool> {
        let id = fact_id_of(&fact);
        if !ctx.wm.contains(id) {
            return Ok(false);
        }
        update_unchecked(network, ctx, id, fact)?;
        Ok(true)
    }

    pub(crate) fn update_unchecked(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        id: FactId,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let prev = ctx.operation;
        ctx.operation = Operation::Update;
        let result = (|| {
            log::debug!("update {id}: {fact:?}");
            ctx.events.publish(&SessionEvent::FactUpdating { fact: fact.clone() });
            let cell = ctx.wm.cell(id).ok_or(EngineError::UnknownFact {
                fact: format!("{fact:?}"),
            })?;
            // Keyed facts may replace the allocation; every tuple holding
            // the cell observes the new value.
            cell.replace(fact.clone());
            if let Err(err) = network.update_fact(&cell, ctx) {
                network.expel(id, ctx);
                return Err(err);
            }
            ctx.events.publish(&SessionEvent::FactUpdated { fact });
            Ok(())
        })();
        ctx.operation = prev;
        result
    }

    pub(crate) fn retract(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let id = fact_id_of(&fact);
        if !ctx.wm.contains(id) {
            return Err(EngineError::UnknownFact { fact: format!("{fact:?}") });
        }
        retract_unchecked(network, ctx, id, fact)
    }

    pub(crate) fn try_retract(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        fact: Rc<dyn Fact>,
    ) -> Result<bool> {
        let id = fact_id_of(&fact);
        if !ctx.wm.contains(id) {
            return Ok(false);
        }
        retract_unchecked(network, ctx, id, fact)?;
        Ok(true)
    }

    pub(crate) fn retract_unchecked(
        network: &ReteNetwork,
        ctx: &mut ExecutionContext<'_>,
        id: FactId,
        fact: Rc<dyn Fact>,
    ) -> Result<()> {
        let prev = ctx.operation;
        ctx.operation = Operation::Retract;
        let result = (|| {
            log::debug!("retract {id}: {fact:?}");
            ctx.events.publish(&SessionEvent::FactRetracting { fact: fact.clone() });
            let cell = ctx.wm.cell(id).ok_or(EngineError::UnknownFact {
                fact: format!("{fact:?}"),
            })?;
            network.retract_fact(&cell, ctx)?;
            ctx.wm.unregister(id);
            ctx.events.publish(&SessionEvent::FactRetracted { fact });
            Ok(())
        })();
        ctx.operation = prev;
        result
    }
}

/// An instance of the rule engine: compiled network plus mutable state.
///
/// Deliberately single-threaded (`Rc`/`RefCell` internally); concurrent
/// use is not supported and the type is not `Send`.
pub struct Session {
    network: ReteNetwork,
    wm: WorkingMemory,
    agenda: Agenda,
    events: Rc<EventAggregator>,
    resolver: Rc<dyn DependencyResolver>,
}

impl Session {
    /// Start a session over a compiled network.
    pub fn new(network: ReteNetwork) -> Result<Self> {
        let mut session = Self {
            network,
            wm: WorkingMemory::new(),
            agenda: Agenda::new(),
            events: Rc::new(EventAggregator::new()),
            resolver: Rc::new(NullResolver),
        };
        let events = session.events.clone();
        let mut ctx = ExecutionContext::new(
            Operation::Insert,
            &mut session.wm,
            &mut session.agenda,
            &events,
        );
        session.network.bootstrap(&mut ctx)?;
        Ok(session)
    }

    /// The event aggregator; subscribe here.
    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    /// The dependency resolver actions currently see.
    pub fn dependency_resolver(&self) -> Rc<dyn DependencyResolver> {
        self.resolver.clone()
    }

    /// Install a dependency resolver for action execution.
    pub fn set_dependency_resolver(&mut self, resolver: Rc<dyn DependencyResolver>) {
        self.resolver = resolver;
    }

    /// Number of facts in working memory.
    pub fn fact_count(&self) -> usize {
        self.wm.fact_count()
    }

    /// Number of activations queued on the agenda.
    pub fn agenda_len(&self) -> usize {
        self.agenda.len()
    }

    /// Restrict firing to rules of one agenda group; `None` lifts it.
    pub fn set_agenda_filter(&mut self, group: Option<String>) {
        self.agenda.set_filter(group);
    }

    /// Insert a fact; fails with `AlreadyExists` when present.
    pub fn insert(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        self.insert_all(vec![fact])
    }

    /// Insert a batch, all-or-error: when any fact is already present the
    /// whole call fails before anything propagates.
    pub fn insert_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<()> {
        let mut seen = HashSet::new();
        for fact in &facts {
            let id = fact_id_of(fact);
            if self.wm.contains(id) || !seen.insert(id) {
                return Err(EngineError::AlreadyExists { fact: format!("{fact:?}") });
            }
        }
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Insert, &mut self.wm, &mut self.agenda, &events);
        for fact in facts {
            let id = fact_id_of(&fact);
            ops::insert_unchecked(&self.network, &mut ctx, id, fact)?;
        }
        Ok(())
    }

    /// Insert unless present; true when inserted.
    pub fn try_insert(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Insert, &mut self.wm, &mut self.agenda, &events);
        ops::try_insert(&self.network, &mut ctx, fact)
    }

    /// Insert the not-yet-present subset of a batch; returns the count
    /// inserted.
    pub fn try_insert_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<usize> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Insert, &mut self.wm, &mut self.agenda, &events);
        let mut inserted = 0;
        for fact in facts {
            if ops::try_insert(&self.network, &mut ctx, fact)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Re-propagate a mutated fact; fails with `UnknownFact`.
    pub fn update(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        self.update_all(vec![fact])
    }

    /// Update a batch, all-or-error on unknown facts.
    pub fn update_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<()> {
        for fact in &facts {
            if !self.wm.contains(fact_id_of(fact)) {
                return Err(EngineError::UnknownFact { fact: format!("{fact:?}") });
            }
        }
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Update, &mut self.wm, &mut self.agenda, &events);
        for fact in facts {
            let id = fact_id_of(&fact);
            ops::update_unchecked(&self.network, &mut ctx, id, fact)?;
        }
        Ok(())
    }

    /// Update if present; true when the fact was known.
    pub fn try_update(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Update, &mut self.wm, &mut self.agenda, &events);
        ops::try_update(&self.network, &mut ctx, fact)
    }

    /// Update the known subset of a batch; returns the count updated.
    pub fn try_update_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<usize> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Update, &mut self.wm, &mut self.agenda, &events);
        let mut updated = 0;
        for fact in facts {
            if ops::try_update(&self.network, &mut ctx, fact)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Retract a fact; fails with `UnknownFact`.
    pub fn retract(&mut self, fact: Rc<dyn Fact>) -> Result<()> {
        self.retract_all(vec![fact])
    }

    /// Retract a batch, all-or-error on unknown facts.
    pub fn retract_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<()> {
        for fact in &facts {
            if !self.wm.contains(fact_id_of(fact)) {
                return Err(EngineError::UnknownFact { fact: format!("{fact:?}") });
            }
        }
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Retract, &mut self.wm, &mut self.agenda, &events);
        for fact in facts {
            let id = fact_id_of(&fact);
            ops::retract_unchecked(&self.network, &mut ctx, id, fact)?;
        }
        Ok(())
    }

    /// Retract if present; true when the fact was known.
    pub fn try_retract(&mut self, fact: Rc<dyn Fact>) -> Result<bool> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Retract, &mut self.wm, &mut self.agenda, &events);
        ops::try_retract(&self.network, &mut ctx, fact)
    }

    /// Retract the known subset of a batch; returns the count retracted.
    pub fn try_retract_all(&mut self, facts: Vec<Rc<dyn Fact>>) -> Result<usize> {
        let events = self.events.clone();
        let mut ctx =
            ExecutionContext::new(Operation::Retract, &mut self.wm, &mut self.agenda, &events);
        let mut retracted = 0;
        for fact in facts {
            if ops::try_retract(&self.network, &mut ctx, fact)? {
                retracted += 1;
            }
        }
        Ok(retracted)
    }

    /// Drain the agenda: pop, run actions, repeat until the agenda is
    /// empty (under the current filter) or an action halts the loop.
    /// Returns the number of rules fired.
    ///
    /// Activation consumption happens at pop time: an action retracting
    /// one of its own bound facts makes the later agenda removal a no-op.
    pub fn fire(&mut self) -> Result<usize> {
        let events = self.events.clone();
        let resolver = self.resolver.clone();
        let mut fired = 0;
        let mut ctx =
            ExecutionContext::new(Operation::Fire, &mut self.wm, &mut self.agenda, &events);
        while let Some(activation) = ctx.agenda.pop_next() {
            let rule_name = activation.rule_name().to_string();
            log::debug!("firing rule `{rule_name}`");
            ctx.events.publish(&SessionEvent::RuleFiring { rule: rule_name.clone() });
            let actions = self.network.rule(activation.rule_index()).actions().to_vec();
            for action in &actions {
                let mut action_ctx = ActionContext {
                    network: &self.network,
                    ctx: &mut ctx,
                    activation: &activation,
                    resolver: resolver.clone(),
                };
                if let Err(err) = (action.as_ref())(&mut action_ctx) {
                    let wrapped = EngineError::ActionEvaluation {
                        rule: rule_name.clone(),
                        message: err.to_string(),
                    };
                    ctx.events.publish(&SessionEvent::ActionFailed {
                        rule: rule_name,
                        error: wrapped.to_string(),
                    });
                    return Err(wrapped);
                }
            }
            ctx.events.publish(&SessionEvent::RuleFired { rule: rule_name });
            fired += 1;
            if ctx.halted {
                log::debug!("fire loop halted after {fired} rules");
                break;
            }
        }
        Ok(fired)
    }

    /// Lazy sequence of the facts whose host value is of type `T`, in
    /// insertion order. Does not touch the network.
    pub fn query<T: Fact>(&self) -> impl Iterator<Item = Rc<T>> + '_ {
        self.wm.iter_facts().filter_map(|cell| downcast_fact::<T>(cell.value()))
    }

    /// Walk the network and working memory, feeding a diagnostics
    /// visitor.
    pub fn snapshot(&self, visitor: &mut dyn NetworkVisitor) {
        snapshot::walk(&self.network, &self.wm, visitor);
    }

    /// The compiled network the session runs against.
    pub fn network(&self) -> &ReteNetwork {
        &self.network
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("facts", &self.wm.fact_count())
            .field("agenda", &self.agenda.len())
            .field("rules", &self.network.rules().len())
            .finish()
    }
}
