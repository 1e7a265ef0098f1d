//! Session lifecycle events
//!
//! Every externally visible state change of a session is published through
//! the [`EventAggregator`]: fact lifecycle, activation lifecycle, rule
//! firing, and evaluation failures. Subscribers run synchronously, in
//! registration order, on the caller's stack; the engine catches nothing,
//! so a panicking subscriber unwinds out of the session call.

use std::cell::RefCell;
use std::rc::Rc;

use crate::fact::Fact;

/// A lifecycle event raised by a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A fact is about to be inserted into working memory.
    FactInserting {
        /// The fact being inserted
        fact: Rc<dyn Fact>,
    },
    /// A fact finished propagating after insert.
    FactInserted {
        /// The inserted fact
        fact: Rc<dyn Fact>,
    },
    /// A fact is about to be re-propagated after a host-side mutation.
    FactUpdating {
        /// The fact being updated
        fact: Rc<dyn Fact>,
    },
    /// A fact finished propagating after update.
    FactUpdated {
        /// The updated fact
        fact: Rc<dyn Fact>,
    },
    /// A fact is about to be removed from working memory.
    FactRetracting {
        /// The fact being retracted
        fact: Rc<dyn Fact>,
    },
    /// A fact finished retracting.
    FactRetracted {
        /// The retracted fact
        fact: Rc<dyn Fact>,
    },
    /// A rule match materialized and was queued on the agenda.
    ActivationCreated {
        /// Rule name
        rule: String,
        /// Facts bound by the match, in network-path order
        facts: Vec<Rc<dyn Fact>>,
    },
    /// An existing match survived an update with its identity intact.
    ActivationUpdated {
        /// Rule name
        rule: String,
        /// Facts bound by the match
        facts: Vec<Rc<dyn Fact>>,
    },
    /// A match no longer holds and left the terminal memory.
    ActivationDeleted {
        /// Rule name
        rule: String,
        /// Facts that were bound by the match
        facts: Vec<Rc<dyn Fact>>,
    },
    /// An activation was popped and its actions are about to run.
    RuleFiring {
        /// Rule name
        rule: String,
    },
    /// All actions of a popped activation completed.
    RuleFired {
        /// Rule name
        rule: String,
    },
    /// A condition closure failed during propagation.
    ConditionFailed {
        /// Name of the failing node
        condition: String,
        /// The fact in flight, when the failure is fact-scoped
        fact: Option<Rc<dyn Fact>>,
        /// Display form of the surfaced error
        error: String,
    },
    /// A rule action failed during fire.
    ActionFailed {
        /// Rule name
        rule: String,
        /// Display form of the surfaced error
        error: String,
    },
}

impl SessionEvent {
    /// Stable kind tag, handy for filtering in subscribers and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::FactInserting { .. } => "fact_inserting",
            SessionEvent::FactInserted { .. } => "fact_inserted",
            SessionEvent::FactUpdating { .. } => "fact_updating",
            SessionEvent::FactUpdated { .. } => "fact_updated",
            SessionEvent::FactRetracting { .. } => "fact_retracting",
            SessionEvent::FactRetracted { .. } => "fact_retracted",
            SessionEvent::ActivationCreated { .. } => "activation_created",
            SessionEvent::ActivationUpdated { .. } => "activation_updated",
            SessionEvent::ActivationDeleted { .. } => "activation_deleted",
            SessionEvent::RuleFiring { .. } => "rule_firing",
            SessionEvent::RuleFired { .. } => "rule_fired",
            SessionEvent::ConditionFailed { .. } => "condition_failed",
            SessionEvent::ActionFailed { .. } => "action_failed",
        }
    }
}

type Handler = Box<dyn FnMut(&SessionEvent)>;

/// Synchronous fan-out of [`SessionEvent`]s to subscribers.
#[derive(Default)]
pub struct EventAggregator {
    handlers: RefCell<Vec<Handler>>,
}

impl EventAggregator {
    /// Create an aggregator with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers are invoked in registration
    /// order for every subsequent event.
    pub fn subscribe(&self, handler: impl FnMut(&SessionEvent) + 'static) {
        self.handlers.borrow_mut().push(Box::new(handler));
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub(crate) fn publish(&self, event: &SessionEvent) {
        log::trace!("event: {}", event.kind());
        for handler in self.handlers.borrow_mut().iter_mut() {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventAggregator")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_run_in_registration_order() {
        let aggregator = EventAggregator::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            aggregator.subscribe(move |_| seen.borrow_mut().push(tag));
        }

        aggregator.publish(&SessionEvent::RuleFiring { rule: "r".into() });
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let aggregator = EventAggregator::new();
        let count = Rc::new(RefCell::new(0usize));

        let c = count.clone();
        aggregator.subscribe(move |_| *c.borrow_mut() += 1);
        let c = count.clone();
        aggregator.subscribe(move |_| *c.borrow_mut() += 1);

        aggregator.publish(&SessionEvent::RuleFiring { rule: "a".into() });
        aggregator.publish(&SessionEvent::RuleFired { rule: "a".into() });
        assert_eq!(*count.borrow(), 4);
    }
}
