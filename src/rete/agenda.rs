//! Agenda: the priority-ordered set of pending activations
//!
//! Activations are keyed `(rule priority desc, sequence asc)`; sequence
//! numbers are assigned monotonically on add and reassigned on modify, so
//! ties within a priority fire FIFO. At most one activation exists per
//! (rule, tuple) pair. A pop-time group filter lets the host restrict
//! firing to one rule group without losing the rest of the agenda.

use std::collections::{BTreeMap, HashMap};
use std::cmp::Reverse;
use std::rc::Rc;

use crate::errors::Result;
use crate::fact::Fact;
use crate::rete::tuple::Tuple;

/// A rule ready to fire, bound to the tuple that satisfied it.
#[derive(Debug, Clone)]
pub struct Activation {
    rule_index: usize,
    rule_name: Rc<str>,
    priority: i32,
    group: Option<Rc<str>>,
    declarations: Rc<Vec<String>>,
    tuple: Rc<Tuple>,
    sequence: u64,
}

impl Activation {
    pub(crate) fn new(
        rule_index: usize,
        rule_name: Rc<str>,
        priority: i32,
        group: Option<Rc<str>>,
        declarations: Rc<Vec<String>>,
        tuple: Rc<Tuple>,
    ) -> Self {
        Self { rule_index, rule_name, priority, group, declarations, tuple, sequence: 0 }
    }

    pub(crate) fn rule_index(&self) -> usize {
        self.rule_index
    }

    /// Name of the matched rule.
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// Rule priority; higher fires first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Agenda group of the rule, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Sequence number assigned by the agenda; ties break FIFO.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The tuple that satisfied the rule.
    pub fn tuple(&self) -> &Rc<Tuple> {
        &self.tuple
    }

    /// Current values of the facts bound by the match, in path order.
    pub fn facts(&self) -> Vec<Rc<dyn Fact>> {
        self.tuple.facts()
    }

    /// Declaration names zipped with the bound facts.
    pub fn fact_map(&self) -> Vec<(String, Rc<dyn Fact>)> {
        let cells = self.tuple.fact_cells();
        self.declarations
            .iter()
            .zip(cells)
            .map(|(name, cell)| (name.clone(), cell.value()))
            .collect()
    }

    /// Look up a bound fact by declaration name.
    pub fn get<T: Fact>(&self, name: &str) -> Result<Rc<T>> {
        let index = self
            .declarations
            .iter()
            .position(|d| d == name)
            .ok_or(crate::errors::EngineError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: format!("no declaration named `{name}`"),
            })?;
        self.tuple.downcast_at::<T>(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AgendaKey {
    priority: Reverse<i32>,
    sequence: u64,
}

/// Priority-ordered set of pending activations.
#[derive(Default)]
pub struct Agenda {
    queue: BTreeMap<AgendaKey, Activation>,
    index: HashMap<(usize, u64), AgendaKey>,
    next_sequence: u64,
    filter: Option<String>,
}

impl Agenda {
    /// Create an empty agenda with no group filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an activation. A second activation for the same (rule, tuple)
    /// pair is ignored; the update path uses [`Agenda::modify`] instead.
    /// Returns whether the activation was queued.
    pub fn add(&mut self, mut activation: Activation) -> bool {
        let slot = (activation.rule_index, activation.tuple.serial());
        if self.index.contains_key(&slot) {
            return false;
        }
        activation.sequence = self.next_sequence;
        self.next_sequence += 1;
        let key = AgendaKey {
            priority: Reverse(activation.priority),
            sequence: activation.sequence,
        };
        self.index.insert(slot, key);
        self.queue.insert(key, activation);
        true
    }

    /// Reassign the sequence number of a queued activation to now and
    /// reorder it. A no-op (returning false) when the pair is not queued,
    /// e.g. because the activation was already consumed by a fire.
    pub fn modify(&mut self, rule_index: usize, tuple_serial: u64) -> bool {
        let slot = (rule_index, tuple_serial);
        let Some(old_key) = self.index.remove(&slot) else {
            return false;
        };
        let Some(mut activation) = self.queue.remove(&old_key) else {
            return false;
        };
        activation.sequence = self.next_sequence;
        self.next_sequence += 1;
        let key = AgendaKey {
            priority: Reverse(activation.priority),
            sequence: activation.sequence,
        };
        self.index.insert(slot, key);
        self.queue.insert(key, activation);
        true
    }

    /// Drop a queued activation. No-op when the pair is not queued.
    pub fn remove(&mut self, rule_index: usize, tuple_serial: u64) -> Option<Activation> {
        let key = self.index.remove(&(rule_index, tuple_serial))?;
        self.queue.remove(&key)
    }

    /// Pop the highest-priority, lowest-sequence activation passing the
    /// current group filter. Activations outside the filter stay queued.
    pub fn pop_next(&mut self) -> Option<Activation> {
        let key = self
            .queue
            .iter()
            .find(|(_, activation)| self.passes_filter(activation))
            .map(|(key, _)| *key)?;
        let activation = self.queue.remove(&key)?;
        self.index.remove(&(activation.rule_index, activation.tuple.serial()));
        Some(activation)
    }

    /// Whether any queued activation passes the current filter.
    pub fn has_active(&self) -> bool {
        self.queue.values().any(|a| self.passes_filter(a))
    }

    /// Total number of queued activations, filter ignored.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Restrict popping to rules in the given group; `None` lifts the
    /// restriction. Applied at pop time only.
    pub fn set_filter(&mut self, group: Option<String>) {
        self.filter = group;
    }

    /// The current group filter.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Drop every queued activation.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    fn passes_filter(&self, activation: &Activation) -> bool {
        match &self.filter {
            None => true,
            Some(group) => activation.group() == Some(group.as_str()),
        }
    }
}

impl std::fmt::Debug for Agenda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agenda")
            .field("queued", &self.queue.len())
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation(rule: usize, name: &str, priority: i32, group: Option<&str>) -> Activation {
        Activation::new(
            rule,
            Rc::from(name),
            priority,
            group.map(Rc::from),
            Rc::new(Vec::new()),
            Tuple::root(),
        )
    }

    fn activation_with_tuple(rule: usize, priority: i32, serial: u64) -> Activation {
        let tuple = Tuple::extend(
            &Tuple::root(),
            serial,
            crate::rete::tuple::ElementKey::Binding,
            crate::rete::tuple::Element::Value(std::cell::RefCell::new(
                Rc::new(()) as Rc<dyn std::any::Any>
            )),
        );
        Activation::new(rule, Rc::from("r"), priority, None, Rc::new(Vec::new()), tuple)
    }

    #[test]
    fn higher_priority_pops_first() {
        let mut agenda = Agenda::new();
        agenda.add(activation_with_tuple(0, 10, 1));
        agenda.add(activation_with_tuple(1, 20, 2));

        assert_eq!(agenda.pop_next().unwrap().priority(), 20);
        assert_eq!(agenda.pop_next().unwrap().priority(), 10);
        assert!(agenda.pop_next().is_none());
    }

    #[test]
    fn ties_break_fifo_by_sequence() {
        let mut agenda = Agenda::new();
        agenda.add(activation_with_tuple(0, 5, 1));
        agenda.add(activation_with_tuple(1, 5, 2));
        agenda.add(activation_with_tuple(2, 5, 3));

        assert_eq!(agenda.pop_next().unwrap().rule_index(), 0);
        assert_eq!(agenda.pop_next().unwrap().rule_index(), 1);
        assert_eq!(agenda.pop_next().unwrap().rule_index(), 2);
    }

    #[test]
    fn duplicate_rule_tuple_pairs_are_ignored() {
        let mut agenda = Agenda::new();
        assert!(agenda.add(activation(0, "r", 0, None)));
        assert!(!agenda.add(activation(0, "r", 0, None)));
        assert_eq!(agenda.len(), 1);
    }

    #[test]
    fn modify_moves_an_activation_to_the_back_of_its_priority() {
        let mut agenda = Agenda::new();
        agenda.add(activation_with_tuple(0, 5, 1));
        agenda.add(activation_with_tuple(1, 5, 2));

        assert!(agenda.modify(0, 1));
        assert_eq!(agenda.pop_next().unwrap().rule_index(), 1);
        assert_eq!(agenda.pop_next().unwrap().rule_index(), 0);
    }

    #[test]
    fn modify_of_a_consumed_activation_is_a_no_op() {
        let mut agenda = Agenda::new();
        agenda.add(activation_with_tuple(0, 5, 1));
        agenda.pop_next().unwrap();

        assert!(!agenda.modify(0, 1));
        assert!(agenda.is_empty());
    }

    #[test]
    fn group_filter_skips_without_consuming() {
        let mut agenda = Agenda::new();
        agenda.add(activation(0, "a", 10, Some("billing")));
        agenda.add(activation_with_tuple(1, 20, 1));

        agenda.set_filter(Some("billing".into()));
        let popped = agenda.pop_next().unwrap();
        assert_eq!(popped.rule_name(), "a");
        assert!(!agenda.has_active());
        assert_eq!(agenda.len(), 1);

        agenda.set_filter(None);
        assert_eq!(agenda.pop_next().unwrap().priority(), 20);
    }

    #[test]
    fn remove_is_a_no_op_when_absent() {
        let mut agenda = Agenda::new();
        assert!(agenda.remove(3, 9).is_none());
    }
}
