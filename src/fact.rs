//! Facts and fact identity
//!
//! A fact is any host value the session reasons over. The engine never
//! inspects fact contents; conditions and join keys supplied with the
//! compiled network do. Facts enter the session as `Rc<dyn Fact>` and are
//! identified either by the `Rc` allocation (reference-typed facts) or by
//! a canonical key the fact type provides (value-typed facts).

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::errors::{EngineError, Result};

/// Upcast support so trait objects can be downcast to concrete fact types.
///
/// Implemented for every `'static` type via a blanket impl; fact types get
/// it for free.
pub trait AsAny {
    /// View the value as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Convert an `Rc` of the value into `Rc<dyn Any>`.
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// A host value the session reasons over.
///
/// Reference-typed facts use the default identity (the `Rc` allocation):
/// the caller keeps the `Rc`, mutates the value through interior
/// mutability, and passes the same `Rc` to `update`/`retract`. Value-typed
/// facts override [`Fact::identity_key`] with a canonical key; updates may
/// then replace the allocation entirely.
pub trait Fact: Any + AsAny + fmt::Debug {
    /// Canonical identity key for value-typed facts.
    ///
    /// `None` (the default) selects reference identity.
    fn identity_key(&self) -> Option<u64> {
        None
    }
}

impl dyn Fact {
    /// Returns true when the fact's concrete type is `T`.
    pub fn is<T: Fact>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast the fact to a concrete type.
    pub fn downcast_ref<T: Fact>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Downcast a shared fact to a concrete type, keeping shared ownership.
pub fn downcast_fact<T: Fact>(fact: Rc<dyn Fact>) -> Option<Rc<T>> {
    fact.as_any_rc().downcast::<T>().ok()
}

/// Stable identity of a fact inside one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactId {
    /// Reference identity: the address of the `Rc` allocation.
    Reference(usize),
    /// Value identity: the concrete type plus its canonical key.
    Keyed(TypeId, u64),
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactId::Reference(addr) => write!(f, "ref:{addr:#x}"),
            FactId::Keyed(_, key) => write!(f, "key:{key}"),
        }
    }
}

/// Compute the session identity of a fact.
pub fn fact_id_of(fact: &Rc<dyn Fact>) -> FactId {
    match fact.identity_key() {
        Some(key) => FactId::Keyed(fact.as_any().type_id(), key),
        None => FactId::Reference(Rc::as_ptr(fact) as *const () as usize),
    }
}

/// Shared cell holding the current value of a fact.
///
/// Tuples reference facts through this cell rather than through the raw
/// `Rc`, so a keyed update that swaps the allocation is observed by every
/// tuple that contains the fact without touching tuple identity.
pub struct FactCell {
    id: FactId,
    serial: u64,
    value: RefCell<Rc<dyn Fact>>,
}

impl FactCell {
    pub(crate) fn new(id: FactId, serial: u64, value: Rc<dyn Fact>) -> Rc<Self> {
        Rc::new(Self { id, serial, value: RefCell::new(value) })
    }

    /// Session identity of the fact.
    pub fn id(&self) -> FactId {
        self.id
    }

    /// Insertion serial, useful for diagnostics.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Current value of the fact.
    pub fn value(&self) -> Rc<dyn Fact> {
        self.value.borrow().clone()
    }

    pub(crate) fn replace(&self, value: Rc<dyn Fact>) {
        *self.value.borrow_mut() = value;
    }

    /// Current value downcast to a concrete fact type.
    pub fn downcast<T: Fact>(&self) -> Result<Rc<T>> {
        let value = self.value();
        let actual = format!("{value:?}");
        downcast_fact::<T>(value).ok_or(EngineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual,
        })
    }
}

impl fmt::Debug for FactCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactCell#{}({:?})", self.serial, self.value.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Reading {
        level: i64,
    }
    impl Fact for Reading {}

    #[derive(Debug)]
    struct Account {
        number: u64,
    }
    impl Fact for Account {
        fn identity_key(&self) -> Option<u64> {
            Some(self.number)
        }
    }

    #[test]
    fn reference_identity_tracks_the_allocation() {
        let a: Rc<dyn Fact> = Rc::new(Reading { level: 1 });
        let b: Rc<dyn Fact> = Rc::new(Reading { level: 1 });

        assert_eq!(fact_id_of(&a), fact_id_of(&a.clone()));
        assert_ne!(fact_id_of(&a), fact_id_of(&b));
    }

    #[test]
    fn keyed_identity_tracks_the_canonical_key() {
        let a: Rc<dyn Fact> = Rc::new(Account { number: 7 });
        let b: Rc<dyn Fact> = Rc::new(Account { number: 7 });
        let c: Rc<dyn Fact> = Rc::new(Account { number: 8 });

        assert_eq!(fact_id_of(&a), fact_id_of(&b));
        assert_ne!(fact_id_of(&a), fact_id_of(&c));
    }

    #[test]
    fn cell_replacement_is_visible_to_holders() {
        let first: Rc<dyn Fact> = Rc::new(Account { number: 7 });
        let cell = FactCell::new(fact_id_of(&first), 1, first);

        let held = cell.clone();
        cell.replace(Rc::new(Account { number: 7 }));

        assert!(held.downcast::<Account>().is_ok());
        assert!(held.downcast::<Reading>().is_err());
    }

    #[test]
    fn downcast_recovers_the_concrete_type() {
        let fact: Rc<dyn Fact> = Rc::new(Reading { level: 42 });
        let reading = downcast_fact::<Reading>(fact).unwrap();
        assert_eq!(reading.level, 42);
    }
}
