//! Tuples: partial matches along one beta-network path
//!
//! A tuple is an immutable lineage of elements, each appended by exactly
//! one node: a fact (joins), a projected value (binding nodes), or a
//! synthetic aggregate result. Tuples are shared between node memories by
//! `Rc` and keyed by `(parent serial, element key)`; the payload of value
//! elements sits in a cell so an in-place update never disturbs lineage.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::errors::{EngineError, Result};
use crate::fact::{Fact, FactCell, FactId};

/// Hashable key computed by join/grouping closures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    /// Keyless join: every left matches every right.
    Unit,
    /// Boolean key
    Bool(bool),
    /// Integer key
    Int(i64),
    /// Float key, compared by bit pattern
    FloatBits(u64),
    /// String key
    Str(String),
}

impl JoinKey {
    /// Key a float by its bit pattern.
    pub fn float(value: f64) -> Self {
        JoinKey::FloatBits(value.to_bits())
    }
}

impl From<()> for JoinKey {
    fn from(_: ()) -> Self {
        JoinKey::Unit
    }
}

impl From<bool> for JoinKey {
    fn from(value: bool) -> Self {
        JoinKey::Bool(value)
    }
}

impl From<i64> for JoinKey {
    fn from(value: i64) -> Self {
        JoinKey::Int(value)
    }
}

impl From<&str> for JoinKey {
    fn from(value: &str) -> Self {
        JoinKey::Str(value.to_string())
    }
}

impl From<String> for JoinKey {
    fn from(value: String) -> Self {
        JoinKey::Str(value)
    }
}

/// Which element a tuple appended relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKey {
    /// The shared root tuple.
    Root,
    /// A fact appended by a join.
    Fact(FactId),
    /// A synthetic aggregate result for one group.
    Group(JoinKey),
    /// A projected value appended by a binding node.
    Binding,
}

/// Payload appended by a tuple relative to its parent.
pub enum Element {
    /// The empty root element.
    Root,
    /// A fact, referenced through its working-memory cell.
    Fact(Rc<FactCell>),
    /// A projected or aggregated value; replaced in place on update.
    Value(RefCell<Rc<dyn Any>>),
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Root => write!(f, "Root"),
            Element::Fact(cell) => write!(f, "Fact({:?})", cell.value()),
            Element::Value(_) => write!(f, "Value(..)"),
        }
    }
}

/// An ordered combination of elements satisfying all predicates along one
/// network path. Immutable after creation; see the module docs.
pub struct Tuple {
    serial: u64,
    key: ElementKey,
    parent: Option<Rc<Tuple>>,
    element: Element,
    len: usize,
}

impl Tuple {
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self {
            serial: 0,
            key: ElementKey::Root,
            parent: None,
            element: Element::Root,
            len: 0,
        })
    }

    pub(crate) fn extend(
        parent: &Rc<Tuple>,
        serial: u64,
        key: ElementKey,
        element: Element,
    ) -> Rc<Self> {
        Rc::new(Self {
            serial,
            key,
            parent: Some(parent.clone()),
            element,
            len: parent.len + 1,
        })
    }

    /// Stable serial of this tuple; identity inside node memories.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Number of elements (facts, projections, aggregates) in the tuple.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for the root tuple only.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The parent this tuple extends, `None` for the root.
    pub fn parent(&self) -> Option<&Rc<Tuple>> {
        self.parent.as_ref()
    }

    /// Lineage key: the parent serial and the appended element key.
    pub fn lineage(&self) -> (u64, &ElementKey) {
        (self.parent.as_ref().map(|p| p.serial).unwrap_or(0), &self.key)
    }

    /// Elements in path order, root end first.
    pub fn elements(&self) -> Vec<&Element> {
        let mut out = Vec::with_capacity(self.len);
        let mut current = Some(self);
        while let Some(tuple) = current {
            if !matches!(tuple.element, Element::Root) {
                out.push(&tuple.element);
            }
            current = tuple.parent.as_deref();
        }
        out.reverse();
        out
    }

    /// The fact cells in the tuple, in path order.
    pub fn fact_cells(&self) -> Vec<Rc<FactCell>> {
        self.elements()
            .into_iter()
            .filter_map(|e| match e {
                Element::Fact(cell) => Some(cell.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current values of the facts in the tuple, in path order.
    pub fn facts(&self) -> Vec<Rc<dyn Fact>> {
        self.fact_cells().into_iter().map(|c| c.value()).collect()
    }

    /// The element at `index` as a fact cell, if it is one.
    pub fn fact_at(&self, index: usize) -> Option<Rc<FactCell>> {
        match self.elements().get(index) {
            Some(Element::Fact(cell)) => Some((*cell).clone()),
            _ => None,
        }
    }

    /// The element at `index` downcast to a concrete fact type.
    pub fn downcast_at<T: Fact>(&self, index: usize) -> Result<Rc<T>> {
        let cell = self.fact_at(index).ok_or(EngineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: format!("no fact at tuple index {index}"),
        })?;
        cell.downcast::<T>()
    }

    /// The element at `index` as a projected/aggregated value, if it is one.
    pub fn value_at(&self, index: usize) -> Option<Rc<dyn Any>> {
        match self.elements().get(index) {
            Some(Element::Value(cell)) => Some(cell.borrow().clone()),
            _ => None,
        }
    }

    /// The element at `index` downcast to a concrete value type.
    pub fn downcast_value_at<T: Any>(&self, index: usize) -> Result<Rc<T>> {
        let value = self.value_at(index).ok_or(EngineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: format!("no value at tuple index {index}"),
        })?;
        value.downcast::<T>().map_err(|_| EngineError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            actual: "projected value of another type".to_string(),
        })
    }

    pub(crate) fn set_value(&self, payload: Rc<dyn Any>) {
        match &self.element {
            Element::Value(cell) => *cell.borrow_mut() = payload,
            _ => unreachable!("set_value on a non-value tuple element"),
        }
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple#{}", self.serial)?;
        f.debug_list().entries(self.elements()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::fact_id_of;

    #[derive(Debug)]
    struct Order {
        total: i64,
    }
    impl Fact for Order {}

    fn cell_for(total: i64, serial: u64) -> Rc<FactCell> {
        let fact: Rc<dyn Fact> = Rc::new(Order { total });
        FactCell::new(fact_id_of(&fact), serial, fact)
    }

    #[test]
    fn lineage_is_parent_serial_plus_element_key() {
        let root = Tuple::root();
        let cell = cell_for(5, 1);
        let child = Tuple::extend(&root, 1, ElementKey::Fact(cell.id()), Element::Fact(cell));

        let (parent_serial, key) = child.lineage();
        assert_eq!(parent_serial, 0);
        assert!(matches!(key, ElementKey::Fact(_)));
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn elements_walk_in_path_order() {
        let root = Tuple::root();
        let a = cell_for(1, 1);
        let b = cell_for(2, 2);
        let t1 = Tuple::extend(&root, 1, ElementKey::Fact(a.id()), Element::Fact(a));
        let t2 = Tuple::extend(&t1, 2, ElementKey::Fact(b.id()), Element::Fact(b));

        let facts = t2.facts();
        assert_eq!(facts.len(), 2);
        assert_eq!(t2.downcast_at::<Order>(0).unwrap().total, 1);
        assert_eq!(t2.downcast_at::<Order>(1).unwrap().total, 2);
    }

    #[test]
    fn value_elements_update_in_place() {
        let root = Tuple::root();
        let t = Tuple::extend(
            &root,
            1,
            ElementKey::Binding,
            Element::Value(RefCell::new(Rc::new(10i64) as Rc<dyn Any>)),
        );

        assert_eq!(*t.downcast_value_at::<i64>(0).unwrap(), 10);
        t.set_value(Rc::new(20i64) as Rc<dyn Any>);
        assert_eq!(*t.downcast_value_at::<i64>(0).unwrap(), 20);
    }

    #[test]
    fn join_keys_compare_by_value() {
        assert_eq!(JoinKey::from(3i64), JoinKey::Int(3));
        assert_eq!(JoinKey::from("x"), JoinKey::Str("x".into()));
        assert_eq!(JoinKey::float(1.5), JoinKey::float(1.5));
        assert_ne!(JoinKey::float(1.5), JoinKey::float(2.5));
    }
}
