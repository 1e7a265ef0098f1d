//! Pluggable dependency resolution for rule actions
//!
//! Actions often need host services (clocks, gateways, repositories). The
//! session does not know how to build them; it carries a resolver the host
//! installs and actions query by type through the action context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

/// Lookup for services consumed by rule actions.
pub trait DependencyResolver {
    /// Resolve a service by its runtime type, or `None` when unknown.
    fn resolve(&self, service: TypeId) -> Option<Rc<dyn Any>>;
}

/// Resolver that knows no services. Installed by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl DependencyResolver for NullResolver {
    fn resolve(&self, _service: TypeId) -> Option<Rc<dyn Any>> {
        None
    }
}

/// Simple map-backed resolver, one instance per service type.
#[derive(Default)]
pub struct ServiceMap {
    services: HashMap<TypeId, Rc<dyn Any>>,
}

impl ServiceMap {
    /// Create an empty service map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance, replacing any previous one of the
    /// same type.
    pub fn register<T: Any>(&mut self, service: Rc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// Fetch a service with its concrete type.
    pub fn get<T: Any>(&self) -> Option<Rc<T>> {
        self.services.get(&TypeId::of::<T>()).cloned().and_then(|s| s.downcast::<T>().ok())
    }
}

impl DependencyResolver for ServiceMap {
    fn resolve(&self, service: TypeId) -> Option<Rc<dyn Any>> {
        self.services.get(&service).cloned()
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap").field("services", &self.services.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock {
        now: u64,
    }

    #[test]
    fn null_resolver_resolves_nothing() {
        assert!(NullResolver.resolve(TypeId::of::<Clock>()).is_none());
    }

    #[test]
    fn service_map_round_trips_by_type() {
        let mut map = ServiceMap::new();
        map.register(Rc::new(Clock { now: 99 }));

        let clock = map.get::<Clock>().unwrap();
        assert_eq!(clock.now, 99);
        assert!(map.get::<String>().is_none());
    }
}
