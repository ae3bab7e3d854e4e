//! [`BehaviorRegistry`] – owns every behavior for the lifetime of the process.
//!
//! Behaviors are registered once at startup and looked up by
//! [`BehaviorId`]. Registering returns a typed handle so the owner can keep
//! inspecting the concrete behavior (tests, introspection), while the
//! registry and the control authority only ever see `dyn Behavior`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use arbiter_types::{BehaviorId, ConfigError};

use crate::behavior::Behavior;

/// Shared handle to a registered behavior.
pub type BehaviorHandle = Rc<RefCell<dyn Behavior>>;

/// Behaviors keyed by id. Iteration order is id order, so every pass over
/// the registry is deterministic.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: BTreeMap<BehaviorId, BehaviorHandle>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behavior` under its own id.
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateBehavior`] when the id is already taken.
    pub fn register<B: Behavior + 'static>(&mut self, behavior: B) -> Result<Rc<RefCell<B>>, ConfigError> {
        let id = behavior.id().clone();
        if self.behaviors.contains_key(&id) {
            return Err(ConfigError::DuplicateBehavior(id));
        }
        let typed = Rc::new(RefCell::new(behavior));
        let handle: BehaviorHandle = typed.clone();
        self.behaviors.insert(id, handle);
        Ok(typed)
    }

    pub fn get(&self, id: &BehaviorId) -> Option<BehaviorHandle> {
        self.behaviors.get(id).cloned()
    }

    pub fn contains(&self, id: &BehaviorId) -> bool {
        self.behaviors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &BehaviorId> {
        self.behaviors.keys()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Check that every declared delegate of every behavior is registered.
    pub fn validate_delegates(&self) -> Result<(), ConfigError> {
        for (id, handle) in &self.behaviors {
            let declared = handle.borrow().delegates();
            if let Some(missing) = declared.into_iter().find(|d| !self.contains(d)) {
                return Err(ConfigError::UnknownBehavior {
                    referenced_by: id.to_string(),
                    behavior: missing,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::behavior::BehaviorContext;

    struct Stub {
        id: BehaviorId,
        delegates: BTreeSet<BehaviorId>,
        touched: u32,
    }

    impl Stub {
        fn new(id: &str) -> Self {
            Self {
                id: BehaviorId::new(id),
                delegates: BTreeSet::new(),
                touched: 0,
            }
        }
    }

    impl Behavior for Stub {
        fn id(&self) -> &BehaviorId {
            &self.id
        }
        fn wants_to_be_activated(&self, _ctx: &BehaviorContext<'_>) -> bool {
            true
        }
        fn on_activated(&mut self, _ctx: &BehaviorContext<'_>) {}
        fn on_deactivated(&mut self, _ctx: &BehaviorContext<'_>) {}
        fn update(&mut self, _ctx: &BehaviorContext<'_>) {}
        fn delegates(&self) -> BTreeSet<BehaviorId> {
            self.delegates.clone()
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut reg = BehaviorRegistry::new();
        reg.register(Stub::new("LookAround")).unwrap();
        let err = reg.register(Stub::new("LookAround")).err();
        assert_eq!(
            err,
            Some(ConfigError::DuplicateBehavior(BehaviorId::new("LookAround")))
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn typed_handle_aliases_registry_entry() {
        let mut reg = BehaviorRegistry::new();
        let typed = reg.register(Stub::new("GoHome")).unwrap();
        typed.borrow_mut().touched = 3;

        let handle = reg.get(&BehaviorId::new("GoHome")).unwrap();
        assert!(Rc::ptr_eq(
            &(typed.clone() as BehaviorHandle),
            &handle
        ));
        assert_eq!(typed.borrow().touched, 3);
    }

    #[test]
    fn ids_iterate_in_order() {
        let mut reg = BehaviorRegistry::new();
        reg.register(Stub::new("b")).unwrap();
        reg.register(Stub::new("a")).unwrap();
        let ids: Vec<_> = reg.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn missing_delegate_is_a_config_error() {
        let mut reg = BehaviorRegistry::new();
        let mut parent = Stub::new("GuardDog");
        parent.delegates.insert(BehaviorId::new("Pounce"));
        reg.register(parent).unwrap();

        let err = reg.validate_delegates().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownBehavior {
                referenced_by: "GuardDog".into(),
                behavior: BehaviorId::new("Pounce"),
            }
        );

        reg.register(Stub::new("Pounce")).unwrap();
        assert!(reg.validate_delegates().is_ok());
    }
}
