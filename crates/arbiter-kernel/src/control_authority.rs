//! [`ControlAuthority`] – the single delegation chain.
//!
//! The chain is an ordered list `[root, …, innermost]` where every element
//! handed control to the next. It is the only shared mutable state of the
//! behavior system and the sole arbiter of actuator access:
//!
//! - at most one chain exists, and a behavior appears in it at most once;
//! - delegating while already delegated replaces the suffix below the
//!   delegator;
//! - a behavior already held by a *different* delegator cannot be taken
//!   ([`ArbitrationError::AlreadyDelegatedByOther`]);
//! - canceling removes everything below the delegator innermost-first,
//!   running `on_deactivated` on each removed behavior before removing the
//!   next.
//!
//! # Deferred work
//!
//! Completion notifications, "end myself" requests, and deactivations of a
//! behavior that is currently on the call stack are never run from inside
//! `delegate`/`cancel_delegates`. They are queued and drained by
//! [`ControlAuthority::process_pending`], which the scheduler calls after
//! every behavior call returns. A delegator therefore always finishes its
//! own exit-then-enter sequence before any reaction to it runs.
//!
//! # Example
//!
//! ```
//! use arbiter_kernel::{Behavior, BehaviorContext, BehaviorRegistry, ControlAuthority, SimWorld};
//! use arbiter_types::BehaviorId;
//!
//! struct Idle(BehaviorId);
//!
//! impl Behavior for Idle {
//!     fn id(&self) -> &BehaviorId { &self.0 }
//!     fn wants_to_be_activated(&self, _: &BehaviorContext<'_>) -> bool { true }
//!     fn on_activated(&mut self, _: &BehaviorContext<'_>) {}
//!     fn on_deactivated(&mut self, _: &BehaviorContext<'_>) {}
//!     fn update(&mut self, _: &BehaviorContext<'_>) {}
//! }
//!
//! let mut registry = BehaviorRegistry::new();
//! registry.register(Idle("Root".into())).unwrap();
//! registry.register(Idle("Wander".into())).unwrap();
//!
//! let world = SimWorld::new();
//! let authority = ControlAuthority::new(registry);
//! let root = BehaviorId::new("Root");
//! let wander = BehaviorId::new("Wander");
//!
//! authority.activate_root(&world, &root).unwrap();
//! authority.delegate(&world, &root, &wander).unwrap();
//! assert!(authority.is_control_delegated(&root));
//!
//! authority.cancel_delegates(&world, &root, true);
//! assert_eq!(authority.chain(), vec![root]);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;

use arbiter_types::{ArbiterError, ArbitrationError, BehaviorId};
use tracing::{debug, info, warn};

use crate::behavior::BehaviorContext;
use crate::registry::{BehaviorHandle, BehaviorRegistry};
use crate::world::WorldView;

// ─────────────────────────────────────────────────────────────────────────────
// Internal types
// ─────────────────────────────────────────────────────────────────────────────

struct Link {
    behavior: BehaviorId,
    /// The delegator asked to hear about this link ending.
    notify_delegator: bool,
}

enum Deferred {
    Completed {
        delegator: BehaviorId,
        delegate: BehaviorId,
    },
    End(BehaviorId),
    Deactivate(BehaviorId),
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlAuthority
// ─────────────────────────────────────────────────────────────────────────────

/// Arbiter of which single chain of behaviors currently owns control.
///
/// All operations take `&self`; the chain uses interior mutability and no
/// borrow of it is ever held while a behavior callback runs.
pub struct ControlAuthority {
    registry: BehaviorRegistry,
    chain: RefCell<Vec<Link>>,
    deferred: RefCell<VecDeque<Deferred>>,
}

impl ControlAuthority {
    pub fn new(registry: BehaviorRegistry) -> Self {
        Self {
            registry,
            chain: RefCell::new(Vec::new()),
            deferred: RefCell::new(VecDeque::new()),
        }
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    fn context<'a>(&'a self, world: &'a dyn WorldView) -> BehaviorContext<'a> {
        BehaviorContext::new(world, self)
    }

    fn handle(&self, id: &BehaviorId) -> Result<BehaviorHandle, ArbitrationError> {
        self.registry
            .get(id)
            .ok_or_else(|| ArbitrationError::UnknownBehavior(id.clone()))
    }

    fn position(&self, id: &BehaviorId) -> Option<usize> {
        self.chain.borrow().iter().position(|l| &l.behavior == id)
    }

    // ── Startup ─────────────────────────────────────────────────────────────

    /// Validate declared delegates and run every behavior's `init` once.
    ///
    /// # Errors
    ///
    /// The first configuration error reported by the registry or by a
    /// behavior's `init`.
    pub fn init_behaviors(&self, world: &dyn WorldView) -> Result<(), ArbiterError> {
        self.registry.validate_delegates()?;
        let ctx = self.context(world);
        for id in self.registry.ids() {
            let handle = self.handle(id)?;
            let mut behavior = handle
                .try_borrow_mut()
                .map_err(|_| ArbitrationError::Reentrant(id.clone()))?;
            behavior.init(&ctx)?;
        }
        info!(behaviors = self.registry.len(), "behaviors initialized");
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Snapshot of the chain, root first.
    pub fn chain(&self) -> Vec<BehaviorId> {
        self.chain
            .borrow()
            .iter()
            .map(|l| l.behavior.clone())
            .collect()
    }

    pub fn chain_len(&self) -> usize {
        self.chain.borrow().len()
    }

    /// The behavior at `index` in the chain, root being `0`.
    pub fn chain_at(&self, index: usize) -> Option<BehaviorId> {
        self.chain.borrow().get(index).map(|l| l.behavior.clone())
    }

    pub fn root(&self) -> Option<BehaviorId> {
        self.chain_at(0)
    }

    pub fn innermost(&self) -> Option<BehaviorId> {
        self.chain.borrow().last().map(|l| l.behavior.clone())
    }

    /// `true` iff `behavior` is in the chain.
    pub fn is_activated(&self, behavior: &BehaviorId) -> bool {
        self.position(behavior).is_some()
    }

    /// `true` iff `behavior` has a child in the chain.
    pub fn is_control_delegated(&self, behavior: &BehaviorId) -> bool {
        self.position(behavior)
            .is_some_and(|pos| pos + 1 < self.chain.borrow().len())
    }

    /// The behavior `behavior` currently hands control to.
    pub fn delegate_of(&self, behavior: &BehaviorId) -> Option<BehaviorId> {
        let pos = self.position(behavior)?;
        self.chain_at(pos + 1)
    }

    /// The behavior that handed control to `behavior`. `None` for the root
    /// and for inactive behaviors.
    pub fn delegator_of(&self, behavior: &BehaviorId) -> Option<BehaviorId> {
        match self.position(behavior)? {
            0 => None,
            pos => self.chain_at(pos - 1),
        }
    }

    pub fn wants_to_be_activated(&self, world: &dyn WorldView, behavior: &BehaviorId) -> bool {
        let Some(handle) = self.registry.get(behavior) else {
            return false;
        };
        let ctx = self.context(world);
        handle
            .try_borrow()
            .map(|b| b.wants_to_be_activated(&ctx))
            .unwrap_or(false)
    }

    /// The gentle-interruption hint supplied by `behavior`. A behavior that
    /// is busy on the call stack is treated as not interruptible.
    pub fn can_be_gently_interrupted(&self, world: &dyn WorldView, behavior: &BehaviorId) -> bool {
        let Some(handle) = self.registry.get(behavior) else {
            return false;
        };
        let ctx = self.context(world);
        handle
            .try_borrow()
            .map(|b| b.can_be_gently_interrupted_now(&ctx))
            .unwrap_or(false)
    }

    /// Mutual exclusion check: the chain is a simple path of registered
    /// behaviors.
    pub fn is_consistent(&self) -> bool {
        let chain = self.chain.borrow();
        chain.iter().enumerate().all(|(i, link)| {
            self.registry.contains(&link.behavior)
                && chain[i + 1..].iter().all(|l| l.behavior != link.behavior)
        })
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Install `root` as the base of an empty chain and activate it.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::ChainOccupied`] – a chain already exists.
    /// - [`ArbitrationError::UnknownBehavior`] – `root` is not registered.
    pub fn activate_root(&self, world: &dyn WorldView, root: &BehaviorId) -> Result<(), ArbitrationError> {
        if let Some(existing) = self.root() {
            return Err(ArbitrationError::ChainOccupied { root: existing });
        }
        let handle = self.handle(root)?;
        self.push_and_activate(world, root, &handle, false)?;
        info!(root = %root, "root behavior activated");
        Ok(())
    }

    /// Hand control from `parent` to `child`.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::NotInControl`] – `parent` is not in the chain.
    /// - [`ArbitrationError::AlreadyDelegatedByOther`] – `child` is in the
    ///   chain under a different delegator (or is `parent` itself).
    /// - [`ArbitrationError::UnknownBehavior`] – `child` is not registered.
    /// - [`ArbitrationError::Reentrant`] – `child` is busy on the call stack.
    pub fn delegate(
        &self,
        world: &dyn WorldView,
        parent: &BehaviorId,
        child: &BehaviorId,
    ) -> Result<(), ArbitrationError> {
        self.delegate_inner(world, parent, child, false)
    }

    /// Like [`delegate`][Self::delegate], and queue a completion notification
    /// for `parent` when `child` ends.
    pub fn delegate_with_completion(
        &self,
        world: &dyn WorldView,
        parent: &BehaviorId,
        child: &BehaviorId,
    ) -> Result<(), ArbitrationError> {
        self.delegate_inner(world, parent, child, true)
    }

    fn delegate_inner(
        &self,
        world: &dyn WorldView,
        parent: &BehaviorId,
        child: &BehaviorId,
        notify_delegator: bool,
    ) -> Result<(), ArbitrationError> {
        if !self.is_activated(parent) {
            return Err(ArbitrationError::NotInControl {
                behavior: parent.clone(),
            });
        }
        if self.is_activated(child) {
            let owner = self.delegator_of(child);
            if owner.as_ref() != Some(parent) {
                return Err(ArbitrationError::AlreadyDelegatedByOther {
                    behavior: child.clone(),
                    owner,
                });
            }
        }
        let handle = self.handle(child)?;

        if self.is_control_delegated(parent) {
            self.cancel_delegates(world, parent, false);
        }
        if self.innermost().as_ref() != Some(parent) {
            // a deactivation handler rearranged the chain under us
            return Err(ArbitrationError::NotInControl {
                behavior: parent.clone(),
            });
        }

        self.push_and_activate(world, child, &handle, notify_delegator)?;
        debug!(parent = %parent, child = %child, depth = self.chain_len(), "delegated");
        Ok(())
    }

    fn push_and_activate(
        &self,
        world: &dyn WorldView,
        id: &BehaviorId,
        handle: &BehaviorHandle,
        notify_delegator: bool,
    ) -> Result<(), ArbitrationError> {
        let mut behavior = handle
            .try_borrow_mut()
            .map_err(|_| ArbitrationError::Reentrant(id.clone()))?;
        // The link goes in before on_activated so the new behavior can
        // delegate further from inside its own activation.
        self.chain.borrow_mut().push(Link {
            behavior: id.clone(),
            notify_delegator,
        });
        behavior.on_activated(&self.context(world));
        Ok(())
    }

    /// Remove everything below `parent`, innermost first, running
    /// `on_deactivated` on each removed behavior before removing the next.
    ///
    /// With `run_callbacks == false` the completion notification `parent`
    /// registered for its direct delegate is suppressed, including one that
    /// is already queued. `on_deactivated` always runs.
    ///
    /// Returns `true` if anything was removed.
    pub fn cancel_delegates(&self, world: &dyn WorldView, parent: &BehaviorId, run_callbacks: bool) -> bool {
        let mut removed = false;
        loop {
            let (link, direct) = {
                let mut chain = self.chain.borrow_mut();
                let Some(pos) = chain.iter().position(|l| &l.behavior == parent) else {
                    break;
                };
                if chain.len() <= pos + 1 {
                    break;
                }
                let Some(link) = chain.pop() else {
                    break;
                };
                let direct = chain.len() == pos + 1;
                (link, direct)
            };

            debug!(parent = %parent, removed = %link.behavior, "canceled delegate");
            self.deactivate(world, &link.behavior);
            if direct && run_callbacks && link.notify_delegator {
                self.deferred.borrow_mut().push_back(Deferred::Completed {
                    delegator: parent.clone(),
                    delegate: link.behavior,
                });
            }
            removed = true;
        }

        if !run_callbacks {
            self.deferred.borrow_mut().retain(|d| {
                !matches!(d, Deferred::Completed { delegator, .. } if delegator == parent)
            });
        }
        removed
    }

    /// Tear down the whole chain, root included, innermost first.
    pub fn deactivate_all(&self, world: &dyn WorldView) {
        loop {
            let popped = self.chain.borrow_mut().pop();
            let Some(link) = popped else {
                break;
            };
            self.deactivate(world, &link.behavior);
        }
        self.deferred
            .borrow_mut()
            .retain(|d| !matches!(d, Deferred::Completed { .. }));
        info!("control chain cleared");
    }

    /// Ask for `behavior` to end. Its delegator is canceled down to it on
    /// the next [`process_pending`][Self::process_pending]; the root ending
    /// clears the chain.
    pub fn request_end(&self, behavior: &BehaviorId) {
        self.deferred
            .borrow_mut()
            .push_back(Deferred::End(behavior.clone()));
    }

    fn deactivate(&self, world: &dyn WorldView, id: &BehaviorId) {
        let Some(handle) = self.registry.get(id) else {
            return;
        };
        match handle.try_borrow_mut() {
            Ok(mut behavior) => behavior.on_deactivated(&self.context(world)),
            Err(_) => {
                debug!(behavior = %id, "behavior busy; deactivation deferred");
                self.deferred
                    .borrow_mut()
                    .push_back(Deferred::Deactivate(id.clone()));
            }
        }
    }

    fn end_now(&self, world: &dyn WorldView, behavior: &BehaviorId) {
        if let Some(delegator) = self.delegator_of(behavior) {
            debug!(behavior = %behavior, delegator = %delegator, "behavior ended");
            self.cancel_delegates(world, &delegator, true);
        } else if self.root().as_ref() == Some(behavior) {
            self.deactivate_all(world);
        } else {
            debug!(behavior = %behavior, "end requested for inactive behavior; ignored");
        }
    }

    /// Drain deferred work until the queue is empty. Returns the number of
    /// items processed.
    pub fn process_pending(&self, world: &dyn WorldView) -> usize {
        let mut processed = 0;
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some(item) = next else {
                break;
            };
            processed += 1;

            match item {
                Deferred::End(behavior) => self.end_now(world, &behavior),
                Deferred::Deactivate(behavior) => {
                    let Some(handle) = self.registry.get(&behavior) else {
                        continue;
                    };
                    match handle.try_borrow_mut() {
                        Ok(mut b) => b.on_deactivated(&self.context(world)),
                        Err(_) => warn!(behavior = %behavior, "behavior still busy; deferred deactivation dropped"),
                    }
                }
                Deferred::Completed {
                    delegator,
                    delegate,
                } => {
                    if !self.is_activated(&delegator) {
                        continue;
                    }
                    let Some(handle) = self.registry.get(&delegator) else {
                        continue;
                    };
                    match handle.try_borrow_mut() {
                        Ok(mut b) => b.on_delegate_completed(&self.context(world), &delegate),
                        Err(_) => warn!(delegator = %delegator, "delegator busy; completion dropped"),
                    }
                }
            }
        }
        processed
    }

    /// Run one `update` on `behavior` if it is in the chain. Returns `true`
    /// if the update ran.
    pub fn update_behavior(&self, world: &dyn WorldView, behavior: &BehaviorId) -> bool {
        if !self.is_activated(behavior) {
            return false;
        }
        let Some(handle) = self.registry.get(behavior) else {
            return false;
        };
        match handle.try_borrow_mut() {
            Ok(mut b) => {
                b.update(&self.context(world));
                true
            }
            Err(_) => {
                warn!(behavior = %behavior, "behavior busy; update skipped");
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::behavior::Behavior;
    use crate::world::SimWorld;

    type Journal = Rc<RefCell<Vec<String>>>;

    /// Leaf that journals its lifecycle and can delegate to a fixed child
    /// from `on_activated` or end itself from `update`.
    struct Probe {
        id: BehaviorId,
        journal: Journal,
        child_on_activate: Option<BehaviorId>,
        end_on_update: Rc<Cell<bool>>,
        gentle: bool,
        completions: Vec<BehaviorId>,
    }

    impl Probe {
        fn new(id: &str, journal: &Journal) -> Self {
            Self {
                id: BehaviorId::new(id),
                journal: Rc::clone(journal),
                child_on_activate: None,
                end_on_update: Rc::new(Cell::new(false)),
                gentle: true,
                completions: Vec::new(),
            }
        }
    }

    impl Behavior for Probe {
        fn id(&self) -> &BehaviorId {
            &self.id
        }
        fn wants_to_be_activated(&self, _ctx: &BehaviorContext<'_>) -> bool {
            true
        }
        fn on_activated(&mut self, ctx: &BehaviorContext<'_>) {
            self.journal.borrow_mut().push(format!("+{}", self.id));
            if let Some(child) = &self.child_on_activate {
                ctx.delegate(&self.id, child).unwrap();
            }
        }
        fn on_deactivated(&mut self, _ctx: &BehaviorContext<'_>) {
            self.journal.borrow_mut().push(format!("-{}", self.id));
        }
        fn update(&mut self, ctx: &BehaviorContext<'_>) {
            if self.end_on_update.get() {
                ctx.end(&self.id);
            }
        }
        fn can_be_gently_interrupted_now(&self, _ctx: &BehaviorContext<'_>) -> bool {
            self.gentle
        }
        fn on_delegate_completed(&mut self, _ctx: &BehaviorContext<'_>, delegate: &BehaviorId) {
            self.completions.push(delegate.clone());
        }
    }

    fn id(s: &str) -> BehaviorId {
        BehaviorId::new(s)
    }

    fn setup(names: &[&str]) -> (ControlAuthority, Journal) {
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        for name in names {
            reg.register(Probe::new(name, &journal)).unwrap();
        }
        (ControlAuthority::new(reg), journal)
    }

    #[test]
    fn delegate_builds_a_simple_chain() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a", "b"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.delegate(&world, &id("a"), &id("b")).unwrap();

        assert_eq!(auth.chain(), vec![id("root"), id("a"), id("b")]);
        assert!(auth.is_control_delegated(&id("a")));
        assert!(!auth.is_control_delegated(&id("b")));
        assert_eq!(auth.delegate_of(&id("root")), Some(id("a")));
        assert_eq!(auth.delegator_of(&id("b")), Some(id("a")));
        assert_eq!(*journal.borrow(), ["+root", "+a", "+b"]);
        assert!(auth.is_consistent());
    }

    #[test]
    fn second_root_is_rejected() {
        let world = SimWorld::new();
        let (auth, _) = setup(&["root", "other"]);
        auth.activate_root(&world, &id("root")).unwrap();
        assert_eq!(
            auth.activate_root(&world, &id("other")),
            Err(ArbitrationError::ChainOccupied { root: id("root") })
        );
    }

    #[test]
    fn inactive_parent_cannot_delegate() {
        let world = SimWorld::new();
        let (auth, _) = setup(&["root", "a", "b"]);
        auth.activate_root(&world, &id("root")).unwrap();
        assert_eq!(
            auth.delegate(&world, &id("a"), &id("b")),
            Err(ArbitrationError::NotInControl { behavior: id("a") })
        );
    }

    #[test]
    fn behavior_owned_by_other_delegator_is_rejected() {
        let world = SimWorld::new();
        let (auth, _) = setup(&["root", "a", "b"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.delegate(&world, &id("a"), &id("b")).unwrap();

        // root tries to grab b, which a already holds
        let err = auth.delegate(&world, &id("root"), &id("b")).unwrap_err();
        assert_eq!(
            err,
            ArbitrationError::AlreadyDelegatedByOther {
                behavior: id("b"),
                owner: Some(id("a")),
            }
        );
        // chain untouched
        assert_eq!(auth.chain(), vec![id("root"), id("a"), id("b")]);

        // delegating to an ancestor is the same conflict
        let err = auth.delegate(&world, &id("b"), &id("root")).unwrap_err();
        assert!(matches!(err, ArbitrationError::AlreadyDelegatedByOther { owner: None, .. }));
    }

    #[test]
    fn unknown_child_is_rejected() {
        let world = SimWorld::new();
        let (auth, _) = setup(&["root"]);
        auth.activate_root(&world, &id("root")).unwrap();
        assert_eq!(
            auth.delegate(&world, &id("root"), &id("ghost")),
            Err(ArbitrationError::UnknownBehavior(id("ghost")))
        );
    }

    #[test]
    fn redelegating_replaces_the_suffix() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a", "b", "c"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.delegate(&world, &id("a"), &id("b")).unwrap();
        journal.borrow_mut().clear();

        auth.delegate(&world, &id("root"), &id("c")).unwrap();
        assert_eq!(auth.chain(), vec![id("root"), id("c")]);
        assert_eq!(*journal.borrow(), ["-b", "-a", "+c"]);
    }

    #[test]
    fn redelegating_same_child_restarts_it() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        assert_eq!(auth.chain(), vec![id("root"), id("a")]);
        assert_eq!(*journal.borrow(), ["+root", "+a", "-a", "+a"]);
    }

    #[test]
    fn cancel_is_innermost_first() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a", "b", "c"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.delegate(&world, &id("a"), &id("b")).unwrap();
        auth.delegate(&world, &id("b"), &id("c")).unwrap();
        journal.borrow_mut().clear();

        assert!(auth.cancel_delegates(&world, &id("a"), true));
        assert_eq!(*journal.borrow(), ["-c", "-b"]);
        assert_eq!(auth.chain(), vec![id("root"), id("a")]);

        // nothing left below a
        assert!(!auth.cancel_delegates(&world, &id("a"), true));
    }

    #[test]
    fn nested_delegation_from_on_activated() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        reg.register(Probe::new("root", &journal)).unwrap();
        let mut outer = Probe::new("outer", &journal);
        outer.child_on_activate = Some(id("inner"));
        reg.register(outer).unwrap();
        reg.register(Probe::new("inner", &journal)).unwrap();
        let auth = ControlAuthority::new(reg);

        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("outer")).unwrap();
        assert_eq!(auth.chain(), vec![id("root"), id("outer"), id("inner")]);
        assert_eq!(*journal.borrow(), ["+root", "+outer", "+inner"]);
    }

    #[test]
    fn completion_is_deferred_and_delivered_on_end() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        let root = reg.register(Probe::new("root", &journal)).unwrap();
        let leaf = Probe::new("leaf", &journal);
        let end_flag = Rc::clone(&leaf.end_on_update);
        reg.register(leaf).unwrap();
        let auth = ControlAuthority::new(reg);

        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate_with_completion(&world, &id("root"), &id("leaf"))
            .unwrap();

        end_flag.set(true);
        assert!(auth.update_behavior(&world, &id("leaf")));
        // still in the chain until the queue is drained
        assert!(auth.is_activated(&id("leaf")));
        assert!(root.borrow().completions.is_empty());

        auth.process_pending(&world);
        assert_eq!(auth.chain(), vec![id("root")]);
        assert_eq!(root.borrow().completions, vec![id("leaf")]);
        assert_eq!(journal.borrow().last().map(String::as_str), Some("-leaf"));
    }

    #[test]
    fn cancel_without_callbacks_suppresses_completion() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        let root = reg.register(Probe::new("root", &journal)).unwrap();
        reg.register(Probe::new("leaf", &journal)).unwrap();
        let auth = ControlAuthority::new(reg);

        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate_with_completion(&world, &id("root"), &id("leaf"))
            .unwrap();
        auth.cancel_delegates(&world, &id("root"), false);
        auth.process_pending(&world);

        assert!(root.borrow().completions.is_empty());
        // on_deactivated still ran
        assert!(journal.borrow().contains(&"-leaf".to_string()));
    }

    #[test]
    fn cancel_with_callbacks_reports_completion() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        let root = reg.register(Probe::new("root", &journal)).unwrap();
        reg.register(Probe::new("leaf", &journal)).unwrap();
        let auth = ControlAuthority::new(reg);

        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate_with_completion(&world, &id("root"), &id("leaf"))
            .unwrap();
        auth.cancel_delegates(&world, &id("root"), true);
        assert_eq!(auth.process_pending(&world), 1);
        assert_eq!(root.borrow().completions, vec![id("leaf")]);
    }

    #[test]
    fn plain_delegate_does_not_notify() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        let root = reg.register(Probe::new("root", &journal)).unwrap();
        reg.register(Probe::new("leaf", &journal)).unwrap();
        let auth = ControlAuthority::new(reg);

        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("leaf")).unwrap();
        auth.request_end(&id("leaf"));
        auth.process_pending(&world);
        assert!(root.borrow().completions.is_empty());
        assert_eq!(auth.chain(), vec![id("root")]);
    }

    #[test]
    fn ending_the_root_clears_the_chain() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();
        auth.request_end(&id("root"));
        auth.process_pending(&world);
        assert!(auth.chain().is_empty());
        assert_eq!(*journal.borrow(), ["+root", "+a", "-a", "-root"]);
    }

    #[test]
    fn busy_behavior_deactivation_is_deferred() {
        let world = SimWorld::new();
        let (auth, journal) = setup(&["root", "a"]);
        auth.activate_root(&world, &id("root")).unwrap();
        auth.delegate(&world, &id("root"), &id("a")).unwrap();

        let handle = auth.registry().get(&id("a")).unwrap();
        {
            let _busy = handle.borrow_mut();
            auth.cancel_delegates(&world, &id("root"), true);
            // removed from the chain, but on_deactivated has not run yet
            assert!(!auth.is_activated(&id("a")));
            assert!(!journal.borrow().contains(&"-a".to_string()));
        }
        auth.process_pending(&world);
        assert!(journal.borrow().contains(&"-a".to_string()));
    }

    #[test]
    fn gentle_hint_is_read_from_the_behavior() {
        let world = SimWorld::new();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mut reg = BehaviorRegistry::new();
        let mut stubborn = Probe::new("stubborn", &journal);
        stubborn.gentle = false;
        reg.register(stubborn).unwrap();
        reg.register(Probe::new("easy", &journal)).unwrap();
        let auth = ControlAuthority::new(reg);

        assert!(!auth.can_be_gently_interrupted(&world, &id("stubborn")));
        assert!(auth.can_be_gently_interrupted(&world, &id("easy")));
        assert!(!auth.can_be_gently_interrupted(&world, &id("ghost")));
    }

    #[test]
    fn update_skips_inactive_behaviors() {
        let world = SimWorld::new();
        let (auth, _) = setup(&["root", "a"]);
        assert!(!auth.update_behavior(&world, &id("root")));
        auth.activate_root(&world, &id("root")).unwrap();
        assert!(auth.update_behavior(&world, &id("root")));
        assert!(!auth.update_behavior(&world, &id("a")));
    }
}
