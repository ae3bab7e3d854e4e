//! The [`Behavior`] capability contract.
//!
//! A behavior is a unit of conduct that can request and hold control. It is
//! constructed once, registered in a [`BehaviorRegistry`], and may be
//! activated and deactivated any number of times. Whether it is currently
//! active, or has delegated further down the chain, is never stored on the
//! behavior itself: ask the [`ControlAuthority`] through the
//! [`BehaviorContext`].
//!
//! Behaviors never fail loudly. Inability to proceed is expressed by
//! returning `false` from [`Behavior::wants_to_be_activated`] or by ending
//! ([`BehaviorContext::end`]); the delegator decides what happens next.
//!
//! [`BehaviorRegistry`]: crate::registry::BehaviorRegistry

use std::collections::BTreeSet;

use arbiter_types::{ArbiterError, ArbitrationError, BehaviorId};

use crate::control_authority::ControlAuthority;
use crate::world::WorldView;

/// Everything a behavior may touch during a call: the world facade and the
/// control authority.
#[derive(Clone, Copy)]
pub struct BehaviorContext<'a> {
    world: &'a dyn WorldView,
    authority: &'a ControlAuthority,
}

impl<'a> BehaviorContext<'a> {
    pub fn new(world: &'a dyn WorldView, authority: &'a ControlAuthority) -> Self {
        Self { world, authority }
    }

    pub fn world(&self) -> &'a dyn WorldView {
        self.world
    }

    pub fn authority(&self) -> &'a ControlAuthority {
        self.authority
    }

    /// Hand control from `parent` to `child`.
    pub fn delegate(&self, parent: &BehaviorId, child: &BehaviorId) -> Result<(), ArbitrationError> {
        self.authority.delegate(self.world, parent, child)
    }

    /// Like [`delegate`][Self::delegate], and have `parent` notified through
    /// [`Behavior::on_delegate_completed`] when `child` ends.
    pub fn delegate_with_completion(
        &self,
        parent: &BehaviorId,
        child: &BehaviorId,
    ) -> Result<(), ArbitrationError> {
        self.authority
            .delegate_with_completion(self.world, parent, child)
    }

    /// Cancel everything below `parent`. Returns `true` if anything was
    /// removed.
    pub fn cancel_delegates(&self, parent: &BehaviorId, run_callbacks: bool) -> bool {
        self.authority
            .cancel_delegates(self.world, parent, run_callbacks)
    }

    /// Ask for `behavior` to be ended. Takes effect once the current call
    /// returns to the scheduler.
    pub fn end(&self, behavior: &BehaviorId) {
        self.authority.request_end(behavior);
    }

    pub fn is_activated(&self, behavior: &BehaviorId) -> bool {
        self.authority.is_activated(behavior)
    }

    pub fn is_control_delegated(&self, behavior: &BehaviorId) -> bool {
        self.authority.is_control_delegated(behavior)
    }

    pub fn delegate_of(&self, behavior: &BehaviorId) -> Option<BehaviorId> {
        self.authority.delegate_of(behavior)
    }

    pub fn wants_to_be_activated(&self, behavior: &BehaviorId) -> bool {
        self.authority.wants_to_be_activated(self.world, behavior)
    }

    pub fn can_be_gently_interrupted(&self, behavior: &BehaviorId) -> bool {
        self.authority
            .can_be_gently_interrupted(self.world, behavior)
    }

    pub fn is_registered(&self, behavior: &BehaviorId) -> bool {
        self.authority.registry().contains(behavior)
    }
}

/// A polymorphic unit of conduct.
///
/// Implementations hold their own config and mutable state and implement
/// this trait directly; there is no base class.
pub trait Behavior {
    /// Stable identity, unique within a registry.
    fn id(&self) -> &BehaviorId;

    fn debug_label(&self) -> String {
        self.id().to_string()
    }

    /// Resolve references once at startup. An error here aborts startup.
    fn init(&mut self, _ctx: &BehaviorContext<'_>) -> Result<(), ArbiterError> {
        Ok(())
    }

    /// Pure query, callable at any time while not active.
    fn wants_to_be_activated(&self, ctx: &BehaviorContext<'_>) -> bool;

    fn on_activated(&mut self, ctx: &BehaviorContext<'_>);

    fn on_deactivated(&mut self, ctx: &BehaviorContext<'_>);

    /// Called once per tick while active.
    fn update(&mut self, ctx: &BehaviorContext<'_>);

    /// Every behavior this one might hand control to.
    fn delegates(&self) -> BTreeSet<BehaviorId> {
        BTreeSet::new()
    }

    /// Whether it is safe to redirect this behavior right now without
    /// letting its current micro-action finish.
    fn can_be_gently_interrupted_now(&self, _ctx: &BehaviorContext<'_>) -> bool {
        true
    }

    /// A delegate started with
    /// [`BehaviorContext::delegate_with_completion`] has ended.
    fn on_delegate_completed(&mut self, _ctx: &BehaviorContext<'_>, _delegate: &BehaviorId) {}
}
