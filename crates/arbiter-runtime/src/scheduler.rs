//! [`BehaviorSystem`] – the tick-driven scheduler.
//!
//! One tick walks the control chain root-first and calls `update` on each
//! behavior in turn. After every call the authority's deferred queue is
//! drained, so a behavior that ended itself or delegated during its update
//! has its effects applied before the next link is visited. The walk always
//! reads the live chain: links replaced by an update are not visited, links
//! added by it are.
//!
//! The scheduler never touches the clock. With [`SimWorld`] the caller
//! advances time between ticks, which keeps replays deterministic.
//!
//! [`SimWorld`]: arbiter_kernel::SimWorld

use arbiter_kernel::{BehaviorRegistry, ControlAuthority, WorldView};
use arbiter_types::{ArbiterError, ArbitrationError, BehaviorId};
use tracing::{debug, error, info};

// ─────────────────────────────────────────────────────────────────────────────
// TickReport
// ─────────────────────────────────────────────────────────────────────────────

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Number of behaviors whose `update` ran.
    pub updated: usize,
    /// The chain after the tick, root first.
    pub chain: Vec<BehaviorId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BehaviorSystem
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the control authority and drives it one tick at a time.
pub struct BehaviorSystem {
    authority: ControlAuthority,
    root: BehaviorId,
    ticks: u64,
}

impl BehaviorSystem {
    /// Take ownership of `registry` and initialize every behavior.
    ///
    /// # Errors
    ///
    /// - [`ArbitrationError::UnknownBehavior`] if `root` is not registered.
    /// - Any configuration error raised by a behavior's `init`.
    pub fn new(
        registry: BehaviorRegistry,
        root: impl Into<BehaviorId>,
        world: &dyn WorldView,
    ) -> Result<Self, ArbiterError> {
        let root = root.into();
        if !registry.contains(&root) {
            return Err(ArbitrationError::UnknownBehavior(root).into());
        }
        let authority = ControlAuthority::new(registry);
        authority.init_behaviors(world)?;
        Ok(Self {
            authority,
            root,
            ticks: 0,
        })
    }

    pub fn authority(&self) -> &ControlAuthority {
        &self.authority
    }

    pub fn root(&self) -> &BehaviorId {
        &self.root
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// `true` while the root holds control.
    pub fn is_running(&self) -> bool {
        self.authority.root().as_ref() == Some(&self.root)
    }

    /// Activate the root behavior.
    pub fn start(&mut self, world: &dyn WorldView) -> Result<(), ArbitrationError> {
        self.authority.activate_root(world, &self.root)?;
        self.authority.process_pending(world);
        Ok(())
    }

    /// Run one scheduler tick.
    pub fn tick(&mut self, world: &dyn WorldView) -> TickReport {
        self.ticks += 1;
        let mut updated = 0;
        let mut index = 0;
        while let Some(behavior) = self.authority.chain_at(index) {
            if self.authority.update_behavior(world, &behavior) {
                updated += 1;
            }
            self.authority.process_pending(world);
            index += 1;
        }

        if !self.authority.is_consistent() {
            error!(tick = self.ticks, chain = ?self.authority.chain(), "control chain invariant violated");
        }

        let chain = self.authority.chain();
        debug!(tick = self.ticks, updated, depth = chain.len(), "tick complete");
        TickReport {
            tick: self.ticks,
            updated,
            chain,
        }
    }

    /// Tear down the whole chain.
    pub fn shutdown(&mut self, world: &dyn WorldView) {
        self.authority.deactivate_all(world);
        self.authority.process_pending(world);
        info!(ticks = self.ticks, "behavior system stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
