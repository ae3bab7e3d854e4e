//! `arbiter-runtime` – the behavior arbitration engine.
//!
//! Builds on the [`arbiter_kernel`] control authority to provide
//! condition-guarded hierarchical state machines and the scheduler that
//! drives them.
//!
//! # Modules
//!
//! - [`condition`] – the [`Condition`][condition::Condition] trait, its arena
//!   slot, and the built-in conditions (robot-state predicates, timers,
//!   event latches, cooldowns, boolean compounds, closures).
//! - [`condition_factory`] – [`ConditionFactory`][condition_factory::ConditionFactory]:
//!   builds conditions from their serialized configuration.
//! - [`history`] – [`StateHistory`][history::StateHistory]: per-machine
//!   entry/exit times, cooldowns and pause-adjusted time in state.
//! - [`state_machine`] – [`StateMachine`][state_machine::StateMachine] and
//!   its validating [`StateMachineBuilder`][state_machine::StateMachineBuilder].
//!   Each state delegates to one behavior and owns interrupting,
//!   non-interrupting and exit transitions, evaluated in that priority.
//! - [`scheduler`] – [`BehaviorSystem`][scheduler::BehaviorSystem]:
//!   initializes every registered behavior and ticks the control chain.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP exporter.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use arbiter_kernel::{BehaviorRegistry, SimWorld};
//! use arbiter_runtime::{BehaviorSystem, StateMachineBuilder};
//! use arbiter_types::StateMachineConfig;
//! # use arbiter_kernel::{Behavior, BehaviorContext};
//! # use arbiter_types::BehaviorId;
//! # struct Idle(BehaviorId);
//! # impl Behavior for Idle {
//! #     fn id(&self) -> &BehaviorId { &self.0 }
//! #     fn wants_to_be_activated(&self, _: &BehaviorContext<'_>) -> bool { true }
//! #     fn on_activated(&mut self, _: &BehaviorContext<'_>) {}
//! #     fn on_deactivated(&mut self, _: &BehaviorContext<'_>) {}
//! #     fn update(&mut self, _: &BehaviorContext<'_>) {}
//! # }
//!
//! let config: StateMachineConfig = serde_json::from_str(r#"{
//!     "initial_state": "Idle",
//!     "states": [{ "name": "Idle", "behavior": "LookAround" }],
//!     "transition_definitions": [{
//!         "from": "Idle",
//!         "exit_transitions": [{ "to": "Idle", "condition": { "conditionType": "TrueCondition" } }]
//!     }]
//! }"#).unwrap();
//!
//! let mut registry = BehaviorRegistry::new();
//! registry.register(StateMachineBuilder::new("Freeplay", config).build().unwrap()).unwrap();
//! registry.register(Idle("LookAround".into())).unwrap();
//!
//! let world = SimWorld::new();
//! let mut system = BehaviorSystem::new(registry, "Freeplay", &world).unwrap();
//! system.start(&world).unwrap();
//!
//! world.advance(Duration::from_millis(50));
//! let report = system.tick(&world);
//! assert_eq!(report.chain.len(), 2);
//! ```

pub mod condition;
pub mod condition_factory;
pub mod history;
pub mod scheduler;
pub mod state_machine;
pub mod telemetry;

pub use condition::{Condition, ConditionContext, ConditionLambda};
pub use condition_factory::ConditionFactory;
pub use history::StateHistory;
pub use scheduler::{BehaviorSystem, TickReport};
pub use state_machine::{
    ConditionInfo, EntryReason, StateMachine, StateMachineBuilder, TransitionRecord,
};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
