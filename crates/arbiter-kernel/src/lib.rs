//! `arbiter-kernel` – Control Arbitration
//!
//! The brainstem of the behavior system. It does not decide what the robot
//! should do; it enforces who is allowed to do it.
//!
//! # Modules
//!
//! - [`world`] – [`WorldView`][world::WorldView]: the read-only world/sensor
//!   facade injected into every tick, plus [`SimWorld`][world::SimWorld], a
//!   deterministic implementation with a scripted clock and a synchronous
//!   event hub.
//! - [`behavior`] – the [`Behavior`][behavior::Behavior] capability contract
//!   every concrete behavior implements, and the
//!   [`BehaviorContext`][behavior::BehaviorContext] threaded through every
//!   call.
//! - [`registry`] – [`BehaviorRegistry`][registry::BehaviorRegistry]: owns
//!   every behavior for the lifetime of the process, keyed by
//!   [`BehaviorId`][arbiter_types::BehaviorId].
//! - [`control_authority`] – [`ControlAuthority`][control_authority::ControlAuthority]:
//!   the single delegation chain. Guarantees that at most one chain of
//!   behaviors holds actuator control and that canceling is synchronous and
//!   innermost-first.

pub mod behavior;
pub mod control_authority;
pub mod registry;
pub mod world;

pub use behavior::{Behavior, BehaviorContext};
pub use control_authority::ControlAuthority;
pub use registry::{BehaviorHandle, BehaviorRegistry};
pub use world::{EventHandler, SimWorld, SubscriptionId, WorldView};
