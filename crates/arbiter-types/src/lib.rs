//! `arbiter-types` – shared vocabulary of the behavior arbitration engine.
//!
//! Everything that crosses a crate boundary lives here: behavior identities,
//! the read-only robot snapshot exposed by the world facade, world events,
//! the configuration shapes a state machine is built from, and the error
//! taxonomy.

pub mod config;
pub mod error;

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use config::{
    ConditionConfig, ConditionSpec, FromStates, StateConfig, StateMachineConfig,
    StateTimerConditionConfig, TransitionConfig, TransitionDefinition,
};
pub use error::{ArbiterError, ArbitrationError, ConfigError};

/// Stable identity of a behavior, unique within one registry.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct BehaviorId(String);

impl BehaviorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BehaviorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BehaviorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Planar robot pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pose {
    pub x_mm: f32,
    pub y_mm: f32,
    pub heading_rad: f32,
}

/// Read-only robot snapshot served by the world facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RobotState {
    pub pose: Pose,
    pub battery_percent: u8,
    pub on_charger: bool,
    pub cliff_detected: bool,
    pub carrying_object: bool,
    pub picked_up: bool,
}

impl Default for RobotState {
    fn default() -> Self {
        Self {
            pose: Pose::default(),
            battery_percent: 100,
            on_charger: false,
            cliff_detected: false,
            carrying_object: false,
            picked_up: false,
        }
    }
}

/// Tagged event delivered by the world's event source (vision, audio,
/// user intents, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WorldEvent {
    /// e.g. `"face_seen"`, `"trigger_word"`.
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl WorldEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An expensive world-observation mode a condition depends on (e.g. a vision
/// mode). Requested from the world while the owning state is active so the
/// subsystem is warm before the condition is evaluated.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ObservationRequirement(String);

impl ObservationRequirement {
    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Optional per-state debug annotation, shown on the backpack lights in
/// debug builds and in replay traces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugColor {
    #[default]
    Black,
    White,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    Orange,
}

/// The three priority classes of state-to-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Evaluated first, every tick, and may preempt a running delegate.
    Interrupting,
    /// Evaluated only when nothing is delegated or the delegate can be
    /// gently interrupted.
    NonInterrupting,
    /// Evaluated only when nothing is delegated.
    Exit,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Interrupting => write!(f, "interrupting"),
            TransitionKind::NonInterrupting => write!(f, "non_interrupting"),
            TransitionKind::Exit => write!(f, "exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_id_is_transparent_in_json() {
        let id = BehaviorId::new("DriveOffCharger");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"DriveOffCharger\"");
        assert_eq!(id.to_string(), "DriveOffCharger");
    }

    #[test]
    fn robot_state_defaults_to_full_battery() {
        let state = RobotState::default();
        assert_eq!(state.battery_percent, 100);
        assert!(!state.on_charger);
    }

    #[test]
    fn robot_state_partial_toml_fills_defaults() {
        let state: RobotState = toml::from_str("on_charger = true").unwrap();
        assert!(state.on_charger);
        assert_eq!(state.battery_percent, 100);
        assert_eq!(state.pose, Pose::default());
    }

    #[test]
    fn debug_color_uses_upper_case_names() {
        let c: DebugColor = serde_json::from_str("\"MAGENTA\"").unwrap();
        assert_eq!(c, DebugColor::Magenta);
    }

    #[test]
    fn world_event_attributes() {
        let ev = WorldEvent::new("face_seen").with_attribute("face_id", "7");
        assert_eq!(ev.tag, "face_seen");
        assert_eq!(ev.attributes.get("face_id").map(String::as_str), Some("7"));
    }

    #[test]
    fn transition_kind_display() {
        assert_eq!(TransitionKind::NonInterrupting.to_string(), "non_interrupting");
    }
}
