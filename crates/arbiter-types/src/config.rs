//! Configuration shapes for state machines and their transition conditions.
//!
//! These mirror the JSON layout the behavior system is authored in. Field
//! names are snake_case; the camelCase spellings used by older behavior
//! files are accepted as aliases.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{BehaviorId, DebugColor};

/// Complete description of one state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StateMachineConfig {
    #[serde(alias = "initialState")]
    pub initial_state: String,

    pub states: Vec<StateConfig>,

    #[serde(default, alias = "transitionDefinitions")]
    pub transition_definitions: Vec<TransitionDefinition>,

    /// When the machine is re-activated while holding state `key`, resume in
    /// state `value` instead.
    #[serde(default, alias = "resumeReplacements")]
    pub resume_replacements: BTreeMap<String, String>,

    /// Named conditions that become true once the current state has been
    /// active for `begin_s` seconds.
    #[serde(default, alias = "stateTimerConditions")]
    pub state_timer_conditions: Vec<StateTimerConditionConfig>,

    /// Suppress the "state is never targeted by a transition" warning.
    #[serde(default, alias = "ignoreMissingTransitions")]
    pub ignore_missing_transitions: bool,

    /// Played on state entry while the robot carries an object, unless the
    /// state allows carrying. No transition is evaluated while it runs.
    #[serde(default, alias = "putDownBehavior")]
    pub put_down_behavior: Option<BehaviorId>,
}

/// One named state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StateConfig {
    pub name: String,

    /// Behavior delegated to while the state is active.
    #[serde(default, alias = "behaviorId")]
    pub behavior: Option<BehaviorId>,

    /// Behavior played once on a fresh entry, before `behavior`.
    #[serde(default, alias = "getInBehavior")]
    pub get_in_behavior: Option<BehaviorId>,

    /// A state with no behavior ends the whole machine when entered.
    #[serde(default, alias = "cancelSelf")]
    pub cancel_self: bool,

    #[serde(default, alias = "debugColor")]
    pub debug_color: Option<DebugColor>,

    /// Pending world event (by tag) to discard when the state is entered.
    #[serde(default, alias = "clearEventOnEntry")]
    pub clear_event_on_entry: Option<String>,

    /// The state's behaviors may run while the robot carries an object.
    #[serde(default, alias = "allowWhileCarrying")]
    pub allow_while_carrying: bool,
}

impl StateConfig {
    /// A plain state bound to `behavior`.
    pub fn new(name: impl Into<String>, behavior: impl Into<BehaviorId>) -> Self {
        Self {
            name: name.into(),
            behavior: Some(behavior.into()),
            get_in_behavior: None,
            cancel_self: false,
            debug_color: None,
            clear_event_on_entry: None,
            allow_while_carrying: false,
        }
    }

    /// A state that ends the machine.
    pub fn cancel_self(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: None,
            get_in_behavior: None,
            cancel_self: true,
            debug_color: None,
            clear_event_on_entry: None,
            allow_while_carrying: false,
        }
    }
}

/// `"from": "A"` or `"from": ["A", "B"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FromStates {
    One(String),
    Many(Vec<String>),
}

impl FromStates {
    pub fn names(&self) -> &[String] {
        match self {
            FromStates::One(name) => std::slice::from_ref(name),
            FromStates::Many(names) => names,
        }
    }
}

/// Every transition leaving the `from` states, grouped by priority class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionDefinition {
    pub from: FromStates,

    #[serde(default, alias = "interruptingTransitions")]
    pub interrupting_transitions: Vec<TransitionConfig>,

    #[serde(default, alias = "nonInterruptingTransitions")]
    pub non_interrupting_transitions: Vec<TransitionConfig>,

    #[serde(default, alias = "exitTransitions")]
    pub exit_transitions: Vec<TransitionConfig>,
}

/// A single guarded edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionConfig {
    pub to: String,
    pub condition: ConditionSpec,

    /// World event tag published when this transition fires.
    #[serde(default, alias = "emitEvent", skip_serializing_if = "Option::is_none")]
    pub emit_event: Option<String>,
}

impl TransitionConfig {
    pub fn new(to: impl Into<String>, condition: impl Into<ConditionSpec>) -> Self {
        Self {
            to: to.into(),
            condition: condition.into(),
            emit_event: None,
        }
    }
}

/// Either the name of a predefined strategy registered in code, or an inline
/// condition description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ConditionSpec {
    Named(String),
    Inline(ConditionConfig),
}

impl From<ConditionConfig> for ConditionSpec {
    fn from(config: ConditionConfig) -> Self {
        ConditionSpec::Inline(config)
    }
}

impl From<String> for ConditionSpec {
    fn from(name: String) -> Self {
        ConditionSpec::Named(name)
    }
}

impl From<&str> for ConditionSpec {
    fn from(name: &str) -> Self {
        ConditionSpec::Named(name.to_string())
    }
}

/// `{ "name": "...", "begin_s": 4.0 }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StateTimerConditionConfig {
    pub name: String,
    pub begin_s: f64,
}

fn default_true() -> bool {
    true
}

/// Built-in condition types, tagged by `conditionType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "conditionType")]
pub enum ConditionConfig {
    TrueCondition,
    FalseCondition,
    OnCharger,
    BatteryBelow {
        percent: u8,
    },
    CliffDetected,
    CarryingObject,
    /// Seconds since the condition was last activated, in `[begin_s, end_s)`.
    TimerInRange {
        begin_s: f64,
        #[serde(default)]
        end_s: Option<f64>,
    },
    /// An event with this tag arrived since the condition was activated.
    EventReceived {
        event: String,
    },
    /// The world holds an unconsumed event with this tag.
    EventPending {
        event: String,
    },
    /// The owning machine's current state has been active this long.
    TimeInState {
        at_least_s: f64,
    },
    StateExitCooldown {
        state: String,
        cooldown_s: f64,
        #[serde(default = "default_true")]
        value_if_never_run: bool,
    },
    /// Exactly one of `and`, `or`, `not` must be present.
    Compound {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        and: Option<Vec<ConditionConfig>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        or: Option<Vec<ConditionConfig>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not: Option<Box<ConditionConfig>>,
    },
}

impl ConditionConfig {
    /// Short label used for condition debug names.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConditionConfig::TrueCondition => "TrueCondition",
            ConditionConfig::FalseCondition => "FalseCondition",
            ConditionConfig::OnCharger => "OnCharger",
            ConditionConfig::BatteryBelow { .. } => "BatteryBelow",
            ConditionConfig::CliffDetected => "CliffDetected",
            ConditionConfig::CarryingObject => "CarryingObject",
            ConditionConfig::TimerInRange { .. } => "TimerInRange",
            ConditionConfig::EventReceived { .. } => "EventReceived",
            ConditionConfig::EventPending { .. } => "EventPending",
            ConditionConfig::TimeInState { .. } => "TimeInState",
            ConditionConfig::StateExitCooldown { .. } => "StateExitCooldown",
            ConditionConfig::Compound { .. } => "Compound",
        }
    }
}
