//! Replay scenarios – reads scenario TOML files.
//!
//! A scenario bundles one state machine, the scripted leaf behaviors its
//! states delegate to, the named strategies its transitions reference, and a
//! timeline of world changes keyed by tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use arbiter_types::{BehaviorId, ConditionConfig, RobotState, StateMachineConfig};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_ticks`, from the file or the environment.
pub const MAX_TICKS: u64 = 1_000_000;

/// A complete replay script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Simulated time between ticks.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Number of ticks to run.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Behavior id of the state machine, which is also the root.
    #[serde(default = "default_machine_id")]
    pub machine_id: BehaviorId,

    pub machine: StateMachineConfig,

    /// Named strategies referenced by transitions.
    #[serde(default)]
    pub strategies: BTreeMap<String, ConditionConfig>,

    #[serde(default)]
    pub behaviors: Vec<ScriptedBehaviorConfig>,

    #[serde(default)]
    pub initial_robot: RobotState,

    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

/// A leaf behavior driven by the script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedBehaviorConfig {
    pub id: BehaviorId,

    #[serde(default = "default_true")]
    pub wants_to_be_activated: bool,

    /// End after this many updates. Runs until canceled when absent.
    #[serde(default)]
    pub runs_for_ticks: Option<u32>,

    #[serde(default = "default_true")]
    pub gentle: bool,
}

/// World changes applied just before tick `tick` runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub tick: u64,

    /// Replacement robot snapshot.
    #[serde(default)]
    pub robot: Option<RobotState>,

    /// Event tags to publish.
    #[serde(default)]
    pub events: Vec<String>,

    /// Pending event tags to clear.
    #[serde(default)]
    pub clear_events: Vec<String>,

    /// Override `wants_to_be_activated` of scripted behaviors.
    #[serde(default)]
    pub wants: BTreeMap<BehaviorId, bool>,

    /// Override the gentle-interruption hint of scripted behaviors.
    #[serde(default)]
    pub gentle: BTreeMap<BehaviorId, bool>,

    /// Debug transition for the machine.
    #[serde(default)]
    pub force_state: Option<String>,
}

fn default_tick_ms() -> u64 {
    100
}
fn default_max_ticks() -> u64 {
    50
}
fn default_machine_id() -> BehaviorId {
    BehaviorId::new("Machine")
}
fn default_true() -> bool {
    true
}

/// Load a scenario from a TOML file and apply environment overrides.
pub fn load_from(path: &Path) -> Result<Scenario, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read scenario at {}: {e}", path.display()))?;
    let mut scenario = parse(&raw)?;
    apply_env_overrides(&mut scenario);
    Ok(scenario)
}

/// Parse scenario TOML.
pub fn parse(raw: &str) -> Result<Scenario, String> {
    let scenario: Scenario =
        toml::from_str(raw).map_err(|e| format!("Failed to parse scenario: {e}"))?;
    if scenario.tick_ms == 0 {
        return Err("tick_ms must be greater than zero".to_string());
    }
    if scenario.max_ticks > MAX_TICKS {
        return Err(format!(
            "max_ticks {} exceeds the limit of {MAX_TICKS}",
            scenario.max_ticks
        ));
    }
    Ok(scenario)
}

/// Apply `ARBITER_*` environment variable overrides to `scenario`.
///
/// | Variable | Field |
/// |---|---|
/// | `ARBITER_TICK_MS` | `tick_ms` |
/// | `ARBITER_MAX_TICKS` | `max_ticks` |
///
/// Unparseable values and tick counts above [`MAX_TICKS`] are ignored.
pub fn apply_env_overrides(scenario: &mut Scenario) {
    if let Ok(v) = std::env::var("ARBITER_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
        && ms > 0
    {
        scenario.tick_ms = ms;
    }
    if let Ok(v) = std::env::var("ARBITER_MAX_TICKS")
        && let Ok(n) = v.parse::<u64>()
        && n <= MAX_TICKS
    {
        scenario.max_ticks = n;
    }
}

/// Load a bare state machine config, JSON or TOML by file extension.
pub fn load_machine(path: &Path) -> Result<StateMachineConfig, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw).map_err(|e| format!("Failed to parse TOML: {e}")),
        _ => serde_json::from_str(&raw).map_err(|e| format!("Failed to parse JSON: {e}")),
    }
}
