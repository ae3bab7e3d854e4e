//! Deterministic scenario replay.
//!
//! Builds a registry holding the scenario's state machine and scripted leaf
//! behaviors, then drives it on a [`SimWorld`] whose clock advances by a
//! fixed step per tick. Identical scenarios always produce identical traces.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use arbiter_kernel::{Behavior, BehaviorContext, BehaviorRegistry, SimWorld, WorldView};
use arbiter_runtime::{
    BehaviorSystem, ConditionFactory, StateMachine, StateMachineBuilder, TransitionRecord,
};
use arbiter_types::{ArbiterError, BehaviorId, ConfigError, DebugColor, WorldEvent};
use serde::Serialize;
use tracing::{debug, info};

use crate::scenario::{Scenario, ScriptedBehaviorConfig, TimelineEntry};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted leaf
// ─────────────────────────────────────────────────────────────────────────────

/// Knobs the timeline can turn on a scripted behavior.
#[derive(Clone)]
struct Knobs {
    wants: Rc<Cell<bool>>,
    gentle: Rc<Cell<bool>>,
}

/// Leaf behavior whose hints come from the scenario and which optionally
/// ends itself after a fixed number of updates.
pub struct ScriptedBehavior {
    id: BehaviorId,
    knobs: Knobs,
    runs_for: Option<u32>,
    updates: u32,
}

impl ScriptedBehavior {
    fn new(config: &ScriptedBehaviorConfig) -> Self {
        Self {
            id: config.id.clone(),
            knobs: Knobs {
                wants: Rc::new(Cell::new(config.wants_to_be_activated)),
                gentle: Rc::new(Cell::new(config.gentle)),
            },
            runs_for: config.runs_for_ticks,
            updates: 0,
        }
    }
}

impl Behavior for ScriptedBehavior {
    fn id(&self) -> &BehaviorId {
        &self.id
    }

    fn wants_to_be_activated(&self, _ctx: &BehaviorContext<'_>) -> bool {
        self.knobs.wants.get()
    }

    fn on_activated(&mut self, _ctx: &BehaviorContext<'_>) {
        self.updates = 0;
    }

    fn on_deactivated(&mut self, _ctx: &BehaviorContext<'_>) {}

    fn update(&mut self, ctx: &BehaviorContext<'_>) {
        self.updates += 1;
        if self.runs_for.is_some_and(|n| self.updates >= n) {
            debug!(behavior = %self.id, updates = self.updates, "scripted behavior finished");
            ctx.end(&self.id);
        }
    }

    fn can_be_gently_interrupted_now(&self, _ctx: &BehaviorContext<'_>) -> bool {
        self.knobs.gentle.get()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trace
// ─────────────────────────────────────────────────────────────────────────────

/// Observable outcome of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickTrace {
    pub tick: u64,
    pub at_ms: u64,
    pub state: Option<String>,
    pub color: Option<DebugColor>,
    pub chain: Vec<String>,
    /// Transitions taken during this tick.
    pub transitions: Vec<TransitionRecord>,
}

/// Full replay output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayTrace {
    pub machine: String,
    /// Non-fatal configuration warnings.
    pub warnings: Vec<String>,
    /// Tick 0 is startup.
    pub ticks: Vec<TickTrace>,
}

impl ReplayTrace {
    /// Final state of the machine, if it still holds one.
    pub fn final_state(&self) -> Option<&str> {
        self.ticks.last().and_then(|t| t.state.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay
// ─────────────────────────────────────────────────────────────────────────────

/// A scenario wired up and ready to run.
pub struct Replay {
    world: SimWorld,
    system: BehaviorSystem,
    machine: Rc<RefCell<StateMachine>>,
    knobs: BTreeMap<BehaviorId, Knobs>,
    tick_ms: u64,
    max_ticks: u64,
    timeline: BTreeMap<u64, Vec<TimelineEntry>>,
}

impl Replay {
    /// Build the machine and every scripted behavior, and initialize the
    /// behavior system.
    ///
    /// # Errors
    ///
    /// Configuration problems in the machine, its strategies, or the
    /// timeline's references to behaviors.
    pub fn new(scenario: Scenario) -> Result<Self, ArbiterError> {
        let Scenario {
            tick_ms,
            max_ticks,
            machine_id,
            machine,
            strategies,
            behaviors,
            initial_robot,
            timeline,
        } = scenario;

        let state_names: BTreeSet<String> = machine.states.iter().map(|s| s.name.clone()).collect();
        let mut builder = StateMachineBuilder::new(machine_id.clone(), machine);
        for (name, config) in &strategies {
            builder = builder.with_boxed_strategy(name, ConditionFactory::create(config, &state_names)?);
        }
        let machine = builder.build()?;

        let mut registry = BehaviorRegistry::new();
        let machine = registry.register(machine)?;
        let mut knobs = BTreeMap::new();
        for config in &behaviors {
            let leaf = ScriptedBehavior::new(config);
            knobs.insert(config.id.clone(), leaf.knobs.clone());
            registry.register(leaf)?;
        }

        let mut by_tick: BTreeMap<u64, Vec<TimelineEntry>> = BTreeMap::new();
        for entry in timeline {
            for id in entry.wants.keys().chain(entry.gentle.keys()) {
                if !knobs.contains_key(id) {
                    return Err(ConfigError::UnknownBehavior {
                        referenced_by: format!("timeline tick {}", entry.tick),
                        behavior: id.clone(),
                    }
                    .into());
                }
            }
            if let Some(state) = &entry.force_state
                && !state_names.contains(state)
            {
                return Err(ConfigError::UnknownState {
                    context: format!("timeline tick {}", entry.tick),
                    name: state.clone(),
                }
                .into());
            }
            by_tick.entry(entry.tick).or_default().push(entry);
        }

        let world = SimWorld::with_robot(initial_robot);
        let system = BehaviorSystem::new(registry, machine_id, &world)?;

        Ok(Self {
            world,
            system,
            machine,
            knobs,
            tick_ms,
            max_ticks,
            timeline: by_tick,
        })
    }

    /// Warnings produced while building the machine.
    pub fn warnings(&self) -> Vec<String> {
        self.machine.borrow().warnings().to_vec()
    }

    /// Run every tick and return the trace.
    pub fn run(mut self) -> Result<ReplayTrace, ArbiterError> {
        let machine_name = self.machine.borrow().id().to_string();
        let warnings = self.warnings();
        let mut ticks = Vec::new();
        let mut seen = 0;

        self.apply_timeline(0)?;
        self.system.start(&self.world)?;
        ticks.push(self.snapshot(0, &mut seen));

        for tick in 1..=self.max_ticks {
            self.world.advance(Duration::from_millis(self.tick_ms));
            self.apply_timeline(tick)?;
            self.system.tick(&self.world);
            ticks.push(self.snapshot(tick, &mut seen));
        }

        self.system.shutdown(&self.world);
        info!(machine = %machine_name, ticks = self.max_ticks, "replay finished");

        Ok(ReplayTrace {
            machine: machine_name,
            warnings,
            ticks,
        })
    }

    fn apply_timeline(&mut self, tick: u64) -> Result<(), ArbiterError> {
        let Some(entries) = self.timeline.remove(&tick) else {
            return Ok(());
        };
        for entry in entries {
            if let Some(robot) = entry.robot {
                self.world.set_robot(robot);
            }
            for tag in &entry.clear_events {
                self.world.clear_pending_event(tag);
            }
            for (id, wants) in &entry.wants {
                if let Some(knobs) = self.knobs.get(id) {
                    knobs.wants.set(*wants);
                }
            }
            for (id, gentle) in &entry.gentle {
                if let Some(knobs) = self.knobs.get(id) {
                    knobs.gentle.set(*gentle);
                }
            }
            for tag in entry.events {
                self.world.publish(WorldEvent::new(tag));
            }
            if let Some(state) = &entry.force_state {
                self.machine.borrow_mut().request_transition(state)?;
            }
        }
        Ok(())
    }

    fn snapshot(&self, tick: u64, seen: &mut usize) -> TickTrace {
        let machine = self.machine.borrow();
        let log = machine.transition_log();
        let transitions = log[(*seen).min(log.len())..].to_vec();
        *seen = log.len();

        let state = machine.current_state_name().map(str::to_string);
        let color = state.as_deref().and_then(|s| machine.debug_color(s));
        TickTrace {
            tick,
            at_ms: u64::try_from(self.world.now().as_millis()).unwrap_or(u64::MAX),
            state,
            color,
            chain: self
                .system
                .authority()
                .chain()
                .iter()
                .map(ToString::to_string)
                .collect(),
            transitions,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario;

    const PATROL: &str = r#"
        tick_ms = 100
        max_ticks = 6
        machine_id = "Patrol"

        [machine]
        initial_state = "Wander"

        [[machine.states]]
        name = "Wander"
        behavior = "Drive"
        debug_color = "GREEN"

        [[machine.states]]
        name = "Dock"
        behavior = "GoHome"
        debug_color = "BLUE"

        [[machine.transition_definitions]]
        from = "Wander"
        interrupting_transitions = [{ to = "Dock", condition = "LowBattery" }]

        [[machine.transition_definitions]]
        from = "Dock"
        exit_transitions = [{ to = "Wander", condition = { conditionType = "TrueCondition" } }]

        [strategies.LowBattery]
        conditionType = "BatteryBelow"
        percent = 20

        [[behaviors]]
        id = "Drive"

        [[behaviors]]
        id = "GoHome"
        runs_for_ticks = 2

        [[timeline]]
        tick = 2
        robot = { battery_percent = 10 }

        [[timeline]]
        tick = 3
        robot = { battery_percent = 90 }
    "#;

    fn run(raw: &str) -> ReplayTrace {
        let scenario = scenario::parse(raw).unwrap();
        Replay::new(scenario).unwrap().run().unwrap()
    }

    #[test]
    fn startup_enters_initial_state() {
        let trace = run(PATROL);
        let start = &trace.ticks[0];
        assert_eq!(start.state.as_deref(), Some("Wander"));
        assert_eq!(start.chain, vec!["Patrol".to_string(), "Drive".to_string()]);
        assert_eq!(start.color, Some(DebugColor::Green));
        assert_eq!(trace.ticks.len(), 7);
    }

    #[test]
    fn battery_drop_docks_then_returns() {
        let trace = run(PATROL);
        let states: Vec<_> = trace.ticks.iter().map(|t| t.state.clone().unwrap()).collect();
        // GoHome is delegated at tick 2 and updated in the same tick, so it
        // ends during tick 3; tick 4 takes the exit.
        assert_eq!(states, ["Wander", "Wander", "Dock", "Dock", "Wander", "Wander", "Wander"]);
        assert_eq!(trace.ticks[2].transitions.len(), 1);
        assert_eq!(trace.ticks[2].transitions[0].to, "Dock");
        assert_eq!(trace.ticks[2].at_ms, 200);
    }

    #[test]
    fn replays_are_deterministic() {
        assert_eq!(run(PATROL), run(PATROL));
    }

    #[test]
    fn forced_state_from_timeline() {
        let raw = format!("{PATROL}\n[[timeline]]\ntick = 5\nforce_state = \"Dock\"\n");
        let trace = run(&raw);
        assert_eq!(trace.ticks[5].state.as_deref(), Some("Dock"));
        assert_eq!(
            trace.ticks[5].transitions[0].reason,
            arbiter_runtime::EntryReason::Forced
        );
    }

    #[test]
    fn timeline_with_unknown_state_is_rejected() {
        let raw = format!("{PATROL}\n[[timeline]]\ntick = 1\nforce_state = \"Nap\"\n");
        let scenario = scenario::parse(&raw).unwrap();
        assert!(matches!(
            Replay::new(scenario),
            Err(ArbiterError::Config(ConfigError::UnknownState { .. }))
        ));
    }

    #[test]
    fn timeline_with_unknown_behavior_is_rejected() {
        let raw = format!("{PATROL}\n[[timeline]]\ntick = 1\nwants = {{ Sleep = false }}\n");
        let scenario = scenario::parse(&raw).unwrap();
        assert!(matches!(
            Replay::new(scenario),
            Err(ArbiterError::Config(ConfigError::UnknownBehavior { .. }))
        ));
    }

    #[test]
    fn guard_dog_scenario() {
        let trace = run(include_str!("../scenarios/guard_dog.toml"));
        assert!(trace.warnings.is_empty());
        let state_at = |tick: usize| trace.ticks[tick].state.clone().unwrap_or_default();

        // Get-in plays first, then the main behavior takes over.
        assert_eq!(trace.ticks[1].chain, ["GuardDog", "LieDown"]);
        assert_eq!(trace.ticks[2].chain, ["GuardDog", "Snooze"]);

        assert_eq!(state_at(4), "Alert");
        assert_eq!(state_at(7), "Sleep");
        assert_eq!(state_at(10), "Bark");
        assert_eq!(state_at(12), "Alert");

        // Low battery at 13 waits for the gentle hint.
        assert_eq!(state_at(13), "Alert");
        let last = trace.ticks[14].transitions.last().unwrap();
        assert_eq!(last.to, "Done");
        assert!(trace.ticks[14].chain.is_empty());
        assert!(trace.ticks[20].chain.is_empty());
    }

    #[test]
    fn missing_leaf_fails_init() {
        let raw = PATROL.replace("id = \"GoHome\"", "id = \"Elsewhere\"");
        let scenario = scenario::parse(&raw).unwrap();
        assert!(Replay::new(scenario).is_err());
    }
}
