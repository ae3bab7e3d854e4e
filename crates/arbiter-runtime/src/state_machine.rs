//! [`StateMachine`] – a behavior composed of named states.
//!
//! Each state is bound to one delegate behavior and owns three ordered lists
//! of condition-guarded transitions:
//!
//! | Class | Evaluated when | Effect |
//! |---|---|---|
//! | interrupting | every tick | preempts whatever is running |
//! | non-interrupting | nothing delegated, or the delegate can be gently interrupted | redirects at a safe point |
//! | exit | nothing delegated | leaves once the delegate has finished |
//!
//! If no transition fires and nothing is delegated, the state's behavior is
//! (re)delegated to when it wants to run.
//!
//! The machine keeps its current state across deactivation, so pausing it
//! (a higher-priority behavior took over its parent) and activating it again
//! resumes where it left off. Resume replacements redirect a resume from one
//! state to another.
//!
//! Machines are built from a [`StateMachineConfig`] with
//! [`StateMachineBuilder`], which validates the whole graph once. Structural
//! errors are fatal; suspicious but legal shapes (dead ends, states nothing
//! transitions into) are reported as warnings.
//!
//! # Example
//!
//! ```rust
//! use arbiter_runtime::state_machine::StateMachineBuilder;
//! use arbiter_types::{
//!     ConditionConfig, StateConfig, StateMachineConfig, TransitionConfig, TransitionDefinition,
//!     FromStates,
//! };
//!
//! let config = StateMachineConfig {
//!     initial_state: "Sleep".into(),
//!     states: vec![
//!         StateConfig::new("Sleep", "SleepOnCharger"),
//!         StateConfig::new("Wake", "WakeUp"),
//!     ],
//!     transition_definitions: vec![
//!         TransitionDefinition {
//!             from: FromStates::One("Sleep".into()),
//!             interrupting_transitions: vec![TransitionConfig::new(
//!                 "Wake",
//!                 ConditionConfig::EventReceived { event: "touch".into() },
//!             )],
//!             non_interrupting_transitions: vec![],
//!             exit_transitions: vec![],
//!         },
//!         TransitionDefinition {
//!             from: FromStates::One("Wake".into()),
//!             interrupting_transitions: vec![],
//!             non_interrupting_transitions: vec![],
//!             exit_transitions: vec![TransitionConfig::new("Sleep", "Tired")],
//!         },
//!     ],
//!     resume_replacements: Default::default(),
//!     put_down_behavior: None,
//!     state_timer_conditions: vec![],
//!     ignore_missing_transitions: false,
//! };
//!
//! let machine = StateMachineBuilder::new("GuardDog", config)
//!     .with_strategy("Tired", arbiter_runtime::condition::ConditionLambda::new("Tired", |_| true))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(machine.state_names().count(), 2);
//! assert!(machine.warnings().is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use arbiter_kernel::{Behavior, BehaviorContext, WorldView};
use arbiter_types::{
    ArbiterError, BehaviorId, ConditionSpec, ConfigError, DebugColor, ObservationRequirement,
    StateMachineConfig, TransitionConfig, TransitionKind, WorldEvent,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::condition::{Condition, ConditionContext, ConditionId, ConditionSlot, TimeInState};
use crate::condition_factory::ConditionFactory;
use crate::history::StateHistory;

// ─────────────────────────────────────────────────────────────────────────────
// Introspection types
// ─────────────────────────────────────────────────────────────────────────────

/// Why a state was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    /// First activation, entering the initial state.
    Start,
    /// Re-activation resuming the retained (or replacement) state.
    Resume,
    /// A guarded transition fired.
    Transition(TransitionKind),
    /// A debug transition requested through
    /// [`StateMachine::request_transition`].
    Forced,
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryReason::Start => write!(f, "start"),
            EntryReason::Resume => write!(f, "resume"),
            EntryReason::Transition(kind) => write!(f, "{kind}"),
            EntryReason::Forced => write!(f, "forced"),
        }
    }
}

/// One entry of the machine's transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub tick: u64,
    pub at_ms: u64,
    pub from: Option<String>,
    pub to: String,
    pub reason: EntryReason,
}

/// Read-only view of a condition guarding a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionInfo {
    pub id: usize,
    pub name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal graph
// ─────────────────────────────────────────────────────────────────────────────

struct Transition {
    to: usize,
    condition: ConditionId,
    emit_event: Option<String>,
}

struct State {
    name: String,
    behavior: Option<BehaviorId>,
    get_in_behavior: Option<BehaviorId>,
    cancel_self: bool,
    debug_color: Option<DebugColor>,
    clear_event_on_entry: Option<String>,
    allow_while_carrying: bool,
    interrupting: Vec<Transition>,
    non_interrupting: Vec<Transition>,
    exit: Vec<Transition>,
    /// Every condition any of the three lists references, deduplicated.
    conditions: BTreeSet<ConditionId>,
}

impl State {
    fn transitions(&self, kind: TransitionKind) -> &[Transition] {
        match kind {
            TransitionKind::Interrupting => &self.interrupting,
            TransitionKind::NonInterrupting => &self.non_interrupting,
            TransitionKind::Exit => &self.exit,
        }
    }

    fn transitions_mut(&mut self, kind: TransitionKind) -> &mut Vec<Transition> {
        match kind {
            TransitionKind::Interrupting => &mut self.interrupting,
            TransitionKind::NonInterrupting => &mut self.non_interrupting,
            TransitionKind::Exit => &mut self.exit,
        }
    }

    fn outgoing(&self) -> usize {
        self.interrupting.len() + self.non_interrupting.len() + self.exit.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// The put-down behavior is running; no transition is evaluated.
    PuttingDown { resuming: bool },
    /// The get-in behavior is running; only interrupting transitions apply.
    GettingIn,
    Main,
}

// ─────────────────────────────────────────────────────────────────────────────
// StateMachine
// ─────────────────────────────────────────────────────────────────────────────

/// Hierarchical state machine behavior.
pub struct StateMachine {
    id: BehaviorId,
    states: Vec<State>,
    index: BTreeMap<String, usize>,
    conditions: Vec<ConditionSlot>,
    initial: usize,
    current: Option<usize>,
    phase: Phase,
    resume_replacements: BTreeMap<usize, usize>,
    put_down: Option<BehaviorId>,
    forced: Option<usize>,
    history: StateHistory,
    log: Vec<TransitionRecord>,
    warnings: Vec<String>,
}

impl StateMachine {
    fn condition_context<'a>(&'a self, world: &'a dyn WorldView) -> ConditionContext<'a> {
        ConditionContext::with_states(world, &self.history)
    }

    /// First transition of class `kind` out of `state` whose condition holds,
    /// as its target and the event it raises.
    fn first_met(
        &self,
        world: &dyn WorldView,
        state: usize,
        kind: TransitionKind,
    ) -> Option<(usize, Option<String>)> {
        let cctx = self.condition_context(world);
        self.states[state]
            .transitions(kind)
            .iter()
            .find(|t| self.conditions[t.condition.index()].are_conditions_met(&cctx))
            .map(|t| (t.to, t.emit_event.clone()))
    }

    /// Take a guarded transition, raising its event first.
    fn fire(
        &mut self,
        ctx: &BehaviorContext<'_>,
        (target, event): (usize, Option<String>),
        kind: TransitionKind,
    ) {
        if let Some(tag) = event {
            debug!(machine = %self.id, event = %tag, "transition event raised");
            ctx.world().publish_event(WorldEvent::new(tag));
        }
        self.transition_to(ctx, target, EntryReason::Transition(kind));
    }

    /// Full exit-then-enter sequence.
    fn transition_to(&mut self, ctx: &BehaviorContext<'_>, target: usize, reason: EntryReason) {
        if let Some(current) = self.current {
            self.exit_state(ctx, current, false);
        }
        self.enter_state(ctx, target, reason, false);
    }

    /// Exit half: cancel the delegate, switch the state's conditions off and
    /// release their observations. With `pausing` the state stays current
    /// and its active clock is kept for a later resume.
    fn exit_state(&mut self, ctx: &BehaviorContext<'_>, state: usize, pausing: bool) {
        ctx.cancel_delegates(&self.id, false);

        let world = ctx.world();
        let cctx = ConditionContext::with_states(world, &self.history);
        for id in &self.states[state].conditions {
            self.conditions[id.index()].set_active(&cctx, false);
        }
        world.release_observations(self.id.as_str());

        let now = world.now();
        let name = &self.states[state].name;
        if pausing {
            self.history.pause(name, now);
        } else {
            self.history.exit(name, now);
        }
        self.phase = Phase::Idle;
        debug!(machine = %self.id, state = %name, pausing, "state exited");
    }

    /// Enter half: switch the state's conditions on, pre-warm observations,
    /// then hand control to the state's get-in or main behavior.
    fn enter_state(
        &mut self,
        ctx: &BehaviorContext<'_>,
        state: usize,
        reason: EntryReason,
        resuming: bool,
    ) {
        let world = ctx.world();
        let now = world.now();
        let from = self.current.map(|s| self.states[s].name.clone());
        self.current = Some(state);

        let name = self.states[state].name.clone();
        if resuming {
            self.history.resume(&name, now);
        } else {
            self.history.enter(&name, now);
        }

        let cctx = ConditionContext::with_states(world, &self.history);
        let mut requirements: BTreeSet<ObservationRequirement> = BTreeSet::new();
        for id in &self.states[state].conditions {
            let slot = &mut self.conditions[id.index()];
            slot.set_active(&cctx, true);
            requirements.extend(slot.observation_requirements());
        }
        if !requirements.is_empty() {
            world.request_observations(self.id.as_str(), &requirements);
        }
        if let Some(tag) = &self.states[state].clear_event_on_entry {
            world.clear_pending_event(tag);
        }

        info!(
            machine = %self.id,
            from = from.as_deref().unwrap_or("-"),
            to = %name,
            reason = %reason,
            "state entered"
        );
        self.log.push(TransitionRecord {
            tick: world.tick_count(),
            at_ms: u64::try_from(now.as_millis()).unwrap_or(u64::MAX),
            from,
            to: name,
            reason,
        });

        let entered = &self.states[state];
        if entered.cancel_self {
            debug!(machine = %self.id, "cancel-self state entered; ending machine");
            ctx.end(&self.id);
            return;
        }

        if !entered.allow_while_carrying
            && world.robot().carrying_object
            && let Some(put_down) = self.put_down.clone()
            && ctx.wants_to_be_activated(&put_down)
        {
            match ctx.delegate_with_completion(&self.id, &put_down) {
                Ok(()) => {
                    debug!(machine = %self.id, state = %entered.name, "putting down carried object");
                    self.phase = Phase::PuttingDown { resuming };
                    return;
                }
                Err(e) => warn!(machine = %self.id, behavior = %put_down, error = %e, "put-down delegation failed"),
            }
        }
        self.run_state_behaviors(ctx, resuming);
    }

    /// Get-in on a fresh entry when the state has one, otherwise the main
    /// behavior.
    fn run_state_behaviors(&mut self, ctx: &BehaviorContext<'_>, resuming: bool) {
        let Some(current) = self.current else {
            return;
        };
        let get_in = self.states[current].get_in_behavior.clone();
        if let Some(get_in) = get_in.filter(|_| !resuming) {
            if ctx.wants_to_be_activated(&get_in) {
                match ctx.delegate_with_completion(&self.id, &get_in) {
                    Ok(()) => {
                        self.phase = Phase::GettingIn;
                        return;
                    }
                    Err(e) => warn!(machine = %self.id, behavior = %get_in, error = %e, "get-in delegation failed"),
                }
            }
        }
        self.phase = Phase::Main;
        self.dispatch_main(ctx, true);
    }

    /// Delegate to the current state's behavior if it wants to run.
    fn dispatch_main(&self, ctx: &BehaviorContext<'_>, just_entered: bool) {
        let Some(state) = self.current.map(|s| &self.states[s]) else {
            return;
        };
        let Some(behavior) = &state.behavior else {
            return;
        };
        if !ctx.wants_to_be_activated(behavior) {
            if just_entered {
                warn!(
                    machine = %self.id,
                    state = %state.name,
                    behavior = %behavior,
                    "state behavior declined activation on entry"
                );
            }
            return;
        }
        if let Err(e) = ctx.delegate(&self.id, behavior) {
            warn!(machine = %self.id, behavior = %behavior, error = %e, "delegation failed");
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn id(&self) -> &BehaviorId {
        &self.id
    }

    pub fn current_state_name(&self) -> Option<&str> {
        self.current.map(|s| self.states[s].name.as_str())
    }

    pub fn initial_state_name(&self) -> &str {
        &self.states[self.initial].name
    }

    /// State names in declaration order.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|s| s.name.as_str())
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn debug_color(&self, name: &str) -> Option<DebugColor> {
        self.index.get(name).and_then(|&s| self.states[s].debug_color)
    }

    pub fn history(&self) -> &StateHistory {
        &self.history
    }

    pub fn time_since_state_exited(&self, name: &str, now: Duration) -> Option<Duration> {
        self.history.time_since_exited(name, now)
    }

    pub fn state_exit_cooldown_expired(
        &self,
        name: &str,
        threshold: Duration,
        now: Duration,
        value_if_never_run: bool,
    ) -> bool {
        self.history
            .cooldown_expired(name, threshold, now, value_if_never_run)
    }

    pub fn time_in_current_state(&self, now: Duration) -> Option<Duration> {
        self.history.time_in_current_state(now)
    }

    pub fn last_time_entered(&self, name: &str) -> Option<Duration> {
        self.history.last_entered(name)
    }

    pub fn last_time_exited(&self, name: &str) -> Option<Duration> {
        self.history.last_exited(name)
    }

    /// For every state, the conditions guarding its outgoing transitions in
    /// evaluation order.
    pub fn all_transitions(&self) -> Vec<(String, Vec<ConditionInfo>)> {
        self.states
            .iter()
            .map(|state| {
                let infos = [
                    TransitionKind::Interrupting,
                    TransitionKind::NonInterrupting,
                    TransitionKind::Exit,
                ]
                .into_iter()
                .flat_map(|kind| state.transitions(kind))
                .map(|t| ConditionInfo {
                    id: t.condition.index(),
                    name: self.conditions[t.condition.index()].name().to_string(),
                })
                .collect();
                (state.name.clone(), infos)
            })
            .collect()
    }

    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.log
    }

    /// Construction-time warnings.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Queue a debug transition to `name`, taken at the start of the next
    /// update before any interrupting transition.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownState`] if no state is called `name`.
    pub fn request_transition(&mut self, name: &str) -> Result<(), ConfigError> {
        let target = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownState {
                context: "forced transition".to_string(),
                name: name.to_string(),
            })?;
        self.forced = Some(target);
        Ok(())
    }
}

impl Behavior for StateMachine {
    fn id(&self) -> &BehaviorId {
        &self.id
    }

    fn debug_label(&self) -> String {
        match self.current_state_name() {
            Some(state) => format!("{}[{}]", self.id, state),
            None => self.id.to_string(),
        }
    }

    fn init(&mut self, ctx: &BehaviorContext<'_>) -> Result<(), ArbiterError> {
        if let Some(put_down) = &self.put_down
            && !ctx.is_registered(put_down)
        {
            return Err(ConfigError::UnknownBehavior {
                referenced_by: format!("{}.put_down_behavior", self.id),
                behavior: put_down.clone(),
            }
            .into());
        }
        for state in &self.states {
            for behavior in state.behavior.iter().chain(state.get_in_behavior.iter()) {
                if !ctx.is_registered(behavior) {
                    return Err(ConfigError::UnknownBehavior {
                        referenced_by: format!("{}.{}", self.id, state.name),
                        behavior: behavior.clone(),
                    }
                    .into());
                }
            }
        }
        let cctx = ConditionContext::with_states(ctx.world(), &self.history);
        for slot in &mut self.conditions {
            slot.init(&cctx)?;
        }
        Ok(())
    }

    fn wants_to_be_activated(&self, _ctx: &BehaviorContext<'_>) -> bool {
        true
    }

    fn on_activated(&mut self, ctx: &BehaviorContext<'_>) {
        self.forced = None;
        match self.current {
            Some(retained) => {
                // A replacement is still a resume: no get-in.
                let target = self
                    .resume_replacements
                    .get(&retained)
                    .copied()
                    .unwrap_or(retained);
                self.enter_state(ctx, target, EntryReason::Resume, true);
            }
            None => self.enter_state(ctx, self.initial, EntryReason::Start, false),
        }
    }

    fn on_deactivated(&mut self, ctx: &BehaviorContext<'_>) {
        if let Some(current) = self.current {
            self.exit_state(ctx, current, true);
        }
    }

    fn update(&mut self, ctx: &BehaviorContext<'_>) {
        let Some(current) = self.current else {
            return;
        };
        let world = ctx.world();

        if let Some(target) = self.forced.take() {
            self.transition_to(ctx, target, EntryReason::Forced);
            return;
        }

        let delegated = ctx.is_control_delegated(&self.id);
        if matches!(self.phase, Phase::PuttingDown { .. }) && delegated {
            return;
        }

        if let Some(hit) = self.first_met(world, current, TransitionKind::Interrupting) {
            self.fire(ctx, hit, TransitionKind::Interrupting);
            return;
        }

        if self.phase == Phase::GettingIn && delegated {
            return;
        }

        let ok_to_dispatch = !delegated
            || ctx
                .delegate_of(&self.id)
                .is_some_and(|d| ctx.can_be_gently_interrupted(&d));
        if !ok_to_dispatch {
            return;
        }

        if let Some(hit) = self.first_met(world, current, TransitionKind::NonInterrupting) {
            self.fire(ctx, hit, TransitionKind::NonInterrupting);
            return;
        }

        if !delegated {
            if let Some(hit) = self.first_met(world, current, TransitionKind::Exit) {
                self.fire(ctx, hit, TransitionKind::Exit);
                return;
            }
            self.phase = Phase::Main;
            self.dispatch_main(ctx, false);
        }
    }

    fn delegates(&self) -> BTreeSet<BehaviorId> {
        self.states
            .iter()
            .flat_map(|s| s.behavior.iter().chain(s.get_in_behavior.iter()))
            .chain(self.put_down.iter())
            .cloned()
            .collect()
    }

    fn can_be_gently_interrupted_now(&self, ctx: &BehaviorContext<'_>) -> bool {
        match ctx.delegate_of(&self.id) {
            Some(delegate) => ctx.can_be_gently_interrupted(&delegate),
            None => true,
        }
    }

    fn on_delegate_completed(&mut self, ctx: &BehaviorContext<'_>, delegate: &BehaviorId) {
        let Some(current) = self.current else {
            return;
        };
        if let Phase::PuttingDown { resuming } = self.phase
            && self.put_down.as_ref() == Some(delegate)
        {
            debug!(machine = %self.id, state = %self.states[current].name, "put-down finished");
            self.run_state_behaviors(ctx, resuming);
            return;
        }
        let finished_get_in =
            self.states[current].get_in_behavior.as_ref() == Some(delegate);
        if self.phase == Phase::GettingIn && finished_get_in {
            debug!(machine = %self.id, behavior = %delegate, "get-in finished");
            self.phase = Phase::Main;
            self.dispatch_main(ctx, true);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Validates a [`StateMachineConfig`] and builds the [`StateMachine`].
pub struct StateMachineBuilder {
    id: BehaviorId,
    config: StateMachineConfig,
    strategies: BTreeMap<String, Box<dyn Condition>>,
}

impl StateMachineBuilder {
    pub fn new(id: impl Into<BehaviorId>, config: StateMachineConfig) -> Self {
        Self {
            id: id.into(),
            config,
            strategies: BTreeMap::new(),
        }
    }

    /// Parse the configuration from JSON.
    pub fn from_json(id: impl Into<BehaviorId>, json: &str) -> Result<Self, ConfigError> {
        let config = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(Self::new(id, config))
    }

    /// Register a predefined strategy that transitions can reference by
    /// name. Every reference shares this one instance.
    pub fn with_strategy(mut self, name: impl Into<String>, condition: impl Condition + 'static) -> Self {
        self.strategies.insert(name.into(), Box::new(condition));
        self
    }

    /// Like [`with_strategy`][Self::with_strategy] for an already boxed
    /// condition.
    pub fn with_boxed_strategy(mut self, name: impl Into<String>, condition: Box<dyn Condition>) -> Self {
        self.strategies.insert(name.into(), condition);
        self
    }

    /// Validate the configuration and build the machine.
    ///
    /// # Errors
    ///
    /// The first structural [`ConfigError`] found.
    pub fn build(self) -> Result<StateMachine, ConfigError> {
        let Self {
            id,
            config,
            mut strategies,
        } = self;

        // States.
        let mut states = Vec::with_capacity(config.states.len());
        let mut index = BTreeMap::new();
        for state in &config.states {
            if index.contains_key(&state.name) {
                return Err(ConfigError::DuplicateState(state.name.clone()));
            }
            if state.behavior.is_some() == state.cancel_self {
                return Err(ConfigError::MissingBehavior {
                    state: state.name.clone(),
                });
            }
            index.insert(state.name.clone(), states.len());
            states.push(State {
                name: state.name.clone(),
                behavior: state.behavior.clone(),
                get_in_behavior: state.get_in_behavior.clone(),
                cancel_self: state.cancel_self,
                debug_color: state.debug_color,
                clear_event_on_entry: state.clear_event_on_entry.clone(),
                allow_while_carrying: state.allow_while_carrying,
                interrupting: Vec::new(),
                non_interrupting: Vec::new(),
                exit: Vec::new(),
                conditions: BTreeSet::new(),
            });
        }
        let known: BTreeSet<String> = index.keys().cloned().collect();

        let initial = *index
            .get(&config.initial_state)
            .ok_or_else(|| ConfigError::UnknownInitialState(config.initial_state.clone()))?;

        let lookup = |context: &str, name: &str| -> Result<usize, ConfigError> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownState {
                    context: context.to_string(),
                    name: name.to_string(),
                })
        };

        let mut resume_replacements = BTreeMap::new();
        for (from, to) in &config.resume_replacements {
            resume_replacements.insert(
                lookup("resume replacement", from)?,
                lookup("resume replacement", to)?,
            );
        }

        for timer in &config.state_timer_conditions {
            if strategies.contains_key(&timer.name) {
                return Err(ConfigError::InvalidCondition {
                    condition: timer.name.clone(),
                    reason: "name already used by another strategy".to_string(),
                });
            }
            let begin = Duration::try_from_secs_f64(timer.begin_s).map_err(|_| {
                ConfigError::InvalidCondition {
                    condition: timer.name.clone(),
                    reason: "begin_s must be finite and non-negative".to_string(),
                }
            })?;
            strategies.insert(
                timer.name.clone(),
                Box::new(TimeInState::named(timer.name.clone(), begin)),
            );
        }

        // Transitions.
        let mut conditions: Vec<ConditionSlot> = Vec::new();
        let mut named: BTreeMap<String, ConditionId> = BTreeMap::new();
        let mut targeted: BTreeSet<usize> = resume_replacements.values().copied().collect();

        let mut resolve = |spec: &ConditionSpec| -> Result<ConditionId, ConfigError> {
            match spec {
                ConditionSpec::Named(name) => {
                    if let Some(id) = named.get(name) {
                        return Ok(*id);
                    }
                    let condition = strategies
                        .remove(name)
                        .ok_or_else(|| ConfigError::UnknownStrategy(name.clone()))?;
                    let id = ConditionId(conditions.len());
                    conditions.push(ConditionSlot::new(condition));
                    named.insert(name.clone(), id);
                    Ok(id)
                }
                ConditionSpec::Inline(config) => {
                    let condition = ConditionFactory::create(config, &known)?;
                    let id = ConditionId(conditions.len());
                    conditions.push(ConditionSlot::new(condition));
                    Ok(id)
                }
            }
        };

        for definition in &config.transition_definitions {
            let from_names = definition.from.names();
            if from_names.is_empty() {
                return Err(ConfigError::EmptyFromList);
            }
            let mut from = Vec::with_capacity(from_names.len());
            for name in from_names {
                from.push(lookup("transition 'from'", name)?);
            }

            let classes: [(TransitionKind, &Vec<TransitionConfig>); 3] = [
                (TransitionKind::Interrupting, &definition.interrupting_transitions),
                (TransitionKind::NonInterrupting, &definition.non_interrupting_transitions),
                (TransitionKind::Exit, &definition.exit_transitions),
            ];
            for (kind, transitions) in classes {
                for transition in transitions {
                    let context = format!("transition from {from_names:?}");
                    let to = lookup(&context, &transition.to)?;
                    let condition = resolve(&transition.condition)?;
                    targeted.insert(to);
                    for &state in &from {
                        states[state].transitions_mut(kind).push(Transition {
                            to,
                            condition,
                            emit_event: transition.emit_event.clone(),
                        });
                        states[state].conditions.insert(condition);
                    }
                }
            }
        }

        // Soft checks.
        let mut warnings = Vec::new();
        for (i, state) in states.iter().enumerate() {
            if state.outgoing() == 0 && !state.cancel_self {
                warnings.push(format!("state '{}' has no outgoing transitions", state.name));
            }
            if i != initial && !targeted.contains(&i) && !config.ignore_missing_transitions {
                warnings.push(format!(
                    "state '{}' is never targeted by a transition",
                    state.name
                ));
            }
        }
        for unused in strategies.keys() {
            debug!(machine = %id, strategy = %unused, "predefined strategy never referenced");
        }
        for warning in &warnings {
            warn!(machine = %id, "{warning}");
        }

        info!(
            machine = %id,
            states = states.len(),
            conditions = conditions.len(),
            "state machine built"
        );

        Ok(StateMachine {
            id,
            states,
            index,
            conditions,
            initial,
            current: None,
            phase: Phase::Idle,
            resume_replacements,
            put_down: config.put_down_behavior.clone(),
            forced: None,
            history: StateHistory::new(),
            log: Vec::new(),
            warnings,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
