//! Transition conditions.
//!
//! A [`Condition`] is a named, stateful boolean predicate over the world.
//! Conditions are owned by the state machine that uses them, initialized
//! once, and switched on and off as the states referencing them are entered
//! and left. Stateful conditions (timers, event latches) reset their
//! accumulators on every false→true activation edge.
//!
//! The state machine stores its conditions in an arena of
//! [`ConditionSlot`]s. A slot filters redundant `set_active` calls so that a
//! condition only ever sees real edges.
//!
//! # Example
//!
//! ```rust
//! use arbiter_kernel::SimWorld;
//! use arbiter_runtime::condition::{Condition, ConditionContext, ConditionLambda};
//!
//! let world = SimWorld::new();
//! world.update_robot(|r| r.battery_percent = 12);
//!
//! let low = ConditionLambda::new("LowBattery", |ctx| ctx.world().robot().battery_percent < 20);
//! assert!(low.are_conditions_met(&ConditionContext::new(&world)));
//! ```

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use arbiter_kernel::{SubscriptionId, WorldView};
use arbiter_types::{ArbiterError, ObservationRequirement};
use tracing::debug;

use crate::history::StateHistory;

// ─────────────────────────────────────────────────────────────────────────────
// Context & trait
// ─────────────────────────────────────────────────────────────────────────────

/// What a condition may look at: the world facade and, when owned by a state
/// machine, that machine's state history.
#[derive(Clone, Copy)]
pub struct ConditionContext<'a> {
    world: &'a dyn WorldView,
    states: Option<&'a StateHistory>,
}

impl<'a> ConditionContext<'a> {
    pub fn new(world: &'a dyn WorldView) -> Self {
        Self {
            world,
            states: None,
        }
    }

    pub fn with_states(world: &'a dyn WorldView, states: &'a StateHistory) -> Self {
        Self {
            world,
            states: Some(states),
        }
    }

    pub fn world(&self) -> &'a dyn WorldView {
        self.world
    }

    pub fn states(&self) -> Option<&'a StateHistory> {
        self.states
    }

    pub fn now(&self) -> Duration {
        self.world.now()
    }
}

/// A named boolean predicate over world state.
pub trait Condition {
    /// Debug label, used in logs and introspection.
    fn name(&self) -> &str;

    /// Resolve references once, before the first activation.
    fn init(&mut self, _ctx: &ConditionContext<'_>) -> Result<(), ArbiterError> {
        Ok(())
    }

    /// Called on every real activation edge. Activation resets accumulated
    /// state; deactivation releases subscriptions.
    fn set_active(&mut self, _ctx: &ConditionContext<'_>, _active: bool) {}

    /// Pure query.
    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool;

    /// World observation modes this condition depends on.
    fn observation_requirements(&self) -> BTreeSet<ObservationRequirement> {
        BTreeSet::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arena slot
// ─────────────────────────────────────────────────────────────────────────────

/// Index of a condition in its owner's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionId(pub(crate) usize);

impl ConditionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One arena entry: the condition plus its activation flag.
pub struct ConditionSlot {
    condition: Box<dyn Condition>,
    active: bool,
    initialized: bool,
}

impl ConditionSlot {
    pub fn new(condition: Box<dyn Condition>) -> Self {
        Self {
            condition,
            active: false,
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        self.condition.name()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Run `init` once; later calls are no-ops.
    pub fn init(&mut self, ctx: &ConditionContext<'_>) -> Result<(), ArbiterError> {
        if !self.initialized {
            self.condition.init(ctx)?;
            self.initialized = true;
        }
        Ok(())
    }

    /// Forward `active` to the condition only if it differs from the current
    /// flag.
    pub fn set_active(&mut self, ctx: &ConditionContext<'_>, active: bool) {
        if self.active != active {
            self.active = active;
            self.condition.set_active(ctx, active);
        }
    }

    pub fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        self.condition.are_conditions_met(ctx)
    }

    pub fn observation_requirements(&self) -> BTreeSet<ObservationRequirement> {
        self.condition.observation_requirements()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in conditions
// ─────────────────────────────────────────────────────────────────────────────

/// Condition built from a closure.
pub struct ConditionLambda {
    name: String,
    predicate: Box<dyn Fn(&ConditionContext<'_>) -> bool>,
    requirements: BTreeSet<ObservationRequirement>,
}

impl ConditionLambda {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&ConditionContext<'_>) -> bool + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            requirements: BTreeSet::new(),
        }
    }

    pub fn with_requirements(
        mut self,
        requirements: impl IntoIterator<Item = ObservationRequirement>,
    ) -> Self {
        self.requirements.extend(requirements);
        self
    }
}

impl Condition for ConditionLambda {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        (self.predicate)(ctx)
    }

    fn observation_requirements(&self) -> BTreeSet<ObservationRequirement> {
        self.requirements.clone()
    }
}

/// Always `value`.
pub struct ConstantCondition {
    name: String,
    value: bool,
}

impl ConstantCondition {
    pub fn new(value: bool) -> Self {
        let name = if value { "TrueCondition" } else { "FalseCondition" };
        Self {
            name: name.to_string(),
            value,
        }
    }
}

impl Condition for ConstantCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, _ctx: &ConditionContext<'_>) -> bool {
        self.value
    }
}

/// Which field of the robot snapshot a [`RobotStateCondition`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCheck {
    OnCharger,
    BatteryBelow(u8),
    CliffDetected,
    CarryingObject,
}

/// Predicate over the robot snapshot.
pub struct RobotStateCondition {
    name: String,
    check: RobotCheck,
}

impl RobotStateCondition {
    pub fn new(check: RobotCheck) -> Self {
        let name = match check {
            RobotCheck::OnCharger => "OnCharger".to_string(),
            RobotCheck::BatteryBelow(p) => format!("BatteryBelow({p})"),
            RobotCheck::CliffDetected => "CliffDetected".to_string(),
            RobotCheck::CarryingObject => "CarryingObject".to_string(),
        };
        Self { name, check }
    }
}

impl Condition for RobotStateCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        let robot = ctx.world().robot();
        match self.check {
            RobotCheck::OnCharger => robot.on_charger,
            RobotCheck::BatteryBelow(percent) => robot.battery_percent < percent,
            RobotCheck::CliffDetected => robot.cliff_detected,
            RobotCheck::CarryingObject => robot.carrying_object,
        }
    }

    fn observation_requirements(&self) -> BTreeSet<ObservationRequirement> {
        match self.check {
            RobotCheck::CliffDetected => [ObservationRequirement::new("sensor:cliff")].into(),
            RobotCheck::CarryingObject => [ObservationRequirement::new("sensor:lift_load")].into(),
            _ => BTreeSet::new(),
        }
    }
}

/// True while the time since activation lies in `[begin, end)`.
pub struct TimerInRange {
    name: String,
    begin: Duration,
    end: Option<Duration>,
    activated_at: Option<Duration>,
}

impl TimerInRange {
    pub fn new(begin: Duration, end: Option<Duration>) -> Self {
        let name = match end {
            Some(end) => format!("TimerInRange({:.2}s..{:.2}s)", begin.as_secs_f64(), end.as_secs_f64()),
            None => format!("TimerInRange({:.2}s..)", begin.as_secs_f64()),
        };
        Self {
            name,
            begin,
            end,
            activated_at: None,
        }
    }
}

impl Condition for TimerInRange {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_active(&mut self, ctx: &ConditionContext<'_>, active: bool) {
        self.activated_at = active.then(|| ctx.now());
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        let Some(start) = self.activated_at else {
            return false;
        };
        let elapsed = ctx.now().saturating_sub(start);
        elapsed >= self.begin && self.end.is_none_or(|end| elapsed < end)
    }
}

/// Latches once an event with the given tag is delivered while active.
pub struct EventReceived {
    name: String,
    tag: String,
    latch: Rc<Cell<bool>>,
    subscription: Option<SubscriptionId>,
}

impl EventReceived {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            name: format!("EventReceived({tag})"),
            tag,
            latch: Rc::new(Cell::new(false)),
            subscription: None,
        }
    }
}

impl Condition for EventReceived {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_active(&mut self, ctx: &ConditionContext<'_>, active: bool) {
        if let Some(id) = self.subscription.take() {
            ctx.world().unsubscribe(id);
        }
        self.latch.set(false);
        if active {
            let latch = Rc::clone(&self.latch);
            let id = ctx
                .world()
                .subscribe(&self.tag, Box::new(move |_| latch.set(true)));
            debug!(condition = %self.name, "subscribed");
            self.subscription = Some(id);
        }
    }

    fn are_conditions_met(&self, _ctx: &ConditionContext<'_>) -> bool {
        self.latch.get()
    }
}

/// Polls the world's pending-event latch.
pub struct EventPending {
    name: String,
    tag: String,
}

impl EventPending {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            name: format!("EventPending({tag})"),
            tag,
        }
    }
}

impl Condition for EventPending {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        ctx.world().is_event_pending(&self.tag)
    }
}

/// True once the owning machine's current state has been active (pause
/// adjusted) for at least `at_least`.
pub struct TimeInState {
    name: String,
    at_least: Duration,
}

impl TimeInState {
    pub fn new(at_least: Duration) -> Self {
        Self {
            name: format!("TimeInState({:.2}s)", at_least.as_secs_f64()),
            at_least,
        }
    }

    /// A named variant, used for state timer strategies.
    pub fn named(name: impl Into<String>, at_least: Duration) -> Self {
        Self {
            name: name.into(),
            at_least,
        }
    }
}

impl Condition for TimeInState {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        ctx.states()
            .and_then(|h| h.time_in_current_state(ctx.now()))
            .is_some_and(|t| t >= self.at_least)
    }
}

/// True once `cooldown` has passed since `state` was last exited.
pub struct StateExitCooldown {
    name: String,
    state: String,
    cooldown: Duration,
    value_if_never_run: bool,
}

impl StateExitCooldown {
    pub fn new(state: impl Into<String>, cooldown: Duration, value_if_never_run: bool) -> Self {
        let state = state.into();
        Self {
            name: format!("StateExitCooldown({state}, {:.2}s)", cooldown.as_secs_f64()),
            state,
            cooldown,
            value_if_never_run,
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }
}

impl Condition for StateExitCooldown {
    fn name(&self) -> &str {
        &self.name
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        match ctx.states() {
            Some(history) => history.cooldown_expired(
                &self.state,
                self.cooldown,
                ctx.now(),
                self.value_if_never_run,
            ),
            None => self.value_if_never_run,
        }
    }
}

/// Boolean composition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    And,
    Or,
    Not,
}

/// Boolean composition of child conditions. Lifecycle calls are forwarded to
/// every child; `Not` has exactly one child.
pub struct CompoundCondition {
    name: String,
    op: CompoundOp,
    children: Vec<Box<dyn Condition>>,
}

impl CompoundCondition {
    pub fn and(children: Vec<Box<dyn Condition>>) -> Self {
        Self::build(CompoundOp::And, children)
    }

    pub fn or(children: Vec<Box<dyn Condition>>) -> Self {
        Self::build(CompoundOp::Or, children)
    }

    pub fn not(child: Box<dyn Condition>) -> Self {
        Self::build(CompoundOp::Not, vec![child])
    }

    fn build(op: CompoundOp, children: Vec<Box<dyn Condition>>) -> Self {
        let names: Vec<&str> = children.iter().map(|c| c.name()).collect();
        let name = match op {
            CompoundOp::And => format!("And({})", names.join(", ")),
            CompoundOp::Or => format!("Or({})", names.join(", ")),
            CompoundOp::Not => format!("Not({})", names.join(", ")),
        };
        Self { name, op, children }
    }
}

impl Condition for CompoundCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &ConditionContext<'_>) -> Result<(), ArbiterError> {
        for child in &mut self.children {
            child.init(ctx)?;
        }
        Ok(())
    }

    fn set_active(&mut self, ctx: &ConditionContext<'_>, active: bool) {
        for child in &mut self.children {
            child.set_active(ctx, active);
        }
    }

    fn are_conditions_met(&self, ctx: &ConditionContext<'_>) -> bool {
        match self.op {
            CompoundOp::And => self.children.iter().all(|c| c.are_conditions_met(ctx)),
            CompoundOp::Or => self.children.iter().any(|c| c.are_conditions_met(ctx)),
            CompoundOp::Not => !self.children.iter().any(|c| c.are_conditions_met(ctx)),
        }
    }

    fn observation_requirements(&self) -> BTreeSet<ObservationRequirement> {
        self.children
            .iter()
            .flat_map(|c| c.observation_requirements())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_kernel::SimWorld;
    use arbiter_types::WorldEvent;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Counts set_active calls that reach the condition.
    struct Edges {
        count: Rc<Cell<u32>>,
    }

    impl Condition for Edges {
        fn name(&self) -> &str {
            "Edges"
        }
        fn set_active(&mut self, _ctx: &ConditionContext<'_>, _active: bool) {
            self.count.set(self.count.get() + 1);
        }
        fn are_conditions_met(&self, _ctx: &ConditionContext<'_>) -> bool {
            false
        }
    }

    #[test]
    fn slot_filters_redundant_edges() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let count = Rc::new(Cell::new(0));
        let mut slot = ConditionSlot::new(Box::new(Edges {
            count: Rc::clone(&count),
        }));

        slot.set_active(&ctx, true);
        slot.set_active(&ctx, true);
        slot.set_active(&ctx, false);
        slot.set_active(&ctx, false);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn robot_checks_read_snapshot() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let charger = RobotStateCondition::new(RobotCheck::OnCharger);
        let low = RobotStateCondition::new(RobotCheck::BatteryBelow(20));

        assert!(!charger.are_conditions_met(&ctx));
        assert!(!low.are_conditions_met(&ctx));

        world.update_robot(|r| {
            r.on_charger = true;
            r.battery_percent = 19;
        });
        assert!(charger.are_conditions_met(&ctx));
        assert!(low.are_conditions_met(&ctx));
        assert_eq!(low.name(), "BatteryBelow(20)");
    }

    #[test]
    fn timer_window_restarts_on_activation() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let mut timer = TimerInRange::new(ms(100), Some(ms(300)));
        assert!(!timer.are_conditions_met(&ctx));

        timer.set_active(&ctx, true);
        world.advance(ms(50));
        assert!(!timer.are_conditions_met(&ctx));
        world.advance(ms(50));
        assert!(timer.are_conditions_met(&ctx));
        world.advance(ms(200));
        assert!(!timer.are_conditions_met(&ctx));

        timer.set_active(&ctx, false);
        timer.set_active(&ctx, true);
        world.advance(ms(150));
        assert!(timer.are_conditions_met(&ctx));
    }

    #[test]
    fn event_received_latches_only_while_active() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let mut cond = EventReceived::new("face_seen");

        world.publish(WorldEvent::new("face_seen"));
        assert!(!cond.are_conditions_met(&ctx));

        cond.set_active(&ctx, true);
        assert_eq!(world.subscriber_count("face_seen"), 1);
        world.publish(WorldEvent::new("face_seen"));
        assert!(cond.are_conditions_met(&ctx));

        cond.set_active(&ctx, false);
        assert_eq!(world.subscriber_count("face_seen"), 0);
        assert!(!cond.are_conditions_met(&ctx));

        // reactivation starts with a clean latch
        cond.set_active(&ctx, true);
        assert!(!cond.are_conditions_met(&ctx));
    }

    #[test]
    fn event_pending_polls_world() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let cond = EventPending::new("trigger_word");
        assert!(!cond.are_conditions_met(&ctx));
        world.publish(WorldEvent::new("trigger_word"));
        assert!(cond.are_conditions_met(&ctx));
        world.clear_pending_event("trigger_word");
        assert!(!cond.are_conditions_met(&ctx));
    }

    #[test]
    fn history_conditions_need_a_machine() {
        let world = SimWorld::new();
        let bare = ConditionContext::new(&world);
        assert!(!TimeInState::new(ms(0)).are_conditions_met(&bare));
        assert!(StateExitCooldown::new("Pounce", ms(10), true).are_conditions_met(&bare));

        let mut history = StateHistory::new();
        history.enter("Pounce", world.now());
        world.advance(ms(500));
        let ctx = ConditionContext::with_states(&world, &history);
        assert!(TimeInState::new(ms(500)).are_conditions_met(&ctx));
        assert!(!TimeInState::new(ms(501)).are_conditions_met(&ctx));
    }

    #[test]
    fn compound_composes_and_forwards() {
        let world = SimWorld::new();
        let ctx = ConditionContext::new(&world);
        let count = Rc::new(Cell::new(0));

        let mut cond = CompoundCondition::and(vec![
            Box::new(ConstantCondition::new(true)),
            Box::new(CompoundCondition::not(Box::new(Edges {
                count: Rc::clone(&count),
            }))),
        ]);
        assert!(cond.are_conditions_met(&ctx));
        cond.set_active(&ctx, true);
        assert_eq!(count.get(), 1);
        assert_eq!(cond.name(), "And(TrueCondition, Not(Edges))");

        let or = CompoundCondition::or(vec![
            Box::new(ConstantCondition::new(false)),
            Box::new(RobotStateCondition::new(RobotCheck::CliffDetected)),
        ]);
        assert!(!or.are_conditions_met(&ctx));
        assert_eq!(
            or.observation_requirements(),
            [ObservationRequirement::new("sensor:cliff")].into()
        );
    }

    #[test]
    fn lambda_reports_requirements() {
        let cond = ConditionLambda::new("SeesFace", |_| true)
            .with_requirements([ObservationRequirement::new("vision:faces")]);
        assert_eq!(cond.observation_requirements().len(), 1);
    }
}
