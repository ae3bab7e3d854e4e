//! World/sensor facade.
//!
//! The engine never owns the world. Conditions and behaviors see it through
//! [`WorldView`], an injected capability offering read-only robot state, a
//! deterministic clock, a tag-based event subscription mechanism, pending
//! (latched) events, and observation-mode requests.
//!
//! [`SimWorld`] is the in-process implementation used by tests and by the
//! replay CLI. Its clock only moves when [`SimWorld::advance`] is called, so
//! two runs fed the same script observe identical time.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use arbiter_types::{ObservationRequirement, RobotState, WorldEvent};
use tracing::debug;

/// Callback invoked synchronously for every delivered event whose tag
/// matches the subscription.
pub type EventHandler = Box<dyn Fn(&WorldEvent)>;

/// Handle returned by [`WorldView::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Read-only world facade plus the event subscription mechanism.
pub trait WorldView {
    /// Latest robot snapshot.
    fn robot(&self) -> RobotState;

    /// Time elapsed since the world started.
    fn now(&self) -> Duration;

    /// Number of scheduler ticks the world has advanced through.
    fn tick_count(&self) -> u64;

    /// Register `handler` for events tagged `tag`.
    fn subscribe(&self, tag: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// `true` if an event tagged `tag` was delivered and not yet cleared.
    fn is_event_pending(&self, tag: &str) -> bool;

    /// Discard the pending event tagged `tag`, if any.
    fn clear_pending_event(&self, tag: &str);

    /// Raise an event from inside the engine. Delivered like any other.
    fn publish_event(&self, event: WorldEvent);

    /// Ask the world to keep `requirements` warm on behalf of `owner`,
    /// replacing any earlier request by the same owner.
    fn request_observations(&self, owner: &str, requirements: &BTreeSet<ObservationRequirement>);

    /// Drop every observation request held by `owner`.
    fn release_observations(&self, owner: &str);
}

struct Subscription {
    tag: String,
    handler: Rc<dyn Fn(&WorldEvent)>,
}

/// Deterministic world with a scripted clock.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use arbiter_kernel::world::{SimWorld, WorldView};
/// use arbiter_types::WorldEvent;
///
/// let world = SimWorld::new();
/// let seen = Rc::new(Cell::new(0));
/// let counter = Rc::clone(&seen);
/// world.subscribe("face_seen", Box::new(move |_| counter.set(counter.get() + 1)));
///
/// world.publish(WorldEvent::new("face_seen"));
/// world.advance(Duration::from_millis(100));
///
/// assert_eq!(seen.get(), 1);
/// assert_eq!(world.tick_count(), 1);
/// assert!(world.is_event_pending("face_seen"));
/// ```
#[derive(Default)]
pub struct SimWorld {
    robot: RefCell<RobotState>,
    tick: Cell<u64>,
    now: Cell<Duration>,
    next_subscription: Cell<u64>,
    subscriptions: RefCell<BTreeMap<SubscriptionId, Subscription>>,
    pending: RefCell<BTreeMap<String, WorldEvent>>,
    observations: RefCell<BTreeMap<String, BTreeSet<ObservationRequirement>>>,
}

impl SimWorld {
    /// A world at time zero with a default robot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A world at time zero with the given robot snapshot.
    pub fn with_robot(robot: RobotState) -> Self {
        let world = Self::default();
        world.set_robot(robot);
        world
    }

    /// Replace the robot snapshot.
    pub fn set_robot(&self, robot: RobotState) {
        *self.robot.borrow_mut() = robot;
    }

    /// Mutate the robot snapshot in place.
    pub fn update_robot(&self, f: impl FnOnce(&mut RobotState)) {
        f(&mut self.robot.borrow_mut());
    }

    /// Move the clock forward by `dt` and count one tick.
    pub fn advance(&self, dt: Duration) {
        self.now.set(self.now.get() + dt);
        self.tick.set(self.tick.get() + 1);
    }

    /// Deliver `event` to every matching subscriber, in subscription order,
    /// and latch it as pending.
    ///
    /// Handlers may subscribe or unsubscribe while being called; the set of
    /// recipients is fixed before the first handler runs.
    pub fn publish(&self, event: WorldEvent) {
        self.pending
            .borrow_mut()
            .insert(event.tag.clone(), event.clone());

        let recipients: Vec<Rc<dyn Fn(&WorldEvent)>> = self
            .subscriptions
            .borrow()
            .values()
            .filter(|s| s.tag == event.tag)
            .map(|s| Rc::clone(&s.handler))
            .collect();

        debug!(tag = %event.tag, recipients = recipients.len(), "world event delivered");
        for handler in recipients {
            handler(&event);
        }
    }

    /// Remove and return the pending event tagged `tag`.
    pub fn take_pending_event(&self, tag: &str) -> Option<WorldEvent> {
        self.pending.borrow_mut().remove(tag)
    }

    /// Number of live subscriptions for `tag`.
    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.subscriptions
            .borrow()
            .values()
            .filter(|s| s.tag == tag)
            .count()
    }

    /// Union of every owner's current observation requests.
    pub fn active_observations(&self) -> BTreeSet<ObservationRequirement> {
        self.observations
            .borrow()
            .values()
            .flat_map(|reqs| reqs.iter().cloned())
            .collect()
    }

    /// Observation requests currently held by `owner`.
    pub fn observations_for(&self, owner: &str) -> BTreeSet<ObservationRequirement> {
        self.observations
            .borrow()
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }
}

impl WorldView for SimWorld {
    fn robot(&self) -> RobotState {
        self.robot.borrow().clone()
    }

    fn now(&self) -> Duration {
        self.now.get()
    }

    fn tick_count(&self) -> u64 {
        self.tick.get()
    }

    fn subscribe(&self, tag: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        self.subscriptions.borrow_mut().insert(
            id,
            Subscription {
                tag: tag.to_string(),
                handler: Rc::from(handler),
            },
        );
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.borrow_mut().remove(&id);
    }

    fn is_event_pending(&self, tag: &str) -> bool {
        self.pending.borrow().contains_key(tag)
    }

    fn clear_pending_event(&self, tag: &str) {
        self.pending.borrow_mut().remove(tag);
    }

    fn publish_event(&self, event: WorldEvent) {
        self.publish(event);
    }

    fn request_observations(&self, owner: &str, requirements: &BTreeSet<ObservationRequirement>) {
        let mut observations = self.observations.borrow_mut();
        if requirements.is_empty() {
            observations.remove(owner);
        } else {
            observations.insert(owner.to_string(), requirements.clone());
        }
    }

    fn release_observations(&self, owner: &str) {
        self.observations.borrow_mut().remove(owner);
    }
}
