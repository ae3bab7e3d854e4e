//! [`ConditionFactory`] – builds conditions from their configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use arbiter_types::{ConditionConfig, ConfigError};

use crate::condition::{
    CompoundCondition, Condition, ConstantCondition, EventPending, EventReceived, RobotCheck,
    RobotStateCondition, StateExitCooldown, TimeInState, TimerInRange,
};

/// Stateless constructor for built-in conditions.
pub struct ConditionFactory;

impl ConditionFactory {
    /// Build the condition described by `config`.
    ///
    /// `known_states` is the set of state names of the owning machine;
    /// conditions that name a state are checked against it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownState`] – a cooldown names a missing state.
    /// - [`ConfigError::InvalidCondition`] – malformed timing or compound.
    pub fn create(
        config: &ConditionConfig,
        known_states: &BTreeSet<String>,
    ) -> Result<Box<dyn Condition>, ConfigError> {
        let condition: Box<dyn Condition> = match config {
            ConditionConfig::TrueCondition => Box::new(ConstantCondition::new(true)),
            ConditionConfig::FalseCondition => Box::new(ConstantCondition::new(false)),
            ConditionConfig::OnCharger => Box::new(RobotStateCondition::new(RobotCheck::OnCharger)),
            ConditionConfig::BatteryBelow { percent } => {
                Box::new(RobotStateCondition::new(RobotCheck::BatteryBelow(*percent)))
            }
            ConditionConfig::CliffDetected => {
                Box::new(RobotStateCondition::new(RobotCheck::CliffDetected))
            }
            ConditionConfig::CarryingObject => {
                Box::new(RobotStateCondition::new(RobotCheck::CarryingObject))
            }
            ConditionConfig::TimerInRange { begin_s, end_s } => {
                let begin = seconds(config, *begin_s)?;
                let end = end_s.map(|e| seconds(config, e)).transpose()?;
                if end.is_some_and(|e| e <= begin) {
                    return Err(invalid(config, "end_s must be greater than begin_s"));
                }
                Box::new(TimerInRange::new(begin, end))
            }
            ConditionConfig::EventReceived { event } => Box::new(EventReceived::new(event.clone())),
            ConditionConfig::EventPending { event } => Box::new(EventPending::new(event.clone())),
            ConditionConfig::TimeInState { at_least_s } => {
                Box::new(TimeInState::new(seconds(config, *at_least_s)?))
            }
            ConditionConfig::StateExitCooldown {
                state,
                cooldown_s,
                value_if_never_run,
            } => {
                if !known_states.contains(state) {
                    return Err(ConfigError::UnknownState {
                        context: "StateExitCooldown condition".to_string(),
                        name: state.clone(),
                    });
                }
                Box::new(StateExitCooldown::new(
                    state.clone(),
                    seconds(config, *cooldown_s)?,
                    *value_if_never_run,
                ))
            }
            ConditionConfig::Compound { and, or, not } => match (and, or, not) {
                (Some(children), None, None) => {
                    Box::new(CompoundCondition::and(Self::create_all(children, known_states)?))
                }
                (None, Some(children), None) => {
                    Box::new(CompoundCondition::or(Self::create_all(children, known_states)?))
                }
                (None, None, Some(child)) => {
                    Box::new(CompoundCondition::not(Self::create(child, known_states)?))
                }
                _ => {
                    return Err(invalid(
                        config,
                        "exactly one of 'and', 'or', 'not' must be given",
                    ));
                }
            },
        };
        Ok(condition)
    }

    fn create_all(
        configs: &[ConditionConfig],
        known_states: &BTreeSet<String>,
    ) -> Result<Vec<Box<dyn Condition>>, ConfigError> {
        configs
            .iter()
            .map(|c| Self::create(c, known_states))
            .collect()
    }
}

fn invalid(config: &ConditionConfig, reason: &str) -> ConfigError {
    ConfigError::InvalidCondition {
        condition: config.type_name().to_string(),
        reason: reason.to_string(),
    }
}

fn seconds(config: &ConditionConfig, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| invalid(config, "durations must be finite and non-negative"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionContext;
    use arbiter_kernel::SimWorld;

    fn states(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_robot_predicate() {
        let world = SimWorld::new();
        world.update_robot(|r| r.battery_percent = 5);
        let cond =
            ConditionFactory::create(&ConditionConfig::BatteryBelow { percent: 10 }, &states(&[]))
                .unwrap();
        assert!(cond.are_conditions_met(&ConditionContext::new(&world)));
    }

    #[test]
    fn cooldown_must_name_known_state() {
        let cfg = ConditionConfig::StateExitCooldown {
            state: "Pounce".into(),
            cooldown_s: 3.0,
            value_if_never_run: true,
        };
        let err = ConditionFactory::create(&cfg, &states(&["Idle"])).err();
        assert!(matches!(err, Some(ConfigError::UnknownState { .. })));
        assert!(ConditionFactory::create(&cfg, &states(&["Pounce"])).is_ok());
    }

    #[test]
    fn compound_needs_exactly_one_operator() {
        let cfg = ConditionConfig::Compound {
            and: Some(vec![ConditionConfig::TrueCondition]),
            or: Some(vec![ConditionConfig::FalseCondition]),
            not: None,
        };
        let err = ConditionFactory::create(&cfg, &states(&[])).err();
        assert!(matches!(err, Some(ConfigError::InvalidCondition { .. })));

        let empty = ConditionConfig::Compound {
            and: None,
            or: None,
            not: None,
        };
        assert!(ConditionFactory::create(&empty, &states(&[])).is_err());
    }

    #[test]
    fn nested_compound_is_checked_recursively() {
        let cfg = ConditionConfig::Compound {
            and: None,
            or: None,
            not: Some(Box::new(ConditionConfig::StateExitCooldown {
                state: "Ghost".into(),
                cooldown_s: 1.0,
                value_if_never_run: false,
            })),
        };
        assert!(ConditionFactory::create(&cfg, &states(&["Idle"])).is_err());
    }

    #[test]
    fn timer_rejects_bad_ranges() {
        let negative = ConditionConfig::TimerInRange {
            begin_s: -1.0,
            end_s: None,
        };
        assert!(ConditionFactory::create(&negative, &states(&[])).is_err());

        let inverted = ConditionConfig::TimerInRange {
            begin_s: 2.0,
            end_s: Some(1.0),
        };
        assert!(ConditionFactory::create(&inverted, &states(&[])).is_err());
    }
}
