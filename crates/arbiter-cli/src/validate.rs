//! Offline validation of a state machine file.
//!
//! Named strategies are supplied by code at runtime, so a bare config file
//! cannot resolve them. Every name referenced by a transition is bound to a
//! placeholder that is never true; the structure is then validated exactly
//! as the runtime would.

use std::collections::BTreeSet;

use arbiter_runtime::{ConditionInfo, ConditionLambda, StateMachineBuilder};
use arbiter_types::{ConditionSpec, ConfigError, StateMachineConfig};

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub initial_state: String,
    /// Outgoing transition conditions per state, in evaluation order.
    pub states: Vec<(String, Vec<ConditionInfo>)>,
    /// Strategy names the host program must register.
    pub required_strategies: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// Every strategy name referenced by a transition.
pub fn referenced_strategies(config: &StateMachineConfig) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = config
        .transition_definitions
        .iter()
        .flat_map(|def| {
            def.interrupting_transitions
                .iter()
                .chain(&def.non_interrupting_transitions)
                .chain(&def.exit_transitions)
        })
        .filter_map(|t| match &t.condition {
            ConditionSpec::Named(name) => Some(name.clone()),
            ConditionSpec::Inline(_) => None,
        })
        .collect();
    // State timers are defined by the config itself.
    for timer in &config.state_timer_conditions {
        names.remove(&timer.name);
    }
    names
}

/// Build the machine with placeholder strategies and report its shape.
pub fn validate(config: StateMachineConfig) -> Result<ValidationReport, ConfigError> {
    let required_strategies = referenced_strategies(&config);
    let initial_state = config.initial_state.clone();

    let mut builder = StateMachineBuilder::new("Validate", config);
    for name in &required_strategies {
        builder = builder.with_strategy(name, ConditionLambda::new(name.clone(), |_| false));
    }
    let machine = builder.build()?;

    Ok(ValidationReport {
        initial_state,
        states: machine.all_transitions(),
        required_strategies,
        warnings: machine.warnings().to_vec(),
    })
}
