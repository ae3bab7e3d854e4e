//! Error taxonomy.
//!
//! - [`ConfigError`]: fatal configuration problems found once at startup.
//! - [`ArbitrationError`]: recoverable control conflicts returned to the
//!   behavior that asked for control.
//! - [`ArbiterError`]: umbrella returned by startup paths.

use thiserror::Error;

use crate::BehaviorId;

/// Fatal configuration errors. The behavior system refuses to start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("state '{0}' is declared more than once")]
    DuplicateState(String),

    #[error("{context} references unknown state '{name}'")]
    UnknownState { context: String, name: String },

    #[error("initial state '{0}' does not exist")]
    UnknownInitialState(String),

    #[error("transition definition has an empty 'from' list")]
    EmptyFromList,

    #[error("no predefined strategy named '{0}'")]
    UnknownStrategy(String),

    #[error("state '{state}' must declare exactly one of a behavior or cancel_self")]
    MissingBehavior { state: String },

    #[error("invalid condition '{condition}': {reason}")]
    InvalidCondition { condition: String, reason: String },

    #[error("behavior '{0}' is registered more than once")]
    DuplicateBehavior(BehaviorId),

    #[error("'{referenced_by}' references unregistered behavior '{behavior}'")]
    UnknownBehavior {
        referenced_by: String,
        behavior: BehaviorId,
    },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Runtime arbitration conflicts. Never escalated to a panic; the caller
/// decides whether to retry, fall back, or give up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationError {
    #[error("'{behavior}' is already delegated to by {}", owner_label(.owner))]
    AlreadyDelegatedByOther {
        behavior: BehaviorId,
        owner: Option<BehaviorId>,
    },

    #[error("'{behavior}' is not in control and cannot delegate")]
    NotInControl { behavior: BehaviorId },

    #[error("unknown behavior '{0}'")]
    UnknownBehavior(BehaviorId),

    #[error("'{0}' is busy on the call stack and cannot be re-entered")]
    Reentrant(BehaviorId),

    #[error("control chain already has root '{root}'")]
    ChainOccupied { root: BehaviorId },
}

fn owner_label(owner: &Option<BehaviorId>) -> String {
    match owner {
        Some(o) => format!("'{o}'"),
        None => "<root>".to_string(),
    }
}

/// Umbrella error for startup and initialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("arbitration error: {0}")]
    Arbitration(#[from] ArbitrationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_delegated_names_owner() {
        let err = ArbitrationError::AlreadyDelegatedByOther {
            behavior: BehaviorId::new("TrackLaser"),
            owner: Some(BehaviorId::new("GuardDog")),
        };
        let msg = err.to_string();
        assert!(msg.contains("TrackLaser"));
        assert!(msg.contains("'GuardDog'"));
    }

    #[test]
    fn already_delegated_by_root() {
        let err = ArbitrationError::AlreadyDelegatedByOther {
            behavior: BehaviorId::new("Root"),
            owner: None,
        };
        assert!(err.to_string().contains("<root>"));
    }

    #[test]
    fn config_error_converts_into_umbrella() {
        let err: ArbiterError = ConfigError::UnknownInitialState("Nope".into()).into();
        assert!(matches!(err, ArbiterError::Config(ConfigError::UnknownInitialState(_))));
        assert!(err.to_string().contains("Nope"));
    }
}
