use crate::CoreError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Uninitialized,
    Starting,
    Ready,
    Stopped,
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(unit: &str, from: UnitState, to: UnitState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (UnitState::Uninitialized, UnitState::Starting | UnitState::Stopped)
            | (
                UnitState::Starting,
                UnitState::Ready | UnitState::Failed | UnitState::Stopped
            )
            | (UnitState::Ready, UnitState::Failed | UnitState::Stopped)
            | (UnitState::Failed, UnitState::Stopped)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            unit: unit.to_owned(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use UnitState::*;
        assert!(validate_transition("u", Uninitialized, Starting).is_ok());
        assert!(validate_transition("u", Uninitialized, Stopped).is_ok()); // never started
        assert!(validate_transition("u", Starting, Ready).is_ok());
        assert!(validate_transition("u", Starting, Failed).is_ok());
        assert!(validate_transition("u", Starting, Stopped).is_ok()); // cancelled mid-start
        assert!(validate_transition("u", Ready, Stopped).is_ok());
        assert!(validate_transition("u", Failed, Stopped).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        use UnitState::*;
        assert!(validate_transition("u", Uninitialized, Ready).is_err());
        assert!(validate_transition("u", Ready, Starting).is_err());
        assert!(validate_transition("u", Stopped, Starting).is_err());
        assert!(validate_transition("u", Stopped, Stopped).is_err());
        assert!(validate_transition("u", Failed, Ready).is_err());
    }

    #[test]
    fn error_names_the_unit() {
        let err = validate_transition("db", UnitState::Stopped, UnitState::Ready).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition for unit 'db': stopped -> ready"
        );
    }
}
