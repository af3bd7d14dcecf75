//! Signing session state machine
//!
//! ```text
//! IDLE → AGENT_DISCOVERY → CERT_ENUMERATION → AWAITING_SELECTION → SIGNING → SUBMITTING → COMPLETE
//!                                                    ↑                 │
//!                                                    └─────────────────┘  (signing failed)
//! ```
//!
//! `ERROR` is reachable from every non-terminal state, `CANCELLED` from every
//! state before `SUBMITTING`.

use crate::error::SigningError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    AgentDiscovery,
    CertEnumeration,
    AwaitingSelection,
    Signing,
    Submitting,
    Complete,
    Error,
    Cancelled,
}

impl SessionState {
    pub const ALL: [Self; 9] = [
        Self::Idle,
        Self::AgentDiscovery,
        Self::CertEnumeration,
        Self::AwaitingSelection,
        Self::Signing,
        Self::Submitting,
        Self::Complete,
        Self::Error,
        Self::Cancelled,
    ];

    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// States from which the user may still cancel
    #[inline]
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Idle
                | Self::AgentDiscovery
                | Self::CertEnumeration
                | Self::AwaitingSelection
                | Self::Signing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::AgentDiscovery => "AGENT_DISCOVERY",
            Self::CertEnumeration => "CERT_ENUMERATION",
            Self::AwaitingSelection => "AWAITING_SELECTION",
            Self::Signing => "SIGNING",
            Self::Submitting => "SUBMITTING",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[must_use]
pub fn allowed_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::{
        AgentDiscovery, AwaitingSelection, Cancelled, CertEnumeration, Complete, Error, Idle,
        Signing, Submitting,
    };
    match from {
        Idle => vec![AgentDiscovery, Error, Cancelled],
        AgentDiscovery => vec![CertEnumeration, Error, Cancelled],
        CertEnumeration => vec![AwaitingSelection, Error, Cancelled],
        AwaitingSelection => vec![Signing, Error, Cancelled],
        Signing => vec![Submitting, AwaitingSelection, Error, Cancelled],
        Submitting => vec![Complete, Error],
        Complete | Error | Cancelled => vec![],
    }
}

/// # Errors
/// `IllegalTransition` when `to` is not reachable from `from`.
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), SigningError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SigningError::IllegalTransition { from, to })
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_path_is_allowed() {
        use SessionState::*;
        let path = [
            Idle,
            AgentDiscovery,
            CertEnumeration,
            AwaitingSelection,
            Signing,
            Submitting,
            Complete,
        ];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn signing_failure_returns_to_selection() {
        validate_transition(SessionState::Signing, SessionState::AwaitingSelection).unwrap();
    }

    #[test]
    fn submitting_cannot_be_cancelled() {
        assert!(validate_transition(SessionState::Submitting, SessionState::Cancelled).is_err());
        assert!(!SessionState::Submitting.is_cancellable());
    }

    #[test]
    fn signing_is_not_rerun_from_submitting() {
        assert!(validate_transition(SessionState::Submitting, SessionState::Signing).is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingSelection).unwrap();
        assert_eq!(json, "\"AWAITING_SELECTION\"");
        assert_eq!(SessionState::AwaitingSelection.to_string(), "AWAITING_SELECTION");
    }

    fn any_state() -> impl Strategy<Value = SessionState> {
        prop_oneof![
            Just(SessionState::Idle),
            Just(SessionState::AgentDiscovery),
            Just(SessionState::CertEnumeration),
            Just(SessionState::AwaitingSelection),
            Just(SessionState::Signing),
            Just(SessionState::Submitting),
            Just(SessionState::Complete),
            Just(SessionState::Error),
            Just(SessionState::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn error_reachable_from_every_non_terminal(state in any_state()) {
            let reachable = validate_transition(state, SessionState::Error).is_ok();
            prop_assert_eq!(reachable, !state.is_terminal());
        }

        #[test]
        fn cancel_reachable_exactly_before_submitting(state in any_state()) {
            let reachable = validate_transition(state, SessionState::Cancelled).is_ok();
            prop_assert_eq!(reachable, state.is_cancellable());
        }

        #[test]
        fn terminal_states_have_no_exit(state in any_state(), to in any_state()) {
            if state.is_terminal() {
                prop_assert!(validate_transition(state, to).is_err());
            }
        }
    }
}
