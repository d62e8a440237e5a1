//! The asset lifecycle state machine.
//!
//! States form a closed set; transitions are validated by a pure function
//! so the policy engine and the HTTP layer share one source of truth.
//! Leaving `archived` is allowed but always needs approval, on top of
//! whatever gates the policy document adds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Draft,
    Approved,
    Deprecated,
    Archived,
}

impl LifecycleState {
    pub fn all() -> [LifecycleState; 4] {
        [
            LifecycleState::Draft,
            LifecycleState::Approved,
            LifecycleState::Deprecated,
            LifecycleState::Archived,
        ]
    }

    pub fn parse(raw: &str) -> Option<LifecycleState> {
        match raw {
            "draft" => Some(LifecycleState::Draft),
            "approved" => Some(LifecycleState::Approved),
            "deprecated" => Some(LifecycleState::Deprecated),
            "archived" => Some(LifecycleState::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Approved => "approved",
            LifecycleState::Deprecated => "deprecated",
            LifecycleState::Archived => "archived",
        }
    }
}

/// Validates a transition. Returns the denial reason for forbidden edges.
pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<(), String> {
    use LifecycleState::*;
    let allowed = matches!(
        (from, to),
        (Draft, Approved)
            | (Approved, Deprecated)
            | (Approved, Archived)
            | (Deprecated, Archived)
            | (Archived, Deprecated)
            | (Archived, Draft)
    );
    if allowed {
        Ok(())
    } else {
        Err(format!(
            "transition {} -> {} is not allowed",
            from.as_str(),
            to.as_str()
        ))
    }
}

/// Transitions that need approval even without a matching policy gate.
pub fn transition_requires_approval(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!((from, to), (Archived, Deprecated) | (Archived, Draft))
}
