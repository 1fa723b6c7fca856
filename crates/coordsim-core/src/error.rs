//! Error types for the coordination simulator

use std::time::Duration;

use thiserror::Error;

use crate::ProcessId;

/// Coordination errors
///
/// Per-round timeouts and dead-process exclusions are absorbed inside the
/// algorithm step that hit them. Configuration errors and invariant
/// violations reach the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordError {
    // Round errors
    #[error("Reply timeout: {stage} did not complete within {timeout:?}")]
    ReplyTimeout {
        stage: &'static str,
        timeout: Duration,
    },

    #[error("Process {0} is dead")]
    ProcessDead(ProcessId),

    // Configuration errors
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown process: {0}")]
    UnknownProcess(ProcessId),

    // Invariant violations
    #[error("Duplicate token: held by {holders:?}")]
    DuplicateToken { holders: Vec<ProcessId> },

    #[error("Missing token")]
    MissingToken,

    #[error("Token is already circulating")]
    TokenBusy,

    // Lifecycle errors
    #[error("Simulation not started")]
    NotStarted,

    #[error("Simulation shut down")]
    ShutDown,
}

impl CoordError {
    /// Invariant violations indicate a bug, never an expected runtime condition
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CoordError::DuplicateToken { .. } | CoordError::MissingToken
        )
    }
}

/// Result type for coordination operations
pub type CoordResult<T> = Result<T, CoordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_classification() {
        assert!(CoordError::MissingToken.is_invariant_violation());
        assert!(CoordError::DuplicateToken {
            holders: vec![ProcessId(1), ProcessId(2)]
        }
        .is_invariant_violation());
        assert!(!CoordError::ProcessDead(ProcessId(1)).is_invariant_violation());
    }

    #[test]
    fn test_error_messages() {
        let err = CoordError::DuplicateToken {
            holders: vec![ProcessId(1), ProcessId(4)],
        };
        assert_eq!(
            err.to_string(),
            "Duplicate token: held by [Process(1), Process(4)]"
        );
        assert_eq!(
            CoordError::InvalidTopology("1 member".into()).to_string(),
            "Invalid topology: 1 member"
        );
    }
}
