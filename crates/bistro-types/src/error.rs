use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-visible failure taxonomy.
///
/// Tool-level kinds are recovered by showing them to the model as a tool
/// turn. The rest end the current turn with a failed assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Tool arguments did not match the tool's schema.
    InvalidArguments,
    /// The tool's external call failed after its single retry.
    ToolExecutionFailed,
    ModelTimeout,
    ModelTransportFailure,
    /// The system instructions alone exceed the token budget.
    BudgetUnsatisfiable,
    /// Too many AGENT/TOOLS round trips for one external message.
    LoopBoundExceeded,
}

impl FailureKind {
    /// Whether this kind ends the turn rather than being fed back to the model.
    pub fn is_terminal(self) -> bool {
        !matches!(self, FailureKind::InvalidArguments | FailureKind::ToolExecutionFailed)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::ToolExecutionFailed => "tool_execution_failed",
            FailureKind::ModelTimeout => "model_timeout",
            FailureKind::ModelTransportFailure => "model_transport_failure",
            FailureKind::BudgetUnsatisfiable => "budget_unsatisfiable",
            FailureKind::LoopBoundExceeded => "loop_bound_exceeded",
        };
        f.write_str(name)
    }
}

/// Errors from repository operations (used by store traits in bistro-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_serde_matches_display() {
        for kind in [
            FailureKind::InvalidArguments,
            FailureKind::ToolExecutionFailed,
            FailureKind::ModelTimeout,
            FailureKind::ModelTransportFailure,
            FailureKind::BudgetUnsatisfiable,
            FailureKind::LoopBoundExceeded,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_tool_kinds_are_recoverable() {
        assert!(!FailureKind::InvalidArguments.is_terminal());
        assert!(!FailureKind::ToolExecutionFailed.is_terminal());
        assert!(FailureKind::ModelTimeout.is_terminal());
        assert!(FailureKind::LoopBoundExceeded.is_terminal());
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
