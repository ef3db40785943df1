//! The result of one batch execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exactly one of these is produced per execution.
///
/// The success payload is untyped JSON: a transformation may return events
/// in any shape (or values that are not events at all), and the engine
/// hands them back as they came out of the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(Vec<Value>),
    RuntimeError(String),
    TimeoutError,
    ResolutionError(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Outcomes after which the instance must not be reused
    pub fn disposes_instance(&self) -> bool {
        matches!(self, Self::TimeoutError | Self::ResolutionError(_))
    }

    /// Label used in logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RuntimeError(_) => "runtime_error",
            Self::TimeoutError => "timeout",
            Self::ResolutionError(_) => "resolution_error",
        }
    }

    pub fn into_batch(self) -> Option<Vec<Value>> {
        match self {
            Self::Success(batch) => Some(batch),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn disposal_policy() {
        assert!(ExecutionOutcome::TimeoutError.disposes_instance());
        assert!(ExecutionOutcome::ResolutionError("none".into()).disposes_instance());
        assert!(!ExecutionOutcome::RuntimeError("boom".into()).disposes_instance());
        assert!(!ExecutionOutcome::Success(vec![]).disposes_instance());
    }

    #[test]
    fn tagged_json_shape() {
        let outcome = ExecutionOutcome::Success(vec![json!({ "a": 1 })]);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({ "status": "success", "value": [{ "a": 1 }] })
        );
        assert_eq!(
            serde_json::to_value(ExecutionOutcome::TimeoutError).unwrap(),
            json!({ "status": "timeout_error" })
        );
    }
}
