use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single lifecycle phase.
///
/// Every phase terminates by constructing exactly one of these through
/// [`succeed`](PhaseOutcome::succeed) / [`fail`](PhaseOutcome::fail) (or the
/// `_with` variants carrying a payload). A handler that returns an error
/// instead of an outcome is reported as a runtime fault, never as an
/// outcome; the pipeline keeps the two apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PhaseOutcome {
    Succeeded(Option<Value>),
    Failed(Option<Value>),
}

impl PhaseOutcome {
    /// Success with no payload.
    pub fn succeed() -> Self {
        PhaseOutcome::Succeeded(None)
    }

    /// Success carrying a payload.
    pub fn succeed_with(payload: Value) -> Self {
        PhaseOutcome::Succeeded(Some(payload))
    }

    /// Failure with no payload.
    pub fn fail() -> Self {
        PhaseOutcome::Failed(None)
    }

    /// Failure carrying a payload.
    pub fn fail_with(payload: Value) -> Self {
        PhaseOutcome::Failed(Some(payload))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PhaseOutcome::Succeeded(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            PhaseOutcome::Succeeded(payload) | PhaseOutcome::Failed(payload) => payload.as_ref(),
        }
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            PhaseOutcome::Succeeded(payload) | PhaseOutcome::Failed(payload) => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_tag_the_branch() {
        assert!(PhaseOutcome::succeed().is_success());
        assert!(PhaseOutcome::succeed_with(json!({"ok": true})).is_success());
        assert!(!PhaseOutcome::fail().is_success());
        assert!(!PhaseOutcome::fail_with(json!({"reason": "x"})).is_success());
    }

    #[test]
    fn payload_is_branch_independent() {
        let payload = json!({"quote": 42});
        assert_eq!(
            PhaseOutcome::succeed_with(payload.clone()).payload(),
            Some(&payload)
        );
        assert_eq!(
            PhaseOutcome::fail_with(payload.clone()).into_payload(),
            Some(payload)
        );
        assert_eq!(PhaseOutcome::succeed().payload(), None);
    }
}
