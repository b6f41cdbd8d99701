use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AbilityCid, AppId, AppVersion, CorrelationId, PolicyCid};
use crate::outcome::PhaseOutcome;

/// Which lifecycle an invocation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Side-effect-free dry run: policy prechecks, then the ability's
    /// precheck. No commits.
    Precheck,
    /// Policy evaluates, the ability's execute, then policy commits.
    Execute,
}

/// A grant read from the permission registry.
///
/// Authoritative, read-only input to every invocation; the framework never
/// mutates it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub app_id: AppId,
    pub app_version: AppVersion,
    pub is_permitted: bool,
    /// Decoded policy parameters, keyed by policy cid.
    pub policy_parameters: HashMap<PolicyCid, HashMap<String, Value>>,
}

impl PermissionGrant {
    /// A grant that permits nothing.
    pub fn denied() -> Self {
        Self {
            app_id: AppId(0),
            app_version: AppVersion(0),
            is_permitted: false,
            policy_parameters: HashMap::new(),
        }
    }

    /// A permitting grant with no pinned policy parameters.
    pub fn permitted(app_id: AppId, app_version: AppVersion) -> Self {
        Self {
            app_id,
            app_version,
            is_permitted: true,
            policy_parameters: HashMap::new(),
        }
    }

    pub fn parameters_for(&self, policy: &PolicyCid) -> Option<&HashMap<String, Value>> {
        self.policy_parameters.get(policy)
    }
}

/// A framework-level fault: the implementation misbehaved, as opposed to a
/// phase legitimately failing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFault {
    pub kind: FaultKind,
    /// Sanitized per the engine's redaction setting; full detail goes to the
    /// log with the correlation id.
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// A policy phase handler returned an error.
    PolicyExecution,
    /// The ability phase handler returned an error.
    AbilityExecution,
    /// A constructed result payload did not match its declared schema.
    ResultSchemaValidation,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why a policy denied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PolicyDenial {
    /// The phase explicitly failed, with its declared (schema-gated) result.
    Refused { result: Option<Value> },
    /// The phase faulted: handler error or result schema violation.
    Fault { fault: RuntimeFault },
}

/// Verdict for a policy that allowed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllowedPolicy {
    pub policy: PolicyCid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    /// False when the policy declared no phase for this mode and allowed by
    /// default.
    pub phase_ran: bool,
}

/// The first denial hit during an evaluation pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeniedPolicy {
    pub policy: PolicyCid,
    pub denial: PolicyDenial,
}

/// Aggregate verdicts from one evaluation pass over an ability's policies.
///
/// `allow` is false iff `denied` is set. `allowed` preserves declared order
/// and, on denial, holds only the policies that allowed before the halt;
/// never-run policies contribute nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyVerdicts {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<DeniedPolicy>,
    pub allowed: Vec<AllowedPolicy>,
}

impl PolicyVerdicts {
    pub fn allowed(allowed: Vec<AllowedPolicy>) -> Self {
        Self {
            allow: true,
            denied: None,
            allowed,
        }
    }

    pub fn denied(denied: DeniedPolicy, allowed_before_halt: Vec<AllowedPolicy>) -> Self {
        Self {
            allow: false,
            denied: Some(denied),
            allowed: allowed_before_halt,
        }
    }

    pub fn lookup(&self, policy: &PolicyCid) -> Option<&AllowedPolicy> {
        self.allowed.iter().find(|entry| entry.policy == *policy)
    }
}

/// Result of one policy's commit phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitRecord {
    pub policy: PolicyCid,
    pub outcome: CommitOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CommitOutcome {
    Succeeded(Option<Value>),
    Failed(Option<Value>),
    Faulted(RuntimeFault),
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommitOutcome::Succeeded(_))
    }
}

impl From<PhaseOutcome> for CommitOutcome {
    fn from(outcome: PhaseOutcome) -> Self {
        match outcome {
            PhaseOutcome::Succeeded(payload) => CommitOutcome::Succeeded(payload),
            PhaseOutcome::Failed(payload) => CommitOutcome::Failed(payload),
        }
    }
}

/// The single structured result of an invocation.
///
/// `success` is true iff the policies allowed and the ability phase
/// succeeded. Commit results are reported alongside for observability and
/// never change it: once execute succeeded, "executed but bookkeeping
/// failed" is still executed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvocationReport {
    pub success: bool,
    pub mode: ExecutionMode,
    pub ability: AbilityCid,
    pub app_id: AppId,
    pub app_version: AppVersion,
    /// Payload from the ability phase, when it produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub policies: PolicyVerdicts,
    /// Per-policy commit results, in declared order. Empty for prechecks and
    /// for invocations that never reached the commit pass.
    pub commits: Vec<CommitRecord>,
    /// Set when the ability phase faulted instead of producing an outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<RuntimeFault>,
    pub correlation_id: CorrelationId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl InvocationReport {
    pub fn commit_for(&self, policy: &PolicyCid) -> Option<&CommitRecord> {
        self.commits.iter().find(|record| record.policy == *policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdicts_allow_tracks_denial() {
        let allowed = PolicyVerdicts::allowed(vec![AllowedPolicy {
            policy: PolicyCid::new("QmA"),
            outcome: Some(json!({"limit": 100})),
            phase_ran: true,
        }]);
        assert!(allowed.allow);
        assert!(allowed.denied.is_none());

        let denied = PolicyVerdicts::denied(
            DeniedPolicy {
                policy: PolicyCid::new("QmB"),
                denial: PolicyDenial::Refused {
                    result: Some(json!({"reason": "over limit"})),
                },
            },
            vec![],
        );
        assert!(!denied.allow);
        assert!(denied.denied.is_some());
    }

    #[test]
    fn verdicts_lookup_by_cid() {
        let verdicts = PolicyVerdicts::allowed(vec![
            AllowedPolicy {
                policy: PolicyCid::new("QmA"),
                outcome: None,
                phase_ran: false,
            },
            AllowedPolicy {
                policy: PolicyCid::new("QmB"),
                outcome: Some(json!(7)),
                phase_ran: true,
            },
        ]);

        let entry = verdicts.lookup(&PolicyCid::new("QmB")).unwrap();
        assert_eq!(entry.outcome, Some(json!(7)));
        assert!(verdicts.lookup(&PolicyCid::new("QmC")).is_none());
    }

    #[test]
    fn commit_outcome_from_phase_outcome() {
        let ok = CommitOutcome::from(PhaseOutcome::succeed_with(json!({"spent": 5})));
        assert!(ok.is_success());
        let failed = CommitOutcome::from(PhaseOutcome::fail());
        assert!(!failed.is_success());
    }

    #[test]
    fn grant_parameter_lookup() {
        let mut grant = PermissionGrant::permitted(AppId(7), AppVersion(2));
        grant.policy_parameters.insert(
            PolicyCid::new("QmSpend"),
            HashMap::from([("maxAmount".to_string(), json!(250))]),
        );

        let params = grant.parameters_for(&PolicyCid::new("QmSpend")).unwrap();
        assert_eq!(params.get("maxAmount"), Some(&json!(250)));
        assert!(grant.parameters_for(&PolicyCid::new("QmOther")).is_none());
    }
}
