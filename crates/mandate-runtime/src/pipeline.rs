//! Phase execution plumbing shared by precheck and execute invocations.

use mandate_schema::{describe_violations, Schema, SchemaViolation};
use mandate_types::{
    AllowedPolicy, CommitOutcome, CommitRecord, DeniedPolicy, FaultKind, PermissionGrant,
    PhaseOutcome, PolicyDenial, PolicyVerdicts, RuntimeFault,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::ability::{AbilityDefinition, AbilityPhaseSpec, PolicyBinding};
use crate::context::{AbilityContext, InvocationScope, PolicyContext, PolicyPhase};
use crate::error::EngineError;
use crate::policy::PolicyPhaseSpec;

const NULL: Value = Value::Null;

const REDACTED_MESSAGE: &str = "internal error; see logs for correlation id";

fn fault(kind: FaultKind, detail: String, redact: bool) -> RuntimeFault {
    if redact {
        RuntimeFault::new(kind, REDACTED_MESSAGE)
    } else {
        RuntimeFault::new(kind, detail)
    }
}

/// A policy binding with its per-invocation input already assembled and
/// validated against the policy's parameter schema.
#[derive(Debug)]
pub(crate) struct PreparedPolicy<'a> {
    pub(crate) binding: &'a PolicyBinding,
    pub(crate) input: Value,
}

/// Assemble each bound policy's input from the caller parameters and the
/// grant, then validate it against the policy's parameter schema.
///
/// Mapped caller values are written first, grant-supplied values second, so
/// the chain always wins a collision. Runs before any phase, so a violation
/// here surfaces as an error rather than a fault.
pub(crate) fn prepare_policies<'a>(
    definition: &'a AbilityDefinition,
    parameters: &Value,
    grant: &PermissionGrant,
) -> Result<Vec<PreparedPolicy<'a>>, EngineError> {
    let mut prepared = Vec::with_capacity(definition.policies().len());

    for binding in definition.policies() {
        let mut input = Map::new();

        for (ability_parameter, policy_parameter) in binding.mapping() {
            if let Some(value) = parameters.get(ability_parameter) {
                input.insert(policy_parameter.clone(), value.clone());
            }
        }
        if let Some(chain_parameters) = grant.parameters_for(binding.policy().cid()) {
            for (name, value) in chain_parameters {
                input.insert(name.clone(), value.clone());
            }
        }

        let input = Value::Object(input);
        if let Err(violations) = binding.policy().parameter_schema().validate(&input) {
            return Err(EngineError::PolicyParameters {
                policy: binding.policy().cid().clone(),
                violations,
            });
        }

        prepared.push(PreparedPolicy { binding, input });
    }

    Ok(prepared)
}

/// Check a phase outcome's payload against the schema declared for its
/// branch. No schema for the branch means the payload passes untouched.
pub(crate) fn gate_outcome(
    outcome: PhaseOutcome,
    success_schema: Option<&Schema>,
    failure_schema: Option<&Schema>,
) -> Result<PhaseOutcome, Vec<SchemaViolation>> {
    let schema = if outcome.is_success() {
        success_schema
    } else {
        failure_schema
    };
    if let Some(schema) = schema {
        schema.validate(outcome.payload().unwrap_or(&NULL))?;
    }
    Ok(outcome)
}

/// Run one policy phase and gate its result. Handler errors and schema
/// violations both come back as faults, distinguished by kind.
pub(crate) async fn run_policy_phase(
    spec: &PolicyPhaseSpec,
    input: Value,
    ctx: PolicyContext,
    redact: bool,
) -> Result<PhaseOutcome, RuntimeFault> {
    let policy = ctx.policy.clone();
    let phase = ctx.phase;
    let correlation_id = ctx.correlation_id;

    let outcome = match spec.handler.run(input, ctx).await {
        Ok(outcome) => outcome,
        Err(error) => {
            let detail = format!("policy {policy} {} handler failed: {error:#}", phase.as_str());
            warn!(%policy, phase = phase.as_str(), %correlation_id, "{detail}");
            return Err(fault(FaultKind::PolicyExecution, detail, redact));
        }
    };

    gate_outcome(
        outcome,
        spec.success_schema.as_deref(),
        spec.failure_schema.as_deref(),
    )
    .map_err(|violations| {
        let detail = format!(
            "policy {policy} {} result rejected by schema: {}",
            phase.as_str(),
            describe_violations(&violations)
        );
        warn!(%policy, phase = phase.as_str(), %correlation_id, "{detail}");
        fault(FaultKind::ResultSchemaValidation, detail, redact)
    })
}

/// Run the ability's precheck or execute phase and gate its result.
pub(crate) async fn run_ability_phase(
    spec: &AbilityPhaseSpec,
    input: Value,
    ctx: AbilityContext,
    redact: bool,
) -> Result<PhaseOutcome, RuntimeFault> {
    let ability = ctx.ability.clone();
    let phase = ctx.phase;
    let correlation_id = ctx.correlation_id;

    let outcome = match spec.handler.run(input, ctx).await {
        Ok(outcome) => outcome,
        Err(error) => {
            let detail = format!(
                "ability {ability} {} handler failed: {error:#}",
                phase.as_str()
            );
            warn!(%ability, phase = phase.as_str(), %correlation_id, "{detail}");
            return Err(fault(FaultKind::AbilityExecution, detail, redact));
        }
    };

    gate_outcome(
        outcome,
        spec.success_schema.as_deref(),
        spec.failure_schema.as_deref(),
    )
    .map_err(|violations| {
        let detail = format!(
            "ability {ability} {} result rejected by schema: {}",
            phase.as_str(),
            describe_violations(&violations)
        );
        warn!(%ability, phase = phase.as_str(), %correlation_id, "{detail}");
        fault(FaultKind::ResultSchemaValidation, detail, redact)
    })
}

/// Walk the bound policies in declared order, stopping at the first denial.
///
/// A policy that does not declare the requested phase allows by default and
/// is recorded with `phase_ran` false. Explicit failures and faults both
/// halt the walk; the verdicts keep whatever ran before the halt.
pub(crate) async fn evaluate_policies(
    prepared: &[PreparedPolicy<'_>],
    phase: PolicyPhase,
    scope: &InvocationScope,
    redact: bool,
) -> PolicyVerdicts {
    let mut allowed = Vec::with_capacity(prepared.len());

    for run in prepared {
        let policy = run.binding.policy();
        let cid = policy.cid().clone();

        let Some(spec) = policy.phase(phase) else {
            debug!(
                policy = %cid,
                phase = phase.as_str(),
                correlation_id = %scope.correlation_id,
                "policy does not declare phase, allowing"
            );
            allowed.push(AllowedPolicy {
                policy: cid,
                outcome: None,
                phase_ran: false,
            });
            continue;
        };

        let ctx = scope.policy_context(&cid, phase);
        match run_policy_phase(spec, run.input.clone(), ctx, redact).await {
            Ok(outcome) if outcome.is_success() => {
                allowed.push(AllowedPolicy {
                    policy: cid,
                    outcome: outcome.into_payload(),
                    phase_ran: true,
                });
            }
            Ok(outcome) => {
                return PolicyVerdicts::denied(
                    DeniedPolicy {
                        policy: cid,
                        denial: PolicyDenial::Refused {
                            result: outcome.into_payload(),
                        },
                    },
                    allowed,
                );
            }
            Err(fault) => {
                return PolicyVerdicts::denied(
                    DeniedPolicy {
                        policy: cid,
                        denial: PolicyDenial::Fault { fault },
                    },
                    allowed,
                );
            }
        }
    }

    PolicyVerdicts::allowed(allowed)
}

/// Run the commit phase of every allowed policy that declares one.
///
/// Commits never short-circuit: each policy gets its turn and each result
/// is recorded, faults included. Nothing here can change the invocation's
/// success.
pub(crate) async fn commit_policies(
    prepared: &[PreparedPolicy<'_>],
    verdicts: &PolicyVerdicts,
    execute_payload: Option<&Value>,
    scope: &InvocationScope,
    redact: bool,
) -> Vec<CommitRecord> {
    let mut records = Vec::new();

    for run in prepared {
        let policy = run.binding.policy();
        let cid = policy.cid().clone();

        if verdicts.lookup(&cid).is_none() {
            continue;
        }
        let Some(spec) = policy.phase(PolicyPhase::Commit) else {
            continue;
        };

        let input = run.binding.commit_input(&run.input, execute_payload);
        if let Some(schema) = policy.commit_parameter_schema() {
            if let Err(violations) = schema.validate(&input) {
                let detail = format!(
                    "policy {cid} commit input rejected by schema: {}",
                    describe_violations(&violations)
                );
                warn!(
                    policy = %cid,
                    correlation_id = %scope.correlation_id,
                    "{detail}"
                );
                records.push(CommitRecord {
                    policy: cid,
                    outcome: CommitOutcome::Faulted(fault(
                        FaultKind::ResultSchemaValidation,
                        detail,
                        redact,
                    )),
                });
                continue;
            }
        }

        let ctx = scope.policy_context(&cid, PolicyPhase::Commit);
        let outcome = match run_policy_phase(spec, input, ctx, redact).await {
            Ok(outcome) => CommitOutcome::from(outcome),
            Err(fault) => CommitOutcome::Faulted(fault),
        };
        records.push(CommitRecord {
            policy: cid,
            outcome,
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{AbilityDefinition, AbilityPhaseSpec, PolicyBinding};
    use crate::policy::PolicyDefinition;
    use crate::traits::{ability_handler, policy_handler};
    use mandate_types::{AbilityCid, AppId, AppVersion, PolicyCid};
    use serde_json::json;
    use std::sync::Arc;

    fn object_schema(properties: Value) -> Schema {
        Schema::compile(json!({ "type": "object", "properties": properties })).unwrap()
    }

    fn noop_execute() -> AbilityPhaseSpec {
        AbilityPhaseSpec::new(ability_handler(|_, _| async {
            Ok(PhaseOutcome::succeed())
        }))
    }

    fn ability_with_policy(policy: PolicyDefinition) -> AbilityDefinition {
        AbilityDefinition::builder(
            AbilityCid::new("QmAbility"),
            object_schema(json!({ "amount": { "type": "integer" } })),
        )
        .policy(PolicyBinding::new(Arc::new(policy)).map_parameter("amount", "limit"))
        .execute(noop_execute())
        .build()
        .unwrap()
    }

    #[test]
    fn prepare_maps_caller_parameters() {
        let policy = PolicyDefinition::builder(
            PolicyCid::new("QmLimit"),
            object_schema(json!({ "limit": { "type": "integer" } })),
        )
        .build();
        let ability = ability_with_policy(policy);

        let prepared = prepare_policies(
            &ability,
            &json!({ "amount": 7 }),
            &PermissionGrant::permitted(AppId(1), AppVersion(1)),
        )
        .unwrap();

        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].input, json!({ "limit": 7 }));
    }

    #[test]
    fn prepare_lets_grant_values_override_mapped_ones() {
        let policy = PolicyDefinition::builder(
            PolicyCid::new("QmLimit"),
            object_schema(json!({ "limit": { "type": "integer" } })),
        )
        .build();
        let ability = ability_with_policy(policy);

        let mut grant = PermissionGrant::permitted(AppId(1), AppVersion(1));
        grant.policy_parameters.insert(
            PolicyCid::new("QmLimit"),
            [("limit".to_string(), json!(100))].into_iter().collect(),
        );

        let prepared = prepare_policies(&ability, &json!({ "amount": 7 }), &grant).unwrap();
        assert_eq!(prepared[0].input, json!({ "limit": 100 }));
    }

    #[test]
    fn prepare_rejects_input_violating_policy_schema() {
        let policy = PolicyDefinition::builder(
            PolicyCid::new("QmLimit"),
            Schema::compile(json!({
                "type": "object",
                "properties": { "limit": { "type": "integer" } },
                "required": ["limit"],
            }))
            .unwrap(),
        )
        .build();
        let ability = ability_with_policy(policy);

        let err = prepare_policies(
            &ability,
            &json!({}),
            &PermissionGrant::permitted(AppId(1), AppVersion(1)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::PolicyParameters { .. }));
    }

    #[test]
    fn gate_passes_any_payload_without_schema() {
        let outcome = PhaseOutcome::succeed_with(json!({ "free": "form" }));
        let gated = gate_outcome(outcome.clone(), None, None).unwrap();
        assert_eq!(gated, outcome);
    }

    #[test]
    fn gate_checks_the_branch_that_ran() {
        let required_ok = Schema::compile(json!({
            "type": "object",
            "properties": { "ok": { "type": "boolean" } },
            "required": ["ok"],
        }))
        .unwrap();

        let violations = gate_outcome(
            PhaseOutcome::succeed_with(json!({ "other": 1 })),
            Some(&required_ok),
            None,
        )
        .unwrap_err();
        assert!(!violations.is_empty());

        // The failure branch has no schema, so a failure passes untouched.
        let gated = gate_outcome(
            PhaseOutcome::fail_with(json!({ "other": 1 })),
            Some(&required_ok),
            None,
        )
        .unwrap();
        assert!(!gated.is_success());
    }

    #[test]
    fn gate_treats_missing_payload_as_null() {
        let required_ok = Schema::compile(json!({
            "type": "object",
            "required": ["ok"],
        }))
        .unwrap();

        let violations = gate_outcome(PhaseOutcome::succeed(), Some(&required_ok), None)
            .unwrap_err();
        assert!(!violations.is_empty());
    }

    #[tokio::test]
    async fn policy_handler_error_becomes_redacted_fault() {
        let spec = crate::policy::PolicyPhaseSpec::new(policy_handler(|_, _| async {
            Err(anyhow::anyhow!("secret detail"))
        }));
        let scope = crate::context::test_scope();
        let ctx = scope.policy_context(&PolicyCid::new("QmBoom"), PolicyPhase::Evaluate);

        let fault = run_policy_phase(&spec, json!({}), ctx, true).await.unwrap_err();
        assert_eq!(fault.kind, FaultKind::PolicyExecution);
        assert_eq!(fault.message, REDACTED_MESSAGE);
    }

    #[tokio::test]
    async fn policy_handler_error_keeps_detail_when_not_redacting() {
        let spec = crate::policy::PolicyPhaseSpec::new(policy_handler(|_, _| async {
            Err(anyhow::anyhow!("secret detail"))
        }));
        let scope = crate::context::test_scope();
        let ctx = scope.policy_context(&PolicyCid::new("QmBoom"), PolicyPhase::Evaluate);

        let fault = run_policy_phase(&spec, json!({}), ctx, false).await.unwrap_err();
        assert!(fault.message.contains("secret detail"));
    }
}
