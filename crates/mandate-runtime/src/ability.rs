use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mandate_schema::Schema;
use mandate_types::{AbilityCid, PolicyCid};
use serde_json::Value;

use crate::error::DefinitionError;
use crate::policy::PolicyDefinition;
use crate::traits::AbilityHandler;

/// How a policy's commit input is derived after a successful execute.
#[derive(Clone)]
pub enum CommitParameters {
    /// Reuse the parameters the evaluate phase received.
    EvaluateInput,
    /// Derive from the evaluate-phase parameters and the execute payload.
    Derived(Arc<dyn Fn(&Value, Option<&Value>) -> Value + Send + Sync>),
}

impl CommitParameters {
    pub(crate) fn derive(&self, evaluate_input: &Value, execute_payload: Option<&Value>) -> Value {
        match self {
            CommitParameters::EvaluateInput => evaluate_input.clone(),
            CommitParameters::Derived(derive) => derive(evaluate_input, execute_payload),
        }
    }
}

impl fmt::Debug for CommitParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitParameters::EvaluateInput => write!(f, "EvaluateInput"),
            CommitParameters::Derived(_) => write!(f, "Derived"),
        }
    }
}

/// A policy attached to an ability, with the mapping from ability parameter
/// names to the policy's parameter names.
///
/// Owned by the ability that declares it; the policy itself is shared. The
/// mapping is checked against both parameter schemas when the ability is
/// built, never at call time.
#[derive(Clone, Debug)]
pub struct PolicyBinding {
    pub(crate) policy: Arc<PolicyDefinition>,
    pub(crate) parameter_mapping: HashMap<String, String>,
    pub(crate) commit_parameters: CommitParameters,
}

impl PolicyBinding {
    pub fn new(policy: Arc<PolicyDefinition>) -> Self {
        Self {
            policy,
            parameter_mapping: HashMap::new(),
            commit_parameters: CommitParameters::EvaluateInput,
        }
    }

    /// Carry an ability parameter into the policy under the policy's name
    /// for it.
    pub fn map_parameter(
        mut self,
        ability_parameter: impl Into<String>,
        policy_parameter: impl Into<String>,
    ) -> Self {
        self.parameter_mapping
            .insert(ability_parameter.into(), policy_parameter.into());
        self
    }

    /// Override how commit input is derived for this binding.
    pub fn commit_parameters(mut self, commit_parameters: CommitParameters) -> Self {
        self.commit_parameters = commit_parameters;
        self
    }

    pub fn policy(&self) -> &Arc<PolicyDefinition> {
        &self.policy
    }

    pub fn mapping(&self) -> &HashMap<String, String> {
        &self.parameter_mapping
    }

    pub(crate) fn commit_input(
        &self,
        evaluate_input: &Value,
        execute_payload: Option<&Value>,
    ) -> Value {
        self.commit_parameters
            .derive(evaluate_input, execute_payload)
    }
}

/// One declared phase of an ability, mirroring [`crate::PolicyPhaseSpec`].
#[derive(Clone)]
pub struct AbilityPhaseSpec {
    pub(crate) handler: Arc<dyn AbilityHandler>,
    pub(crate) success_schema: Option<Arc<Schema>>,
    pub(crate) failure_schema: Option<Arc<Schema>>,
}

impl AbilityPhaseSpec {
    pub fn new(handler: Arc<dyn AbilityHandler>) -> Self {
        Self {
            handler,
            success_schema: None,
            failure_schema: None,
        }
    }

    pub fn with_success_schema(mut self, schema: Schema) -> Self {
        self.success_schema = Some(Arc::new(schema));
        self
    }

    pub fn with_failure_schema(mut self, schema: Schema) -> Self {
        self.failure_schema = Some(Arc::new(schema));
        self
    }
}

impl fmt::Debug for AbilityPhaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityPhaseSpec")
            .field("success_schema", &self.success_schema.is_some())
            .field("failure_schema", &self.failure_schema.is_some())
            .finish()
    }
}

/// A declared ability: input parameter schema, an ordered list of policy
/// bindings, an optional precheck, and the mandatory execute phase.
///
/// Binding order is evaluation order. Immutable once built and safe to
/// share across concurrent invocations.
#[derive(Debug)]
pub struct AbilityDefinition {
    cid: AbilityCid,
    parameter_schema: Arc<Schema>,
    policies: Vec<PolicyBinding>,
    precheck: Option<AbilityPhaseSpec>,
    execute: AbilityPhaseSpec,
}

impl AbilityDefinition {
    pub fn builder(cid: AbilityCid, parameter_schema: Schema) -> AbilityDefinitionBuilder {
        AbilityDefinitionBuilder {
            cid,
            parameter_schema,
            policies: Vec::new(),
            precheck: None,
            execute: None,
        }
    }

    pub fn cid(&self) -> &AbilityCid {
        &self.cid
    }

    pub fn parameter_schema(&self) -> &Schema {
        &self.parameter_schema
    }

    pub fn policies(&self) -> &[PolicyBinding] {
        &self.policies
    }

    pub fn precheck(&self) -> Option<&AbilityPhaseSpec> {
        self.precheck.as_ref()
    }

    pub fn execute(&self) -> &AbilityPhaseSpec {
        &self.execute
    }
}

/// Builder for [`AbilityDefinition`].
///
/// `build` fails when no execute phase was declared, when a policy is bound
/// twice, or when a parameter mapping names a parameter missing from either
/// side's schema.
pub struct AbilityDefinitionBuilder {
    cid: AbilityCid,
    parameter_schema: Schema,
    policies: Vec<PolicyBinding>,
    precheck: Option<AbilityPhaseSpec>,
    execute: Option<AbilityPhaseSpec>,
}

impl AbilityDefinitionBuilder {
    /// Attach a policy. Declaration order is evaluation order.
    pub fn policy(mut self, binding: PolicyBinding) -> Self {
        self.policies.push(binding);
        self
    }

    pub fn precheck(mut self, spec: AbilityPhaseSpec) -> Self {
        self.precheck = Some(spec);
        self
    }

    pub fn execute(mut self, spec: AbilityPhaseSpec) -> Self {
        self.execute = Some(spec);
        self
    }

    pub fn build(self) -> Result<AbilityDefinition, DefinitionError> {
        let execute = self
            .execute
            .ok_or_else(|| DefinitionError::MissingExecute(self.cid.clone()))?;

        let mut seen: Vec<&PolicyCid> = Vec::with_capacity(self.policies.len());
        for binding in &self.policies {
            let cid = binding.policy.cid();
            if seen.contains(&cid) {
                return Err(DefinitionError::DuplicatePolicy(cid.clone()));
            }
            seen.push(cid);

            for (ability_parameter, policy_parameter) in &binding.parameter_mapping {
                if !self.parameter_schema.has_property(ability_parameter) {
                    return Err(DefinitionError::UnknownAbilityParameter {
                        policy: cid.clone(),
                        parameter: ability_parameter.clone(),
                    });
                }
                if !binding.policy.parameter_schema().has_property(policy_parameter) {
                    return Err(DefinitionError::UnknownPolicyParameter {
                        policy: cid.clone(),
                        parameter: policy_parameter.clone(),
                    });
                }
            }
        }

        Ok(AbilityDefinition {
            cid: self.cid,
            parameter_schema: Arc::new(self.parameter_schema),
            policies: self.policies,
            precheck: self.precheck,
            execute,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyDefinition;
    use crate::traits::ability_handler;
    use mandate_types::PhaseOutcome;
    use serde_json::json;

    fn schema_with(properties: &[&str]) -> Schema {
        let props: serde_json::Map<String, Value> = properties
            .iter()
            .map(|name| (name.to_string(), json!({})))
            .collect();
        Schema::compile(json!({ "type": "object", "properties": props })).unwrap()
    }

    fn execute_spec() -> AbilityPhaseSpec {
        AbilityPhaseSpec::new(ability_handler(|_, _| async {
            Ok(PhaseOutcome::succeed())
        }))
    }

    fn spend_policy() -> Arc<PolicyDefinition> {
        Arc::new(
            PolicyDefinition::builder(PolicyCid::new("QmSpend"), schema_with(&["amount"])).build(),
        )
    }

    #[test]
    fn build_requires_execute() {
        let err = AbilityDefinition::builder(AbilityCid::new("QmSwap"), schema_with(&["x"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::MissingExecute(_)));
    }

    #[test]
    fn build_validates_mapping_against_ability_schema() {
        let err = AbilityDefinition::builder(AbilityCid::new("QmSwap"), schema_with(&["x"]))
            .policy(PolicyBinding::new(spend_policy()).map_parameter("missing", "amount"))
            .execute(execute_spec())
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            DefinitionError::UnknownAbilityParameter { parameter, .. } if parameter == "missing"
        ));
    }

    #[test]
    fn build_validates_mapping_against_policy_schema() {
        let err = AbilityDefinition::builder(AbilityCid::new("QmSwap"), schema_with(&["x"]))
            .policy(PolicyBinding::new(spend_policy()).map_parameter("x", "missing"))
            .execute(execute_spec())
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            DefinitionError::UnknownPolicyParameter { parameter, .. } if parameter == "missing"
        ));
    }

    #[test]
    fn build_rejects_duplicate_policy() {
        let policy = spend_policy();
        let err = AbilityDefinition::builder(AbilityCid::new("QmSwap"), schema_with(&["x"]))
            .policy(PolicyBinding::new(policy.clone()))
            .policy(PolicyBinding::new(policy))
            .execute(execute_spec())
            .build()
            .unwrap_err();

        assert!(matches!(err, DefinitionError::DuplicatePolicy(_)));
    }

    #[test]
    fn build_accepts_valid_mapping_and_keeps_order() {
        let first = Arc::new(
            PolicyDefinition::builder(PolicyCid::new("QmFirst"), schema_with(&["y"])).build(),
        );
        let second = Arc::new(
            PolicyDefinition::builder(PolicyCid::new("QmSecond"), schema_with(&["y"])).build(),
        );

        let ability = AbilityDefinition::builder(AbilityCid::new("QmSwap"), schema_with(&["x"]))
            .policy(PolicyBinding::new(first).map_parameter("x", "y"))
            .policy(PolicyBinding::new(second).map_parameter("x", "y"))
            .execute(execute_spec())
            .build()
            .unwrap();

        let cids: Vec<&str> = ability
            .policies()
            .iter()
            .map(|binding| binding.policy().cid().as_str())
            .collect();
        assert_eq!(cids, vec!["QmFirst", "QmSecond"]);
    }

    #[test]
    fn commit_input_defaults_to_evaluate_input() {
        let binding = PolicyBinding::new(spend_policy());
        let evaluate_input = json!({ "amount": 5 });
        assert_eq!(binding.commit_input(&evaluate_input, None), evaluate_input);
    }

    #[test]
    fn commit_input_can_derive_from_execute_payload() {
        let binding = PolicyBinding::new(spend_policy()).commit_parameters(
            CommitParameters::Derived(Arc::new(|evaluate_input, execute_payload| {
                json!({
                    "amount": evaluate_input.get("amount").cloned().unwrap_or(Value::Null),
                    "txHash": execute_payload
                        .and_then(|payload| payload.get("txHash").cloned())
                        .unwrap_or(Value::Null),
                })
            })),
        );

        let derived = binding.commit_input(
            &json!({ "amount": 5 }),
            Some(&json!({ "txHash": "0xfeed" })),
        );
        assert_eq!(derived, json!({ "amount": 5, "txHash": "0xfeed" }));
    }
}
