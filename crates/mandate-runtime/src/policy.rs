use std::fmt;
use std::sync::Arc;

use mandate_schema::Schema;
use mandate_types::PolicyCid;

use crate::context::PolicyPhase;
use crate::traits::PolicyHandler;

/// One declared phase of a policy: the handler plus the optional schemas
/// gating its success and failure payloads.
///
/// A branch with no declared schema accepts any payload, including none.
#[derive(Clone)]
pub struct PolicyPhaseSpec {
    pub(crate) handler: Arc<dyn PolicyHandler>,
    pub(crate) success_schema: Option<Arc<Schema>>,
    pub(crate) failure_schema: Option<Arc<Schema>>,
}

impl PolicyPhaseSpec {
    pub fn new(handler: Arc<dyn PolicyHandler>) -> Self {
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

impl fmt::Debug for PolicyPhaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyPhaseSpec")
            .field("success_schema", &self.success_schema.is_some())
            .field("failure_schema", &self.failure_schema.is_some())
            .finish()
    }
}

/// A declared policy: up to three independently callable phases, an input
/// parameter schema, and an optional commit parameter schema.
///
/// `precheck` is a side-effect-free dry run predicting `evaluate`'s
/// outcome. `evaluate` is the authoritative gate run immediately before
/// the ability executes. `commit` runs only after the ability's execute
/// phase succeeded, to record state the gate depends on next time.
///
/// A policy that declares no phases is structurally valid; it gates
/// nothing and allows by default. Immutable once built; abilities share
/// policies with `Arc`.
#[derive(Debug)]
pub struct PolicyDefinition {
    cid: PolicyCid,
    parameter_schema: Arc<Schema>,
    commit_parameter_schema: Option<Arc<Schema>>,
    precheck: Option<PolicyPhaseSpec>,
    evaluate: Option<PolicyPhaseSpec>,
    commit: Option<PolicyPhaseSpec>,
}

impl PolicyDefinition {
    pub fn builder(cid: PolicyCid, parameter_schema: Schema) -> PolicyDefinitionBuilder {
        PolicyDefinitionBuilder {
            cid,
            parameter_schema,
            commit_parameter_schema: None,
            precheck: None,
            evaluate: None,
            commit: None,
        }
    }

    pub fn cid(&self) -> &PolicyCid {
        &self.cid
    }

    pub fn parameter_schema(&self) -> &Schema {
        &self.parameter_schema
    }

    pub fn commit_parameter_schema(&self) -> Option<&Schema> {
        self.commit_parameter_schema.as_deref()
    }

    pub fn phase(&self, phase: PolicyPhase) -> Option<&PolicyPhaseSpec> {
        match phase {
            PolicyPhase::Precheck => self.precheck.as_ref(),
            PolicyPhase::Evaluate => self.evaluate.as_ref(),
            PolicyPhase::Commit => self.commit.as_ref(),
        }
    }

    pub fn declares(&self, phase: PolicyPhase) -> bool {
        self.phase(phase).is_some()
    }
}

/// Builder for [`PolicyDefinition`]. Construction cannot fail: no phase is
/// mandatory for a policy.
pub struct PolicyDefinitionBuilder {
    cid: PolicyCid,
    parameter_schema: Schema,
    commit_parameter_schema: Option<Schema>,
    precheck: Option<PolicyPhaseSpec>,
    evaluate: Option<PolicyPhaseSpec>,
    commit: Option<PolicyPhaseSpec>,
}

impl PolicyDefinitionBuilder {
    /// Schema for the commit phase's input, when it differs from the
    /// evaluate input.
    pub fn commit_parameter_schema(mut self, schema: Schema) -> Self {
        self.commit_parameter_schema = Some(schema);
        self
    }

    pub fn precheck(mut self, spec: PolicyPhaseSpec) -> Self {
        self.precheck = Some(spec);
        self
    }

    pub fn evaluate(mut self, spec: PolicyPhaseSpec) -> Self {
        self.evaluate = Some(spec);
        self
    }

    pub fn commit(mut self, spec: PolicyPhaseSpec) -> Self {
        self.commit = Some(spec);
        self
    }

    pub fn build(self) -> PolicyDefinition {
        PolicyDefinition {
            cid: self.cid,
            parameter_schema: Arc::new(self.parameter_schema),
            commit_parameter_schema: self.commit_parameter_schema.map(Arc::new),
            precheck: self.precheck,
            evaluate: self.evaluate,
            commit: self.commit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::policy_handler;
    use mandate_types::PhaseOutcome;
    use serde_json::json;

    fn any_schema() -> Schema {
        Schema::compile(json!({ "type": "object" })).unwrap()
    }

    #[test]
    fn policy_without_phases_is_valid() {
        let policy = PolicyDefinition::builder(PolicyCid::new("QmNoop"), any_schema()).build();
        assert!(!policy.declares(PolicyPhase::Precheck));
        assert!(!policy.declares(PolicyPhase::Evaluate));
        assert!(!policy.declares(PolicyPhase::Commit));
    }

    #[test]
    fn declared_phases_are_reachable() {
        let handler = policy_handler(|_, _| async { Ok(PhaseOutcome::succeed()) });
        let policy = PolicyDefinition::builder(PolicyCid::new("QmGate"), any_schema())
            .evaluate(PolicyPhaseSpec::new(handler.clone()))
            .commit(PolicyPhaseSpec::new(handler))
            .build();

        assert!(policy.declares(PolicyPhase::Evaluate));
        assert!(policy.declares(PolicyPhase::Commit));
        assert!(policy.phase(PolicyPhase::Precheck).is_none());
    }

    #[test]
    fn commit_parameter_schema_is_separate() {
        let policy = PolicyDefinition::builder(PolicyCid::new("QmSpend"), any_schema())
            .commit_parameter_schema(
                Schema::compile(json!({
                    "type": "object",
                    "properties": { "spent": { "type": "number" } },
                    "required": ["spent"]
                }))
                .unwrap(),
            )
            .build();

        assert!(policy.commit_parameter_schema().is_some());
        assert!(policy
            .commit_parameter_schema()
            .unwrap()
            .has_property("spent"));
    }
}
