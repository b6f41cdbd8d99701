use mandate_schema::{describe_violations, SchemaViolation};
use mandate_types::{AbilityCid, Address, PolicyCid};
use thiserror::Error;

use crate::traits::ResolverError;

/// Errors raised while constructing a definition or an engine.
///
/// All of these fire at construction time, before anything can be invoked.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("ability {0} declares no execute phase")]
    MissingExecute(AbilityCid),

    #[error("binding for policy {policy} maps unknown ability parameter {parameter:?}")]
    UnknownAbilityParameter {
        policy: PolicyCid,
        parameter: String,
    },

    #[error("binding for policy {policy} maps unknown policy parameter {parameter:?}")]
    UnknownPolicyParameter {
        policy: PolicyCid,
        parameter: String,
    },

    #[error("ability declares policy {0} more than once")]
    DuplicatePolicy(PolicyCid),

    #[error("engine already registers ability {0}")]
    DuplicateAbility(AbilityCid),
}

/// Errors from [`invoke`](crate::engine::AbilityEngine::invoke) that occur
/// before any phase runs.
///
/// Once a phase has run, every outcome folds into the invocation report
/// instead; the caller never sees a raw handler error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown ability: {0}")]
    UnknownAbility(AbilityCid),

    #[error("delegatee {delegatee} is not permitted to run {ability} for agent {agent}")]
    PermissionDenied {
        delegatee: Address,
        agent: Address,
        ability: AbilityCid,
    },

    #[error("permission resolution failed: {0}")]
    Resolver(#[from] ResolverError),

    #[error("ability parameters rejected by schema: {}", describe_violations(.violations))]
    InvalidParameters { violations: Vec<SchemaViolation> },

    #[error("parameters for policy {policy} rejected by schema: {}", describe_violations(.violations))]
    PolicyParameters {
        policy: PolicyCid,
        violations: Vec<SchemaViolation>,
    },
}
