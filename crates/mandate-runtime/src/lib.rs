//! Policy-gated ability execution.
//!
//! An ability is a unit of delegated automation: a JSON-schema'd parameter
//! surface, an optional precheck, a mandatory execute phase, and an ordered
//! list of policy bindings. Policies gate it through up to three phases of
//! their own (precheck, evaluate, commit), each phase's result checked
//! against the schema declared for the branch it took.
//!
//! Every invocation runs the same lifecycle:
//!
//! 1. Resolve permission on chain. A denial aborts before any phase runs.
//! 2. Validate caller parameters against the ability's schema, then
//!    assemble and validate each bound policy's input.
//! 3. Run the bound policies in declared order. The first failure or fault
//!    denies the invocation and later policies never run.
//! 4. If all allowed, run the ability's phase for the requested mode.
//! 5. In execute mode, after a successful execute, run every allowed
//!    policy's commit phase. Commits are reported but can no longer change
//!    the outcome.
//!
//! The caller sees an error only when the invocation died before its first
//! phase. Everything after that, including handler errors and schema
//! faults, folds into the returned [`InvocationReport`].

#![deny(unsafe_code)]

pub mod ability;
pub mod context;
pub mod engine;
pub mod error;
pub mod mocks;
pub mod policy;
pub mod traits;

mod pipeline;

pub use ability::{
    AbilityDefinition, AbilityDefinitionBuilder, AbilityPhaseSpec, CommitParameters, PolicyBinding,
};
pub use context::{AbilityContext, AbilityPhase, PolicyContext, PolicyPhase, Services};
pub use engine::{AbilityEngine, AbilityEngineBuilder, EngineConfig, InvokeRequest};
pub use error::{DefinitionError, EngineError};
pub use mocks::{MockChainReader, MockSigner, StaticResolver};
pub use policy::{PolicyDefinition, PolicyDefinitionBuilder, PolicyPhaseSpec};
pub use traits::{
    ability_handler, policy_handler, AbilityHandler, ChainError, ChainReader, PermissionResolver,
    PolicyHandler, ResolverError, Signer,
};

pub use mandate_types::InvocationReport;
