use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use mandate_types::{AbilityCid, Address, AgentAccount, PermissionGrant, PhaseOutcome};

use crate::context::{AbilityContext, PolicyContext};

/// A policy phase handler.
///
/// A policy that wants to deny returns `Ok` with a failed
/// [`PhaseOutcome`]; returning `Err` means the handler itself broke, and
/// the pipeline converts it into a policy execution fault.
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    async fn run(&self, parameters: Value, ctx: PolicyContext) -> anyhow::Result<PhaseOutcome>;
}

/// An ability phase handler. Same error contract as [`PolicyHandler`].
#[async_trait]
pub trait AbilityHandler: Send + Sync {
    async fn run(&self, parameters: Value, ctx: AbilityContext) -> anyhow::Result<PhaseOutcome>;
}

type BoxedPolicyFn =
    Box<dyn Fn(Value, PolicyContext) -> BoxFuture<'static, anyhow::Result<PhaseOutcome>> + Send + Sync>;

type BoxedAbilityFn =
    Box<dyn Fn(Value, AbilityContext) -> BoxFuture<'static, anyhow::Result<PhaseOutcome>> + Send + Sync>;

struct PolicyHandlerFn(BoxedPolicyFn);

#[async_trait]
impl PolicyHandler for PolicyHandlerFn {
    async fn run(&self, parameters: Value, ctx: PolicyContext) -> anyhow::Result<PhaseOutcome> {
        (self.0)(parameters, ctx).await
    }
}

struct AbilityHandlerFn(BoxedAbilityFn);

#[async_trait]
impl AbilityHandler for AbilityHandlerFn {
    async fn run(&self, parameters: Value, ctx: AbilityContext) -> anyhow::Result<PhaseOutcome> {
        (self.0)(parameters, ctx).await
    }
}

/// Adapt an async closure into a policy handler, so definitions read
/// declaratively.
pub fn policy_handler<F, Fut>(f: F) -> Arc<dyn PolicyHandler>
where
    F: Fn(Value, PolicyContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PhaseOutcome>> + Send + 'static,
{
    Arc::new(PolicyHandlerFn(Box::new(
        move |parameters, ctx| -> BoxFuture<'static, anyhow::Result<PhaseOutcome>> {
            Box::pin(f(parameters, ctx))
        },
    )))
}

/// Adapt an async closure into an ability handler.
pub fn ability_handler<F, Fut>(f: F) -> Arc<dyn AbilityHandler>
where
    F: Fn(Value, AbilityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PhaseOutcome>> + Send + 'static,
{
    Arc::new(AbilityHandlerFn(Box::new(
        move |parameters, ctx| -> BoxFuture<'static, anyhow::Result<PhaseOutcome>> {
            Box::pin(f(parameters, ctx))
        },
    )))
}

/// Errors from a chain RPC provider.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    MalformedResponse(String),
}

/// Errors from the permission registry.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("registry query failed: {0}")]
    Chain(#[from] ChainError),

    #[error("parameter decoding failed for policy {policy}: {detail}")]
    ParameterDecoding { policy: String, detail: String },

    #[error("malformed registry response: {0}")]
    MalformedResponse(String),
}

/// Remote signing service holding the key material for agent accounts.
///
/// Opaque collaborator injected into the invocation context; the framework
/// never calls it itself.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign a digest on behalf of the agent account.
    async fn sign_digest(&self, agent: &AgentAccount, digest: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Read-only chain state access for handlers and registry resolvers.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Execute a read-only call against `to` with ABI-encoded `data`,
    /// returning the raw return bytes.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError>;
}

/// Resolves whether a delegatee may invoke an ability on behalf of an agent
/// account, and with which granted policy parameters.
///
/// Resolution happens once per invocation, before any phase runs.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn validate_ability_execution(
        &self,
        delegatee: Address,
        agent: Address,
        ability: &AbilityCid,
    ) -> Result<PermissionGrant, ResolverError>;
}
