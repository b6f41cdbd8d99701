//! Test doubles for the engine's collaborator traits.
//!
//! Shipped as a public module so downstream crates can exercise their own
//! abilities and policies without a live registry or chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use mandate_types::{
    AbilityCid, Address, AgentAccount, AppId, AppVersion, PermissionGrant, PhaseOutcome,
};

use crate::context::{AbilityContext, PolicyContext};
use crate::traits::{
    AbilityHandler, ChainError, ChainReader, PermissionResolver, PolicyHandler, ResolverError,
    Signer,
};

/// Policy handler returning a canned outcome and recording what it was
/// called with.
///
/// Grab the [`calls`](RecordingPolicyHandler::calls) and
/// [`last_input`](RecordingPolicyHandler::last_input) handles before moving
/// the handler into a definition.
pub struct RecordingPolicyHandler {
    outcome: PhaseOutcome,
    calls: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Option<Value>>>,
}

impl RecordingPolicyHandler {
    pub fn returning(outcome: PhaseOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    pub fn allowing() -> Self {
        Self::returning(PhaseOutcome::succeed())
    }

    pub fn denying() -> Self {
        Self::returning(PhaseOutcome::fail())
    }

    /// Shared call counter, readable after the handler is consumed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Shared view of the most recent input.
    pub fn last_input(&self) -> Arc<Mutex<Option<Value>>> {
        self.last_input.clone()
    }
}

#[async_trait]
impl PolicyHandler for RecordingPolicyHandler {
    async fn run(&self, parameters: Value, _ctx: PolicyContext) -> anyhow::Result<PhaseOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().await = Some(parameters);
        Ok(self.outcome.clone())
    }
}

/// Policy handler that always returns an error, standing in for a broken
/// implementation.
pub struct FailingPolicyHandler {
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingPolicyHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl PolicyHandler for FailingPolicyHandler {
    async fn run(&self, _parameters: Value, _ctx: PolicyContext) -> anyhow::Result<PhaseOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// Ability handler returning a canned outcome and recording its input.
pub struct RecordingAbilityHandler {
    outcome: PhaseOutcome,
    calls: Arc<AtomicUsize>,
    last_input: Arc<Mutex<Option<Value>>>,
}

impl RecordingAbilityHandler {
    pub fn returning(outcome: PhaseOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    pub fn succeeding() -> Self {
        Self::returning(PhaseOutcome::succeed())
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn last_input(&self) -> Arc<Mutex<Option<Value>>> {
        self.last_input.clone()
    }
}

#[async_trait]
impl AbilityHandler for RecordingAbilityHandler {
    async fn run(&self, parameters: Value, _ctx: AbilityContext) -> anyhow::Result<PhaseOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock().await = Some(parameters);
        Ok(self.outcome.clone())
    }
}

/// Ability handler that always returns an error.
pub struct FailingAbilityHandler {
    message: String,
}

impl FailingAbilityHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl AbilityHandler for FailingAbilityHandler {
    async fn run(&self, _parameters: Value, _ctx: AbilityContext) -> anyhow::Result<PhaseOutcome> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// Resolver returning the same grant for every query.
pub struct StaticResolver {
    grant: PermissionGrant,
}

impl StaticResolver {
    pub fn permitting(app_id: AppId, app_version: AppVersion) -> Self {
        Self {
            grant: PermissionGrant::permitted(app_id, app_version),
        }
    }

    pub fn denying() -> Self {
        Self {
            grant: PermissionGrant::denied(),
        }
    }

    pub fn with_grant(grant: PermissionGrant) -> Self {
        Self { grant }
    }
}

#[async_trait]
impl PermissionResolver for StaticResolver {
    async fn validate_ability_execution(
        &self,
        _delegatee: Address,
        _agent: Address,
        _ability: &AbilityCid,
    ) -> Result<PermissionGrant, ResolverError> {
        Ok(self.grant.clone())
    }
}

/// Resolver that fails every query, standing in for an unreachable
/// registry.
pub struct ErroringResolver {
    message: String,
}

impl ErroringResolver {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl PermissionResolver for ErroringResolver {
    async fn validate_ability_execution(
        &self,
        _delegatee: Address,
        _agent: Address,
        _ability: &AbilityCid,
    ) -> Result<PermissionGrant, ResolverError> {
        Err(ResolverError::Chain(ChainError::Transport(
            self.message.clone(),
        )))
    }
}

/// Signer returning a fixed signature.
pub struct MockSigner {
    signature: Vec<u8>,
}

impl MockSigner {
    pub fn returning(signature: Vec<u8>) -> Self {
        Self { signature }
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign_digest(&self, _agent: &AgentAccount, _digest: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.signature.clone())
    }
}

/// Chain reader replaying canned responses in order and recording every
/// call it receives.
pub struct MockChainReader {
    responses: Mutex<VecDeque<Result<Vec<u8>, ChainError>>>,
    calls: Mutex<Vec<(Address, Vec<u8>)>>,
}

impl MockChainReader {
    pub fn replaying(responses: Vec<Result<Vec<u8>, ChainError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn recorded_calls(&self) -> Vec<(Address, Vec<u8>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChainReader for MockChainReader {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        self.calls.lock().await.push((to, data));
        match self.responses.lock().await.pop_front() {
            Some(response) => response,
            None => Err(ChainError::Transport("mock has no response queued".into())),
        }
    }
}
