use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use mandate_types::{
    AbilityCid, Address, AgentAccount, CorrelationId, ExecutionMode, InvocationReport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ability::AbilityDefinition;
use crate::context::{AbilityPhase, InvocationScope, PolicyPhase, Services};
use crate::error::{DefinitionError, EngineError};
use crate::pipeline::{commit_policies, evaluate_policies, prepare_policies, run_ability_phase};
use crate::traits::{ChainReader, PermissionResolver, Signer};

/// Engine-wide settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Replace fault messages in reports with a generic one. Full detail
    /// always goes to the log, keyed by correlation id.
    pub redact_fault_messages: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redact_fault_messages: true,
        }
    }
}

/// One request to run an ability on behalf of an agent account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub ability: AbilityCid,
    /// The session identity asking to act.
    pub delegatee: Address,
    /// The account being acted for.
    pub agent: AgentAccount,
    pub parameters: Value,
    pub mode: ExecutionMode,
}

/// Executes registered abilities behind their policy gates.
///
/// The engine holds immutable definitions and is safe to share across
/// tasks; each [`invoke`](AbilityEngine::invoke) is independent.
pub struct AbilityEngine {
    abilities: HashMap<AbilityCid, Arc<AbilityDefinition>>,
    resolver: Arc<dyn PermissionResolver>,
    services: Services,
    config: EngineConfig,
}

impl fmt::Debug for AbilityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityEngine")
            .field("abilities", &self.abilities.keys().collect::<Vec<_>>())
            .field("services", &self.services)
            .field("config", &self.config)
            .finish()
    }
}

impl AbilityEngine {
    pub fn builder(resolver: Arc<dyn PermissionResolver>) -> AbilityEngineBuilder {
        AbilityEngineBuilder {
            abilities: Vec::new(),
            resolver,
            services: Services::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn ability(&self, cid: &AbilityCid) -> Option<&Arc<AbilityDefinition>> {
        self.abilities.get(cid)
    }

    /// Run one invocation through the full lifecycle.
    ///
    /// Errors are reserved for problems found before any phase runs:
    /// unknown ability, registry denial or failure, and parameter schema
    /// violations. From the first phase onward everything folds into the
    /// returned report, including faults.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvocationReport, EngineError> {
        let correlation_id = CorrelationId::generate();
        let started_at = Utc::now();

        info!(
            ability = %request.ability,
            mode = ?request.mode,
            delegatee = %request.delegatee,
            agent = %request.agent.address,
            %correlation_id,
            "invocation received"
        );

        let definition = self
            .abilities
            .get(&request.ability)
            .ok_or_else(|| EngineError::UnknownAbility(request.ability.clone()))?;

        let grant = self
            .resolver
            .validate_ability_execution(request.delegatee, request.agent.address, &request.ability)
            .await?;
        if !grant.is_permitted {
            warn!(
                ability = %request.ability,
                delegatee = %request.delegatee,
                agent = %request.agent.address,
                %correlation_id,
                "permission registry denied invocation"
            );
            return Err(EngineError::PermissionDenied {
                delegatee: request.delegatee,
                agent: request.agent.address,
                ability: request.ability,
            });
        }
        debug!(
            app_id = %grant.app_id,
            app_version = %grant.app_version,
            %correlation_id,
            "permission resolved"
        );

        if let Err(violations) = definition.parameter_schema().validate(&request.parameters) {
            return Err(EngineError::InvalidParameters { violations });
        }

        let prepared = prepare_policies(definition, &request.parameters, &grant)?;

        let scope = InvocationScope {
            ability: request.ability.clone(),
            mode: request.mode,
            delegatee: request.delegatee,
            agent: request.agent.clone(),
            app_id: grant.app_id,
            app_version: grant.app_version,
            correlation_id,
            services: self.services.clone(),
        };
        let redact = self.config.redact_fault_messages;

        let policy_phase = match request.mode {
            ExecutionMode::Precheck => PolicyPhase::Precheck,
            ExecutionMode::Execute => PolicyPhase::Evaluate,
        };
        let verdicts = evaluate_policies(&prepared, policy_phase, &scope, redact).await;

        let mut success = verdicts.allow;
        let mut result = None;
        let mut commits = Vec::new();
        let mut fault = None;

        if let Some(denied) = &verdicts.denied {
            warn!(
                ability = %request.ability,
                policy = %denied.policy,
                %correlation_id,
                "policy denied invocation"
            );
        } else {
            let shared = Arc::new(verdicts.clone());
            match request.mode {
                ExecutionMode::Execute => {
                    let ctx = scope.ability_context(AbilityPhase::Execute, shared);
                    let run = run_ability_phase(
                        definition.execute(),
                        request.parameters.clone(),
                        ctx,
                        redact,
                    )
                    .await;
                    match run {
                        Ok(outcome) => {
                            success = outcome.is_success();
                            let payload = outcome.into_payload();
                            if success {
                                commits = commit_policies(
                                    &prepared,
                                    &verdicts,
                                    payload.as_ref(),
                                    &scope,
                                    redact,
                                )
                                .await;
                            }
                            result = payload;
                        }
                        Err(ability_fault) => {
                            success = false;
                            fault = Some(ability_fault);
                        }
                    }
                }
                ExecutionMode::Precheck => {
                    if let Some(spec) = definition.precheck() {
                        let ctx = scope.ability_context(AbilityPhase::Precheck, shared);
                        let run =
                            run_ability_phase(spec, request.parameters.clone(), ctx, redact).await;
                        match run {
                            Ok(outcome) => {
                                success = outcome.is_success();
                                result = outcome.into_payload();
                            }
                            Err(ability_fault) => {
                                success = false;
                                fault = Some(ability_fault);
                            }
                        }
                    }
                }
            }
        }

        let finished_at = Utc::now();
        info!(
            ability = %request.ability,
            success,
            %correlation_id,
            "invocation finished"
        );

        Ok(InvocationReport {
            success,
            mode: request.mode,
            ability: request.ability,
            app_id: grant.app_id,
            app_version: grant.app_version,
            result,
            policies: verdicts,
            commits,
            fault,
            correlation_id,
            started_at,
            finished_at,
        })
    }
}

/// Builder for [`AbilityEngine`].
pub struct AbilityEngineBuilder {
    abilities: Vec<AbilityDefinition>,
    resolver: Arc<dyn PermissionResolver>,
    services: Services,
    config: EngineConfig,
}

impl AbilityEngineBuilder {
    /// Register an ability. Each cid may be registered once.
    pub fn ability(mut self, definition: AbilityDefinition) -> Self {
        self.abilities.push(definition);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.services = self.services.with_signer(signer);
        self
    }

    pub fn chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.services = self.services.with_chain(chain);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AbilityEngine, DefinitionError> {
        let mut abilities = HashMap::with_capacity(self.abilities.len());
        for definition in self.abilities {
            let cid = definition.cid().clone();
            if abilities.insert(cid.clone(), Arc::new(definition)).is_some() {
                return Err(DefinitionError::DuplicateAbility(cid));
            }
        }
        Ok(AbilityEngine {
            abilities,
            resolver: self.resolver,
            services: self.services,
            config: self.config,
        })
    }
}
