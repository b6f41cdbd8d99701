use std::fmt;
use std::sync::Arc;

use mandate_types::{
    AbilityCid, Address, AgentAccount, AppId, AppVersion, CorrelationId, ExecutionMode, PolicyCid,
    PolicyVerdicts,
};

use crate::traits::{ChainReader, Signer};

/// Phases a policy can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPhase {
    Precheck,
    Evaluate,
    Commit,
}

impl PolicyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyPhase::Precheck => "precheck",
            PolicyPhase::Evaluate => "evaluate",
            PolicyPhase::Commit => "commit",
        }
    }
}

/// Phases an ability can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbilityPhase {
    Precheck,
    Execute,
}

impl AbilityPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbilityPhase::Precheck => "precheck",
            AbilityPhase::Execute => "execute",
        }
    }
}

/// Collaborators injected at engine construction.
///
/// Both are opaque to the framework: handlers reach them through the
/// context, and a deployment that needs neither injects neither.
#[derive(Clone, Default)]
pub struct Services {
    signer: Option<Arc<dyn Signer>>,
    chain: Option<Arc<dyn ChainReader>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// The signing service, erroring when the deployment injected none.
    pub fn signer(&self) -> anyhow::Result<&Arc<dyn Signer>> {
        self.signer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no signer injected"))
    }

    /// The chain reader, erroring when the deployment injected none.
    pub fn chain(&self) -> anyhow::Result<&Arc<dyn ChainReader>> {
        self.chain
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no chain reader injected"))
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("signer", &self.signer.is_some())
            .field("chain", &self.chain.is_some())
            .finish()
    }
}

/// Context handed to every policy phase handler.
#[derive(Clone, Debug)]
pub struct PolicyContext {
    pub ability: AbilityCid,
    pub policy: PolicyCid,
    pub phase: PolicyPhase,
    pub mode: ExecutionMode,
    pub delegatee: Address,
    pub agent: AgentAccount,
    pub app_id: AppId,
    pub app_version: AppVersion,
    pub correlation_id: CorrelationId,
    pub services: Services,
}

/// Context handed to the ability's precheck/execute handler.
///
/// Carries the already-gated policy verdicts so execute logic can branch on
/// which policies allowed and with what results.
#[derive(Clone, Debug)]
pub struct AbilityContext {
    pub ability: AbilityCid,
    pub phase: AbilityPhase,
    pub mode: ExecutionMode,
    pub delegatee: Address,
    pub agent: AgentAccount,
    pub app_id: AppId,
    pub app_version: AppVersion,
    pub policies: Arc<PolicyVerdicts>,
    pub correlation_id: CorrelationId,
    pub services: Services,
}

/// Identity and collaborator state shared by every context minted for one
/// invocation.
#[derive(Clone, Debug)]
pub(crate) struct InvocationScope {
    pub(crate) ability: AbilityCid,
    pub(crate) mode: ExecutionMode,
    pub(crate) delegatee: Address,
    pub(crate) agent: AgentAccount,
    pub(crate) app_id: AppId,
    pub(crate) app_version: AppVersion,
    pub(crate) correlation_id: CorrelationId,
    pub(crate) services: Services,
}

impl InvocationScope {
    pub(crate) fn policy_context(&self, policy: &PolicyCid, phase: PolicyPhase) -> PolicyContext {
        PolicyContext {
            ability: self.ability.clone(),
            policy: policy.clone(),
            phase,
            mode: self.mode,
            delegatee: self.delegatee,
            agent: self.agent.clone(),
            app_id: self.app_id,
            app_version: self.app_version,
            correlation_id: self.correlation_id,
            services: self.services.clone(),
        }
    }

    pub(crate) fn ability_context(
        &self,
        phase: AbilityPhase,
        policies: Arc<PolicyVerdicts>,
    ) -> AbilityContext {
        AbilityContext {
            ability: self.ability.clone(),
            phase,
            mode: self.mode,
            delegatee: self.delegatee,
            agent: self.agent.clone(),
            app_id: self.app_id,
            app_version: self.app_version,
            policies,
            correlation_id: self.correlation_id,
            services: self.services.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_scope() -> InvocationScope {
    InvocationScope {
        ability: AbilityCid::new("QmTestAbility"),
        mode: ExecutionMode::Execute,
        delegatee: "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap(),
        agent: AgentAccount::new(
            "0x00000000000000000000000000000000000000bb"
                .parse()
                .unwrap(),
        ),
        app_id: AppId(1),
        app_version: AppVersion(1),
        correlation_id: CorrelationId::generate(),
        services: Services::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn services_error_when_nothing_injected() {
        let services = Services::new();
        assert!(services.signer().is_err());
        assert!(services.chain().is_err());
    }

    #[test]
    fn phase_names() {
        assert_eq!(PolicyPhase::Evaluate.as_str(), "evaluate");
        assert_eq!(AbilityPhase::Execute.as_str(), "execute");
    }
}
