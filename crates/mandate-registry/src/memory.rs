//! In-memory permission registry.

use async_trait::async_trait;
use dashmap::DashMap;
use mandate_runtime::{PermissionResolver, ResolverError};
use mandate_types::{AbilityCid, Address, AppId, AppVersion, PermissionGrant};
use tracing::debug;

type GrantKey = (Address, Address, AbilityCid);

/// Grant store for local development and tests.
///
/// Resolves grants recorded with [`grant`](Self::grant); anything else gets
/// the fallback, which denies unless the registry was built with
/// [`permit_all`](Self::permit_all).
pub struct InMemoryPermissionRegistry {
    grants: DashMap<GrantKey, PermissionGrant>,
    fallback: PermissionGrant,
}

impl InMemoryPermissionRegistry {
    /// Registry that denies everything not explicitly granted.
    pub fn new() -> Self {
        Self {
            grants: DashMap::new(),
            fallback: PermissionGrant::denied(),
        }
    }

    /// Registry whose fallback permits under the given app identity.
    pub fn permit_all(app_id: AppId, app_version: AppVersion) -> Self {
        Self {
            grants: DashMap::new(),
            fallback: PermissionGrant::permitted(app_id, app_version),
        }
    }

    pub fn grant(
        &self,
        delegatee: Address,
        agent: Address,
        ability: AbilityCid,
        grant: PermissionGrant,
    ) {
        self.grants.insert((delegatee, agent, ability), grant);
    }

    pub fn revoke(&self, delegatee: Address, agent: Address, ability: &AbilityCid) {
        self.grants.remove(&(delegatee, agent, ability.clone()));
    }
}

impl Default for InMemoryPermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionResolver for InMemoryPermissionRegistry {
    async fn validate_ability_execution(
        &self,
        delegatee: Address,
        agent: Address,
        ability: &AbilityCid,
    ) -> Result<PermissionGrant, ResolverError> {
        let grant = self
            .grants
            .get(&(delegatee, agent, ability.clone()))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.fallback.clone());
        debug!(
            %delegatee,
            %agent,
            %ability,
            is_permitted = grant.is_permitted,
            "grant lookup"
        );
        Ok(grant)
    }
}
