//! On-chain permission registry resolver.
//!
//! Queries the registry contract through a [`ChainReader`] and decodes the
//! returned grant, including the typed policy parameters pinned on chain.
//! The contract surface it speaks:
//!
//! ```solidity
//! struct Parameter { string name; uint8 paramType; bytes value; }
//! struct PolicyGrant { string policyCid; Parameter[] parameters; }
//! struct ValidationResult {
//!     bool isPermitted;
//!     uint256 appId;
//!     uint256 appVersion;
//!     PolicyGrant[] policies;
//! }
//! function validateAbilityExecutionAndGetPolicies(
//!     address delegatee,
//!     address agent,
//!     string calldata abilityCid
//! ) external view returns (ValidationResult memory);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mandate_runtime::{ChainReader, PermissionResolver, ResolverError};
use mandate_types::{AbilityCid, Address, AppId, AppVersion, PermissionGrant, PolicyCid};
use tracing::debug;

use crate::codec::{
    add, decode_parameter, padded_len, push_dynamic_bytes, push_word_address, push_word_usize,
    CodecError, ParameterType, Reader, WORD,
};

/// Selector of `validateAbilityExecutionAndGetPolicies(address,address,string)`.
const VALIDATE_SELECTOR: [u8; 4] = [0x75, 0x22, 0x1e, 0x3f];

/// Resolves grants from the permission registry contract.
pub struct EvmPermissionRegistry {
    chain: Arc<dyn ChainReader>,
    registry: Address,
}

impl EvmPermissionRegistry {
    pub fn new(chain: Arc<dyn ChainReader>, registry: Address) -> Self {
        Self { chain, registry }
    }

    /// Address of the registry contract this resolver queries.
    pub fn registry(&self) -> Address {
        self.registry
    }
}

#[async_trait]
impl PermissionResolver for EvmPermissionRegistry {
    async fn validate_ability_execution(
        &self,
        delegatee: Address,
        agent: Address,
        ability: &AbilityCid,
    ) -> Result<PermissionGrant, ResolverError> {
        let calldata = encode_validate_call(delegatee, agent, ability);
        debug!(
            %delegatee,
            %agent,
            %ability,
            registry = %self.registry,
            "querying permission registry"
        );
        let raw = self.chain.call(self.registry, calldata).await?;
        let grant = decode_validation(&raw)?;
        debug!(
            is_permitted = grant.is_permitted,
            app_id = %grant.app_id,
            app_version = %grant.app_version,
            policies = grant.policy_parameters.len(),
            "grant resolved"
        );
        Ok(grant)
    }
}

fn encode_validate_call(delegatee: Address, agent: Address, ability: &AbilityCid) -> Vec<u8> {
    let cid = ability.as_str().as_bytes();
    let mut data = Vec::with_capacity(4 + 4 * WORD + padded_len(cid.len()));
    data.extend_from_slice(&VALIDATE_SELECTOR);
    push_word_address(&mut data, delegatee);
    push_word_address(&mut data, agent);
    // offset of the string tail, relative to the start of the arguments
    push_word_usize(&mut data, 3 * WORD);
    push_dynamic_bytes(&mut data, cid);
    data
}

fn malformed(err: CodecError) -> ResolverError {
    ResolverError::MalformedResponse(err.to_string())
}

fn decode_validation(data: &[u8]) -> Result<PermissionGrant, ResolverError> {
    let reader = Reader::new(data);

    let root = reader.usize_at(0).map_err(malformed)?;
    let is_permitted = reader.bool_at(root).map_err(malformed)?;
    let app_id = reader
        .u64_at(add(root, WORD).map_err(malformed)?)
        .map_err(malformed)?;
    let app_version = reader
        .u32_at(add(root, 2 * WORD).map_err(malformed)?)
        .map_err(malformed)?;
    // PolicyGrant[] offset is relative to the struct it belongs to.
    let policies_at = add(
        root,
        reader
            .usize_at(add(root, 3 * WORD).map_err(malformed)?)
            .map_err(malformed)?,
    )
    .map_err(malformed)?;

    let (base, count) = reader.array_at(policies_at).map_err(malformed)?;
    let mut policy_parameters = HashMap::with_capacity(count);
    for index in 0..count {
        let grant_at = add(
            base,
            reader
                .usize_at(add(base, index * WORD).map_err(malformed)?)
                .map_err(malformed)?,
        )
        .map_err(malformed)?;
        let (cid, parameters) = decode_policy_grant(&reader, grant_at)?;
        policy_parameters.insert(PolicyCid::new(cid), parameters);
    }

    Ok(PermissionGrant {
        app_id: AppId(app_id),
        app_version: AppVersion(app_version),
        is_permitted,
        policy_parameters,
    })
}

fn decode_policy_grant(
    reader: &Reader<'_>,
    at: usize,
) -> Result<(String, HashMap<String, serde_json::Value>), ResolverError> {
    let cid_at = add(at, reader.usize_at(at).map_err(malformed)?).map_err(malformed)?;
    let cid = reader.string_at(cid_at).map_err(malformed)?;

    let params_at = add(
        at,
        reader
            .usize_at(add(at, WORD).map_err(malformed)?)
            .map_err(malformed)?,
    )
    .map_err(malformed)?;
    let (base, count) = reader.array_at(params_at).map_err(malformed)?;

    let mut parameters = HashMap::with_capacity(count);
    for index in 0..count {
        let param_at = add(
            base,
            reader
                .usize_at(add(base, index * WORD).map_err(malformed)?)
                .map_err(malformed)?,
        )
        .map_err(malformed)?;
        let name_at = add(param_at, reader.usize_at(param_at).map_err(malformed)?)
            .map_err(malformed)?;
        let name = reader.string_at(name_at).map_err(malformed)?;
        let tag = reader
            .u8_at(add(param_at, WORD).map_err(malformed)?)
            .map_err(malformed)?;
        let value_at = add(
            param_at,
            reader
                .usize_at(add(param_at, 2 * WORD).map_err(malformed)?)
                .map_err(malformed)?,
        )
        .map_err(malformed)?;
        let raw = reader.bytes_at(value_at).map_err(malformed)?;

        // From here the structure is fine and the failure is the grant's
        // typed value itself, which names the policy that pinned it.
        let ty = ParameterType::from_tag(tag).map_err(|err| ResolverError::ParameterDecoding {
            policy: cid.clone(),
            detail: format!("parameter {name}: {err}"),
        })?;
        let value = decode_parameter(ty, raw).map_err(|err| ResolverError::ParameterDecoding {
            policy: cid.clone(),
            detail: format!("parameter {name}: {err}"),
        })?;
        parameters.insert(name, value);
    }

    Ok((cid, parameters))
}
