//! Mandate shared types: the data model every other crate builds on.
//!
//! Identifiers (addresses, content ids, app identity), the phase outcome
//! channel, permission grants as read from the registry, and the structured
//! invocation report returned to callers. No I/O, no async.
#![deny(unsafe_code)]

pub mod ids;
pub mod outcome;
pub mod report;

pub use ids::{
    AbilityCid, Address, AddressParseError, AgentAccount, AppId, AppVersion, CorrelationId,
    PolicyCid,
};
pub use outcome::PhaseOutcome;
pub use report::{
    AllowedPolicy, CommitOutcome, CommitRecord, DeniedPolicy, ExecutionMode, FaultKind,
    InvocationReport, PermissionGrant, PolicyDenial, PolicyVerdicts, RuntimeFault,
};
