//! Permission registries for the mandate runtime.
//!
//! [`EvmPermissionRegistry`] resolves grants from the on-chain registry
//! contract over any [`mandate_runtime::ChainReader`];
//! [`JsonRpcChainReader`] is the stock `eth_call` transport for it.
//! [`InMemoryPermissionRegistry`] backs tests and local development.

#![deny(unsafe_code)]

pub mod codec;
pub mod evm;
pub mod memory;
pub mod rpc;

pub use codec::{decode_parameter, CodecError, ParameterType};
pub use evm::EvmPermissionRegistry;
pub use memory::InMemoryPermissionRegistry;
pub use rpc::JsonRpcChainReader;
