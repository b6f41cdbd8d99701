//! JSON-RPC chain transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mandate_runtime::{ChainError, ChainReader};
use mandate_types::Address;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ChainReader`] speaking `eth_call` to a JSON-RPC endpoint.
pub struct JsonRpcChainReader {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcChainReader {
    pub fn new(endpoint: &str) -> Result<Self, ChainError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ChainError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: json!([
                {
                    "to": to.to_string(),
                    "data": format!("0x{}", hex::encode(&data)),
                },
                "latest",
            ]),
        };
        debug!(%to, endpoint = %self.endpoint, bytes = data.len(), "eth_call");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| ChainError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| ChainError::Transport(err.to_string()))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|err| ChainError::MalformedResponse(err.to_string()))?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = body.result.ok_or_else(|| {
            ChainError::MalformedResponse("response carries neither result nor error".to_string())
        })?;
        let digits = result.strip_prefix("0x").unwrap_or(&result);
        hex::decode(digits)
            .map_err(|err| ChainError::MalformedResponse(format!("result is not hex: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let reader = JsonRpcChainReader::new("https://rpc.example.net/").expect("client");
        assert_eq!(reader.endpoint(), "https://rpc.example.net");
    }

    #[test]
    fn request_serializes_in_jsonrpc_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_call",
            params: json!([{"to": "0x00", "data": "0x75221e3f"}, "latest"]),
        };
        let encoded = serde_json::to_value(&request).expect("serialize");
        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["method"], "eth_call");
        assert_eq!(encoded["params"][1], "latest");
    }

    #[test]
    fn error_body_deserializes() {
        let body: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#,
        )
        .expect("deserialize");
        let error = body.error.expect("error body");
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "execution reverted");
        assert!(body.result.is_none());
    }
}
