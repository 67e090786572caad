//! Ethereum JSON-RPC transport.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ChainError;
use crate::config::Secret;

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<NodeError>,
}

#[derive(Debug, Deserialize)]
struct NodeError {
    code: i64,
    message: String,
}

/// A single JSON-RPC endpoint.
#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    url: String,
    bearer: Option<Secret>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str, bearer: Option<Secret>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Rpc(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            bearer,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` and decode a non-null result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| ChainError::Rpc(format!("{method} returned null")))
    }

    /// Call `method`; a `null` result is `None`.
    pub async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, ChainError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let builder = self.client.post(&self.url).json(&request);
        let builder = match &self.bearer {
            Some(token) => builder.bearer_auth(token.expose()),
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method} transport error: {e}")))?;
        let status = response.status();
        let body: Response = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("{method} answered {status} with malformed body: {e}")))?;

        if let Some(error) = body.error {
            return Err(classify_node_error(method, &error));
        }

        match body.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ChainError::Rpc(format!("{method} result has unexpected shape: {e}"))),
        }
    }
}

fn classify_node_error(method: &str, error: &NodeError) -> ChainError {
    let message = format!("{method} failed ({}): {}", error.code, error.message);
    if error.message.to_lowercase().contains("insufficient funds") {
        ChainError::InsufficientFunds(message)
    } else if error.message.to_lowercase().contains("execution reverted") {
        ChainError::Reverted(message)
    } else {
        ChainError::Rpc(message)
    }
}
