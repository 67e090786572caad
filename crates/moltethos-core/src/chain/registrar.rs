//! JSON-RPC implementation of [`ChainRegistrar`].
//!
//! With [`SignerMode::Local`] the worker signs a legacy EIP-155 transaction
//! with its own key and sends it with `eth_sendRawTransaction`; nonce, gas
//! and chain id come from the node. With [`SignerMode::Node`] the RPC
//! endpoint signs (`eth_sendTransaction`) and the process only holds an
//! opaque bearer token for it.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use super::{
    abi::{self, decode_uint256, is_zero_topic, parse_quantity},
    rpc::RpcClient,
    signer::{parse_address, LegacyTransaction, LocalSigner},
    ChainError, ChainRegistrar, Confirmation,
};
use crate::{
    config::{is_address, ChainConfig, SignerMode},
    record::IdSource,
    Error, Result,
};

const REGISTER_SIGNATURE: &str = "register(string)";
const TOTAL_SUPPLY_SIGNATURE: &str = "totalSupply()";

/// Registration events carrying the agent id in `topics[1]`.
const REGISTRATION_EVENTS: [&str; 2] = [
    "AgentRegistered(uint256,address,string)",
    "Registered(uint256,string,address)",
];
const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

/// Gas limit as a percentage of the node's estimate.
const GAS_LIMIT_PERCENT: u128 = 120;

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<ReceiptLog>,
}

impl Receipt {
    #[must_use]
    pub fn reverted(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| parse_quantity(status).is_ok_and(|s| s == 0))
    }
}

/// Agent id emitted by the registry in this receipt, if any.
///
/// Prefers the registration event; falls back to the ERC-721 mint
/// (`Transfer` from the zero address). Logs from other contracts are ignored.
pub fn agent_id_from_receipt(receipt: &Receipt, registry: &str) -> Option<String> {
    let registration_topics: Vec<String> =
        REGISTRATION_EVENTS.iter().map(|sig| abi::event_topic(sig)).collect();
    let transfer_topic = abi::event_topic(TRANSFER_EVENT);

    let registry_logs = || {
        receipt
            .logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(registry))
    };

    let from_event = registry_logs().find_map(|log| match log.topics.as_slice() {
        [topic0, id, ..] if registration_topics.iter().any(|t| t.eq_ignore_ascii_case(topic0)) => {
            decode_uint256(id).ok()
        }
        _ => None,
    });

    from_event.or_else(|| {
        registry_logs().find_map(|log| match log.topics.as_slice() {
            [topic0, from, _to, token_id]
                if topic0.eq_ignore_ascii_case(&transfer_topic) && is_zero_topic(from) =>
            {
                decode_uint256(token_id).ok()
            }
            _ => None,
        })
    })
}

/// [`ChainRegistrar`] over an Ethereum JSON-RPC endpoint.
#[derive(Debug)]
pub struct JsonRpcRegistrar {
    rpc: RpcClient,
    registry: String,
    from: String,
    signer: Option<LocalSigner>,
    receipt_timeout: Duration,
    receipt_poll: Duration,
}

impl JsonRpcRegistrar {
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the signer mode is missing its key
    /// or address, or the two disagree.
    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        let (from, signer) = match config.signer {
            SignerMode::Local => {
                let key = config.private_key.as_ref().ok_or_else(|| {
                    Error::InvalidConfig(
                        "chain.private_key (PRIVATE_KEY) is not set; set it or use signer = \"node\""
                            .to_string(),
                    )
                })?;
                let signer = LocalSigner::from_secret(key)?;
                if let Some(from) = &config.from_address {
                    if !from.eq_ignore_ascii_case(signer.address()) {
                        return Err(Error::InvalidConfig(format!(
                            "chain.from_address {from} does not match the private key's address {}",
                            signer.address()
                        )));
                    }
                }
                (signer.address().to_string(), Some(signer))
            }
            SignerMode::Node => {
                let from = config.from_address.clone().ok_or_else(|| {
                    Error::InvalidConfig(
                        "chain.from_address (MOLTETHOS_FROM_ADDRESS) is not set".to_string(),
                    )
                })?;
                (from, None)
            }
        };
        if !is_address(&from) || !is_address(&config.registry_address) {
            return Err(Error::InvalidConfig(
                "chain addresses must be 0x-prefixed 20-byte hex".to_string(),
            ));
        }
        let rpc = RpcClient::new(
            &config.rpc_url,
            config.signer_token.clone(),
            Duration::from_secs(30),
        )
        .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        Ok(Self {
            rpc,
            registry: config.registry_address.clone(),
            from,
            signer,
            receipt_timeout: config.receipt_timeout(),
            receipt_poll: config.receipt_poll(),
        })
    }

    fn transaction(&self, agent_uri: &str) -> serde_json::Value {
        json!({
            "from": self.from,
            "to": self.registry,
            "data": abi::to_hex(&abi::encode_string_call(REGISTER_SIGNATURE, agent_uri)),
        })
    }

    /// Address paying for and sending registrations.
    #[must_use]
    pub fn from_address(&self) -> &str {
        &self.from
    }

    async fn send_signed(
        &self,
        signer: &LocalSigner,
        agent_uri: &str,
    ) -> std::result::Result<String, ChainError> {
        let chain_id = self.quantity("eth_chainId", json!([])).await?;
        let chain_id = u64::try_from(chain_id)
            .map_err(|_| ChainError::Rpc(format!("eth_chainId returned {chain_id}")))?;
        let nonce = self
            .quantity("eth_getTransactionCount", json!([self.from, "pending"]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let gas = self
            .quantity("eth_estimateGas", json!([self.transaction(agent_uri)]))
            .await?;

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: gas.saturating_mul(GAS_LIMIT_PERCENT) / 100,
            to: parse_address(&self.registry)?,
            value: 0,
            data: abi::encode_string_call(REGISTER_SIGNATURE, agent_uri),
        };
        let signed = signer.sign(&tx, chain_id)?;
        tracing::debug!(chain_id, nonce, gas_limit = tx.gas_limit, tx_hash = %signed.hash(), "Signed registration transaction");

        self.rpc
            .call("eth_sendRawTransaction", json!([abi::to_hex(&signed.raw)]))
            .await
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> std::result::Result<u128, ChainError> {
        let raw: String = self.rpc.call(method, params).await?;
        parse_quantity(&raw)
    }

    async fn wait_for_receipt(&self, tx_ref: &str) -> Receipt {
        loop {
            match self
                .rpc
                .call_optional::<Receipt>("eth_getTransactionReceipt", json!([tx_ref]))
                .await
            {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => tracing::debug!(tx_ref, error = %e, "Receipt poll failed"),
            }
            tokio::time::sleep(self.receipt_poll).await;
        }
    }

    async fn total_supply(&self) -> std::result::Result<String, ChainError> {
        let call = json!({
            "to": self.registry,
            "data": abi::to_hex(&abi::encode_call(TOTAL_SUPPLY_SIGNATURE)),
        });
        let raw: String = self.rpc.call("eth_call", json!([call, "latest"])).await?;
        decode_uint256(&raw)
    }
}

#[async_trait::async_trait]
impl ChainRegistrar for JsonRpcRegistrar {
    async fn preflight(&self, agent_uri: &str) -> std::result::Result<(), ChainError> {
        let gas = self
            .quantity("eth_estimateGas", json!([self.transaction(agent_uri)]))
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let balance = self
            .quantity("eth_getBalance", json!([self.from, "latest"]))
            .await?;

        let fee = gas.saturating_mul(gas_price);
        if balance < fee {
            return Err(ChainError::InsufficientFunds(format!(
                "balance {balance} wei of {} is below the estimated fee {fee} wei",
                self.from
            )));
        }
        tracing::debug!(gas, gas_price, balance, "Preflight passed");
        Ok(())
    }

    async fn submit(&self, agent_uri: &str) -> std::result::Result<String, ChainError> {
        let tx_ref: String = match &self.signer {
            Some(signer) => self.send_signed(signer, agent_uri).await?,
            None => {
                self.rpc
                    .call("eth_sendTransaction", json!([self.transaction(agent_uri)]))
                    .await?
            }
        };
        tracing::info!(tx_ref = %tx_ref, "Submitted registration transaction");
        Ok(tx_ref)
    }

    async fn confirm(&self, tx_ref: &str) -> std::result::Result<Confirmation, ChainError> {
        let receipt = tokio::time::timeout(self.receipt_timeout, self.wait_for_receipt(tx_ref))
            .await
            .map_err(|_| {
                ChainError::Timeout(format!(
                    "no receipt for {tx_ref} after {}s",
                    self.receipt_timeout.as_secs()
                ))
            })?;

        if receipt.reverted() {
            return Err(ChainError::Reverted(tx_ref.to_string()));
        }

        if let Some(agent_id) = agent_id_from_receipt(&receipt, &self.registry) {
            return Ok(Confirmation {
                agent_id,
                id_source: IdSource::Event,
            });
        }

        let agent_id = self.total_supply().await?;
        tracing::warn!(
            tx_ref,
            agent_id = %agent_id,
            "Registration event not found; agent id read from totalSupply() is approximate"
        );
        Ok(Confirmation {
            agent_id,
            id_source: IdSource::Counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::Value;

    use super::*;

    const REGISTRY: &str = "0x8004A169FB4a3325136EB29fA0ceB6D2e539a432";
    const FROM: &str = "0x1111111111111111111111111111111111111111";
    const PRIVATE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const KEY_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

    fn word(value: u64) -> String {
        format!("0x{value:064x}")
    }

    fn registered_log(agent_id: u64) -> Value {
        json!({
            "address": REGISTRY.to_lowercase(),
            "topics": [abi::event_topic(REGISTRATION_EVENTS[0]), word(agent_id), word(0xdead)],
            "data": "0x"
        })
    }

    #[derive(Clone)]
    struct Node {
        balance: u128,
        receipt: Option<Value>,
        receipt_polls: Arc<AtomicUsize>,
        sends: Arc<AtomicUsize>,
        raw: Arc<Mutex<Vec<String>>>,
        nonce_queries: Arc<Mutex<Vec<Value>>>,
    }

    async fn rpc(State(node): State<Node>, Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let result = match request["method"].as_str().unwrap_or_default() {
            "eth_estimateGas" => json!("0x186a0"),
            "eth_gasPrice" => json!("0x3b9aca00"),
            "eth_getBalance" => json!(format!("0x{:x}", node.balance)),
            "eth_sendTransaction" => {
                node.sends.fetch_add(1, Ordering::SeqCst);
                if node.balance == 0 {
                    return Json(json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": { "code": -32000, "message": "insufficient funds for gas * price + value" }
                    }));
                }
                json!("0xabc")
            }
            "eth_chainId" => json!("0x8f"),
            "eth_getTransactionCount" => {
                node.nonce_queries.lock().unwrap().push(request["params"].clone());
                json!("0x5")
            }
            "eth_sendRawTransaction" => {
                node.raw
                    .lock()
                    .unwrap()
                    .push(request["params"][0].as_str().unwrap_or_default().to_string());
                json!("0xdef")
            }
            "eth_getTransactionReceipt" => {
                node.receipt_polls.fetch_add(1, Ordering::SeqCst);
                node.receipt.clone().unwrap_or(Value::Null)
            }
            "eth_call" => json!(word(41)),
            _ => Value::Null,
        };
        Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    async fn spawn_node(balance: u128, receipt: Option<Value>) -> (JsonRpcRegistrar, Node) {
        let (url, node) = serve_node(balance, receipt).await;
        let config = ChainConfig {
            rpc_url: url,
            signer: SignerMode::Node,
            from_address: Some(FROM.to_string()),
            receipt_timeout_secs: 1,
            receipt_poll_ms: 20,
            ..ChainConfig::default()
        };
        (JsonRpcRegistrar::from_config(&config).unwrap(), node)
    }

    async fn serve_node(balance: u128, receipt: Option<Value>) -> (String, Node) {
        let node = Node {
            balance,
            receipt,
            receipt_polls: Arc::default(),
            sends: Arc::default(),
            raw: Arc::default(),
            nonce_queries: Arc::default(),
        };
        let app = Router::new().route("/", post(rpc)).with_state(node.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/"), node)
    }

    fn local_config(url: String) -> ChainConfig {
        ChainConfig {
            rpc_url: url,
            private_key: Some(crate::config::Secret::new(PRIVATE_KEY)),
            receipt_timeout_secs: 1,
            receipt_poll_ms: 20,
            ..ChainConfig::default()
        }
    }

    #[tokio::test]
    async fn test_local_signer_sends_raw_transaction() {
        let receipt = json!({ "status": "0x1", "logs": [registered_log(7)] });
        let (url, node) = serve_node(10u128.pow(18), Some(receipt)).await;
        let registrar = JsonRpcRegistrar::from_config(&local_config(url)).unwrap();
        assert!(registrar.from_address().eq_ignore_ascii_case(KEY_ADDRESS));

        let registration = registrar.register("{}").await.unwrap();
        assert_eq!(registration.tx_ref, "0xdef");
        assert_eq!(registration.agent_id, "7");
        assert_eq!(node.sends.load(Ordering::SeqCst), 0);

        let raw = node.raw.lock().unwrap().clone();
        assert_eq!(raw.len(), 1);
        assert!(raw[0].starts_with("0xf8"), "unexpected raw tx {}", raw[0]);
        let calldata = hex::encode(abi::encode_string_call(REGISTER_SIGNATURE, "{}"));
        assert!(raw[0].contains(&calldata));

        let nonce_query = node.nonce_queries.lock().unwrap()[0].clone();
        assert!(nonce_query[0].as_str().unwrap().eq_ignore_ascii_case(KEY_ADDRESS));
        assert_eq!(nonce_query[1], "pending");
    }

    #[test]
    fn test_local_signer_rejects_mismatched_from_address() {
        let mut config = local_config("http://127.0.0.1:1/".to_string());
        config.from_address = Some(FROM.to_string());
        assert!(JsonRpcRegistrar::from_config(&config).is_err());

        config.from_address = Some(KEY_ADDRESS.to_string());
        assert!(JsonRpcRegistrar::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_register_reads_agent_id_from_event() {
        let receipt = json!({ "status": "0x1", "logs": [registered_log(7)] });
        let (registrar, _) = spawn_node(10u128.pow(18), Some(receipt)).await;

        let registration = registrar.register("{}").await.unwrap();
        assert_eq!(registration.tx_ref, "0xabc");
        assert_eq!(registration.agent_id, "7");
        assert_eq!(registration.id_source, IdSource::Event);
    }

    #[tokio::test]
    async fn test_missing_event_falls_back_to_counter() {
        let receipt = json!({ "status": "0x1", "logs": [] });
        let (registrar, _) = spawn_node(10u128.pow(18), Some(receipt)).await;

        let confirmation = registrar.confirm("0xabc").await.unwrap();
        assert_eq!(confirmation.agent_id, "41");
        assert_eq!(confirmation.id_source, IdSource::Counter);
    }

    #[tokio::test]
    async fn test_preflight_rejects_low_balance_without_sending() {
        let (registrar, node) = spawn_node(1_000, None).await;

        let result = registrar.register("{}").await;
        assert!(matches!(result, Err(ChainError::InsufficientFunds(_))));
        assert_eq!(node.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_node_insufficient_funds_error_is_classified() {
        let (registrar, _) = spawn_node(0, None).await;
        let result = registrar.submit("{}").await;
        assert!(matches!(result, Err(ChainError::InsufficientFunds(_))));
    }

    #[tokio::test]
    async fn test_reverted_receipt() {
        let receipt = json!({ "status": "0x0", "logs": [] });
        let (registrar, _) = spawn_node(10u128.pow(18), Some(receipt)).await;
        assert_eq!(
            registrar.confirm("0xabc").await,
            Err(ChainError::Reverted("0xabc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_receipt_times_out() {
        let (registrar, node) = spawn_node(10u128.pow(18), None).await;
        let result = registrar.confirm("0xabc").await;
        assert!(matches!(result, Err(ChainError::Timeout(_))));
        assert!(node.receipt_polls.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_receipt_parsing_prefers_registration_event() {
        let mint = json!({
            "address": REGISTRY,
            "topics": [abi::event_topic(TRANSFER_EVENT), word(0), word(0xdead), word(9)]
        });
        let receipt: Receipt = serde_json::from_value(json!({
            "status": "0x1",
            "logs": [mint, registered_log(7)]
        }))
        .unwrap();
        assert_eq!(agent_id_from_receipt(&receipt, REGISTRY).as_deref(), Some("7"));
    }

    #[test]
    fn test_receipt_parsing_accepts_mint_and_ignores_foreign_logs() {
        let foreign = json!({
            "address": "0x2222222222222222222222222222222222222222",
            "topics": [abi::event_topic(REGISTRATION_EVENTS[0]), word(99)]
        });
        let mint = json!({
            "address": REGISTRY,
            "topics": [abi::event_topic(TRANSFER_EVENT), word(0), word(0xdead), word(9)]
        });
        let receipt: Receipt =
            serde_json::from_value(json!({ "status": "0x1", "logs": [foreign, mint] })).unwrap();
        assert_eq!(agent_id_from_receipt(&receipt, REGISTRY).as_deref(), Some("9"));

        let transfer = json!({
            "address": REGISTRY,
            "topics": [abi::event_topic(TRANSFER_EVENT), word(5), word(6), word(9)]
        });
        let receipt: Receipt =
            serde_json::from_value(json!({ "status": "0x1", "logs": [transfer] })).unwrap();
        assert_eq!(agent_id_from_receipt(&receipt, REGISTRY), None);
    }

    #[test]
    fn test_from_config_requires_a_signing_identity() {
        assert!(JsonRpcRegistrar::from_config(&ChainConfig::default()).is_err());
        let node_signed = ChainConfig {
            signer: SignerMode::Node,
            ..ChainConfig::default()
        };
        assert!(JsonRpcRegistrar::from_config(&node_signed).is_err());
    }
}
