//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: ~/.config/moltethos/config.toml
//! 3. Explicit config file (`--config`)
//! 4. Environment variables: `MOLTETHOS_*` plus the worker's historical
//!    `SUPABASE_*`, `FIREBASE_*` and `RPC_URL` names
//!
//! The resulting [`Config`] is built once at process start and passed by
//! reference into every adapter constructor.
//!
//! # Example Config
//!
//! ```toml
//! [store]
//! backend = "supabase"
//! supabase_url = "https://example.supabase.co"
//!
//! [chain]
//! signer = "node"
//! from_address = "0x1111111111111111111111111111111111111111"
//!
//! [worker]
//! poll_interval_secs = 30
//! max_attempts = 5
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, Result};

/// Secret configuration value; never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub validator: ValidatorConfig,
    pub chain: ChainConfig,
    pub worker: WorkerConfig,
    pub scan: ScanConfig,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Supabase,
    Firebase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: String,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<Secret>,
    pub firebase_url: Option<String>,
    pub firebase_auth: Option<Secret>,
    pub table: String,
    pub request_timeout_secs: u64,
    /// How often a watched backend is read for writes made elsewhere.
    pub change_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Who signs registration transactions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignerMode {
    /// Sign in-process with `chain.private_key`, send with `eth_sendRawTransaction`.
    #[default]
    Local,
    /// The RPC endpoint signs for `chain.from_address` (`eth_sendTransaction`).
    Node,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub registry_address: String,
    pub signer: SignerMode,
    pub private_key: Option<Secret>,
    pub from_address: Option<String>,
    pub signer_token: Option<Secret>,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub base_url: String,
    pub api_key: Option<Secret>,
    pub chain: String,
    pub cache_ttl_secs: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: "moltethos.db".to_string(),
            supabase_url: None,
            supabase_key: None,
            firebase_url: None,
            firebase_auth: None,
            table: "registrations".to_string(),
            request_timeout_secs: 10,
            change_poll_ms: 1_000,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.moltbook.com/api/v1".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://rpc.monad.xyz".to_string(),
            registry_address: "0x8004A169FB4a3325136EB29fA0ceB6D2e539a432".to_string(),
            signer: SignerMode::Local,
            private_key: None,
            from_address: None,
            signer_token: None,
            receipt_timeout_secs: 120,
            receipt_poll_ms: 2_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_attempts: 5,
            concurrency: 1,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.8004scan.io/api/v1".to_string(),
            api_key: None,
            chain: "monad".to_string(),
            cache_ttl_secs: 60,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn change_poll(&self) -> Duration {
        Duration::from_millis(self.change_poll_ms)
    }
}

impl ChainConfig {
    #[must_use]
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    #[must_use]
    pub const fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or cannot be read
/// - An environment override cannot be parsed
/// - Config values fail validation
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            layers.push(read_toml_value(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::InvalidConfig(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        layers.push(read_toml_value(path)?);
    }

    let config = Config::from_layers(layers)?.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "moltethos")
        .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
}

fn read_toml_value(path: &Path) -> Result<toml::Value> {
    if path.is_dir() {
        return Err(Error::Io(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("Failed to read config file {}: {e}", path.display())))?;
    toml::from_str(&content).map_err(Error::from)
}

/// Recursively overlay `overlay` onto `base`; tables merge, other values replace.
fn merge_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            toml::Value::Table(base)
        }
        (_, overlay) => overlay,
    }
}

impl Config {
    /// Parse a single TOML document on top of the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(content)?;
        Self::from_layers(vec![value])
    }

    fn from_layers(layers: Vec<toml::Value>) -> Result<Self> {
        let defaults = toml::Value::try_from(Self::default())
            .map_err(|e| Error::InvalidConfig(format!("Failed to encode defaults: {e}")))?;
        let merged = layers.into_iter().fold(defaults, merge_values);
        merged.try_into().map_err(Error::from)
    }

    /// Apply environment variable overrides from the process environment.
    pub fn apply_env_vars(self) -> Result<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        if let Some(value) = first(&["MOLTETHOS_STORE_BACKEND"]) {
            self.store.backend = StoreBackend::from_str(&value.to_lowercase()).map_err(|_| {
                Error::InvalidConfig(format!(
                    "Invalid MOLTETHOS_STORE_BACKEND value: {value}. Must be one of: sqlite, supabase, firebase"
                ))
            })?;
        }
        if let Some(value) = first(&["MOLTETHOS_SQLITE_PATH"]) {
            self.store.sqlite_path = value;
        }
        if let Some(value) = first(&["MOLTETHOS_SUPABASE_URL", "SUPABASE_URL"]) {
            self.store.supabase_url = Some(value);
        }
        if let Some(value) = first(&["SUPABASE_SERVICE_KEY", "SUPABASE_ANON_KEY"]) {
            self.store.supabase_key = Some(Secret::new(value));
        }
        if let Some(value) = first(&["MOLTETHOS_FIREBASE_URL", "FIREBASE_DATABASE_URL"]) {
            self.store.firebase_url = Some(value);
        }
        if let Some(value) = first(&["FIREBASE_AUTH"]) {
            self.store.firebase_auth = Some(Secret::new(value));
        }
        if let Some(value) = first(&["MOLTETHOS_VALIDATOR_URL", "MOLTBOOK_API_URL"]) {
            self.validator.base_url = value;
        }
        if let Some(value) = first(&["MOLTETHOS_RPC_URL", "RPC_URL"]) {
            self.chain.rpc_url = value;
        }
        if let Some(value) = first(&["MOLTETHOS_REGISTRY_ADDRESS"]) {
            self.chain.registry_address = value;
        }
        if let Some(value) = first(&["MOLTETHOS_SIGNER"]) {
            self.chain.signer = SignerMode::from_str(&value.to_lowercase()).map_err(|_| {
                Error::InvalidConfig(format!(
                    "Invalid MOLTETHOS_SIGNER value: {value}. Must be one of: local, node"
                ))
            })?;
        }
        if let Some(value) = first(&["MOLTETHOS_PRIVATE_KEY", "PRIVATE_KEY"]) {
            self.chain.private_key = Some(Secret::new(value));
        }
        if let Some(value) = first(&["MOLTETHOS_FROM_ADDRESS"]) {
            self.chain.from_address = Some(value);
        }
        if let Some(value) = first(&["MOLTETHOS_SIGNER_TOKEN"]) {
            self.chain.signer_token = Some(Secret::new(value));
        }
        if let Some(value) = first(&["MOLTETHOS_POLL_INTERVAL_SECS"]) {
            self.worker.poll_interval_secs = parse_env("MOLTETHOS_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = first(&["MOLTETHOS_MAX_ATTEMPTS"]) {
            self.worker.max_attempts = parse_env("MOLTETHOS_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = first(&["MOLTETHOS_CHANGE_POLL_MS"]) {
            self.store.change_poll_ms = parse_env("MOLTETHOS_CHANGE_POLL_MS", &value)?;
        }
        if let Some(value) = first(&["MOLTETHOS_CONCURRENCY"]) {
            self.worker.concurrency = parse_env("MOLTETHOS_CONCURRENCY", &value)?;
        }
        if let Some(value) = first(&["MOLTETHOS_SCAN_API_KEY", "SCAN_API_KEY"]) {
            self.scan.api_key = Some(Secret::new(value));
        }

        Ok(self)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or a selected store
    /// backend is missing its connection settings.
    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_secs == 0 {
            return Err(Error::Validation(
                "worker.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(Error::Validation(
                "worker.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.concurrency == 0 || self.worker.concurrency > 64 {
            return Err(Error::Validation(
                "worker.concurrency must be 1-64".to_string(),
            ));
        }
        if self.store.change_poll_ms == 0 {
            return Err(Error::Validation(
                "store.change_poll_ms must be at least 1".to_string(),
            ));
        }
        if self.chain.receipt_poll_ms == 0 {
            return Err(Error::Validation(
                "chain.receipt_poll_ms must be at least 1".to_string(),
            ));
        }
        if !is_address(&self.chain.registry_address) {
            return Err(Error::Validation(format!(
                "chain.registry_address is not a 20-byte hex address: {}",
                self.chain.registry_address
            )));
        }
        if let Some(from) = &self.chain.from_address {
            if !is_address(from) {
                return Err(Error::Validation(format!(
                    "chain.from_address is not a 20-byte hex address: {from}"
                )));
            }
        }
        if let Some(key) = &self.chain.private_key {
            if !is_private_key(key.expose()) {
                return Err(Error::Validation(
                    "chain.private_key must be 32 bytes of hex".to_string(),
                ));
            }
        }

        match self.store.backend {
            StoreBackend::Sqlite if self.store.sqlite_path.trim().is_empty() => Err(
                Error::Validation("store.sqlite_path cannot be empty".to_string()),
            ),
            StoreBackend::Supabase
                if self.store.supabase_url.is_none() || self.store.supabase_key.is_none() =>
            {
                Err(Error::Validation(
                    "supabase backend requires store.supabase_url and a SUPABASE_SERVICE_KEY"
                        .to_string(),
                ))
            }
            StoreBackend::Firebase if self.store.firebase_url.is_none() => Err(Error::Validation(
                "firebase backend requires store.firebase_url".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("Invalid {key} value: {e}")))
}

/// `0x` followed by exactly 40 hex digits.
#[must_use]
pub fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// 64 hex digits, optionally `0x`-prefixed.
fn is_private_key(value: &str) -> bool {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
