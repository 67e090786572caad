//! Adapter wiring from a loaded [`Config`].
//!
//! Every command starts from one `AppContext`; adapters are only built
//! when a command needs them, so `list` works without chain settings.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use moltethos_core::{
    chain::JsonRpcRegistrar,
    feedback::FeedbackLedger,
    load_config, open_store,
    scan::ScanClient,
    store::SqliteQueueStore,
    validator::MoltbookValidator,
    Config, PipelineOptions, QueueStore, RegistrationPipeline,
};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
}

impl AppContext {
    /// Load layered configuration, with `explicit` as the `--config` file.
    ///
    /// # Errors
    ///
    /// Returns an error if any config layer is malformed or invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = load_config(explicit).context("Failed to load configuration")?;
        Ok(Self::new(config))
    }

    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn store(&self) -> Result<Arc<dyn QueueStore>> {
        open_store(&self.config)
            .await
            .with_context(|| format!("Failed to open {} queue store", self.config.store.backend))
    }

    /// Store, identity validator and chain registrar assembled into a pipeline.
    pub async fn pipeline(&self) -> Result<RegistrationPipeline> {
        let validator = MoltbookValidator::from_config(&self.config.validator)
            .context("Failed to build identity validator")?;
        let registrar = JsonRpcRegistrar::from_config(&self.config.chain)
            .context("Failed to build chain registrar")?;
        let store = self.store().await?;

        Ok(RegistrationPipeline::new(
            store,
            Arc::new(validator),
            Arc::new(registrar),
            PipelineOptions::from(&self.config.worker),
        ))
    }

    /// The feedback ledger always lives in the local `SQLite` database,
    /// whichever backend holds the registration queue.
    pub async fn ledger(&self) -> Result<FeedbackLedger> {
        let path = &self.config.store.sqlite_path;
        let database = SqliteQueueStore::open(path)
            .await
            .with_context(|| format!("Failed to open database {path}"))?;
        FeedbackLedger::new(database.pool().clone())
            .await
            .context("Failed to open feedback ledger")
    }

    pub fn scan(&self) -> Result<ScanClient> {
        ScanClient::from_config(&self.config.scan).context("Failed to build 8004scan client")
    }
}
