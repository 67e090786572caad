//! Agent metadata payload submitted as the registry's `agentURI`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::record::RegistrationMetadata;

const DEFAULT_AGENT_TYPE: &str = "other";

/// JSON document describing a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub agent_type: String,
    pub webpage_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_agent_ref: Option<String>,
    pub registered_at: String,
}

impl AgentCard {
    /// Build the card for a validated identity. `name` is the name being
    /// registered: the requested name when one was supplied, otherwise the
    /// provider's display name. `metadata.requested_name` is not read here.
    #[must_use]
    pub fn new(name: &str, metadata: &RegistrationMetadata, registered_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            agent_type: metadata
                .agent_type
                .clone()
                .unwrap_or_else(|| DEFAULT_AGENT_TYPE.to_string()),
            webpage_url: metadata.webpage_url.clone().unwrap_or_default(),
            external_agent_ref: metadata.external_agent_ref.clone(),
            registered_at: registered_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Serialized form used as the on-chain URI.
    pub fn to_uri(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
