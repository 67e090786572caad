//! Identity validation against the Moltbook API.
//!
//! A credential is checked with `GET {base}/agents/me` and a bearer header.
//! The answer is one of three outcomes so the pipeline can tell a rejected
//! credential (terminal) from a provider outage (retryable).

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    config::ValidatorConfig,
    error::{ErrorKind, PipelineError},
    record::Credential,
    Error, Result,
};

/// Result of checking one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The provider accepted the credential; `display_name` is non-empty.
    Valid { display_name: String },
    /// The provider answered and refused the credential.
    Rejected { reason: String },
    /// The provider could not give an answer.
    Unavailable { reason: String },
}

impl ValidationOutcome {
    /// The display name, or the classified failure.
    pub fn into_display_name(self) -> std::result::Result<String, PipelineError> {
        match self {
            Self::Valid { display_name } => Ok(display_name),
            Self::Rejected { reason } => Err(PipelineError::new(
                ErrorKind::InvalidCredential,
                format!("credential rejected: {reason}"),
            )),
            Self::Unavailable { reason } => Err(PipelineError::new(
                ErrorKind::ProviderUnavailable,
                format!("identity provider unavailable: {reason}"),
            )),
        }
    }
}

/// Port for credential validation.
#[async_trait::async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Never returns an error; every failure is folded into the outcome.
    async fn validate(&self, credential: &Credential) -> ValidationOutcome;
}

#[derive(Debug, Deserialize)]
struct AgentsMeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    agent: Option<AgentProfile>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AgentProfile {
    #[serde(default)]
    name: Option<String>,
}

/// HTTP validator for the Moltbook identity provider.
#[derive(Debug, Clone)]
pub struct MoltbookValidator {
    client: Client,
    base_url: String,
}

impl MoltbookValidator {
    pub fn from_config(config: &ValidatorConfig) -> Result<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classify(status: StatusCode, body: Option<AgentsMeResponse>) -> ValidationOutcome {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return ValidationOutcome::Unavailable {
                reason: format!("provider answered {status}"),
            };
        }

        let Some(body) = body else {
            return if status.is_success() {
                ValidationOutcome::Unavailable {
                    reason: "malformed provider response".to_string(),
                }
            } else {
                ValidationOutcome::Rejected {
                    reason: format!("provider answered {status}"),
                }
            };
        };

        if !status.is_success() || !body.success {
            return ValidationOutcome::Rejected {
                reason: body.error.unwrap_or_else(|| format!("provider answered {status}")),
            };
        }

        match body.agent.and_then(|agent| agent.name).map(|n| n.trim().to_string()) {
            Some(name) if !name.is_empty() => ValidationOutcome::Valid { display_name: name },
            _ => ValidationOutcome::Unavailable {
                reason: "provider response has no agent name".to_string(),
            },
        }
    }
}

#[async_trait::async_trait]
impl IdentityValidator for MoltbookValidator {
    async fn validate(&self, credential: &Credential) -> ValidationOutcome {
        if credential.is_empty() {
            return ValidationOutcome::Rejected {
                reason: "empty credential".to_string(),
            };
        }

        let url = format!("{}/agents/me", self.base_url);
        let response = match self
            .client
            .get(&url)
            .bearer_auth(credential.expose())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Identity provider request failed");
                return ValidationOutcome::Unavailable {
                    reason: credential.scrub(&e.to_string()),
                };
            }
        };

        let status = response.status();
        let body = response.json::<AgentsMeResponse>().await.ok();
        let outcome = Self::classify(status, body);
        tracing::debug!(%status, valid = matches!(outcome, ValidationOutcome::Valid { .. }), "Validated credential");
        outcome
    }
}
